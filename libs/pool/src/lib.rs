//! Instance pool primitives for moving-target-defense rotation.
//!
//! This library provides the value types shared by the rotation
//! controller and the routing layer:
//!
//! - **Instance**: one running backend with a routable address.
//! - **Generation**: a labeled cohort of instances created together; the
//!   unit of promotion and deletion.
//! - **Label allocation**: fresh, never-reused generation labels derived
//!   from the clock.
//!
//! # Invariants
//!
//! - A label is allocated at most once per process lifetime
//! - Labels allocated later always compare greater (lexicographic order
//!   coincides with allocation order)
//! - A decommission never fires earlier than demotion time plus the
//!   configured grace period

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

/// Clock format for generation labels.
///
/// Millisecond granularity keeps labels collision-resistant across
/// back-to-back rotations; the allocator still guards against an exact
/// collision with a numeric suffix.
const LABEL_FORMAT: &str = "%Y%m%d%H%M%S%3f";

/// Opaque label identifying one generation of instances.
///
/// Also used verbatim as the value of the `mtd-rotation` workload label
/// in the cluster, so it is restricted to the charset the allocator
/// emits (digits and `-`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationLabel(String);

impl GenerationLabel {
    /// Get the label string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build a label from a raw string observed in the cluster.
    ///
    /// Used when adopting instances that already exist (e.g. at startup
    /// or during a selection refresh); never used for new generations.
    pub fn from_observed(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }
}

impl fmt::Display for GenerationLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Allocator for fresh generation labels.
///
/// Labels derive from the UTC clock; an exact collision (two allocations
/// within the same millisecond) or a clock that runs backwards falls back
/// to suffixing the previous base with a fixed-width counter, so two
/// calls can never return equal labels and allocation order always
/// matches lexicographic order. The suffix width is what keeps the
/// ordering guarantee: a variable-width counter would sort `-10` before
/// `-2`.
#[derive(Debug, Default)]
pub struct LabelAllocator {
    last_base: String,
    counter: u32,
}

impl LabelAllocator {
    /// Create a new allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next label.
    pub fn next(&mut self) -> GenerationLabel {
        let base = Utc::now().format(LABEL_FORMAT).to_string();

        if base > self.last_base {
            self.last_base = base.clone();
            self.counter = 0;
            GenerationLabel(base)
        } else {
            // Same-millisecond collision or clock skew: derive from the
            // last issued base instead of reusing it.
            self.counter += 1;
            GenerationLabel(format!("{}-{:06}", self.last_base, self.counter))
        }
    }
}

/// One running backend instance.
///
/// Immutable once constructed; identified by `id` within a generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Workload resource name (pod name).
    pub id: String,

    /// Routable address of the instance.
    pub address: SocketAddr,

    /// Label of the generation this instance belongs to.
    pub generation_label: GenerationLabel,

    /// When the instance was first observed ready.
    pub ready_since: DateTime<Utc>,
}

impl Instance {
    /// Create a new instance record, stamped ready now.
    pub fn new(id: impl Into<String>, address: SocketAddr, label: GenerationLabel) -> Self {
        Self {
            id: id.into(),
            address,
            generation_label: label,
            ready_since: Utc::now(),
        }
    }
}

/// A labeled cohort of instances created together.
///
/// The unit of creation, promotion, and deletion. Never mutated after
/// construction; promotion swaps whole generations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    /// The generation's label.
    pub label: GenerationLabel,

    /// Ready instances in this generation.
    pub instances: Vec<Instance>,

    /// When the generation was assembled.
    pub created_at: DateTime<Utc>,
}

impl Generation {
    /// Create a new generation from a set of ready instances.
    pub fn new(label: GenerationLabel, instances: Vec<Instance>) -> Self {
        Self {
            label,
            instances,
            created_at: Utc::now(),
        }
    }

    /// Number of instances in the generation.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// True if the generation holds no instances.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Pick a uniformly random instance, or `None` if empty.
    pub fn pick_random(&self) -> Option<&Instance> {
        self.instances.choose(&mut rand::rng())
    }
}

/// A generation awaiting deletion after its grace period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDecommission {
    /// Label of the demoted generation.
    pub label: GenerationLabel,

    /// Earliest instant at which deletion may run.
    pub fire_at: Instant,
}

impl PendingDecommission {
    /// Schedule a demoted generation for deletion.
    ///
    /// Guarantees `fire_at >= demoted_at + grace`.
    pub fn schedule(label: GenerationLabel, demoted_at: Instant, grace: Duration) -> Self {
        Self {
            label,
            fire_at: demoted_at + grace,
        }
    }

    /// True once the grace period has elapsed.
    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.fire_at
    }
}
