//! Rotation controller: pool state and the rotation cycle.
//!
//! The controller owns the active and staging generations plus the set
//! of pending decommissions. All mutation goes through the rotation
//! cycle or the decommission tasks; the routing layer only reads the
//! active generation through [`RotationController::select_instance`].
//!
//! # Invariants
//!
//! - At most one generation is active at any instant
//! - The staging generation receives traffic only by being promoted
//! - A demoted generation is scheduled for deletion exactly once, never
//!   earlier than its demotion time plus the grace period
//! - At most one rotation cycle runs at a time; overlapping triggers
//!   are skipped, not queued

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use mtd_pool::{Generation, GenerationLabel, Instance, LabelAllocator};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::orchestrator::{Orchestrator, OrchestratorError};

mod decommission;
mod provisioner;
mod scheduler;

use decommission::PendingEntry;

pub use provisioner::provision_generation;
pub use scheduler::{run_rotation_loop, RotationHook};

/// Selection failure surfaced to the routing layer.
#[derive(Debug, Error)]
pub enum SelectError {
    /// No instance is available even after a pool refresh.
    #[error("no available instance for routing")]
    NoAvailableInstance,
}

/// Rotation cycle failure.
#[derive(Debug, Error)]
pub enum RotateError {
    /// Traffic cutover failed; the cycle aborted before the swap.
    #[error("traffic cutover failed: {0}")]
    Cutover(#[source] OrchestratorError),
}

/// Result of one rotation trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationOutcome {
    /// A generation was promoted.
    Rotated {
        label: GenerationLabel,
        /// Address of one promoted instance, for DNS followup.
        first_address: Option<std::net::SocketAddr>,
    },

    /// Nothing staged; the cycle was a no-op.
    NothingStaged,

    /// Another cycle was in flight; this trigger was dropped.
    Skipped,
}

/// Owns pool state and drives rotation.
///
/// Constructed once at startup and shared as `Arc<RotationController>`;
/// there is no ambient global state.
pub struct RotationController<O: Orchestrator> {
    orchestrator: Arc<O>,

    replicas: u32,
    grace_period: Duration,
    provision_timeout: Duration,
    label_selector: String,
    graceful_rotation: bool,

    /// Generation currently receiving traffic. Swapped atomically;
    /// readers hold a consistent snapshot for their whole call.
    active: ArcSwapOption<Generation>,

    /// Generation being prepared for the next rotation.
    staging: Mutex<Option<Generation>>,

    /// Demoted generations awaiting deletion.
    pending: StdMutex<Vec<PendingEntry>>,

    /// Fresh-label source; labels are never reused.
    labels: StdMutex<LabelAllocator>,

    /// Rotation mutual exclusion. `try_lock` so overlapping triggers
    /// skip instead of queueing.
    cycle_lock: Mutex<()>,

    /// Guards against stacking replenish tasks.
    replenishing: AtomicBool,
}

impl<O: Orchestrator + 'static> RotationController<O> {
    /// Create a controller from config.
    pub fn new(orchestrator: Arc<O>, config: &Config) -> Self {
        Self {
            orchestrator,
            replicas: config.replicas,
            grace_period: config.grace_period,
            provision_timeout: config.provision_timeout,
            label_selector: config.label_selector.clone(),
            graceful_rotation: config.graceful_rotation,
            active: ArcSwapOption::empty(),
            staging: Mutex::new(None),
            pending: StdMutex::new(Vec::new()),
            labels: StdMutex::new(LabelAllocator::new()),
            cycle_lock: Mutex::new(()),
            replenishing: AtomicBool::new(false),
        }
    }

    /// Adopt whatever is already running as the active pool and
    /// provision the first staging generation.
    ///
    /// Errors are logged, not fatal: an empty pool just means selection
    /// refreshes on demand and the next tick retries provisioning.
    pub async fn bootstrap(self: &Arc<Self>) {
        match self.orchestrator.list_instances(&self.label_selector).await {
            Ok(instances) => match adopt_newest(instances) {
                Some(generation) => {
                    info!(
                        label = %generation.label,
                        instances = generation.len(),
                        "Adopted running instances as initial active pool"
                    );
                    self.active.store(Some(Arc::new(generation)));
                }
                None => info!("No running instances found at startup"),
            },
            Err(e) => error!(error = %e, "Failed to list instances at startup"),
        }

        self.replenish().await;
    }

    /// Execute one rotation cycle.
    ///
    /// Cycle states: Idle -> CuttingOver -> Demoting -> Replenishing ->
    /// Idle. Runs under the cycle lock; a concurrent trigger returns
    /// [`RotationOutcome::Skipped`] without touching pool state.
    pub async fn rotate(self: &Arc<Self>) -> Result<RotationOutcome, RotateError> {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            warn!("Rotation cycle already in flight, skipping trigger");
            return Ok(RotationOutcome::Skipped);
        };

        let incoming = self.staging.lock().await.take();
        let Some(incoming) = incoming else {
            info!("Nothing staged, rotation is a no-op");
            return Ok(RotationOutcome::NothingStaged);
        };

        // An empty generation can never serve; cutting traffic over to
        // it would blackhole the service. Discard it, clean up whatever
        // resources its creation left behind, and let the scheduler
        // re-stage.
        if incoming.is_empty() {
            warn!(
                label = %incoming.label,
                "Staged generation has no ready instances, discarding"
            );
            self.schedule_decommission(incoming.label.clone());
            return Ok(RotationOutcome::NothingStaged);
        }

        // Policy: a short (but non-empty) generation is still promoted
        // (see DESIGN.md); the shortfall is visible here rather than
        // silent.
        if (incoming.len() as u32) < self.replicas {
            warn!(
                label = %incoming.label,
                ready = incoming.len(),
                desired = self.replicas,
                "Promoting generation below desired replica count"
            );
        }

        // CuttingOver: the external traffic target must repoint before
        // the in-process swap, so the entry point and the active pointer
        // are never out of sync for longer than one failed attempt.
        if let Err(e) = self.orchestrator.update_traffic_target(&incoming.label).await {
            if self.graceful_rotation {
                error!(
                    label = %incoming.label,
                    error = %e,
                    "Traffic cutover failed, aborting cycle; previous generation keeps serving"
                );
                *self.staging.lock().await = Some(incoming);
                return Err(RotateError::Cutover(e));
            }
            warn!(
                label = %incoming.label,
                error = %e,
                "Traffic cutover failed, swapping anyway (graceful rotation disabled)"
            );
        }

        let first_address = incoming.instances.first().map(|i| i.address);
        let label = incoming.label.clone();
        let old = self.active.swap(Some(Arc::new(incoming)));
        info!(label = %label, "Promoted staging generation to active");

        // Demoting: schedule deletion of exactly the one previous label.
        if let Some(old) = old {
            // A selection refresh can adopt the cohort that is about to
            // be promoted; deleting it here would tear down the new
            // active generation.
            if old.label != label {
                self.schedule_decommission(old.label.clone());
            }
        }

        // Replenishing: build the next staging generation off-cycle so
        // it is ready before the next tick.
        self.spawn_replenish();

        Ok(RotationOutcome::Rotated {
            label,
            first_address,
        })
    }

    /// Pick a uniformly random instance from the active generation.
    ///
    /// On an empty pool, performs one synchronous refresh from the
    /// cluster before failing with [`SelectError::NoAvailableInstance`].
    /// Safe under unbounded concurrency with an in-flight rotation.
    pub async fn select_instance(&self) -> Result<Instance, SelectError> {
        if let Some(generation) = self.active.load_full() {
            if let Some(instance) = generation.pick_random() {
                return Ok(instance.clone());
            }
        }

        warn!("No active instances, refreshing pool from cluster");
        let listed = match self.orchestrator.list_instances(&self.label_selector).await {
            Ok(listed) => listed,
            Err(e) => {
                error!(error = %e, "Pool refresh failed");
                return Err(SelectError::NoAvailableInstance);
            }
        };

        // A rotation may have promoted a generation while we were
        // listing; it wins over the adopted cohort.
        if let Some(generation) = self.active.load_full() {
            if let Some(instance) = generation.pick_random() {
                return Ok(instance.clone());
            }
        }

        let Some(generation) = adopt_newest(listed) else {
            return Err(SelectError::NoAvailableInstance);
        };

        let generation = Arc::new(generation);
        info!(
            label = %generation.label,
            instances = generation.len(),
            "Adopted running instances as active pool"
        );
        self.active.store(Some(Arc::clone(&generation)));
        generation
            .pick_random()
            .cloned()
            .ok_or(SelectError::NoAvailableInstance)
    }

    /// Provision a staging generation if none exists and no provisioning
    /// run is already in flight.
    pub fn ensure_staging(self: &Arc<Self>) {
        self.spawn_replenish();
    }

    /// Cancel pending decommission timers without executing them.
    ///
    /// Best-effort shutdown: in-flight orchestrator calls are abandoned.
    pub fn shutdown(&self) {
        let mut pending = self.pending.lock().unwrap();
        for entry in pending.drain(..) {
            info!(label = %entry.label, "Cancelling pending decommission");
            entry.task.abort();
        }
    }

    /// Label of the active generation, if any.
    pub fn active_label(&self) -> Option<GenerationLabel> {
        self.active.load().as_ref().map(|g| g.label.clone())
    }

    /// Snapshot of the active generation, if any.
    pub fn active_snapshot(&self) -> Option<Arc<Generation>> {
        self.active.load_full()
    }

    /// Label of the staging generation, if any.
    pub async fn staging_label(&self) -> Option<GenerationLabel> {
        self.staging.lock().await.as_ref().map(|g| g.label.clone())
    }

    /// Labels currently awaiting decommission.
    pub fn pending_labels(&self) -> Vec<GenerationLabel> {
        self.pending
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.label.clone())
            .collect()
    }

    fn spawn_replenish(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.replenish().await;
        });
    }

    async fn replenish(self: &Arc<Self>) {
        if self.replenishing.swap(true, Ordering::SeqCst) {
            return;
        }

        if self.staging.lock().await.is_some() {
            self.replenishing.store(false, Ordering::SeqCst);
            return;
        }

        let result = provisioner::provision_generation(
            self.orchestrator.as_ref(),
            &self.labels,
            self.replicas,
            self.provision_timeout,
        )
        .await;

        match result {
            Ok(generation) => {
                info!(
                    label = %generation.label,
                    instances = generation.len(),
                    "Staged next generation"
                );
                *self.staging.lock().await = Some(generation);
            }
            Err(e) => {
                // Next scheduler tick sees empty staging and retries.
                error!(error = %e, "Provisioning failed, staging left empty");
            }
        }

        self.replenishing.store(false, Ordering::SeqCst);
    }
}

/// Group listed instances by generation label and adopt the newest
/// cohort, preserving the single-active-generation invariant even when
/// stale instances are still lingering in the cluster.
fn adopt_newest(instances: Vec<Instance>) -> Option<Generation> {
    let mut by_label: HashMap<GenerationLabel, Vec<Instance>> = HashMap::new();
    for instance in instances {
        by_label
            .entry(instance.generation_label.clone())
            .or_default()
            .push(instance);
    }

    let (label, cohort) = by_label.into_iter().max_by(|(a, _), (b, _)| a.cmp(b))?;
    Some(Generation::new(label, cohort))
}
