//! Mock orchestrator for tests and development.
//!
//! Keeps generations in memory and records every mutating call. Knobs
//! simulate cutover failure, deletion failure, provisioning shortfall,
//! and a slow traffic-target update (for mutual-exclusion tests).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use mtd_pool::{GenerationLabel, Instance};
use tracing::debug;

use super::{Orchestrator, OrchestratorError, ROTATION_LABEL};

struct MockState {
    /// label -> instances currently "running" in the cluster.
    generations: HashMap<String, Vec<Instance>>,

    /// Where the traffic-target resource currently points.
    traffic_target: Option<GenerationLabel>,

    /// Labels deleted so far, in order.
    deleted: Vec<GenerationLabel>,

    /// Third octet for the next generation's addresses.
    next_subnet: u8,

    /// If set, only this many instances come up per generation.
    ready_replicas: Option<u32>,
}

/// In-memory orchestrator double.
pub struct MockOrchestrator {
    state: Mutex<MockState>,
    fail_cutover: AtomicBool,
    fail_create: AtomicBool,
    fail_delete: AtomicBool,
    cutover_delay: Mutex<Duration>,
    cutover_calls: AtomicU64,
    list_calls: AtomicU64,
}

impl MockOrchestrator {
    /// Create an empty mock cluster.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                generations: HashMap::new(),
                traffic_target: None,
                deleted: Vec::new(),
                next_subnet: 1,
                ready_replicas: None,
            }),
            fail_cutover: AtomicBool::new(false),
            fail_create: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            cutover_delay: Mutex::new(Duration::ZERO),
            cutover_calls: AtomicU64::new(0),
            list_calls: AtomicU64::new(0),
        }
    }

    /// Make traffic-target updates fail until cleared.
    pub fn set_fail_cutover(&self, fail: bool) {
        self.fail_cutover.store(fail, Ordering::SeqCst);
    }

    /// Make generation creation fail until cleared.
    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Make generation deletion fail until cleared.
    pub fn set_fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    /// Delay every traffic-target update by `delay`.
    pub fn set_cutover_delay(&self, delay: Duration) {
        *self.cutover_delay.lock().unwrap() = delay;
    }

    /// Cap how many instances come up per created generation.
    pub fn set_ready_replicas(&self, limit: Option<u32>) {
        self.state.lock().unwrap().ready_replicas = limit;
    }

    /// Current traffic target, if any cutover has happened.
    pub fn traffic_target(&self) -> Option<GenerationLabel> {
        self.state.lock().unwrap().traffic_target.clone()
    }

    /// Labels deleted so far, in deletion order.
    pub fn deleted_labels(&self) -> Vec<GenerationLabel> {
        self.state.lock().unwrap().deleted.clone()
    }

    /// Number of traffic-target updates attempted.
    pub fn cutover_calls(&self) -> u64 {
        self.cutover_calls.load(Ordering::SeqCst)
    }

    /// Number of list calls served.
    pub fn list_calls(&self) -> u64 {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Seed a generation with specific instances (e.g. real listener
    /// addresses in proxy tests).
    pub fn seed_instances(&self, label: &GenerationLabel, instances: Vec<Instance>) {
        let mut state = self.state.lock().unwrap();
        state.generations.insert(label.as_str().to_string(), instances);
    }

    /// Seed a generation directly, bypassing create/poll.
    pub fn seed_generation(&self, label: &GenerationLabel, count: u32) {
        let mut state = self.state.lock().unwrap();
        let instances = Self::make_instances(label, count, state.next_subnet);
        state.next_subnet = state.next_subnet.wrapping_add(1).max(1);
        state.generations.insert(label.as_str().to_string(), instances);
    }

    fn make_instances(label: &GenerationLabel, count: u32, subnet: u8) -> Vec<Instance> {
        (0..count)
            .map(|i| {
                let address = format!("10.0.{}.{}:8080", subnet, i + 1).parse().unwrap();
                Instance::new(format!("pod-{label}-{i}"), address, label.clone())
            })
            .collect()
    }
}

impl Default for MockOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Orchestrator for MockOrchestrator {
    async fn list_instances(
        &self,
        label_selector: &str,
    ) -> Result<Vec<Instance>, OrchestratorError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();

        // A generation-scoped selector returns just that cohort; anything
        // else is treated as the service-wide selector.
        let prefix = format!("{ROTATION_LABEL}=");
        let instances = match label_selector.strip_prefix(prefix.as_str()) {
            Some(label) => state.generations.get(label).cloned().unwrap_or_default(),
            None => state.generations.values().flatten().cloned().collect(),
        };

        debug!(selector = %label_selector, count = instances.len(), "[MOCK] Listed instances");
        Ok(instances)
    }

    async fn create_generation(
        &self,
        label: &GenerationLabel,
        replicas: u32,
    ) -> Result<(), OrchestratorError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Api {
                status: 500,
                body: "mock create failure".to_string(),
            });
        }

        let mut state = self.state.lock().unwrap();
        let count = state.ready_replicas.map_or(replicas, |cap| cap.min(replicas));
        let instances = Self::make_instances(label, count, state.next_subnet);
        state.next_subnet = state.next_subnet.wrapping_add(1).max(1);
        state.generations.insert(label.as_str().to_string(), instances);

        debug!(label = %label, replicas, ready = count, "[MOCK] Created generation");
        Ok(())
    }

    async fn delete_generation(&self, label: &GenerationLabel) -> Result<(), OrchestratorError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Api {
                status: 500,
                body: "mock delete failure".to_string(),
            });
        }

        let mut state = self.state.lock().unwrap();
        if state.generations.remove(label.as_str()).is_none() {
            return Err(OrchestratorError::NotFound(label.to_string()));
        }
        state.deleted.push(label.clone());

        debug!(label = %label, "[MOCK] Deleted generation");
        Ok(())
    }

    async fn update_traffic_target(
        &self,
        label: &GenerationLabel,
    ) -> Result<(), OrchestratorError> {
        self.cutover_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.cutover_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.fail_cutover.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Api {
                status: 500,
                body: "mock cutover failure".to_string(),
            });
        }

        self.state.lock().unwrap().traffic_target = Some(label.clone());
        debug!(label = %label, "[MOCK] Updated traffic target");
        Ok(())
    }
}
