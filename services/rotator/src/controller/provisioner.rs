//! Instance provisioner: builds one generation of instances.

use std::sync::Mutex;
use std::time::Duration;

use mtd_pool::{Generation, Instance, LabelAllocator};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::orchestrator::{Orchestrator, OrchestratorError, ROTATION_LABEL};

/// Fixed readiness poll interval.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Provision a new generation and wait for it to come up.
///
/// Issues exactly one creation request under a fresh label, then polls
/// until `replicas` instances are running with an address or the
/// `timeout` budget is exhausted. Exhausting the budget is a **partial
/// success**: whatever subset is ready is returned and the caller
/// decides whether to promote it. Only a failed creation request is an
/// error; it surfaces to the caller, who retries on a later tick.
pub async fn provision_generation<O: Orchestrator>(
    orchestrator: &O,
    allocator: &Mutex<LabelAllocator>,
    replicas: u32,
    timeout: Duration,
) -> Result<Generation, OrchestratorError> {
    let label = allocator.lock().unwrap().next();
    info!(label = %label, replicas, "Provisioning generation");

    orchestrator.create_generation(&label, replicas).await?;

    let selector = format!("{ROTATION_LABEL}={label}");
    let deadline = Instant::now() + timeout;
    let mut ready: Vec<Instance> = Vec::new();

    loop {
        match orchestrator.list_instances(&selector).await {
            Ok(instances) => {
                ready = instances;
                debug!(label = %label, ready = ready.len(), "Readiness poll");
                if ready.len() as u32 >= replicas {
                    break;
                }
            }
            // A single failed poll is not fatal while budget remains.
            Err(e) => warn!(label = %label, error = %e, "Readiness poll failed"),
        }

        if Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    if (ready.len() as u32) < replicas {
        warn!(
            label = %label,
            ready = ready.len(),
            desired = replicas,
            "Poll budget exhausted with a partial generation"
        );
    }

    Ok(Generation::new(label, ready))
}
