//! Periodic rotation trigger.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mtd_pool::GenerationLabel;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use super::{RotationController, RotationOutcome};
use crate::orchestrator::Orchestrator;

/// Side effects to run after a successful promotion (DNS update, decoy
/// rotation). Failures are the hook's own problem; the rotation loop
/// never depends on them.
#[async_trait]
pub trait RotationHook: Send + Sync {
    async fn on_promoted(&self, label: &GenerationLabel, first_address: Option<SocketAddr>);
}

/// Run the fixed-interval rotation loop until shutdown.
///
/// One cycle at a time: a tick that fires while a cycle is executing is
/// skipped, not queued (the controller's cycle lock enforces this even
/// for out-of-band triggers). Errors from one cycle never prevent
/// future ticks. Shutdown stops the loop without waiting for an
/// in-flight cycle: the cycle future is dropped mid-call, abandoning
/// any outstanding orchestrator request, and the pending decommission
/// timers are cancelled.
pub async fn run_rotation_loop<O: Orchestrator + 'static>(
    controller: Arc<RotationController<O>>,
    interval: Duration,
    hook: Option<Arc<dyn RotationHook>>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        interval_secs = interval.as_secs_f64(),
        "Starting rotation loop"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The pool was just bootstrapped; the first rotation waits a full
    // interval.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Shutdown must not block behind a slow cutover, so the
                // cycle itself races the shutdown signal and is dropped
                // mid-call if the signal wins.
                tokio::select! {
                    _ = run_cycle(&controller, hook.as_deref()) => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("Rotation loop shutting down, abandoning in-flight cycle");
                            break;
                        }
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Rotation loop shutting down");
                    break;
                }
            }
        }
    }

    controller.shutdown();
}

async fn run_cycle<O: Orchestrator + 'static>(
    controller: &Arc<RotationController<O>>,
    hook: Option<&dyn RotationHook>,
) {
    match controller.rotate().await {
        Ok(RotationOutcome::Rotated { label, first_address }) => {
            if let Some(hook) = hook {
                hook.on_promoted(&label, first_address).await;
            }
        }
        Ok(RotationOutcome::NothingStaged) => {
            // A previous replenish failed; try again so the next tick
            // has something to promote.
            controller.ensure_staging();
        }
        Ok(RotationOutcome::Skipped) => {}
        Err(e) => {
            error!(error = %e, "Rotation cycle failed, will retry on next tick");
        }
    }
}
