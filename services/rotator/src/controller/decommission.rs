//! One-shot decommission timers for demoted generations.
//!
//! Each demoted generation gets one spawned task that sleeps out the
//! grace period and then deletes the generation's cluster resources.
//! Deletion failures are logged and never retried; the pending entry is
//! dropped regardless of outcome. This fire-and-forget cleanup is an
//! accepted resource-leak risk, kept deliberately (see DESIGN.md).

use std::sync::Arc;

use mtd_pool::{GenerationLabel, PendingDecommission};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info};

use super::RotationController;
use crate::orchestrator::Orchestrator;

/// A demoted generation awaiting deletion, with its timer task.
pub(crate) struct PendingEntry {
    pub(crate) label: GenerationLabel,
    #[allow(dead_code)]
    pub(crate) fire_at: Instant,
    pub(crate) task: JoinHandle<()>,
}

impl<O: Orchestrator + 'static> RotationController<O> {
    /// Schedule deletion of a demoted generation after the grace period.
    ///
    /// Called only from the rotation cycle, strictly after the label has
    /// stopped being active, so a decommission never races its own
    /// generation's promotion.
    pub(crate) fn schedule_decommission(self: &Arc<Self>, label: GenerationLabel) {
        let pending = PendingDecommission::schedule(
            label.clone(),
            std::time::Instant::now(),
            self.grace_period,
        );
        let fire_at = Instant::from_std(pending.fire_at);

        info!(
            label = %label,
            grace_secs = self.grace_period.as_secs_f64(),
            "Scheduled generation for decommission"
        );

        // Hold the pending lock across the spawn so a zero-grace timer
        // cannot observe the list before its own entry is in it.
        let mut entries = self.pending.lock().unwrap();
        let this = Arc::clone(self);
        let task_label = label.clone();
        let task = tokio::spawn(async move {
            this.run_decommission(task_label, fire_at).await;
        });
        entries.push(PendingEntry {
            label,
            fire_at,
            task,
        });
    }

    async fn run_decommission(self: Arc<Self>, label: GenerationLabel, fire_at: Instant) {
        tokio::time::sleep_until(fire_at).await;

        match self.orchestrator.delete_generation(&label).await {
            Ok(()) => info!(label = %label, "Decommissioned generation"),
            Err(e) if e.is_not_found() => {
                info!(label = %label, "Generation already absent, dropping entry");
            }
            Err(e) => {
                // No retry: the entry is dropped and the resources leak
                // until an operator cleans them up.
                error!(label = %label, error = %e, "Decommission failed, dropping entry");
            }
        }

        self.pending.lock().unwrap().retain(|e| e.label != label);
    }
}
