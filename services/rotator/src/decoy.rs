//! Decoy instance rotation.
//!
//! Decoys are throwaway pods carrying the current generation label,
//! created to muddy an attacker's reconnaissance of the real pool. The
//! deception strategy itself is out of scope here; this module only
//! rotates the decoys alongside the real generations. One-shot side
//! effects, best-effort: failures are logged and swallowed.

use mtd_pool::GenerationLabel;
use tracing::{info, warn};

use crate::orchestrator::KubeOrchestrator;

/// Replace the existing decoys with `count` fresh ones under `label`.
pub async fn rotate_decoys(kube: &KubeOrchestrator, count: u32, label: &GenerationLabel) {
    if count == 0 {
        return;
    }

    if let Err(e) = kube.delete_decoys().await {
        warn!(error = %e, "Failed to delete old decoy pods");
    }

    match kube.create_decoys(count, label).await {
        Ok(()) => info!(count, label = %label, "Rotated decoy pods"),
        Err(e) => warn!(error = %e, label = %label, "Failed to create decoy pods"),
    }
}
