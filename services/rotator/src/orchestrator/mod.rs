//! Cluster control-plane capability surface.
//!
//! The rotation controller depends only on this trait; the Kubernetes
//! binding lives in [`kube`] and a mock for tests in [`mock`]. Every
//! call returns a typed result so failure paths are enumerable rather
//! than silently absorbed.

use async_trait::async_trait;
use mtd_pool::{GenerationLabel, Instance};
use thiserror::Error;

mod kube;
mod mock;

pub use kube::{KubeOrchestrator, ROTATION_LABEL};
pub use mock::MockOrchestrator;

/// Errors from cluster control-plane calls.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The API rejected the request.
    #[error("api error {status}: {body}")]
    Api { status: u16, body: String },

    /// The named resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Transport-level failure reaching the control plane.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl OrchestratorError {
    /// True if the error is the resource simply being absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Capability surface over the cluster control plane.
///
/// Creation and deletion operate on whole generations; cutover repoints
/// the external traffic-target resource at a generation label.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// List running instances with an assigned address matching
    /// `label_selector`.
    ///
    /// Only instances belonging to a generation are returned; workloads
    /// without a rotation label (e.g. the template deployment's own
    /// pods) are not instances and must be excluded.
    async fn list_instances(
        &self,
        label_selector: &str,
    ) -> Result<Vec<Instance>, OrchestratorError>;

    /// Request creation of `replicas` instances tagged with `label`.
    ///
    /// Returns once the request is acknowledged; readiness is observed
    /// via [`Orchestrator::list_instances`].
    async fn create_generation(
        &self,
        label: &GenerationLabel,
        replicas: u32,
    ) -> Result<(), OrchestratorError>;

    /// Delete all workload resources belonging to `label`.
    async fn delete_generation(&self, label: &GenerationLabel) -> Result<(), OrchestratorError>;

    /// Repoint the external traffic target at `label`.
    async fn update_traffic_target(
        &self,
        label: &GenerationLabel,
    ) -> Result<(), OrchestratorError>;
}
