//! MTD rotator: rotation controller and routing proxy.
//!
//! Keeps a pool of backend instances behind a stable entry point while
//! periodically replacing the whole pool's identity (addresses,
//! workload label) to shrink the reconnaissance window:
//!
//! - The **controller** owns the active/staging generations and drives
//!   the rotation cycle (provision, cutover, demote, replenish).
//! - The **proxy** forwards each inbound request to a randomly selected
//!   instance of the active generation.
//! - DNS updates and decoy pods are thin best-effort followups.

pub mod config;
pub mod controller;
pub mod decoy;
pub mod dns;
pub mod orchestrator;
pub mod proxy;

pub use config::Config;
pub use controller::{
    run_rotation_loop, RotateError, RotationController, RotationHook, RotationOutcome,
    SelectError,
};
pub use orchestrator::{KubeOrchestrator, MockOrchestrator, Orchestrator, OrchestratorError};
