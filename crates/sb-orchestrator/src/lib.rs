//! Epic orchestration on top of GitHub: status reconciliation, readiness,
//! agent matching and artifact-based completion detection.

pub mod completion;
pub mod manager;
pub mod matcher;
pub mod observer;
pub mod readiness;
pub mod reconciler;
pub mod sync;

pub use manager::{EpicDefinition, EpicError, EpicManager, TaskDefinition};
pub use matcher::{rank_agents, score_agent};
pub use reconciler::{ReconcileError, ReconciliationResult, TransitionRequest};
