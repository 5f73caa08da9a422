//! Topology reconciliation and recovery for leader/follower Redis clusters
//! running on an orchestration platform.

pub mod cluster;
pub mod config;
pub mod error;
pub mod observability;
pub mod platform;
pub mod rediscli;
pub mod wait;

pub use cluster::{ClusterOperator, ClusterReconciler, ClusterView, ReconcileOutcome};
pub use config::OperatorConfig;
pub use error::{CommandErrorKind, OperatorError, Result};
