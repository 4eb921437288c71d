//! Orchestration core for agent-based simulation experiments: process
//! lifecycle for per-experiment servers and per-client drivers, durable
//! progress tracking, per-experiment store bindings, and incremental log
//! aggregation.

pub mod config;
pub mod error;
pub mod metrics;
pub mod offsets;
pub mod orchestrator;
pub mod registry;
pub mod tracker;

pub use config::OrchestratorConfig;
pub use error::CoreError;
pub use metrics::{LogMetricsAggregator, RefreshSummary};
pub use offsets::{LogKind, LogOffsetTracker, OffsetKey};
pub use orchestrator::{ClientProgress, ExperimentStatus, Orchestrator, ProgressHealth};
pub use registry::ExperimentRegistry;
pub use tracker::{ClientExecutionTracker, Progress};

#[cfg(test)]
pub(crate) mod test_support;
