//! k8s-rca - hypothesis-driven root cause analysis for Kubernetes
//!
//! The library behind the `k8s-rca` CLI:
//! - read-only cluster access and the analyzers that turn cluster state into findings
//! - the investigation engine (hypotheses, plans, evidence analysis, reports)
//! - the interactive session state machine and the assistant
//! - storage (SQLite investigations, JSON config, evidence and prompt logs)

pub mod models;
pub mod services;
pub mod state;
pub mod storage;
pub mod utils;

pub use models::settings::AppConfig;
pub use state::{AppState, HealthReport};
pub use utils::error::{AppError, AppResult};
