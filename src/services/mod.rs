//! Services
//!
//! Business logic: cluster access, the analyzers and their coordinator, the
//! investigation engine and session state machine, and the assistant.
//! Services are wired together by [`crate::state::AppState`].

pub mod agents;
pub mod assistant;
pub mod cluster;
pub mod coordinator;
pub mod investigation;

pub use agents::{AgentKind, AgentReport};
pub use assistant::Assistant;
pub use cluster::{ClusterClient, ClusterError, KubectlClient};
pub use coordinator::{AnalysisSelection, CoordinatedAnalysis, Coordinator};
pub use investigation::{EngineOptions, InvestigationSession, RcaEngine};
