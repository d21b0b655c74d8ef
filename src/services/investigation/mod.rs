//! Interactive Investigation
//!
//! The hypothesis-driven root cause workflow: the model-backed engine and the
//! persisted state machine that drives it.

pub mod engine;
pub mod prompts;
pub mod session;

pub use engine::{EngineOptions, RcaEngine};
pub use session::{
    ComponentGroup, ConclusionView, InvestigationSession, InvestigationView, TransitionOutcome,
};
