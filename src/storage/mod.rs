//! Storage Layer
//!
//! Handles all data persistence: the SQLite investigation store, JSON config,
//! and the file-based audit trails (evidence files and the prompt log).

pub mod config;
pub mod database;
pub mod evidence_log;
pub mod investigations;
pub mod prompt_log;

pub use config::*;
pub use database::*;
pub use evidence_log::*;
pub use investigations::*;
pub use prompt_log::*;
