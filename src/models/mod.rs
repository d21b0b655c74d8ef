//! Data Models
//!
//! Serializable domain types shared by storage, services and the CLI.

pub mod analysis;
pub mod finding;
pub mod history;
pub mod investigation;
pub mod settings;

pub use analysis::*;
pub use finding::*;
pub use history::*;
pub use investigation::*;
pub use settings::*;
