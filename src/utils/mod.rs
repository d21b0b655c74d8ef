//! Utilities
//!
//! Errors and filesystem locations shared across the crate.

pub mod error;
pub mod paths;

pub use error::*;
pub use paths::*;
