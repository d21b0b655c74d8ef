//! k8s-rca Core
//!
//! Foundations shared by every crate in the workspace. Nothing in here knows
//! about Kubernetes, LLM providers or storage.
//!
//! ## Module Organization
//!
//! - `error` - Core error types (`CoreError`, `CoreResult`)
//! - `json` - Lenient JSON extraction from model output and the parse-or-fallback helper
//! - `text` - Truncation and filename-safe sanitizing

pub mod error;
pub mod json;
pub mod text;

pub use error::{CoreError, CoreResult};
pub use json::{extract_json, extract_json_object, parse_object_or_else, parse_or_else};
pub use text::{sanitize_component, truncate_with_marker, truncate_within, TRUNCATION_MARKER};
