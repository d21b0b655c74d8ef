//! Integration Tests Module
//!
//! End-to-end tests against a scripted model provider and an in-memory
//! cluster. No test needs a real cluster or API key.

// Scripted model provider and fake cluster
mod support;

// Investigation state machine, finding to report
mod session_test;

// Engine fallbacks, timeouts and evidence gathering
mod engine_test;

// Analyzer coordination and storing analysis results
mod coordinator_test;

// File-backed store and application state
mod store_test;

// Conversational assistant and suggestions
mod assistant_test;
