//! Path Utilities
//!
//! Resolves the application data directory (~/.k8s-rca/) and the files in it.

use std::path::{Path, PathBuf};

use crate::utils::error::{AppError, AppResult};

/// Get the user's home directory
pub fn home_dir() -> AppResult<PathBuf> {
    dirs::home_dir().ok_or_else(|| AppError::config("Could not determine home directory"))
}

/// Get the application directory (~/.k8s-rca/)
pub fn app_dir() -> AppResult<PathBuf> {
    Ok(home_dir()?.join(".k8s-rca"))
}

/// Get the default config file path (~/.k8s-rca/config.json)
pub fn config_path() -> AppResult<PathBuf> {
    Ok(app_dir()?.join("config.json"))
}

/// Investigation database inside a data directory
pub fn database_path(data_dir: &Path) -> PathBuf {
    data_dir.join("investigations.db")
}

/// Evidence audit trail directory inside a data directory
pub fn evidence_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("evidence")
}

/// Prompt log file inside a data directory
pub fn prompt_log_path(data_dir: &Path) -> PathBuf {
    data_dir.join("prompts.jsonl")
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> AppResult<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
