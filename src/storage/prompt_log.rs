//! Prompt Log
//!
//! Append-only JSONL record of every model interaction plus notable system
//! events. One line per record.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptLogKind {
    Interaction,
    SystemEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptLogRecord {
    pub timestamp: String,
    pub kind: PromptLogKind,
    pub purpose: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default)]
    pub metadata: Value,
}

/// JSONL writer shared by every engine clone
#[derive(Debug, Clone)]
pub struct PromptLogger {
    path: PathBuf,
    // Serializes appends from concurrent tasks
    lock: Arc<Mutex<()>>,
}

impl PromptLogger {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log_interaction(
        &self,
        purpose: &str,
        system_prompt: &str,
        user_prompt: &str,
        response: &str,
        metadata: Value,
    ) -> AppResult<()> {
        self.append(&PromptLogRecord {
            timestamp: Utc::now().to_rfc3339(),
            kind: PromptLogKind::Interaction,
            purpose: purpose.to_string(),
            system_prompt: Some(system_prompt.to_string()),
            user_prompt: Some(user_prompt.to_string()),
            response: Some(response.to_string()),
            metadata,
        })
    }

    pub fn log_system_event(&self, event: &str, metadata: Value) -> AppResult<()> {
        self.append(&PromptLogRecord {
            timestamp: Utc::now().to_rfc3339(),
            kind: PromptLogKind::SystemEvent,
            purpose: event.to_string(),
            system_prompt: None,
            user_prompt: None,
            response: None,
            metadata,
        })
    }

    /// Every record in the log, skipping lines that do not parse
    pub fn read_all(&self) -> AppResult<Vec<PromptLogRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }

    fn append(&self, record: &PromptLogRecord) -> AppResult<()> {
        let serialized = serde_json::to_string(record)?;
        let _guard = self
            .lock
            .lock()
            .map_err(|_| AppError::internal("Prompt log lock poisoned"))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{serialized}")?;
        Ok(())
    }
}
