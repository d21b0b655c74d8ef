//! JSON Configuration Management
//!
//! Handles reading and writing the application configuration file.

use std::fs;
use std::path::{Path, PathBuf};

use crate::models::settings::AppConfig;
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::{app_dir, config_path, ensure_dir};

/// Configuration service for managing app settings
#[derive(Debug)]
pub struct ConfigService {
    config_path: PathBuf,
    config: AppConfig,
}

impl ConfigService {
    /// Load `~/.k8s-rca/config.json`, writing defaults when it does not exist
    pub fn new() -> AppResult<Self> {
        Self::open(config_path()?)
    }

    /// Load the config at `path`, writing defaults when it does not exist
    pub fn open(path: impl Into<PathBuf>) -> AppResult<Self> {
        let config_path = path.into();
        if let Some(parent) = config_path.parent() {
            ensure_dir(parent)?;
        }

        let config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            let default_config = AppConfig::default();
            Self::save_to_file(&config_path, &default_config)?;
            default_config
        };

        Ok(Self {
            config_path,
            config,
        })
    }

    fn load_from_file(path: &Path) -> AppResult<AppConfig> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| AppError::config(format!("{}: {}", path.display(), e)))?;
        config.validate().map_err(AppError::validation)?;
        Ok(config)
    }

    fn save_to_file(path: &Path, config: &AppConfig) -> AppResult<()> {
        config.validate().map_err(AppError::validation)?;
        let content = serde_json::to_string_pretty(config)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Data directory from the config, or `~/.k8s-rca/data`
    pub fn data_dir(&self) -> AppResult<PathBuf> {
        match &self.config.storage.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(app_dir()?.join("data")),
        }
    }

    /// Replace the configuration and persist it
    pub fn set_config(&mut self, config: AppConfig) -> AppResult<()> {
        Self::save_to_file(&self.config_path, &config)?;
        self.config = config;
        Ok(())
    }
}
