//! Configuration management
//!
//! Configuration is loaded hierarchically:
//! 1. Default values (in code)
//! 2. A TOML config file (`artificien.toml` in the working directory, or an explicit path)
//! 3. Environment variables (prefix: ARTIFICIEN__)

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::background::{ProcessingTaskRequest, DEFAULT_TASK_IDENTIFIER};
use crate::error::ArtificienError;
use crate::gateway::{DEFAULT_STEP_WINDOW_DAYS, MAX_STEP_WINDOW_DAYS};

/// Default config file name, looked up without extension
pub const DEFAULT_CONFIG_NAME: &str = "artificien";

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub background: BackgroundConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

/// Federated learning coordinator
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub url: Option<String>,
    pub auth_token: Option<String>,
    pub model_name: String,
    pub model_version: String,
    pub request_timeout_secs: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            url: None,
            auth_token: None,
            model_name: "perceptron".to_string(),
            model_version: "1.0".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl fmt::Debug for CoordinatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorConfig")
            .field("url", &self.url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("model_name", &self.model_name)
            .field("model_version", &self.model_version)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl CoordinatorConfig {
    /// Coordinator url and auth token, both required for training
    pub fn credentials(&self) -> Result<(&str, &str), ArtificienError> {
        let url = self.url.as_deref().filter(|u| !u.is_empty()).ok_or_else(|| {
            ArtificienError::ConfigError("coordinator.url is not set".to_string())
        })?;
        let token = self
            .auth_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ArtificienError::ConfigError("coordinator.auth_token is not set".to_string())
            })?;
        Ok((url, token))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Background task registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    pub task_identifier: String,
    pub requires_external_power: bool,
    pub requires_network_connectivity: bool,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            task_identifier: DEFAULT_TASK_IDENTIFIER.to_string(),
            requires_external_power: true,
            requires_network_connectivity: true,
        }
    }
}

impl BackgroundConfig {
    pub fn task_request(&self) -> ProcessingTaskRequest {
        ProcessingTaskRequest {
            identifier: self.task_identifier.clone(),
            requires_external_power: self.requires_external_power,
            requires_network_connectivity: self.requires_network_connectivity,
        }
    }
}

/// Local persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub preferences_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            preferences_path: PathBuf::from("artificien-preferences.json"),
        }
    }
}

/// Health metric loading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub step_window_days: i64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            step_window_days: DEFAULT_STEP_WINDOW_DAYS,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, a config file and the environment.
    ///
    /// An explicit `path` must exist. Without one, `artificien.toml` in the
    /// working directory is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self, ArtificienError> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };

        let config = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(file)
            // e.g. ARTIFICIEN__COORDINATOR__URL sets coordinator.url
            .add_source(config::Environment::with_prefix("ARTIFICIEN").separator("__"))
            .build()?;

        let loaded: AppConfig = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    fn validate(&self) -> Result<(), ArtificienError> {
        if !(1..=MAX_STEP_WINDOW_DAYS).contains(&self.health.step_window_days) {
            return Err(ArtificienError::ConfigError(format!(
                "health.step_window_days must be between 1 and {MAX_STEP_WINDOW_DAYS}, got {}",
                self.health.step_window_days
            )));
        }
        if self.coordinator.request_timeout_secs == 0 {
            return Err(ArtificienError::ConfigError(
                "coordinator.request_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
