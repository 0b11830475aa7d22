//! Error types for Artificien

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while loading, staging or training on health data
#[derive(Debug, Error)]
pub enum ArtificienError {
    #[error("Health data is not available on this device")]
    PlatformUnavailable,

    #[error("Health data type is not available: {0}")]
    TypeUnavailable(String),

    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("No sample found: {0}")]
    SampleNotFound(String),

    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    #[error("Missing data for preprocessing: {0}")]
    PreprocessingDataMissing(String),

    #[error("Training execution fault: {0}")]
    TrainingExecutionFault(String),

    #[error("Job rejected by coordinator{}", retry_suffix(.retry_after))]
    JobRejected { retry_after: Option<Duration> },

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),
}

fn retry_suffix(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(", retry after {}s", d.as_secs()),
        None => String::new(),
    }
}

impl From<config::ConfigError> for ArtificienError {
    fn from(e: config::ConfigError) -> Self {
        ArtificienError::ConfigError(e.to_string())
    }
}

impl From<reqwest::Error> for ArtificienError {
    fn from(e: reqwest::Error) -> Self {
        ArtificienError::ConnectionFailure(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_message_includes_timeout() {
        let err = ArtificienError::JobRejected {
            retry_after: Some(Duration::from_secs(60)),
        };
        assert_eq!(
            err.to_string(),
            "Job rejected by coordinator, retry after 60s"
        );

        let err = ArtificienError::JobRejected { retry_after: None };
        assert_eq!(err.to_string(), "Job rejected by coordinator");
    }
}
