//! Configuration error types following panic-free policy.

use thiserror::Error;

/// Errors raised when reading settings out of an [`crate::ExtensionConfig`].
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    /// A setting the extension requires is absent
    #[error("missing setting: {key}")]
    MissingSetting { key: String },

    /// A setting is present but cannot be interpreted
    #[error("invalid setting {key}: {reason}")]
    InvalidSetting { key: String, reason: String },
}

impl ConfigError {
    /// Shorthand for a missing-setting error.
    pub fn missing(key: &str) -> Self {
        Self::MissingSetting {
            key: key.to_string(),
        }
    }

    /// Shorthand for an invalid-setting error.
    pub fn invalid(key: &str, reason: &str) -> Self {
        Self::InvalidSetting {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
