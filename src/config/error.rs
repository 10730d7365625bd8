//! Configuration Error Types

use thiserror::Error;

/// Configuration-related errors with detailed context
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// A source could not be read or merged (file syntax, env parsing)
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    /// The merged configuration could not be mapped onto `ResilienceConfig`
    #[error("Failed to deserialize configuration: {0}")]
    DeserializeError(String),

    /// Invalid configuration value
    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },
}

impl ConfigurationError {
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl ToString,
        context: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.to_string(),
            context: context.into(),
        }
    }
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(error: config::ConfigError) -> Self {
        ConfigurationError::LoadError(error.to_string())
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;
