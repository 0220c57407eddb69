//! Configuration and input validation errors.

/// Invalid configuration or persisted input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Version text is not `major.minor.patch` or is too long
    #[error("malformed version '{value}': {reason}")]
    MalformedVersion {
        /// Offending text
        value: String,
        /// Why it was rejected
        reason: String,
    },

    /// Repository string cannot be split into host and path
    #[error("invalid repository '{0}'")]
    InvalidRepository(String),

    /// Region map fails alignment, overlap or capacity checks
    #[error("invalid region map: {0}")]
    InvalidRegionMap(String),

    /// Configuration document could not be parsed
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    /// A setting is outside its permitted range
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue {
        /// Setting name
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

impl ConfigError {
    /// Create a malformed version error.
    pub fn malformed_version(value: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::MalformedVersion {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid value error.
    pub fn invalid_value(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}
