//! Error types for otactl

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Flash image not found: {0} (run `otactl init` first)")]
    ImageNotFound(String),

    #[error("Flash image already exists: {0} (use --force to replace it)")]
    AlreadyExists(String),

    #[error("Invalid key file {path}: {reason}")]
    InvalidKey { path: String, reason: String },

    #[error("Update failed: {0}")]
    UpdateFailed(haa_ota_errors::OtaError),

    #[error("Update not started: {0}")]
    NotStarted(String),

    #[error(transparent)]
    Ota(#[from] haa_ota_errors::OtaError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] haa_ota_errors::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::ImageNotFound(_) => 2,
            CliError::AlreadyExists(_)
            | CliError::InvalidKey { .. }
            | CliError::Config(_)
            | CliError::Json(_) => 4,
            CliError::NotStarted(_) => 5,
            CliError::UpdateFailed(e) | CliError::Ota(e) => match e.category() {
                haa_ota_errors::ErrorCategory::Verification => 6,
                _ => 3,
            },
            CliError::Io(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haa_ota_errors::{NetworkError, VerificationError};

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::ImageNotFound("x".into()).exit_code(), 2);
        assert_eq!(
            CliError::UpdateFailed(VerificationError::DigestMismatch.into()).exit_code(),
            6
        );
        assert_eq!(
            CliError::UpdateFailed(NetworkError::RedirectLimit { max_hops: 10 }.into())
                .exit_code(),
            3
        );
    }
}
