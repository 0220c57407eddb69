//! Firmware version strings.

use std::fmt;
use std::str::FromStr;

use haa_ota_errors::ConfigError;
use serde::{Deserialize, Serialize};

/// Longest version string accepted or persisted.
pub const MAX_VERSION_LEN: usize = 16;

/// A `major.minor.patch` firmware version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FirmwareVersion(semver::Version);

impl FirmwareVersion {
    /// Parse version text as served by the repository or read from flash.
    ///
    /// Surrounding whitespace, line endings and NUL padding are stripped.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MalformedVersion`] when the text is empty, longer than
    /// [`MAX_VERSION_LEN`] or not a semantic version.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let trimmed = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
        if trimmed.is_empty() {
            return Err(ConfigError::malformed_version(text, "empty"));
        }
        if trimmed.len() > MAX_VERSION_LEN {
            return Err(ConfigError::malformed_version(
                trimmed,
                format!("longer than {MAX_VERSION_LEN} bytes"),
            ));
        }
        semver::Version::parse(trimmed)
            .map(Self)
            .map_err(|e| ConfigError::malformed_version(trimmed, e.to_string()))
    }

    /// Parse raw bytes, e.g. a downloaded version file.
    ///
    /// # Errors
    ///
    /// As [`FirmwareVersion::parse`], plus non-UTF-8 input.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        let text = std::str::from_utf8(bytes).map_err(|e| {
            ConfigError::malformed_version(String::from_utf8_lossy(bytes), e.to_string())
        })?;
        Self::parse(text)
    }

    /// Lowest possible version, used when nothing is installed.
    pub fn zero() -> Self {
        Self(semver::Version::new(0, 0, 0))
    }

    /// Whether this remote version should replace `installed`.
    ///
    /// Fields compare numerically. Pre-release versions are never offered
    /// and build metadata does not count.
    pub fn is_newer_than(&self, installed: &FirmwareVersion) -> bool {
        if !self.0.pre.is_empty() {
            return false;
        }
        let remote = (self.0.major, self.0.minor, self.0.patch);
        let local = (installed.0.major, installed.0.minor, installed.0.patch);
        remote > local || (remote == local && !installed.0.pre.is_empty())
    }

    /// The underlying semantic version.
    pub fn as_semver(&self) -> &semver::Version {
        &self.0
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FirmwareVersion {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FirmwareVersion {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FirmwareVersion> for String {
    fn from(value: FirmwareVersion) -> Self {
        value.to_string()
    }
}
