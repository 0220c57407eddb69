//! Engine configuration.
//!
//! Loaded from JSON; every section has defaults matching the stock HAA
//! repository and the standard 1 MiB flash layout, so an empty document is a
//! valid configuration.

use std::path::Path;
use std::time::Duration;

use haa_ota_errors::ConfigError;
use serde::{Deserialize, Serialize};

use crate::boot::CommitMode;
use crate::http::Location;

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OtaConfig {
    /// Where firmware is published
    pub repository: RepositoryConfig,
    /// File names within the repository
    pub artifacts: ArtifactNames,
    /// Network limits and retry counts
    pub fetch: FetchPolicy,
    /// Backoff after failed sessions and the regular check interval
    pub holdoff: HoldoffPolicy,
    /// How a verified image is committed
    pub boot: BootPolicy,
    /// Flash layout
    pub regions: RegionMap,
}

impl OtaConfig {
    /// Parse a JSON document and validate it.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed JSON, otherwise whatever
    /// [`OtaConfig::validate`] reports.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON file.
    ///
    /// # Errors
    ///
    /// As [`OtaConfig::from_json`], plus [`ConfigError::Parse`] when the file
    /// cannot be read.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    /// Check every section.
    ///
    /// # Errors
    ///
    /// The first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.repository.location_of(&self.artifacts.version_file)?;
        self.fetch.validate()?;
        self.holdoff.validate()?;
        self.regions.validate()?;
        if self.artifacts.image_file.is_empty() || self.artifacts.version_file.is_empty() {
            return Err(ConfigError::invalid_value("artifacts", "file names must not be empty"));
        }
        Ok(())
    }
}

/// Repository holding version, image and signature files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// `host[/base/path]`, without scheme
    pub url: String,
    /// TCP port
    pub port: u16,
    /// Whether to use TLS
    pub tls: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            url: "github.com/RavenSystem/haa/releases/latest/download".to_string(),
            port: 443,
            tls: true,
        }
    }
}

impl RepositoryConfig {
    /// Location of `file` inside the repository.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidRepository`] when the URL has no host.
    pub fn location_of(&self, file: &str) -> Result<Location, ConfigError> {
        Location::in_repository(&self.url, self.port, self.tls, file)
    }
}

/// Artifact names inside the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactNames {
    /// Text file holding the latest version
    pub version_file: String,
    /// Firmware image
    pub image_file: String,
    /// Appended to the image name to form the signature file name
    pub signature_suffix: String,
}

impl Default for ArtifactNames {
    fn default() -> Self {
        Self {
            version_file: "haaversion".to_string(),
            image_file: "haamain.bin".to_string(),
            signature_suffix: ".sec".to_string(),
        }
    }
}

impl ArtifactNames {
    /// Name of the detached signature file.
    pub fn signature_file(&self) -> String {
        format!("{}{}", self.image_file, self.signature_suffix)
    }
}

/// Network limits and local retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchPolicy {
    /// Redirects followed before giving up
    pub max_redirects: u8,
    /// Timeout for establishing a connection
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Timeout for each receive
    #[serde(with = "duration_ms")]
    pub read_timeout: Duration,
    /// Attempts for the version and signature files
    pub small_file_attempts: u32,
    /// Attempts for the image, each resuming from the last written byte
    pub image_attempts: u32,
    /// Pause between attempts
    #[serde(with = "duration_ms")]
    pub retry_delay: Duration,
    /// Receive buffer size
    pub recv_buffer_len: usize,
    /// Largest accepted response head
    pub header_buffer_len: usize,
    /// Largest accepted version file
    pub max_version_len: usize,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_redirects: 10,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
            small_file_attempts: 3,
            image_attempts: 5,
            retry_delay: Duration::from_secs(2),
            recv_buffer_len: 1024,
            header_buffer_len: 8000,
            max_version_len: 16,
        }
    }
}

impl FetchPolicy {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_redirects == 0 {
            return Err(ConfigError::invalid_value("max_redirects", "must be at least 1"));
        }
        if self.small_file_attempts == 0 || self.image_attempts == 0 {
            return Err(ConfigError::invalid_value("attempts", "must be at least 1"));
        }
        if self.connect_timeout.is_zero() || self.read_timeout.is_zero() {
            return Err(ConfigError::invalid_value("timeouts", "must be non-zero"));
        }
        if self.recv_buffer_len < 64 {
            return Err(ConfigError::invalid_value("recv_buffer_len", "must be at least 64"));
        }
        if self.header_buffer_len < self.recv_buffer_len {
            return Err(ConfigError::invalid_value(
                "header_buffer_len",
                "must not be smaller than recv_buffer_len",
            ));
        }
        Ok(())
    }
}

/// Backoff after failed sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HoldoffPolicy {
    /// Delay after the first failure
    #[serde(with = "duration_secs")]
    pub initial: Duration,
    /// Growth per consecutive failure, in percent
    pub growth_percent: u32,
    /// Upper bound for the delay
    #[serde(with = "duration_secs")]
    pub max: Duration,
    /// Interval between checks after success or an up-to-date answer
    #[serde(with = "duration_secs")]
    pub check_interval: Duration,
}

impl Default for HoldoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(30),
            growth_percent: 150,
            max: Duration::from_secs(7 * 24 * 60 * 60),
            check_interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl HoldoffPolicy {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.growth_percent < 100 {
            return Err(ConfigError::invalid_value("growth_percent", "must be at least 100"));
        }
        if self.initial.is_zero() || self.initial > self.max {
            return Err(ConfigError::invalid_value(
                "holdoff",
                "initial delay must be non-zero and not above max",
            ));
        }
        Ok(())
    }
}

/// How verified images are committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BootPolicy {
    /// Permanent switch or try-once boot
    pub commit_mode: CommitMode,
}

/// A contiguous, sector-aligned flash area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// First byte
    pub start: u32,
    /// Length in bytes
    pub len: u32,
}

impl Region {
    /// Create a region.
    pub const fn new(start: u32, len: u32) -> Self {
        Self { start, len }
    }

    /// One past the last byte, saturating.
    pub fn end(&self) -> u32 {
        self.start.saturating_add(self.len)
    }

    /// Whether `[addr, addr + len)` lies inside the region.
    pub fn contains(&self, addr: u32, len: usize) -> bool {
        let Ok(len) = u32::try_from(len) else {
            return false;
        };
        addr >= self.start && addr.checked_add(len).is_some_and(|end| end <= self.end())
    }

    fn overlaps(&self, other: &Region) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

/// Physical flash layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionMap {
    /// Erase granularity
    pub sector_size: u32,
    /// Device size
    pub capacity: u32,
    /// The two image slots
    pub slots: [Region; 2],
    /// The two public key sectors
    pub key_sectors: [u32; 2],
    /// The two system parameter sectors
    pub param_sectors: [u32; 2],
}

impl Default for RegionMap {
    fn default() -> Self {
        Self {
            sector_size: 4096,
            capacity: 0x10_0000,
            slots: [Region::new(0x2000, 0x8_B000), Region::new(0x8_D000, 0x6_4000)],
            key_sectors: [0xF_1000, 0xF_2000],
            param_sectors: [0xF_3000, 0xF_4000],
        }
    }
}

impl RegionMap {
    /// Single-sector region starting at `addr`.
    pub fn sector(&self, addr: u32) -> Region {
        Region::new(addr, self.sector_size)
    }

    /// Every region the map names, labelled.
    pub fn labelled(&self) -> [(&'static str, Region); 6] {
        [
            ("slot0", self.slots[0]),
            ("slot1", self.slots[1]),
            ("key0", self.sector(self.key_sectors[0])),
            ("key1", self.sector(self.key_sectors[1])),
            ("params0", self.sector(self.param_sectors[0])),
            ("params1", self.sector(self.param_sectors[1])),
        ]
    }

    /// Check alignment, capacity and overlap.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidRegionMap`] naming the first offending region.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sector_size == 0 || !self.sector_size.is_power_of_two() {
            return Err(ConfigError::InvalidRegionMap(format!(
                "sector size {} is not a power of two",
                self.sector_size
            )));
        }

        let regions = self.labelled();
        for (name, region) in &regions {
            if region.len == 0 {
                return Err(ConfigError::InvalidRegionMap(format!("{name} is empty")));
            }
            if !region.start.is_multiple_of(self.sector_size)
                || !region.len.is_multiple_of(self.sector_size)
            {
                return Err(ConfigError::InvalidRegionMap(format!(
                    "{name} [{:#x}, {:#x}) is not sector aligned",
                    region.start,
                    region.end()
                )));
            }
            if region.start.checked_add(region.len).is_none_or(|end| end > self.capacity) {
                return Err(ConfigError::InvalidRegionMap(format!(
                    "{name} [{:#x}, {:#x}) exceeds capacity {:#x}",
                    region.start,
                    region.end(),
                    self.capacity
                )));
            }
        }

        for (i, (name, region)) in regions.iter().enumerate() {
            for (other_name, other) in regions.iter().skip(i.saturating_add(1)) {
                if region.overlaps(other) {
                    return Err(ConfigError::InvalidRegionMap(format!(
                        "{name} overlaps {other_name}"
                    )));
                }
            }
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
