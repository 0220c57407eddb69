//! Command implementations for otactl

pub mod device;
pub mod key;
pub mod update;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Subcommand;
use haa_ota_update::{FlashStore, OtaConfig, VersionTrustStore};

use crate::error::CliError;
use crate::image::FileFlash;

#[derive(Subcommand, Debug)]
pub enum KeyCommands {
    /// Show the trusted keys
    Show,

    /// Install a new key signed by a currently trusted key
    Rotate {
        /// New public key (DER SubjectPublicKeyInfo or SEC1)
        key: PathBuf,
        /// Signature record over the key file
        #[arg(short, long)]
        signature: PathBuf,
    },
}

/// Settings shared by every command.
#[derive(Debug, Clone)]
pub struct Context {
    pub config: OtaConfig,
    pub image: PathBuf,
    pub json: bool,
}

impl Context {
    /// Open the existing flash image.
    pub async fn flash(&self) -> Result<Arc<FileFlash>, CliError> {
        if !tokio::fs::try_exists(&self.image).await? {
            return Err(CliError::ImageNotFound(self.image.display().to_string()));
        }
        let flash = FileFlash::open(&self.image, self.config.regions.sector_size).await?;
        Ok(Arc::new(flash))
    }

    /// Open the version and trust store on the flash image.
    pub async fn store(&self) -> Result<VersionTrustStore, CliError> {
        let store = FlashStore::new(self.flash().await?, self.config.regions.clone())
            .map_err(haa_ota_errors::OtaError::from)?;
        Ok(VersionTrustStore::open(store)
            .await
            .map_err(haa_ota_errors::OtaError::from)?)
    }
}

/// Read a key file, rejecting anything that is not a P-384 public key.
pub async fn read_key(path: &Path) -> Result<Vec<u8>, CliError> {
    let blob = tokio::fs::read(path).await?;
    haa_ota_crypto::PublicKey::from_blob(&blob).map_err(|e| CliError::InvalidKey {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(blob)
}
