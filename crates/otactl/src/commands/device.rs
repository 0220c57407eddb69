//! Provisioning, status and boot-selection commands

use std::path::Path;

use anyhow::Result;
use haa_ota_crypto::KeySlot;
use haa_ota_update::{FirmwareVersion, FlashStore, VersionTrustStore};
use serde_json::json;
use tracing::info;

use crate::commands::{Context, read_key};
use crate::error::CliError;
use crate::image::FileFlash;
use crate::output::{self, KeyReport, StatusReport, TemporaryReport};

/// Create a blank flash image and provision keys and the installed version.
pub async fn init(
    ctx: &Context,
    key: &Path,
    backup_key: Option<&Path>,
    installed: Option<&str>,
    force: bool,
) -> Result<()> {
    if !force && tokio::fs::try_exists(&ctx.image).await? {
        return Err(CliError::AlreadyExists(ctx.image.display().to_string()).into());
    }
    let active = read_key(key).await?;
    let backup = match backup_key {
        Some(path) => Some(read_key(path).await?),
        None => None,
    };
    let installed = installed
        .map(FirmwareVersion::parse)
        .transpose()
        .map_err(CliError::from)?;

    let regions = &ctx.config.regions;
    let flash = FileFlash::create(&ctx.image, regions.sector_size, regions.capacity).await?;
    info!(path = %flash.path().display(), "provisioning flash image");
    let store = FlashStore::new(std::sync::Arc::new(flash), regions.clone())
        .map_err(haa_ota_errors::OtaError::from)?;
    let mut trust = VersionTrustStore::open(store)
        .await
        .map_err(haa_ota_errors::OtaError::from)?;
    trust
        .provision(&active, backup.as_deref(), installed.clone())
        .await
        .map_err(CliError::from)?;

    output::print_success(
        ctx.json,
        &format!("Provisioned {}", ctx.image.display()),
        json!({
            "image": ctx.image.display().to_string(),
            "installed": installed.map(|v| v.to_string()),
            "backup_key": backup.is_some(),
        }),
    );
    Ok(())
}

/// Show installed version, boot selection and trusted keys.
pub async fn status(ctx: &Context) -> Result<()> {
    let trust = ctx.store().await?;
    let report = build_report(&trust).await?;
    output::print_status(&report, ctx.json);
    Ok(())
}

async fn build_report(trust: &VersionTrustStore) -> Result<StatusReport, CliError> {
    let params = trust.params();
    let keys = trust
        .trusted_keys()
        .await
        .map_err(haa_ota_errors::OtaError::from)?;
    Ok(StatusReport {
        installed: trust.installed_version().map(ToString::to_string),
        running_slot: trust.running_slot().to_string(),
        permanent_slot: params.permanent_slot.to_string(),
        temporary: params.temporary.as_ref().map(|t| TemporaryReport {
            slot: t.slot.to_string(),
            version: t.version.to_string(),
            tried: t.tried,
        }),
        record_seq: params.seq,
        keys: vec![
            KeyReport {
                slot: KeySlot::Active,
                fingerprint: keys.active.as_ref().map(|k| k.fingerprint()),
            },
            KeyReport {
                slot: KeySlot::Backup,
                fingerprint: keys.backup.as_ref().map(|k| k.fingerprint()),
            },
        ],
    })
}

/// Apply the bootloader's reset-time decision and report the slot it boots.
pub async fn boot(ctx: &Context) -> Result<()> {
    let mut trust = ctx.store().await?;
    let slot = trust
        .boot()
        .resolve_boot()
        .await
        .map_err(haa_ota_errors::OtaError::from)?;
    output::print_success(
        ctx.json,
        &format!("Booting {slot}"),
        json!({ "slot": slot.to_string() }),
    );
    Ok(())
}

/// Make a booted temporary image permanent.
pub async fn confirm(ctx: &Context) -> Result<()> {
    let mut trust = ctx.store().await?;
    if trust.params().temporary.as_ref().is_some_and(|t| !t.tried) {
        return Err(CliError::NotStarted(
            "temporary image has not been booted yet; run `otactl boot` first".to_string(),
        )
        .into());
    }
    let confirmed = trust
        .boot()
        .confirm_temporary_as_permanent()
        .await
        .map_err(haa_ota_errors::OtaError::from)?;
    match confirmed {
        Some(version) => output::print_success(
            ctx.json,
            &format!("Confirmed {version}"),
            json!({ "confirmed": version.to_string() }),
        ),
        None => output::print_success(
            ctx.json,
            "Nothing to confirm",
            json!({ "confirmed": null }),
        ),
    }
    Ok(())
}
