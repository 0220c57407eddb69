//! Trusted key commands

use std::path::Path;

use anyhow::Result;
use haa_ota_crypto::{KeySlot, SignatureRecord, sha384};
use haa_ota_errors::{OtaError, VerificationError};
use serde_json::json;

use crate::commands::{Context, KeyCommands, read_key};
use crate::error::CliError;
use crate::output::{self, KeyReport};

/// Execute key commands
pub async fn execute(cmd: &KeyCommands, ctx: &Context) -> Result<()> {
    match cmd {
        KeyCommands::Show => show(ctx).await,
        KeyCommands::Rotate { key, signature } => rotate(ctx, key, signature).await,
    }
}

async fn show(ctx: &Context) -> Result<()> {
    let trust = ctx.store().await?;
    let keys = trust.trusted_keys().await.map_err(OtaError::from)?;
    let reports = [
        (KeySlot::Active, keys.active.as_ref()),
        (KeySlot::Backup, keys.backup.as_ref()),
    ]
    .map(|(slot, key)| KeyReport {
        slot,
        fingerprint: key.map(haa_ota_crypto::PublicKey::fingerprint),
    });

    if ctx.json {
        output::print_json(&json!({ "success": true, "keys": reports }));
    } else {
        output::print_keys(&reports);
    }
    Ok(())
}

async fn rotate(ctx: &Context, key: &Path, signature: &Path) -> Result<()> {
    let blob = read_key(key).await?;
    let record_bytes = tokio::fs::read(signature).await?;
    let record = SignatureRecord::decode(&record_bytes)
        .map_err(|e| CliError::from(OtaError::from(VerificationError::from(e))))?;

    let mut trust = ctx.store().await?;
    trust
        .install_rotated_key(&blob, &record)
        .await
        .map_err(CliError::UpdateFailed)?;

    output::print_success(
        ctx.json,
        "Key rotated; previous key kept as backup",
        json!({ "key_sha384": hex::encode(sha384(&blob)) }),
    );
    Ok(())
}
