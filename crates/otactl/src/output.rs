//! Output formatting for CLI responses

use anyhow::Error;
use colored::*;
use haa_ota_crypto::KeySlot;
use serde::Serialize;
use serde_json::json;

use crate::error::CliError;

/// Device state as shown by `otactl status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub installed: Option<String>,
    pub running_slot: String,
    pub permanent_slot: String,
    pub temporary: Option<TemporaryReport>,
    pub record_seq: u32,
    pub keys: Vec<KeyReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemporaryReport {
    pub slot: String,
    pub version: String,
    pub tried: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyReport {
    pub slot: KeySlot,
    pub fingerprint: Option<String>,
}

/// Print error in JSON format
pub fn print_error_json(error: &Error) {
    let error_json = json!({
        "success": false,
        "error": {
            "message": error.to_string(),
            "type": error_type_name(error)
        }
    });
    print_json(&error_json);
}

/// Print error in human-readable format
pub fn print_error_human(error: &Error) {
    eprintln!("{} {}", "Error:".red().bold(), error);

    let mut source = error.source();
    while let Some(err) = source {
        eprintln!("  {} {}", "Caused by:".yellow(), err);
        source = err.source();
    }
}

fn error_type_name(error: &Error) -> &'static str {
    match error.downcast_ref::<CliError>() {
        Some(CliError::ImageNotFound(_)) => "image_not_found",
        Some(CliError::AlreadyExists(_)) => "already_exists",
        Some(CliError::InvalidKey { .. }) => "invalid_key",
        Some(CliError::UpdateFailed(_)) => "update_failed",
        Some(CliError::NotStarted(_)) => "not_started",
        Some(CliError::Ota(_)) => "engine_error",
        Some(CliError::Config(_)) => "config_error",
        Some(CliError::Io(_)) => "io_error",
        Some(CliError::Json(_)) => "json_error",
        None => "error",
    }
}

/// Pretty-print a JSON value to stdout
pub fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("Failed to format output as JSON: {e}"),
    }
}

/// Print a one-line success message, or `{"success": true, ...extra}`
pub fn print_success(json: bool, message: &str, extra: serde_json::Value) {
    if json {
        let mut output = json!({ "success": true, "message": message });
        if let (Some(out), serde_json::Value::Object(fields)) = (output.as_object_mut(), extra) {
            out.extend(fields);
        }
        print_json(&output);
    } else {
        println!("{} {}", "✓".green(), message);
    }
}

/// Print device status in specified format
pub fn print_status(report: &StatusReport, json: bool) {
    if json {
        print_json(&json!({ "success": true, "status": report }));
        return;
    }

    println!("{}", "Firmware Status:".bold());
    match &report.installed {
        Some(version) => println!("  Installed: {}", version.green()),
        None => println!("  Installed: {}", "unknown".yellow()),
    }
    println!("  Running slot: {}", report.running_slot);
    println!("  Permanent slot: {}", report.permanent_slot);
    if let Some(temporary) = &report.temporary {
        let state = if temporary.tried {
            "booted, awaiting confirmation".yellow()
        } else {
            "pending reboot".cyan()
        };
        println!(
            "  Temporary: {} in {} ({})",
            temporary.version, temporary.slot, state
        );
    }
    println!("  Record sequence: {}", report.record_seq);
    print_keys(&report.keys);
}

/// Print trusted key fingerprints
pub fn print_keys(keys: &[KeyReport]) {
    println!("{}", "Trusted Keys:".bold());
    for key in keys {
        match &key.fingerprint {
            Some(fingerprint) => println!("  {:<7} {}", key.slot, fingerprint.dimmed()),
            None => println!("  {:<7} {}", key.slot, "empty".yellow()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_type_names() {
        let err: Error = CliError::ImageNotFound("flash.img".into()).into();
        assert_eq!(error_type_name(&err), "image_not_found");
        let other = anyhow::anyhow!("plain");
        assert_eq!(error_type_name(&other), "error");
    }

    #[test]
    fn test_status_report_serializes() -> Result<(), serde_json::Error> {
        let report = StatusReport {
            installed: Some("1.2.3".into()),
            running_slot: "slot0".into(),
            permanent_slot: "slot0".into(),
            temporary: None,
            record_seq: 4,
            keys: vec![KeyReport {
                slot: KeySlot::Active,
                fingerprint: Some("00112233".into()),
            }],
        };
        let value = serde_json::to_value(&report)?;
        assert_eq!(value["installed"], "1.2.3");
        assert_eq!(value["keys"][0]["slot"], "active");
        assert!(value["temporary"].is_null());
        Ok(())
    }
}
