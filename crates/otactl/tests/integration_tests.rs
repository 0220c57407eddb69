//! Integration tests for the otactl binary

use assert_cmd::Command;
use haa_ota_test_helpers::prelude::*;
use predicates::prelude::*;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn otactl(dir: &TempDir) -> Result<Command, Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("otactl")?;
    cmd.current_dir(dir.path())
        .env_remove("OTACTL_CONFIG")
        .env_remove("OTACTL_IMAGE")
        .env_remove("RUST_LOG");
    Ok(cmd)
}

fn write_key(dir: &TempDir, name: &str, signer: &SigningFixture) -> std::io::Result<PathBuf> {
    let path = dir.path().join(name);
    std::fs::write(&path, signer.der_blob())?;
    Ok(path)
}

fn provision(dir: &TempDir, key: &Path) -> TestResult {
    otactl(dir)?
        .args(["init", "--installed", "1.2.3", "--key"])
        .arg(key)
        .assert()
        .success();
    Ok(())
}

fn status_json(dir: &TempDir) -> Result<Value, Box<dyn std::error::Error>> {
    let output = otactl(dir)?.args(["status", "--json"]).output()?;
    assert!(output.status.success());
    Ok(serde_json::from_slice(&output.stdout)?)
}

#[test]
fn test_cli_help() -> TestResult {
    let dir = TempDir::new()?;
    otactl(&dir)?
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("HAA firmware update"));
    Ok(())
}

#[test]
fn test_init_then_status() -> TestResult {
    let dir = TempDir::new()?;
    let signer = SigningFixture::new(1);
    let key = write_key(&dir, "active.der", &signer)?;
    provision(&dir, &key)?;
    assert!(dir.path().join("flash.img").exists());

    let status = status_json(&dir)?;
    assert_eq!(status["success"], true);
    assert_eq!(status["status"]["installed"], "1.2.3");
    assert_eq!(status["status"]["running_slot"], "slot0");
    assert_eq!(
        status["status"]["keys"][0]["fingerprint"],
        signer.public_key().fingerprint()
    );
    assert!(status["status"]["keys"][1]["fingerprint"].is_null());
    Ok(())
}

#[test]
fn test_init_refuses_to_overwrite() -> TestResult {
    let dir = TempDir::new()?;
    let key = write_key(&dir, "active.der", &SigningFixture::new(1))?;
    provision(&dir, &key)?;

    otactl(&dir)?
        .args(["init", "--key"])
        .arg(&key)
        .assert()
        .code(4)
        .stderr(predicate::str::contains("already exists"));

    otactl(&dir)?
        .args(["init", "--force", "--installed", "2.0.0", "--key"])
        .arg(&key)
        .assert()
        .success();
    assert_eq!(status_json(&dir)?["status"]["installed"], "2.0.0");
    Ok(())
}

#[test]
fn test_invalid_key_is_rejected() -> TestResult {
    let dir = TempDir::new()?;
    let key = dir.path().join("junk.der");
    std::fs::write(&key, b"not a key")?;
    otactl(&dir)?
        .args(["--json", "init", "--key"])
        .arg(&key)
        .assert()
        .code(4)
        .stdout(predicate::str::contains("invalid_key"));
    assert!(!dir.path().join("flash.img").exists());
    Ok(())
}

#[test]
fn test_missing_image() -> TestResult {
    let dir = TempDir::new()?;
    otactl(&dir)?
        .args(["status"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("otactl init"));
    Ok(())
}

#[test]
fn test_boot_and_confirm_without_pending_image() -> TestResult {
    let dir = TempDir::new()?;
    let key = write_key(&dir, "active.der", &SigningFixture::new(1))?;
    provision(&dir, &key)?;

    otactl(&dir)?
        .args(["boot"])
        .assert()
        .success()
        .stdout(predicate::str::contains("slot0"));
    otactl(&dir)?
        .args(["confirm", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"confirmed\": null"));
    Ok(())
}

#[test]
fn test_key_rotation() -> TestResult {
    let dir = TempDir::new()?;
    let old = SigningFixture::new(1);
    let new = SigningFixture::new(2);
    let old_key = write_key(&dir, "old.der", &old)?;
    provision(&dir, &old_key)?;

    let new_key = write_key(&dir, "new.der", &new)?;
    let signature = dir.path().join("new.der.sec");
    std::fs::write(&signature, old.sign_file(&new.der_blob()))?;

    otactl(&dir)?
        .args(["key", "rotate"])
        .arg(&new_key)
        .arg("--signature")
        .arg(&signature)
        .assert()
        .success();

    let status = status_json(&dir)?;
    let keys = &status["status"]["keys"];
    assert_eq!(keys[0]["fingerprint"], new.public_key().fingerprint());
    assert_eq!(keys[1]["fingerprint"], old.public_key().fingerprint());
    Ok(())
}

#[test]
fn test_rotation_signed_by_untrusted_key_fails() -> TestResult {
    let dir = TempDir::new()?;
    let old = SigningFixture::new(1);
    let stranger = SigningFixture::new(3);
    provision(&dir, &write_key(&dir, "old.der", &old)?)?;

    let new_key = write_key(&dir, "new.der", &SigningFixture::new(2))?;
    let signature = dir.path().join("new.der.sec");
    std::fs::write(&signature, stranger.sign_file(&std::fs::read(&new_key)?))?;

    otactl(&dir)?
        .args(["key", "rotate"])
        .arg(&new_key)
        .args(["-s"])
        .arg(&signature)
        .assert()
        .code(6);
    assert_eq!(
        status_json(&dir)?["status"]["keys"][0]["fingerprint"],
        old.public_key().fingerprint()
    );
    Ok(())
}

#[test]
fn test_check_against_unreachable_repository() -> TestResult {
    let dir = TempDir::new()?;
    provision(&dir, &write_key(&dir, "active.der", &SigningFixture::new(1))?)?;
    let config = dir.path().join("ota.json");
    std::fs::write(
        &config,
        r#"{
            "repository": { "url": "127.0.0.1/haa", "port": 9, "tls": false },
            "fetch": { "small_file_attempts": 1, "connect_timeout": 2000 }
        }"#,
    )?;

    otactl(&dir)?
        .args(["check", "--json", "--config"])
        .arg(&config)
        .assert()
        .code(3)
        .stdout(predicate::str::contains("update_failed"));
    assert_eq!(status_json(&dir)?["status"]["installed"], "1.2.3");
    Ok(())
}

#[test]
fn test_completion_generation() -> TestResult {
    let dir = TempDir::new()?;
    otactl(&dir)?
        .args(["completion", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("otactl"));
    Ok(())
}
