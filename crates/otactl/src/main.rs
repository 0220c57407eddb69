//! otactl - HAA firmware update control
//!
//! Drives the over-the-air update engine against a flash image file: provision
//! keys, check for and install updates, and walk through the reboot and
//! confirmation steps a device would take.

#![deny(static_mut_refs)]
#![deny(unused_must_use)]
#![deny(clippy::unwrap_used)]

mod commands;
mod completion;
mod error;
mod image;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use haa_ota_update::OtaConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::{Context, KeyCommands};
use crate::error::CliError;

#[derive(Parser, Debug)]
#[command(name = "otactl")]
#[command(about = "HAA firmware update control - provision, update and confirm firmware images")]
#[command(version)]
#[command(long_about = "
otactl drives the HAA over-the-air update engine against a flash image file.
The image holds both firmware slots, the trusted key sectors and the
parameter records, laid out as configured.

Use --json for machine-readable output suitable for scripting.
")]
struct Cli {
    /// Output in JSON format for machine parsing
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Engine configuration (JSON); built-in defaults when omitted
    #[arg(short, long, global = true, env = "OTACTL_CONFIG")]
    config: Option<PathBuf>,

    /// Flash image file
    #[arg(short, long, global = true, env = "OTACTL_IMAGE", default_value = "flash.img")]
    image: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a flash image and provision keys
    Init {
        /// Active public key (DER SubjectPublicKeyInfo or SEC1)
        #[arg(short, long)]
        key: PathBuf,
        /// Backup public key
        #[arg(short, long)]
        backup_key: Option<PathBuf>,
        /// Version of the image already in slot 0
        #[arg(long)]
        installed: Option<String>,
        /// Replace an existing image
        #[arg(short, long)]
        force: bool,
    },

    /// Show installed version, boot selection and trusted keys
    Status,

    /// Check the repository and install a newer image
    Check {
        /// Keep checking on schedule until an update is installed
        #[arg(short, long)]
        watch: bool,
    },

    /// Simulate a reset: resolve which slot the bootloader starts
    Boot,

    /// Make a booted temporary image permanent
    Confirm,

    /// Trusted key management
    #[command(subcommand)]
    Key(KeyCommands),

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completion for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("otactl={log_level},haa_ota_update={log_level},haa_ota_crypto={log_level}")
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    match execute_command(&cli).await {
        Ok(()) => Ok(()),
        Err(e) => {
            if cli.json {
                output::print_error_json(&e);
            } else {
                output::print_error_human(&e);
            }
            let exit_code = e.downcast_ref::<CliError>().map_or(1, CliError::exit_code);
            std::process::exit(exit_code);
        }
    }
}

async fn load_context(cli: &Cli) -> Result<Context, CliError> {
    let config = match &cli.config {
        Some(path) => OtaConfig::load(path).await?,
        None => OtaConfig::default(),
    };
    Ok(Context {
        config,
        image: cli.image.clone(),
        json: cli.json,
    })
}

async fn execute_command(cli: &Cli) -> Result<()> {
    if let Commands::Completion { shell } = &cli.command {
        completion::generate_completion(*shell);
        return Ok(());
    }

    let ctx = load_context(cli).await?;
    match &cli.command {
        Commands::Init {
            key,
            backup_key,
            installed,
            force,
        } => {
            commands::device::init(
                &ctx,
                key,
                backup_key.as_deref(),
                installed.as_deref(),
                *force,
            )
            .await
        }
        Commands::Status => commands::device::status(&ctx).await,
        Commands::Check { watch } => commands::update::check(&ctx, *watch).await,
        Commands::Boot => commands::device::boot(&ctx).await,
        Commands::Confirm => commands::device::confirm(&ctx).await,
        Commands::Key(cmd) => commands::key::execute(cmd, &ctx).await,
        Commands::Completion { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn parse_status_defaults() -> TestResult {
        let cli = Cli::try_parse_from(["otactl", "status"])?;
        assert!(!cli.json);
        assert_eq!(cli.verbose, 0);
        assert!(cli.config.is_none());
        assert_eq!(cli.image, PathBuf::from("flash.img"));
        assert!(matches!(cli.command, Commands::Status));
        Ok(())
    }

    #[test]
    fn parse_global_flags_after_subcommand() -> TestResult {
        let cli = Cli::try_parse_from(["otactl", "check", "--json", "-vv", "--image", "dev.img"])?;
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.image, PathBuf::from("dev.img"));
        assert!(matches!(cli.command, Commands::Check { watch: false }));
        Ok(())
    }

    #[test]
    fn parse_init() -> TestResult {
        let cli = Cli::try_parse_from([
            "otactl",
            "init",
            "--key",
            "active.der",
            "--backup-key",
            "backup.der",
            "--installed",
            "1.2.3",
        ])?;
        match cli.command {
            Commands::Init {
                key,
                backup_key,
                installed,
                force,
            } => {
                assert_eq!(key, PathBuf::from("active.der"));
                assert_eq!(backup_key, Some(PathBuf::from("backup.der")));
                assert_eq!(installed.as_deref(), Some("1.2.3"));
                assert!(!force);
            }
            other => return Err(format!("unexpected command {other:?}").into()),
        }
        Ok(())
    }

    #[test]
    fn parse_key_rotate_requires_signature() {
        assert!(Cli::try_parse_from(["otactl", "key", "rotate", "new.der"]).is_err());
        assert!(
            Cli::try_parse_from(["otactl", "key", "rotate", "new.der", "-s", "new.der.sec"])
                .is_ok()
        );
    }

    #[test]
    fn parse_init_requires_key() {
        assert!(Cli::try_parse_from(["otactl", "init"]).is_err());
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
