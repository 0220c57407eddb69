//! Update check commands

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use haa_ota_update::prelude::*;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::commands::Context;
use crate::error::CliError;
use crate::output;

const IDLE_POLL: Duration = Duration::from_secs(60);

/// Run one update check, or keep checking on schedule with `watch`.
pub async fn check(ctx: &Context, watch: bool) -> Result<()> {
    let flash = ctx.flash().await?;
    let transport = TcpTransport::new().map_err(OtaError::from).map_err(CliError::from)?;
    let mut engine = Orchestrator::new(
        ctx.config.clone(),
        flash,
        Arc::new(transport),
        Arc::new(TokioClock),
    )
    .await
    .map_err(CliError::from)?;

    let abort = engine.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() && abort.abort("interrupted") {
            warn!("interrupt received, aborting update");
        }
    });
    let progress = (!ctx.json).then(|| spawn_progress(&engine));

    let result = if watch {
        watch_schedule(&mut engine, ctx.json).await
    } else {
        let outcome = engine.run_cycle().await;
        report(outcome, ctx.json)
    };
    if let Some(task) = progress {
        task.abort();
    }
    result
}

async fn watch_schedule(engine: &mut Orchestrator, json: bool) -> Result<()> {
    loop {
        if let Some(outcome) = engine.poll_schedule().await {
            let updated = matches!(outcome, CycleOutcome::Updated(_));
            if let Err(e) = report(outcome, json) {
                warn!(error = %e, "scheduled check failed");
            }
            if updated {
                info!("reboot pending, stopping scheduled checks");
                return Ok(());
            }
        }
        let wait = engine.holdoff_remaining().unwrap_or(IDLE_POLL).min(IDLE_POLL);
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            () = tokio::time::sleep(wait) => {}
        }
    }
}

fn report(outcome: CycleOutcome, json: bool) -> Result<()> {
    match outcome {
        CycleOutcome::Updated(version) => {
            output::print_success(
                json,
                &format!("Installed {version}; reboot to apply"),
                json!({ "outcome": "updated", "version": version.to_string() }),
            );
            Ok(())
        }
        CycleOutcome::UpToDate => {
            output::print_success(
                json,
                "Firmware is up to date",
                json!({ "outcome": "up_to_date" }),
            );
            Ok(())
        }
        CycleOutcome::Failed(error) => Err(CliError::UpdateFailed(error).into()),
        CycleOutcome::NotStarted(reason) => Err(CliError::NotStarted(describe(reason)).into()),
    }
}

fn describe(outcome: TriggerOutcome) -> String {
    match outcome {
        TriggerOutcome::Started => "started".to_string(),
        TriggerOutcome::AlreadyRunning => "an update is already running".to_string(),
        TriggerOutcome::HeldOff { remaining } => {
            format!("held off for another {}s after a failure", remaining.as_secs())
        }
        TriggerOutcome::RebootPending => "an update is waiting for a reboot".to_string(),
        TriggerOutcome::AwaitingConfirmation => {
            "the running image has not been confirmed".to_string()
        }
    }
}

fn spawn_progress(engine: &Orchestrator) -> tokio::task::JoinHandle<()> {
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(100));
        loop {
            match events.recv().await {
                Ok(UpdateState::FetchingImage {
                    written,
                    total: Some(total),
                }) => {
                    if bar.length() != Some(total) {
                        bar.set_length(total);
                        let template =
                            "{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}";
                        if let Ok(style) = ProgressStyle::default_bar().template(template) {
                            bar.set_style(style.progress_chars("#>-"));
                        }
                    }
                    bar.set_position(written);
                    bar.set_message("downloading image");
                }
                Ok(UpdateState::Success { .. } | UpdateState::Failed { .. }) => {
                    bar.finish_and_clear();
                }
                Ok(state) => bar.set_message(state.to_string()),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    })
}
