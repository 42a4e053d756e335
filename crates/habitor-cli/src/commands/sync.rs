use std::sync::Arc;

use habitor_core::connectivity::{spawn_probe_loop, TcpProbe};
use habitor_core::identity::AccountIdentity;
use habitor_core::sync::SyncOutcome;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::commands::common::App;
use crate::error::CliError;

pub async fn run_sync(app: &App, force: bool) -> Result<(), CliError> {
    app.require_sync()?;

    let outcome = if force {
        app.coordinator.force_upload_all().await
    } else {
        app.coordinator.start().await
    };
    report_outcome(&outcome)
}

/// Sync once, then again on every reconnect until interrupted
pub async fn run_watch(app: &App) -> Result<(), CliError> {
    app.require_sync()?;

    let probe = app.config.probe_address.clone().map(|address| {
        let probe = Arc::new(TcpProbe::new(address, app.config.request_timeout()));
        spawn_probe_loop(app.connectivity.clone(), probe, app.config.probe_interval())
    });

    let (events, mut outcomes) = mpsc::channel(8);
    let listener = app.coordinator.spawn_reconnect_listener(Some(events));

    print_outcome(&app.coordinator.start().await);
    println!("Watching for reconnects; press Ctrl-C to stop.");

    loop {
        tokio::select! {
            outcome = outcomes.recv() => match outcome {
                Some(outcome) => print_outcome(&outcome),
                None => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
        }
    }

    listener.abort();
    if let Some(probe) = probe {
        probe.abort();
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub account: Option<String>,
    pub device_id: String,
    pub remote_configured: bool,
    pub online: bool,
    pub phase: String,
    pub pending_operations: usize,
    pub active_habits: usize,
    pub unsynced_habits: usize,
    pub trashed_habits: usize,
}

pub fn collect_status(app: &App) -> Result<StatusReport, CliError> {
    let active = app.repo.list_active()?;
    Ok(StatusReport {
        account: app.identity.account(),
        device_id: app.identity.device_id().to_string(),
        remote_configured: app.config.sync_configured(),
        online: app.connectivity.is_online(),
        phase: app.coordinator.phase().to_string(),
        pending_operations: app.coordinator.pending_count()?,
        unsynced_habits: active.iter().filter(|record| !record.is_synced()).count(),
        active_habits: active.len(),
        trashed_habits: app.repo.list_trash()?.len(),
    })
}

pub fn run_status(app: &App, as_json: bool) -> Result<(), CliError> {
    let status = collect_status(app)?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let signed_in = app.identity.is_authenticated();
    println!(
        "Account:   {}",
        status.account.as_deref().unwrap_or("not signed in")
    );
    println!("Device:    {}", status.device_id);
    println!(
        "Remote:    {}",
        match (status.remote_configured, status.online) {
            (false, _) => "not configured",
            (true, true) => "online",
            (true, false) => "offline",
        }
    );
    println!("Sync:      {}", if signed_in { status.phase.as_str() } else { "disabled" });
    println!("Pending:   {}", status.pending_operations);
    println!(
        "Habits:    {} active ({} never uploaded), {} in trash",
        status.active_habits, status.unsynced_habits, status.trashed_habits
    );
    Ok(())
}

fn print_outcome(outcome: &SyncOutcome) {
    if outcome.success {
        println!("{}", outcome.message);
    } else {
        eprintln!("{}", outcome.message);
    }
}

fn report_outcome(outcome: &SyncOutcome) -> Result<(), CliError> {
    if outcome.success {
        println!("{}", outcome.message);
        Ok(())
    } else {
        Err(CliError::SyncFailed(outcome.message.clone()))
    }
}
