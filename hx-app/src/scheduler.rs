//! Daily spreadsheet mirror schedule.

use crate::config::{AppConfig, SheetsConfig};
use crate::context::Persistence;
use crate::sheets::{self, SyncOutcome};
use anyhow::Result;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub fn daily_expression(hour: u32, minute: u32) -> String {
    format!("0 {minute} {hour} * * *")
}

pub fn next_run_after(schedule: &Schedule, tz: Tz, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule
        .after(&from.with_timezone(&tz))
        .next()
        .map(|at| at.with_timezone(&Utc))
}

/// Start the sync loop when sheets sync is enabled and configured; `None` otherwise.
pub fn spawn(
    cfg: &AppConfig,
    persistence: Persistence,
    shutdown: CancellationToken,
) -> Result<Option<JoinHandle<()>>> {
    if !cfg.sheets.enabled {
        tracing::info!("sheets sync disabled");
        return Ok(None);
    }
    if !cfg.sheets.is_configured() {
        tracing::info!("sheets sync not configured; scheduler not started");
        return Ok(None);
    }

    let (hour, minute) = cfg.sheets.sync_hour_minute();
    let expression = daily_expression(hour, minute);
    let schedule = Schedule::from_str(&expression)
        .map_err(|e| anyhow::anyhow!("invalid cron expression {expression:?}: {e}"))?;
    let tz = cfg.general.tz()?;

    tracing::info!(%expression, %tz, "sheets scheduler started");
    let sheets_cfg = cfg.sheets.clone();
    Ok(Some(tokio::spawn(run_loop(
        schedule, tz, sheets_cfg, persistence, shutdown,
    ))))
}

async fn run_loop(
    schedule: Schedule,
    tz: Tz,
    sheets_cfg: SheetsConfig,
    persistence: Persistence,
    shutdown: CancellationToken,
) {
    loop {
        let now = Utc::now();
        let Some(next_run) = next_run_after(&schedule, tz, now) else {
            tracing::warn!("cron schedule has no upcoming run; scheduler exiting");
            return;
        };
        let wait = (next_run - now).to_std().unwrap_or_default();
        tracing::debug!(next_run = %next_run, wait_seconds = wait.as_secs(), "sheets sync scheduled");

        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("sheets scheduler received shutdown signal");
                return;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        match sheets::sync_from_store(&sheets_cfg, &persistence).await {
            Ok(SyncOutcome::Synced(report)) => {
                tracing::info!(tabs_updated = report.tabs_updated, "scheduled sheets sync finished");
            }
            Ok(SyncOutcome::Skipped(reason)) => {
                tracing::info!(reason, "scheduled sheets sync skipped");
            }
            Err(e) => tracing::error!(error = %format!("{e:#}"), "scheduled sheets sync failed"),
        }
    }
}
