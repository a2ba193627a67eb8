//! Backup schedule: database daily at 02:00, files daily at 03:00, logs
//! weekly on Sunday at 04:00, retention sweep daily at 05:00 (all UTC).
//! The loop ticks once a minute; each task fires once per due day, so a
//! missed minute (slow tick, restart) still runs within the hour.

use super::BackupManager;
use chrono::{Datelike, Timelike};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Default)]
struct LastRuns {
    database: Option<chrono::NaiveDate>,
    files: Option<chrono::NaiveDate>,
    logs: Option<chrono::NaiveDate>,
    cleanup: Option<chrono::NaiveDate>,
}

/// Runs the backup schedule until the task is aborted.
pub async fn run_backup_scheduler(manager: Arc<BackupManager>) {
    info!(target: "jobflow::backup", "backup scheduler started");
    let mut last = LastRuns::default();
    let mut interval = tokio::time::interval(Duration::from_secs(60));

    loop {
        interval.tick().await;
        let now = chrono::Utc::now();
        let today = now.date_naive();

        if now.hour() == 2 && last.database != Some(today) {
            last.database = Some(today);
            if let Err(e) = manager.backup_database().await {
                error!(target: "jobflow::backup", error = %e, "scheduled database backup failed");
            }
        }
        if now.hour() == 3 && last.files != Some(today) {
            last.files = Some(today);
            if let Err(e) = manager.backup_files(None).await {
                error!(target: "jobflow::backup", error = %e, "scheduled files backup failed");
            }
        }
        if now.weekday() == chrono::Weekday::Sun && now.hour() == 4 && last.logs != Some(today) {
            last.logs = Some(today);
            if let Err(e) = manager.backup_logs().await {
                error!(target: "jobflow::backup", error = %e, "scheduled logs backup failed");
            }
        }
        if now.hour() == 5 && last.cleanup != Some(today) {
            last.cleanup = Some(today);
            if let Err(e) = manager.cleanup_old_backups().await {
                error!(target: "jobflow::backup", error = %e, "retention sweep failed");
            }
        }
    }
}
