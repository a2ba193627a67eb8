//! Backup and recovery subsystem.
//!
//! Three backup families: `database` (out-of-process dump piped through
//! gzip), `files` (gzip tarball of configured directories), and `logs`
//! (gzip tarball of log directories). Every backup gets a SHA-256 checksum,
//! a JSON sidecar next to the artifact, an optional remote-object upload,
//! and a store record that expires with the family's retention window.
//!
//! A failed backup writes a short-lived `status=failed` record and never
//! aborts the schedule. Restore verifies the checksum before touching the
//! database; a mismatch is fatal and performs no restore action.

mod remote;
mod scheduler;

pub use remote::RemoteStore;
pub use scheduler::run_backup_scheduler;

use crate::config::BackupConfig;
use crate::error::{CoreError, Result};
use crate::store::KvStore;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const TREE: &str = "backups";
const FAILED_RECORD_TTL: Duration = Duration::from_secs(86_400);

/// The three backup families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupFamily {
    Database,
    Files,
    Logs,
}

impl BackupFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            BackupFamily::Database => "database",
            BackupFamily::Files => "files",
            BackupFamily::Logs => "logs",
        }
    }

    pub const ALL: [BackupFamily; 3] = [BackupFamily::Database, BackupFamily::Files, BackupFamily::Logs];
}

/// Persisted backup metadata. Serialized verbatim as the JSON sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub backup_id: String,
    #[serde(rename = "type")]
    pub family: BackupFamily,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directories: Option<Vec<String>>,
    pub size_bytes: u64,
    pub size_mb: f64,
    pub duration_seconds: f64,
    pub checksum: String,
    pub compressed: bool,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_uploaded: Option<bool>,
}

/// Summary for the ops dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupStatus {
    pub backup_counts: std::collections::BTreeMap<String, usize>,
    pub total_backups: usize,
    pub total_size_mb: f64,
    pub latest_backups: std::collections::BTreeMap<String, chrono::DateTime<chrono::Utc>>,
    pub cloud_storage_enabled: bool,
    pub local_storage_path: PathBuf,
}

/// SHA-256 of a file, streamed in 4 KiB chunks.
pub fn file_checksum(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Backup manager. One instance per process; operations are independent.
pub struct BackupManager {
    store: Arc<KvStore>,
    config: BackupConfig,
    remote: Option<RemoteStore>,
}

impl BackupManager {
    pub fn new(store: Arc<KvStore>, config: BackupConfig) -> Result<Self> {
        let local = &config.local_dir;
        for family in BackupFamily::ALL {
            std::fs::create_dir_all(local.join(family.as_str()))?;
        }
        let remote = RemoteStore::from_config(&config);
        if remote.is_some() {
            info!(target: "jobflow::backup", "remote backup storage configured");
        }
        Ok(Self { store, config, remote })
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    fn retention(&self, family: BackupFamily) -> Duration {
        let days = match family {
            BackupFamily::Database => self.config.database_retention_days,
            BackupFamily::Files => self.config.files_retention_days,
            BackupFamily::Logs => self.config.logs_retention_days,
        };
        Duration::from_secs(days * 86_400)
    }

    fn artifact_path(&self, family: BackupFamily, filename: &str) -> PathBuf {
        self.config.local_dir.join(family.as_str()).join(filename)
    }

    fn sidecar_path(path: &Path) -> PathBuf {
        path.with_extension("json")
    }

    fn record_failure(&self, backup_id: &str, family: BackupFamily, error: &str) {
        let record = BackupRecord {
            backup_id: backup_id.to_string(),
            family,
            timestamp: chrono::Utc::now(),
            filename: String::new(),
            directories: None,
            size_bytes: 0,
            size_mb: 0.0,
            duration_seconds: 0.0,
            checksum: String::new(),
            compressed: false,
            status: "failed".into(),
            error: Some(error.to_string()),
            cloud_uploaded: None,
        };
        if let Err(e) = self.store.put_json(TREE, backup_id, &record, Some(FAILED_RECORD_TTL)) {
            error!(target: "jobflow::backup", backup_id, error = %e, "failed to record backup failure");
        }
    }

    /// Checksums, writes the sidecar, uploads, and records a completed
    /// backup whose artifact already sits at `path`.
    async fn finalize(
        &self,
        backup_id: String,
        family: BackupFamily,
        path: &Path,
        directories: Option<Vec<String>>,
        started: std::time::Instant,
    ) -> Result<BackupRecord> {
        let size_bytes = std::fs::metadata(path)?.len();
        let checksum = file_checksum(path)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut record = BackupRecord {
            backup_id: backup_id.clone(),
            family,
            timestamp: chrono::Utc::now(),
            filename: filename.clone(),
            directories,
            size_bytes,
            size_mb: (size_bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0,
            duration_seconds: (started.elapsed().as_secs_f64() * 100.0).round() / 100.0,
            checksum,
            compressed: true,
            status: "completed".into(),
            error: None,
            cloud_uploaded: None,
        };

        let sidecar = Self::sidecar_path(path);
        std::fs::write(&sidecar, serde_json::to_vec_pretty(&record)?)?;

        if let Some(remote) = &self.remote {
            let uploaded = remote.put_file(family.as_str(), &filename, path).await.is_ok()
                && remote
                    .put_file(
                        family.as_str(),
                        &format!("{}.json", filename),
                        &sidecar,
                    )
                    .await
                    .is_ok();
            if !uploaded {
                warn!(target: "jobflow::backup", backup_id = %backup_id, "remote upload failed; keeping local copy");
            }
            record.cloud_uploaded = Some(uploaded);
        }

        self.store
            .put_json(TREE, &backup_id, &record, Some(self.retention(family)))?;
        info!(
            target: "jobflow::backup",
            backup_id = %backup_id,
            family = family.as_str(),
            size_mb = record.size_mb,
            duration_seconds = record.duration_seconds,
            "backup completed"
        );
        Ok(record)
    }

    /// Raw database dump bytes from the configured engine.
    async fn dump_database(&self) -> Result<Vec<u8>> {
        if !self.config.dump_command.is_empty() {
            let program = &self.config.dump_command[0];
            let output = tokio::process::Command::new(program)
                .args(&self.config.dump_command[1..])
                .output()
                .await
                .map_err(|e| CoreError::Backup(format!("{} failed to start: {}", program, e)))?;
            if !output.status.success() {
                return Err(CoreError::Backup(format!(
                    "{} failed: {}",
                    program,
                    String::from_utf8_lossy(&output.stderr)
                )));
            }
            return Ok(output.stdout);
        }
        if let Some(db_file) = &self.config.database_file {
            return Ok(std::fs::read(db_file)?);
        }
        Err(CoreError::Backup(
            "no dump engine configured (set backup.dump_command or backup.database_file)".into(),
        ))
    }

    async fn restore_bytes(&self, sql: Vec<u8>) -> Result<()> {
        if !self.config.restore_command.is_empty() {
            use tokio::io::AsyncWriteExt;
            let program = &self.config.restore_command[0];
            let mut child = tokio::process::Command::new(program)
                .args(&self.config.restore_command[1..])
                .stdin(std::process::Stdio::piped())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::piped())
                .spawn()
                .map_err(|e| CoreError::Backup(format!("{} failed to start: {}", program, e)))?;
            if let Some(stdin) = child.stdin.as_mut() {
                stdin.write_all(&sql).await?;
            }
            drop(child.stdin.take());
            let output = child
                .wait_with_output()
                .await
                .map_err(|e| CoreError::Backup(format!("{} failed: {}", program, e)))?;
            if !output.status.success() {
                return Err(CoreError::Backup(format!(
                    "restore failed: {}",
                    String::from_utf8_lossy(&output.stderr)
                )));
            }
            return Ok(());
        }
        if let Some(db_file) = &self.config.database_file {
            std::fs::write(db_file, sql)?;
            return Ok(());
        }
        Err(CoreError::Backup("no restore engine configured".into()))
    }

    /// Dumps the database, gzips it, and records the backup.
    pub async fn backup_database(&self) -> Result<BackupRecord> {
        let backup_id = format!("db_backup_{}", chrono::Utc::now().format("%Y%m%d_%H%M%S"));
        let started = std::time::Instant::now();
        info!(target: "jobflow::backup", backup_id = %backup_id, "starting database backup");

        let outcome: Result<BackupRecord> = async {
            let sql = self.dump_database().await?;
            let path = self.artifact_path(BackupFamily::Database, &format!("{}.sql.gz", backup_id));
            let file = std::fs::File::create(&path)?;
            let mut encoder = GzEncoder::new(file, Compression::default());
            encoder.write_all(&sql)?;
            encoder.finish()?;
            self.finalize(backup_id.clone(), BackupFamily::Database, &path, None, started)
                .await
        }
        .await;

        if let Err(e) = &outcome {
            error!(target: "jobflow::backup", backup_id = %backup_id, error = %e, "database backup failed");
            self.record_failure(&backup_id, BackupFamily::Database, &e.to_string());
        }
        outcome
    }

    fn tarball(path: &Path, directories: &[PathBuf]) -> Result<Vec<String>> {
        let file = std::fs::File::create(path)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut tar = tar::Builder::new(encoder);
        let mut included = Vec::new();
        for dir in directories {
            if !dir.exists() {
                warn!(target: "jobflow::backup", directory = %dir.display(), "directory not found; skipping");
                continue;
            }
            let arcname = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "root".into());
            tar.append_dir_all(&arcname, dir)
                .map_err(|e| CoreError::Backup(format!("tar {}: {}", dir.display(), e)))?;
            debug!(target: "jobflow::backup", directory = %dir.display(), "added to archive");
            included.push(dir.display().to_string());
        }
        tar.into_inner()
            .map_err(|e| CoreError::Backup(format!("tar finish: {}", e)))?
            .finish()?;
        Ok(included)
    }

    /// Archives the configured file directories (resumes, caches, sessions).
    pub async fn backup_files(&self, directories: Option<&[PathBuf]>) -> Result<BackupRecord> {
        let backup_id = format!("files_backup_{}", chrono::Utc::now().format("%Y%m%d_%H%M%S"));
        let started = std::time::Instant::now();
        info!(target: "jobflow::backup", backup_id = %backup_id, "starting files backup");

        let dirs: Vec<PathBuf> = directories.map(<[PathBuf]>::to_vec).unwrap_or_else(|| self.config.file_dirs.clone());
        let outcome: Result<BackupRecord> = async {
            let path = self.artifact_path(BackupFamily::Files, &format!("{}.tar.gz", backup_id));
            let included = Self::tarball(&path, &dirs)?;
            self.finalize(backup_id.clone(), BackupFamily::Files, &path, Some(included), started)
                .await
        }
        .await;

        if let Err(e) = &outcome {
            error!(target: "jobflow::backup", backup_id = %backup_id, error = %e, "files backup failed");
            self.record_failure(&backup_id, BackupFamily::Files, &e.to_string());
        }
        outcome
    }

    /// Archives the configured log directories.
    pub async fn backup_logs(&self) -> Result<BackupRecord> {
        let backup_id = format!("logs_backup_{}", chrono::Utc::now().format("%Y%m%d_%H%M%S"));
        let started = std::time::Instant::now();
        info!(target: "jobflow::backup", backup_id = %backup_id, "starting logs backup");

        let dirs = self.config.log_dirs.clone();
        let outcome: Result<BackupRecord> = async {
            let path = self.artifact_path(BackupFamily::Logs, &format!("{}.tar.gz", backup_id));
            let included = Self::tarball(&path, &dirs)?;
            self.finalize(backup_id.clone(), BackupFamily::Logs, &path, Some(included), started)
                .await
        }
        .await;

        if let Err(e) = &outcome {
            error!(target: "jobflow::backup", backup_id = %backup_id, error = %e, "logs backup failed");
            self.record_failure(&backup_id, BackupFamily::Logs, &e.to_string());
        }
        outcome
    }

    /// Restores the database from a recorded backup. Locates the artifact
    /// locally (falling back to remote), verifies its checksum, and streams
    /// the decompressed dump into the restore engine. A checksum mismatch
    /// aborts before any restore action.
    pub async fn restore_database(&self, backup_id: &str) -> Result<()> {
        info!(target: "jobflow::backup", backup_id, "starting database restore");
        let record: BackupRecord = self
            .store
            .get_json(TREE, backup_id)?
            .ok_or_else(|| CoreError::Backup(format!("backup {} not found", backup_id)))?;
        if record.family != BackupFamily::Database {
            return Err(CoreError::Backup(format!("backup {} is not a database backup", backup_id)));
        }

        let path = self.artifact_path(BackupFamily::Database, &record.filename);
        if !path.exists() {
            if let Some(remote) = &self.remote {
                info!(target: "jobflow::backup", backup_id, "downloading backup from remote storage");
                let bytes = remote.get(BackupFamily::Database.as_str(), &record.filename).await?;
                std::fs::write(&path, bytes)?;
            }
        }
        if !path.exists() {
            return Err(CoreError::Backup(format!("backup file not found: {}", path.display())));
        }

        if file_checksum(&path)? != record.checksum {
            return Err(CoreError::ChecksumMismatch {
                backup_id: backup_id.to_string(),
            });
        }

        let raw = std::fs::read(&path)?;
        let sql = if record.compressed {
            let mut decoder = flate2::read::GzDecoder::new(&raw[..]);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            out
        } else {
            raw
        };

        self.restore_bytes(sql).await?;
        info!(target: "jobflow::backup", backup_id, "database restore completed");
        Ok(())
    }

    /// Recorded backups, newest first, optionally one family.
    pub fn list_backups(&self, family: Option<BackupFamily>) -> Result<Vec<BackupRecord>> {
        let mut records: Vec<BackupRecord> = self
            .store
            .scan_json::<BackupRecord>(TREE, "")?
            .into_iter()
            .map(|(_, r)| r)
            .filter(|r| family.map(|f| r.family == f).unwrap_or(true))
            .collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    /// Deletes local artifacts, remote objects, and records older than each
    /// family's retention window. Also sweeps orphaned artifact files whose
    /// records have already expired.
    pub async fn cleanup_old_backups(&self) -> Result<usize> {
        info!(target: "jobflow::backup", "starting backup cleanup");
        let mut deleted = 0usize;
        let now = chrono::Utc::now();

        for family in BackupFamily::ALL {
            let retention = chrono::Duration::from_std(self.retention(family))
                .unwrap_or_else(|_| chrono::Duration::days(30));
            let cutoff = now - retention;

            for record in self.list_backups(Some(family))? {
                if record.timestamp >= cutoff {
                    continue;
                }
                let path = self.artifact_path(family, &record.filename);
                if path.exists() {
                    std::fs::remove_file(&path)?;
                    let sidecar = Self::sidecar_path(&path);
                    if sidecar.exists() {
                        std::fs::remove_file(sidecar)?;
                    }
                }
                if let (Some(remote), Some(true)) = (&self.remote, record.cloud_uploaded) {
                    if let Err(e) = remote.delete(family.as_str(), &record.filename).await {
                        warn!(target: "jobflow::backup", backup_id = %record.backup_id, error = %e, "remote delete failed");
                    }
                    let _ = remote
                        .delete(family.as_str(), &format!("{}.json", record.filename))
                        .await;
                }
                self.store.remove(TREE, &record.backup_id)?;
                deleted += 1;
                debug!(target: "jobflow::backup", backup_id = %record.backup_id, "deleted old backup");
            }

            // Orphan sweep: artifacts whose record already expired.
            let family_dir = self.config.local_dir.join(family.as_str());
            let max_age = self.retention(family);
            for entry in walkdir::WalkDir::new(&family_dir).into_iter().flatten() {
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(meta) = entry.metadata() else { continue };
                let Ok(modified) = meta.modified() else { continue };
                if modified.elapsed().map(|age| age > max_age).unwrap_or(false) {
                    let _ = std::fs::remove_file(entry.path());
                }
            }
        }

        info!(target: "jobflow::backup", deleted, "backup cleanup finished");
        Ok(deleted)
    }

    /// Dashboard summary of the backup system.
    pub fn status(&self) -> Result<BackupStatus> {
        let records = self.list_backups(None)?;
        let mut counts = std::collections::BTreeMap::new();
        let mut latest = std::collections::BTreeMap::new();
        let mut total_size = 0u64;
        for family in BackupFamily::ALL {
            counts.insert(family.as_str().to_string(), 0);
        }
        for record in &records {
            *counts.entry(record.family.as_str().to_string()).or_insert(0) += 1;
            total_size += record.size_bytes;
            latest
                .entry(record.family.as_str().to_string())
                .or_insert(record.timestamp);
        }
        Ok(BackupStatus {
            total_backups: records.len(),
            backup_counts: counts,
            total_size_mb: (total_size as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0,
            latest_backups: latest,
            cloud_storage_enabled: self.remote.is_some(),
            local_storage_path: self.config.local_dir.clone(),
        })
    }

    /// Runs all three families back to back. Used by the ops CLI path and
    /// tests; the scheduler triggers families individually.
    pub async fn run_full_backup(&self) -> (Option<BackupRecord>, Option<BackupRecord>, Option<BackupRecord>) {
        (
            self.backup_database().await.ok(),
            self.backup_files(None).await.ok(),
            self.backup_logs().await.ok(),
        )
    }
}
