//! Backup round-trip, checksum verification, failure records, and the
//! retention sweep, all against the file-copy dump engine and a temporary
//! store.

use jobflow_core::backup::{BackupFamily, BackupManager, BackupRecord};
use jobflow_core::config::BackupConfig;
use jobflow_core::error::CoreError;
use jobflow_core::store::KvStore;
use std::path::PathBuf;
use std::sync::Arc;

struct Fixture {
    manager: BackupManager,
    store: Arc<KvStore>,
    db_file: PathBuf,
    _dir: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let db_file = dir.path().join("app.db");
    std::fs::write(&db_file, b"1,x\n").unwrap();

    let resumes = dir.path().join("resumes");
    std::fs::create_dir_all(&resumes).unwrap();
    std::fs::write(resumes.join("resume.pdf"), b"pdf bytes").unwrap();

    let logs = dir.path().join("logs");
    std::fs::create_dir_all(&logs).unwrap();
    std::fs::write(logs.join("app.log"), b"log line\n").unwrap();

    let config = BackupConfig {
        local_dir: dir.path().join("backups"),
        file_dirs: vec![resumes],
        log_dirs: vec![logs],
        database_retention_days: 30,
        files_retention_days: 7,
        logs_retention_days: 14,
        remote_base_url: None,
        remote_token: None,
        dump_command: Vec::new(),
        restore_command: Vec::new(),
        database_file: Some(db_file.clone()),
    };
    let store = Arc::new(KvStore::open_temporary().unwrap());
    let manager = BackupManager::new(Arc::clone(&store), config).unwrap();
    Fixture {
        manager,
        store,
        db_file,
        _dir: dir,
    }
}

#[tokio::test]
async fn database_backup_round_trips() {
    let f = fixture();
    let record = f.manager.backup_database().await.unwrap();
    assert_eq!(record.status, "completed");
    assert!(record.compressed);
    assert_eq!(record.checksum.len(), 64);

    // Artifact and sidecar exist; sidecar parses back into the record shape.
    let artifact = f._dir.path().join("backups/database").join(&record.filename);
    assert!(artifact.exists());
    let sidecar: BackupRecord =
        serde_json::from_slice(&std::fs::read(artifact.with_extension("json")).unwrap()).unwrap();
    assert_eq!(sidecar.backup_id, record.backup_id);
    assert_eq!(sidecar.checksum, record.checksum);

    // Clobber the live database, then restore.
    std::fs::write(&f.db_file, b"damage").unwrap();
    f.manager.restore_database(&record.backup_id).await.unwrap();
    assert_eq!(std::fs::read(&f.db_file).unwrap(), b"1,x\n");
}

#[tokio::test]
async fn tampered_backup_fails_checksum_and_restores_nothing() {
    let f = fixture();
    let record = f.manager.backup_database().await.unwrap();

    let artifact = f._dir.path().join("backups/database").join(&record.filename);
    let mut bytes = std::fs::read(&artifact).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    std::fs::write(&artifact, bytes).unwrap();

    std::fs::write(&f.db_file, b"live data").unwrap();
    let err = f.manager.restore_database(&record.backup_id).await.unwrap_err();
    assert!(matches!(err, CoreError::ChecksumMismatch { .. }));
    assert!(err.to_string().contains("checksum mismatch"));
    // No restore action happened.
    assert_eq!(std::fs::read(&f.db_file).unwrap(), b"live data");
}

#[tokio::test]
async fn files_and_logs_backups_record_their_directories() {
    let f = fixture();
    let files = f.manager.backup_files(None).await.unwrap();
    assert_eq!(files.family, BackupFamily::Files);
    assert_eq!(files.directories.as_ref().unwrap().len(), 1);
    assert!(files.size_bytes > 0);

    let logs = f.manager.backup_logs().await.unwrap();
    assert_eq!(logs.family, BackupFamily::Logs);
    assert!(f._dir.path().join("backups/logs").join(&logs.filename).exists());
}

#[tokio::test]
async fn failed_backup_writes_a_failed_record_without_propagating() {
    let dir = tempfile::tempdir().unwrap();
    let config = BackupConfig {
        local_dir: dir.path().join("backups"),
        database_file: None, // no engine at all
        dump_command: Vec::new(),
        restore_command: Vec::new(),
        file_dirs: vec![],
        log_dirs: vec![],
        database_retention_days: 30,
        files_retention_days: 7,
        logs_retention_days: 14,
        remote_base_url: None,
        remote_token: None,
    };
    let store = Arc::new(KvStore::open_temporary().unwrap());
    let manager = BackupManager::new(store, config).unwrap();

    assert!(manager.backup_database().await.is_err());
    let records = manager.list_backups(Some(BackupFamily::Database)).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, "failed");
    assert!(records[0].error.is_some());
}

#[tokio::test]
async fn retention_sweep_deletes_expired_backups() {
    let f = fixture();
    let record = f.manager.backup_database().await.unwrap();
    let artifact = f._dir.path().join("backups/database").join(&record.filename);
    assert!(artifact.exists());

    // Age the record past the 30-day database retention.
    let mut aged = record.clone();
    aged.timestamp = chrono::Utc::now() - chrono::Duration::days(40);
    f.store.put_json("backups", &aged.backup_id, &aged, None).unwrap();

    let deleted = f.manager.cleanup_old_backups().await.unwrap();
    assert_eq!(deleted, 1);
    assert!(!artifact.exists());
    assert!(!artifact.with_extension("json").exists());
    assert!(f.manager.list_backups(Some(BackupFamily::Database)).unwrap().is_empty());
}

#[tokio::test]
async fn status_summarizes_per_family() {
    let f = fixture();
    f.manager.backup_database().await.unwrap();
    f.manager.backup_files(None).await.unwrap();

    let status = f.manager.status().unwrap();
    assert_eq!(status.total_backups, 2);
    assert_eq!(status.backup_counts["database"], 1);
    assert_eq!(status.backup_counts["files"], 1);
    assert_eq!(status.backup_counts["logs"], 0);
    assert!(!status.cloud_storage_enabled);
    assert!(status.latest_backups.contains_key("database"));
}
