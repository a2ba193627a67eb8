//! Platform configuration. Load from TOML or env.
//!
//! Layered through `config::Config::builder()`: compiled defaults, then an
//! optional `jobflow.toml` (a partial file overrides only the keys it
//! names), then `JOBFLOW_*` environment variables. Numeric limits are
//! deployment-dependent; the defaults below mirror a small single-node
//! install. Change behavior without code edits.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Core configuration shared by the queue, limiter, quota manager, and
/// backup subsystem.
///
/// Nested backup keys use a double-underscore separator in the environment
/// (`JOBFLOW_BACKUP__LOCAL_DIR` -> `backup.local_dir`).
///
/// | Env | Default | Description |
/// |-----|---------|-------------|
/// | JOBFLOW_CONFIG | jobflow.toml | config file path |
/// | JOBFLOW_DATA_PATH | ./data/jobflow | sled store location |
/// | JOBFLOW_MAX_WORKERS | 5 | queue worker slots |
/// | JOBFLOW_MAX_CONCURRENT_PER_USER | 2 | queued+running jobs per user |
/// | JOBFLOW_RESUME_TAILORING_PER_DAY | 5 | per-user daily cap |
/// | JOBFLOW_APPLICATIONS_PER_DAY | 20 | per-user daily cap |
/// | JOBFLOW_JOB_SEARCH_PER_DAY | 10 | per-user daily cap |
/// | JOBFLOW_CONCURRENT_APPLICATIONS | 2 | concurrent browser sessions per user |
/// | JOBFLOW_GEMINI_REQUESTS_PER_MINUTE | 60 | provider quota |
/// | JOBFLOW_GEMINI_REQUESTS_PER_DAY | 1500 | provider quota |
/// | JOBFLOW_QUOTA_HEADROOM | 2 | overcommit margin for priority 1-2 |
/// | JOBFLOW_BACKUP__LOCAL_DIR | ./backups | local backup root |
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub data_path: PathBuf,
    pub max_workers: usize,
    pub max_concurrent_per_user: usize,

    pub resume_tailoring_per_day: u64,
    pub applications_per_day: u64,
    pub job_search_per_day: u64,
    pub concurrent_applications: u64,

    pub gemini_requests_per_minute: u64,
    pub gemini_requests_per_day: u64,
    /// Extra per-minute admissions allowed for priority 1-2 callers.
    pub quota_headroom: u64,

    pub backup: BackupConfig,
}

/// Backup subsystem configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub local_dir: PathBuf,
    /// Directories included in the `files` family.
    pub file_dirs: Vec<PathBuf>,
    /// Directories included in the `logs` family.
    pub log_dirs: Vec<PathBuf>,
    pub database_retention_days: u64,
    pub files_retention_days: u64,
    pub logs_retention_days: u64,
    /// Remote object store base URL (PUT/GET/DELETE `{base}/{family}/{name}`).
    /// Unset disables cloud upload.
    pub remote_base_url: Option<String>,
    pub remote_token: Option<String>,
    /// External dump command, e.g. `pg_dump --clean --no-owner mydb`.
    /// Empty uses the file-copy engine against `database_file`.
    pub dump_command: Vec<String>,
    /// External restore command reading SQL on stdin, e.g. `psql mydb`.
    pub restore_command: Vec<String>,
    /// Database file for the file-copy engine (sqlite-style deployments).
    pub database_file: Option<PathBuf>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            local_dir: PathBuf::from("./backups"),
            file_dirs: vec![
                PathBuf::from("./resumes"),
                PathBuf::from("./cache"),
                PathBuf::from("./sessions"),
            ],
            log_dirs: vec![PathBuf::from("./logs")],
            database_retention_days: 30,
            files_retention_days: 7,
            logs_retention_days: 14,
            remote_base_url: None,
            remote_token: None,
            dump_command: Vec::new(),
            restore_command: Vec::new(),
            database_file: None,
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("./data/jobflow"),
            max_workers: 5,
            max_concurrent_per_user: 2,
            resume_tailoring_per_day: 5,
            applications_per_day: 20,
            job_search_per_day: 10,
            concurrent_applications: 2,
            gemini_requests_per_minute: 60,
            gemini_requests_per_day: 1500,
            quota_headroom: 2,
            backup: BackupConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Load config from file and environment. Precedence: `JOBFLOW_*` env >
    /// file named by `JOBFLOW_CONFIG` (default `jobflow.toml`) > defaults.
    pub fn load() -> crate::error::Result<Self> {
        let config_path = std::env::var("JOBFLOW_CONFIG").unwrap_or_else(|_| "jobflow.toml".to_string());
        Self::load_from(Path::new(&config_path))
    }

    /// Load with an explicit config file path. A missing file is fine; a
    /// partial file overrides only the keys it names.
    pub fn load_from(path: &Path) -> crate::error::Result<Self> {
        let build = || -> Result<Self, config::ConfigError> {
            let builder = config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

            let builder = if path.exists() {
                builder.add_source(config::File::from(path))
            } else {
                builder
            };

            let built = builder
                .add_source(
                    config::Environment::with_prefix("JOBFLOW")
                        .separator("__")
                        .try_parsing(true)
                        .list_separator(",")
                        .with_list_parse_key("backup.file_dirs")
                        .with_list_parse_key("backup.log_dirs")
                        .with_list_parse_key("backup.dump_command")
                        .with_list_parse_key("backup.restore_command"),
                )
                .build()?;

            built.try_deserialize()
        };
        build().map_err(|e| crate::error::CoreError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = CoreConfig::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(cfg.max_workers, 5);
        assert_eq!(cfg.backup.database_retention_days, 30);
    }

    #[test]
    fn partial_file_overrides_only_named_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobflow.toml");
        std::fs::write(
            &path,
            "max_workers = 9\n\n[backup]\nlocal_dir = \"/var/backups/jobflow\"\n",
        )
        .unwrap();

        let cfg = CoreConfig::load_from(&path).unwrap();
        // Named keys take the file's values.
        assert_eq!(cfg.max_workers, 9);
        assert_eq!(cfg.backup.local_dir, PathBuf::from("/var/backups/jobflow"));
        // Everything the file omits keeps its default.
        assert_eq!(cfg.max_concurrent_per_user, 2);
        assert_eq!(cfg.gemini_requests_per_minute, 60);
        assert_eq!(cfg.backup.files_retention_days, 7);
        assert_eq!(cfg.backup.file_dirs.len(), 3);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobflow.toml");
        std::fs::write(&path, "max_workers = \"many\"\n").unwrap();
        assert!(matches!(
            CoreConfig::load_from(&path),
            Err(crate::error::CoreError::Config(_))
        ));
    }
}
