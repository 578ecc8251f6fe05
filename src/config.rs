use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::FtplogError;
use crate::ingest::{DecoderRegistry, RetryPolicy};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub ftplog: FtplogConfig,
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

/// Process-wide settings shared by every job
#[derive(Debug, Clone, Deserialize)]
pub struct FtplogConfig {
    pub db_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// How long a commit waits on a locked database before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

/// One ingestion job: a queue of directories drained into one insert statement.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    pub name: String,
    #[serde(default = "default_decoder")]
    pub decoder: String,
    pub incoming_path: PathBuf,
    pub retry_path: PathBuf,
    pub failed_path: PathBuf,
    pub file_pattern: String,
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// `-1` retries forever.
    #[serde(default = "default_max_retries")]
    pub max_retries: i64,
    /// Overrides the decoder's built-in insert statement.
    #[serde(default)]
    pub sql_insert: Option<String>,
    /// Where first-pass lines are archived per day, if anywhere.
    #[serde(default)]
    pub archive_dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_decoder() -> String {
    "ftp_audit".to_string()
}

fn default_scan_interval_ms() -> u64 {
    5000
}

fn default_batch_size() -> usize {
    500
}

fn default_max_retries() -> i64 {
    -1
}

impl JobConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    /// Interpret `max_retries`; anything below `-1` is rejected.
    pub fn retry_policy(&self) -> crate::error::Result<RetryPolicy> {
        RetryPolicy::from_max_retries(self.max_retries).ok_or_else(|| {
            FtplogError::Config(format!(
                "jobs.{}.max_retries must be -1 (unlimited) or >= 0, got {}",
                self.name, self.max_retries
            ))
        })
    }

    fn validate(&self, decoders: &DecoderRegistry) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("every [[jobs]] entry needs a non-empty name");
        }

        for (key, path) in [
            ("incoming_path", &self.incoming_path),
            ("retry_path", &self.retry_path),
            ("failed_path", &self.failed_path),
        ] {
            if path.as_os_str().is_empty() {
                anyhow::bail!("jobs.{}.{} must not be empty", self.name, key);
            }
        }

        if self.incoming_path == self.retry_path
            || self.incoming_path == self.failed_path
            || self.retry_path == self.failed_path
        {
            anyhow::bail!(
                "jobs.{}: incoming_path, retry_path and failed_path must be different directories",
                self.name
            );
        }

        if self.file_pattern.trim().is_empty() {
            anyhow::bail!("jobs.{}.file_pattern must not be empty", self.name);
        }
        glob::Pattern::new(&self.file_pattern)
            .with_context(|| format!("jobs.{}.file_pattern is not a valid glob", self.name))?;

        if self.batch_size == 0 {
            anyhow::bail!("jobs.{}.batch_size must be greater than 0", self.name);
        }

        if self.scan_interval_ms == 0 {
            anyhow::bail!("jobs.{}.scan_interval_ms must be greater than 0", self.name);
        }

        self.retry_policy()?;

        let decoder = decoders.get(&self.decoder).ok_or_else(|| {
            anyhow::anyhow!(
                "jobs.{}.decoder '{}' is unknown (available: {})",
                self.name,
                self.decoder,
                decoders.names().join(", ")
            )
        })?;

        if self.sql_insert.is_none() && decoder.default_sql().is_none() {
            anyhow::bail!(
                "jobs.{}.sql_insert is required: decoder '{}' has no built-in statement",
                self.name,
                self.decoder
            );
        }

        Ok(())
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in FTPLOG_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        let _ = dotenv::dotenv();

        let config_path = std::env::var("FTPLOG_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        Self::from_file(&config_path)
    }

    /// Load and validate a specific config file
    pub fn from_file(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        Self::from_toml(&config_str)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))
    }

    pub fn from_toml(config_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(config_str).context("Failed to parse config.toml")?;
        config.validate(&DecoderRegistry::new())?;
        Ok(config)
    }

    /// Validate configuration values against the decoders this build knows about
    pub fn validate(&self, decoders: &DecoderRegistry) -> Result<()> {
        if self.ftplog.db_path.as_os_str().is_empty() {
            anyhow::bail!("ftplog.db_path must not be empty");
        }

        if self.jobs.is_empty() {
            anyhow::bail!("at least one [[jobs]] entry is required");
        }

        let mut names = HashSet::new();
        for job in &self.jobs {
            job.validate(decoders)?;
            if !names.insert(job.name.as_str()) {
                anyhow::bail!("duplicate job name: {}", job.name);
            }
        }

        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        &self.ftplog.db_path
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.ftplog.busy_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serialize tests that mutate FTPLOG_CONFIG so they don't race.
    static CONFIG_TEST_LOCK: Mutex<()> = Mutex::new(());

    fn job_toml(extra: &str) -> String {
        format!(
            r#"
[ftplog]
db_path = "./test.db"
log_level = "debug"

[[jobs]]
name = "ftp_audit"
incoming_path = "/var/ftplog/wait"
retry_path = "/var/ftplog/retry"
failed_path = "/var/ftplog/failed"
file_pattern = "*.log"
{}
"#,
            extra
        )
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::from_toml(&job_toml("")).unwrap();
        assert_eq!(config.ftplog.log_level, "debug");
        assert_eq!(config.busy_timeout(), Duration::from_secs(5));

        let job = &config.jobs[0];
        assert_eq!(job.decoder, "ftp_audit");
        assert_eq!(job.batch_size, 500);
        assert_eq!(job.scan_interval(), Duration::from_secs(5));
        assert_eq!(job.retry_policy().unwrap(), RetryPolicy::Unlimited);
        assert!(job.sql_insert.is_none());
        assert!(job.archive_dir.is_none());
    }

    #[test]
    fn test_config_bounded_retries() {
        let config = Config::from_toml(&job_toml("max_retries = 3\nbatch_size = 10")).unwrap();
        assert_eq!(config.jobs[0].retry_policy().unwrap(), RetryPolicy::Bounded(3));
        assert_eq!(config.jobs[0].batch_size, 10);
    }

    #[test]
    fn test_config_rejects_bad_values() {
        let cases = [
            ("max_retries = -2", "max_retries"),
            ("batch_size = 0", "batch_size"),
            ("scan_interval_ms = 0", "scan_interval_ms"),
            ("decoder = \"csv\"", "decoder"),
        ];
        for (extra, needle) in cases {
            let err = Config::from_toml(&job_toml(extra)).unwrap_err();
            assert!(
                format!("{:#}", err).contains(needle),
                "expected '{}' in error for '{}', got: {:#}",
                needle,
                extra,
                err
            );
        }
    }

    #[test]
    fn test_config_rejects_invalid_glob() {
        let toml = job_toml("").replace("\"*.log\"", "\"[.log\"");
        let err = Config::from_toml(&toml).unwrap_err();
        assert!(format!("{:#}", err).contains("file_pattern"));
    }

    #[test]
    fn test_config_rejects_shared_directories() {
        let toml = job_toml("").replace("/var/ftplog/retry", "/var/ftplog/wait");
        let err = Config::from_toml(&toml).unwrap_err();
        assert!(err.to_string().contains("different directories"));
    }

    #[test]
    fn test_config_requires_a_job() {
        let err = Config::from_toml("[ftplog]\ndb_path = \"x.db\"\n").unwrap_err();
        assert!(err.to_string().contains("[[jobs]]"));
    }

    #[test]
    fn test_config_rejects_missing_pattern_field() {
        let toml = job_toml("").replace("file_pattern = \"*.log\"", "");
        assert!(Config::from_toml(&toml).is_err());
    }

    #[test]
    fn test_config_rejects_duplicate_job_names() {
        let mut toml = job_toml("");
        toml.push_str(
            r#"
[[jobs]]
name = "ftp_audit"
incoming_path = "/other/wait"
retry_path = "/other/retry"
failed_path = "/other/failed"
file_pattern = "*.log"
"#,
        );
        let err = Config::from_toml(&toml).unwrap_err();
        assert!(err.to_string().contains("duplicate job name"));
    }

    #[test]
    fn test_config_load_from_env_path() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, job_toml("max_retries = 1")).unwrap();

        let original = std::env::var("FTPLOG_CONFIG").ok();
        std::env::set_var("FTPLOG_CONFIG", &config_path);
        let config = Config::load();
        std::env::remove_var("FTPLOG_CONFIG");
        if let Some(v) = original {
            std::env::set_var("FTPLOG_CONFIG", v);
        }

        let config = config.unwrap();
        assert_eq!(config.jobs.len(), 1);
        assert_eq!(config.jobs[0].max_retries, 1);
    }

    #[test]
    fn test_config_invalid_path() {
        let err = Config::from_file(Path::new("nonexistent.toml")).unwrap_err();
        assert!(err.to_string().contains("nonexistent.toml"));
    }
}
