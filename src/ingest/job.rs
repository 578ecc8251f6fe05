//! One ingestion job: a decoder and an insert statement driven over a directory queue.

use glob::Pattern;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::archive::DayArchive;
use super::batch::{Batch, BatchCommitter};
use super::decoder::RecordDecoder;
use super::reader::{FileDriver, ReadSummary};
use super::router::{FileOutcome, InMemoryRetryStore, OutcomeRouter, Pass, RetryStore};
use super::scanner::scan_dir;
use crate::config::JobConfig;
use crate::db::Db;
use crate::error::{FtplogError, Result};

/// Result of processing one source file.
#[derive(Debug, Clone)]
pub struct FileReport {
    pub path: PathBuf,
    pub pass: Pass,
    pub summary: ReadSummary,
    /// `None` when the file vanished before it was opened or routing failed.
    pub outcome: Option<FileOutcome>,
}

/// Result of one scan cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub files: Vec<FileReport>,
    pub elapsed: Duration,
}

impl CycleReport {
    pub fn rows_committed(&self) -> usize {
        self.files.iter().map(|f| f.summary.rows_committed).sum()
    }

    pub fn count(&self, f: impl Fn(&FileOutcome) -> bool) -> usize {
        self.files
            .iter()
            .filter(|r| r.outcome.as_ref().map(&f).unwrap_or(false))
            .count()
    }
}

pub struct IngestJob<D: RecordDecoder, S: RetryStore = InMemoryRetryStore> {
    name: String,
    incoming_dir: PathBuf,
    retry_dir: PathBuf,
    pattern: Pattern,
    scan_interval: Duration,
    decoder: D,
    batch: Batch,
    committer: BatchCommitter,
    router: OutcomeRouter<S>,
    archive: Option<DayArchive>,
}

impl<D: RecordDecoder> IngestJob<D, InMemoryRetryStore> {
    /// Build a job from its config section, opening its own sink connection.
    pub fn from_config(config: &JobConfig, decoder: D, db: &Db) -> Result<Self> {
        let sql = config
            .sql_insert
            .clone()
            .or_else(|| decoder.default_sql().map(str::to_string))
            .ok_or_else(|| {
                FtplogError::Config(format!(
                    "job {}: no sql_insert and decoder '{}' has no default",
                    config.name,
                    decoder.name()
                ))
            })?;
        let committer = BatchCommitter::open(db, sql)?;
        Self::with_store(config, decoder, committer, InMemoryRetryStore::new())
    }
}

impl<D: RecordDecoder, S: RetryStore> IngestJob<D, S> {
    /// Build a job around an existing committer and retry store.
    pub fn with_store(config: &JobConfig, decoder: D, committer: BatchCommitter, store: S) -> Result<Self> {
        let policy = config.retry_policy()?;
        if config.batch_size == 0 {
            return Err(FtplogError::Config(format!("job {}: batch_size must be > 0", config.name)));
        }

        Ok(Self {
            name: config.name.clone(),
            incoming_dir: config.incoming_path.clone(),
            retry_dir: config.retry_path.clone(),
            pattern: Pattern::new(&config.file_pattern)?,
            scan_interval: config.scan_interval(),
            decoder,
            batch: Batch::new(config.batch_size),
            committer,
            router: OutcomeRouter::new(&config.retry_path, &config.failed_path, policy, store),
            archive: config.archive_dir.as_ref().map(DayArchive::new),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scan_interval(&self) -> Duration {
        self.scan_interval
    }

    pub fn retry_store(&self) -> &S {
        self.router.store()
    }

    /// One scan cycle: every matching file in `incoming`, then every one in `retry`.
    ///
    /// The retry directory is listed before any incoming file is processed, so a
    /// file that fails its first pass waits at least one interval before its
    /// first retry. Filesystem errors are logged per file or directory and never
    /// abort the cycle.
    pub fn run_cycle(&mut self) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport::default();

        let incoming = self.scan(&self.incoming_dir);
        let retry = match scan_dir(&self.retry_dir, &self.pattern) {
            Ok(files) => {
                let pruned = self.router.prune(&files);
                if pruned > 0 {
                    log::warn!("[{}] dropped {} counter(s) for files no longer in retry", self.name, pruned);
                }
                files
            }
            Err(e) => {
                log::error!("[{}] scan of {} failed: {}", self.name, self.retry_dir.display(), e);
                Vec::new()
            }
        };

        for (files, pass) in [(incoming, Pass::First), (retry, Pass::Retry)] {
            for path in files {
                report.files.push(self.process_file(&path, pass));
            }
        }

        report.elapsed = started.elapsed();
        report
    }

    fn scan(&self, dir: &Path) -> Vec<PathBuf> {
        scan_dir(dir, &self.pattern).unwrap_or_else(|e| {
            log::error!("[{}] scan of {} failed: {}", self.name, dir.display(), e);
            Vec::new()
        })
    }

    /// Read, commit and route a single file.
    pub fn process_file(&mut self, path: &Path, pass: Pass) -> FileReport {
        log::info!("[{}] processing {} file {}", self.name, pass, path.display());

        let mut driver = FileDriver {
            decoder: &self.decoder,
            batch: &mut self.batch,
            committer: &mut self.committer,
            archive: self.archive.as_mut(),
        };

        let summary = match driver.drive(path, pass) {
            Ok(summary) => summary,
            Err(FtplogError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("[{}] {} disappeared before it was read", self.name, path.display());
                if pass == Pass::Retry {
                    self.router.forget(path);
                }
                return FileReport {
                    path: path.to_path_buf(),
                    pass,
                    summary: ReadSummary::default(),
                    outcome: None,
                };
            }
            Err(e) => {
                log::error!("[{}] cannot read {}: {}", self.name, path.display(), e);
                ReadSummary {
                    read_error: Some(e.to_string()),
                    ..ReadSummary::default()
                }
            }
        };

        let outcome = match self.router.route(path, pass, summary.succeeded()) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                log::error!("[{}] routing {} failed: {}", self.name, path.display(), e);
                None
            }
        };

        log::info!(
            "[{}] {}: {} lines, {} decoded, {} skipped, {} commits, {} rows -> {:?}",
            self.name,
            path.display(),
            summary.lines,
            summary.decoded,
            summary.skipped,
            summary.commits,
            summary.rows_committed,
            outcome
        );

        FileReport {
            path: path.to_path_buf(),
            pass,
            summary,
            outcome,
        }
    }
}
