//! Outcome routing: what happens to a source file after its last commit.
//!
//! A file's state is where it lives (`incoming`, `retry`, `failed`, or gone)
//! plus an optional attempt count in the [`RetryStore`].

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{FtplogError, Result};

/// Which directory a file was picked up from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    First,
    Retry,
}

impl std::fmt::Display for Pass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pass::First => write!(f, "first-pass"),
            Pass::Retry => write!(f, "retry-pass"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    Unlimited,
    /// Number of retry passes a file gets after its first failure.
    Bounded(u32),
}

impl RetryPolicy {
    /// `-1` is unlimited; other negatives are invalid.
    pub fn from_max_retries(max_retries: i64) -> Option<Self> {
        match max_retries {
            -1 => Some(RetryPolicy::Unlimited),
            n => u32::try_from(n).ok().map(RetryPolicy::Bounded),
        }
    }
}

/// Retry attempt counts keyed by file name.
pub trait RetryStore: Send {
    fn get(&self, file_name: &str) -> Option<u32>;
    fn set(&mut self, file_name: &str, attempts: u32);
    fn remove(&mut self, file_name: &str) -> Option<u32>;
    fn len(&self) -> usize;
    /// Every file name that currently has a counter.
    fn names(&self) -> Vec<String>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local store; counts are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryRetryStore {
    counts: HashMap<String, u32>,
}

impl InMemoryRetryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RetryStore for InMemoryRetryStore {
    fn get(&self, file_name: &str) -> Option<u32> {
        self.counts.get(file_name).copied()
    }

    fn set(&mut self, file_name: &str, attempts: u32) {
        self.counts.insert(file_name.to_string(), attempts);
    }

    fn remove(&mut self, file_name: &str) -> Option<u32> {
        self.counts.remove(file_name)
    }

    fn len(&self) -> usize {
        self.counts.len()
    }

    fn names(&self) -> Vec<String> {
        self.counts.keys().cloned().collect()
    }
}

/// Action chosen for a file. `counter` is the value to store, `None` for uncounted files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Delete,
    MoveToRetry { counter: Option<u32> },
    LeaveInRetry { counter: Option<u32> },
    MoveToFailed,
}

/// Pure routing rule.
///
/// Under `Bounded(max)` the counter holds the retry passes already consumed, so a
/// file that keeps failing is attempted `max + 1` times in total. A retry-pass
/// file without a counter (e.g. after a restart) is treated as having used none.
pub fn decide(pass: Pass, success: bool, policy: RetryPolicy, counter: Option<u32>) -> Decision {
    if success {
        return Decision::Delete;
    }

    match (pass, policy) {
        (Pass::First, RetryPolicy::Unlimited) => Decision::MoveToRetry { counter: None },
        (Pass::First, RetryPolicy::Bounded(0)) => Decision::MoveToFailed,
        (Pass::First, RetryPolicy::Bounded(_)) => Decision::MoveToRetry { counter: Some(0) },
        (Pass::Retry, RetryPolicy::Unlimited) => Decision::LeaveInRetry { counter: None },
        (Pass::Retry, RetryPolicy::Bounded(max)) => {
            let used = counter.unwrap_or(0).saturating_add(1);
            if used >= max {
                Decision::MoveToFailed
            } else {
                Decision::LeaveInRetry { counter: Some(used) }
            }
        }
    }
}

/// Where a file ended up after routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Deleted,
    RetryPending(PathBuf),
    Failed(PathBuf),
}

/// Applies [`decide`] to the filesystem and the retry store.
pub struct OutcomeRouter<S: RetryStore = InMemoryRetryStore> {
    retry_dir: PathBuf,
    failed_dir: PathBuf,
    policy: RetryPolicy,
    store: S,
}

impl<S: RetryStore> OutcomeRouter<S> {
    pub fn new(retry_dir: impl Into<PathBuf>, failed_dir: impl Into<PathBuf>, policy: RetryPolicy, store: S) -> Self {
        Self {
            retry_dir: retry_dir.into(),
            failed_dir: failed_dir.into(),
            policy,
            store,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Drop the counter of a retry file that left the retry directory on its own.
    pub fn forget(&mut self, path: &Path) -> Option<u32> {
        let file_name = path.file_name()?.to_string_lossy().into_owned();
        self.store.remove(&file_name)
    }

    /// Drop counters whose file is not among `present` (a fresh retry listing).
    pub fn prune(&mut self, present: &[PathBuf]) -> usize {
        let mut pruned = 0;
        for name in self.store.names() {
            let listed = present
                .iter()
                .any(|p| p.file_name().map(|n| n.to_string_lossy() == name.as_str()).unwrap_or(false));
            if !listed {
                self.store.remove(&name);
                pruned += 1;
            }
        }
        pruned
    }

    /// Route `path` after its last commit.
    ///
    /// The store is only updated once the filesystem step succeeded, so a
    /// counter never outlives the file's presence in the retry directory.
    pub fn route(&mut self, path: &Path, pass: Pass, success: bool) -> Result<FileOutcome> {
        let file_name = file_name(path)?;
        let decision = decide(pass, success, self.policy, self.store.get(&file_name));
        log::debug!("{} {} (success={}): {:?}", pass, file_name, success, decision);

        match decision {
            Decision::Delete => {
                match fs::remove_file(path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        log::warn!("{} already gone before delete", path.display());
                    }
                    Err(e) => return Err(FtplogError::Io(e)),
                }
                // an incoming namesake must not reset a counted file still in retry
                if pass == Pass::Retry {
                    self.store.remove(&file_name);
                }
                log::info!("Deleted {} after successful ingestion", path.display());
                Ok(FileOutcome::Deleted)
            }
            Decision::MoveToRetry { counter } => {
                let target = relocate(path, &self.retry_dir)?;
                if let Some(c) = counter {
                    self.store.set(&file_name, c);
                }
                log::warn!("Moved {} to retry: {}", file_name, target.display());
                Ok(FileOutcome::RetryPending(target))
            }
            Decision::LeaveInRetry { counter } => {
                if let Some(c) = counter {
                    self.store.set(&file_name, c);
                    log::warn!("{} failed again, retry {} used", file_name, c);
                } else {
                    log::warn!("{} failed again, will retry next cycle", file_name);
                }
                Ok(FileOutcome::RetryPending(path.to_path_buf()))
            }
            Decision::MoveToFailed => {
                let target = relocate(path, &self.failed_dir)?;
                if pass == Pass::Retry {
                    self.store.remove(&file_name);
                }
                log::error!(
                    "Retries exhausted for {}, moved to {}",
                    file_name,
                    target.display()
                );
                Ok(FileOutcome::Failed(target))
            }
        }
    }
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| FtplogError::Config(format!("not a file path: {}", path.display())))
}

/// Move `path` into `dir` under the same name.
///
/// A plain rename: it fails (rather than copying) across filesystems, and an
/// existing file at the target is an error, not an overwrite.
pub fn relocate(path: &Path, dir: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| FtplogError::Config(format!("not a file path: {}", path.display())))?;
    let target = dir.join(name);

    let fail = |source: io::Error| FtplogError::Relocate {
        from: path.to_path_buf(),
        to: target.clone(),
        source,
    };

    fs::create_dir_all(dir).map_err(fail)?;
    if target.exists() {
        return Err(fail(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "target already exists",
        )));
    }
    fs::rename(path, &target).map_err(fail)?;

    Ok(target)
}
