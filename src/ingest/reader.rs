use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Instant;

use super::archive::{DayArchive, LOGS_OF_DAY_TARGET};
use super::batch::{Batch, BatchCommitter, CommitResult};
use super::decoder::RecordDecoder;
use super::router::Pass;
use crate::error::Result;

/// What one pass over a file did, before routing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadSummary {
    pub lines: usize,
    pub decoded: usize,
    pub skipped: usize,
    /// Every commit attempt, including the end-of-file flush.
    pub commits: usize,
    pub rows_committed: usize,
    /// The result the file is routed on.
    pub last_commit: Option<CommitResult>,
    /// Set when reading stopped before end-of-file.
    pub read_error: Option<String>,
}

impl ReadSummary {
    pub fn succeeded(&self) -> bool {
        self.read_error.is_none() && self.last_commit.map(|c| c.success).unwrap_or(false)
    }
}

/// Streams one file through decoder, batch and committer.
pub struct FileDriver<'a, D: RecordDecoder> {
    pub decoder: &'a D,
    pub batch: &'a mut Batch,
    pub committer: &'a mut BatchCommitter,
    pub archive: Option<&'a mut DayArchive>,
}

impl<'a, D: RecordDecoder> FileDriver<'a, D> {
    /// Read `path` to the end, flushing at the batch threshold and once more at EOF.
    ///
    /// Only failing to open the file is an error. A read error part-way through
    /// discards the buffered rows and is reported in the summary so the file is
    /// routed as failed.
    pub fn drive(&mut self, path: &Path, pass: Pass) -> Result<ReadSummary> {
        let started = Instant::now();
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        // A batch never spans files.
        self.batch.clear();

        let mut summary = ReadSummary::default();
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    log::error!("Read failed for {} after {} lines: {}", path.display(), summary.lines, e);
                    summary.read_error = Some(e.to_string());
                    self.batch.clear();
                    return Ok(summary);
                }
            }
            summary.lines += 1;

            trim_line_ending(&mut buf);
            let line = match std::str::from_utf8(&buf) {
                Ok(line) => line,
                Err(e) => {
                    log::warn!("{}:{}: not valid UTF-8, skipped: {}", path.display(), summary.lines, e);
                    summary.skipped += 1;
                    continue;
                }
            };

            if pass == Pass::First {
                self.echo(line);
            }

            match self.decoder.decode(line) {
                Ok(Some(record)) => {
                    summary.decoded += 1;
                    if self.batch.push(record) {
                        log::debug!("Batch threshold {} reached in {}", self.batch.max_rows(), path.display());
                        let result = self.committer.commit(self.batch, started);
                        record_commit(&mut summary, result);
                    }
                }
                Ok(None) => {
                    log::debug!("{}:{}: blank line", path.display(), summary.lines);
                }
                Err(e) => {
                    log::warn!("{}:{}: {}", path.display(), summary.lines, e);
                    summary.skipped += 1;
                }
            }
        }

        let result = self.committer.commit(self.batch, started);
        record_commit(&mut summary, result);

        if let Some(archive) = self.archive.as_deref_mut() {
            if let Err(e) = archive.flush() {
                log::error!("Day archive flush failed: {}", e);
            }
        }

        Ok(summary)
    }

    fn echo(&mut self, line: &str) {
        log::info!(target: LOGS_OF_DAY_TARGET, "{}", line);
        if let Some(archive) = self.archive.as_deref_mut() {
            if let Err(e) = archive.append(line) {
                log::error!("Day archive write failed: {}", e);
            }
        }
    }
}

// A zero-row flush does not replace the result of an earlier real commit, so a
// failed batch followed by an empty EOF flush still routes the file as failed.
fn record_commit(summary: &mut ReadSummary, result: CommitResult) {
    summary.commits += 1;
    if result.success {
        summary.rows_committed += result.rows;
    }
    if result.rows > 0 || summary.last_commit.is_none() {
        summary.last_commit = Some(result);
    }
}

fn trim_line_ending(buf: &mut Vec<u8>) {
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
}
