//! Day log: raw first-pass lines kept per calendar day, before any decoding.

use chrono::NaiveDate;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

use crate::error::Result;

/// Log target every first-pass line is echoed on.
pub const LOGS_OF_DAY_TARGET: &str = "logs_of_day";

const FILE_PREFIX: &str = "logs-of-day";
const FILE_SUFFIX: &str = "log";

/// Appends lines to `<dir>/logs-of-day.YYYY-MM-DD.log`, rolling over at UTC midnight.
///
/// The file is opened on the first line, so a job that never sees a first pass
/// never touches `dir`.
pub struct DayArchive {
    dir: PathBuf,
    writer: Option<RollingFileAppender>,
}

impl DayArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            writer: None,
        }
    }

    pub fn path_for(&self, day: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{}.{}.{}", FILE_PREFIX, day.format("%Y-%m-%d"), FILE_SUFFIX))
    }

    pub fn append(&mut self, line: &str) -> Result<()> {
        if self.writer.is_none() {
            self.writer = Some(open_appender(&self.dir)?);
        }
        if let Some(writer) = self.writer.as_mut() {
            // one write per line so a rollover never splits it
            writer.write_all(format!("{}\n", line).as_bytes())?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

fn open_appender(dir: &Path) -> Result<RollingFileAppender> {
    fs::create_dir_all(dir)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(FILE_PREFIX)
        .filename_suffix(FILE_SUFFIX)
        .build(dir)?;
    log::debug!("Day archive opened in {}", dir.display());
    Ok(appender)
}
