//! Batch accumulation and the one-transaction-per-batch committer.

use rusqlite::{params_from_iter, Connection, Transaction};
use std::time::{Duration, Instant};

use super::decoder::DecodedRecord;
use crate::db::Db;
use crate::error::{FtplogError, Result};

/// Rows decoded since the last commit attempt of the current file.
#[derive(Debug)]
pub struct Batch {
    rows: Vec<DecodedRecord>,
    max_rows: usize,
}

impl Batch {
    pub fn new(max_rows: usize) -> Self {
        let max_rows = max_rows.max(1);
        Self {
            rows: Vec::with_capacity(max_rows.min(4096)),
            max_rows,
        }
    }

    /// Append a record; returns `true` once the batch has reached its threshold.
    pub fn push(&mut self, record: DecodedRecord) -> bool {
        self.rows.push(record);
        self.is_full()
    }

    pub fn is_full(&self) -> bool {
        self.rows.len() >= self.max_rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    pub fn rows(&self) -> &[DecodedRecord] {
        &self.rows
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }
}

/// Outcome of one commit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitResult {
    pub success: bool,
    pub rows: usize,
    /// Measured from the start of the file, not the batch.
    pub elapsed: Duration,
}

/// Writes a batch into the sink inside a single transaction.
pub struct BatchCommitter {
    conn: Connection,
    sql: String,
}

impl BatchCommitter {
    /// Open a sink connection and check that `sql` prepares against the current schema.
    pub fn open(db: &Db, sql: impl Into<String>) -> Result<Self> {
        Self::from_connection(db.open_connection()?, sql)
    }

    pub fn from_connection(conn: Connection, sql: impl Into<String>) -> Result<Self> {
        let sql = sql.into();
        conn.prepare_cached(&sql).map_err(|e| {
            FtplogError::Config(format!("insert statement does not prepare: {}: {}", sql, e))
        })?;
        Ok(Self { conn, sql })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Commit everything buffered in `batch`, then clear it whatever the result.
    ///
    /// An empty batch succeeds without touching the sink.
    pub fn commit(&mut self, batch: &mut Batch, file_started: Instant) -> CommitResult {
        let rows = batch.len();
        let outcome = if rows == 0 {
            Ok(())
        } else {
            self.insert_batch(batch.rows())
        };
        batch.clear();

        let elapsed = file_started.elapsed();
        match outcome {
            Ok(()) => {
                if rows > 0 {
                    log::info!(
                        "Commit successful: {} rows; {} ms since file start",
                        rows,
                        elapsed.as_millis()
                    );
                }
                CommitResult { success: true, rows, elapsed }
            }
            Err(e) => {
                log::error!(
                    "Batch of {} rows rolled back: {}; {} ms since file start",
                    rows,
                    e,
                    elapsed.as_millis()
                );
                CommitResult { success: false, rows, elapsed }
            }
        }
    }

    fn insert_batch(&mut self, rows: &[DecodedRecord]) -> Result<()> {
        let tx = self.conn.transaction()?;
        match insert_rows(&tx, &self.sql, rows) {
            Ok(()) => {
                tx.commit()?;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback() {
                    log::warn!("Rollback failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }
}

fn insert_rows(tx: &Transaction<'_>, sql: &str, rows: &[DecodedRecord]) -> Result<()> {
    let mut stmt = tx.prepare_cached(sql)?;
    for row in rows {
        stmt.execute(params_from_iter(row.values()))?;
    }
    Ok(())
}
