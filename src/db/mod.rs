use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;
use tokio::task;
use crate::error::{Result, FtplogError};

/// Sink connection factory. Every job opens its own connection from here.
#[derive(Debug, Clone)]
pub struct Db {
    path: std::path::PathBuf,
    busy_timeout: Duration,
}

impl Db {
    /// Create a new database connection manager
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            path: db_path.as_ref().to_path_buf(),
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// Bound how long a statement waits on a lock held by another job.
    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    /// Open a new database connection with WAL pragmas
    pub fn open_connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)
            .map_err(FtplogError::Database)?;
        configure(&conn, self.busy_timeout)?;
        Ok(conn)
    }

    /// Execute a closure with a database connection in a blocking task
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        task::spawn_blocking(move || {
            let mut conn = db.open_connection()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| FtplogError::Task(format!("database task: {}", e)))?
    }
}

// Several jobs commit against the same file.
fn configure(conn: &Connection, busy_timeout: Duration) -> Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL; \
         PRAGMA synchronous = NORMAL; \
         PRAGMA foreign_keys = ON; \
         PRAGMA temp_store = MEMORY;"
    )?;
    Ok(())
}

pub mod schema;
