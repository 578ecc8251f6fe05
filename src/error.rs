use std::path::PathBuf;
use thiserror::Error;

/// Main error type for ftplog
#[derive(Error, Debug)]
pub enum FtplogError {
    /// Sink (SQLite) errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A single line could not be decoded into a record
    #[error("Decode error: {0}")]
    Decode(String),

    /// Invalid file name glob
    #[error("Invalid file pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    /// A blocking worker panicked or was cancelled
    #[error("Task failed: {0}")]
    Task(String),

    /// The day archive could not be opened
    #[error("Archive error: {0}")]
    Archive(#[from] tracing_appender::rolling::InitError),

    /// Moving a source file between queue directories failed
    #[error("Failed to move {} to {}: {source}", from.display(), to.display())]
    Relocate {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Convenient Result type using FtplogError
pub type Result<T> = std::result::Result<T, FtplogError>;
