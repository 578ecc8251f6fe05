pub mod config;
pub mod error;
pub mod db;
pub mod ingest;
pub mod schedule;

pub use config::Config;
pub use error::{FtplogError, Result};
