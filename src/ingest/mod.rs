//! File-queue ingestion: scan → read → decode → batch → commit → route.

pub mod archive;
pub mod audit;
pub mod batch;
pub mod decoder;
pub mod job;
pub mod reader;
pub mod router;
pub mod scanner;

pub use archive::{DayArchive, LOGS_OF_DAY_TARGET};
pub use audit::{AuditEvent, FtpAuditDecoder, FTP_AUDIT_INSERT, TIMESTAMP_FORMAT};
pub use batch::{Batch, BatchCommitter, CommitResult};
pub use decoder::{DecodedRecord, DecoderRegistry, FnDecoder, RecordDecoder};
pub use job::{CycleReport, FileReport, IngestJob};
pub use reader::{FileDriver, ReadSummary};
pub use router::{
    decide, relocate, Decision, FileOutcome, InMemoryRetryStore, OutcomeRouter, Pass, RetryPolicy,
    RetryStore,
};
pub use scanner::scan_dir;
