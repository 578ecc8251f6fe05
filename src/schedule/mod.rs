//! Fixed-delay scheduling of ingestion jobs.
//!
//! Each job's cycle runs on a blocking worker; the next delay is only armed once
//! that cycle has returned, so cycles of one job never overlap. Different jobs
//! run as independent tasks and share nothing but the database file.

use tokio::sync::watch;
use tokio::task::{self, JoinHandle};

use crate::error::{FtplogError, Result};
use crate::ingest::{CycleReport, FileOutcome, IngestJob, RecordDecoder, RetryStore};

/// Run one cycle of `job` on the blocking pool and hand the job back.
pub async fn run_cycle_blocking<D, S>(mut job: IngestJob<D, S>) -> Result<(IngestJob<D, S>, CycleReport)>
where
    D: RecordDecoder + 'static,
    S: RetryStore + 'static,
{
    task::spawn_blocking(move || {
        let report = job.run_cycle();
        (job, report)
    })
    .await
    .map_err(|e| FtplogError::Task(format!("scan cycle: {}", e)))
}

/// Run `job` every `job.scan_interval()` (measured from the end of the previous
/// cycle) until `shutdown` flips to `true` or its sender is dropped.
///
/// A cycle in progress always completes. Returns the job so its retry state can
/// be inspected or carried over.
pub async fn run_schedule<D, S>(
    mut job: IngestJob<D, S>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<IngestJob<D, S>>
where
    D: RecordDecoder + 'static,
    S: RetryStore + 'static,
{
    let interval = job.scan_interval();
    log::info!("[{}] scheduler started, delay {:?} between cycles", job.name(), interval);

    loop {
        if *shutdown.borrow() {
            break;
        }

        let (returned, report) = run_cycle_blocking(job).await?;
        job = returned;
        log_cycle(job.name(), &report, job.retry_store().len());

        tokio::select! {
            _ = shutdown.changed() => {}
            _ = tokio::time::sleep(interval) => continue,
        }
        // woken by shutdown (or its sender going away)
        break;
    }

    log::info!("[{}] scheduler stopped", job.name());
    Ok(job)
}

/// Spawn one independent schedule per job.
pub fn spawn_all<D, S>(
    jobs: Vec<IngestJob<D, S>>,
    shutdown: &watch::Receiver<bool>,
) -> Vec<JoinHandle<Result<IngestJob<D, S>>>>
where
    D: RecordDecoder + 'static,
    S: RetryStore + 'static,
{
    jobs.into_iter()
        .map(|job| tokio::spawn(run_schedule(job, shutdown.clone())))
        .collect()
}

fn log_cycle(name: &str, report: &CycleReport, pending_counters: usize) {
    if report.files.is_empty() {
        log::debug!("[{}] cycle: nothing to ingest", name);
        return;
    }

    let deleted = report.count(|o| matches!(o, FileOutcome::Deleted));
    let retry = report.count(|o| matches!(o, FileOutcome::RetryPending(_)));
    let failed = report.count(|o| matches!(o, FileOutcome::Failed(_)));
    let unrouted = report.files.len() - deleted - retry - failed;

    log::info!(
        "[{}] cycle: {} files ({} ingested, {} awaiting retry, {} failed, {} unrouted), {} rows in {:?}; {} counted retries",
        name,
        report.files.len(),
        deleted,
        retry,
        failed,
        unrouted,
        report.rows_committed(),
        report.elapsed,
        pending_counters
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobConfig;
    use crate::db::{schema, Db};
    use crate::ingest::{AuditEvent, FtpAuditDecoder};
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tempfile::TempDir;

    async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check()
    }

    fn setup(name: &str, root: &Path, db: &Db) -> IngestJob<FtpAuditDecoder> {
        let config = JobConfig {
            name: name.to_string(),
            decoder: "ftp_audit".to_string(),
            incoming_path: root.join(name).join("wait"),
            retry_path: root.join(name).join("retry"),
            failed_path: root.join(name).join("failed"),
            file_pattern: "*.log".to_string(),
            scan_interval_ms: 20,
            batch_size: 100,
            max_retries: 2,
            sql_insert: None,
            archive_dir: None,
        };
        IngestJob::from_config(&config, FtpAuditDecoder, db).unwrap()
    }

    fn sink_db(root: &Path) -> Db {
        let db = Db::new(root.join("ftplog.db"));
        let mut conn = db.open_connection().unwrap();
        schema::ensure_table(&mut conn, &schema::FTP_AUDIT_LOG).unwrap();
        db
    }

    fn write_log(path: PathBuf, user: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let line = AuditEvent::now(user, "LOGIN", None, None, "127.0.0.1", false)
            .to_line()
            .unwrap();
        // staged under a non-matching name so a running cycle never sees it half-written
        let staged = path.with_extension("part");
        fs::write(&staged, format!("{}\n", line)).unwrap();
        fs::rename(staged, path).unwrap();
    }

    fn row_count(db: &Db) -> i64 {
        db.open_connection()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM ftp_audit_log", [], |row| row.get(0))
            .unwrap()
    }

    #[tokio::test]
    async fn test_run_cycle_blocking_returns_job() {
        let root = TempDir::new().unwrap();
        let db = sink_db(root.path());
        let job = setup("audit", root.path(), &db);
        write_log(root.path().join("audit/wait/a.log"), "alice");

        let (job, report) = run_cycle_blocking(job).await.unwrap();
        assert_eq!(report.files.len(), 1);
        assert_eq!(job.name(), "audit");
        assert_eq!(row_count(&db), 1);
    }

    #[tokio::test]
    async fn test_schedule_picks_up_late_files_and_stops() {
        let root = TempDir::new().unwrap();
        let db = sink_db(root.path());
        let job = setup("audit", root.path(), &db);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(run_schedule(job, rx));

        write_log(root.path().join("audit/wait/late.log"), "bob");
        let seen = wait_until(Duration::from_secs(5), || row_count(&db) == 1).await;
        assert!(seen, "file dropped after start should be ingested by a later cycle");
        assert!(!root.path().join("audit/wait/late.log").exists());

        tx.send(true).unwrap();
        let job = handle.await.unwrap().unwrap();
        assert!(job.retry_store().is_empty());
    }

    #[tokio::test]
    async fn test_independent_jobs_do_not_share_state() {
        let root = TempDir::new().unwrap();
        let db = sink_db(root.path());
        let jobs = vec![setup("one", root.path(), &db), setup("two", root.path(), &db)];
        let (tx, rx) = watch::channel(false);

        write_log(root.path().join("one/wait/x.log"), "alice");
        write_log(root.path().join("two/wait/x.log"), "bob");

        let handles = spawn_all(jobs, &rx);
        let done = wait_until(Duration::from_secs(5), || row_count(&db) == 2).await;
        assert!(done);

        drop(tx);
        for handle in handles {
            let job = handle.await.unwrap().unwrap();
            assert!(job.retry_store().is_empty());
        }
        assert!(!root.path().join("one/retry/x.log").exists());
        assert!(!root.path().join("two/retry/x.log").exists());
    }
}
