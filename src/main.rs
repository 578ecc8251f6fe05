use anyhow::Result;
use clap::{Parser, Subcommand};
use ftplog::db::schema::{self, SinkTable};
use ftplog::db::Db;
use ftplog::error::FtplogError;
use ftplog::ingest::{DecoderRegistry, FileOutcome, IngestJob, RecordDecoder, RetryStore};
use ftplog::schedule;
use ftplog::Config;
use std::path::PathBuf;
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(name = "ftplog")]
#[command(version, about = "Drain FTP audit log files into SQLite through a durable file queue")]
struct Args {
    /// Config file (defaults to $FTPLOG_CONFIG, then ./config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every job on its schedule until Ctrl+C (default)
    Run,
    /// Run a single scan cycle per job and exit
    Once,
    /// Check the sink database schema and exit
    Verify,
}

type Job = IngestJob<Box<dyn RecordDecoder>>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            let _ = dotenv::dotenv();
            Config::from_file(path)?
        }
        None => Config::load()?,
    };

    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", config.ftplog.log_level.as_str())
    ).init();

    log::info!("Starting ftplog v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Database path: {}", config.db_path().display());

    let db = Db::new(config.db_path()).with_busy_timeout(config.busy_timeout());
    let tables = sink_tables(&config)?;
    let bootstrap_tables = tables.clone();
    let created = db.with_connection(move |conn| {
        schema::bootstrap(conn, &bootstrap_tables)
    }).await?;
    log::info!("Database initialized ({} sink table(s) created)", created.len());

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run_scheduled(&config, &db).await?,
        Command::Once => run_once(&config, &db).await?,
        Command::Verify => verify_database_schema(&db, tables).await?,
    }

    Ok(())
}

/// Tables behind the built-in statements of every configured decoder.
fn sink_tables(config: &Config) -> Result<Vec<SinkTable>> {
    let decoders = DecoderRegistry::new();
    let mut tables = Vec::new();
    for job_config in &config.jobs {
        let decoder = decoders.get(&job_config.decoder).ok_or_else(|| {
            anyhow::anyhow!("job {}: unknown decoder '{}'", job_config.name, job_config.decoder)
        })?;
        tables.extend(decoder.sink_table());
    }
    Ok(tables)
}

fn build_jobs(config: &Config, db: &Db) -> Result<Vec<Job>> {
    let decoders = DecoderRegistry::new();
    let mut jobs = Vec::with_capacity(config.jobs.len());

    for job_config in &config.jobs {
        let decoder = decoders.get(&job_config.decoder).ok_or_else(|| {
            anyhow::anyhow!("job {}: unknown decoder '{}'", job_config.name, job_config.decoder)
        })?;
        let job = IngestJob::from_config(job_config, decoder, db)?;

        log::info!(
            "Job {}: {} -> retry {} / failed {} (pattern '{}', batch {}, max retries {})",
            job_config.name,
            job_config.incoming_path.display(),
            job_config.retry_path.display(),
            job_config.failed_path.display(),
            job_config.file_pattern,
            job_config.batch_size,
            job_config.max_retries
        );
        jobs.push(job);
    }

    Ok(jobs)
}

/// Run all jobs until Ctrl+C. A cycle already running finishes first.
async fn run_scheduled(config: &Config, db: &Db) -> Result<()> {
    let jobs = build_jobs(config, db)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handles = schedule::spawn_all(jobs, &shutdown_rx);
    log::info!("{} job(s) scheduled, press Ctrl+C to stop", handles.len());

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => log::info!("Shutdown requested, waiting for running cycles"),
            Err(e) => log::error!("Failed to listen for Ctrl+C: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    let mut failures = 0;
    for handle in handles {
        match handle.await {
            Ok(Ok(job)) => {
                if !job.retry_store().is_empty() {
                    log::warn!(
                        "[{}] {} retry counter(s) dropped at shutdown",
                        job.name(),
                        job.retry_store().len()
                    );
                }
            }
            Ok(Err(e)) => {
                log::error!("Job stopped with error: {}", e);
                failures += 1;
            }
            Err(e) => {
                log::error!("Job task panicked: {}", e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} job(s) stopped abnormally", failures);
    }
    log::info!("All jobs stopped");
    Ok(())
}

/// One cycle per job, one job after another.
async fn run_once(config: &Config, db: &Db) -> Result<()> {
    for job in build_jobs(config, db)? {
        let (job, report) = schedule::run_cycle_blocking(job).await?;

        let failed = report.count(|o| matches!(o, FileOutcome::Failed(_)));
        let retry = report.count(|o| matches!(o, FileOutcome::RetryPending(_)));
        println!(
            "{}: {} file(s), {} row(s) committed, {} awaiting retry, {} failed ({:?})",
            job.name(),
            report.files.len(),
            report.rows_committed(),
            retry,
            failed,
            report.elapsed
        );
    }
    Ok(())
}

/// Verify that the sink schema is in place
async fn verify_database_schema(db: &Db, tables: Vec<SinkTable>) -> Result<()> {
    db.with_connection(move |conn| {
        let missing = schema::missing_tables(conn, &tables)?;
        if !missing.is_empty() {
            for table in &missing {
                log::error!("Missing table: {}", table);
            }
            return Err(FtplogError::Config("Not all sink tables exist".to_string()));
        }
        for table in &tables {
            log::debug!("✓ Table exists: {}", table.name);
        }

        let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        if journal_mode.to_uppercase() != "WAL" {
            return Err(FtplogError::Config(format!("Journal mode is not WAL: {}", journal_mode)));
        }
        log::debug!("✓ Journal mode: WAL");

        let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        if integrity != "ok" {
            return Err(FtplogError::Config(format!("Database integrity check failed: {}", integrity)));
        }
        log::info!("✓ Database integrity: OK");

        Ok(())
    }).await?;

    log::info!("✓ Database schema verification complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_cli_defaults_to_run() {
        let args = Args::try_parse_from(["ftplog"]).unwrap();
        assert!(args.command.is_none());
        assert!(args.config.is_none());
    }

    #[test]
    fn test_cli_parses_subcommands_and_config() {
        let args = Args::try_parse_from(["ftplog", "once", "--config", "/etc/ftplog.toml"]).unwrap();
        assert!(matches!(args.command, Some(Command::Once)));
        assert_eq!(args.config, Some(PathBuf::from("/etc/ftplog.toml")));

        let args = Args::try_parse_from(["ftplog", "-c", "x.toml", "verify"]).unwrap();
        assert!(matches!(args.command, Some(Command::Verify)));

        assert!(Args::try_parse_from(["ftplog", "serve"]).is_err());
    }

    #[test]
    fn test_sink_tables_follow_job_decoders() {
        let config = Config::from_toml(
            r#"
[ftplog]
db_path = "x.db"

[[jobs]]
name = "a"
incoming_path = "/q/a/wait"
retry_path = "/q/a/retry"
failed_path = "/q/a/failed"
file_pattern = "*.log"

[[jobs]]
name = "b"
incoming_path = "/q/b/wait"
retry_path = "/q/b/retry"
failed_path = "/q/b/failed"
file_pattern = "*.log"
"#,
        )
        .unwrap();

        let tables = sink_tables(&config).unwrap();
        assert_eq!(tables, vec![schema::FTP_AUDIT_LOG, schema::FTP_AUDIT_LOG]);
    }
}
