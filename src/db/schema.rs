//! Sink bootstrap: create a decoder's target table on first start.
//!
//! Only a missing table is created. An existing table is left exactly as found,
//! even if its layout differs; the insert statement is checked against it when
//! the job opens its committer.

use rusqlite::{Connection, OptionalExtension};

use crate::error::{FtplogError, Result};

/// A table some decoder writes into, with the DDL that creates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkTable {
    pub name: &'static str,
    pub ddl: &'static str,
}

pub const FTP_AUDIT_LOG: SinkTable = SinkTable {
    name: "ftp_audit_log",
    ddl: include_str!("../../schema/ftp_audit_log.sql"),
};

pub fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Create `table` if it is missing. Returns `true` when it was created.
///
/// The DDL runs in one transaction and must actually produce a table called
/// `table.name`, otherwise nothing is kept.
pub fn ensure_table(conn: &mut Connection, table: &SinkTable) -> Result<bool> {
    if table_exists(conn, table.name)? {
        log::debug!("Sink table {} already present", table.name);
        return Ok(false);
    }

    let tx = conn.transaction()?;
    tx.execute_batch(table.ddl)
        .map_err(|e| FtplogError::Config(format!("creating sink table {}: {}", table.name, e)))?;
    if !table_exists(&tx, table.name)? {
        return Err(FtplogError::Config(format!(
            "DDL for {} ran but did not create that table",
            table.name
        )));
    }
    tx.commit()?;

    log::info!("Created sink table {}", table.name);
    Ok(true)
}

/// Ensure every table in `tables`, skipping repeated names.
pub fn bootstrap(conn: &mut Connection, tables: &[SinkTable]) -> Result<Vec<&'static str>> {
    let mut seen = Vec::new();
    let mut created = Vec::new();
    for table in tables {
        if seen.contains(&table.name) {
            continue;
        }
        seen.push(table.name);
        if ensure_table(conn, table)? {
            created.push(table.name);
        }
    }
    Ok(created)
}

/// Names in `tables` that do not exist yet.
pub fn missing_tables(conn: &Connection, tables: &[SinkTable]) -> Result<Vec<&'static str>> {
    let mut missing = Vec::new();
    for table in tables {
        if !table_exists(conn, table.name)? && !missing.contains(&table.name) {
            missing.push(table.name);
        }
    }
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(temp_dir: &TempDir) -> Connection {
        Connection::open(temp_dir.path().join("sink.db")).unwrap()
    }

    fn columns(conn: &Connection, table: &str) -> Vec<String> {
        conn.prepare(&format!("SELECT name FROM pragma_table_info('{}') ORDER BY cid", table))
            .unwrap()
            .query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
            .unwrap()
    }

    #[test]
    fn test_audit_table_created_once() {
        let temp_dir = TempDir::new().unwrap();
        let mut conn = open(&temp_dir);

        assert!(ensure_table(&mut conn, &FTP_AUDIT_LOG).unwrap());
        assert!(!ensure_table(&mut conn, &FTP_AUDIT_LOG).unwrap());

        let cols = columns(&conn, "ftp_audit_log");
        for expected in ["username", "action", "file_path", "file_size", "client_ip", "is_secure", "timestamp"] {
            assert!(cols.iter().any(|c| c == expected), "missing column {}", expected);
        }
    }

    #[test]
    fn test_existing_table_is_left_alone() {
        let temp_dir = TempDir::new().unwrap();
        let mut conn = open(&temp_dir);
        conn.execute_batch("CREATE TABLE ftp_audit_log (legacy TEXT);").unwrap();

        assert!(!ensure_table(&mut conn, &FTP_AUDIT_LOG).unwrap());
        assert_eq!(columns(&conn, "ftp_audit_log"), vec!["legacy"]);
    }

    #[test]
    fn test_broken_ddl_leaves_nothing_behind() {
        let temp_dir = TempDir::new().unwrap();
        let mut conn = open(&temp_dir);
        let table = SinkTable {
            name: "events",
            ddl: "CREATE TABLE helper (id INTEGER); CREATE TABLE (;",
        };

        assert!(ensure_table(&mut conn, &table).is_err());
        assert!(!table_exists(&conn, "helper").unwrap());
    }

    #[test]
    fn test_ddl_must_create_named_table() {
        let temp_dir = TempDir::new().unwrap();
        let mut conn = open(&temp_dir);
        let table = SinkTable {
            name: "events",
            ddl: "CREATE TABLE other_events (id INTEGER);",
        };

        let err = ensure_table(&mut conn, &table).unwrap_err();
        assert!(err.to_string().contains("did not create"));
        assert!(!table_exists(&conn, "other_events").unwrap());
    }

    #[test]
    fn test_bootstrap_dedupes_and_reports_missing() {
        let temp_dir = TempDir::new().unwrap();
        let mut conn = open(&temp_dir);

        assert_eq!(missing_tables(&conn, &[FTP_AUDIT_LOG, FTP_AUDIT_LOG]).unwrap(), vec!["ftp_audit_log"]);
        assert_eq!(bootstrap(&mut conn, &[FTP_AUDIT_LOG, FTP_AUDIT_LOG]).unwrap(), vec!["ftp_audit_log"]);
        assert!(missing_tables(&conn, &[FTP_AUDIT_LOG]).unwrap().is_empty());
    }
}
