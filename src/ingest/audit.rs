//! FTP audit line format: one JSON object per line, as written by the FTP server.
//!
//! ```text
//! {"username":"alice","action":"STOR","filePath":"/in/a.csv","fileSize":42,"clientIp":"10.0.0.5","secure":true,"timestamp":"01/01/2024 10:15:00"}
//! ```

use chrono::{Local, NaiveDateTime};
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

use super::decoder::{DecodedRecord, RecordDecoder};
use crate::db::schema::{self, SinkTable};
use crate::error::{FtplogError, Result};

/// `dd/MM/yyyy HH:mm:ss`
pub const TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Timestamps are stored in a sortable form.
const SINK_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const FTP_AUDIT_INSERT: &str = "INSERT INTO ftp_audit_log \
    (username, action, file_path, file_size, client_ip, is_secure, timestamp) \
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

/// One audited FTP action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub username: String,
    pub action: String,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub file_size: Option<i64>,
    pub client_ip: String,
    #[serde(default, alias = "isSecure")]
    pub secure: bool,
    pub timestamp: String,
}

impl AuditEvent {
    /// Build an event stamped with the current local time
    pub fn now(
        username: impl Into<String>,
        action: impl Into<String>,
        file_path: Option<String>,
        file_size: Option<i64>,
        client_ip: impl Into<String>,
        secure: bool,
    ) -> Self {
        Self {
            username: username.into(),
            action: action.into(),
            file_path,
            file_size,
            client_ip: client_ip.into(),
            secure,
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
        }
    }

    /// Serialize as a single log line (no trailing newline)
    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| FtplogError::Decode(format!("failed to encode audit event: {}", e)))
    }

    pub fn parsed_timestamp(&self) -> Result<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.timestamp, TIMESTAMP_FORMAT).map_err(|e| {
            FtplogError::Decode(format!(
                "timestamp '{}' does not match dd/MM/yyyy HH:mm:ss: {}",
                self.timestamp, e
            ))
        })
    }

    fn into_record(self) -> Result<DecodedRecord> {
        let timestamp = self.parsed_timestamp()?;
        Ok(DecodedRecord::new(vec![
            Value::Text(self.username),
            Value::Text(self.action),
            self.file_path.map(Value::Text).unwrap_or(Value::Null),
            self.file_size.map(Value::Integer).unwrap_or(Value::Null),
            Value::Text(self.client_ip),
            Value::Integer(i64::from(self.secure)),
            Value::Text(timestamp.format(SINK_TIMESTAMP_FORMAT).to_string()),
        ]))
    }
}

/// Decoder for the `ftp_audit` job type
pub struct FtpAuditDecoder;

impl FtpAuditDecoder {
    pub const NAME: &'static str = "ftp_audit";
}

impl RecordDecoder for FtpAuditDecoder {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn decode(&self, line: &str) -> Result<Option<DecodedRecord>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let event: AuditEvent = serde_json::from_str(line)
            .map_err(|e| FtplogError::Decode(format!("invalid audit line: {}", e)))?;

        event.into_record().map(Some)
    }

    fn default_sql(&self) -> Option<&str> {
        Some(FTP_AUDIT_INSERT)
    }

    fn sink_table(&self) -> Option<SinkTable> {
        Some(schema::FTP_AUDIT_LOG)
    }
}
