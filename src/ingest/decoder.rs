use rusqlite::types::Value;

use super::audit::FtpAuditDecoder;
use crate::db::schema::SinkTable;
use crate::error::Result;

/// One decoded line, bound positionally (`?1`, `?2`, ...) into the job's insert statement.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord(Vec<Value>);

impl DecodedRecord {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Value>> for DecodedRecord {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

/// Turns one raw line into a record for a specific job type.
pub trait RecordDecoder: Send {
    fn name(&self) -> &str;

    /// `Ok(None)` means the line carries nothing (e.g. blank) and is skipped quietly.
    /// `Err` is a decode failure: logged and skipped by the caller.
    fn decode(&self, line: &str) -> Result<Option<DecodedRecord>>;

    /// Insert statement matching the record layout, used when the job config has none.
    fn default_sql(&self) -> Option<&str> {
        None
    }

    /// Table the default statement writes into, created at startup when missing.
    fn sink_table(&self) -> Option<SinkTable> {
        None
    }
}

impl RecordDecoder for Box<dyn RecordDecoder> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn decode(&self, line: &str) -> Result<Option<DecodedRecord>> {
        (**self).decode(line)
    }

    fn default_sql(&self) -> Option<&str> {
        (**self).default_sql()
    }

    fn sink_table(&self) -> Option<SinkTable> {
        (**self).sink_table()
    }
}

/// Adapter so a plain function or closure can serve as a decoder.
pub struct FnDecoder<F> {
    name: String,
    decode: F,
}

impl<F> FnDecoder<F>
where
    F: Fn(&str) -> Result<Option<DecodedRecord>> + Send,
{
    pub fn new(name: impl Into<String>, decode: F) -> Self {
        Self {
            name: name.into(),
            decode,
        }
    }
}

impl<F> RecordDecoder for FnDecoder<F>
where
    F: Fn(&str) -> Result<Option<DecodedRecord>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn decode(&self, line: &str) -> Result<Option<DecodedRecord>> {
        (self.decode)(line)
    }
}

type DecoderFactory = fn() -> Box<dyn RecordDecoder>;

/// Decoders selectable by name from the job configuration
pub struct DecoderRegistry {
    factories: Vec<(&'static str, DecoderFactory)>,
}

impl DecoderRegistry {
    /// Create a registry with the built-in decoders
    pub fn new() -> Self {
        let mut registry = Self {
            factories: Vec::new(),
        };

        registry.register(FtpAuditDecoder::NAME, || -> Box<dyn RecordDecoder> {
            Box::new(FtpAuditDecoder)
        });

        registry
    }

    /// Register a decoder; a later registration under the same name wins.
    pub fn register(&mut self, name: &'static str, factory: DecoderFactory) {
        self.factories.retain(|(n, _)| *n != name);
        self.factories.push((name, factory));
    }

    /// Build a fresh decoder instance for one job
    pub fn get(&self, name: &str) -> Option<Box<dyn RecordDecoder>> {
        self.factories
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, factory)| factory())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.factories.iter().map(|(n, _)| *n).collect()
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FtplogError;

    #[test]
    fn test_registry_has_ftp_audit() {
        let registry = DecoderRegistry::new();
        let decoder = registry.get("ftp_audit").expect("built-in decoder");
        assert_eq!(decoder.name(), "ftp_audit");
        assert!(decoder.default_sql().unwrap().contains("ftp_audit_log"));
        assert!(registry.get("csv").is_none());
    }

    #[test]
    fn test_registry_register_custom() {
        fn upper() -> Box<dyn RecordDecoder> {
            Box::new(FnDecoder::new("upper", |line: &str| {
                Ok(Some(DecodedRecord::new(vec![Value::Text(line.to_uppercase())])))
            }))
        }

        let mut registry = DecoderRegistry::new();
        registry.register("upper", upper);
        assert_eq!(registry.names(), vec!["ftp_audit", "upper"]);

        let record = registry.get("upper").unwrap().decode("abc").unwrap().unwrap();
        assert_eq!(record.values(), &[Value::Text("ABC".to_string())]);
    }

    #[test]
    fn test_fn_decoder_propagates_errors() {
        let decoder = FnDecoder::new("strict", |line: &str| {
            if line.starts_with('#') {
                Err(FtplogError::Decode("comment".to_string()))
            } else {
                Ok(Some(DecodedRecord::from(vec![Value::Integer(line.len() as i64)])))
            }
        });

        assert!(decoder.decode("# nope").is_err());
        assert_eq!(decoder.decode("four").unwrap().unwrap().len(), 1);
    }
}
