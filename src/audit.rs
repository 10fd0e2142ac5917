//! Append-only audit trail of signing operations.
//!
//! Storage is up to the embedder; this module only defines the entry shape,
//! the [`AuditSink`] seam and a JSON-lines file implementation.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome recorded for one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    /// Document signed
    Signed,
    /// Pipeline failed
    Failed,
    /// Task exceeded its time budget
    TimedOut,
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Batch the document belonged to, if any
    pub batch_id: Option<Uuid>,
    /// Name of the submitted document
    pub original_name: String,
    /// Name of the signed output
    pub signed_name: Option<String>,
    /// Certificate subject of the signer, when the certificate was loaded
    pub signer_identity: Option<String>,
    /// Outcome
    pub status: AuditStatus,
    /// When the outcome was recorded
    pub timestamp: DateTime<Utc>,
    /// Caller address supplied by the transport layer
    pub source_address: Option<String>,
    /// Free-form details (failure reason, skipped placements)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AuditEntry {
    /// Entry for `original_name` with the given status, stamped `timestamp`.
    pub fn new(original_name: impl Into<String>, status: AuditStatus, timestamp: DateTime<Utc>) -> Self {
        Self {
            batch_id: None,
            original_name: original_name.into(),
            signed_name: None,
            signer_identity: None,
            status,
            timestamp,
            source_address: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Attach the batch id.
    pub fn with_batch(mut self, batch_id: Uuid) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    /// Attach the output name.
    pub fn with_signed_name(mut self, name: impl Into<String>) -> Self {
        self.signed_name = Some(name.into());
        self
    }

    /// Attach the signer identity.
    pub fn with_signer(mut self, identity: impl Into<String>) -> Self {
        self.signer_identity = Some(identity.into());
        self
    }

    /// Attach the caller address.
    pub fn with_source_address(mut self, address: impl Into<String>) -> Self {
        self.source_address = Some(address.into());
        self
    }

    /// Add a detail.
    pub fn with_extra(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

/// Receives audit entries. Shared between workers, so it must be thread safe.
pub trait AuditSink: Send + Sync {
    /// Persist one entry.
    fn record(&self, entry: &AuditEntry) -> io::Result<()>;
}

/// One JSON object per line, appended under a lock.
pub struct JsonLinesAuditLog {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for JsonLinesAuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesAuditLog").finish_non_exhaustive()
    }
}

impl JsonLinesAuditLog {
    /// Append to `path`, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file: File = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::from_writer(BufWriter::new(file)))
    }

    /// Log into any writer.
    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
        }
    }
}

impl AuditSink for JsonLinesAuditLog {
    fn record(&self, entry: &AuditEntry) -> io::Result<()> {
        let mut line = serde_json::to_vec(entry).map_err(io::Error::other)?;
        line.push(b'\n');

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| io::Error::other("audit log lock poisoned"))?;
        writer.write_all(&line)?;
        writer.flush()
    }
}

/// Keeps entries in memory; handy for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditLog {
    fn record(&self, entry: &AuditEntry) -> io::Result<()> {
        self.entries
            .lock()
            .map_err(|_| io::Error::other("audit log lock poisoned"))?
            .push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn entry(name: &str) -> AuditEntry {
        AuditEntry::new(name, AuditStatus::Signed, Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())
            .with_signed_name(format!("{}_signed.pdf", name))
            .with_signer("CN=Test")
    }

    #[test]
    fn test_entry_json_shape() {
        let json = serde_json::to_string(&entry("a").with_extra("pages", 2)).unwrap();
        assert!(json.contains("\"originalName\":\"a\""));
        assert!(json.contains("\"status\":\"SIGNED\""));
        assert!(json.contains("\"extra\":{\"pages\":2}"));

        let bare = serde_json::to_string(&entry("b")).unwrap();
        assert!(!bare.contains("extra"));
    }

    #[test]
    fn test_json_lines_file_concurrent_writers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let log = Arc::new(JsonLinesAuditLog::open(&path).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || log.record(&entry(&format!("doc{}", i))).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        drop(log);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 8);
        for line in lines {
            let parsed: AuditEntry = serde_json::from_str(line).unwrap();
            assert_eq!(parsed.status, AuditStatus::Signed);
        }
    }

    #[test]
    fn test_memory_log() {
        let log = MemoryAuditLog::new();
        log.record(&entry("x")).unwrap();
        assert_eq!(log.entries().len(), 1);
    }
}
