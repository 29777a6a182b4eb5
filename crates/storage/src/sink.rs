//! Append-Only Result Sink
//!
//! One row per resolved request per batch. Rows are flushed in small
//! groups so a crash loses at most the tail of a recording.

use crate::StorageError;
use chrono::{TimeZone, Utc};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Rows buffered before a forced flush
const FLUSH_EVERY: usize = 50;

/// One resolved poll result
#[derive(Debug, Clone)]
pub struct ResultRecord {
    /// Capture timestamp (Unix ms)
    pub timestamp_ms: u64,
    /// Signal identity string (`<server>_<did>`, hex)
    pub unique_id: String,
    /// Raw payload bytes; empty on timeout
    pub payload: Vec<u8>,
    /// Whether the request timed out instead of matching
    pub timed_out: bool,
    /// Worker slot that resolved the request
    pub slot: usize,
}

/// Destination for poll results
pub trait ResultSink: Send {
    fn append(&mut self, record: &ResultRecord) -> Result<(), StorageError>;

    fn flush(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// CSV-backed sink, append-only
pub struct CsvResultSink {
    writer: BufWriter<File>,
    rows_since_flush: usize,
}

impl CsvResultSink {
    /// Open (or create) a CSV file for appending
    ///
    /// The header row is written only when the file is empty.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let needs_header = file.metadata()?.len() == 0;
        let mut writer = BufWriter::new(file);
        if needs_header {
            writeln!(writer, "timestamp,unique_id,payload,timeout,slot")?;
        }
        info!("Opened result sink at {}", path.display());
        Ok(Self {
            writer,
            rows_since_flush: 0,
        })
    }

    fn format_timestamp(timestamp_ms: u64) -> String {
        Utc.timestamp_millis_opt(timestamp_ms as i64)
            .single()
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| timestamp_ms.to_string())
    }

    fn format_payload(payload: &[u8]) -> String {
        payload.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl ResultSink for CsvResultSink {
    fn append(&mut self, record: &ResultRecord) -> Result<(), StorageError> {
        writeln!(
            self.writer,
            "{},{},{},{},{}",
            Self::format_timestamp(record.timestamp_ms),
            record.unique_id,
            Self::format_payload(&record.payload),
            record.timed_out as u8,
            record.slot,
        )?;
        self.rows_since_flush += 1;
        if self.rows_since_flush >= FLUSH_EVERY {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        self.writer.flush()?;
        self.rows_since_flush = 0;
        Ok(())
    }
}

impl Drop for CsvResultSink {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

/// Sink that drops everything; used when no recording was requested
#[derive(Debug, Default)]
pub struct NullResultSink;

impl ResultSink for NullResultSink {
    fn append(&mut self, _record: &ResultRecord) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("didpoll-sink-test");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn record(timed_out: bool) -> ResultRecord {
        ResultRecord {
            timestamp_ms: 1_700_000_000_000,
            unique_id: "1781_f190".to_string(),
            payload: if timed_out { vec![] } else { vec![0xDE, 0xAD] },
            timed_out,
            slot: 2,
        }
    }

    #[test]
    fn test_header_written_once() {
        let path = temp_path("header.csv");
        std::fs::remove_file(&path).ok();

        {
            let mut sink = CsvResultSink::open(&path).unwrap();
            sink.append(&record(false)).unwrap();
            sink.flush().unwrap();
        }
        {
            let mut sink = CsvResultSink::open(&path).unwrap();
            sink.append(&record(true)).unwrap();
            sink.flush().unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "timestamp,unique_id,payload,timeout,slot");
        assert!(lines[1].contains("dead"));
        assert!(lines[2].ends_with(",1,2"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_timeout_row_has_empty_payload() {
        let path = temp_path("timeout.csv");
        std::fs::remove_file(&path).ok();

        let mut sink = CsvResultSink::open(&path).unwrap();
        sink.append(&record(true)).unwrap();
        sink.flush().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let row = content.lines().nth(1).unwrap();
        let fields: Vec<&str> = row.split(',').collect();
        assert_eq!(fields[2], "");
        assert_eq!(fields[3], "1");
        std::fs::remove_file(&path).ok();
    }
}
