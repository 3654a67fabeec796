//! Pipe-delimited log lines
//!
//! ```text
//! INFO|Uxd:03/12/2025|Uxt:12:14:22.946|Dbd|Msg:Transaction ended
//! ```
//!
//! The first segment is the status. Every further segment is `Key:Value`
//! split at the first colon; a segment without a colon becomes a key with an
//! empty value.

use std::path::Path;

use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

use crate::error::Result;
use crate::event::Record;

/// Key holding the leading status segment
pub const STATUS_FIELD: &str = "Status";

/// Parse one log line into a record. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Option<Record> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let mut parts = line.split('|');
    let mut record = Record::new();
    record.insert(
        STATUS_FIELD.to_string(),
        Value::String(parts.next().unwrap_or_default().to_string()),
    );

    for part in parts {
        let (key, value) = part.split_once(':').unwrap_or((part, ""));
        record.insert(key.to_string(), Value::String(value.to_string()));
    }

    Some(record)
}

/// Reads records from a log file line by line, skipping blank lines
pub struct LogReader {
    lines: Lines<BufReader<File>>,
    line_number: u64,
}

impl LogReader {
    /// Open a log file
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path).await?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            line_number: 0,
        })
    }

    /// Lines consumed so far, blank ones included
    pub fn line_number(&self) -> u64 {
        self.line_number
    }

    /// Next non-blank record, or `None` at end of file
    pub async fn next_record(&mut self) -> Result<Option<Record>> {
        while let Some(line) = self.lines.next_line().await? {
            self.line_number += 1;
            if let Some(record) = parse_line(&line) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_parse_fields_in_order() {
        let record = parse_line("INFO|Uxd:03/12/2025|Pid:4272|Msg:done").unwrap();

        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            r#"{"Status":"INFO","Uxd":"03/12/2025","Pid":"4272","Msg":"done"}"#
        );
    }

    #[test]
    fn test_value_split_on_first_colon() {
        let record = parse_line("START|Uxt:12:14:22.946|Ct2:-1:0").unwrap();

        assert_eq!(record["Uxt"], "12:14:22.946");
        assert_eq!(record["Ct2"], "-1:0");
    }

    #[test]
    fn test_segment_without_colon() {
        let record = parse_line("SUCCESS|Dbd|Ocn:").unwrap();

        assert_eq!(record["Dbd"], "");
        assert_eq!(record["Ocn"], "");
    }

    #[test]
    fn test_blank_lines() {
        assert!(parse_line("").is_none());
        assert!(parse_line("   \r\n").is_none());
    }

    #[test]
    fn test_surrounding_whitespace_trimmed() {
        let record = parse_line("  INFO|Key:11\n").unwrap();

        assert_eq!(record[STATUS_FIELD], "INFO");
        assert_eq!(record["Key"], "11");
    }

    #[test]
    fn test_status_only() {
        let record = parse_line("INFO").unwrap();

        assert_eq!(record.len(), 1);
        assert_eq!(record[STATUS_FIELD], "INFO");
    }

    #[tokio::test]
    async fn test_reader_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "START|Tid:a|Uxt:12:00:00.000").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "   ").unwrap();
        writeln!(file, "SUCCESS|Tid:a").unwrap();
        file.flush().unwrap();

        let mut reader = LogReader::open(file.path()).await.unwrap();

        let first = reader.next_record().await.unwrap().unwrap();
        assert_eq!(first[STATUS_FIELD], "START");
        assert_eq!(reader.line_number(), 1);

        let second = reader.next_record().await.unwrap().unwrap();
        assert_eq!(second[STATUS_FIELD], "SUCCESS");
        assert_eq!(reader.line_number(), 4);

        assert!(reader.next_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reader_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = LogReader::open(dir.path().join("missing.log")).await;

        assert!(matches!(result, Err(crate::Error::Io(_))));
    }
}
