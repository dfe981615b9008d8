//! Record formatting and the append-only sink writer.
//!
//! Each record category gets its own sink, opened once in append mode
//! when the writer is built and released when it is dropped. A record is
//! always appended with a single write so concurrent writers sharing a
//! sink can lean on the platform's append-mode atomicity; no other
//! coordination is performed.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};

use crate::config::TraceConfig;

/// Visual delimiter framing the body of a SQL record.
pub const RECORD_DELIMITER: &str = "**************************************************";

/// `YYYY-MM-DD/HH:MM:SS.<fraction>` with a four-digit fraction in units
/// of 100 microseconds.
pub fn format_timestamp(now: &DateTime<Local>) -> String {
    let fraction = now.timestamp_subsec_micros() / 100;
    format!("{}.{:04}", now.format("%Y-%m-%d/%H:%M:%S"), fraction)
}

/// Render one SQL detail record.
///
/// The correlation header carries both ids so a reader can jump from a
/// SQL block to the matching call chain; elapsed time is truncated to
/// whole milliseconds.
pub fn format_sql_record(
    app_trace_id: &str,
    sql_trace_id: &str,
    timestamp: &str,
    host: &str,
    elapsed_ms: f64,
    sql: &str,
    bindings: &str,
) -> String {
    format!(
        "\n[{app_trace_id} {sql_trace_id}][{timestamp}][{host}][{elapsed}ms]\n\
         {RECORD_DELIMITER}\n\
         {sql}\n\
         [{bindings}]\n\
         {RECORD_DELIMITER}\n",
        elapsed = elapsed_ms as i64,
    )
}

/// Append-only writer over the three trace sinks.
///
/// Sink-open failures are tolerated: the affected sink stays closed and
/// the listener degrades instead of failing the host. The error sink is
/// strictly best-effort and usable even when the primary sinks are not.
pub struct RecordWriter {
    sql_sink: Option<File>,
    trace_sink: Option<File>,
    error_sink: Option<File>,
}

impl RecordWriter {
    pub fn open(config: &TraceConfig) -> Self {
        RecordWriter {
            sql_sink: open_append(&config.sql_log),
            trace_sink: open_append(&config.trace_log),
            error_sink: open_append(&config.error_log),
        }
    }

    /// Both primary sinks opened successfully.
    pub fn sinks_ok(&self) -> bool {
        self.sql_sink.is_some() && self.trace_sink.is_some()
    }

    pub fn write_sql_record(
        &self,
        app_trace_id: &str,
        sql_trace_id: &str,
        host: &str,
        elapsed_ms: f64,
        sql: &str,
        bindings: &str,
    ) -> Result<()> {
        let sink = self.sql_sink.as_ref().context("SQL sink is not open")?;
        let record = format_sql_record(
            app_trace_id,
            sql_trace_id,
            &format_timestamp(&Local::now()),
            host,
            elapsed_ms,
            sql,
            bindings,
        );
        append(sink, record.as_bytes())
    }

    /// Append a reduced call-chain block. An empty block (no retained
    /// frames) writes nothing.
    pub fn write_chain_record(&self, block: &str) -> Result<()> {
        if block.is_empty() {
            return Ok(());
        }
        let sink = self.trace_sink.as_ref().context("chain sink is not open")?;
        append(sink, block.as_bytes())
    }

    /// Best-effort single-line append to the error sink. Failures here
    /// are discarded: the tracer's own plumbing must never raise.
    pub fn write_error(&self, message: &str) {
        if let Some(sink) = &self.error_sink {
            let line = format!("{message}\n");
            let _ = append(sink, line.as_bytes());
        }
    }
}

fn open_append(path: &Path) -> Option<File> {
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(file),
        Err(err) => {
            tracing::warn!("Failed to open trace sink {}: {err}", path.display());
            None
        }
    }
}

fn append(sink: &File, bytes: &[u8]) -> Result<()> {
    let mut sink: &File = sink;
    sink.write_all(bytes).context("Failed to append record")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// Recover (sql, bindings) from a formatted record by splitting on the
    /// delimiter lines. The bindings line is always the last body line.
    fn parse_sql_record(record: &str) -> (String, String) {
        let delim = format!("{RECORD_DELIMITER}\n");
        let start = record.find(&delim).unwrap() + delim.len();
        let end = record.rfind(&delim).unwrap();
        let body = &record[start..end];
        let mut lines: Vec<&str> = body.lines().collect();
        let bindings_line = lines.pop().unwrap();
        let bindings = bindings_line
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .unwrap();
        (lines.join("\n"), bindings.to_string())
    }

    fn writer_in(dir: &TempDir) -> (RecordWriter, TraceConfig) {
        let config = TraceConfig {
            sql_log: dir.path().join("sql.log"),
            trace_log: dir.path().join("sql_trace.log"),
            error_log: dir.path().join("sql_error.log"),
            ..TraceConfig::default()
        };
        (RecordWriter::open(&config), config)
    }

    #[test]
    fn test_delimiter_width() {
        assert_eq!(RECORD_DELIMITER.len(), 50);
        assert!(RECORD_DELIMITER.chars().all(|c| c == '*'));
    }

    #[test]
    fn test_sql_record_round_trip() {
        let sql = "select *\nfrom orders\nwhere status in (?, ?) [really]";
        let bindings = "open, closed";
        let record = format_sql_record(
            "0D4B491C", "839F2E59", "2021-07-01/14:58:17.7793", "127.0.0.1", 1.9, sql, bindings,
        );
        let (parsed_sql, parsed_bindings) = parse_sql_record(&record);
        assert_eq!(parsed_sql, sql);
        assert_eq!(parsed_bindings, bindings);
    }

    #[test]
    fn test_sql_record_header() {
        let record = format_sql_record(
            "0D4B491C", "839F2E59", "2021-07-01/14:58:17.7793", "127.0.0.1", 1.9, "select 1", "",
        );
        assert!(record.starts_with(
            "\n[0D4B491C 839F2E59][2021-07-01/14:58:17.7793][127.0.0.1][1ms]\n"
        ));
    }

    #[test]
    fn test_timestamp_format() {
        let now = Local::now();
        let formatted = format_timestamp(&now);
        // YYYY-MM-DD/HH:MM:SS.ffff
        assert_eq!(formatted.len(), 24);
        assert_eq!(&formatted[10..11], "/");
        assert_eq!(&formatted[19..20], ".");
    }

    #[test]
    fn test_writer_appends_records() {
        let dir = TempDir::new().unwrap();
        let (writer, config) = writer_in(&dir);
        assert!(writer.sinks_ok());

        writer
            .write_sql_record("AAAA1111", "BBBB2222", "db1", 5.2, "select 1", "")
            .unwrap();
        writer
            .write_sql_record("AAAA1111", "CCCC3333", "db1", 7.0, "select 2", "42")
            .unwrap();

        let contents = fs::read_to_string(&config.sql_log).unwrap();
        assert_eq!(contents.matches(RECORD_DELIMITER).count(), 4);
        assert!(contents.contains("select 1"));
        assert!(contents.contains("[AAAA1111 CCCC3333]"));
    }

    #[test]
    fn test_chain_record_skips_empty_block() {
        let dir = TempDir::new().unwrap();
        let (writer, config) = writer_in(&dir);
        writer.write_chain_record("").unwrap();
        assert_eq!(fs::read_to_string(&config.trace_log).unwrap(), "");
    }

    #[test]
    fn test_write_error_without_sink_is_silent() {
        let writer = RecordWriter {
            sql_sink: None,
            trace_sink: None,
            error_sink: None,
        };
        assert!(!writer.sinks_ok());
        writer.write_error("nowhere to go");
    }

    #[test]
    fn test_open_tolerates_bad_path() {
        let dir = TempDir::new().unwrap();
        let config = TraceConfig {
            // A directory is not appendable; the sink stays closed.
            sql_log: PathBuf::from(dir.path()),
            trace_log: dir.path().join("sql_trace.log"),
            error_log: dir.path().join("sql_error.log"),
            ..TraceConfig::default()
        };
        let writer = RecordWriter::open(&config);
        assert!(!writer.sinks_ok());
        assert!(writer.write_sql_record("A", "B", "db1", 1.0, "select 1", "").is_err());
        writer.write_error("still works");
        assert!(fs::read_to_string(&config.error_log)
            .unwrap()
            .contains("still works"));
    }
}
