//! Plain-text audit trail of every tick.
//!
//! Independent of the database: a tick whose insert fails still leaves its
//! readings here, and successful lines can be fed back through `import`.

use crate::parser::{ParsedBatch, SensorParseError};
use crate::utils::{error_chain, format_timestamp};
use chrono::NaiveDateTime;
use log::{error, info, warn};
use std::fs::OpenOptions;
use std::io::{self, LineWriter, Write};
use std::path::Path;

pub const SENSOR_ERROR_TAG: &str = "SENSOR-ERROR";
pub const EMPTY_TAG: &str = "EMPTY";
pub const TICK_ERROR_TAG: &str = "TICK-ERROR";

pub struct AuditLog {
    out: Box<dyn Write + Send>,
    destination: String,
}

impl AuditLog {
    /// Append to `path`, creating it if needed.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::from_writer(LineWriter::new(file), path.display().to_string()))
    }

    pub fn from_writer<W: Write + Send + 'static>(out: W, destination: impl Into<String>) -> Self {
        AuditLog {
            out: Box::new(out),
            destination: destination.into(),
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn record_readings(&mut self, ts: &NaiveDateTime, batch: &ParsedBatch) {
        let line = batch.to_line();
        info!("{}", line);
        self.write_entry(&format!("{};{}", format_timestamp(ts), line));
    }

    pub fn record_sensor_error(&mut self, ts: &NaiveDateTime, err: &SensorParseError) {
        warn!("Sensor {}: {}", err.sensor_id.map_or_else(|| "?".to_string(), |id| id.to_string()), err);
        self.write_entry(&format!(
            "{};{};{};{}",
            format_timestamp(ts),
            SENSOR_ERROR_TAG,
            err.kind,
            err.line
        ));
    }

    pub fn record_empty(&mut self, ts: &NaiveDateTime, reason: &str) {
        warn!("No data this tick: {}", reason);
        self.write_entry(&format!("{};{};{}", format_timestamp(ts), EMPTY_TAG, reason));
    }

    /// Multi-line entry: the error, then one indented line per cause.
    pub fn record_failure(&mut self, ts: &NaiveDateTime, err: &dyn std::error::Error) {
        let chain = error_chain(err);
        error!("Tick failed: {}", chain.join(": "));
        let mut entry = format!("{};{};{}", format_timestamp(ts), TICK_ERROR_TAG, chain[0]);
        for cause in &chain[1..] {
            entry.push_str("\n    caused by: ");
            entry.push_str(cause);
        }
        self.write_entry(&entry);
    }

    fn write_entry(&mut self, entry: &str) {
        if let Err(e) = writeln!(self.out, "{}", entry).and_then(|_| self.out.flush()) {
            // the diagnostic log still carries the entry
            error!("Writing audit log {} failed: {}", self.destination, e);
        }
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog").field("destination", &self.destination).finish()
    }
}

/// Shared in-memory writer for inspecting audit output in tests.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct SharedBuffer(pub std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

#[cfg(test)]
impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

#[cfg(test)]
impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ReadingParser;
    use chrono::NaiveDate;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 2, 29).unwrap().and_hms_opt(8, 15, 0).unwrap()
    }

    #[test]
    fn readings_line_starts_with_timestamp() {
        let buf = SharedBuffer::default();
        let mut audit = AuditLog::from_writer(buf.clone(), "test");
        let batch = ReadingParser::with_sensor_count(2).parse(&["0;15.0;57.0\n", "1;16.0;58.0\n"]);
        audit.record_readings(&ts(), &batch);
        assert_eq!(buf.contents(), "2024-02-29 08:15:00;0;15;57;1;16;58\n");
    }

    #[test]
    fn failure_entry_lists_causes_on_following_lines() {
        let buf = SharedBuffer::default();
        let mut audit = AuditLog::from_writer(buf.clone(), "test");
        let inner = io::Error::new(io::ErrorKind::BrokenPipe, "cable pulled");
        let err = crate::source::TransportError::Io(inner);
        audit.record_failure(&ts(), &err);
        let out = buf.contents();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("2024-02-29 08:15:00;TICK-ERROR;transport i/o error"));
        assert_eq!(lines[1], "    caused by: cable pulled");
    }

    #[test]
    fn sensor_error_entry_carries_raw_line() {
        let buf = SharedBuffer::default();
        let mut audit = AuditLog::from_writer(buf.clone(), "test");
        let batch = ReadingParser::with_sensor_count(1).parse(&["0;Error;Error\n"]);
        audit.record_sensor_error(&ts(), &batch.errors[0]);
        audit.record_empty(&ts(), "all sensors failed");
        let out = buf.contents();
        assert!(out.starts_with("2024-02-29 08:15:00;SENSOR-ERROR;sensor reported an error;0;Error;Error\n"));
        assert_eq!(out.matches("0;Error;Error").count(), 1);
        assert!(out.ends_with("2024-02-29 08:15:00;EMPTY;all sensors failed\n"));
    }
}
