//! Offline import of audit/log files into the store.
//!
//! Each line is `<timestamp>;<id>;<temperature>;<rh>[;<id>;<temperature>;<rh>...]`
//! where only the first 19 characters of the timestamp field are used. Lines
//! are independent: a broken one is logged and skipped, the rest still land.

use crate::db::store::Store;
use crate::parser::{FIELD_SEPARATOR, Reading, ReadingParser};
use crate::utils::parse_timestamp_prefix;
use chrono::NaiveDateTime;
use log::{info, warn};
use std::fmt::{self, Display, Formatter};
use std::io::BufRead;

/// Fields per sensor in a log line: id, temperature, rh.
const FIELDS_PER_SENSOR: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum ImportError {
    BadTimestamp(String),
    BadLayout { fields: usize },
    NoReadings { dropped: usize },
}

impl Display for ImportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ImportError::BadTimestamp(raw) => write!(f, "cannot read timestamp from {:?}", raw),
            ImportError::BadLayout { fields } => write!(
                f,
                "{} value field(s) do not form {}-field sensor groups",
                fields, FIELDS_PER_SENSOR
            ),
            ImportError::NoReadings { dropped } => {
                write!(f, "no usable readings ({} sensor group(s) dropped)", dropped)
            }
        }
    }
}

impl std::error::Error for ImportError {}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Turn one log line into a timestamped batch.
fn parse_log_line(parser: &ReadingParser, line: &str) -> Result<(NaiveDateTime, Vec<Reading>), ImportError> {
    let mut fields = line.trim().split(FIELD_SEPARATOR);
    let ts_field = fields.next().unwrap_or_default();
    let ts = parse_timestamp_prefix(ts_field).ok_or_else(|| ImportError::BadTimestamp(ts_field.to_string()))?;

    let values: Vec<&str> = fields.collect();
    if values.is_empty() || values.len() % FIELDS_PER_SENSOR != 0 {
        return Err(ImportError::BadLayout { fields: values.len() });
    }

    let groups: Vec<String> = values
        .chunks(FIELDS_PER_SENSOR)
        .map(|group| group.join(&FIELD_SEPARATOR.to_string()))
        .collect();
    let batch = parser.parse(&groups);
    for err in &batch.errors {
        warn!("Import: dropping sensor group: {}", err);
    }
    if batch.is_empty() {
        return Err(ImportError::NoReadings {
            dropped: batch.errors.len(),
        });
    }
    Ok((ts, batch.readings()))
}

/// Import every line of `input`. Only I/O errors abort; malformed lines,
/// including ones that are not valid UTF-8, are skipped.
pub fn bulk_import<R: BufRead>(store: &mut Store, parser: &ReadingParser, mut input: R) -> std::io::Result<ImportSummary> {
    let mut summary = ImportSummary::default();
    let mut buf = Vec::new();
    let mut line_no = 0;
    loop {
        buf.clear();
        if input.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        line_no += 1;
        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line,
            Err(e) => {
                warn!("Import: skipping line {}: not valid UTF-8 ({})", line_no, e);
                summary.skipped += 1;
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match parse_log_line(parser, line) {
            Ok((ts, readings)) => match store.append(ts, &readings) {
                Ok(_) => {
                    summary.imported += 1;
                    if summary.imported % 10_000 == 0 {
                        info!("Import: {} line(s) imported so far", summary.imported);
                    }
                }
                Err(e) => {
                    warn!("Import: line {}: {}", line_no, e);
                    summary.failed += 1;
                }
            },
            Err(e) => {
                warn!("Import: skipping line {}: {}", line_no, e);
                summary.skipped += 1;
            }
        }
    }
    info!(
        "Import complete (imported={}, skipped={}, failed={})",
        summary.imported, summary.skipped, summary.failed
    );
    Ok(summary)
}
