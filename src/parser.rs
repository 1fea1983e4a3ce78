//! Turns raw sensor response lines into typed readings.
//!
//! A line is `<sensor id>;<temperature>;<rh>[;<more values>...]`. A broken line
//! only costs that sensor its reading for the tick; it never fails the batch.

use log::debug;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};

/// Marker the firmware puts in a value field when a sensor read failed.
pub const ERROR_MARKER: &str = "Error";
pub const FIELD_SEPARATOR: char = ';';

/// One sensor's values for one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub sensor_id: i32,
    pub temperature: f64,
    pub rh: Option<f64>,
    /// Values after `rh`, in the order the board sent them.
    pub extra: Vec<f64>,
}

impl Reading {
    pub fn new(sensor_id: i32, temperature: f64, rh: Option<f64>) -> Self {
        Reading {
            sensor_id,
            temperature,
            rh,
            extra: Vec::new(),
        }
    }

    /// Render as a fixed `id;temperature;rh` group; a missing humidity is an
    /// empty field. Values after `rh` are not part of the group.
    pub fn to_line(&self) -> String {
        let rh = self.rh.map(|v| v.to_string()).unwrap_or_default();
        format!(
            "{}{sep}{}{sep}{}",
            self.sensor_id,
            self.temperature,
            rh,
            sep = FIELD_SEPARATOR
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseErrorKind {
    /// A value field carried the firmware's `Error` marker.
    ErrorMarker,
    InvalidSensorId(String),
    UnknownSensor(i32),
    DisabledSensor(i32),
    MissingValues,
    InvalidNumber(String),
}

/// A single sensor's line that could not be turned into a reading.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorParseError {
    pub sensor_id: Option<i32>,
    pub line: String,
    pub kind: ParseErrorKind,
}

impl Display for ParseErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ParseErrorKind::ErrorMarker => write!(f, "sensor reported an error"),
            ParseErrorKind::InvalidSensorId(raw) => write!(f, "invalid sensor id {:?}", raw),
            ParseErrorKind::UnknownSensor(id) => write!(f, "unknown sensor {}", id),
            ParseErrorKind::DisabledSensor(id) => write!(f, "sensor {} is disabled", id),
            ParseErrorKind::MissingValues => write!(f, "no values"),
            ParseErrorKind::InvalidNumber(raw) => write!(f, "invalid number {:?}", raw),
        }
    }
}

impl Display for SensorParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} in line {:?}", self.kind, self.line)
    }
}

impl std::error::Error for SensorParseError {}

/// Result of parsing one response: readings keyed by sensor id plus the
/// lines that were dropped.
#[derive(Debug, Default, Clone)]
pub struct ParsedBatch {
    pub readings: BTreeMap<i32, Reading>,
    pub errors: Vec<SensorParseError>,
}

impl ParsedBatch {
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn readings(&self) -> Vec<Reading> {
        self.readings.values().cloned().collect()
    }

    /// `id;temperature;rh` blocks of every reading joined with `;`.
    pub fn to_line(&self) -> String {
        self.readings
            .values()
            .map(Reading::to_line)
            .collect::<Vec<_>>()
            .join(&FIELD_SEPARATOR.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct ReadingParser {
    known: BTreeSet<i32>,
    enabled: BTreeSet<i32>,
}

impl ReadingParser {
    /// Parser accepting ids `0..sensor_count`, all enabled.
    pub fn with_sensor_count(sensor_count: usize) -> Self {
        let ids: BTreeSet<i32> = (0..sensor_count as i32).collect();
        ReadingParser {
            known: ids.clone(),
            enabled: ids,
        }
    }

    /// Parser for an explicit registry of `(sensor id, enabled)` pairs.
    pub fn from_registry(sensors: impl IntoIterator<Item = (i32, bool)>) -> Self {
        let mut known = BTreeSet::new();
        let mut enabled = BTreeSet::new();
        for (id, on) in sensors {
            known.insert(id);
            if on {
                enabled.insert(id);
            }
        }
        ReadingParser { known, enabled }
    }

    pub fn sensor_count(&self) -> usize {
        self.known.len()
    }

    pub fn parse<S: AsRef<str>>(&self, lines: &[S]) -> ParsedBatch {
        let mut batch = ParsedBatch::default();
        for raw in lines {
            let raw = raw.as_ref();
            if raw.trim().is_empty() {
                continue;
            }
            match self.parse_line(raw) {
                Ok(reading) => {
                    if let Some(previous) = batch.readings.insert(reading.sensor_id, reading) {
                        debug!(
                            "Parser: sensor {} answered twice; keeping the later line",
                            previous.sensor_id
                        );
                    }
                }
                Err(e) => batch.errors.push(e),
            }
        }
        batch
    }

    pub fn parse_line(&self, raw: &str) -> Result<Reading, SensorParseError> {
        let line = raw.trim();
        let fail = |sensor_id: Option<i32>, kind: ParseErrorKind| SensorParseError {
            sensor_id,
            line: line.to_string(),
            kind,
        };

        let mut fields = line.split(FIELD_SEPARATOR);
        let id_field = fields.next().unwrap_or_default().trim();
        let sensor_id: i32 = id_field
            .parse()
            .map_err(|_| fail(None, ParseErrorKind::InvalidSensorId(id_field.to_string())))?;
        if !self.known.contains(&sensor_id) {
            return Err(fail(Some(sensor_id), ParseErrorKind::UnknownSensor(sensor_id)));
        }
        if !self.enabled.contains(&sensor_id) {
            return Err(fail(Some(sensor_id), ParseErrorKind::DisabledSensor(sensor_id)));
        }

        let mut raw_values: Vec<&str> = fields.map(str::trim).collect();
        // `id;temperature;` is a reading without humidity
        if raw_values.len() == 2 && raw_values[1].is_empty() {
            raw_values.pop();
        }
        if raw_values.is_empty() || raw_values.iter().all(|v| v.is_empty()) {
            return Err(fail(Some(sensor_id), ParseErrorKind::MissingValues));
        }
        if raw_values.iter().any(|v| v.contains(ERROR_MARKER)) {
            return Err(fail(Some(sensor_id), ParseErrorKind::ErrorMarker));
        }

        let mut values = Vec::with_capacity(raw_values.len());
        for v in raw_values {
            match v.parse::<f64>() {
                Ok(n) if n.is_finite() => values.push(n),
                _ => return Err(fail(Some(sensor_id), ParseErrorKind::InvalidNumber(v.to_string()))),
            }
        }

        let mut values = values.into_iter();
        let temperature = values.next().ok_or_else(|| fail(Some(sensor_id), ParseErrorKind::MissingValues))?;
        Ok(Reading {
            sensor_id,
            temperature,
            rh: values.next(),
            extra: values.collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> ReadingParser {
        ReadingParser::with_sensor_count(3)
    }

    #[test]
    fn parses_one_reading_per_well_formed_line() {
        let batch = parser().parse(&["0;15.0;57.0\n", "1;16.0;58.0\n"]);
        assert!(batch.errors.is_empty());
        assert_eq!(
            batch.readings(),
            vec![Reading::new(0, 15.0, Some(57.0)), Reading::new(1, 16.0, Some(58.0))]
        );
    }

    #[test]
    fn error_marker_drops_only_that_sensor() {
        let batch = parser().parse(&["0;Error;Error\n", "1;16.0;58.0\n", "2;17.5;Error\n"]);
        assert_eq!(batch.readings.keys().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(batch.errors.len(), 2);
        assert_eq!(batch.errors[0].kind, ParseErrorKind::ErrorMarker);
        assert_eq!(batch.errors[0].sensor_id, Some(0));
        assert_eq!(batch.errors[0].line, "0;Error;Error");
        assert_eq!(batch.errors[1].kind, ParseErrorKind::ErrorMarker);
    }

    #[test]
    fn marker_is_case_sensitive_and_falls_back_to_number_parsing() {
        let batch = parser().parse(&["0;error;1.0"]);
        assert!(batch.is_empty());
        assert_eq!(batch.errors[0].kind, ParseErrorKind::InvalidNumber("error".into()));
    }

    #[test]
    fn all_errors_give_empty_batch() {
        let batch = parser().parse(&["0;Error;Error\n"]);
        assert!(batch.is_empty());
        assert_eq!(batch.errors.len(), 1);
    }

    #[test]
    fn empty_response_is_empty_batch_without_errors() {
        let lines: [&str; 0] = [];
        let batch = parser().parse(&lines);
        assert!(batch.is_empty());
        assert!(batch.errors.is_empty());
        assert!(parser().parse(&["\n", "   "]).errors.is_empty());
    }

    #[test]
    fn duplicate_sensor_id_keeps_last_line() {
        let batch = parser().parse(&["1;16.0;58.0\n", "0;15.0;57.0\n", "1;21.5;40.0\n"]);
        assert_eq!(batch.readings.len(), 2);
        assert_eq!(batch.readings[&1], Reading::new(1, 21.5, Some(40.0)));
    }

    #[test]
    fn rejects_bad_ids() {
        let p = parser();
        assert_eq!(
            p.parse_line("7;1.0;2.0").unwrap_err().kind,
            ParseErrorKind::UnknownSensor(7)
        );
        assert_eq!(
            p.parse_line("-1;1.0;2.0").unwrap_err().kind,
            ParseErrorKind::UnknownSensor(-1)
        );
        assert_eq!(
            p.parse_line("x;1.0;2.0").unwrap_err().kind,
            ParseErrorKind::InvalidSensorId("x".into())
        );
        assert_eq!(p.parse_line("1").unwrap_err().kind, ParseErrorKind::MissingValues);
        assert_eq!(p.parse_line("1;").unwrap_err().kind, ParseErrorKind::MissingValues);
    }

    #[test]
    fn rejects_non_finite_and_garbage_numbers() {
        let p = parser();
        assert_eq!(
            p.parse_line("0;NaN;50").unwrap_err().kind,
            ParseErrorKind::InvalidNumber("NaN".into())
        );
        assert_eq!(
            p.parse_line("0;21.0;inf").unwrap_err().kind,
            ParseErrorKind::InvalidNumber("inf".into())
        );
        assert_eq!(
            p.parse_line("0;21.0;;").unwrap_err().kind,
            ParseErrorKind::InvalidNumber("".into())
        );
    }

    #[test]
    fn temperature_only_and_extra_fields() {
        let p = parser();
        assert_eq!(p.parse_line(" 2;18.25 \r\n").unwrap(), Reading::new(2, 18.25, None));
        assert_eq!(p.parse_line("2;18.25;").unwrap(), Reading::new(2, 18.25, None));
        let r = p.parse_line("2;18.0;50.0;1013.2").unwrap();
        assert_eq!(r.rh, Some(50.0));
        assert_eq!(r.extra, vec![1013.2]);
        assert_eq!(r.to_line(), "2;18;50");
    }

    #[test]
    fn every_reading_renders_as_a_three_field_group() {
        let p = parser();
        assert_eq!(p.parse_line("0;15.0").unwrap().to_line(), "0;15;");
        let round_trip = p.parse_line(&Reading::new(1, 16.5, None).to_line()).unwrap();
        assert_eq!(round_trip, Reading::new(1, 16.5, None));
        let batch = p.parse(&["0;15.0\n", "1;16.0;58.0\n"]);
        assert_eq!(batch.to_line(), "0;15;;1;16;58");
    }

    #[test]
    fn error_display_names_kind_and_line() {
        let err = parser().parse_line("0;Error;Error").unwrap_err();
        assert_eq!(err.kind.to_string(), "sensor reported an error");
        assert_eq!(err.to_string(), "sensor reported an error in line \"0;Error;Error\"");
    }

    #[test]
    fn disabled_sensor_is_dropped() {
        let p = ReadingParser::from_registry([(0, true), (1, false)]);
        assert_eq!(p.sensor_count(), 2);
        let batch = p.parse(&["0;20.0;40.0", "1;20.0;40.0"]);
        assert_eq!(batch.readings.len(), 1);
        assert_eq!(batch.errors[0].kind, ParseErrorKind::DisabledSensor(1));
    }

    #[test]
    fn batch_line_joins_readings_in_sensor_order() {
        let batch = parser().parse(&["1;16.5;58.0", "0;15.0;57.5"]);
        assert_eq!(batch.to_line(), "0;15;57.5;1;16.5;58");
    }
}
