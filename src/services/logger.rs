//! One sampling tick: read the sensors, parse, write the audit line, persist.
//!
//! Every failure inside a tick ends up in the audit log and the diagnostic
//! log; none of them leaves this module, so a bad tick never stops the loop.

use crate::audit::AuditLog;
use crate::db::store::{Store, StoreError};
use crate::parser::ReadingParser;
use crate::services::scheduler::{self, StopHandle};
use crate::source::{SensorSource, TransportError};
use crate::utils::now_seconds;
use chrono::NaiveDateTime;
use log::{debug, info};
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

/// A tick-level failure. Per-sensor parse problems are not tick failures.
#[derive(Debug)]
pub enum TickError {
    Transport(TransportError),
    Store(StoreError),
}

impl Display for TickError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TickError::Transport(_) => write!(f, "reading sensors failed"),
            TickError::Store(_) => write!(f, "persisting measurement failed"),
        }
    }
}

impl std::error::Error for TickError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TickError::Transport(e) => Some(e),
            TickError::Store(e) => Some(e),
        }
    }
}

impl From<TransportError> for TickError {
    fn from(value: TransportError) -> Self {
        TickError::Transport(value)
    }
}

impl From<StoreError> for TickError {
    fn from(value: StoreError) -> Self {
        TickError::Store(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Stored { measurement_id: i32, readings: usize },
    /// Nothing usable this tick; no measurement was written.
    Empty,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickStats {
    pub ticks: u64,
    pub stored: u64,
    pub empty: u64,
    pub failed: u64,
}

pub struct DataLogger<S: SensorSource> {
    source: S,
    parser: ReadingParser,
    store: Store,
    audit: AuditLog,
    stats: TickStats,
}

impl<S: SensorSource> DataLogger<S> {
    pub fn new(source: S, parser: ReadingParser, store: Store, audit: AuditLog) -> Self {
        DataLogger {
            source,
            parser,
            store,
            audit,
            stats: TickStats::default(),
        }
    }

    pub fn stats(&self) -> TickStats {
        self.stats
    }

    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    /// Read, parse and persist once, stamping everything with `ts`.
    pub fn tick(&mut self, ts: NaiveDateTime) -> Result<TickOutcome, TickError> {
        let lines = self.source.read()?;
        let batch = self.parser.parse(&lines);
        for err in &batch.errors {
            self.audit.record_sensor_error(&ts, err);
        }

        if batch.is_empty() {
            let reason = if batch.errors.is_empty() {
                "empty response".to_string()
            } else {
                format!("all {} answering sensor(s) failed", batch.errors.len())
            };
            self.audit.record_empty(&ts, &reason);
            return Ok(TickOutcome::Empty);
        }

        // the audit line is written before the insert so it survives a store outage
        self.audit.record_readings(&ts, &batch);
        let readings = batch.readings();
        match self.store.append(ts, &readings)? {
            Some(measurement_id) => Ok(TickOutcome::Stored {
                measurement_id,
                readings: readings.len(),
            }),
            None => Ok(TickOutcome::Empty),
        }
    }

    /// Run one tick and fold its result into the statistics and the logs.
    pub fn tick_and_record(&mut self, ts: NaiveDateTime) {
        self.stats.ticks += 1;
        match self.tick(ts) {
            Ok(TickOutcome::Stored {
                measurement_id,
                readings,
            }) => {
                self.stats.stored += 1;
                debug!("Tick: stored measurement {} ({} reading(s))", measurement_id, readings);
            }
            Ok(TickOutcome::Empty) => self.stats.empty += 1,
            Err(e) => {
                self.stats.failed += 1;
                self.audit.record_failure(&ts, &e);
            }
        }
    }

    /// Sample on the drift-compensated cadence until `stop` is triggered.
    pub fn run(&mut self, interval: Duration, stop: &StopHandle) -> TickStats {
        info!(
            "Sampling {} every {}s (audit log: {})",
            self.source.describe(),
            interval.as_secs(),
            self.audit.destination()
        );
        scheduler::run_loop(interval, stop, || self.tick_and_record(now_seconds()));
        info!(
            "Sampling stopped (ticks={}, stored={}, empty={}, failed={})",
            self.stats.ticks, self.stats.stored, self.stats.empty, self.stats.failed
        );
        self.stats
    }
}
