//! SQLite-backed measurement store.
//!
//! Owns the single database connection of the process. Schema changes are
//! embedded diesel migrations, recorded in `__diesel_schema_migrations`, so
//! opening an already initialized database applies nothing.

use crate::db::models::{Measurement, MeasurementValue, NewMeasurement, NewMeasurementValue, NewSensor, Sensor};
use crate::parser::Reading;
use crate::schema;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::result::{ConnectionError, Error as DieselError};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use log::{debug, info};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[derive(Debug)]
pub enum StoreError {
    Connection(ConnectionError),
    Migration(String),
    Query(DieselError),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Connection(e) => write!(f, "database connection failed: {}", e),
            StoreError::Migration(e) => write!(f, "applying database migrations failed: {}", e),
            StoreError::Query(e) => write!(f, "database query failed: {}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Connection(e) => Some(e),
            StoreError::Query(e) => Some(e),
            StoreError::Migration(_) => None,
        }
    }
}

impl From<ConnectionError> for StoreError {
    fn from(value: ConnectionError) -> Self {
        StoreError::Connection(value)
    }
}

impl From<DieselError> for StoreError {
    fn from(value: DieselError) -> Self {
        StoreError::Query(value)
    }
}

/// Which value column a time series query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Temperature,
    RelativeHumidity,
}

impl FromStr for Field {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "temperature" | "temp" | "t" => Ok(Field::Temperature),
            "rh" | "humidity" => Ok(Field::RelativeHumidity),
            other => Err(format!("unknown field '{}' (expected temperature or rh)", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoint {
    pub ts: NaiveDateTime,
    pub value: Option<f64>,
}

pub struct Store {
    conn: SqliteConnection,
    url: String,
}

impl Store {
    /// Connect, apply pending migrations and seed `sensors`.
    pub fn open(database_url: &str, sensors: &[NewSensor]) -> Result<Self, StoreError> {
        let conn = SqliteConnection::establish(database_url)?;
        let mut store = Store {
            conn,
            url: database_url.to_string(),
        };
        diesel::sql_query("PRAGMA foreign_keys = ON").execute(&mut store.conn)?;
        store.initialize_schema(sensors)?;
        Ok(store)
    }

    /// Bring the schema up to date and insert any missing seed sensors.
    /// Safe to call repeatedly.
    pub fn initialize_schema(&mut self, sensors: &[NewSensor]) -> Result<(), StoreError> {
        let applied = self
            .conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        if applied.is_empty() {
            info!("Database schema is up to date; no migrations were applied");
        } else {
            let names = applied.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ");
            info!("Applied {} database migration(s): {}", applied.len(), names);
        }

        use schema::sensors::dsl as S;
        let mut seeded = 0;
        for sensor in sensors {
            seeded += diesel::insert_or_ignore_into(S::sensors)
                .values(sensor)
                .execute(&mut self.conn)?;
        }
        if seeded > 0 {
            info!("Seeded {} sensor(s)", seeded);
        }
        Ok(())
    }

    /// Insert one measurement and its values as a single transaction.
    ///
    /// Returns the new measurement id, or `None` without touching the
    /// database when `readings` is empty.
    pub fn append(&mut self, ts: NaiveDateTime, readings: &[Reading]) -> Result<Option<i32>, StoreError> {
        if readings.is_empty() {
            return Ok(None);
        }

        use schema::measurement_values::dsl as V;
        use schema::measurements::dsl as M;

        let id = self.conn.transaction::<i32, DieselError, _>(|conn| {
            let measurement_id: i32 = diesel::insert_into(M::measurements)
                .values(&NewMeasurement { ts })
                .returning(M::id)
                .get_result(conn)?;

            let rows = readings
                .iter()
                .map(|r| NewMeasurementValue {
                    measurement_id,
                    sensor_id: r.sensor_id,
                    temperature: r.temperature,
                    rh: r.rh,
                })
                .collect::<Vec<_>>();
            for row in &rows {
                diesel::insert_into(V::measurement_values).values(row).execute(conn)?;
            }
            Ok(measurement_id)
        })?;

        debug!("Store: measurement {} written with {} value(s)", id, readings.len());
        Ok(Some(id))
    }

    /// One field of one sensor over the closed range `[start, end]`, oldest first.
    pub fn query(
        &mut self,
        sensor_id: i32,
        field: Field,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<SeriesPoint>, StoreError> {
        use schema::measurement_values::dsl as V;
        use schema::measurements::dsl as M;

        let rows: Vec<(NaiveDateTime, f64, Option<f64>)> = V::measurement_values
            .inner_join(M::measurements)
            .filter(V::sensor_id.eq(sensor_id))
            .filter(M::ts.ge(start).and(M::ts.le(end)))
            .order((M::ts.asc(), M::id.asc()))
            .select((M::ts, V::temperature, V::rh))
            .load(&mut self.conn)?;

        Ok(rows
            .into_iter()
            .map(|(ts, temperature, rh)| SeriesPoint {
                ts,
                value: match field {
                    Field::Temperature => Some(temperature),
                    Field::RelativeHumidity => rh,
                },
            })
            .collect())
    }

    pub fn sensors(&mut self) -> Result<Vec<Sensor>, StoreError> {
        use schema::sensors::dsl as S;
        Ok(S::sensors
            .order(S::id.asc())
            .select(Sensor::as_select())
            .load(&mut self.conn)?)
    }

    /// Returns false when no sensor has that id.
    pub fn set_sensor_enabled(&mut self, sensor_id: i32, enabled: bool) -> Result<bool, StoreError> {
        use schema::sensors::dsl as S;
        let updated = diesel::update(S::sensors.filter(S::id.eq(sensor_id)))
            .set(S::enabled.eq(enabled))
            .execute(&mut self.conn)?;
        Ok(updated > 0)
    }

    /// Most recent measurement together with its values.
    pub fn last_measurement(&mut self) -> Result<Option<(Measurement, Vec<MeasurementValue>)>, StoreError> {
        use schema::measurement_values::dsl as V;
        use schema::measurements::dsl as M;

        let Some(measurement) = M::measurements
            .order(M::id.desc())
            .select(Measurement::as_select())
            .first(&mut self.conn)
            .optional()?
        else {
            return Ok(None);
        };
        let values = MeasurementValue::belonging_to(&measurement)
            .order(V::sensor_id.asc())
            .select(MeasurementValue::as_select())
            .load(&mut self.conn)?;
        Ok(Some((measurement, values)))
    }

    pub fn measurement_count(&mut self) -> Result<i64, StoreError> {
        use schema::measurements::dsl as M;
        Ok(M::measurements.count().get_result(&mut self.conn)?)
    }

    pub fn value_count(&mut self) -> Result<i64, StoreError> {
        use schema::measurement_values::dsl as V;
        Ok(V::measurement_values.count().get_result(&mut self.conn)?)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        debug!("Closing database {}", self.url);
    }
}
