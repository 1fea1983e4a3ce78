//! Diesel model structs for the sensor registry and the measurement log.
//!
//! A `Measurement` is one tick; its `MeasurementValue` rows are the per-sensor
//! readings of that tick and are only ever written together with it.

use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::schema;

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = schema::sensors)]
pub struct Sensor {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::sensors)]
pub struct NewSensor {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub enabled: bool,
}

impl NewSensor {
    pub fn new(id: i32, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id,
            description: format!("sensor #{} ({})", id, name),
            name,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = schema::measurements)]
pub struct Measurement {
    pub id: i32,
    pub ts: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::measurements)]
pub struct NewMeasurement {
    pub ts: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = schema::measurement_values)]
#[diesel(primary_key(measurement_id, sensor_id))]
#[diesel(belongs_to(Measurement))]
#[diesel(belongs_to(Sensor))]
pub struct MeasurementValue {
    pub measurement_id: i32,
    pub sensor_id: i32,
    pub temperature: f64,
    pub rh: Option<f64>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::measurement_values)]
pub struct NewMeasurementValue {
    pub measurement_id: i32,
    pub sensor_id: i32,
    pub temperature: f64,
    pub rh: Option<f64>,
}
