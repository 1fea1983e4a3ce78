//! Runtime configuration from environment variables.
//! Defaults match a single board on the first USB serial adapter.

use crate::db::models::NewSensor;
use crate::transport::simulated;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "climate.sqlite3";
pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyUSB0";
pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 2;
pub const DEFAULT_SAMPLE_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_AUDIT_LOG_FILE: &str = "room.log";
pub const DEFAULT_SENSOR_NAMES: [&str; 3] = ["Living room", "Bedroom", "Outside"];

/// Which `SensorSource` implementation the logger is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    Serial,
    Simulated,
}

impl FromStr for SourceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "serial" | "live" => Ok(SourceMode::Serial),
            "simulated" | "simulation" | "sim" => Ok(SourceMode::Simulated),
            other => Err(format!("SENSOR_MODE must be 'serial' or 'simulated', got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub mode: SourceMode,
    pub serial_port: String,
    pub baud_rate: u32,
    /// Upper bound on one sensor exchange.
    pub read_timeout: Duration,
    pub sample_interval: Duration,
    /// Destination of the per-tick audit trail.
    pub audit_log_file: PathBuf,
    /// Seed list; a sensor's id is its position.
    pub sensor_names: Vec<String>,
    pub simulator_seed: u64,
    pub simulator_error_rate: f64,
    pub simulator_dropout_rate: f64,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let sample_interval_secs: u64 = parse_or(&get, "SAMPLE_INTERVAL_SECS", DEFAULT_SAMPLE_INTERVAL_SECS)?;
        if sample_interval_secs == 0 {
            return Err("SAMPLE_INTERVAL_SECS must be greater than zero".to_string());
        }
        let read_timeout_secs: u64 = parse_or(&get, "SENSOR_TIMEOUT_SECS", DEFAULT_READ_TIMEOUT_SECS)?;
        if read_timeout_secs == 0 {
            return Err("SENSOR_TIMEOUT_SECS must be greater than zero".to_string());
        }

        let sensor_names = match get("SENSOR_NAMES") {
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>(),
            None => DEFAULT_SENSOR_NAMES.iter().map(|s| s.to_string()).collect(),
        };
        if sensor_names.is_empty() {
            return Err("SENSOR_NAMES must list at least one sensor".to_string());
        }

        let simulator_error_rate = parse_rate(&get, "SIMULATOR_ERROR_RATE", 0.05)?;
        let simulator_dropout_rate = parse_rate(&get, "SIMULATOR_DROPOUT_RATE", 0.02)?;

        Ok(Config {
            database_url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            mode: parse_or(&get, "SENSOR_MODE", SourceMode::Serial)?,
            serial_port: get("SENSOR_PORT").unwrap_or_else(|| DEFAULT_SERIAL_PORT.to_string()),
            baud_rate: parse_or(&get, "SENSOR_BAUD_RATE", DEFAULT_BAUD_RATE)?,
            read_timeout: Duration::from_secs(read_timeout_secs),
            sample_interval: Duration::from_secs(sample_interval_secs),
            audit_log_file: get("AUDIT_LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_AUDIT_LOG_FILE)),
            sensor_names,
            simulator_seed: parse_or(&get, "SIMULATOR_SEED", simulated::DEFAULT_SEED)?,
            simulator_error_rate,
            simulator_dropout_rate,
        })
    }

    pub fn sensor_seeds(&self) -> Vec<NewSensor> {
        self.sensor_names
            .iter()
            .enumerate()
            .map(|(id, name)| NewSensor::new(id as i32, name.clone()))
            .collect()
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| format!("{} has invalid value '{}': {}", key, raw.trim(), e)),
        None => Ok(default),
    }
}

fn parse_rate<G>(get: &G, key: &str, default: f64) -> Result<f64, String>
where
    G: Fn(&str) -> Option<String>,
{
    let rate: f64 = parse_or(get, key, default)?;
    if !(0.0..=1.0).contains(&rate) {
        return Err(format!("{} must be between 0 and 1, got {}", key, rate));
    }
    Ok(rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(cfg.mode, SourceMode::Serial);
        assert_eq!(cfg.serial_port, "/dev/ttyUSB0");
        assert_eq!(cfg.baud_rate, 9600);
        assert_eq!(cfg.read_timeout, Duration::from_secs(2));
        assert_eq!(cfg.sample_interval, Duration::from_secs(300));
        assert_eq!(cfg.audit_log_file, PathBuf::from("room.log"));
        assert_eq!(cfg.sensor_names.len(), 3);
    }

    #[test]
    fn reads_overrides() {
        let cfg = config(&[
            ("SENSOR_MODE", "Simulated"),
            ("SAMPLE_INTERVAL_SECS", " 60 "),
            ("SENSOR_NAMES", "desk, window ,,door"),
            ("SIMULATOR_SEED", "7"),
            ("SIMULATOR_ERROR_RATE", "0.5"),
        ])
        .unwrap();
        assert_eq!(cfg.mode, SourceMode::Simulated);
        assert_eq!(cfg.sample_interval, Duration::from_secs(60));
        assert_eq!(cfg.sensor_names, vec!["desk", "window", "door"]);
        assert_eq!(cfg.simulator_seed, 7);
        assert_eq!(cfg.simulator_error_rate, 0.5);

        let seeds = cfg.sensor_seeds();
        assert_eq!(seeds[2].id, 2);
        assert_eq!(seeds[2].name, "door");
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(config(&[("SAMPLE_INTERVAL_SECS", "0")]).is_err());
        assert!(config(&[("SAMPLE_INTERVAL_SECS", "five")]).is_err());
        assert!(config(&[("SENSOR_MODE", "bluetooth")]).is_err());
        assert!(config(&[("SIMULATOR_DROPOUT_RATE", "1.5")]).is_err());
        assert!(config(&[("SENSOR_NAMES", " , ")]).is_err());
        assert!(config(&[("SENSOR_TIMEOUT_SECS", "0")]).is_err());
    }
}
