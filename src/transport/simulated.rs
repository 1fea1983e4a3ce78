//! Deterministic stand-in for the sensor board.
//!
//! Produces the same line protocol as the firmware: plausible indoor climate
//! values that wander slowly, an occasional `Error` marker and the occasional
//! sensor that does not answer at all.

use crate::source::{SensorSource, TransportError};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

pub const DEFAULT_SEED: u64 = 0x5E45_0B0A_12D0_0001;

#[derive(Debug, Clone, Copy)]
struct SensorState {
    temperature: f64,
    rh: f64,
}

pub struct SimulatedSource {
    rng: SmallRng,
    sensors: Vec<SensorState>,
    error_rate: f64,
    dropout_rate: f64,
}

impl SimulatedSource {
    pub fn new(sensor_count: usize, seed: u64, error_rate: f64, dropout_rate: f64) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        let sensors = (0..sensor_count)
            .map(|index| SensorState {
                temperature: 19.5 + index as f64 * 0.7 + rng.random_range(-1.0..=1.0),
                rh: 45.0 + rng.random_range(-8.0..=8.0),
            })
            .collect();
        SimulatedSource {
            rng,
            sensors,
            error_rate: error_rate.clamp(0.0, 1.0),
            dropout_rate: dropout_rate.clamp(0.0, 1.0),
        }
    }

    fn step(rng: &mut SmallRng, state: &mut SensorState) {
        state.temperature = (state.temperature + rng.random_range(-0.15..=0.15)).clamp(12.0, 30.0);
        state.rh = (state.rh + rng.random_range(-0.8..=0.8)).clamp(20.0, 80.0);
    }
}

impl SensorSource for SimulatedSource {
    fn read(&mut self) -> Result<Vec<String>, TransportError> {
        let mut lines = Vec::with_capacity(self.sensors.len());
        for (index, state) in self.sensors.iter_mut().enumerate() {
            Self::step(&mut self.rng, state);
            if self.rng.random_bool(self.dropout_rate) {
                continue;
            }
            if self.rng.random_bool(self.error_rate) {
                lines.push(format!("{};Error;Error\n", index));
            } else {
                lines.push(format!("{};{:.1};{:.1}\n", index, state.temperature, state.rh));
            }
        }
        Ok(lines)
    }

    fn describe(&self) -> String {
        format!("simulator ({} sensors)", self.sensors.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_gives_same_responses() {
        let mut a = SimulatedSource::new(3, 42, 0.1, 0.1);
        let mut b = SimulatedSource::new(3, 42, 0.1, 0.1);
        for _ in 0..20 {
            assert_eq!(a.read().unwrap(), b.read().unwrap());
        }
    }

    #[test]
    fn clean_simulator_answers_every_sensor_in_protocol_format() {
        let mut source = SimulatedSource::new(4, DEFAULT_SEED, 0.0, 0.0);
        let lines = source.read().unwrap();
        assert_eq!(lines.len(), 4);
        for (index, line) in lines.iter().enumerate() {
            assert!(line.ends_with('\n'));
            let fields: Vec<&str> = line.trim().split(';').collect();
            assert_eq!(fields.len(), 3);
            assert_eq!(fields[0], index.to_string());
            let temperature: f64 = fields[1].parse().unwrap();
            let rh: f64 = fields[2].parse().unwrap();
            assert!((12.0..=30.0).contains(&temperature));
            assert!((20.0..=80.0).contains(&rh));
        }
    }

    #[test]
    fn always_failing_simulator_reports_error_markers() {
        let mut source = SimulatedSource::new(2, 7, 1.0, 0.0);
        let lines = source.read().unwrap();
        assert_eq!(lines, vec!["0;Error;Error\n".to_string(), "1;Error;Error\n".to_string()]);
    }

    #[test]
    fn full_dropout_yields_empty_response() {
        let mut source = SimulatedSource::new(3, 7, 0.0, 1.0);
        assert!(source.read().unwrap().is_empty());
    }
}
