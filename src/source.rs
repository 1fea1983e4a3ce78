//! The sensor-reading capability consumed by the data logger.
//!
//! One `read()` is one `read\n` request to the sensor board and returns the raw
//! response lines, one per sensor that answered. Implementations: the serial
//! transport (`transport::serial`) and the simulator (`transport::simulated`).

use std::fmt::{self, Display, Formatter};
use std::io;
use std::time::Duration;

/// Literal request understood by the sensor board firmware.
pub const READ_COMMAND: &[u8] = b"read\n";

#[derive(Debug)]
pub enum TransportError {
    /// The endpoint could not be opened at all.
    Open { endpoint: String, message: String },
    /// No complete line arrived before the read timeout.
    Timeout(Duration),
    Io(io::Error),
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Open { endpoint, message } => write!(f, "cannot open {}: {}", endpoint, message),
            TransportError::Timeout(t) => write!(f, "no response within {:.1}s", t.as_secs_f64()),
            TransportError::Io(e) => write!(f, "transport i/o error: {}", e),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(value: io::Error) -> Self {
        TransportError::Io(value)
    }
}

pub trait SensorSource {
    /// Request all sensors once and return the raw response lines.
    ///
    /// Sensors that did not answer are simply absent from the result.
    fn read(&mut self) -> Result<Vec<String>, TransportError>;

    /// Human-readable endpoint description for logs.
    fn describe(&self) -> String;
}

impl<S: SensorSource + ?Sized> SensorSource for Box<S> {
    fn read(&mut self) -> Result<Vec<String>, TransportError> {
        (**self).read()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
