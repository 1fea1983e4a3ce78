//! Serial-port transport talking to the sensor board.
//!
//! The board answers `read\n` with one `<id>;<temperature>;<rh>` line per sensor
//! and then goes quiet, so the end of a response is detected by the read
//! timeout expiring.

use crate::source::{READ_COMMAND, SensorSource, TransportError};
use log::debug;
use serialport::{ClearBuffer, SerialPort};
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::time::{Duration, Instant};

/// A whole exchange may take at most this many read timeouts, so a line
/// that never stops chattering cannot hold up the tick.
const RESPONSE_TIMEOUTS: u32 = 4;
/// Longer lines are noise; the firmware's lines are a few dozen bytes.
const MAX_LINE_BYTES: u64 = 256;

pub struct SerialSource {
    port: Box<dyn SerialPort>,
    endpoint: String,
    timeout: Duration,
}

impl SerialSource {
    pub fn open(endpoint: &str, baud_rate: u32, timeout: Duration) -> Result<Self, TransportError> {
        let port = serialport::new(endpoint, baud_rate)
            .timeout(timeout)
            .open()
            .map_err(|e| TransportError::Open {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })?;
        Ok(SerialSource {
            port,
            endpoint: endpoint.to_string(),
            timeout,
        })
    }
}

impl SensorSource for SerialSource {
    fn read(&mut self) -> Result<Vec<String>, TransportError> {
        // leftovers from a previous, timed out exchange would shift every line
        if let Err(e) = self.port.clear(ClearBuffer::Input) {
            debug!("Serial: clearing input buffer on {} failed: {}", self.endpoint, e);
        }
        self.port.write_all(READ_COMMAND)?;
        self.port.flush()?;

        let deadline = Instant::now() + self.timeout * RESPONSE_TIMEOUTS;
        let mut reader = BufReader::new(&mut self.port);
        collect_lines(&mut reader, self.timeout, deadline)
    }

    fn describe(&self) -> String {
        format!("serial {}", self.endpoint)
    }
}

/// Read complete lines until the port times out, reaches end of input or
/// `deadline` passes. Partial and overlong lines are discarded; bytes that
/// are not UTF-8 are replaced so the parser rejects only that sensor's line.
fn collect_lines<R: BufRead>(
    reader: &mut R,
    timeout: Duration,
    deadline: Instant,
) -> Result<Vec<String>, TransportError> {
    let mut lines = Vec::new();
    let mut buf = Vec::new();
    while Instant::now() < deadline {
        buf.clear();
        match reader.by_ref().take(MAX_LINE_BYTES).read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) if buf.ends_with(b"\n") => lines.push(String::from_utf8_lossy(&buf).into_owned()),
            Ok(n) if n as u64 == MAX_LINE_BYTES => {
                debug!("Serial: discarding overlong line ({} bytes)", n);
            }
            Ok(_) => {
                debug!("Serial: discarding unterminated line {:?}", String::from_utf8_lossy(&buf));
                break;
            }
            Err(e) if e.kind() == ErrorKind::TimedOut => {
                if !buf.is_empty() {
                    debug!("Serial: discarding partial line {:?}", String::from_utf8_lossy(&buf));
                }
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    if lines.is_empty() {
        return Err(TransportError::Timeout(timeout));
    }
    Ok(lines)
}
