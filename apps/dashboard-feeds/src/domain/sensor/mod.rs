//! Sensor Telemetry Types
//!
//! Domain types for the environmental sensor stream pushed over the
//! persistent channel.
//!
//! # Wire Format
//!
//! Data frames are JSON objects:
//!
//! ```json
//! {"mac":"AA:BB:CC:DD:EE:FF","humidity":45.2,"temperature":21.4,
//!  "pressure":1013.1,"battery":3050,"rssi":-71,
//!  "timestamp":"2026-10-13T13:32:00Z"}
//! ```
//!
//! Keepalives are bare literals (`ping` / `pong`) in either direction and are
//! never JSON. Anything else is a malformed frame.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Keepalive payload sent by the client.
pub const KEEPALIVE_PING: &str = "ping";

/// Keepalive acknowledgment sent by the server.
pub const KEEPALIVE_PONG: &str = "pong";

/// One reading from the environmental sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Sensor MAC address.
    pub mac: String,
    /// Relative humidity in percent.
    pub humidity: f64,
    /// Temperature in degrees Celsius.
    pub temperature: f64,
    /// Air pressure in hPa.
    pub pressure: f64,
    /// Battery voltage in millivolts.
    pub battery: u32,
    /// Signal strength in dBm.
    pub rssi: i32,
    /// Time the reading was taken.
    pub timestamp: DateTime<Utc>,
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    /// Liveness-only frame, carries no data.
    Keepalive,
    /// A sensor data frame.
    Reading(SensorReading),
}

/// Errors classifying an inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Frame was empty or whitespace only.
    #[error("empty frame")]
    Empty,
    /// Frame was not a valid sensor reading.
    #[error("malformed sensor frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl StreamFrame {
    /// Classify a text frame received on the channel.
    ///
    /// Keepalive literals are matched case-insensitively after trimming and
    /// are never treated as parse failures.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] if the frame is neither a keepalive nor a
    /// valid sensor reading.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(FrameError::Empty);
        }

        if is_keepalive(trimmed) {
            return Ok(Self::Keepalive);
        }

        let reading: SensorReading = serde_json::from_str(trimmed)?;
        Ok(Self::Reading(reading))
    }
}

fn is_keepalive(trimmed: &str) -> bool {
    trimmed.eq_ignore_ascii_case(KEEPALIVE_PONG) || trimmed.eq_ignore_ascii_case(KEEPALIVE_PING)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{"mac":"AA:BB:CC:DD:EE:FF","humidity":45.25,"temperature":21.4,"pressure":1013.1,"battery":3050,"rssi":-71,"timestamp":"2026-10-13T13:32:00Z"}"#;

    #[test]
    fn parses_data_frame() {
        let frame = StreamFrame::parse(SAMPLE).unwrap();
        let StreamFrame::Reading(reading) = frame else {
            panic!("expected reading");
        };
        assert_eq!(reading.mac, "AA:BB:CC:DD:EE:FF");
        assert_eq!(reading.battery, 3050);
        assert_eq!(reading.rssi, -71);
        assert!((reading.humidity - 45.25).abs() < f64::EPSILON);
    }

    #[test]
    fn keepalive_literals_are_not_parse_failures() {
        assert_eq!(StreamFrame::parse("pong").unwrap(), StreamFrame::Keepalive);
        assert_eq!(StreamFrame::parse(" PONG\n").unwrap(), StreamFrame::Keepalive);
        assert_eq!(StreamFrame::parse("ping").unwrap(), StreamFrame::Keepalive);
    }

    #[test]
    fn malformed_frames_are_rejected() {
        assert!(matches!(
            StreamFrame::parse("{\"mac\":\"x\"}"),
            Err(FrameError::Malformed(_))
        ));
        assert!(matches!(
            StreamFrame::parse("hello"),
            Err(FrameError::Malformed(_))
        ));
        assert!(matches!(StreamFrame::parse("   "), Err(FrameError::Empty)));
    }
}
