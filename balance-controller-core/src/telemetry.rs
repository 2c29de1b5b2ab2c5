//! Text wire protocol spoken over the serial link.
//!
//! Inbound: one record per line, whitespace-delimited
//! `acc_x acc_y acc_z gyro_x gyro_y gyro_z encoder_delta motor_speed`.
//! Outbound: one signed decimal actuator command per line.

use core::fmt::Display;
use core::str::FromStr;

use embedded_io_async::{Error as _, Read, Write};
use nalgebra::Vector3;

use crate::error::TransportError;
use crate::model::PhysicalConstants;

const MAX_RECORD_LEN: usize = 256;
const READ_CHUNK_LEN: usize = 64;

/// One raw record as sent by the robot.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryFrame {
    /// accelerometer, any consistent unit
    pub acceleration: Vector3<f64>,
    /// gyroscope, deg s⁻¹
    pub angular_velocity: Vector3<f64>,
    /// encoder ticks since the previous record
    pub encoder_delta: i32,
    /// motor shaft speed feedback, deg s⁻¹
    pub motor_speed: f64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordError {
    #[error("expected 8 fields, got {0}")]
    FieldCount(usize),
    #[error("field {index} ({value:?}) is not a valid number")]
    InvalidField { index: usize, value: String },
}

impl FromStr for TelemetryFrame {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != 8 {
            return Err(RecordError::FieldCount(fields.len()));
        }

        let float = |index: usize| -> Result<f64, RecordError> {
            fields[index]
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| RecordError::InvalidField {
                    index,
                    value: fields[index].to_string(),
                })
        };

        let encoder_delta = fields[6]
            .parse::<i32>()
            .map_err(|_| RecordError::InvalidField {
                index: 6,
                value: fields[6].to_string(),
            })?;

        Ok(Self {
            acceleration: Vector3::new(float(0)?, float(1)?, float(2)?),
            angular_velocity: Vector3::new(float(3)?, float(4)?, float(5)?),
            encoder_delta,
            motor_speed: float(7)?,
        })
    }
}

impl TelemetryFrame {
    /// Tilt from the two accelerometer axes in the pitch plane, rad.
    pub fn tilt_angle(&self) -> f64 {
        self.acceleration.x.atan2(self.acceleration.z)
    }

    /// Pitch rate from the gyroscope, rad s⁻¹.
    pub fn pitch_rate(&self) -> f64 {
        self.angular_velocity.y.to_radians()
    }

    /// Wheel rotation relative to the body since the previous record, rad.
    pub fn wheel_delta(&self, constants: &PhysicalConstants) -> f64 {
        self.encoder_delta as f64 * constants.encoder_resolution()
    }

    /// Motor speed feedback, rad s⁻¹.
    pub fn motor_speed_rad(&self) -> f64 {
        self.motor_speed.to_radians()
    }
}

/// Quantized actuator command, newline-terminated decimal on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ActuatorCommand(pub i32);

impl Display for ActuatorCommand {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Line-oriented framing on top of a byte stream.
pub struct TelemetryLink<S>
where
    S: Read + Write,
{
    serial: S,
    pending: Vec<u8>,
    discarding: bool,
    skipped_records: usize,
}

impl<S> TelemetryLink<S>
where
    S: Read + Write,
{
    pub fn new(serial: S) -> Self {
        Self {
            serial,
            pending: Vec::with_capacity(MAX_RECORD_LEN),
            discarding: false,
            skipped_records: 0,
        }
    }

    /// Number of inbound records dropped because they could not be parsed.
    pub fn skipped_records(&self) -> usize {
        self.skipped_records
    }

    pub fn into_inner(self) -> S {
        self.serial
    }

    /// Reads the next well-formed record. `Ok(None)` means the stream ended.
    pub async fn read_frame(&mut self) -> Result<Option<TelemetryFrame>, TransportError> {
        let mut chunk = [0u8; READ_CHUNK_LEN];

        loop {
            while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.pending.drain(..=newline).collect();
                if core::mem::take(&mut self.discarding) {
                    continue;
                }
                if let Some(frame) = self.parse_line(&line) {
                    return Ok(Some(frame));
                }
            }

            if self.pending.len() > MAX_RECORD_LEN {
                if !self.discarding {
                    log_warn!("dropping over-long telemetry record");
                    self.skipped_records += 1;
                    self.discarding = true;
                }
                self.pending.clear();
            }

            let len = self
                .serial
                .read(&mut chunk)
                .await
                .map_err(|e| TransportError::Read(e.kind()))?;

            if len == 0 {
                // final record may lack its newline
                let rest = core::mem::take(&mut self.pending);
                if !self.discarding {
                    if let Some(frame) = self.parse_line(&rest) {
                        return Ok(Some(frame));
                    }
                }
                return Ok(None);
            }

            self.pending.extend_from_slice(&chunk[..len]);
        }
    }

    fn parse_line(&mut self, line: &[u8]) -> Option<TelemetryFrame> {
        let text = match core::str::from_utf8(line) {
            Ok(text) => text.trim(),
            Err(_) => {
                log_warn!("dropping non-utf8 telemetry record");
                self.skipped_records += 1;
                return None;
            }
        };
        if text.is_empty() {
            return None;
        }

        match text.parse::<TelemetryFrame>() {
            Ok(frame) => Some(frame),
            Err(e) => {
                self.skipped_records += 1;
                log_warn!("dropping malformed telemetry record {:?}: {}", text, e);
                None
            }
        }
    }

    pub async fn write_command(&mut self, command: ActuatorCommand) -> Result<(), TransportError> {
        let line = format!("{command}\n");
        self.serial
            .write_all(line.as_bytes())
            .await
            .map_err(|e| TransportError::Write(e.kind()))?;
        self.serial
            .flush()
            .await
            .map_err(|e| TransportError::Write(e.kind()))
    }
}
