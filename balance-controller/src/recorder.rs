use std::{fs::File, io, path::Path};

use anyhow::{Context, Result};
use balance_controller_core::SampleFrame;
use csv::Writer;
use log::error;

const HEADER: [&str; 25] = [
    "cycle",
    "phase",
    "dt",
    "acc_x",
    "acc_y",
    "acc_z",
    "gyro_x",
    "gyro_y",
    "gyro_z",
    "encoder_delta",
    "motor_speed",
    "measured_tilt",
    "pitch_rate",
    "attitude_tilt",
    "gyro_bias",
    "y_tilt",
    "y_tilt_rate",
    "y_wheel_angle",
    "y_wheel_rate",
    "x_tilt",
    "x_tilt_rate",
    "x_wheel_angle",
    "x_wheel_rate",
    "voltage",
    "command",
];

/// Writes one CSV row per control cycle.
///
/// Writing happens from inside the control loop, so a failed write is kept
/// and reported by `finish` instead of interrupting the loop.
pub struct Recorder<W: io::Write> {
    writer: Writer<W>,
    error: Option<csv::Error>,
}

impl Recorder<File> {
    pub fn create(path: &Path) -> Result<Self> {
        let writer = Writer::from_path(path)
            .with_context(|| format!("creating recording {}", path.display()))?;
        Ok(Self::new(writer)?)
    }
}

impl<W: io::Write> Recorder<W> {
    pub fn new(mut writer: Writer<W>) -> Result<Self, csv::Error> {
        writer.write_record(HEADER)?;
        Ok(Self {
            writer,
            error: None,
        })
    }

    pub fn record(&mut self, frame: &SampleFrame) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = self.write(frame) {
            error!("recording stopped: {}", e);
            self.error = Some(e);
        }
    }

    fn write(&mut self, frame: &SampleFrame) -> Result<(), csv::Error> {
        let command = frame
            .command
            .map(|c| c.to_string())
            .unwrap_or_default();

        let raw = &frame.telemetry;
        let measurement = frame.measurement.as_vector();

        let mut row = vec![
            frame.cycle.to_string(),
            format!("{:?}", frame.phase),
            frame.dt.to_string(),
        ];
        row.extend(raw.acceleration.iter().map(f64::to_string));
        row.extend(raw.angular_velocity.iter().map(f64::to_string));
        row.push(raw.encoder_delta.to_string());
        row.push(raw.motor_speed.to_string());
        row.extend(
            [frame.measured_tilt, frame.pitch_rate, frame.attitude_tilt, frame.gyro_bias]
                .iter()
                .map(f64::to_string),
        );
        row.extend(measurement.iter().map(f64::to_string));
        row.extend(frame.state.iter().map(f64::to_string));
        row.push(frame.voltage.to_string());
        row.push(command);

        self.writer.write_record(&row)
    }

    pub fn finish(mut self) -> Result<W> {
        if let Some(e) = self.error.take() {
            return Err(e).context("writing recording");
        }
        self.writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("flushing recording: {}", e.error()))
    }
}
