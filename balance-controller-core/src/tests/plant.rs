use core::convert::Infallible;

use embedded_io_async::{ErrorType, Read, Write};
use nalgebra::Vector4;
use rand::{SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal};

use crate::{config::BalanceConfig, model::DiscreteModel, model::DynamicsModel};

/// Sensor imperfections of the simulated robot.
#[derive(Debug, Clone)]
pub struct PlantNoise {
    /// accelerometer noise, m s⁻²
    pub acceleration: f64,
    /// gyro noise, deg s⁻¹
    pub gyro: f64,
    /// constant gyro offset, deg s⁻¹
    pub gyro_bias: f64,
    /// IMU mounting error, rad
    pub mount_offset: f64,
    /// motor speed feedback noise, deg s⁻¹
    pub motor_speed: f64,
}

impl Default for PlantNoise {
    fn default() -> Self {
        Self {
            acceleration: 0.05,
            gyro: 0.5,
            gyro_bias: 1.0,
            mount_offset: 0.02,
            motor_speed: 1.0,
        }
    }
}

/// Linear robot model behind the text wire protocol.
///
/// Held upright while the first `calibration_samples` records are read, then
/// released at `release_tilt` and stepped once per record with the voltage
/// of the last command it received.
pub struct SimulatedRobot {
    model: DiscreteModel,
    gravity: f64,
    encoder_resolution: f64,
    supply_voltage: f64,
    friction_offset: f64,
    max_command: f64,

    noise: PlantNoise,
    rng: StdRng,

    state: Vector4<f64>,
    voltage: f64,
    last_ticks: i64,
    emitted: usize,
    hold_for: usize,
    total_records: usize,
    release_tilt: f64,
    truncated_first_record: bool,

    outbox: Vec<u8>,
    inbox: Vec<u8>,

    commands: Vec<i32>,
    tilt_history: Vec<f64>,
}

impl SimulatedRobot {
    pub fn new(config: &BalanceConfig, total_records: usize, seed: u64) -> Self {
        let constants = &config.constants;
        let model = DynamicsModel::from_constants(constants)
            .unwrap()
            .discretize(config.sample_period);

        Self {
            model,
            gravity: constants.gravity,
            encoder_resolution: constants.encoder_resolution(),
            supply_voltage: constants.supply_voltage,
            friction_offset: constants.friction_voltage_offset,
            max_command: config.actuator.max_command as f64,
            noise: PlantNoise::default(),
            rng: StdRng::seed_from_u64(seed),
            state: Vector4::zeros(),
            voltage: 0.0,
            last_ticks: 0,
            emitted: 0,
            hold_for: config.calibration_samples,
            total_records,
            release_tilt: 0.05,
            truncated_first_record: false,
            outbox: Vec::new(),
            inbox: Vec::new(),
            commands: Vec::new(),
            tilt_history: Vec::new(),
        }
    }

    pub fn with_release_tilt(mut self, tilt: f64) -> Self {
        self.release_tilt = tilt;
        self
    }

    /// Starts the stream with the tail of a record, as when the port is
    /// opened mid-transmission.
    pub fn with_truncated_first_record(mut self) -> Self {
        self.truncated_first_record = true;
        self
    }

    pub fn commands(&self) -> &[i32] {
        &self.commands
    }

    /// True tilt at each record after release.
    pub fn tilt_history(&self) -> &[f64] {
        &self.tilt_history
    }

    fn advance(&mut self) {
        if self.emitted == self.hold_for {
            self.state = Vector4::new(self.release_tilt, 0.0, 0.0, 0.0);
        } else if self.emitted > self.hold_for {
            self.state = self.model.a * self.state + self.model.b * self.voltage;
        }
        if self.emitted >= self.hold_for {
            self.tilt_history.push(self.state[0]);
        }
    }

    fn next_record(&mut self) -> String {
        self.advance();
        self.emitted += 1;

        let gauss = |sigma: f64, rng: &mut StdRng| {
            if sigma > 0.0 {
                Normal::new(0.0, sigma).unwrap().sample(rng)
            } else {
                0.0
            }
        };

        let (tilt, tilt_rate) = (self.state[0], self.state[1]);
        let (wheel_angle, wheel_rate) = (self.state[2], self.state[3]);
        let mounted = tilt + self.noise.mount_offset;
        let acc_x = self.gravity * mounted.sin() + gauss(self.noise.acceleration, &mut self.rng);
        let acc_y = gauss(self.noise.acceleration, &mut self.rng);
        let acc_z = self.gravity * mounted.cos() + gauss(self.noise.acceleration, &mut self.rng);
        let gyro_x = gauss(self.noise.gyro, &mut self.rng);
        let gyro_y = tilt_rate.to_degrees() + self.noise.gyro_bias + gauss(self.noise.gyro, &mut self.rng);
        let gyro_z = gauss(self.noise.gyro, &mut self.rng);

        let ticks = (wheel_angle / self.encoder_resolution).floor() as i64;
        let delta = ticks - self.last_ticks;
        self.last_ticks = ticks;

        let motor_speed = wheel_rate.to_degrees() + gauss(self.noise.motor_speed, &mut self.rng);

        format!(
            "{acc_x:.6} {acc_y:.6} {acc_z:.6} {gyro_x:.6} {gyro_y:.6} {gyro_z:.6} {delta} {motor_speed:.6}\n"
        )
    }

    fn apply_command(&mut self, command: i32) {
        self.commands.push(command);
        let commanded = command as f64 / self.max_command * self.supply_voltage;
        // static friction eats the first volts
        self.voltage = commanded.signum() * (commanded.abs() - self.friction_offset).max(0.0);
    }
}

impl ErrorType for SimulatedRobot {
    type Error = Infallible;
}

impl Read for SimulatedRobot {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.outbox.is_empty() {
            if core::mem::take(&mut self.truncated_first_record) {
                self.outbox.extend_from_slice(b"0.01 0.2 -0.5\n");
            } else {
                if self.emitted >= self.total_records {
                    return Ok(0);
                }
                // let a pending shutdown get polled between records
                tokio::task::yield_now().await;
                let record = self.next_record();
                self.outbox.extend_from_slice(record.as_bytes());
            }
        }

        let len = buf.len().min(self.outbox.len());
        buf[..len].copy_from_slice(&self.outbox[..len]);
        self.outbox.drain(..len);
        Ok(len)
    }
}

impl Write for SimulatedRobot {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.inbox.extend_from_slice(buf);
        while let Some(newline) = self.inbox.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.inbox.drain(..=newline).collect();
            let command = core::str::from_utf8(&line)
                .unwrap()
                .trim()
                .parse::<i32>()
                .unwrap();
            self.apply_command(command);
        }
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
