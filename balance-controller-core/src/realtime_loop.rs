use core::{
    future::Future,
    pin::{Pin, pin},
};

use embassy_futures::select::{Either, select};
use embedded_io_async::{Read, Write};
use nalgebra::Vector4;

use crate::{
    calibration::{CalibrationStage, CalibrationStatistics},
    config::BalanceConfig,
    controller::{ControlGain, GainReceiver, GainStatus},
    error::{BalanceError, ConvergenceError, Result},
    estimator::{AttitudeFilter, BodyMeasurement, BodyNoise, BodyStateFilter, WheelOdometry},
    model::{DiscreteModel, DynamicsModel},
    telemetry::{ActuatorCommand, TelemetryFrame, TelemetryLink},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoopPhase {
    /// Collecting noise statistics, robot held still
    #[default]
    Calibrating,
    /// Filters running, waiting for the gain
    Ready,
    /// Filters running, commands written
    Controlling,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The telemetry stream closed
    EndOfStream,
    /// The shutdown future resolved
    Shutdown,
}

/// Everything computed in one cycle, handed to the observer.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleFrame {
    pub cycle: usize,
    pub phase: LoopPhase,
    /// nominal timestep of the cycle, s
    pub dt: f64,
    /// the record as received
    pub telemetry: TelemetryFrame,
    /// accelerometer tilt with the calibration offset removed, rad
    pub measured_tilt: f64,
    /// gyro pitch rate, rad s⁻¹
    pub pitch_rate: f64,
    pub attitude_tilt: f64,
    pub gyro_bias: f64,
    /// observation handed to the full-state filter
    pub measurement: BodyMeasurement,
    /// full-state estimate [ψ, ψ̇, φ, φ̇]
    pub state: Vector4<f64>,
    /// control voltage before friction compensation, clamped to the supply, V
    pub voltage: f64,
    pub command: Option<ActuatorCommand>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopSummary {
    /// cycles run after calibration
    pub cycles: usize,
    pub actuated_cycles: usize,
    pub numerical_faults: usize,
    pub skipped_records: usize,
    pub termination: Termination,
}

#[derive(Debug, Default)]
struct Progress {
    phase: LoopPhase,
    cycles: usize,
    actuated_cycles: usize,
    numerical_faults: usize,
    skipped_records: usize,
}

impl Progress {
    fn enter(&mut self, phase: LoopPhase) {
        log_info!("{:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    fn summary(&self, termination: Termination) -> LoopSummary {
        LoopSummary {
            cycles: self.cycles,
            actuated_cycles: self.actuated_cycles,
            numerical_faults: self.numerical_faults,
            skipped_records: self.skipped_records,
            termination,
        }
    }
}

/// Calibrate, estimate and actuate, one telemetry record at a time.
pub struct RealtimeLoop<'a> {
    config: &'a BalanceConfig,
    model: DynamicsModel,
}

impl<'a> RealtimeLoop<'a> {
    pub fn new(config: &'a BalanceConfig) -> Result<Self> {
        config.validate()?;
        let model = DynamicsModel::from_constants(&config.constants)?;
        Ok(Self { config, model })
    }

    pub fn model(&self) -> &DynamicsModel {
        &self.model
    }

    /// Runs until the stream ends, `shutdown` resolves or a fatal error occurs.
    /// No command is written before `gains` delivers a gain.
    ///
    /// Shutdown only interrupts a pending read. A cycle that has its record
    /// runs to completion, and once actuation has started a zero command is
    /// written before returning.
    pub async fn run<S, F, O>(
        &self,
        link: TelemetryLink<S>,
        gains: GainReceiver,
        shutdown: F,
        mut observer: O,
    ) -> Result<LoopSummary>
    where
        S: Read + Write,
        F: Future<Output = ()>,
        O: FnMut(&SampleFrame),
    {
        let mut progress = Progress::default();
        let shutdown = pin!(shutdown);

        let outcome = self
            .drive(link, gains, shutdown, &mut progress, &mut observer)
            .await;

        progress.enter(LoopPhase::Terminated);
        match outcome {
            Ok(termination) => {
                let summary = progress.summary(termination);
                log_info!(
                    "stopped ({:?}) after {} cycles, {} actuated, {} numerical faults, {} skipped records",
                    summary.termination,
                    summary.cycles,
                    summary.actuated_cycles,
                    summary.numerical_faults,
                    summary.skipped_records,
                );
                Ok(summary)
            }
            Err(e) => {
                log_error!("stopped after {} cycles: {}", progress.cycles, e);
                Err(e)
            }
        }
    }

    async fn drive<S, F, O>(
        &self,
        link: TelemetryLink<S>,
        mut gains: GainReceiver,
        mut shutdown: Pin<&mut F>,
        progress: &mut Progress,
        observer: &mut O,
    ) -> Result<Termination>
    where
        S: Read + Write,
        F: Future<Output = ()>,
        O: FnMut(&SampleFrame),
    {
        let config = self.config;
        let dt = config.sample_period;
        let stage = CalibrationStage::new(&config.constants, config.calibration_samples);
        let (calibration, mut link) = match select(stage.run(link), shutdown.as_mut()).await {
            Either::First(result) => result?,
            Either::Second(()) => {
                log_info!("shutdown requested during calibration");
                return Ok(Termination::Shutdown);
            }
        };
        progress.skipped_records = link.skipped_records();

        let plant = self.model.discretize(dt);
        let mut pipeline = Pipeline::new(self, &calibration, &plant);
        let actuator = config.actuator();
        let mut gain: Option<ControlGain> = None;
        let mut applied_voltage = 0.0;

        progress.enter(LoopPhase::Ready);

        let termination = loop {
            let read = match select(link.read_frame(), shutdown.as_mut()).await {
                Either::First(read) => read?,
                Either::Second(()) => {
                    log_info!("shutdown requested");
                    break Termination::Shutdown;
                }
            };
            let Some(frame) = read else {
                log_info!("telemetry stream closed");
                break Termination::EndOfStream;
            };
            progress.skipped_records = link.skipped_records();
            progress.cycles += 1;

            let measured_tilt = frame.tilt_angle() - calibration.tilt_offset();
            let pitch_rate = frame.pitch_rate();
            let estimate = pipeline.estimate(
                measured_tilt,
                pitch_rate,
                frame.encoder_delta,
                applied_voltage,
                &mut progress.numerical_faults,
            );

            if gain.is_none() {
                match gains.poll() {
                    GainStatus::Pending => {}
                    GainStatus::Ready(g) => {
                        gain = Some(accept_gain(g, &plant)?);
                        progress.enter(LoopPhase::Controlling);
                    }
                    GainStatus::Failed(e) => return Err(e.into()),
                    GainStatus::Abandoned => {
                        return Err(BalanceError::Resource(
                            "gain solver stopped without publishing a gain".into(),
                        ));
                    }
                }
            }

            let (voltage, command) = match &gain {
                Some(gain) => {
                    let actuation = actuator.actuate(gain.control_voltage(&estimate.state));
                    if actuation.command.0.abs() == actuator.max_command {
                        log_debug!("command saturated at {}", actuation.command);
                    }
                    link.write_command(actuation.command).await?;
                    progress.actuated_cycles += 1;
                    applied_voltage = actuation.applied_voltage;
                    (actuation.applied_voltage, Some(actuation.command))
                }
                None => (0.0, None),
            };

            let sample = SampleFrame {
                cycle: progress.cycles,
                phase: progress.phase,
                dt,
                telemetry: frame,
                measured_tilt,
                pitch_rate,
                attitude_tilt: estimate.attitude_tilt,
                gyro_bias: estimate.gyro_bias,
                measurement: estimate.measurement,
                state: estimate.state,
                voltage,
                command,
            };
            log_trace!("{:?}", sample);
            observer(&sample);
        };

        if gain.is_some() {
            // the motor driver holds the last command it received
            if let Err(e) = link.write_command(ActuatorCommand(0)).await {
                log_warn!("could not stop the motor: {}", e);
            }
        }
        Ok(termination)
    }
}

/// Rejects a gain that does not stabilize the plant at the loop period.
fn accept_gain(gain: ControlGain, plant: &DiscreteModel) -> Result<ControlGain> {
    let spectral_radius = gain.spectral_radius_on(plant);
    if spectral_radius >= 1.0 {
        return Err(ConvergenceError::Unstable { spectral_radius }.into());
    }
    if (gain.model.dt - plant.dt).abs() > f64::EPSILON * plant.dt {
        log_warn!(
            "gain designed for a {} s step, loop runs at {} s (closed-loop spectral radius {:.6})",
            gain.model.dt,
            plant.dt,
            spectral_radius
        );
    }
    Ok(gain)
}

struct Estimate {
    attitude_tilt: f64,
    gyro_bias: f64,
    measurement: BodyMeasurement,
    state: Vector4<f64>,
}

/// The two filters and the wheel odometry, seeded from calibration.
struct Pipeline {
    attitude: AttitudeFilter,
    body: BodyStateFilter,
    odometry: WheelOdometry,
}

impl Pipeline {
    fn new(
        owner: &RealtimeLoop<'_>,
        calibration: &CalibrationStatistics,
        plant: &DiscreteModel,
    ) -> Self {
        let config = owner.config;
        let constants = &config.constants;
        let dt = plant.dt;
        let actuator = config.actuator();

        let noise = BodyNoise::from_calibration(
            calibration,
            constants.back_emf_constant,
            actuator.resolution(),
            constants.encoder_resolution(),
            dt,
        );

        Self {
            attitude: AttitudeFilter::new(calibration, dt),
            body: BodyStateFilter::new(plant, &noise),
            odometry: WheelOdometry::new(constants.encoder_resolution(), dt),
        }
    }

    fn estimate(
        &mut self,
        measured_tilt: f64,
        pitch_rate: f64,
        encoder_delta: i32,
        applied_voltage: f64,
        numerical_faults: &mut usize,
    ) -> Estimate {
        let attitude = match self.attitude.step(pitch_rate, measured_tilt) {
            Ok(estimate) => estimate,
            Err(e) => {
                *numerical_faults += 1;
                log_warn!(
                    "attitude filter update skipped: {} ({} faults so far)",
                    e,
                    numerical_faults
                );
                self.attitude.estimate()
            }
        };

        let wheel = self.odometry.integrate(encoder_delta);
        let measurement = BodyMeasurement {
            tilt: attitude.tilt,
            tilt_rate: pitch_rate - attitude.gyro_bias,
            wheel_angle: wheel.angle,
            wheel_rate: wheel.rate,
        };

        let state = match self.body.step(applied_voltage, &measurement) {
            Ok(state) => state,
            Err(e) => {
                *numerical_faults += 1;
                log_warn!(
                    "state filter update skipped: {} ({} faults so far)",
                    e,
                    numerical_faults
                );
                *self.body.state()
            }
        };

        Estimate {
            attitude_tilt: attitude.tilt,
            gyro_bias: attitude.gyro_bias,
            measurement,
            state,
        }
    }
}
