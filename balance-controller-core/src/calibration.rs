use embedded_io_async::{Read, Write};
use nalgebra::Vector4;

use crate::{
    error::{BalanceError, Result},
    model::PhysicalConstants,
    telemetry::{TelemetryFrame, TelemetryLink},
};

/// Smallest variance used when a calibrated variance seeds a covariance.
pub const VARIANCE_FLOOR: f64 = 1e-9;

/// One sample of the four calibrated channels, in SI units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSample {
    /// accelerometer tilt, rad
    pub tilt: f64,
    /// gyro pitch rate, rad s⁻¹
    pub pitch_rate: f64,
    /// wheel rotation since the previous sample, rad
    pub wheel_delta: f64,
    /// motor speed feedback, rad s⁻¹
    pub motor_speed: f64,
}

impl ChannelSample {
    pub fn from_frame(frame: &TelemetryFrame, constants: &PhysicalConstants) -> Self {
        Self {
            tilt: frame.tilt_angle(),
            pitch_rate: frame.pitch_rate(),
            wheel_delta: frame.wheel_delta(constants),
            motor_speed: frame.motor_speed_rad(),
        }
    }

    fn as_vector(&self) -> Vector4<f64> {
        Vector4::new(self.tilt, self.pitch_rate, self.wheel_delta, self.motor_speed)
    }
}

/// Running sum and sum of squares over a fixed number of samples.
#[derive(Debug, Clone)]
pub struct CalibrationAccumulator {
    target: usize,
    count: usize,
    sum: Vector4<f64>,
    sum_squares: Vector4<f64>,
}

impl CalibrationAccumulator {
    pub fn new(target: usize) -> Self {
        Self {
            target,
            count: 0,
            sum: Vector4::zeros(),
            sum_squares: Vector4::zeros(),
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_complete(&self) -> bool {
        self.count >= self.target
    }

    /// Adds a sample. Samples beyond the target are ignored and `false` is
    /// returned.
    pub fn push(&mut self, sample: &ChannelSample) -> bool {
        if self.is_complete() {
            return false;
        }
        let x = sample.as_vector();
        self.count += 1;
        self.sum += x;
        self.sum_squares += x.component_mul(&x);
        true
    }

    pub fn finalize(self) -> Result<CalibrationStatistics> {
        if self.count == 0 || !self.is_complete() {
            return Err(BalanceError::InsufficientData {
                expected: self.target,
                received: self.count,
            });
        }

        let n = self.count as f64;
        let mean = self.sum / n;
        // E[x²] − E[x]², clamped against rounding
        let variance = (self.sum_squares / n - mean.component_mul(&mean)).map(|v| v.max(0.0));

        Ok(CalibrationStatistics {
            samples: self.count,
            mean,
            variance,
        })
    }
}

/// Frozen per-channel statistics of the stationary robot.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationStatistics {
    pub samples: usize,
    mean: Vector4<f64>,
    variance: Vector4<f64>,
}

impl CalibrationStatistics {
    pub fn tilt_offset(&self) -> f64 {
        self.mean[0]
    }

    pub fn tilt_variance(&self) -> f64 {
        self.variance[0].max(VARIANCE_FLOOR)
    }

    pub fn gyro_bias(&self) -> f64 {
        self.mean[1]
    }

    pub fn gyro_variance(&self) -> f64 {
        self.variance[1].max(VARIANCE_FLOOR)
    }

    pub fn motor_speed_variance(&self) -> f64 {
        self.variance[3].max(VARIANCE_FLOOR)
    }

    /// Unfloored means in channel order (tilt, pitch rate, wheel delta, motor speed).
    pub fn mean(&self) -> &Vector4<f64> {
        &self.mean
    }

    /// Unfloored variances in channel order.
    pub fn variance(&self) -> &Vector4<f64> {
        &self.variance
    }
}

/// Consumes exactly `samples` records from the link while the robot is held
/// still, then gives the link back together with the statistics.
pub struct CalibrationStage<'a> {
    constants: &'a PhysicalConstants,
    samples: usize,
}

impl<'a> CalibrationStage<'a> {
    pub fn new(constants: &'a PhysicalConstants, samples: usize) -> Self {
        Self { constants, samples }
    }

    pub async fn run<S>(
        &self,
        mut link: TelemetryLink<S>,
    ) -> Result<(CalibrationStatistics, TelemetryLink<S>)>
    where
        S: Read + Write,
    {
        log_info!("calibrating over {} samples, keep the robot still", self.samples);

        let mut accumulator = CalibrationAccumulator::new(self.samples);
        while !accumulator.is_complete() {
            let Some(frame) = link.read_frame().await? else {
                log_error!(
                    "telemetry ended during calibration after {} samples",
                    accumulator.count()
                );
                break;
            };
            accumulator.push(&ChannelSample::from_frame(&frame, self.constants));
        }

        let statistics = accumulator.finalize()?;
        log_info!(
            "calibration done: tilt offset {:.5} rad (var {:.3e}), gyro bias {:.5} rad/s (var {:.3e}), motor speed var {:.3e}",
            statistics.tilt_offset(),
            statistics.variance[0],
            statistics.gyro_bias(),
            statistics.variance[1],
            statistics.variance[3],
        );

        Ok((statistics, link))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use rand::{SeedableRng, rngs::StdRng};
    use rand_distr::{Distribution, Normal};

    use super::*;

    fn sample(tilt: f64) -> ChannelSample {
        ChannelSample {
            tilt,
            pitch_rate: 2.0 * tilt,
            wheel_delta: 0.0,
            motor_speed: -tilt,
        }
    }

    #[test]
    fn computes_mean_and_population_variance() {
        let mut acc = CalibrationAccumulator::new(4);
        for tilt in [1.0, 2.0, 3.0, 4.0] {
            assert!(acc.push(&sample(tilt)));
        }
        let stats = acc.finalize().unwrap();

        assert_relative_eq!(stats.tilt_offset(), 2.5);
        assert_relative_eq!(stats.variance()[0], 1.25);
        assert_relative_eq!(stats.gyro_bias(), 5.0);
        assert_relative_eq!(stats.variance()[1], 5.0);
        assert_relative_eq!(stats.mean()[3], -2.5);
        assert_relative_eq!(stats.variance()[2], 0.0);
    }

    #[test]
    fn ignores_samples_past_target() {
        let mut acc = CalibrationAccumulator::new(2);
        assert!(acc.push(&sample(1.0)));
        assert!(acc.push(&sample(1.0)));
        assert!(!acc.push(&sample(100.0)));
        let stats = acc.finalize().unwrap();
        assert_eq!(stats.samples, 2);
        assert_relative_eq!(stats.tilt_offset(), 1.0);
    }

    #[test]
    fn insufficient_samples_fail() {
        let mut acc = CalibrationAccumulator::new(3);
        acc.push(&sample(1.0));
        assert!(matches!(
            acc.finalize(),
            Err(BalanceError::InsufficientData {
                expected: 3,
                received: 1
            })
        ));
    }

    #[test]
    fn constant_channels_are_floored_for_covariance_use() {
        let mut acc = CalibrationAccumulator::new(10);
        for _ in 0..10 {
            acc.push(&sample(0.3));
        }
        let stats = acc.finalize().unwrap();
        assert!(stats.variance()[0] >= 0.0);
        assert_eq!(stats.tilt_variance(), VARIANCE_FLOOR.max(stats.variance()[0]));
        assert!(stats.gyro_variance() >= VARIANCE_FLOOR);
    }

    #[test]
    fn estimates_converge_with_sample_count() {
        let mu = 0.04;
        let sigma = 0.01;
        let normal = Normal::new(mu, sigma).unwrap();
        let mut rng = StdRng::seed_from_u64(42);

        for n in [50usize, 200, 1000] {
            let mut acc = CalibrationAccumulator::new(n);
            while !acc.is_complete() {
                acc.push(&sample(normal.sample(&mut rng)));
            }
            let stats = acc.finalize().unwrap();

            let n = n as f64;
            let mean_error = (stats.tilt_offset() - mu).abs();
            let variance_error = (stats.variance()[0] - sigma * sigma).abs();
            // five standard errors of each estimator
            assert!(mean_error < 5.0 * sigma / n.sqrt(), "n={n}: mean error {mean_error}");
            assert!(
                variance_error < 5.0 * sigma * sigma * (2.0 / n).sqrt(),
                "n={n}: variance error {variance_error}"
            );
        }
    }
}
