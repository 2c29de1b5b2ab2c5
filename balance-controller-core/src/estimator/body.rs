use nalgebra::{Matrix4, Vector4};

use crate::{
    calibration::CalibrationStatistics, error::NumericalError, kalman::LinearKalmanFilter,
    model::DiscreteModel,
};

/// Floor on the process noise so the covariance never collapses onto the
/// input direction alone.
const PROCESS_NOISE_FLOOR: f64 = 1e-9;

/// Observation handed to the full-state filter each cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyMeasurement {
    /// attitude filter tilt, rad
    pub tilt: f64,
    /// gyro rate with the estimated bias removed, rad s⁻¹
    pub tilt_rate: f64,
    /// accumulated wheel rotation relative to the body, rad
    pub wheel_angle: f64,
    /// wheel rotation rate over the last cycle, rad s⁻¹
    pub wheel_rate: f64,
}

impl BodyMeasurement {
    pub fn as_vector(&self) -> Vector4<f64> {
        Vector4::new(self.tilt, self.tilt_rate, self.wheel_angle, self.wheel_rate)
    }
}

/// Noise description of the full-state filter, derived from calibration.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyNoise {
    /// variance of the voltage actually reaching the motor around the commanded one, V²
    pub voltage_variance: f64,
    /// diagonal of the observation covariance
    pub observation: Vector4<f64>,
}

impl BodyNoise {
    pub fn from_calibration(
        calibration: &CalibrationStatistics,
        back_emf_constant: f64,
        command_resolution: f64,
        encoder_resolution: f64,
        dt: f64,
    ) -> Self {
        // speed ripple seen through the back-EMF plus command quantization
        let voltage_variance = calibration.motor_speed_variance() * back_emf_constant.powi(2)
            + command_resolution.powi(2) / 12.0;

        let wheel_angle_variance = encoder_resolution.powi(2) / 12.0;
        Self {
            voltage_variance,
            observation: Vector4::new(
                calibration.tilt_variance(),
                calibration.gyro_variance(),
                wheel_angle_variance,
                wheel_angle_variance / (dt * dt),
            ),
        }
    }
}

/// Four-state estimator over [ψ, ψ̇, φ, φ̇] driven by the discretized robot model.
#[derive(Debug, Clone)]
pub struct BodyStateFilter {
    kf: LinearKalmanFilter<4, 4>,
}

impl BodyStateFilter {
    pub fn new(model: &DiscreteModel, noise: &BodyNoise) -> Self {
        let process = model.b * model.b.transpose() * noise.voltage_variance
            + Matrix4::identity() * PROCESS_NOISE_FLOOR;

        let kf = LinearKalmanFilter::new(
            Vector4::zeros(),
            Matrix4::identity(),
            model.a,
            model.b,
            Matrix4::identity(),
            process,
            Matrix4::from_diagonal(&noise.observation),
        );

        Self { kf }
    }

    /// `voltage` is the input applied over the cycle that just ended.
    pub fn step(
        &mut self,
        voltage: f64,
        measurement: &BodyMeasurement,
    ) -> Result<Vector4<f64>, NumericalError> {
        self.kf.step(voltage, &measurement.as_vector())?;
        Ok(*self.kf.state())
    }

    pub fn state(&self) -> &Vector4<f64> {
        self.kf.state()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::{
        calibration::{CalibrationAccumulator, ChannelSample},
        model::{DynamicsModel, PhysicalConstants},
    };

    fn quiet_calibration() -> CalibrationStatistics {
        let mut acc = CalibrationAccumulator::new(4);
        for tilt in [-1e-3, 1e-3, -1e-3, 1e-3] {
            acc.push(&ChannelSample {
                tilt,
                pitch_rate: tilt,
                wheel_delta: 0.0,
                motor_speed: tilt,
            });
        }
        acc.finalize().unwrap()
    }

    #[test]
    fn follows_model_consistent_trajectory() {
        let constants = PhysicalConstants::default();
        let dt = 0.01;
        let model = DynamicsModel::from_constants(&constants).unwrap().discretize(dt);
        let noise = BodyNoise::from_calibration(
            &quiet_calibration(),
            constants.back_emf_constant,
            constants.supply_voltage / 255.0,
            constants.encoder_resolution(),
            dt,
        );
        let mut filter = BodyStateFilter::new(&model, &noise);

        // open-loop pendulum falling from a small tilt while the motor pushes back
        let mut truth = Vector4::new(0.01, 0.0, 0.0, 0.0);
        for _ in 0..40 {
            let voltage = -2.0;
            truth = model.a * truth + model.b * voltage;
            let measurement = BodyMeasurement {
                tilt: truth[0],
                tilt_rate: truth[1],
                wheel_angle: truth[2],
                wheel_rate: truth[3],
            };
            filter.step(voltage, &measurement).unwrap();
        }

        let estimate = filter.state();
        assert_relative_eq!(estimate[0], truth[0], epsilon = 1e-3 * truth[0].abs().max(1.0));
        assert_relative_eq!(estimate[2], truth[2], epsilon = 1e-3 * truth[2].abs().max(1.0));
    }

    #[test]
    fn observation_noise_reflects_encoder_quantization() {
        let noise = BodyNoise::from_calibration(&quiet_calibration(), 0.5, 0.1, 0.02, 0.01);
        assert_relative_eq!(noise.observation[2], 0.02f64.powi(2) / 12.0);
        assert_relative_eq!(noise.observation[3], 0.02f64.powi(2) / 12.0 / 1e-4);
        assert!(noise.voltage_variance >= 0.1f64.powi(2) / 12.0);
    }
}
