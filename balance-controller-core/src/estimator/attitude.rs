use nalgebra::{Matrix1, Matrix2, SMatrix, Vector1, Vector2};

use crate::{calibration::CalibrationStatistics, error::NumericalError, kalman::LinearKalmanFilter};

/// Relative size of the gyro bias random walk compared to the rate noise.
const BIAS_DRIFT_RATIO: f64 = 1e-3;

/// Tilt estimator fusing gyro rate and accelerometer tilt.
///
/// State x = [ tilt, gyro_bias ]ᵀ  (rad, rad s⁻¹)
/// Input u = gyro pitch rate (rad s⁻¹)
/// Measurement y = accelerometer tilt with the calibration offset removed (rad)
///
/// ```text
/// tiltₖ₊₁ = tiltₖ + (uₖ − biasₖ) · dt
/// biasₖ₊₁ = biasₖ
/// ```
#[derive(Debug, Clone)]
pub struct AttitudeFilter {
    kf: LinearKalmanFilter<2, 1>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttitudeEstimate {
    pub tilt: f64,
    pub gyro_bias: f64,
    pub tilt_variance: f64,
}

impl AttitudeFilter {
    pub fn new(calibration: &CalibrationStatistics, dt: f64) -> Self {
        let gyro_variance = calibration.gyro_variance();
        let rate_noise = gyro_variance * dt * dt;

        let kf = LinearKalmanFilter::new(
            Vector2::new(0.0, calibration.gyro_bias()),
            Matrix2::new(calibration.tilt_variance(), 0.0, 0.0, gyro_variance),
            Matrix2::new(1.0, -dt, 0.0, 1.0),
            Vector2::new(dt, 0.0),
            SMatrix::<f64, 1, 2>::new(1.0, 0.0),
            Matrix2::new(rate_noise, 0.0, 0.0, rate_noise * BIAS_DRIFT_RATIO),
            Matrix1::new(calibration.tilt_variance()),
        );

        Self { kf }
    }

    pub fn step(&mut self, pitch_rate: f64, tilt: f64) -> Result<AttitudeEstimate, NumericalError> {
        self.kf.step(pitch_rate, &Vector1::new(tilt))?;
        Ok(self.estimate())
    }

    pub fn estimate(&self) -> AttitudeEstimate {
        AttitudeEstimate {
            tilt: self.kf.state()[0],
            gyro_bias: self.kf.state()[1],
            tilt_variance: self.kf.covariance()[(0, 0)],
        }
    }
}
