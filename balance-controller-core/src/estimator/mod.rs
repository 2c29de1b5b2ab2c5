mod attitude;
mod body;

pub use attitude::{AttitudeEstimate, AttitudeFilter};
pub use body::{BodyMeasurement, BodyNoise, BodyStateFilter};

/// Running integral of encoder ticks, converted to wheel kinematics.
#[derive(Debug, Clone)]
pub struct WheelOdometry {
    ticks: i64,
    resolution: f64,
    dt: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelKinematics {
    /// rad
    pub angle: f64,
    /// rad s⁻¹
    pub rate: f64,
}

impl WheelOdometry {
    /// `resolution` is the wheel rotation per tick in rad.
    pub fn new(resolution: f64, dt: f64) -> Self {
        Self {
            ticks: 0,
            resolution,
            dt,
        }
    }

    pub fn integrate(&mut self, encoder_delta: i32) -> WheelKinematics {
        self.ticks += encoder_delta as i64;
        WheelKinematics {
            angle: self.ticks as f64 * self.resolution,
            rate: encoder_delta as f64 * self.resolution / self.dt,
        }
    }

    pub fn ticks(&self) -> i64 {
        self.ticks
    }
}
