use crate::{
    controller::{Actuator, CostWeights, RiccatiSettings},
    error::ConfigurationError,
    model::PhysicalConstants,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ActuatorLimits {
    /// Commands are clamped to ±max_command, which maps onto ±supply voltage.
    pub max_command: i32,
}

impl Default for ActuatorLimits {
    fn default() -> Self {
        Self { max_command: 255 }
    }
}

/// Everything the controller needs, fixed before the first sample is read.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceConfig {
    pub constants: PhysicalConstants,
    pub weights: CostWeights,
    pub calibration_samples: usize,
    /// Nominal period between telemetry records, s. Used as dt every cycle
    /// rather than measured.
    pub sample_period: f64,
    pub riccati: RiccatiSettings,
    pub actuator: ActuatorLimits,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            constants: PhysicalConstants::default(),
            weights: CostWeights::default(),
            calibration_samples: 200,
            sample_period: 0.01,
            riccati: RiccatiSettings::default(),
            actuator: ActuatorLimits::default(),
        }
    }
}

impl BalanceConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.constants.validate()?;
        self.weights.validate()?;

        positive("sample period", self.sample_period)?;
        positive("solver step", self.riccati.step)?;
        positive("solver tolerance", self.riccati.tolerance)?;

        if self.calibration_samples == 0 {
            return Err(ConfigurationError::InvalidParameter {
                name: "calibration samples",
                reason: "at least one sample is required".into(),
            });
        }
        if self.riccati.max_iterations == 0 {
            return Err(ConfigurationError::InvalidParameter {
                name: "solver iterations",
                reason: "at least one iteration is required".into(),
            });
        }
        if self.actuator.max_command <= 0 {
            return Err(ConfigurationError::InvalidParameter {
                name: "max command",
                reason: format!("must be positive, got {}", self.actuator.max_command),
            });
        }
        Ok(())
    }

    pub fn actuator(&self) -> Actuator {
        Actuator {
            supply_voltage: self.constants.supply_voltage,
            friction_offset: self.constants.friction_voltage_offset,
            max_command: self.actuator.max_command,
        }
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), ConfigurationError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidParameter {
            name,
            reason: format!("must be positive and finite, got {value}"),
        })
    }
}
