use crate::telemetry::ActuatorCommand;

/// Turns a control voltage into the integer command the motor driver expects.
///
/// The driver maps ±`max_command` onto ±`supply_voltage`. A fixed offset is
/// added in the direction of motion to overcome static friction.
#[derive(Debug, Clone, PartialEq)]
pub struct Actuator {
    pub supply_voltage: f64,
    pub friction_offset: f64,
    pub max_command: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Actuation {
    pub command: ActuatorCommand,
    /// Voltage fed back to the state estimator as last input, V
    pub applied_voltage: f64,
}

impl Actuator {
    /// Voltage represented by one command step.
    pub fn resolution(&self) -> f64 {
        self.supply_voltage / self.max_command as f64
    }

    pub fn actuate(&self, voltage: f64) -> Actuation {
        let offset = if voltage > 0.0 {
            self.friction_offset
        } else if voltage < 0.0 {
            -self.friction_offset
        } else {
            0.0
        };

        let limit = self.max_command as f64;
        let command = ((voltage + offset) / self.supply_voltage * limit)
            .round()
            .clamp(-limit, limit);

        Actuation {
            command: ActuatorCommand(command as i32),
            applied_voltage: voltage.clamp(-self.supply_voltage, self.supply_voltage),
        }
    }
}
