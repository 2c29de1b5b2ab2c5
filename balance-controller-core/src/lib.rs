mod fmt;

pub mod calibration;
pub mod config;
pub mod controller;
pub mod error;
pub mod estimator;
pub mod kalman;
pub mod matrix_literal;
pub mod model;
pub mod realtime_loop;
pub mod telemetry;

pub use calibration::{CalibrationStage, CalibrationStatistics};
pub use config::{ActuatorLimits, BalanceConfig};
pub use controller::{
    ControlGain, CostWeights, GainPublisher, GainReceiver, GainStatus, RiccatiController,
    RiccatiSettings, gain_latch,
};
pub use error::{
    BalanceError, ConfigurationError, ConvergenceError, NumericalError, Result, TransportError,
};
pub use estimator::BodyMeasurement;
pub use matrix_literal::{MatrixLiteral, format_matrix, parse_matrix};
pub use model::{DiscreteModel, DynamicsModel, PhysicalConstants};
pub use realtime_loop::{LoopPhase, LoopSummary, RealtimeLoop, SampleFrame, Termination};
pub use telemetry::{ActuatorCommand, TelemetryFrame, TelemetryLink};

#[cfg(test)]
mod tests;
