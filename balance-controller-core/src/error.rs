//! Error taxonomy shared by every stage of the controller.

use embedded_io_async::ErrorKind;

/// Bad configuration or physical parameters. Always fatal.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("invalid matrix literal {literal:?}: {reason}")]
    InvalidMatrixLiteral { literal: String, reason: String },

    #[error("{name} must be a {expected_rows}x{expected_cols} matrix, got {rows}x{cols}")]
    DimensionMismatch {
        name: &'static str,
        expected_rows: usize,
        expected_cols: usize,
        rows: usize,
        cols: usize,
    },

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("generalized mass matrix is singular (determinant {determinant:e})")]
    DegenerateMassMatrix { determinant: f64 },
}

/// Failure on the sensor/actuator channel. Always fatal.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("failed to open transport: {0}")]
    Open(String),

    #[error("read from transport failed: {0:?}")]
    Read(ErrorKind),

    #[error("write to transport failed: {0:?}")]
    Write(ErrorKind),
}

/// A filter update could not be carried out. Recoverable: the filter keeps
/// its previous estimate.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NumericalError {
    #[error("innovation covariance is not positive definite")]
    IndefiniteInnovation,

    #[error("innovation covariance is near-singular (reciprocal condition {reciprocal_condition:e})")]
    SingularInnovation { reciprocal_condition: f64 },

    #[error("measurement contains non-finite values")]
    NonFiniteMeasurement,

    #[error("update produced non-finite values")]
    NonFiniteResult,
}

/// The Riccati iteration did not produce a usable gain. Fatal for actuation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConvergenceError {
    #[error("riccati iteration did not converge after {iterations} iterations (last change {last_change:e})")]
    IterationLimit { iterations: usize, last_change: f64 },

    #[error("riccati iteration diverged at iteration {iteration}")]
    Diverged { iteration: usize },

    #[error("closed loop is not stable (spectral radius {spectral_radius})")]
    Unstable { spectral_radius: f64 },
}

#[derive(Debug, thiserror::Error)]
pub enum BalanceError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("resource error: {0}")]
    Resource(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("calibration stream ended after {received} of {expected} samples")]
    InsufficientData { expected: usize, received: usize },

    #[error("numerical error: {0}")]
    Numerical(#[from] NumericalError),

    #[error("convergence error: {0}")]
    Convergence(#[from] ConvergenceError),
}

pub type Result<T> = core::result::Result<T, BalanceError>;
