use nalgebra::{SMatrix, SVector};

use crate::error::NumericalError;

/// Below this squared ratio of the smallest to the largest Cholesky diagonal
/// entry of S, the innovation covariance is treated as singular.
const MIN_RECIPROCAL_CONDITION: f64 = 1e-14;

/// Linear Kalman filter with `N` states, a scalar input and `M` measurements.
///
/// ```text
/// xₖ₊₁ = A xₖ + B uₖ + w,   w ~ 𝒩(0, U)
/// yₖ   = C xₖ + v,          v ~ 𝒩(0, W)
/// ```
#[derive(Debug, Clone)]
pub struct LinearKalmanFilter<const N: usize, const M: usize> {
    /// State estimate
    x: SVector<f64, N>,
    /// Estimate covariance
    p: SMatrix<f64, N, N>,
    /// State transition
    a: SMatrix<f64, N, N>,
    /// Input
    b: SVector<f64, N>,
    /// Observation
    c: SMatrix<f64, M, N>,
    /// Process-noise covariance
    u: SMatrix<f64, N, N>,
    /// Observation-noise covariance
    w: SMatrix<f64, M, M>,
}

impl<const N: usize, const M: usize> LinearKalmanFilter<N, M> {
    pub fn new(
        x: SVector<f64, N>,
        p: SMatrix<f64, N, N>,
        a: SMatrix<f64, N, N>,
        b: SVector<f64, N>,
        c: SMatrix<f64, M, N>,
        u: SMatrix<f64, N, N>,
        w: SMatrix<f64, M, M>,
    ) -> Self {
        Self {
            x,
            p,
            a,
            b,
            c,
            u,
            w,
        }
    }

    pub fn state(&self) -> &SVector<f64, N> {
        &self.x
    }

    pub fn covariance(&self) -> &SMatrix<f64, N, N> {
        &self.p
    }

    pub fn predict(&mut self, input: f64) {
        // x̂₋ = A x̂ + B u
        self.x = self.a * self.x + self.b * input;

        // P₋ = A P Aᵀ + U
        self.p = self.a * self.p * self.a.transpose() + self.u;
        self.p = 0.5 * (self.p + self.p.transpose()); // keep symmetric
    }

    /// Folds in a measurement. On error the filter is left untouched.
    pub fn update(&mut self, y: &SVector<f64, M>) -> Result<(), NumericalError> {
        if y.iter().any(|v| !v.is_finite()) {
            return Err(NumericalError::NonFiniteMeasurement);
        }

        // Innovation ν = y − C x̂₋
        let innovation = y - self.c * self.x;

        // Innovation covariance S = C P₋ Cᵀ + W
        let s = self.c * self.p * self.c.transpose() + self.w;
        let s_inverse = invert_innovation_covariance(s)?;

        // Kalman gain K = P₋ Cᵀ S⁻¹
        let k = self.p * self.c.transpose() * s_inverse;

        // x̂ = x̂₋ + K ν,  P = (I − K C) P₋
        let x = self.x + k * innovation;
        let mut p = (SMatrix::<f64, N, N>::identity() - k * self.c) * self.p;
        p = 0.5 * (p + p.transpose());

        if x.iter().chain(p.iter()).any(|v| !v.is_finite()) {
            return Err(NumericalError::NonFiniteResult);
        }

        self.x = x;
        self.p = p;
        Ok(())
    }

    /// Predict followed by update. If the update fails, the estimate from
    /// before the predict is restored.
    pub fn step(&mut self, input: f64, y: &SVector<f64, M>) -> Result<(), NumericalError> {
        let (x, p) = (self.x, self.p);
        self.predict(input);
        self.update(y).inspect_err(|_| {
            self.x = x;
            self.p = p;
        })
    }
}

fn invert_innovation_covariance<const M: usize>(
    s: SMatrix<f64, M, M>,
) -> Result<SMatrix<f64, M, M>, NumericalError> {
    if s.iter().any(|v| !v.is_finite()) {
        return Err(NumericalError::NonFiniteResult);
    }

    let cholesky = s.cholesky().ok_or(NumericalError::IndefiniteInnovation)?;
    let diagonal = cholesky.l_dirty().diagonal();
    let (min, max) = diagonal
        .iter()
        .fold((f64::INFINITY, 0.0f64), |(lo, hi), d| (lo.min(d.abs()), hi.max(d.abs())));
    let reciprocal_condition = if max > 0.0 { (min / max).powi(2) } else { 0.0 };
    if reciprocal_condition < MIN_RECIPROCAL_CONDITION {
        return Err(NumericalError::SingularInnovation {
            reciprocal_condition,
        });
    }

    Ok(cholesky.inverse())
}
