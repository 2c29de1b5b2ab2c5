use futures::channel::oneshot;
use nalgebra::{Matrix4, RowVector4, Vector4};

use crate::{
    error::{ConfigurationError, ConvergenceError},
    model::{DiscreteModel, DynamicsModel},
};

mod actuation;

pub use actuation::{Actuation, Actuator};

/// Quadratic cost `Σ xᵀ diag(state) x + input · u²`.
#[derive(Debug, Clone, PartialEq)]
pub struct CostWeights {
    pub state: Vector4<f64>,
    pub input: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            state: Vector4::new(1.0, 1.0, 1000.0, 10.0),
            input: 1_000_000.0,
        }
    }
}

impl CostWeights {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.state.iter().any(|q| !(q.is_finite() && *q >= 0.0)) {
            return Err(ConfigurationError::InvalidParameter {
                name: "state weights",
                reason: format!("entries must be finite and non-negative, got {}", self.state.transpose()),
            });
        }
        if !(self.input.is_finite() && self.input > 0.0) {
            return Err(ConfigurationError::InvalidParameter {
                name: "input weight",
                reason: format!("must be positive, got {}", self.input),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiccatiSettings {
    /// Step the continuous model is discretized with before solving, s.
    /// This is also the period the gain is valid for.
    pub step: f64,
    /// Convergence threshold on the largest change of P, relative to max(1, |P|).
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for RiccatiSettings {
    fn default() -> Self {
        Self {
            step: 0.01,
            tolerance: 1e-10,
            max_iterations: 200_000,
        }
    }
}

/// Optimal state feedback `u = −K x`.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlGain {
    pub k: RowVector4<f64>,
    /// Stabilizing solution P of the discrete algebraic Riccati equation
    pub cost_to_go: Matrix4<f64>,
    /// The model the gain was designed for
    pub model: DiscreteModel,
    pub iterations: usize,
    /// Largest change of P on the final iteration
    pub residual: f64,
}

impl ControlGain {
    pub fn control_voltage(&self, state: &Vector4<f64>) -> f64 {
        -(self.k * state)[0]
    }

    /// Largest eigenvalue magnitude of Ad − Bd K; below one means stable.
    pub fn closed_loop_spectral_radius(&self) -> f64 {
        self.spectral_radius_on(&self.model)
    }

    /// Same as `closed_loop_spectral_radius`, for a plant sampled at another period.
    pub fn spectral_radius_on(&self, plant: &DiscreteModel) -> f64 {
        let closed_loop = plant.a - plant.b * self.k;
        closed_loop
            .complex_eigenvalues()
            .iter()
            .map(|l| l.norm())
            .fold(0.0, f64::max)
    }
}

pub struct RiccatiController;

impl RiccatiController {
    /// Solves the discrete algebraic Riccati equation for the model sampled
    /// every `settings.step` seconds.
    ///
    /// Fixed-point iteration in Joseph form starting from P = Q:
    ///
    /// ```text
    /// K = (R + BᵀPB)⁻¹ BᵀPA
    /// P ← Q + KᵀRK + (A − BK)ᵀ P (A − BK)
    /// ```
    ///
    /// The Joseph form stays symmetric positive definite even when R dwarfs
    /// BᵀPB, where the textbook recursion loses P to cancellation.
    pub fn solve(
        model: &DynamicsModel,
        weights: &CostWeights,
        settings: &RiccatiSettings,
    ) -> Result<ControlGain, ConvergenceError> {
        let discrete = model.discretize(settings.step);
        let (a, b) = (discrete.a, discrete.b);
        let q = Matrix4::from_diagonal(&weights.state);
        let r = weights.input;

        let mut p = q;
        let mut last_change = f64::INFINITY;

        for iteration in 1..=settings.max_iterations {
            let k = gain_for(&p, &discrete, r);
            let closed_loop = a - b * k;
            let mut next = q + k.transpose() * k * r + closed_loop.transpose() * p * closed_loop;
            next = 0.5 * (next + next.transpose());

            if next.iter().any(|v| !v.is_finite()) {
                return Err(ConvergenceError::Diverged { iteration });
            }

            last_change = (next - p).amax();
            let scale = next.amax().max(1.0);
            p = next;

            if last_change <= settings.tolerance * scale {
                let gain = ControlGain {
                    k: gain_for(&p, &discrete, r),
                    cost_to_go: p,
                    model: discrete,
                    iterations: iteration,
                    residual: last_change,
                };

                let spectral_radius = gain.closed_loop_spectral_radius();
                if spectral_radius >= 1.0 {
                    return Err(ConvergenceError::Unstable { spectral_radius });
                }

                log_info!(
                    "lqr gain K = [{:.5}, {:.5}, {:.5}, {:.5}] after {} iterations (residual {:.2e}), closed-loop spectral radius {:.6}",
                    gain.k[0],
                    gain.k[1],
                    gain.k[2],
                    gain.k[3],
                    iteration,
                    last_change,
                    spectral_radius,
                );
                return Ok(gain);
            }
        }

        Err(ConvergenceError::IterationLimit {
            iterations: settings.max_iterations,
            last_change,
        })
    }

    /// `Q + AᵀPA − AᵀPB (R + BᵀPB)⁻¹ BᵀPA − P`; zero at the solution.
    pub fn riccati_residual(gain: &ControlGain, weights: &CostWeights) -> Matrix4<f64> {
        let (a, b, p) = (gain.model.a, gain.model.b, gain.cost_to_go);
        let q = Matrix4::from_diagonal(&weights.state);
        let pb = p * b;
        let denominator = weights.input + (b.transpose() * pb)[0];
        q + a.transpose() * p * a
            - a.transpose() * pb * (pb.transpose() * a) / denominator
            - p
    }
}

fn gain_for(p: &Matrix4<f64>, model: &DiscreteModel, r: f64) -> RowVector4<f64> {
    let bt_p = model.b.transpose() * p;
    let denominator = r + (bt_p * model.b)[0];
    bt_p * model.a / denominator
}

/// Publishing half of the one-shot gain-ready barrier.
pub struct GainPublisher(oneshot::Sender<Result<ControlGain, ConvergenceError>>);

/// Receiving half of the one-shot gain-ready barrier.
pub struct GainReceiver(oneshot::Receiver<Result<ControlGain, ConvergenceError>>);

#[derive(Debug, PartialEq)]
pub enum GainStatus {
    Pending,
    Ready(ControlGain),
    Failed(ConvergenceError),
    /// The publisher went away without publishing.
    Abandoned,
}

pub fn gain_latch() -> (GainPublisher, GainReceiver) {
    let (tx, rx) = oneshot::channel();
    (GainPublisher(tx), GainReceiver(rx))
}

impl GainPublisher {
    /// Publishes the solver outcome. Consumes the publisher, so it can fire once.
    pub fn publish(self, gain: Result<ControlGain, ConvergenceError>) {
        if self.0.send(gain).is_err() {
            log_debug!("gain published after the control loop stopped");
        }
    }
}

impl GainReceiver {
    /// Non-blocking poll. Once something other than `Pending` is returned the
    /// latch is spent and further polls return `Abandoned`.
    pub fn poll(&mut self) -> GainStatus {
        match self.0.try_recv() {
            Ok(None) => GainStatus::Pending,
            Ok(Some(Ok(gain))) => GainStatus::Ready(gain),
            Ok(Some(Err(e))) => GainStatus::Failed(e),
            Err(oneshot::Canceled) => GainStatus::Abandoned,
        }
    }

    /// Waits for the solver outcome.
    pub async fn wait(self) -> GainStatus {
        match self.0.await {
            Ok(Ok(gain)) => GainStatus::Ready(gain),
            Ok(Err(e)) => GainStatus::Failed(e),
            Err(oneshot::Canceled) => GainStatus::Abandoned,
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::model::PhysicalConstants;

    fn default_gain() -> (ControlGain, CostWeights) {
        let model = DynamicsModel::from_constants(&PhysicalConstants::default()).unwrap();
        let weights = CostWeights::default();
        let gain = RiccatiController::solve(&model, &weights, &RiccatiSettings::default()).unwrap();
        (gain, weights)
    }

    #[test]
    fn default_weights_give_stabilizing_gain() {
        let (gain, weights) = default_gain();

        let residual = RiccatiController::riccati_residual(&gain, &weights);
        assert!(
            residual.amax() <= 1e-6 * gain.cost_to_go.amax(),
            "residual {residual}"
        );
        assert!(gain.closed_loop_spectral_radius() < 1.0);
        assert!(gain.k.iter().all(|k| k.is_finite()));

        // P is symmetric positive definite
        assert_eq!(gain.cost_to_go, gain.cost_to_go.transpose());
        assert!(gain.cost_to_go.symmetric_eigenvalues().iter().all(|e| *e > 0.0));
    }

    #[test]
    fn gain_opposes_tilt() {
        let (gain, _) = default_gain();
        // leaning forward must drive the wheels forward, under the body
        let lean = Vector4::new(0.05, 0.0, 0.0, 0.0);
        let voltage = gain.control_voltage(&lean);
        let next = gain.model.a * lean + gain.model.b * voltage;
        let coasting = gain.model.a * lean;
        assert!(next[0].abs() < coasting[0].abs());
    }

    #[test]
    fn cheap_control_gives_larger_gain() {
        let model = DynamicsModel::from_constants(&PhysicalConstants::default()).unwrap();
        let settings = RiccatiSettings::default();
        let expensive = RiccatiController::solve(&model, &CostWeights::default(), &settings).unwrap();
        let cheap = RiccatiController::solve(
            &model,
            &CostWeights {
                input: 1.0,
                ..Default::default()
            },
            &settings,
        )
        .unwrap();

        assert!(cheap.k.norm() > expensive.k.norm());
        assert!(cheap.closed_loop_spectral_radius() < expensive.closed_loop_spectral_radius());
    }

    #[test]
    fn gain_solved_at_other_step_still_stabilizes_loop_period() {
        let model = DynamicsModel::from_constants(&PhysicalConstants::default()).unwrap();
        let gain = RiccatiController::solve(
            &model,
            &CostWeights::default(),
            &RiccatiSettings {
                step: 0.02,
                ..Default::default()
            },
        )
        .unwrap();

        let loop_plant = model.discretize(0.01);
        assert!(gain.spectral_radius_on(&loop_plant) < 1.0);

        let open_loop = ControlGain {
            k: RowVector4::zeros(),
            ..gain
        };
        assert!(open_loop.spectral_radius_on(&loop_plant) > 1.0);
    }

    #[test]
    fn gives_up_after_iteration_limit() {
        let model = DynamicsModel::from_constants(&PhysicalConstants::default()).unwrap();
        let result = RiccatiController::solve(
            &model,
            &CostWeights::default(),
            &RiccatiSettings {
                max_iterations: 3,
                ..Default::default()
            },
        );
        assert!(matches!(
            result,
            Err(ConvergenceError::IterationLimit { iterations: 3, .. })
        ));
    }

    #[test]
    fn rejects_invalid_weights() {
        let weights = CostWeights {
            state: Vector4::new(1.0, -1.0, 0.0, 0.0),
            input: 1.0,
        };
        assert!(weights.validate().is_err());
        let weights = CostWeights {
            input: 0.0,
            ..Default::default()
        };
        assert!(weights.validate().is_err());
        assert!(CostWeights::default().validate().is_ok());
    }

    #[test]
    fn latch_fires_once() {
        let (gain, _) = default_gain();
        let (publisher, mut receiver) = gain_latch();
        assert_eq!(receiver.poll(), GainStatus::Pending);

        publisher.publish(Ok(gain.clone()));
        assert_eq!(receiver.poll(), GainStatus::Ready(gain));
        assert_eq!(receiver.poll(), GainStatus::Abandoned);
    }

    #[test]
    fn dropped_publisher_abandons_latch() {
        let (publisher, mut receiver) = gain_latch();
        drop(publisher);
        assert_eq!(receiver.poll(), GainStatus::Abandoned);
    }

    #[tokio::test]
    async fn latch_can_be_awaited_across_threads() {
        let (publisher, receiver) = gain_latch();
        std::thread::spawn(move || {
            let model = DynamicsModel::from_constants(&PhysicalConstants::default()).unwrap();
            publisher.publish(RiccatiController::solve(
                &model,
                &CostWeights::default(),
                &RiccatiSettings::default(),
            ));
        });

        match receiver.wait().await {
            GainStatus::Ready(gain) => assert_relative_eq!(gain.model.dt, 0.01),
            other => panic!("unexpected latch state {other:?}"),
        }
    }
}
