use core::f64::consts::PI;

use nalgebra::{Matrix4, Matrix5, Vector4};
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Physical description of the robot. The body is a rigid pendulum hinged on
/// the wheel axle; both wheels and both motors are lumped together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicalConstants {
    /// m s⁻²
    pub gravity: f64,
    /// m
    pub wheel_radius: f64,
    /// kg, both wheels
    pub wheel_mass: f64,
    /// kg m², both wheels about the axle
    pub wheel_inertia: f64,
    /// kg
    pub body_mass: f64,
    /// m, axle to body centre of mass
    pub body_com_distance: f64,
    /// kg m², body about its centre of mass
    pub body_inertia: f64,
    /// motor revolutions per wheel revolution
    pub gear_ratio: f64,
    /// kg m², motor rotors
    pub rotor_inertia: f64,
    /// N m A⁻¹
    pub torque_constant: f64,
    /// V s rad⁻¹
    pub back_emf_constant: f64,
    /// Ω
    pub armature_resistance: f64,
    /// encoder ticks per motor revolution
    pub encoder_ticks_per_rev: f64,
    /// V, voltage at full-scale actuator command
    pub supply_voltage: f64,
    /// V, static friction the motor has to overcome before it turns
    pub friction_voltage_offset: f64,
}

impl Default for PhysicalConstants {
    fn default() -> Self {
        Self {
            gravity: 9.81,
            wheel_radius: 0.028,
            wheel_mass: 0.05,
            wheel_inertia: 1.96e-5,
            body_mass: 0.8,
            body_com_distance: 0.08,
            body_inertia: 1.7066666666666667e-3,
            gear_ratio: 1.0,
            rotor_inertia: 1e-5,
            torque_constant: 0.6,
            back_emf_constant: 0.47,
            armature_resistance: 6.7,
            encoder_ticks_per_rev: 360.0,
            supply_voltage: 9.0,
            friction_voltage_offset: 0.5,
        }
    }
}

impl PhysicalConstants {
    /// Wheel rotation (rad) per encoder tick.
    pub fn encoder_resolution(&self) -> f64 {
        2.0 * PI / (self.encoder_ticks_per_rev * self.gear_ratio)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let positive = [
            ("gravity", self.gravity),
            ("wheel_radius", self.wheel_radius),
            ("wheel_mass", self.wheel_mass),
            ("body_mass", self.body_mass),
            ("body_com_distance", self.body_com_distance),
            ("gear_ratio", self.gear_ratio),
            ("torque_constant", self.torque_constant),
            ("back_emf_constant", self.back_emf_constant),
            ("armature_resistance", self.armature_resistance),
            ("encoder_ticks_per_rev", self.encoder_ticks_per_rev),
            ("supply_voltage", self.supply_voltage),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigurationError::InvalidParameter {
                    name,
                    reason: format!("must be positive, got {value}"),
                });
            }
        }

        let non_negative = [
            ("wheel_inertia", self.wheel_inertia),
            ("body_inertia", self.body_inertia),
            ("rotor_inertia", self.rotor_inertia),
            ("friction_voltage_offset", self.friction_voltage_offset),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigurationError::InvalidParameter {
                    name,
                    reason: format!("must be non-negative, got {value}"),
                });
            }
        }

        Ok(())
    }
}

/// Inverse of the 2x2 generalized mass matrix over (body tilt, wheel angle).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InverseMassMatrix {
    pub a11: f64,
    pub a12: f64,
    pub a21: f64,
    pub a22: f64,
}

/// Linearized continuous-time dynamics `ẋ = A x + B u` about the upright pose.
///
/// State `x = [ψ, ψ̇, φ, φ̇]`: body tilt, tilt rate, wheel rotation relative to
/// the body, and its rate. Input `u` is the motor voltage.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicsModel {
    pub a: Matrix4<f64>,
    pub b: Vector4<f64>,
    pub inverse_mass: InverseMassMatrix,
}

/// Zero-order-hold discretization of a [`DynamicsModel`].
#[derive(Debug, Clone, PartialEq)]
pub struct DiscreteModel {
    pub a: Matrix4<f64>,
    pub b: Vector4<f64>,
    pub dt: f64,
}

const SINGULAR_MASS_TOLERANCE: f64 = 1e-12;

impl DynamicsModel {
    pub fn from_constants(c: &PhysicalConstants) -> Result<Self, ConfigurationError> {
        c.validate()?;

        let n = c.gear_ratio;

        // kinetic energy T = ½a(ψ̇+φ̇)² + b(ψ̇+φ̇)ψ̇ + ½cψ̇² + ½dφ̇²
        let a = (c.wheel_mass + c.body_mass) * c.wheel_radius.powi(2) + c.wheel_inertia;
        let b = c.body_mass * c.wheel_radius * c.body_com_distance;
        let cc = c.body_mass * c.body_com_distance.powi(2) + c.body_inertia;
        let d = n.powi(2) * c.rotor_inertia;

        let e11 = a + 2.0 * b + cc;
        let e12 = a + b;
        let e22 = a + d;

        let determinant = e11 * e22 - e12 * e12;
        if !determinant.is_finite() || determinant.abs() <= SINGULAR_MASS_TOLERANCE * (e11 * e22).abs()
        {
            return Err(ConfigurationError::DegenerateMassMatrix { determinant });
        }

        let inverse_mass = InverseMassMatrix {
            a11: e22 / determinant,
            a12: -e12 / determinant,
            a21: -e12 / determinant,
            a22: e11 / determinant,
        };

        let gravity_torque = c.body_mass * c.gravity * c.body_com_distance;
        let back_emf_damping =
            n.powi(2) * c.torque_constant * c.back_emf_constant / c.armature_resistance;
        let torque_per_volt = n * c.torque_constant / c.armature_resistance;

        let InverseMassMatrix { a11, a12, a21, a22 } = inverse_mass;

        #[rustfmt::skip]
        let a = Matrix4::new(
            0.0,                  1.0, 0.0, 0.0,
            a11 * gravity_torque, 0.0, 0.0, -a12 * back_emf_damping,
            0.0,                  0.0, 0.0, 1.0,
            a21 * gravity_torque, 0.0, 0.0, -a22 * back_emf_damping,
        );
        let b = Vector4::new(0.0, a12 * torque_per_volt, 0.0, a22 * torque_per_volt);

        log_debug!("continuous model A = {}, B = {}", a, b);

        Ok(Self { a, b, inverse_mass })
    }

    /// Exact discretization assuming the input is held constant over `dt`:
    /// `exp([[A, B], [0, 0]] dt) = [[Ad, Bd], [0, 1]]`.
    pub fn discretize(&self, dt: f64) -> DiscreteModel {
        let mut augmented = Matrix5::<f64>::zeros();
        augmented.fixed_view_mut::<4, 4>(0, 0).copy_from(&self.a);
        augmented.fixed_view_mut::<4, 1>(0, 4).copy_from(&self.b);

        let transition = (augmented * dt).exp();

        DiscreteModel {
            a: transition.fixed_view::<4, 4>(0, 0).into(),
            b: transition.fixed_view::<4, 1>(0, 4).into(),
            dt,
        }
    }
}
