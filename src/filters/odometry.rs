//! Wheel odometry for a differential drive rover.
//!
//! Integrates robot-frame linear/angular velocity with the unicycle model.
//! When the angular rate is non-negligible the exact arc update is used,
//! otherwise a straight-line step. Pure dead reckoning: nothing here is ever
//! corrected toward an absolute reference.
//!
//! Frame: x forward at start, y left, theta counter-clockwise positive.

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};
use crate::types::wrap_radians;

/// Below this angular rate (rad/s) a step is integrated as a straight line
const STRAIGHT_LINE_EPS: f64 = 1e-6;

pub const DEFAULT_WHEEL_RADIUS_M: f64 = 0.065;
pub const DEFAULT_WHEELBASE_M: f64 = 0.4;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OdometryState {
    pub x: f64,
    pub y: f64,
    /// Heading in radians, wrapped to [-pi, pi]
    pub theta: f64,
    pub theta_deg: f64,
    pub linear_vel: f64,
    pub angular_vel: f64,
}

/// Motion of one integration step, consumed by the pose estimator
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct OdometryDelta {
    /// Arc length travelled (signed, negative when reversing)
    pub distance: f64,
    pub dtheta: f64,
    pub linear_vel: f64,
    pub angular_vel: f64,
    pub dt: f64,
}

#[derive(Clone, Debug)]
pub struct WheelOdometry {
    wheel_radius: f64,
    wheelbase: f64,
    state: OdometryState,
    total_distance: f64,
}

impl WheelOdometry {
    pub fn new(wheel_radius: f64, wheelbase: f64) -> Result<Self> {
        if !(wheel_radius.is_finite() && wheel_radius > 0.0) {
            return Err(GatewayError::Config(format!(
                "wheel radius must be positive, got {}",
                wheel_radius
            )));
        }
        if !(wheelbase.is_finite() && wheelbase > 0.0) {
            return Err(GatewayError::Config(format!(
                "wheelbase must be positive, got {}",
                wheelbase
            )));
        }
        Ok(Self {
            wheel_radius,
            wheelbase,
            state: OdometryState::default(),
            total_distance: 0.0,
        })
    }

    pub fn wheel_radius(&self) -> f64 {
        self.wheel_radius
    }

    pub fn wheelbase(&self) -> f64 {
        self.wheelbase
    }

    pub fn state(&self) -> OdometryState {
        self.state.clone()
    }

    pub fn total_distance(&self) -> f64 {
        self.total_distance
    }

    /// Integrate a velocity command or measurement held for `dt` seconds.
    pub fn update_velocity(&mut self, linear: f64, angular: f64, dt: f64) -> Result<OdometryDelta> {
        if !(linear.is_finite() && angular.is_finite()) {
            return Err(GatewayError::InvalidInput(
                "non-finite odometry velocity".to_string(),
            ));
        }
        if !(dt.is_finite() && dt > 0.0) {
            return Err(GatewayError::InvalidInput(format!(
                "odometry dt {} must be positive",
                dt
            )));
        }

        let theta = self.state.theta;
        let dtheta = angular * dt;
        let distance = linear * dt;

        let (dx, dy) = if angular.abs() > STRAIGHT_LINE_EPS {
            // Exact arc: radius = v / w
            let radius = linear / angular;
            (
                radius * ((theta + dtheta).sin() - theta.sin()),
                -radius * ((theta + dtheta).cos() - theta.cos()),
            )
        } else {
            let (sin_t, cos_t) = theta.sin_cos();
            (distance * cos_t, distance * sin_t)
        };

        self.state.x += dx;
        self.state.y += dy;
        self.state.theta = wrap_radians(theta + dtheta);
        self.state.theta_deg = self.state.theta.to_degrees();
        self.state.linear_vel = linear;
        self.state.angular_vel = angular;
        self.total_distance += distance.abs();

        Ok(OdometryDelta {
            distance,
            dtheta,
            linear_vel: linear,
            angular_vel: angular,
            dt,
        })
    }

    /// Integrate measured wheel speeds in RPM.
    pub fn update_wheel_rpm(&mut self, left_rpm: f64, right_rpm: f64, dt: f64) -> Result<OdometryDelta> {
        let (linear, angular) = self.wheel_rpm_to_twist(left_rpm, right_rpm);
        self.update_velocity(linear, angular, dt)
    }

    /// Differential drive kinematics: wheel RPM to (m/s, rad/s)
    pub fn wheel_rpm_to_twist(&self, left_rpm: f64, right_rpm: f64) -> (f64, f64) {
        let rpm_to_ms = 2.0 * std::f64::consts::PI * self.wheel_radius / 60.0;
        let v_left = left_rpm * rpm_to_ms;
        let v_right = right_rpm * rpm_to_ms;
        ((v_left + v_right) / 2.0, (v_right - v_left) / self.wheelbase)
    }

    pub fn reset(&mut self) {
        self.state = OdometryState::default();
        self.total_distance = 0.0;
    }
}

impl Default for WheelOdometry {
    fn default() -> Self {
        Self {
            wheel_radius: DEFAULT_WHEEL_RADIUS_M,
            wheelbase: DEFAULT_WHEELBASE_M,
            state: OdometryState::default(),
            total_distance: 0.0,
        }
    }
}

/// Split one packet RPM row into (left, right).
///
/// Two-wheel rows are `[left, right]`; four-wheel rows are
/// `[front_left, front_right, rear_left, rear_right]` and are averaged per side.
pub fn side_rpms(row: &[f64]) -> Option<(f64, f64)> {
    match row {
        [left, right] => Some((*left, *right)),
        [fl, fr, rl, rr] => Some(((fl + rl) / 2.0, (fr + rr) / 2.0)),
        _ => None,
    }
}
