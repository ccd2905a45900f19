//! Madgwick gradient-descent AHRS.
//!
//! Fuses accelerometer, gyroscope and (optionally) magnetometer samples into a
//! unit quaternion. `beta` is the gradient step gain: larger values converge
//! faster after a disturbance but pass more accelerometer noise into the output.
//! A zero magnetometer vector selects the 6-axis (IMU-only) update.

use nalgebra::{Quaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

/// Default filter gain
pub const DEFAULT_BETA: f64 = 0.1;

/// Largest accepted step between samples; longer gaps are rejected
pub const MAX_DT_SECS: f64 = 1.0;

/// Roll/pitch/yaw in degrees. Yaw is [-180, 180], positive counter-clockwise.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

#[derive(Clone, Debug)]
pub struct MadgwickFilter {
    beta: f64,
    q: Quaternion<f64>,
    updates: u64,
    rejected: u64,
}

impl MadgwickFilter {
    pub fn new(beta: f64) -> Self {
        Self {
            beta,
            q: Quaternion::identity(),
            updates: 0,
            rejected: 0,
        }
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    pub fn set_beta(&mut self, beta: f64) {
        self.beta = beta;
    }

    pub fn update_count(&self) -> u64 {
        self.updates
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected
    }

    /// Run one filter step.
    ///
    /// Degenerate input (zero-length accelerometer vector, non-finite values,
    /// non-positive or oversized `dt`) is rejected and leaves the quaternion as it was.
    pub fn update(
        &mut self,
        accel: Vector3<f64>,
        gyro: Vector3<f64>,
        mag: Vector3<f64>,
        dt: f64,
    ) -> Result<Orientation> {
        if let Err(e) = Self::check_inputs(&accel, &gyro, &mag, dt) {
            self.rejected += 1;
            return Err(e);
        }

        let a = accel.normalize();
        let gradient = match mag.try_normalize(1e-12) {
            Some(m) => self.marg_gradient(&a, &m),
            None => self.imu_gradient(&a),
        };

        let (q0, q1, q2, q3) = (self.q.w, self.q.i, self.q.j, self.q.k);
        let (gx, gy, gz) = (gyro.x, gyro.y, gyro.z);

        // Rate of change of quaternion from gyroscope
        let mut q_dot = Quaternion::new(
            0.5 * (-q1 * gx - q2 * gy - q3 * gz),
            0.5 * (q0 * gx + q2 * gz - q3 * gy),
            0.5 * (q0 * gy - q1 * gz + q3 * gx),
            0.5 * (q0 * gz + q1 * gy - q2 * gx),
        );

        // At the exact optimum the gradient vanishes and has no direction
        let norm = gradient.norm();
        if norm > 1e-12 {
            q_dot -= gradient / norm * self.beta;
        }

        let next = self.q + q_dot * dt;
        let next_norm = next.norm();
        if !next_norm.is_finite() || next_norm < 1e-12 {
            self.rejected += 1;
            return Err(GatewayError::InvalidInput(
                "orientation update produced a degenerate quaternion".to_string(),
            ));
        }

        self.q = next / next_norm;
        self.updates += 1;
        Ok(self.orientation())
    }

    pub fn orientation(&self) -> Orientation {
        let (q0, q1, q2, q3) = (self.q.w, self.q.i, self.q.j, self.q.k);
        let roll = (2.0 * (q0 * q1 + q2 * q3)).atan2(1.0 - 2.0 * (q1 * q1 + q2 * q2));
        let pitch = (2.0 * (q0 * q2 - q3 * q1)).clamp(-1.0, 1.0).asin();
        let yaw = (2.0 * (q0 * q3 + q1 * q2)).atan2(1.0 - 2.0 * (q2 * q2 + q3 * q3));
        Orientation {
            roll: roll.to_degrees(),
            pitch: pitch.to_degrees(),
            yaw: yaw.to_degrees(),
        }
    }

    pub fn quaternion(&self) -> Quaternion<f64> {
        self.q
    }

    pub fn reset(&mut self) {
        self.q = Quaternion::identity();
    }

    fn check_inputs(
        accel: &Vector3<f64>,
        gyro: &Vector3<f64>,
        mag: &Vector3<f64>,
        dt: f64,
    ) -> Result<()> {
        if !(dt.is_finite() && dt > 0.0 && dt <= MAX_DT_SECS) {
            return Err(GatewayError::InvalidInput(format!(
                "orientation filter dt {} out of range",
                dt
            )));
        }
        let finite = |v: &Vector3<f64>| v.iter().all(|c| c.is_finite());
        if !finite(accel) || !finite(gyro) || !finite(mag) {
            return Err(GatewayError::InvalidInput(
                "non-finite IMU sample".to_string(),
            ));
        }
        if accel.norm() < 1e-9 {
            return Err(GatewayError::InvalidInput(
                "zero-length accelerometer vector".to_string(),
            ));
        }
        Ok(())
    }

    /// Objective gradient for accelerometer only
    fn imu_gradient(&self, a: &Vector3<f64>) -> Quaternion<f64> {
        let (q0, q1, q2, q3) = (self.q.w, self.q.i, self.q.j, self.q.k);
        let (ax, ay, az) = (a.x, a.y, a.z);

        let (_2q0, _2q1, _2q2, _2q3) = (2.0 * q0, 2.0 * q1, 2.0 * q2, 2.0 * q3);
        let (_4q0, _4q1, _4q2) = (4.0 * q0, 4.0 * q1, 4.0 * q2);
        let (_8q1, _8q2) = (8.0 * q1, 8.0 * q2);
        let (q0q0, q1q1, q2q2, q3q3) = (q0 * q0, q1 * q1, q2 * q2, q3 * q3);

        Quaternion::new(
            _4q0 * q2q2 + _2q2 * ax + _4q0 * q1q1 - _2q1 * ay,
            _4q1 * q3q3 - _2q3 * ax + 4.0 * q0q0 * q1 - _2q0 * ay - _4q1
                + _8q1 * q1q1
                + _8q1 * q2q2
                + _4q1 * az,
            4.0 * q0q0 * q2 + _2q0 * ax + _4q2 * q3q3 - _2q3 * ay - _4q2
                + _8q2 * q1q1
                + _8q2 * q2q2
                + _4q2 * az,
            4.0 * q1q1 * q3 - _2q1 * ax + 4.0 * q2q2 * q3 - _2q2 * ay,
        )
    }

    /// Objective gradient for accelerometer plus magnetometer
    fn marg_gradient(&self, a: &Vector3<f64>, m: &Vector3<f64>) -> Quaternion<f64> {
        let (q0, q1, q2, q3) = (self.q.w, self.q.i, self.q.j, self.q.k);
        let (ax, ay, az) = (a.x, a.y, a.z);
        let (mx, my, mz) = (m.x, m.y, m.z);

        let _2q0mx = 2.0 * q0 * mx;
        let _2q0my = 2.0 * q0 * my;
        let _2q0mz = 2.0 * q0 * mz;
        let _2q1mx = 2.0 * q1 * mx;
        let (_2q0, _2q1, _2q2, _2q3) = (2.0 * q0, 2.0 * q1, 2.0 * q2, 2.0 * q3);
        let _2q0q2 = 2.0 * q0 * q2;
        let _2q2q3 = 2.0 * q2 * q3;
        let (q0q0, q0q1, q0q2, q0q3) = (q0 * q0, q0 * q1, q0 * q2, q0 * q3);
        let (q1q1, q1q2, q1q3) = (q1 * q1, q1 * q2, q1 * q3);
        let (q2q2, q2q3, q3q3) = (q2 * q2, q2 * q3, q3 * q3);

        // Reference direction of Earth's magnetic field
        let hx = mx * q0q0 - _2q0my * q3 + _2q0mz * q2 + mx * q1q1 + _2q1 * my * q2
            + _2q1 * mz * q3
            - mx * q2q2
            - mx * q3q3;
        let hy = _2q0mx * q3 + my * q0q0 - _2q0mz * q1 + _2q1mx * q2 - my * q1q1
            + my * q2q2
            + _2q2 * mz * q3
            - my * q3q3;
        let _2bx = (hx * hx + hy * hy).sqrt();
        let _2bz = -_2q0mx * q2 + _2q0my * q1 + mz * q0q0 + _2q1mx * q3 - mz * q1q1
            + _2q2 * my * q3
            - mz * q2q2
            + mz * q3q3;
        let _4bx = 2.0 * _2bx;
        let _4bz = 2.0 * _2bz;

        // Residuals shared by all four gradient terms
        let fa_x = 2.0 * q1q3 - _2q0q2 - ax;
        let fa_y = 2.0 * q0q1 + _2q2q3 - ay;
        let fa_z = 1.0 - 2.0 * q1q1 - 2.0 * q2q2 - az;
        let fm_x = _2bx * (0.5 - q2q2 - q3q3) + _2bz * (q1q3 - q0q2) - mx;
        let fm_y = _2bx * (q1q2 - q0q3) + _2bz * (q0q1 + q2q3) - my;
        let fm_z = _2bx * (q0q2 + q1q3) + _2bz * (0.5 - q1q1 - q2q2) - mz;

        Quaternion::new(
            -_2q2 * fa_x + _2q1 * fa_y - _2bz * q2 * fm_x
                + (-_2bx * q3 + _2bz * q1) * fm_y
                + _2bx * q2 * fm_z,
            _2q3 * fa_x + _2q0 * fa_y - 4.0 * q1 * fa_z
                + _2bz * q3 * fm_x
                + (_2bx * q2 + _2bz * q0) * fm_y
                + (_2bx * q3 - _4bz * q1) * fm_z,
            -_2q0 * fa_x + _2q3 * fa_y - 4.0 * q2 * fa_z
                + (-_4bx * q2 - _2bz * q0) * fm_x
                + (_2bx * q1 + _2bz * q3) * fm_y
                + (_2bx * q0 - _4bz * q2) * fm_z,
            _2q1 * fa_x + _2q2 * fa_y
                + (-_4bx * q3 + _2bz * q1) * fm_x
                + (-_2bx * q0 + _2bz * q2) * fm_y
                + _2bx * q1 * fm_z,
        )
    }
}

impl Default for MadgwickFilter {
    fn default() -> Self {
        Self::new(DEFAULT_BETA)
    }
}
