//! Planar pose estimator fusing wheel odometry, GPS fixes and heading.
//!
//! State vector is `[x, y, vx, vy, theta]` in a local east/north frame whose
//! origin is the first acceptable GPS fix. Prediction is driven by odometry
//! increments and only grows covariance; GPS and heading corrections use the
//! Joseph form so covariance stays symmetric and only shrinks.

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};
use crate::filters::odometry::OdometryDelta;
use crate::types::{
    wrap_radians, GpsFix, GpsPosNoise, GpsPosVec, JacobianGpsPos, JacobianHeading, PoseMat,
    PoseVec,
};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Floor applied to reported HDOP before scaling by UERE
const MIN_HDOP: f64 = 0.5;
const MIN_GPS_SIGMA_M: f64 = 0.01;
/// Below this satellite count the fix is trusted half as much
const LOW_SATELLITE_COUNT: u32 = 6;

#[derive(Clone, Debug)]
pub struct EstimatorConfig {
    /// Position random walk per second of prediction (m^2/s)
    pub q_position: f64,
    /// Fraction of travelled distance added as position variance
    pub q_distance: f64,
    pub q_velocity: f64,
    /// Heading random walk (rad^2/s)
    pub q_heading: f64,
    pub initial_velocity_var: f64,
    pub initial_heading_var: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            q_position: 0.01,
            q_distance: 0.05,
            q_velocity: 0.1,
            q_heading: 0.005,
            initial_velocity_var: 1.0,
            initial_heading_var: std::f64::consts::PI * std::f64::consts::PI,
        }
    }
}

/// Fused vehicle state
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseEstimate {
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    /// Radians, counter-clockwise from east
    pub theta: f64,
    pub theta_deg: f64,
    pub lat: f64,
    pub lon: f64,
    /// 1-sigma horizontal position error in meters
    pub uncertainty: f64,
    pub initialized: bool,
}

pub struct StateEstimator {
    config: EstimatorConfig,
    state: PoseVec,
    covariance: PoseMat,
    origin: Option<(f64, f64)>,
    heading_hint: Option<f64>,
    predict_count: u64,
    gps_updates: u64,
    heading_updates: u64,
    rejected: u64,
}

impl StateEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            config,
            state: PoseVec::zeros(),
            covariance: PoseMat::identity(),
            origin: None,
            heading_hint: None,
            predict_count: 0,
            gps_updates: 0,
            heading_updates: 0,
            rejected: 0,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.origin.is_some()
    }

    pub fn origin(&self) -> Option<(f64, f64)> {
        self.origin
    }

    pub fn gps_update_count(&self) -> u64 {
        self.gps_updates
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected
    }

    /// 1-sigma horizontal uncertainty in meters
    pub fn uncertainty(&self) -> f64 {
        ((self.covariance[(0, 0)] + self.covariance[(1, 1)]) / 2.0)
            .max(0.0)
            .sqrt()
    }

    /// Propagate with one odometry increment. Ignored until the first GPS fix.
    pub fn predict(&mut self, delta: &OdometryDelta) -> Result<()> {
        if !self.is_initialized() {
            return Ok(());
        }
        if !(delta.distance.is_finite() && delta.dtheta.is_finite() && delta.dt.is_finite())
            || delta.dt <= 0.0
        {
            self.rejected += 1;
            return Err(GatewayError::InvalidInput(
                "invalid odometry increment".to_string(),
            ));
        }

        let theta = self.state[4];
        let theta_mid = theta + delta.dtheta / 2.0;
        let theta_next = wrap_radians(theta + delta.dtheta);
        let (sin_mid, cos_mid) = theta_mid.sin_cos();
        let (sin_next, cos_next) = theta_next.sin_cos();

        let mut next = self.state;
        next[0] += delta.distance * cos_mid;
        next[1] += delta.distance * sin_mid;
        next[2] = delta.linear_vel * cos_next;
        next[3] = delta.linear_vel * sin_next;
        next[4] = theta_next;

        // Heading error turns into lateral error proportional to distance
        let d2 = delta.distance * delta.distance;
        let q_pos = self.config.q_position * delta.dt
            + self.config.q_distance * delta.distance.abs()
            + d2 * self.covariance[(4, 4)];
        let q_vel = self.config.q_velocity * delta.dt;
        let q_heading = self.config.q_heading * delta.dt;

        let mut q = PoseMat::zeros();
        q[(0, 0)] = q_pos;
        q[(1, 1)] = q_pos;
        q[(2, 2)] = q_vel;
        q[(3, 3)] = q_vel;
        q[(4, 4)] = q_heading;

        let covariance = self.covariance + q;
        self.commit(next, covariance)?;
        self.predict_count += 1;
        Ok(())
    }

    /// Correct toward a GPS fix; the first acceptable fix sets the origin.
    pub fn correct_gps(&mut self, fix: &GpsFix) -> Result<()> {
        if !fix.fix_quality.is_acceptable() {
            self.rejected += 1;
            return Err(GatewayError::InvalidInput(format!(
                "fix quality {:?} not usable",
                fix.fix_quality
            )));
        }
        if !fix.has_valid_position() || !fix.hdop.is_finite() || fix.hdop < 0.0 {
            self.rejected += 1;
            return Err(GatewayError::InvalidInput(
                "GPS fix has invalid position".to_string(),
            ));
        }

        let sigma = gps_sigma(fix);
        let var = sigma * sigma;

        let Some((origin_lat, origin_lon)) = self.origin else {
            self.initialize(fix, var);
            return Ok(());
        };

        let (mx, my) = latlon_to_meters(fix.latitude, fix.longitude, origin_lat, origin_lon);
        let z = GpsPosVec::new(mx, my);

        let mut h = JacobianGpsPos::zeros();
        h[(0, 0)] = 1.0;
        h[(1, 1)] = 1.0;
        let r = GpsPosNoise::identity() * var;

        let innovation = z - h * self.state;
        let s = h * self.covariance * h.transpose() + r;
        let Some(s_inv) = s.try_inverse() else {
            self.rejected += 1;
            return Err(GatewayError::InvalidInput(
                "singular GPS innovation covariance".to_string(),
            ));
        };
        let k = self.covariance * h.transpose() * s_inv;

        let mut next = self.state + k * innovation;
        next[4] = wrap_radians(next[4]);
        let covariance = joseph(&self.covariance, &(k * h), &(k * r * k.transpose()));

        self.commit(next, covariance)?;
        self.gps_updates += 1;
        Ok(())
    }

    /// Correct heading with an absolute measurement (radians CCW from east).
    ///
    /// Before initialization the value is kept as the starting heading.
    pub fn correct_heading(&mut self, theta: f64, variance: f64) -> Result<()> {
        if !theta.is_finite() || !variance.is_finite() || variance <= 0.0 {
            self.rejected += 1;
            return Err(GatewayError::InvalidInput(
                "invalid heading measurement".to_string(),
            ));
        }
        if !self.is_initialized() {
            self.heading_hint = Some(wrap_radians(theta));
            return Ok(());
        }

        let mut h = JacobianHeading::zeros();
        h[(0, 4)] = 1.0;
        let residual = wrap_radians(theta - self.state[4]);
        let s = self.covariance[(4, 4)] + variance;
        if s <= 0.0 {
            self.rejected += 1;
            return Err(GatewayError::InvalidInput(
                "singular heading innovation".to_string(),
            ));
        }
        let k = self.covariance * h.transpose() / s;

        let mut next = self.state + k * residual;
        next[4] = wrap_radians(next[4]);
        let covariance = joseph(&self.covariance, &(k * h), &(k * k.transpose() * variance));

        self.commit(next, covariance)?;
        self.heading_updates += 1;
        Ok(())
    }

    pub fn estimate(&self) -> PoseEstimate {
        let Some((origin_lat, origin_lon)) = self.origin else {
            return PoseEstimate::default();
        };
        let (lat, lon) = meters_to_latlon(self.state[0], self.state[1], origin_lat, origin_lon);
        PoseEstimate {
            x: self.state[0],
            y: self.state[1],
            vx: self.state[2],
            vy: self.state[3],
            theta: self.state[4],
            theta_deg: self.state[4].to_degrees(),
            lat,
            lon,
            uncertainty: self.uncertainty(),
            initialized: true,
        }
    }

    fn initialize(&mut self, fix: &GpsFix, gps_var: f64) {
        self.origin = Some((fix.latitude, fix.longitude));
        self.state = PoseVec::zeros();
        self.covariance = PoseMat::zeros();
        self.covariance[(0, 0)] = gps_var;
        self.covariance[(1, 1)] = gps_var;
        self.covariance[(2, 2)] = self.config.initial_velocity_var;
        self.covariance[(3, 3)] = self.config.initial_velocity_var;
        self.covariance[(4, 4)] = self.config.initial_heading_var;
        if let Some(theta) = self.heading_hint.take() {
            self.state[4] = theta;
        }
        log::info!(
            "State estimator initialized at ({:.7}, {:.7}), sigma {:.2} m",
            fix.latitude,
            fix.longitude,
            gps_var.sqrt()
        );
    }

    /// Accept a new state only if every entry is finite
    fn commit(&mut self, state: PoseVec, covariance: PoseMat) -> Result<()> {
        if state.iter().any(|v| !v.is_finite()) || covariance.iter().any(|v| !v.is_finite()) {
            self.rejected += 1;
            return Err(GatewayError::InvalidInput(
                "estimator update produced non-finite values".to_string(),
            ));
        }
        self.state = state;
        self.covariance = (covariance + covariance.transpose()) * 0.5;
        Ok(())
    }
}

impl Default for StateEstimator {
    fn default() -> Self {
        Self::new(EstimatorConfig::default())
    }
}

/// Measurement standard deviation implied by fix quality and geometry
pub fn gps_sigma(fix: &GpsFix) -> f64 {
    let mut sigma = fix.hdop.max(MIN_HDOP) * fix.fix_quality.uere_m();
    if fix.satellites < LOW_SATELLITE_COUNT {
        sigma *= 2.0;
    }
    sigma.max(MIN_GPS_SIGMA_M)
}

/// P = (I - KH) P (I - KH)^T + K R K^T
fn joseph(p: &PoseMat, kh: &PoseMat, krk: &PoseMat) -> PoseMat {
    let i_kh = PoseMat::identity() - kh;
    i_kh * p * i_kh.transpose() + krk
}

/// Equirectangular projection around the origin (x east, y north)
pub fn latlon_to_meters(lat: f64, lon: f64, origin_lat: f64, origin_lon: f64) -> (f64, f64) {
    let d_lat = (lat - origin_lat).to_radians();
    let d_lon = (lon - origin_lon).to_radians();
    let x = EARTH_RADIUS_M * d_lon * origin_lat.to_radians().cos();
    let y = EARTH_RADIUS_M * d_lat;
    (x, y)
}

pub fn meters_to_latlon(x: f64, y: f64, origin_lat: f64, origin_lon: f64) -> (f64, f64) {
    let d_lat = y / EARTH_RADIUS_M;
    let d_lon = x / (EARTH_RADIUS_M * origin_lat.to_radians().cos());
    (origin_lat + d_lat.to_degrees(), origin_lon + d_lon.to_degrees())
}
