//! Linear algebra type aliases for the pose estimator
//!
//! Compile-time dimension checking for the planar Kalman filter.

use nalgebra::{SMatrix, SVector};

// ===== State Dimensions =====
/// [x, y, vx, vy, theta]
pub const POSE_STATE_DIM: usize = 5;

// ===== Measurement Dimensions =====
pub const MEASURE_DIM_GPS_POS: usize = 2; // (x, y)
pub const MEASURE_DIM_HEADING: usize = 1; // theta

// ===== State Types =====
pub type PoseVec = SVector<f64, POSE_STATE_DIM>;
pub type PoseMat = SMatrix<f64, POSE_STATE_DIM, POSE_STATE_DIM>;

// ===== Measurement Types =====
pub type GpsPosVec = SVector<f64, MEASURE_DIM_GPS_POS>;
pub type GpsPosNoise = SMatrix<f64, MEASURE_DIM_GPS_POS, MEASURE_DIM_GPS_POS>;
pub type JacobianGpsPos = SMatrix<f64, MEASURE_DIM_GPS_POS, POSE_STATE_DIM>; // 2x5
pub type KalmanGainGpsPos = SMatrix<f64, POSE_STATE_DIM, MEASURE_DIM_GPS_POS>; // 5x2

pub type JacobianHeading = SMatrix<f64, MEASURE_DIM_HEADING, POSE_STATE_DIM>; // 1x5
