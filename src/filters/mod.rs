pub mod madgwick;
pub mod odometry;
pub mod state_estimator;

pub use madgwick::{MadgwickFilter, Orientation};
pub use odometry::{OdometryDelta, OdometryState, WheelOdometry};
pub use state_estimator::{EstimatorConfig, PoseEstimate, StateEstimator};
