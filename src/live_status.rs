//! Combined telemetry snapshot served on `/data` and streamed on `/ws`.

use serde::Serialize;

use crate::clients::ntrip::NtripConfig;
use crate::clients::survive::{SurviveConfig, SurvivePose};
use crate::clients::ClientStatus;
use crate::error::Result;
use crate::peripherals::{CameraStatus, LteStatus, NetworkStatus, WifiStatus};
use crate::session::LogStatus;
use crate::state::SharedState;
use crate::types::{wrap_degrees, SatelliteSnr};

/// Statuses owned outside `SharedState`, merged into the snapshot
#[derive(Clone, Debug)]
pub struct ServiceStatus {
    pub rtk: ClientStatus<NtripConfig>,
    pub survive: ClientStatus<SurviveConfig>,
    pub log: LogStatus,
}

#[derive(Serialize, Clone, Debug)]
pub struct SensorData {
    pub battery: u8,
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    pub signal_level: i32,
    pub orientation: i32,
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
    pub lamp: i32,
    pub speed: f64,
    // GPS
    pub gps_signal: f64,
    pub avg_snr: f64,
    pub snr_values: Vec<SatelliteSnr>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub satellites: u32,
    pub fix_quality: u8,
    pub hdop: f64,
    pub hpe: f64,
    pub gps_heading: f64,
    pub gps_speed: f64,
    pub vibration: f64,
    pub timestamp: f64,
    // Raw sensor arrays
    pub accels: Vec<[f64; 3]>,
    pub gyros: Vec<[f64; 3]>,
    pub mags: Vec<[f64; 3]>,
    pub rpms: Vec<Vec<f64>>,
    // Odometry
    pub odom_x: f64,
    pub odom_y: f64,
    pub odom_theta: f64,
    pub odom_theta_deg: f64,
    pub odom_linear_vel: f64,
    pub odom_angular_vel: f64,
    // Fused estimate
    pub est_x: f64,
    pub est_y: f64,
    pub est_vx: f64,
    pub est_vy: f64,
    pub est_theta: f64,
    pub est_theta_deg: f64,
    pub est_lat: f64,
    pub est_lon: f64,
    pub est_uncertainty: f64,
    pub est_initialized: bool,
    // Peripherals and services
    pub network: NetworkStatus,
    pub wifi: WifiStatus,
    pub lte: LteStatus,
    pub camera: CameraStatus,
    pub rtk: ClientStatus<NtripConfig>,
    pub log: LogStatus,
    pub survive: ClientStatus<SurviveConfig>,
    pub survive_pose: Option<SurvivePose>,
}

impl SensorData {
    /// Merge every record into one snapshot.
    ///
    /// Each record is read under its own lock, one at a time. Fails with
    /// `Unavailable` until the first hardware packet has been stored.
    pub fn build(state: &SharedState, services: ServiceStatus) -> Result<Self> {
        let telemetry = state.latest_telemetry()?;
        let gps = state.gps.get().unwrap_or_default();
        let orientation = state.orientation.get();
        let offsets = state.orientation_offsets();
        let odom = state.odometry.get();
        let pose = state.pose.get();

        Ok(Self {
            battery: telemetry.battery,
            voltage: telemetry.voltage,
            current: telemetry.current,
            power: telemetry.power,
            signal_level: telemetry.signal_level,
            orientation: telemetry.orientation,
            roll: wrap_degrees(orientation.roll + offsets.roll),
            pitch: wrap_degrees(orientation.pitch + offsets.pitch),
            yaw: wrap_degrees(orientation.yaw + offsets.yaw),
            lamp: telemetry.lamp,
            speed: telemetry.speed,
            gps_signal: gps.signal_percent(),
            avg_snr: gps.avg_snr(),
            hpe: gps.hpe(),
            latitude: gps.latitude,
            longitude: gps.longitude,
            altitude: gps.altitude,
            satellites: gps.satellites,
            fix_quality: gps.fix_quality.into(),
            hdop: gps.hdop,
            gps_heading: gps.heading,
            gps_speed: gps.ground_speed,
            snr_values: gps.snr_values,
            vibration: telemetry.vibration,
            timestamp: telemetry.timestamp,
            accels: telemetry.accels,
            gyros: telemetry.gyros,
            mags: telemetry.mags,
            rpms: telemetry.rpms,
            odom_x: odom.x,
            odom_y: odom.y,
            odom_theta: odom.theta,
            odom_theta_deg: odom.theta_deg,
            odom_linear_vel: odom.linear_vel,
            odom_angular_vel: odom.angular_vel,
            est_x: pose.x,
            est_y: pose.y,
            est_vx: pose.vx,
            est_vy: pose.vy,
            est_theta: pose.theta,
            est_theta_deg: pose.theta_deg,
            est_lat: pose.lat,
            est_lon: pose.lon,
            est_uncertainty: pose.uncertainty,
            est_initialized: pose.initialized,
            network: state.network.get(),
            wifi: state.wifi.get(),
            lte: state.lte.get(),
            camera: state.camera.get(),
            rtk: services.rtk,
            log: services.log,
            survive: services.survive,
            survive_pose: state.survive_pose.get(),
        })
    }
}
