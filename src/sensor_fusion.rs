// sensor_fusion.rs: fusion pipeline for one hardware packet
//
// `SensorFusion::process` is pure computation: packet in, orientation,
// odometry, pose and events out. `ingest` is the thin layer that copies the
// packet into SharedState and publishes the results record by record.

use nalgebra::Vector3;
use std::f64::consts::FRAC_PI_2;

use crate::config::{WHEELBASE_M, WHEEL_RADIUS_M};
use crate::error::Result;
use crate::filters::madgwick::DEFAULT_BETA;
use crate::filters::odometry::side_rpms;
use crate::filters::{
    EstimatorConfig, MadgwickFilter, OdometryDelta, OdometryState, Orientation, PoseEstimate,
    StateEstimator, WheelOdometry,
};
use crate::sensors::HardwarePacket;
use crate::state::{CommandedMotion, SharedState};

/// Packets between debug orientation prints
const DEBUG_PRINT_EVERY: u64 = 50;

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct FusionConfig {
    pub madgwick_beta: f64,
    pub wheel_radius: f64,
    pub wheelbase: f64,
    pub estimator: EstimatorConfig,

    // ── Heading corrections ──
    /// Magnetometer heading variance (rad^2)
    pub mag_heading_var: f64,
    /// GPS course is only trusted above this ground speed (m/s)
    pub gps_heading_min_speed: f64,
    pub gps_heading_var: f64,

    /// Largest packet gap integrated; longer gaps only resync the clock
    pub max_packet_gap_secs: f64,

    /// Real-time debug mode: print orientation periodically
    pub debug: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            madgwick_beta: DEFAULT_BETA,
            wheel_radius: WHEEL_RADIUS_M,
            wheelbase: WHEELBASE_M,
            estimator: EstimatorConfig::default(),
            mag_heading_var: 0.05,
            gps_heading_min_speed: 0.5,
            gps_heading_var: 0.02,
            max_packet_gap_secs: 1.0,
            debug: false,
        }
    }
}

// ─── Events ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum FusionEvent {
    EstimatorInitialized { lat: f64, lon: f64 },
    GpsRejected { reason: String },
    ImuSamplesRejected { count: usize },
    PacketGap { gap_secs: f64 },
    HeadingRejected { source: HeadingSource, reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeadingSource {
    Magnetometer,
    GpsCourse,
}

// ─── Fusion output ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default)]
pub struct FusionOutput {
    pub orientation: Orientation,
    pub odometry: OdometryState,
    pub pose: PoseEstimate,
    pub events: Vec<FusionEvent>,
}

/// Where the odometry increment for a packet came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotionSource {
    WheelRpm,
    Commanded,
}

// ─── The main fusion struct ──────────────────────────────────────────────────

pub struct SensorFusion {
    config: FusionConfig,
    ahrs: MadgwickFilter,
    odometry: WheelOdometry,
    estimator: StateEstimator,

    last_packet_ts: Option<f64>,
    last_gps_ts: Option<f64>,
    last_motion_source: Option<MotionSource>,
    packets: u64,
}

impl SensorFusion {
    pub fn new(config: FusionConfig) -> Result<Self> {
        Ok(Self {
            ahrs: MadgwickFilter::new(config.madgwick_beta),
            odometry: WheelOdometry::new(config.wheel_radius, config.wheelbase)?,
            estimator: StateEstimator::new(config.estimator.clone()),
            config,
            last_packet_ts: None,
            last_gps_ts: None,
            last_motion_source: None,
            packets: 0,
        })
    }

    pub fn packets_processed(&self) -> u64 {
        self.packets
    }

    pub fn last_motion_source(&self) -> Option<MotionSource> {
        self.last_motion_source
    }

    pub fn estimator(&self) -> &StateEstimator {
        &self.estimator
    }

    /// Run one packet through the AHRS, odometry and estimator.
    ///
    /// Wheel RPMs drive odometry when present, otherwise the last commanded
    /// motion does. The first packet only establishes the clock.
    pub fn process(&mut self, packet: &HardwarePacket, commanded: CommandedMotion) -> FusionOutput {
        let mut events = Vec::new();
        self.packets += 1;

        let dt = self.packet_dt(packet.captured_at, &mut events);

        if let Some(dt) = dt {
            self.update_orientation(packet, dt, &mut events);
            if let Some(delta) = self.update_odometry(packet, commanded, dt) {
                // Estimator ignores prediction until initialized
                if let Err(e) = self.estimator.predict(&delta) {
                    log::debug!("[FUSION] Prediction rejected: {}", e);
                }
            }
            self.apply_mag_heading(packet, &mut events);
        }

        self.apply_gps(packet, &mut events);

        if self.config.debug && self.packets % DEBUG_PRINT_EVERY == 0 {
            let o = self.ahrs.orientation();
            log::info!(
                "[FUSION] #{} roll={:.1} pitch={:.1} yaw={:.1}",
                self.packets,
                o.roll,
                o.pitch,
                o.yaw
            );
        }

        FusionOutput {
            orientation: self.ahrs.orientation(),
            odometry: self.odometry.state(),
            pose: self.estimator.estimate(),
            events,
        }
    }

    /// Copy the packet into shared state, fuse it, publish the results.
    pub fn ingest(&mut self, state: &SharedState, packet: HardwarePacket) -> Vec<FusionEvent> {
        let commanded = state.commanded.get();
        let output = self.process(&packet, commanded);

        let HardwarePacket {
            telemetry,
            gps,
            calibration,
            ..
        } = packet;
        state.telemetry.set(Some(telemetry));
        if let Some(fix) = gps {
            state.gps.set(Some(fix));
        }
        if let Some(calibration) = calibration {
            state.calibration.set(Some(calibration));
        }
        state.orientation.set(output.orientation);
        state.odometry.set(output.odometry);
        state.pose.set(output.pose);

        for event in &output.events {
            match event {
                FusionEvent::EstimatorInitialized { lat, lon } => {
                    log::info!("[FUSION] Estimator initialized at {:.7}, {:.7}", lat, lon)
                }
                FusionEvent::GpsRejected { reason } => {
                    log::debug!("[FUSION] GPS fix rejected: {}", reason)
                }
                FusionEvent::ImuSamplesRejected { count } => {
                    log::debug!("[FUSION] {} IMU samples rejected", count)
                }
                FusionEvent::PacketGap { gap_secs } => {
                    log::warn!("[FUSION] {:.2}s gap between packets, not integrated", gap_secs)
                }
                FusionEvent::HeadingRejected { source, reason } => {
                    log::debug!("[FUSION] {:?} heading rejected: {}", source, reason)
                }
            }
        }
        output.events
    }

    fn packet_dt(&mut self, captured_at: f64, events: &mut Vec<FusionEvent>) -> Option<f64> {
        if !captured_at.is_finite() {
            return None;
        }
        let previous = self.last_packet_ts.replace(captured_at)?;
        let dt = captured_at - previous;
        if dt <= 0.0 {
            return None;
        }
        if dt > self.config.max_packet_gap_secs {
            events.push(FusionEvent::PacketGap { gap_secs: dt });
            return None;
        }
        Some(dt)
    }

    fn update_orientation(&mut self, packet: &HardwarePacket, dt: f64, events: &mut Vec<FusionEvent>) {
        let t = &packet.telemetry;
        let n = t.accels.len().min(t.gyros.len());
        if n == 0 {
            return;
        }
        let step = dt / n as f64;
        let mut rejected = 0;
        for i in 0..n {
            let accel = Vector3::from(t.accels[i]);
            let gyro = Vector3::from(t.gyros[i]);
            let mag = t.mags.get(i).map(|m| Vector3::from(*m)).unwrap_or_else(Vector3::zeros);
            if self.ahrs.update(accel, gyro, mag, step).is_err() {
                rejected += 1;
            }
        }
        if rejected > 0 {
            events.push(FusionEvent::ImuSamplesRejected { count: rejected });
        }
    }

    fn update_odometry(
        &mut self,
        packet: &HardwarePacket,
        commanded: CommandedMotion,
        dt: f64,
    ) -> Option<OdometryDelta> {
        let rpms = packet.telemetry.rpms.last().and_then(|row| side_rpms(row));
        let (source, result) = match rpms {
            Some((left, right)) => (
                MotionSource::WheelRpm,
                self.odometry.update_wheel_rpm(left, right, dt),
            ),
            None => (
                MotionSource::Commanded,
                self.odometry.update_velocity(commanded.linear, commanded.angular, dt),
            ),
        };
        self.last_motion_source = Some(source);
        match result {
            Ok(delta) => Some(delta),
            Err(e) => {
                log::debug!("[FUSION] Odometry update rejected: {}", e);
                None
            }
        }
    }

    fn apply_mag_heading(&mut self, packet: &HardwarePacket, events: &mut Vec<FusionEvent>) {
        let has_mag = packet
            .telemetry
            .mags
            .iter()
            .any(|m| m.iter().any(|v| *v != 0.0));
        if !has_mag {
            return;
        }
        // AHRS yaw is counter-clockwise from magnetic north; estimator theta is from east
        let theta = FRAC_PI_2 + self.ahrs.orientation().yaw.to_radians();
        self.correct_heading(HeadingSource::Magnetometer, theta, self.config.mag_heading_var, events);
    }

    fn apply_gps(&mut self, packet: &HardwarePacket, events: &mut Vec<FusionEvent>) {
        let Some(fix) = &packet.gps else {
            return;
        };
        // Hardware repeats the last fix between GPS updates
        if self.last_gps_ts == Some(fix.timestamp) {
            return;
        }
        self.last_gps_ts = Some(fix.timestamp);

        let was_initialized = self.estimator.is_initialized();
        if let Err(e) = self.estimator.correct_gps(fix) {
            events.push(FusionEvent::GpsRejected {
                reason: e.to_string(),
            });
            return;
        }
        if !was_initialized {
            events.push(FusionEvent::EstimatorInitialized {
                lat: fix.latitude,
                lon: fix.longitude,
            });
        }

        if fix.ground_speed > self.config.gps_heading_min_speed && fix.heading.is_finite() {
            // Course over ground is clockwise from north
            let theta = FRAC_PI_2 - fix.heading.to_radians();
            self.correct_heading(HeadingSource::GpsCourse, theta, self.config.gps_heading_var, events);
        }
    }

    fn correct_heading(
        &mut self,
        source: HeadingSource,
        theta: f64,
        variance: f64,
        events: &mut Vec<FusionEvent>,
    ) {
        if let Err(e) = self.estimator.correct_heading(theta, variance) {
            events.push(FusionEvent::HeadingRejected {
                source,
                reason: e.to_string(),
            });
        }
    }
}
