pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{GatewayError, Result};

/// One decoded hardware packet.
///
/// IMU arrays hold one `[x, y, z]` row per sample in the packet. Accelerometer
/// units are irrelevant to the orientation filter (it normalizes), gyroscope rows
/// are rad/s. `rpms` rows carry per-wheel RPM, either `[left, right]` or
/// `[front_left, front_right, rear_left, rear_right]`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTelemetry {
    pub battery: u8,
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    pub signal_level: i32,
    pub orientation: i32,
    pub lamp: i32,
    pub speed: f64,
    pub vibration: f64,
    pub timestamp: f64,
    pub accels: Vec<[f64; 3]>,
    pub gyros: Vec<[f64; 3]>,
    pub mags: Vec<[f64; 3]>,
    pub rpms: Vec<Vec<f64>>,
}

/// NMEA GGA fix quality indicator
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum FixQuality {
    #[default]
    Invalid,
    Gps,
    Dgps,
    Pps,
    RtkFixed,
    RtkFloat,
    DeadReckoning,
}

impl FixQuality {
    /// Whether the estimator may initialize from or correct toward this fix
    pub fn is_acceptable(self) -> bool {
        matches!(
            self,
            FixQuality::Gps
                | FixQuality::Dgps
                | FixQuality::Pps
                | FixQuality::RtkFixed
                | FixQuality::RtkFloat
        )
    }

    /// User equivalent range error in meters for the given solution type
    pub fn uere_m(self) -> f64 {
        match self {
            FixQuality::RtkFixed => 0.02,
            FixQuality::RtkFloat => 0.5,
            FixQuality::Dgps => 1.5,
            _ => 5.0,
        }
    }
}

impl TryFrom<u8> for FixQuality {
    type Error = GatewayError;

    fn try_from(code: u8) -> Result<Self> {
        Ok(match code {
            0 => FixQuality::Invalid,
            1 => FixQuality::Gps,
            2 => FixQuality::Dgps,
            3 => FixQuality::Pps,
            4 => FixQuality::RtkFixed,
            5 => FixQuality::RtkFloat,
            6 => FixQuality::DeadReckoning,
            other => {
                return Err(GatewayError::InvalidInput(format!(
                    "unknown fix quality code {}",
                    other
                )))
            }
        })
    }
}

impl From<FixQuality> for u8 {
    fn from(quality: FixQuality) -> u8 {
        match quality {
            FixQuality::Invalid => 0,
            FixQuality::Gps => 1,
            FixQuality::Dgps => 2,
            FixQuality::Pps => 3,
            FixQuality::RtkFixed => 4,
            FixQuality::RtkFloat => 5,
            FixQuality::DeadReckoning => 6,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SatelliteSnr {
    pub prn: u16,
    pub snr: f64,
}

/// Latest satellite fix
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub satellites: u32,
    pub fix_quality: FixQuality,
    pub hdop: f64,
    /// Course over ground, degrees clockwise from north
    pub heading: f64,
    /// Ground speed in m/s
    pub ground_speed: f64,
    pub snr_values: Vec<SatelliteSnr>,
    pub timestamp: f64,
}

const SNR_FLOOR_DBHZ: f64 = 20.0;
const SNR_CEIL_DBHZ: f64 = 45.0;

impl GpsFix {
    pub fn avg_snr(&self) -> f64 {
        if self.snr_values.is_empty() {
            return 0.0;
        }
        self.snr_values.iter().map(|s| s.snr).sum::<f64>() / self.snr_values.len() as f64
    }

    /// Signal strength 0-100 % derived from the average SNR
    pub fn signal_percent(&self) -> f64 {
        let pct = (self.avg_snr() - SNR_FLOOR_DBHZ) / (SNR_CEIL_DBHZ - SNR_FLOOR_DBHZ) * 100.0;
        pct.clamp(0.0, 100.0)
    }

    /// Horizontal position error estimate (HDOP * UERE) in meters
    pub fn hpe(&self) -> f64 {
        self.hdop * self.fix_quality.uere_m()
    }

    /// Coordinates are finite and inside the WGS84 range
    pub fn has_valid_position(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude.abs() <= 90.0
            && self.longitude.abs() <= 180.0
    }
}

/// IMU and magnetometer bias values reported by the hardware
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationData {
    pub acc_bias: [u16; 3],
    pub gyro_bias: [u16; 3],
    pub mag_bias: [u16; 3],
}

/// User calibration correction applied on top of the orientation filter, degrees
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrientationOffsets {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

const OFFSET_LIMIT_DEG: f64 = 180.0;

impl OrientationOffsets {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("Roll", self.roll), ("Pitch", self.pitch), ("Yaw", self.yaw)] {
            if !value.is_finite() || !(-OFFSET_LIMIT_DEG..=OFFSET_LIMIT_DEG).contains(&value) {
                return Err(GatewayError::InvalidInput(format!(
                    "{} offset must be between -180 and 180",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Rolling health counters
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub packets_last_10s: u64,
    pub errors_last_10s: u64,
    pub data_rate_hz: f64,
    pub uptime_seconds: f64,
}

/// Wrap an angle in degrees to [-180, 180]
pub fn wrap_degrees(deg: f64) -> f64 {
    let mut wrapped = (deg + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 && deg > 0.0 {
        wrapped = 180.0;
    }
    wrapped
}

/// Wrap an angle in radians to [-pi, pi]
pub fn wrap_radians(rad: f64) -> f64 {
    use std::f64::consts::PI;
    let mut wrapped = (rad + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped == -PI && rad > 0.0 {
        wrapped = PI;
    }
    wrapped
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fix_quality_codes() {
        assert_eq!(FixQuality::try_from(4).unwrap(), FixQuality::RtkFixed);
        assert!(FixQuality::try_from(9).is_err());
        assert!(!FixQuality::Invalid.is_acceptable());
        assert!(!FixQuality::DeadReckoning.is_acceptable());
        assert!(FixQuality::RtkFloat.is_acceptable());

        let fix: GpsFix = serde_json::from_str(
            r#"{"latitude":1.0,"longitude":2.0,"altitude":0.0,"satellites":9,"fix_quality":2,
               "hdop":0.8,"heading":0.0,"ground_speed":0.0,"snr_values":[],"timestamp":0.0}"#,
        )
        .unwrap();
        assert_eq!(fix.fix_quality, FixQuality::Dgps);
        assert!(serde_json::from_str::<FixQuality>("7").is_err());
    }

    #[test]
    fn test_signal_percent_and_hpe() {
        let fix = GpsFix {
            hdop: 2.0,
            fix_quality: FixQuality::Gps,
            snr_values: vec![
                SatelliteSnr { prn: 1, snr: 30.0 },
                SatelliteSnr { prn: 2, snr: 40.0 },
            ],
            ..Default::default()
        };
        assert_relative_eq!(fix.avg_snr(), 35.0);
        assert_relative_eq!(fix.signal_percent(), 60.0);
        assert_relative_eq!(fix.hpe(), 10.0);

        let weak = GpsFix {
            snr_values: vec![SatelliteSnr { prn: 3, snr: 10.0 }],
            ..Default::default()
        };
        assert_eq!(weak.signal_percent(), 0.0);
    }

    #[test]
    fn test_offset_validation() {
        let ok = OrientationOffsets { roll: -180.0, pitch: 12.5, yaw: 180.0 };
        assert!(ok.validate().is_ok());

        let bad = OrientationOffsets { roll: 200.0, pitch: 0.0, yaw: 0.0 };
        let err = bad.validate().unwrap_err();
        assert!(err.to_string().contains("Roll"));

        let nan = OrientationOffsets { roll: 0.0, pitch: f64::NAN, yaw: 0.0 };
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_angle_wrapping() {
        assert_relative_eq!(wrap_degrees(190.0), -170.0);
        assert_relative_eq!(wrap_degrees(-190.0), 170.0);
        assert_relative_eq!(wrap_degrees(180.0), 180.0);
        assert_relative_eq!(wrap_degrees(-180.0), -180.0);
        assert_relative_eq!(
            wrap_radians(0.5 + 2.0 * std::f64::consts::PI),
            0.5,
            epsilon = 1e-12
        );
        assert_relative_eq!(wrap_radians(-0.5), -0.5);
    }
}
