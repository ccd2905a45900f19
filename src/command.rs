//! Client commands, decoded at the boundary into a closed set of variants.
//!
//! Wire format: `{"type": "<kind>", "data": {...}}`.

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};
use crate::sensors::HardwareLink;
use crate::state::{CommandedMotion, SharedState};

/// Full-scale motor command in physical units
pub const MAX_LINEAR_MPS: f64 = 1.0;
pub const MAX_ANGULAR_RADPS: f64 = 2.0;

const MOTOR_LIMIT: i16 = 100;
const LED_MAX: i16 = 100;
const BITRATE_MIN_KBPS: u32 = 100;
const BITRATE_MAX_KBPS: u32 = 20_000;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Command {
    Motor(MotorCommand),
    Lights(LightsCommand),
    Calibration(CalibrationCommand),
    ImuWrite(ImuWriteCommand),
    MagWrite(MagWriteCommand),
    SetBitrate(SetBitrateCommand),
    Keepalive,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotorCommand {
    /// -100..=100, percent of full forward speed
    pub speed: i16,
    /// -100..=100, percent of full turn rate (positive = left)
    pub angular: i16,
    #[serde(default)]
    pub front_led: i16,
    #[serde(default)]
    pub back_led: i16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightsState {
    On,
    Off,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightsCommand {
    pub state: LightsState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationKind {
    Imu,
    Mag,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationCommand {
    #[serde(rename = "type")]
    pub kind: CalibrationKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImuWriteCommand {
    pub acc_bias_x: u16,
    pub acc_bias_y: u16,
    pub acc_bias_z: u16,
    pub gyro_bias_x: u16,
    pub gyro_bias_y: u16,
    pub gyro_bias_z: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MagWriteCommand {
    pub mag_bias_x: u16,
    pub mag_bias_y: u16,
    pub mag_bias_z: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetBitrateCommand {
    /// 0 = front, 1 = rear
    pub camera_id: u8,
    pub bitrate_kbps: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn failed(err: &GatewayError) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(err.to_string()),
        }
    }
}

impl MotorCommand {
    pub fn commanded_motion(&self) -> CommandedMotion {
        CommandedMotion {
            linear: self.speed as f64 / MOTOR_LIMIT as f64 * MAX_LINEAR_MPS,
            angular: self.angular as f64 / MOTOR_LIMIT as f64 * MAX_ANGULAR_RADPS,
        }
    }
}

fn check_range(name: &str, value: i64, min: i64, max: i64) -> Result<()> {
    if value < min || value > max {
        return Err(GatewayError::InvalidInput(format!(
            "{} must be between {} and {}, got {}",
            name, min, max, value
        )));
    }
    Ok(())
}

impl Command {
    /// Parse and validate one JSON command
    pub fn decode(text: &str) -> Result<Command> {
        let command: Command = serde_json::from_str(text)
            .map_err(|e| GatewayError::InvalidInput(format!("invalid command: {}", e)))?;
        command.validate()?;
        Ok(command)
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Command::Motor(m) => {
                let limit = MOTOR_LIMIT as i64;
                check_range("speed", m.speed as i64, -limit, limit)?;
                check_range("angular", m.angular as i64, -limit, limit)?;
                check_range("front_led", m.front_led as i64, 0, LED_MAX as i64)?;
                check_range("back_led", m.back_led as i64, 0, LED_MAX as i64)
            }
            Command::SetBitrate(b) => {
                check_range("camera_id", b.camera_id as i64, 0, 1)?;
                check_range(
                    "bitrate_kbps",
                    b.bitrate_kbps as i64,
                    BITRATE_MIN_KBPS as i64,
                    BITRATE_MAX_KBPS as i64,
                )
            }
            // Enum-typed and u16 payloads are fully checked by decoding
            Command::Lights(_)
            | Command::Calibration(_)
            | Command::ImuWrite(_)
            | Command::MagWrite(_)
            | Command::Keepalive => Ok(()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Command::Motor(_) => "motor",
            Command::Lights(_) => "lights",
            Command::Calibration(_) => "calibration",
            Command::ImuWrite(_) => "imu_write",
            Command::MagWrite(_) => "mag_write",
            Command::SetBitrate(_) => "set_bitrate",
            Command::Keepalive => "keepalive",
        }
    }
}

/// Apply a validated command locally and forward it to the hardware.
pub fn dispatch(command: &Command, state: &SharedState, link: &dyn HardwareLink) -> CommandResponse {
    if let Command::Motor(motor) = command {
        state.commanded.set(motor.commanded_motion());
    }

    if let Err(e) = link.send_command(command) {
        log::warn!("[CMD] Failed to forward {} command: {}", command.kind(), e);
        return CommandResponse::failed(&e);
    }

    let message = match command {
        Command::Motor(m) => format!("motor speed={} angular={}", m.speed, m.angular),
        Command::Lights(l) => format!("lights {:?}", l.state).to_lowercase(),
        Command::Calibration(c) => format!("{:?} calibration started", c.kind).to_lowercase(),
        Command::ImuWrite(_) => "imu bias written".to_string(),
        Command::MagWrite(_) => "mag bias written".to_string(),
        Command::SetBitrate(b) => format!(
            "camera {} bitrate set to {} kbps",
            b.camera_id, b.bitrate_kbps
        ),
        Command::Keepalive => "keepalive".to_string(),
    };
    log::debug!("[CMD] {}", message);
    CommandResponse::ok(message)
}

/// Decode, validate and dispatch one text frame
pub fn handle_text(text: &str, state: &SharedState, link: &dyn HardwareLink) -> CommandResponse {
    match Command::decode(text) {
        Ok(command) => dispatch(&command, state, link),
        Err(e) => {
            log::debug!("[CMD] Rejected command: {}", e);
            CommandResponse::failed(&e)
        }
    }
}
