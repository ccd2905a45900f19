//! Client for an external libsurvive pose server (newline-delimited JSON over TCP).

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::{ClientConfig, Connector, SessionContext};
use crate::error::{GatewayError, Result};
use crate::state::SharedState;
use crate::types::current_timestamp;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurviveConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// Only accept poses from this device (e.g. "T20"); empty accepts all
    pub device_filter: String,
}

impl Default for SurviveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 5757,
            device_filter: String::new(),
        }
    }
}

impl SurviveConfig {
    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.host.trim().is_empty() {
            return Err(GatewayError::InvalidInput("host is required".to_string()));
        }
        if self.enabled && self.port == 0 {
            return Err(GatewayError::InvalidInput("port must be non-zero".to_string()));
        }
        Ok(())
    }

    fn accepts(&self, device: &str) -> bool {
        self.device_filter.is_empty() || self.device_filter == device
    }
}

impl ClientConfig for SurviveConfig {
    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn requires_reconnect(&self, next: &Self) -> bool {
        self.host != next.host || self.port != next.port
    }

    fn redacted(&self) -> Self {
        self.clone()
    }
}

/// Pose record as sent by the server
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoseMessage {
    pub device: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub qw: f64,
    pub qx: f64,
    pub qy: f64,
    pub qz: f64,
    /// Server-side capture time, seconds
    pub timestamp: f64,
}

/// Latest tracked pose plus the time we received it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SurvivePose {
    pub device: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub qw: f64,
    pub qx: f64,
    pub qy: f64,
    pub qz: f64,
    pub timestamp: f64,
    pub received_at: f64,
}

impl SurvivePose {
    fn from_message(msg: PoseMessage, received_at: f64) -> Self {
        Self {
            device: msg.device,
            x: msg.x,
            y: msg.y,
            z: msg.z,
            qw: msg.qw,
            qx: msg.qx,
            qy: msg.qy,
            qz: msg.qz,
            timestamp: msg.timestamp,
            received_at,
        }
    }
}

pub struct SurviveConnector {
    state: Arc<SharedState>,
}

impl SurviveConnector {
    pub fn new(state: Arc<SharedState>) -> Self {
        Self { state }
    }

    /// Store one line; returns whether it was accepted
    fn handle_line(&self, line: &str, config: &SurviveConfig) -> bool {
        let line = line.trim();
        if line.is_empty() {
            return false;
        }
        let msg: PoseMessage = match serde_json::from_str(line) {
            Ok(msg) => msg,
            Err(e) => {
                log::debug!("[SURVIVE] Ignoring malformed pose: {}", e);
                return false;
            }
        };
        let finite = [msg.x, msg.y, msg.z, msg.qw, msg.qx, msg.qy, msg.qz]
            .iter()
            .all(|v| v.is_finite());
        if !finite || !config.accepts(&msg.device) {
            return false;
        }
        self.state
            .survive_pose
            .set(Some(SurvivePose::from_message(msg, current_timestamp())));
        true
    }
}

impl Connector for SurviveConnector {
    type Config = SurviveConfig;
    type Session = BufReader<TcpStream>;

    fn name(&self) -> &str {
        "SURVIVE"
    }

    async fn connect(&self, config: &SurviveConfig) -> Result<BufReader<TcpStream>> {
        config.validate()?;
        let stream = TcpStream::connect((config.host.as_str(), config.port))
            .await
            .map_err(|e| {
                GatewayError::Connection(format!(
                    "connect to {}:{} failed: {}",
                    config.host, config.port, e
                ))
            })?;
        log::info!("[SURVIVE] Connected to {}:{}", config.host, config.port);
        Ok(BufReader::new(stream))
    }

    async fn run(
        &self,
        mut session: BufReader<TcpStream>,
        ctx: SessionContext<SurviveConfig>,
    ) -> Result<()> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = match timeout(ctx.heartbeat_timeout, session.read_line(&mut line)).await {
                Ok(res) => res?,
                Err(_) => {
                    return Err(GatewayError::Timeout(format!(
                        "no pose data for {:.0}s",
                        ctx.heartbeat_timeout.as_secs_f64()
                    )))
                }
            };
            if n == 0 {
                return Ok(());
            }
            ctx.add_bytes(n);
            // Device filter is applied in place on config updates
            self.handle_line(&line, &ctx.config());
        }
    }
}
