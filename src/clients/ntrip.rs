//! NTRIP v1 client streaming RTK corrections to the GPS receiver.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};

use super::{ClientConfig, Connector, SessionContext};
use crate::error::{GatewayError, Result};
use crate::sensors::HardwareLink;
use crate::state::SharedState;
use crate::types::GpsFix;

pub const REDACTED_PASSWORD: &str = "********";

const USER_AGENT: &str = concat!("NTRIP rover_gateway/", env!("CARGO_PKG_VERSION"));
const READ_BUF_SIZE: usize = 4096;
const MAX_HEADER_LINES: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NtripConfig {
    pub enabled: bool,
    pub caster_host: String,
    pub caster_port: u16,
    pub mountpoint: String,
    pub username: String,
    pub password: String,
    /// Report our position to the caster (needed for VRS mountpoints)
    pub send_gga: bool,
    pub gga_interval_secs: u64,
}

impl Default for NtripConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            caster_host: "rtk2go.com".to_string(),
            caster_port: 2101,
            mountpoint: String::new(),
            username: String::new(),
            password: String::new(),
            send_gga: true,
            gga_interval_secs: 10,
        }
    }
}

impl NtripConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.caster_host.trim().is_empty() {
            return Err(GatewayError::InvalidInput("caster_host is required".to_string()));
        }
        if self.caster_port == 0 {
            return Err(GatewayError::InvalidInput("caster_port must be non-zero".to_string()));
        }
        if self.mountpoint.trim().is_empty() {
            return Err(GatewayError::InvalidInput("mountpoint is required".to_string()));
        }
        if self.gga_interval_secs == 0 {
            return Err(GatewayError::InvalidInput(
                "gga_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// A password field still holding the redaction marker keeps `previous`'s password.
    pub fn merge_redacted(mut self, previous: &NtripConfig) -> Self {
        if self.password == REDACTED_PASSWORD {
            self.password = previous.password.clone();
        }
        self
    }
}

impl ClientConfig for NtripConfig {
    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn requires_reconnect(&self, next: &Self) -> bool {
        self.caster_host != next.caster_host
            || self.caster_port != next.caster_port
            || self.mountpoint != next.mountpoint
            || self.username != next.username
            || self.password != next.password
    }

    fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.password.is_empty() {
            copy.password = REDACTED_PASSWORD.to_string();
        }
        copy
    }
}

/// Well-known public casters offered to the UI
#[derive(Clone, Debug, Serialize)]
pub struct RtkPreset {
    pub name: &'static str,
    pub caster_host: &'static str,
    pub caster_port: u16,
    pub description: &'static str,
}

pub fn rtk_presets() -> Vec<RtkPreset> {
    vec![
        RtkPreset {
            name: "RTK2go",
            caster_host: "rtk2go.com",
            caster_port: 2101,
            description: "Free community caster, username is your e-mail",
        },
        RtkPreset {
            name: "Centipede",
            caster_host: "caster.centipede.fr",
            caster_port: 2101,
            description: "Open RTK network, mostly France",
        },
        RtkPreset {
            name: "Emlid Caster",
            caster_host: "caster.emlid.com",
            caster_port: 2101,
            description: "Requires an Emlid account",
        },
    ]
}

pub struct NtripSession {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

pub struct NtripConnector {
    link: Arc<dyn HardwareLink>,
    state: Arc<SharedState>,
}

impl NtripConnector {
    pub fn new(link: Arc<dyn HardwareLink>, state: Arc<SharedState>) -> Self {
        Self { link, state }
    }
}

impl Connector for NtripConnector {
    type Config = NtripConfig;
    type Session = NtripSession;

    fn name(&self) -> &str {
        "NTRIP"
    }

    async fn connect(&self, config: &NtripConfig) -> Result<NtripSession> {
        config.validate()?;
        let stream = TcpStream::connect((config.caster_host.as_str(), config.caster_port))
            .await
            .map_err(|e| {
                GatewayError::Connection(format!(
                    "connect to {}:{} failed: {}",
                    config.caster_host, config.caster_port, e
                ))
            })?;
        stream.set_nodelay(true)?;
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        writer
            .write_all(build_request(config).as_bytes())
            .await?;

        let mut status = String::new();
        if reader.read_line(&mut status).await? == 0 {
            return Err(GatewayError::Connection(
                "caster closed connection during handshake".to_string(),
            ));
        }
        check_status_line(status.trim_end())?;

        // HTTP-style replies carry headers up to a blank line
        if status.starts_with("HTTP/") {
            let mut line = String::new();
            for _ in 0..MAX_HEADER_LINES {
                line.clear();
                if reader.read_line(&mut line).await? == 0 || line.trim().is_empty() {
                    break;
                }
            }
        }

        log::info!(
            "[NTRIP] Connected to {}:{}/{}",
            config.caster_host,
            config.caster_port,
            config.mountpoint
        );
        Ok(NtripSession { reader, writer })
    }

    async fn run(&self, session: NtripSession, ctx: SessionContext<NtripConfig>) -> Result<()> {
        let NtripSession {
            mut reader,
            mut writer,
        } = session;
        let mut buf = vec![0u8; READ_BUF_SIZE];
        let mut gga_tick = tokio::time::interval(Duration::from_secs(1));
        let mut last_gga: Option<Instant> = None;
        // Deadline runs from the last received byte, not from the last GGA tick
        let mut last_rx = Instant::now();

        loop {
            tokio::select! {
                read = timeout_at(last_rx + ctx.heartbeat_timeout, reader.read(&mut buf)) => {
                    let n = match read {
                        Ok(res) => res?,
                        Err(_) => {
                            return Err(GatewayError::Timeout(format!(
                                "no corrections for {:.0}s",
                                ctx.heartbeat_timeout.as_secs_f64()
                            )))
                        }
                    };
                    if n == 0 {
                        return Ok(());
                    }
                    last_rx = Instant::now();
                    ctx.add_bytes(n);
                    self.link.send_corrections(&buf[..n])?;
                }
                _ = gga_tick.tick() => {
                    // Read each time so interval/toggle changes apply in place
                    let config = ctx.config();
                    if !config.send_gga {
                        continue;
                    }
                    let due = last_gga.map_or(true, |t| {
                        t.elapsed() >= Duration::from_secs(config.gga_interval_secs.max(1))
                    });
                    if !due {
                        continue;
                    }
                    if let Some(sentence) = self.state.gps.get().as_ref().and_then(build_gga) {
                        writer.write_all(sentence.as_bytes()).await?;
                        last_gga = Some(Instant::now());
                        log::debug!("[NTRIP] Sent {}", sentence.trim_end());
                    }
                }
            }
        }
    }
}

fn build_request(config: &NtripConfig) -> String {
    let mut request = format!(
        "GET /{} HTTP/1.0\r\nUser-Agent: {}\r\nAccept: */*\r\n",
        config.mountpoint.trim_start_matches('/'),
        USER_AGENT
    );
    if !config.username.is_empty() {
        let credentials = BASE64.encode(format!("{}:{}", config.username, config.password));
        request.push_str(&format!("Authorization: Basic {}\r\n", credentials));
    }
    request.push_str("Connection: close\r\n\r\n");
    request
}

fn check_status_line(status: &str) -> Result<()> {
    if status.starts_with("ICY 200") {
        return Ok(());
    }
    if let Some(rest) = status.strip_prefix("HTTP/") {
        let code = rest.split_whitespace().nth(1);
        if code == Some("200") {
            return Ok(());
        }
    }
    if status.starts_with("SOURCETABLE") {
        return Err(GatewayError::Connection(
            "mountpoint not found (caster returned its source table)".to_string(),
        ));
    }
    Err(GatewayError::Connection(format!(
        "caster rejected request: {}",
        status
    )))
}

/// XOR of every byte between `$` and `*`
pub fn nmea_checksum(body: &str) -> u8 {
    body.bytes().fold(0, |acc, b| acc ^ b)
}

fn format_coordinate(value: f64, degree_digits: usize, positive: char, negative: char) -> String {
    const UNITS_PER_MINUTE: u64 = 100_000;
    const UNITS_PER_DEGREE: u64 = 60 * UNITS_PER_MINUTE;

    let hemisphere = if value >= 0.0 { positive } else { negative };
    // Round once in 1e-5 minute units so 59.999995' carries into the degrees
    let units = (value.abs() * UNITS_PER_DEGREE as f64).round() as u64;
    let degrees = units / UNITS_PER_DEGREE;
    let minute_units = units % UNITS_PER_DEGREE;
    format!(
        "{:0width$}{:02}.{:05},{}",
        degrees,
        minute_units / UNITS_PER_MINUTE,
        minute_units % UNITS_PER_MINUTE,
        hemisphere,
        width = degree_digits
    )
}

/// GGA sentence for the caster, `None` without a usable fix
pub fn build_gga(fix: &GpsFix) -> Option<String> {
    if !fix.fix_quality.is_acceptable() || !fix.has_valid_position() {
        return None;
    }
    let time = chrono::Utc::now().format("%H%M%S%.2f");
    let body = format!(
        "GPGGA,{},{},{},{},{:02},{:.1},{:.1},M,0.0,M,,",
        time,
        format_coordinate(fix.latitude, 2, 'N', 'S'),
        format_coordinate(fix.longitude, 3, 'E', 'W'),
        u8::from(fix.fix_quality),
        fix.satellites.min(99),
        fix.hdop,
        fix.altitude,
    );
    Some(format!("${}*{:02X}\r\n", body, nmea_checksum(&body)))
}
