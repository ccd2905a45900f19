use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{interval, Duration, Interval, MissedTickBehavior};

use crate::command::Command;
use crate::error::{GatewayError, Result};
use crate::types::{current_timestamp, CalibrationData, FixQuality, GpsFix, RawTelemetry, SatelliteSnr};

/// Everything decoded from one hardware read
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HardwarePacket {
    pub telemetry: RawTelemetry,
    #[serde(default)]
    pub gps: Option<GpsFix>,
    #[serde(default)]
    pub calibration: Option<CalibrationData>,
    /// Capture time, seconds since the epoch
    pub captured_at: f64,
}

/// Producer of decoded hardware packets.
///
/// `Ok(None)` means the source is exhausted. Transient errors (I/O) end the
/// reader so the supervisor can reopen the source; decode errors are counted
/// and skipped.
pub trait PacketSource: Send {
    fn next_packet(&mut self) -> impl Future<Output = Result<Option<HardwarePacket>>> + Send;
}

/// Outgoing side of the hardware link (serial writer)
pub trait HardwareLink: Send + Sync {
    fn send_command(&self, command: &Command) -> Result<()>;

    fn send_corrections(&self, data: &[u8]) -> Result<()>;
}

/// Link that only logs; used when no hardware writer is attached
#[derive(Debug, Default)]
pub struct LoggingLink;

impl HardwareLink for LoggingLink {
    fn send_command(&self, command: &Command) -> Result<()> {
        log::debug!("[link] command {:?}", command);
        Ok(())
    }

    fn send_corrections(&self, data: &[u8]) -> Result<()> {
        log::debug!("[link] {} bytes of corrections", data.len());
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum LinkFrame {
    Command(Command),
    Corrections(Vec<u8>),
}

/// Link that queues frames for a separate writer task
#[derive(Clone, Debug)]
pub struct ChannelLink {
    tx: UnboundedSender<LinkFrame>,
}

impl ChannelLink {
    pub fn new() -> (Self, UnboundedReceiver<LinkFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn push(&self, frame: LinkFrame) -> Result<()> {
        self.tx
            .send(frame)
            .map_err(|_| GatewayError::Connection("hardware writer is gone".to_string()))
    }
}

impl HardwareLink for ChannelLink {
    fn send_command(&self, command: &Command) -> Result<()> {
        self.push(LinkFrame::Command(command.clone()))
    }

    fn send_corrections(&self, data: &[u8]) -> Result<()> {
        self.push(LinkFrame::Corrections(data.to_vec()))
    }
}

/// Newline-delimited JSON packets from any async reader (serial bridge, FIFO, socket)
pub struct JsonLinesSource<R> {
    reader: R,
    line: String,
}

impl<R: AsyncBufRead + Unpin + Send> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
        }
    }
}

impl<R: AsyncBufRead + Unpin + Send> PacketSource for JsonLinesSource<R> {
    async fn next_packet(&mut self) -> Result<Option<HardwarePacket>> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line).await? == 0 {
                return Ok(None);
            }
            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }
            let packet: HardwarePacket = serde_json::from_str(line)?;
            return Ok(Some(packet));
        }
    }
}

pub const SIM_PACKET_HZ: u64 = 50;
const SIM_GPS_EVERY: u64 = SIM_PACKET_HZ;
const SIM_IMU_SAMPLES: usize = 5;

/// Plausible packets for running without the rover attached
pub struct SimulatedSource {
    ticker: Interval,
    seq: u64,
    latitude: f64,
    longitude: f64,
}

impl SimulatedSource {
    pub fn new() -> Self {
        Self::with_rate(SIM_PACKET_HZ)
    }

    pub fn with_rate(hz: u64) -> Self {
        let mut ticker = interval(Duration::from_millis(1000 / hz.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            ticker,
            seq: 0,
            latitude: 37.7749,
            longitude: -122.4194,
        }
    }

    fn build_packet(&mut self) -> HardwarePacket {
        self.seq += 1;
        let t = self.seq as f64 / SIM_PACKET_HZ as f64;

        // Small deterministic jitter on top of gravity
        let jitter = |k: f64| 0.02 * (t * k).sin();
        let accels = (0..SIM_IMU_SAMPLES)
            .map(|i| [jitter(3.1 + i as f64), jitter(2.7), 9.81 + jitter(1.3)])
            .collect();
        let gyros = (0..SIM_IMU_SAMPLES)
            .map(|_| [jitter(5.0) * 0.1, jitter(4.0) * 0.1, 0.0])
            .collect();
        let mags = (0..SIM_IMU_SAMPLES)
            .map(|_| [0.22, 0.0, -0.4])
            .collect();

        let telemetry = RawTelemetry {
            battery: (95.0 - t / 120.0).clamp(0.0, 100.0) as u8,
            voltage: 12.4,
            current: 1.2 + jitter(0.5),
            power: 14.9,
            signal_level: 4,
            orientation: 0,
            lamp: 0,
            speed: 0.3,
            vibration: jitter(7.0).abs(),
            timestamp: current_timestamp(),
            accels,
            gyros,
            mags,
            rpms: vec![vec![44.0, 44.0]],
        };

        let gps = (self.seq % SIM_GPS_EVERY == 0).then(|| {
            // Creep north-east at roughly 0.3 m/s
            self.latitude += 0.3 / 111_320.0;
            self.longitude += 0.1 / 111_320.0;
            GpsFix {
                latitude: self.latitude,
                longitude: self.longitude,
                altitude: 16.0,
                satellites: 12,
                fix_quality: FixQuality::Gps,
                hdop: 0.9,
                heading: 18.0,
                ground_speed: 0.3,
                snr_values: (1..=8)
                    .map(|prn| SatelliteSnr {
                        prn,
                        snr: 30.0 + prn as f64,
                    })
                    .collect(),
                timestamp: current_timestamp(),
            }
        });

        HardwarePacket {
            telemetry,
            gps,
            calibration: None,
            captured_at: current_timestamp(),
        }
    }
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketSource for SimulatedSource {
    async fn next_packet(&mut self) -> Result<Option<HardwarePacket>> {
        self.ticker.tick().await;
        Ok(Some(self.build_packet()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::MotorCommand;
    use tokio::io::BufReader;

    #[tokio::test(start_paused = true)]
    async fn test_simulated_source_gps_rate() {
        let mut source = SimulatedSource::new();
        let mut fixes = 0;
        for _ in 0..(SIM_PACKET_HZ * 3) {
            let packet = source.next_packet().await.unwrap().unwrap();
            assert_eq!(packet.telemetry.accels.len(), SIM_IMU_SAMPLES);
            assert!(packet.telemetry.accels[0][2] > 9.0);
            if let Some(fix) = packet.gps {
                assert!(fix.fix_quality.is_acceptable());
                fixes += 1;
            }
        }
        assert_eq!(fixes, 3);
    }

    #[tokio::test]
    async fn test_json_lines_source() {
        let packet = HardwarePacket {
            telemetry: RawTelemetry {
                battery: 77,
                ..Default::default()
            },
            captured_at: 1.0,
            ..Default::default()
        };
        let input = format!(
            "{}\n\nnot json\n{}\n",
            serde_json::to_string(&packet).unwrap(),
            serde_json::to_string(&packet).unwrap()
        );
        let mut source = JsonLinesSource::new(BufReader::new(input.as_bytes()));

        assert_eq!(source.next_packet().await.unwrap(), Some(packet.clone()));
        // Blank line skipped, garbage reported as a decode error
        assert!(matches!(source.next_packet().await, Err(GatewayError::Json(_))));
        assert_eq!(source.next_packet().await.unwrap(), Some(packet));
        assert_eq!(source.next_packet().await.unwrap(), None);
    }

    #[test]
    fn test_channel_link_forwards_frames() {
        let (link, mut rx) = ChannelLink::new();
        let cmd = Command::Motor(MotorCommand {
            speed: 10,
            angular: 0,
            front_led: 0,
            back_led: 0,
        });
        link.send_command(&cmd).unwrap();
        link.send_corrections(&[1, 2, 3]).unwrap();
        assert_eq!(rx.try_recv().unwrap(), LinkFrame::Command(cmd));
        assert_eq!(rx.try_recv().unwrap(), LinkFrame::Corrections(vec![1, 2, 3]));

        drop(rx);
        assert!(link.send_corrections(&[4]).is_err());
    }
}
