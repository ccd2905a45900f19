//! Process root: owns the shared records, clients, log session and the
//! supervised background producers.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::BufReader;
use tokio::time::Duration;

use crate::broadcast::ConnectionRegistry;
use crate::cleanup::{self, NoopCleaner, ProcessCleaner};
use crate::clients::ntrip::{NtripConfig, NtripConnector};
use crate::clients::survive::{SurviveConfig, SurviveConnector};
use crate::clients::{ClientConfig, ClientStatus, ClientTiming, ReconnectingClient};
use crate::command::{self, CommandResponse};
use crate::config::ConfigStore;
use crate::error::{GatewayError, Result};
use crate::events::{EventSink, GatewayEvent, LOG_PROGRESS_EVERY};
use crate::health_monitor::{self, HealthMonitor};
use crate::live_status::{SensorData, ServiceStatus};
use crate::peripherals::{self, CameraStatus, LteStatus, NetDevProbe, ProbeFactory, WifiProbe};
use crate::restart_manager::{RestartManager, RestartState, ShutdownSignal};
use crate::sensor_fusion::{FusionConfig, SensorFusion};
use crate::sensors::{HardwareLink, HardwarePacket, JsonLinesSource, PacketSource, SimulatedSource};
use crate::session::{LogSession, LogStatus};
use crate::state::SharedState;
use crate::types::{OrientationOffsets, Stats};

const HARDWARE_RESTART_DELAY: Duration = Duration::from_secs(2);
const MONITOR_RESTART_DELAY: Duration = Duration::from_secs(5);
const CLEANUP_RESTART_DELAY: Duration = Duration::from_secs(30);
/// Floor for the broadcast period; `tokio::time::interval` rejects zero
pub const MIN_BROADCAST_INTERVAL: Duration = Duration::from_millis(1);
pub const DEFAULT_BROADCAST_HZ: u32 = 20;

/// Where hardware packets come from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceKind {
    /// No reader; telemetry stays unavailable
    None,
    Simulated,
    /// Newline-delimited JSON packets from a file, FIFO or serial bridge
    JsonLines(PathBuf),
}

#[derive(Clone, Debug)]
pub struct GatewayOptions {
    pub config_dir: PathBuf,
    pub log_dir: PathBuf,
    pub source: SourceKind,
    pub broadcast_interval: Duration,
    pub debug: bool,
    pub client_timing: ClientTiming,
    /// Modem driver; no LTE monitor runs without one
    pub lte_probe: Option<ProbeFactory<LteStatus>>,
    /// Camera daemon driver; no camera monitor runs without one
    pub camera_probe: Option<ProbeFactory<CameraStatus>>,
    pub process_cleaner: Arc<dyn ProcessCleaner>,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("/data"),
            log_dir: PathBuf::from("/data/logs"),
            source: SourceKind::None,
            broadcast_interval: Duration::from_millis(1000 / DEFAULT_BROADCAST_HZ as u64),
            debug: false,
            client_timing: ClientTiming::default(),
            lte_probe: None,
            camera_probe: None,
            process_cleaner: Arc::new(NoopCleaner),
        }
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct GatewayStatus {
    pub version: &'static str,
    pub uptime_seconds: f64,
    pub has_telemetry: bool,
    pub websocket_clients: usize,
    pub tasks: Vec<RestartState>,
    pub stats: Stats,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct BatteryDebug {
    pub battery: u8,
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    /// Voltage times current, for comparison with the reported power
    pub computed_power: f64,
    pub timestamp: f64,
}

pub struct Gateway {
    pub state: Arc<SharedState>,
    pub rtk: ReconnectingClient<NtripConnector>,
    pub survive: ReconnectingClient<SurviveConnector>,
    pub log_session: LogSession,
    pub registry: ConnectionRegistry,
    /// Subscribers of `/ws/logs`
    pub log_events: Arc<ConnectionRegistry>,
    pub health: HealthMonitor,
    pub supervisor: RestartManager,
    link: Arc<dyn HardwareLink>,
    config: ConfigStore,
    fusion: Mutex<SensorFusion>,
    options: GatewayOptions,
}

impl Gateway {
    /// Load persisted config and build every component. Nothing runs until
    /// `spawn_background`.
    pub fn new(options: GatewayOptions, link: Arc<dyn HardwareLink>) -> Result<Self> {
        let config = ConfigStore::new(&options.config_dir);
        let state = Arc::new(SharedState::new(config.load_orientation_offsets()));
        let log_events = Arc::new(ConnectionRegistry::new());
        let sink: Arc<dyn EventSink> = log_events.clone();

        let rtk = ReconnectingClient::with_events(
            NtripConnector::new(Arc::clone(&link), Arc::clone(&state)),
            config.load_rtk_config(),
            options.client_timing,
            Arc::clone(&sink),
        );
        let survive = ReconnectingClient::with_events(
            SurviveConnector::new(Arc::clone(&state)),
            config.load_survive_config(),
            options.client_timing,
            Arc::clone(&sink),
        );
        let fusion = SensorFusion::new(FusionConfig {
            debug: options.debug,
            ..Default::default()
        })?;

        Ok(Self {
            state,
            rtk,
            survive,
            log_session: LogSession::new(&options.log_dir),
            registry: ConnectionRegistry::new(),
            log_events,
            health: HealthMonitor::new(),
            supervisor: RestartManager::with_events(sink),
            link,
            config,
            fusion: Mutex::new(fusion),
            options,
        })
    }

    /// Start the clients and every supervised producer.
    pub fn spawn_background(self: &Arc<Self>) {
        self.rtk.start();
        self.survive.start();

        match self.options.source.clone() {
            SourceKind::None => log::warn!("No hardware source configured; /data stays unavailable"),
            SourceKind::Simulated => {
                let gw = Arc::clone(self);
                self.supervisor
                    .supervise("hardware", HARDWARE_RESTART_DELAY, move |signal| {
                        let gw = Arc::clone(&gw);
                        async move { gw.read_hardware(SimulatedSource::new(), signal).await }
                    });
            }
            SourceKind::JsonLines(path) => {
                let gw = Arc::clone(self);
                self.supervisor
                    .supervise("hardware", HARDWARE_RESTART_DELAY, move |signal| {
                        let gw = Arc::clone(&gw);
                        let path = path.clone();
                        async move {
                            let file = tokio::fs::File::open(&path).await.map_err(|e| {
                                GatewayError::Connection(format!(
                                    "cannot open {}: {}",
                                    path.display(),
                                    e
                                ))
                            })?;
                            let source = JsonLinesSource::new(BufReader::new(file));
                            gw.read_hardware(source, signal).await
                        }
                    });
            }
        }

        let gw = Arc::clone(self);
        self.supervisor
            .supervise("stats", MONITOR_RESTART_DELAY, move |signal| {
                let gw = Arc::clone(&gw);
                async move { health_monitor::stats_task(&gw.health, &gw.state, signal).await }
            });

        let gw = Arc::clone(self);
        self.supervisor
            .supervise("broadcast", MONITOR_RESTART_DELAY, move |signal| {
                let gw = Arc::clone(&gw);
                async move { gw.broadcast_loop(signal).await }
            });

        let state = Arc::clone(&self.state);
        self.supervisor
            .supervise("network", MONITOR_RESTART_DELAY, move |signal| {
                peripherals::run_monitor(NetDevProbe::new(), Arc::clone(&state), signal)
            });

        let state = Arc::clone(&self.state);
        self.supervisor
            .supervise("wifi", MONITOR_RESTART_DELAY, move |signal| {
                peripherals::run_monitor(WifiProbe::new(), Arc::clone(&state), signal)
            });

        if let Some(factory) = self.options.lte_probe.clone() {
            let state = Arc::clone(&self.state);
            self.supervisor
                .supervise("lte", MONITOR_RESTART_DELAY, move |signal| {
                    peripherals::run_monitor(factory.build(), Arc::clone(&state), signal)
                });
        }
        if let Some(factory) = self.options.camera_probe.clone() {
            let state = Arc::clone(&self.state);
            self.supervisor
                .supervise("camera", MONITOR_RESTART_DELAY, move |signal| {
                    peripherals::run_monitor(factory.build(), Arc::clone(&state), signal)
                });
        }

        let cleaner = Arc::clone(&self.options.process_cleaner);
        self.supervisor
            .supervise("process-cleanup", CLEANUP_RESTART_DELAY, move |signal| {
                cleanup::cleanup_loop(Arc::clone(&cleaner), cleanup::CLEANUP_INTERVAL, signal)
            });
    }

    /// Cancel the supervised tasks and stop both clients.
    pub async fn shutdown(&self) {
        self.rtk.disable();
        self.survive.disable();
        self.supervisor.shutdown().await;
    }

    /// Hardware reader: push packets into the fusion pipeline.
    ///
    /// Decode errors are counted and skipped. Transient errors and end of
    /// stream end the task so the supervisor reopens the source.
    pub async fn read_hardware<S: PacketSource>(
        &self,
        mut source: S,
        mut signal: ShutdownSignal,
    ) -> Result<()> {
        loop {
            let next = tokio::select! {
                next = source.next_packet() => next,
                _ = signal.cancelled() => return Ok(()),
            };
            match next {
                Ok(Some(packet)) => {
                    self.health.record_packet();
                    self.ingest(packet);
                }
                Ok(None) => {
                    return Err(GatewayError::Connection("hardware stream ended".to_string()))
                }
                Err(e) if e.is_transient() => {
                    self.health.record_error();
                    return Err(e);
                }
                Err(e) => {
                    self.health.record_error();
                    log::debug!("[HARDWARE] Skipping undecodable packet: {}", e);
                }
            }
        }
    }

    /// Fuse one packet and publish it into shared state
    pub fn ingest(&self, packet: HardwarePacket) {
        let mut fusion = self.fusion.lock().unwrap_or_else(PoisonError::into_inner);
        fusion.ingest(&self.state, packet);
    }

    async fn broadcast_loop(&self, mut signal: ShutdownSignal) -> Result<()> {
        let period = self.options.broadcast_interval.max(MIN_BROADCAST_INTERVAL);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = signal.cancelled() => return Ok(()),
            }
            let logging = self.log_session.status().active;
            if self.registry.is_empty() && !logging {
                continue;
            }
            let snapshot = match self.snapshot() {
                Ok(snapshot) => snapshot,
                Err(GatewayError::Unavailable(_)) => continue,
                Err(e) => return Err(e),
            };
            if self.log_session.record() {
                let record_count = self.log_session.status().record_count;
                if record_count % LOG_PROGRESS_EVERY == 0 {
                    self.log_events.emit(GatewayEvent::LogProgress { record_count });
                }
            }
            if !self.registry.is_empty() {
                let json = serde_json::to_string(&snapshot)?;
                self.registry.broadcast(&json);
            }
        }
    }

    pub fn snapshot(&self) -> Result<SensorData> {
        SensorData::build(
            &self.state,
            ServiceStatus {
                rtk: self.rtk.status(),
                survive: self.survive.status(),
                log: self.log_session.status(),
            },
        )
    }

    pub fn status(&self) -> GatewayStatus {
        let stats = self.state.stats.get();
        GatewayStatus {
            version: env!("CARGO_PKG_VERSION"),
            uptime_seconds: stats.uptime_seconds,
            has_telemetry: self.state.has_telemetry(),
            websocket_clients: self.registry.len(),
            tasks: self.supervisor.status(),
            stats,
        }
    }

    pub fn battery_debug(&self) -> Result<BatteryDebug> {
        let t = self.state.latest_telemetry()?;
        Ok(BatteryDebug {
            battery: t.battery,
            voltage: t.voltage,
            current: t.current,
            power: t.power,
            computed_power: t.voltage * t.current,
            timestamp: t.timestamp,
        })
    }

    pub fn orientation_offsets(&self) -> OrientationOffsets {
        self.state.orientation_offsets()
    }

    /// Validate, apply and persist. An invalid update changes nothing.
    pub fn set_orientation_offsets(&self, offsets: OrientationOffsets) -> Result<OrientationOffsets> {
        self.state.set_orientation_offsets(offsets)?;
        log::info!(
            "Orientation offsets set to roll={:.1} pitch={:.1} yaw={:.1}",
            offsets.roll,
            offsets.pitch,
            offsets.yaw
        );
        self.config.save_orientation_offsets(&offsets)?;
        Ok(offsets)
    }

    /// Legacy single-axis update
    pub fn set_yaw_offset(&self, yaw: f64) -> Result<OrientationOffsets> {
        let offsets = OrientationOffsets {
            yaw,
            ..self.orientation_offsets()
        };
        self.set_orientation_offsets(offsets)
    }

    pub fn rtk_config(&self) -> NtripConfig {
        self.rtk.config().redacted()
    }

    /// Replace the RTK config; a redacted password keeps the stored one.
    pub fn update_rtk_config(&self, config: NtripConfig) -> Result<ClientStatus<NtripConfig>> {
        let config = config.merge_redacted(&self.rtk.config());
        config.validate()?;
        self.config.save_rtk_config(&config)?;
        self.rtk.update_config(config);
        Ok(self.rtk.status())
    }

    pub fn survive_config(&self) -> SurviveConfig {
        self.survive.config()
    }

    pub fn update_survive_config(
        &self,
        config: SurviveConfig,
    ) -> Result<ClientStatus<SurviveConfig>> {
        config.validate()?;
        self.config.save_survive_config(&config)?;
        self.survive.update_config(config);
        Ok(self.survive.status())
    }

    pub fn handle_command(&self, text: &str) -> CommandResponse {
        command::handle_text(text, &self.state, self.link.as_ref())
    }

    pub fn log_status(&self) -> LogStatus {
        self.log_session.status()
    }

    pub fn start_log(&self) -> Result<LogStatus> {
        let status = self.log_session.start()?;
        self.log_events.emit(GatewayEvent::LogStarted {
            file_path: status.file_path.clone(),
            start_time: status.start_time.clone(),
        });
        Ok(status)
    }

    pub fn stop_log(&self) -> Result<LogStatus> {
        let status = self.log_session.stop()?;
        self.log_events.emit(GatewayEvent::LogStopped {
            record_count: status.record_count,
            duration_seconds: status.duration_seconds,
        });
        Ok(status)
    }

    pub fn pause_log(&self) -> Result<LogStatus> {
        let status = self.log_session.pause()?;
        self.log_events.emit(GatewayEvent::LogPaused {
            record_count: status.record_count,
        });
        Ok(status)
    }

    pub fn resume_log(&self) -> Result<LogStatus> {
        let status = self.log_session.resume()?;
        self.log_events.emit(GatewayEvent::LogResumed {
            record_count: status.record_count,
        });
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peripherals::PeripheralProbe;
    use crate::sensors::{ChannelLink, LinkFrame, LoggingLink};
    use futures::future::BoxFuture;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn gateway(dir: &TempDir) -> Gateway {
        let options = GatewayOptions {
            config_dir: dir.path().to_path_buf(),
            log_dir: dir.path().join("logs"),
            ..Default::default()
        };
        Gateway::new(options, Arc::new(LoggingLink)).unwrap()
    }

    #[tokio::test]
    async fn test_offsets_persist_and_reload() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(&dir);
        gw.set_orientation_offsets(OrientationOffsets {
            roll: 2.0,
            pitch: -3.0,
            yaw: 45.0,
        })
        .unwrap();
        assert!(matches!(
            gw.set_yaw_offset(200.0),
            Err(GatewayError::InvalidInput(_))
        ));
        assert_eq!(gw.orientation_offsets().yaw, 45.0);
        drop(gw);

        let reloaded = gateway(&dir);
        assert_eq!(reloaded.orientation_offsets().pitch, -3.0);
        assert_eq!(reloaded.orientation_offsets().yaw, 45.0);
    }

    #[tokio::test]
    async fn test_rtk_password_redaction_round_trip() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(&dir);
        gw.update_rtk_config(NtripConfig {
            mountpoint: "BASE".into(),
            username: "u".into(),
            password: "secret".into(),
            ..Default::default()
        })
        .unwrap();

        let shown = gw.rtk_config();
        assert_eq!(shown.password, crate::clients::ntrip::REDACTED_PASSWORD);

        // Posting the redacted form back keeps the real password
        gw.update_rtk_config(NtripConfig {
            gga_interval_secs: 20,
            ..shown
        })
        .unwrap();
        assert_eq!(gw.rtk.config().password, "secret");
        assert_eq!(gw.rtk.config().gga_interval_secs, 20);
    }

    #[tokio::test]
    async fn test_invalid_client_config_rejected() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(&dir);
        let bad = SurviveConfig {
            enabled: true,
            port: 0,
            ..Default::default()
        };
        assert!(gw.update_survive_config(bad).is_err());
        assert_eq!(gw.survive_config(), SurviveConfig::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_source_fills_snapshot() {
        let dir = TempDir::new().unwrap();
        let gw = Arc::new(gateway(&dir));
        assert!(matches!(gw.snapshot(), Err(GatewayError::Unavailable(_))));
        assert!(gw.battery_debug().is_err());

        let reader = {
            let gw = Arc::clone(&gw);
            tokio::spawn(async move {
                gw.read_hardware(SimulatedSource::new(), ShutdownSignal::never())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_secs(2)).await;
        reader.abort();

        let data = gw.snapshot().unwrap();
        assert!(data.battery > 0);
        assert!(!data.accels.is_empty());
        assert!(gw.health.totals().0 > 0);
        assert!(gw.battery_debug().unwrap().voltage > 0.0);
    }

    #[tokio::test]
    async fn test_commands_reach_link() {
        let dir = TempDir::new().unwrap();
        let (link, mut rx) = ChannelLink::new();
        let gw = Gateway::new(
            GatewayOptions {
                config_dir: dir.path().to_path_buf(),
                ..Default::default()
            },
            Arc::new(link),
        )
        .unwrap();

        let response = gw.handle_command(r#"{"type":"lights","data":{"state":"off"}}"#);
        assert!(response.success);
        assert!(matches!(rx.try_recv(), Ok(LinkFrame::Command(_))));
    }

    #[tokio::test]
    async fn test_reader_skips_decode_errors() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(&dir);
        let packet = serde_json::to_string(&HardwarePacket::default()).unwrap();
        let input = format!("garbage\n{}\n", packet);
        let source = JsonLinesSource::new(BufReader::new(std::io::Cursor::new(input.into_bytes())));

        // End of stream is reported so the supervisor reopens the source
        let result = gw.read_hardware(source, ShutdownSignal::never()).await;
        assert!(matches!(result, Err(GatewayError::Connection(_))));
        assert_eq!(gw.health.totals(), (1, 1));
        assert!(gw.state.has_telemetry());
    }

    async fn next_event(rx: &mut mpsc::Receiver<crate::broadcast::Frame>) -> serde_json::Value {
        let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event within 5s")
            .expect("registry alive");
        serde_json::from_str(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_zero_broadcast_interval_still_ticks() {
        let dir = TempDir::new().unwrap();
        let gw = Arc::new(
            Gateway::new(
                GatewayOptions {
                    config_dir: dir.path().to_path_buf(),
                    log_dir: dir.path().join("logs"),
                    broadcast_interval: Duration::ZERO,
                    ..Default::default()
                },
                Arc::new(LoggingLink),
            )
            .unwrap(),
        );
        gw.ingest(HardwarePacket::default());
        let (_id, mut rx) = gw.registry.register();

        let loop_gw = Arc::clone(&gw);
        let task = tokio::spawn(async move { loop_gw.broadcast_loop(ShutdownSignal::never()).await });
        let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        task.abort();

        let data: serde_json::Value = serde_json::from_str(&frame.unwrap().unwrap()).unwrap();
        assert!(data["battery"].is_number());
    }

    #[tokio::test]
    async fn test_log_transitions_reach_event_subscribers() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(&dir);
        let (_id, mut rx) = gw.log_events.register();

        let started = gw.start_log().unwrap();
        gw.pause_log().unwrap();
        // A rejected transition emits nothing
        assert!(gw.pause_log().is_err());
        gw.resume_log().unwrap();
        gw.stop_log().unwrap();

        let event = next_event(&mut rx).await;
        assert_eq!(event["event"], "log_started");
        assert_eq!(event["file_path"].as_str(), started.file_path.as_deref());
        assert_eq!(next_event(&mut rx).await["event"], "log_paused");
        assert_eq!(next_event(&mut rx).await["event"], "log_resumed");
        let stopped = next_event(&mut rx).await;
        assert_eq!(stopped["event"], "log_stopped");
        assert_eq!(stopped["record_count"], 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_recording_emits_progress_events() {
        let dir = TempDir::new().unwrap();
        let gw = Arc::new(
            Gateway::new(
                GatewayOptions {
                    config_dir: dir.path().to_path_buf(),
                    log_dir: dir.path().join("logs"),
                    broadcast_interval: Duration::from_millis(1),
                    ..Default::default()
                },
                Arc::new(LoggingLink),
            )
            .unwrap(),
        );
        gw.ingest(HardwarePacket::default());
        gw.start_log().unwrap();
        let (_id, mut rx) = gw.log_events.register_with_capacity(64);

        let loop_gw = Arc::clone(&gw);
        let task = tokio::spawn(async move { loop_gw.broadcast_loop(ShutdownSignal::never()).await });
        let progress = next_event(&mut rx).await;
        task.abort();

        assert_eq!(progress["event"], "log_progress");
        assert_eq!(progress["record_count"], LOG_PROGRESS_EVERY);
    }

    #[tokio::test]
    async fn test_client_state_changes_reach_event_subscribers() {
        let dir = TempDir::new().unwrap();
        let gw = gateway(&dir);
        let (_id, mut rx) = gw.log_events.register();
        gw.survive.start();
        gw.update_survive_config(SurviveConfig {
            enabled: true,
            host: "127.0.0.1".into(),
            port: 1,
            ..Default::default()
        })
        .unwrap();

        let event = next_event(&mut rx).await;
        assert_eq!(event["event"], "client_state");
        assert_eq!(event["client"], "SURVIVE");
        assert_eq!(event["state"], "connecting");
        gw.survive.disable();
    }

    struct FixedModem;

    impl PeripheralProbe<LteStatus> for FixedModem {
        fn name(&self) -> &str {
            "lte"
        }

        fn interval(&self) -> Duration {
            Duration::from_millis(10)
        }

        fn poll(&mut self) -> BoxFuture<'_, Result<LteStatus>> {
            Box::pin(async {
                Ok(LteStatus {
                    connected: true,
                    operator: Some("Carrier".into()),
                    ..Default::default()
                })
            })
        }
    }

    #[tokio::test]
    async fn test_peripheral_monitors_supervised() {
        let dir = TempDir::new().unwrap();
        let gw = Arc::new(
            Gateway::new(
                GatewayOptions {
                    config_dir: dir.path().to_path_buf(),
                    log_dir: dir.path().join("logs"),
                    lte_probe: Some(ProbeFactory::new(|| {
                        Box::new(FixedModem) as Box<dyn PeripheralProbe<LteStatus>>
                    })),
                    ..Default::default()
                },
                Arc::new(LoggingLink),
            )
            .unwrap(),
        );
        gw.spawn_background();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let names: Vec<String> = gw.status().tasks.into_iter().map(|t| t.name).collect();
        for expected in ["network", "wifi", "lte", "process-cleanup"] {
            assert!(names.iter().any(|n| n == expected), "missing {}", expected);
        }
        // No camera driver configured
        assert!(!names.iter().any(|n| n == "camera"));
        assert!(gw.state.lte.get().connected);
        gw.shutdown().await;
    }
}
