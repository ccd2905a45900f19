//! Peripheral status records and the periodic monitors that refresh them.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

use crate::error::{GatewayError, Result};
use crate::restart_manager::ShutdownSignal;
use crate::state::SharedState;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WifiStatus {
    pub connected: bool,
    pub ssid: Option<String>,
    pub signal_dbm: Option<i32>,
    pub ip_address: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LteStatus {
    pub connected: bool,
    pub operator: Option<String>,
    /// 0-100 %
    pub signal_quality: Option<u8>,
    pub technology: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraStatus {
    pub daemon_running: bool,
    pub front_streaming: bool,
    pub rear_streaming: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceStats {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub rx_errors: u64,
    pub tx_errors: u64,
    /// Bytes per second since the previous poll
    pub rx_rate: f64,
    pub tx_rate: f64,
}

/// Per-interface counters keyed by interface name
pub type NetworkStatus = BTreeMap<String, InterfaceStats>;

/// One periodically polled peripheral.
///
/// `poll` gathers the current status; `publish` writes it into its record.
pub trait StatusProbe: Send + 'static {
    type Status: Send + 'static;

    fn name(&self) -> &str;

    fn interval(&self) -> Duration;

    fn poll(&mut self) -> impl Future<Output = Result<Self::Status>> + Send;

    fn publish(&self, state: &SharedState, status: Self::Status);
}

/// Poll `probe` forever, publishing each successful result.
///
/// A failed poll is logged and retried at the next interval; the previous
/// record stays in place.
pub async fn run_monitor<P: StatusProbe>(
    mut probe: P,
    state: Arc<SharedState>,
    mut signal: ShutdownSignal,
) -> Result<()> {
    let mut interval = tokio::time::interval(probe.interval());
    let mut failing = false;
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = signal.cancelled() => return Ok(()),
        }
        match probe.poll().await {
            Ok(status) => {
                if failing {
                    log::info!("[MONITOR] {} probe recovered", probe.name());
                    failing = false;
                }
                probe.publish(&state, status);
            }
            Err(e) => {
                if !failing {
                    log::warn!("[MONITOR] {} probe failed: {}", probe.name(), e);
                    failing = true;
                } else {
                    log::debug!("[MONITOR] {} probe still failing: {}", probe.name(), e);
                }
            }
        }
    }
}

/// Status types that own a record in [`SharedState`]
pub trait PeripheralStatus: Send + 'static {
    fn publish(self, state: &SharedState);
}

impl PeripheralStatus for WifiStatus {
    fn publish(self, state: &SharedState) {
        state.wifi.set(self);
    }
}

impl PeripheralStatus for LteStatus {
    fn publish(self, state: &SharedState) {
        state.lte.set(self);
    }
}

impl PeripheralStatus for CameraStatus {
    fn publish(self, state: &SharedState) {
        state.camera.set(self);
    }
}

/// Object-safe probe for peripherals whose driver lives outside this crate
/// (modem manager, camera daemon).
pub trait PeripheralProbe<S>: Send {
    fn name(&self) -> &str;

    fn interval(&self) -> Duration;

    fn poll(&mut self) -> BoxFuture<'_, Result<S>>;
}

/// Adapts a boxed [`PeripheralProbe`] to [`StatusProbe`]
pub struct DynProbe<S> {
    inner: Box<dyn PeripheralProbe<S>>,
}

impl<S> DynProbe<S> {
    pub fn new(inner: Box<dyn PeripheralProbe<S>>) -> Self {
        Self { inner }
    }
}

impl<S: PeripheralStatus> StatusProbe for DynProbe<S> {
    type Status = S;

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn interval(&self) -> Duration {
        self.inner.interval()
    }

    fn poll(&mut self) -> impl Future<Output = Result<S>> + Send {
        self.inner.poll()
    }

    fn publish(&self, state: &SharedState, status: S) {
        status.publish(state);
    }
}

/// Builds a fresh probe for every (re)start of its monitor task
pub struct ProbeFactory<S>(Arc<dyn Fn() -> Box<dyn PeripheralProbe<S>> + Send + Sync>);

impl<S> ProbeFactory<S> {
    pub fn new(f: impl Fn() -> Box<dyn PeripheralProbe<S>> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn build(&self) -> DynProbe<S> {
        DynProbe::new((self.0)())
    }
}

impl<S> Clone for ProbeFactory<S> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<S> fmt::Debug for ProbeFactory<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProbeFactory")
    }
}

const PROC_NET_WIRELESS: &str = "/proc/net/wireless";

/// WiFi link state from the kernel's `/proc/net/wireless`
pub struct WifiProbe {
    path: PathBuf,
    interval: Duration,
}

impl WifiProbe {
    pub fn new() -> Self {
        Self::with_path(PROC_NET_WIRELESS, Duration::from_secs(5))
    }

    pub fn with_path(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
        }
    }
}

impl Default for WifiProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusProbe for WifiProbe {
    type Status = WifiStatus;

    fn name(&self) -> &str {
        "wifi"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn poll(&mut self) -> Result<WifiStatus> {
        let contents = tokio::fs::read_to_string(&self.path).await?;
        parse_net_wireless(&contents)
    }

    fn publish(&self, state: &SharedState, status: WifiStatus) {
        state.wifi.set(status);
    }
}

/// Parse `/proc/net/wireless`; the first listed interface is the station.
///
/// The table has no SSID or address columns, so those stay `None`.
pub fn parse_net_wireless(contents: &str) -> Result<WifiStatus> {
    // Two header lines
    let Some(line) = contents.lines().skip(2).find(|l| l.contains(':')) else {
        return Ok(WifiStatus::default());
    };
    let Some((name, fields)) = line.split_once(':') else {
        return Ok(WifiStatus::default());
    };
    let name = name.trim();
    // status, link, level, noise, ...
    let level = fields
        .split_whitespace()
        .nth(2)
        .map(|f| f.trim_end_matches('.').parse::<f64>())
        .transpose()
        .map_err(|e| GatewayError::InvalidInput(format!("bad signal level for {}: {}", name, e)))?
        .ok_or_else(|| {
            GatewayError::InvalidInput(format!("interface {} has no signal level column", name))
        })?;
    // Some drivers report the level as an unsigned byte
    let dbm = if level > 0.0 { level - 256.0 } else { level };

    Ok(WifiStatus {
        connected: true,
        ssid: None,
        signal_dbm: Some(dbm.round() as i32),
        ip_address: None,
    })
}

const PROC_NET_DEV: &str = "/proc/net/dev";

/// Network interface counters from the kernel's `/proc/net/dev`
pub struct NetDevProbe {
    path: PathBuf,
    interval: Duration,
    previous: HashMap<String, (u64, u64)>,
    last_poll: Option<Instant>,
}

impl NetDevProbe {
    pub fn new() -> Self {
        Self::with_path(PROC_NET_DEV, Duration::from_secs(2))
    }

    pub fn with_path(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
            previous: HashMap::new(),
            last_poll: None,
        }
    }

    fn apply_rates(&mut self, mut stats: NetworkStatus, now: Instant) -> NetworkStatus {
        let elapsed = self
            .last_poll
            .map(|t| now.saturating_duration_since(t).as_secs_f64())
            .unwrap_or(0.0);

        for (name, iface) in stats.iter_mut() {
            if let Some((rx, tx)) = self.previous.get(name) {
                if elapsed > 0.0 {
                    // Counters reset when an interface is re-created
                    iface.rx_rate = iface.rx_bytes.saturating_sub(*rx) as f64 / elapsed;
                    iface.tx_rate = iface.tx_bytes.saturating_sub(*tx) as f64 / elapsed;
                }
            }
        }

        self.previous = stats
            .iter()
            .map(|(name, s)| (name.clone(), (s.rx_bytes, s.tx_bytes)))
            .collect();
        self.last_poll = Some(now);
        stats
    }
}

impl Default for NetDevProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusProbe for NetDevProbe {
    type Status = NetworkStatus;

    fn name(&self) -> &str {
        "network"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn poll(&mut self) -> Result<NetworkStatus> {
        let contents = tokio::fs::read_to_string(&self.path).await?;
        let stats = parse_net_dev(&contents)?;
        Ok(self.apply_rates(stats, Instant::now()))
    }

    fn publish(&self, state: &SharedState, status: NetworkStatus) {
        state.network.set(status);
    }
}

/// Parse the `/proc/net/dev` table, skipping the loopback interface.
pub fn parse_net_dev(contents: &str) -> Result<NetworkStatus> {
    let mut out = NetworkStatus::new();
    // Two header lines
    for line in contents.lines().skip(2) {
        let Some((name, counters)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() || name == "lo" {
            continue;
        }
        let fields: Vec<u64> = counters
            .split_whitespace()
            .map(|f| f.parse::<u64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| {
                GatewayError::InvalidInput(format!("bad counter for interface {}: {}", name, e))
            })?;
        if fields.len() < 16 {
            return Err(GatewayError::InvalidInput(format!(
                "interface {} has {} counters, expected 16",
                name,
                fields.len()
            )));
        }
        out.insert(
            name.to_string(),
            InterfaceStats {
                rx_bytes: fields[0],
                rx_packets: fields[1],
                rx_errors: fields[2],
                tx_bytes: fields[8],
                tx_packets: fields[9],
                tx_errors: fields[10],
                ..Default::default()
            },
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo:  123456     100    0    0    0     0          0         0   123456     100    0    0    0     0       0          0
  eth0: 9876543    5000    2    0    0     0          0        10  1234567    4000    1    0    0     0       0          0
 wwan0:    1000      10    0    0    0     0          0         0      500       5    0    0    0     0       0          0
";

    #[test]
    fn test_parse_net_dev() {
        let stats = parse_net_dev(SAMPLE).unwrap();
        assert_eq!(stats.len(), 2);
        assert!(!stats.contains_key("lo"));

        let eth0 = &stats["eth0"];
        assert_eq!(eth0.rx_bytes, 9_876_543);
        assert_eq!(eth0.rx_packets, 5000);
        assert_eq!(eth0.rx_errors, 2);
        assert_eq!(eth0.tx_bytes, 1_234_567);
        assert_eq!(eth0.tx_packets, 4000);
        assert_eq!(eth0.tx_errors, 1);
        assert_eq!(stats["wwan0"].tx_bytes, 500);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let bad = "h1\nh2\n  eth0: 12 abc\n";
        assert!(parse_net_dev(bad).is_err());
        let short = "h1\nh2\n  eth0: 1 2 3\n";
        assert!(parse_net_dev(short).is_err());
    }

    #[test]
    fn test_rates_from_successive_polls() {
        let mut probe = NetDevProbe::new();
        let t0 = Instant::now();
        let first = probe.apply_rates(parse_net_dev(SAMPLE).unwrap(), t0);
        assert_eq!(first["eth0"].rx_rate, 0.0);

        let mut next = parse_net_dev(SAMPLE).unwrap();
        if let Some(eth0) = next.get_mut("eth0") {
            eth0.rx_bytes += 2000;
            eth0.tx_bytes += 1000;
        }
        let second = probe.apply_rates(next, t0 + Duration::from_secs(2));
        assert_eq!(second["eth0"].rx_rate, 1000.0);
        assert_eq!(second["eth0"].tx_rate, 500.0);
    }

    #[tokio::test]
    async fn test_probe_publishes_into_state() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let mut probe = NetDevProbe::with_path(file.path(), Duration::from_millis(10));
        let state = SharedState::default();
        let status = probe.poll().await.unwrap();
        probe.publish(&state, status);
        assert!(state.network.get().contains_key("eth0"));
    }

    #[tokio::test]
    async fn test_missing_file_is_error() {
        let mut probe = NetDevProbe::with_path("/nonexistent/net/dev", Duration::from_millis(10));
        assert!(matches!(probe.poll().await, Err(GatewayError::Io(_))));
    }

    const WIRELESS: &str = "\
Inter-| sta-|   Quality        |   Discarded packets               | Missed | WE
 face | tus | link level noise |  nwid  crypt   frag  retry   misc | beacon | 22
 wlan0: 0000   54.  -56.  -256        0      0      0      0      0        0
";

    #[test]
    fn test_parse_net_wireless() {
        let status = parse_net_wireless(WIRELESS).unwrap();
        assert!(status.connected);
        assert_eq!(status.signal_dbm, Some(-56));

        let unsigned = WIRELESS.replace("-56.", "200.");
        assert_eq!(parse_net_wireless(&unsigned).unwrap().signal_dbm, Some(-56));

        // No associated interface: header only
        let idle: String = WIRELESS.lines().take(2).collect::<Vec<_>>().join("\n");
        assert_eq!(parse_net_wireless(&idle).unwrap(), WifiStatus::default());

        let bad = WIRELESS.replace("-56.", "abc");
        assert!(parse_net_wireless(&bad).is_err());
    }

    #[tokio::test]
    async fn test_wifi_status_published_into_state() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(WIRELESS.as_bytes()).unwrap();

        let mut probe = WifiProbe::with_path(file.path(), Duration::from_millis(10));
        let state = SharedState::default();
        let status = probe.poll().await.unwrap();
        probe.publish(&state, status);
        assert!(state.wifi.get().connected);
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
                    signal_quality: Some(70),
                    technology: Some("LTE".into()),
                })
            })
        }
    }

    #[tokio::test]
    async fn test_boxed_driver_runs_under_monitor() {
        let factory = ProbeFactory::new(|| Box::new(FixedModem) as Box<dyn PeripheralProbe<LteStatus>>);
        let state = Arc::new(SharedState::default());

        let monitor = run_monitor(factory.build(), Arc::clone(&state), ShutdownSignal::never());
        let _ = tokio::time::timeout(Duration::from_millis(50), monitor).await;

        let lte = state.lte.get();
        assert!(lte.connected);
        assert_eq!(lte.signal_quality, Some(70));
    }
}
