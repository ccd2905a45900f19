//! Reconnecting client state machine shared by the RTK and tracking clients.
//!
//! ```text
//! Disabled -> Connecting -> Connected -> Reconnecting -> Connecting ...
//!     ^___________________________________________________|  (disable)
//! ```
//!
//! Configuration lives in a `watch` channel. A worker task owns the network
//! side and reacts to config changes: connection-relevant changes tear the
//! session down, anything else is picked up by the running session in place.
//! Status is kept in its own lock and is never held across network I/O.

pub mod ntrip;
pub mod survive;

use serde::Serialize;
use std::fmt::Debug;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{GatewayError, Result};
use crate::events::{EventSink, GatewayEvent};
use crate::state::Record;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(10);
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

pub trait ClientConfig: Clone + Debug + PartialEq + Serialize + Send + Sync + 'static {
    fn enabled(&self) -> bool;

    fn set_enabled(&mut self, enabled: bool);

    /// True when moving from `self` to `next` requires a fresh connection
    fn requires_reconnect(&self, next: &Self) -> bool;

    /// Copy safe to expose in status responses
    fn redacted(&self) -> Self;
}

/// Protocol side of a reconnecting client
pub trait Connector: Send + Sync + 'static {
    type Config: ClientConfig;
    type Session: Send + 'static;

    fn name(&self) -> &str;

    /// Establish a session (handshake included)
    fn connect(
        &self,
        config: &Self::Config,
    ) -> impl Future<Output = Result<Self::Session>> + Send;

    /// Drive a session until it fails. Returning `Ok(())` means the remote
    /// closed the stream.
    fn run(
        &self,
        session: Self::Session,
        ctx: SessionContext<Self::Config>,
    ) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Clone, Copy, Debug)]
pub struct ClientTiming {
    pub connect_timeout: Duration,
    pub heartbeat_timeout: Duration,
    pub backoff: Duration,
}

impl Default for ClientTiming {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            heartbeat_timeout: HEARTBEAT_TIMEOUT,
            backoff: RECONNECT_BACKOFF,
        }
    }
}

/// Handed to a running session
pub struct SessionContext<C> {
    config: watch::Receiver<C>,
    bytes: Arc<AtomicU64>,
    pub heartbeat_timeout: Duration,
}

impl<C: Clone> SessionContext<C> {
    /// Latest config, including fields changed since connecting
    pub fn config(&self) -> C {
        self.config.borrow().clone()
    }

    pub fn add_bytes(&self, n: usize) {
        self.bytes.fetch_add(n as u64, Ordering::Relaxed);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    Disabled,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Clone, Debug)]
struct ClientRuntime {
    state: ClientState,
    last_error: Option<String>,
    retry_count: u64,
    connected_since: Option<String>,
}

impl Default for ClientRuntime {
    fn default() -> Self {
        Self {
            state: ClientState::Disabled,
            last_error: None,
            retry_count: 0,
            connected_since: None,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ClientStatus<C> {
    pub enabled: bool,
    pub connected: bool,
    pub state: ClientState,
    pub last_error: Option<String>,
    pub retry_count: u64,
    pub bytes_received: u64,
    pub connected_since: Option<String>,
    pub config: C,
}

struct Shared {
    name: String,
    runtime: Record<ClientRuntime>,
    bytes: Arc<AtomicU64>,
    events: Option<Arc<dyn EventSink>>,
}

impl Shared {
    fn transition(&self, state: ClientState) {
        let (previous, last_error) = self.runtime.update(|rt| {
            let previous = rt.state;
            rt.state = state;
            match state {
                ClientState::Connected => {
                    rt.retry_count = 0;
                    rt.last_error = None;
                    rt.connected_since = Some(chrono::Utc::now().to_rfc3339());
                }
                ClientState::Reconnecting => rt.retry_count += 1,
                ClientState::Disabled | ClientState::Connecting => {}
            }
            if state != ClientState::Connected {
                rt.connected_since = None;
            }
            (previous, rt.last_error.clone())
        });
        if previous != state {
            log::info!("[{}] {:?} -> {:?}", self.name, previous, state);
            if let Some(events) = &self.events {
                events.emit(GatewayEvent::ClientState {
                    client: self.name.clone(),
                    state,
                    last_error,
                });
            }
        }
    }

    fn record_error(&self, err: &GatewayError) {
        log::warn!("[{}] {}", self.name, err);
        let message = err.to_string();
        self.runtime.update(|rt| rt.last_error = Some(message));
    }
}

pub struct ReconnectingClient<K: Connector> {
    connector: Arc<K>,
    shared: Arc<Shared>,
    config_tx: watch::Sender<K::Config>,
    timing: ClientTiming,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<K: Connector> ReconnectingClient<K> {
    pub fn new(connector: K, config: K::Config, timing: ClientTiming) -> Self {
        Self::build(connector, config, timing, None)
    }

    /// Like `new`, with state transitions also reported to `events`
    pub fn with_events(
        connector: K,
        config: K::Config,
        timing: ClientTiming,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self::build(connector, config, timing, Some(events))
    }

    fn build(
        connector: K,
        config: K::Config,
        timing: ClientTiming,
        events: Option<Arc<dyn EventSink>>,
    ) -> Self {
        let (config_tx, _) = watch::channel(config);
        let shared = Arc::new(Shared {
            name: connector.name().to_string(),
            runtime: Record::new(ClientRuntime::default()),
            bytes: Arc::new(AtomicU64::new(0)),
            events,
        });
        Self {
            connector: Arc::new(connector),
            shared,
            config_tx,
            timing,
            worker: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Spawn the worker. Calling it again is a no-op while a worker runs.
    pub fn start(&self) {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        *worker = Some(tokio::spawn(run_worker(
            Arc::clone(&self.connector),
            Arc::clone(&self.shared),
            self.config_tx.subscribe(),
            self.timing,
        )));
    }

    pub fn config(&self) -> K::Config {
        self.config_tx.borrow().clone()
    }

    /// Replace the whole config. Accepted in any state; a disabled client
    /// stores it and applies it on the next enable.
    pub fn update_config(&self, config: K::Config) {
        log::info!(
            "[{}] config updated (enabled={})",
            self.shared.name,
            config.enabled()
        );
        self.config_tx.send_replace(config);
    }

    pub fn enable(&self) {
        self.config_tx.send_modify(|c| c.set_enabled(true));
    }

    pub fn disable(&self) {
        self.config_tx.send_modify(|c| c.set_enabled(false));
    }

    pub fn state(&self) -> ClientState {
        self.shared.runtime.get().state
    }

    pub fn status(&self) -> ClientStatus<K::Config> {
        let rt = self.shared.runtime.get();
        let config = self.config_tx.borrow().redacted();
        ClientStatus {
            enabled: config.enabled(),
            connected: rt.state == ClientState::Connected,
            state: rt.state,
            last_error: rt.last_error,
            retry_count: rt.retry_count,
            bytes_received: self.shared.bytes.load(Ordering::Relaxed),
            connected_since: rt.connected_since,
            config,
        }
    }
}

impl<K: Connector> Drop for ReconnectingClient<K> {
    fn drop(&mut self) {
        if let Some(handle) = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

enum SessionEnd {
    Failed(GatewayError),
    Reconfigured,
    Disabled,
    ConfigClosed,
}

async fn run_worker<K: Connector>(
    connector: Arc<K>,
    shared: Arc<Shared>,
    mut config_rx: watch::Receiver<K::Config>,
    timing: ClientTiming,
) {
    loop {
        let config = config_rx.borrow_and_update().clone();

        if !config.enabled() {
            shared.transition(ClientState::Disabled);
            if config_rx.changed().await.is_err() {
                return;
            }
            continue;
        }

        shared.transition(ClientState::Connecting);
        let connect = tokio::time::timeout(timing.connect_timeout, connector.connect(&config));
        let attempt = tokio::select! {
            res = connect => res,
            changed = config_rx.changed() => {
                if changed.is_err() {
                    return;
                }
                log::info!("[{}] config changed while connecting, restarting", shared.name);
                continue;
            }
        };

        let failure = match attempt {
            Ok(Ok(session)) => {
                shared.transition(ClientState::Connected);
                match drive_session(&*connector, &shared, session, &mut config_rx, config, timing)
                    .await
                {
                    SessionEnd::Failed(e) => e,
                    SessionEnd::Reconfigured | SessionEnd::Disabled => continue,
                    SessionEnd::ConfigClosed => return,
                }
            }
            Ok(Err(e)) => e,
            Err(_) => GatewayError::Timeout(format!(
                "connect timed out after {:.1}s",
                timing.connect_timeout.as_secs_f64()
            )),
        };

        shared.record_error(&failure);
        shared.transition(ClientState::Reconnecting);

        // Backoff, cut short by any config change
        tokio::select! {
            _ = tokio::time::sleep(timing.backoff) => {}
            changed = config_rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}

async fn drive_session<K: Connector>(
    connector: &K,
    shared: &Shared,
    session: K::Session,
    config_rx: &mut watch::Receiver<K::Config>,
    mut current: K::Config,
    timing: ClientTiming,
) -> SessionEnd {
    let ctx = SessionContext {
        config: config_rx.clone(),
        bytes: Arc::clone(&shared.bytes),
        heartbeat_timeout: timing.heartbeat_timeout,
    };
    let run = connector.run(session, ctx);
    tokio::pin!(run);

    loop {
        tokio::select! {
            res = &mut run => {
                return SessionEnd::Failed(match res {
                    Ok(()) => GatewayError::Connection("stream closed by remote".to_string()),
                    Err(e) => e,
                });
            }
            changed = config_rx.changed() => {
                if changed.is_err() {
                    return SessionEnd::ConfigClosed;
                }
                let next = config_rx.borrow_and_update().clone();
                if !next.enabled() {
                    log::info!("[{}] disabled, closing connection", shared.name);
                    return SessionEnd::Disabled;
                }
                if current.requires_reconnect(&next) {
                    log::info!("[{}] connection settings changed, reconnecting", shared.name);
                    return SessionEnd::Reconfigured;
                }
                log::info!("[{}] config applied without reconnect", shared.name);
                current = next;
            }
        }
    }
}
