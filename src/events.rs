//! Gateway events streamed to `/ws/logs` subscribers.
//!
//! Log-session transitions, supervised task exits and client state changes
//! are pushed into an [`EventSink`]. The live sink is a second
//! [`ConnectionRegistry`], so event delivery follows the same best-effort,
//! drop-the-stalled-subscriber rules as the telemetry stream.

use serde::Serialize;

use crate::broadcast::ConnectionRegistry;
use crate::clients::ClientState;

/// A running session emits a progress event every this many records
pub const LOG_PROGRESS_EVERY: u64 = 100;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GatewayEvent {
    LogStarted {
        file_path: Option<String>,
        start_time: Option<String>,
    },
    LogPaused {
        record_count: u64,
    },
    LogResumed {
        record_count: u64,
    },
    LogStopped {
        record_count: u64,
        duration_seconds: f64,
    },
    LogProgress {
        record_count: u64,
    },
    TaskExited {
        task: String,
        reason: String,
        restart_in_secs: f64,
    },
    ClientState {
        client: String,
        state: ClientState,
        last_error: Option<String>,
    },
}

#[derive(Serialize)]
struct EventFrame<'a> {
    timestamp: String,
    #[serde(flatten)]
    event: &'a GatewayEvent,
}

/// Receiver of gateway events; must not block
pub trait EventSink: Send + Sync {
    fn emit(&self, event: GatewayEvent);
}

impl EventSink for ConnectionRegistry {
    fn emit(&self, event: GatewayEvent) {
        if self.is_empty() {
            return;
        }
        let frame = EventFrame {
            timestamp: chrono::Local::now().to_rfc3339(),
            event: &event,
        };
        match serde_json::to_string(&frame) {
            Ok(json) => {
                self.broadcast(&json);
            }
            Err(e) => log::warn!("[EVENTS] Cannot encode {:?}: {}", event, e),
        }
    }
}
