use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tokio::time::{Duration, Instant};

use crate::error::Result;
use crate::restart_manager::ShutdownSignal;
use crate::state::SharedState;
use crate::types::Stats;

pub const STATS_WINDOW: Duration = Duration::from_secs(10);
pub const STATS_INTERVAL: Duration = Duration::from_secs(1);
/// No packet for this long flags the hardware link as silent
pub const SILENCE_THRESHOLD: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct EventWindow {
    packets: VecDeque<Instant>,
    errors: VecDeque<Instant>,
    last_packet: Option<Instant>,
    total_packets: u64,
    total_errors: u64,
}

impl EventWindow {
    fn prune(&mut self, cutoff: Instant) {
        while self.packets.front().is_some_and(|t| *t < cutoff) {
            self.packets.pop_front();
        }
        while self.errors.front().is_some_and(|t| *t < cutoff) {
            self.errors.pop_front();
        }
    }
}

/// Packet and decode-error counters for the hardware link
#[derive(Debug)]
pub struct HealthMonitor {
    started: Instant,
    window: Duration,
    silence_threshold: Duration,
    events: Mutex<EventWindow>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::with_window(STATS_WINDOW, SILENCE_THRESHOLD)
    }

    pub fn with_window(window: Duration, silence_threshold: Duration) -> Self {
        HealthMonitor {
            started: Instant::now(),
            window,
            silence_threshold,
            events: Mutex::new(EventWindow::default()),
        }
    }

    pub fn record_packet(&self) {
        self.record_packet_at(Instant::now());
    }

    pub fn record_packet_at(&self, now: Instant) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events.packets.push_back(now);
        events.last_packet = Some(now);
        events.total_packets += 1;
    }

    pub fn record_error(&self) {
        self.record_error_at(Instant::now());
    }

    pub fn record_error_at(&self, now: Instant) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events.errors.push_back(now);
        events.total_errors += 1;
    }

    pub fn totals(&self) -> (u64, u64) {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        (events.total_packets, events.total_errors)
    }

    /// Rolling stats as of `now`; drops events older than the window.
    pub fn stats_at(&self, now: Instant) -> Stats {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cutoff) = now.checked_sub(self.window) {
            events.prune(cutoff);
        }
        let packets = events.packets.len() as u64;
        Stats {
            packets_last_10s: packets,
            errors_last_10s: events.errors.len() as u64,
            data_rate_hz: packets as f64 / self.window.as_secs_f64(),
            uptime_seconds: now.saturating_duration_since(self.started).as_secs_f64(),
        }
    }

    pub fn time_since_last_packet(&self, now: Instant) -> Option<Duration> {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events
            .last_packet
            .map(|t| now.saturating_duration_since(t))
    }

    /// True once a packet has been seen and none arrived within the threshold
    pub fn is_silent_at(&self, now: Instant) -> bool {
        self.time_since_last_packet(now)
            .map(|d| d > self.silence_threshold)
            .unwrap_or(false)
    }

    pub fn format_status(&self, now: Instant) -> String {
        let stats = self.stats_at(now);
        let link = match self.time_since_last_packet(now) {
            None => "waiting".to_string(),
            Some(d) if d > self.silence_threshold => format!("silent {:.1}s", d.as_secs_f64()),
            Some(_) => "ok".to_string(),
        };
        format!(
            "Health: link {} | {:.1} Hz | {} errors/10s",
            link, stats.data_rate_hz, stats.errors_last_10s
        )
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodic aggregator: publishes rolling stats into the shared `Stats` record
pub async fn stats_task(
    monitor: &HealthMonitor,
    state: &SharedState,
    mut signal: ShutdownSignal,
) -> Result<()> {
    let mut interval = tokio::time::interval(STATS_INTERVAL);
    let mut was_silent = false;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = signal.cancelled() => return Ok(()),
        }

        let now = Instant::now();
        state.stats.set(monitor.stats_at(now));

        let silent = monitor.is_silent_at(now);
        if silent && !was_silent {
            if let Some(d) = monitor.time_since_last_packet(now) {
                log::warn!(
                    "[HEALTH] Hardware link SILENT for {:.1}s",
                    d.as_secs_f64()
                );
            }
        } else if !silent && was_silent {
            log::info!("[HEALTH] Hardware link recovered");
        }
        was_silent = silent;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_window_counts_and_rate() {
        let monitor = HealthMonitor::new();
        let t0 = Instant::now();
        for i in 0..500 {
            monitor.record_packet_at(t0 + Duration::from_millis(i * 20));
        }
        monitor.record_error_at(t0 + Duration::from_millis(100));

        let stats = monitor.stats_at(t0 + Duration::from_secs(10));
        assert_eq!(stats.packets_last_10s, 500);
        assert_eq!(stats.errors_last_10s, 1);
        assert_relative_eq!(stats.data_rate_hz, 50.0);
    }

    #[test]
    fn test_old_events_leave_window() {
        let monitor = HealthMonitor::new();
        let t0 = Instant::now();
        monitor.record_packet_at(t0);
        monitor.record_error_at(t0);
        monitor.record_packet_at(t0 + Duration::from_secs(8));

        let stats = monitor.stats_at(t0 + Duration::from_secs(15));
        assert_eq!(stats.packets_last_10s, 1);
        assert_eq!(stats.errors_last_10s, 0);
        assert_eq!(monitor.totals(), (2, 1));
    }

    #[test]
    fn test_silence_detection() {
        let monitor = HealthMonitor::with_window(STATS_WINDOW, Duration::from_secs(1));
        let t0 = Instant::now();
        // Never received anything: waiting, not silent
        assert!(!monitor.is_silent_at(t0 + Duration::from_secs(30)));

        monitor.record_packet_at(t0);
        assert!(!monitor.is_silent_at(t0 + Duration::from_millis(500)));
        assert!(monitor.is_silent_at(t0 + Duration::from_millis(1100)));
        assert!(monitor
            .format_status(t0 + Duration::from_secs(2))
            .contains("silent"));

        monitor.record_packet_at(t0 + Duration::from_secs(2));
        assert!(!monitor.is_silent_at(t0 + Duration::from_secs(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_task_publishes_record() {
        let monitor = HealthMonitor::new();
        let state = SharedState::default();
        for _ in 0..30 {
            monitor.record_packet();
        }

        let run = stats_task(&monitor, &state, ShutdownSignal::never());
        let _ = tokio::time::timeout(Duration::from_millis(1500), run).await;

        let stats = state.stats.get();
        assert_eq!(stats.packets_last_10s, 30);
        assert_relative_eq!(stats.data_rate_hz, 3.0);
        assert!(stats.uptime_seconds >= 1.0);
    }
}
