//! Log session state machine (start / pause / resume / stop).
//!
//! Only the recording state lives here; whoever persists records asks
//! `record()` whether the current sample counts.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::time::{Duration, Instant};

use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Recording,
    Paused,
}

/// Status record returned by every operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogStatus {
    pub active: bool,
    pub paused: bool,
    pub record_count: u64,
    pub file_path: Option<String>,
    pub start_time: Option<String>,
    pub duration_seconds: f64,
}

#[derive(Debug)]
struct ActiveSession {
    file_path: PathBuf,
    start_time: DateTime<Local>,
    started: Instant,
    paused_total: Duration,
    paused_since: Option<Instant>,
    record_count: u64,
}

impl ActiveSession {
    fn recording_time(&self, now: Instant) -> Duration {
        let paused_now = self
            .paused_since
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or_default();
        now.saturating_duration_since(self.started)
            .saturating_sub(self.paused_total + paused_now)
    }
}

#[derive(Debug)]
pub struct LogSession {
    log_dir: PathBuf,
    inner: Mutex<Option<ActiveSession>>,
}

impl LogSession {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            inner: Mutex::new(None),
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SessionState {
        match self.lock().as_ref() {
            None => SessionState::Idle,
            Some(s) if s.paused_since.is_some() => SessionState::Paused,
            Some(_) => SessionState::Recording,
        }
    }

    pub fn start(&self) -> Result<LogStatus> {
        let mut guard = self.lock();
        if guard.is_some() {
            return Err(GatewayError::InvalidState(
                "logging already active".to_string(),
            ));
        }
        let start_time = Local::now();
        let file_name = format!("telemetry_{}.msgpack", start_time.format("%Y%m%d_%H%M%S"));
        let session = ActiveSession {
            file_path: self.log_dir.join(file_name),
            start_time,
            started: Instant::now(),
            paused_total: Duration::ZERO,
            paused_since: None,
            record_count: 0,
        };
        log::info!("[LOG] Session started: {}", session.file_path.display());
        *guard = Some(session);
        Ok(Self::status_of(guard.as_ref(), Instant::now()))
    }

    /// Stop the session; the returned status describes the finished session
    pub fn stop(&self) -> Result<LogStatus> {
        let mut guard = self.lock();
        let now = Instant::now();
        let finished = guard
            .take()
            .ok_or_else(|| GatewayError::InvalidState("logging not active".to_string()))?;
        let mut status = Self::status_of(Some(&finished), now);
        status.active = false;
        status.paused = false;
        log::info!(
            "[LOG] Session stopped: {} records in {:.1}s",
            finished.record_count,
            status.duration_seconds
        );
        Ok(status)
    }

    pub fn pause(&self) -> Result<LogStatus> {
        let mut guard = self.lock();
        let now = Instant::now();
        let session = guard
            .as_mut()
            .ok_or_else(|| GatewayError::InvalidState("logging not active".to_string()))?;
        if session.paused_since.is_some() {
            return Err(GatewayError::InvalidState("logging already paused".to_string()));
        }
        session.paused_since = Some(now);
        log::info!("[LOG] Session paused");
        Ok(Self::status_of(guard.as_ref(), now))
    }

    pub fn resume(&self) -> Result<LogStatus> {
        let mut guard = self.lock();
        let now = Instant::now();
        let session = guard
            .as_mut()
            .ok_or_else(|| GatewayError::InvalidState("logging not active".to_string()))?;
        let since = session
            .paused_since
            .take()
            .ok_or_else(|| GatewayError::InvalidState("logging not paused".to_string()))?;
        session.paused_total += now.saturating_duration_since(since);
        log::info!("[LOG] Session resumed");
        Ok(Self::status_of(guard.as_ref(), now))
    }

    pub fn status(&self) -> LogStatus {
        Self::status_of(self.lock().as_ref(), Instant::now())
    }

    /// Count one record; returns false when not recording
    pub fn record(&self) -> bool {
        match self.lock().as_mut() {
            Some(session) if session.paused_since.is_none() => {
                session.record_count += 1;
                true
            }
            _ => false,
        }
    }

    fn status_of(session: Option<&ActiveSession>, now: Instant) -> LogStatus {
        match session {
            None => LogStatus {
                active: false,
                paused: false,
                record_count: 0,
                file_path: None,
                start_time: None,
                duration_seconds: 0.0,
            },
            Some(s) => LogStatus {
                active: true,
                paused: s.paused_since.is_some(),
                record_count: s.record_count,
                file_path: Some(s.file_path.display().to_string()),
                start_time: Some(s.start_time.to_rfc3339()),
                duration_seconds: s.recording_time(now).as_secs_f64(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_transitions_and_errors() {
        let session = LogSession::new("/tmp/logs");
        assert_eq!(session.state(), SessionState::Idle);
        assert!(matches!(session.stop(), Err(GatewayError::InvalidState(_))));
        assert!(matches!(session.pause(), Err(GatewayError::InvalidState(_))));
        assert!(matches!(session.resume(), Err(GatewayError::InvalidState(_))));

        let status = session.start().unwrap();
        assert!(status.active);
        assert!(matches!(session.start(), Err(GatewayError::InvalidState(_))));
        assert!(matches!(session.resume(), Err(GatewayError::InvalidState(_))));

        session.pause().unwrap();
        assert_eq!(session.state(), SessionState::Paused);
        assert!(matches!(session.pause(), Err(GatewayError::InvalidState(_))));

        session.resume().unwrap();
        assert_eq!(session.state(), SessionState::Recording);

        let stopped = session.stop().unwrap();
        assert!(!stopped.active);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_file_name_and_start_time() {
        let session = LogSession::new("/data/logs");
        let status = session.start().unwrap();
        let path = status.file_path.unwrap();
        let name = Path::new(&path).file_name().unwrap().to_str().unwrap();
        assert!(path.starts_with("/data/logs/"));
        assert!(name.starts_with("telemetry_"));
        assert!(name.ends_with(".msgpack"));
        // telemetry_YYYYMMDD_HHMMSS.msgpack
        assert_eq!(name.len(), "telemetry_".len() + 15 + ".msgpack".len());
        assert!(DateTime::parse_from_rfc3339(&status.start_time.unwrap()).is_ok());
    }

    #[test]
    fn test_record_counts_only_while_recording() {
        let session = LogSession::new("/tmp");
        assert!(!session.record());
        session.start().unwrap();
        assert!(session.record());
        assert!(session.record());
        session.pause().unwrap();
        assert!(!session.record());
        session.resume().unwrap();
        assert!(session.record());
        assert_eq!(session.status().record_count, 3);
        assert_eq!(session.stop().unwrap().record_count, 3);
        assert_eq!(session.status().record_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duration_excludes_paused_time() {
        let session = LogSession::new("/tmp");
        session.start().unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        session.pause().unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_relative_eq!(session.status().duration_seconds, 10.0, epsilon = 1e-3);
        session.resume().unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_relative_eq!(session.status().duration_seconds, 15.0, epsilon = 1e-3);
        assert_relative_eq!(session.stop().unwrap().duration_seconds, 15.0, epsilon = 1e-3);
    }
}
