//! Periodic sweep for stray vendor processes that fight over the serial port.

use std::fmt;
use std::sync::Arc;
use tokio::time::Duration;

use crate::error::{GatewayError, Result};
use crate::restart_manager::ShutdownSignal;

pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

/// Finds and terminates conflicting processes. Returns the names it killed.
///
/// `sweep` may block; the cleanup loop runs it on the blocking pool.
pub trait ProcessCleaner: Send + Sync + fmt::Debug {
    fn sweep(&self) -> Result<Vec<String>>;
}

/// Default cleaner: kills nothing
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopCleaner;

impl ProcessCleaner for NoopCleaner {
    fn sweep(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Kills processes by exact name with `pgrep`/`killall`
#[derive(Clone, Debug)]
pub struct KillallCleaner {
    names: Vec<String>,
}

impl KillallCleaner {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl ProcessCleaner for KillallCleaner {
    fn sweep(&self) -> Result<Vec<String>> {
        let mut killed = Vec::new();
        for name in &self.names {
            let running = std::process::Command::new("pgrep")
                .args(["-x", name])
                .output()?
                .status
                .success();
            if !running {
                continue;
            }
            let status = std::process::Command::new("killall").arg(name).status()?;
            if !status.success() {
                return Err(GatewayError::InvalidState(format!(
                    "killall {} exited with {}",
                    name, status
                )));
            }
            killed.push(name.clone());
        }
        Ok(killed)
    }
}

/// Run `cleaner` every `interval` until shutdown
pub async fn cleanup_loop(
    cleaner: Arc<dyn ProcessCleaner>,
    interval: Duration,
    mut signal: ShutdownSignal,
) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = signal.cancelled() => return Ok(()),
        }
        let cleaner = Arc::clone(&cleaner);
        let swept = tokio::task::spawn_blocking(move || cleaner.sweep())
            .await
            .map_err(|e| GatewayError::InvalidState(format!("cleanup sweep panicked: {}", e)))?;
        match swept {
            Ok(killed) if killed.is_empty() => {}
            Ok(killed) => log::info!("[CLEANUP] Terminated {}", killed.join(", ")),
            Err(e) => log::warn!("[CLEANUP] Sweep failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingCleaner {
        sweeps: AtomicUsize,
    }

    impl ProcessCleaner for CountingCleaner {
        fn sweep(&self) -> Result<Vec<String>> {
            let n = self.sweeps.fetch_add(1, Ordering::SeqCst);
            if n == 1 {
                return Err(GatewayError::Unavailable("pgrep missing".into()));
            }
            Ok(vec![format!("stray-{}", n)])
        }
    }

    #[tokio::test]
    async fn test_cleanup_loop_survives_failed_sweep() {
        let cleaner = Arc::new(CountingCleaner::default());

        let sweeping = cleanup_loop(cleaner.clone(), Duration::from_millis(10), ShutdownSignal::never());
        // Still running when the timeout fires
        assert!(tokio::time::timeout(Duration::from_millis(60), sweeping)
            .await
            .is_err());
        assert!(cleaner.sweeps.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn test_noop_cleaner_kills_nothing() {
        assert!(NoopCleaner.sweep().unwrap().is_empty());
    }
}
