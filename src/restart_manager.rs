//! Supervision of long-running background tasks.
//!
//! Each supervised task gets a name, a fixed restart delay and its own
//! cancellation signal. When the task returns, fails or panics, the event is
//! logged and the task is started again after the delay. A failing task never
//! takes the process down.

use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::events::{EventSink, GatewayEvent};

/// Cancellation signal handed to every run of a supervised task
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl ShutdownSignal {
    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once shutdown has been requested
    pub async fn cancelled(&mut self) {
        match self.rx.as_mut() {
            // A dropped sender means the supervisor is gone: treat as cancelled
            Some(rx) => {
                let _ = rx.wait_for(|stop| *stop).await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    /// Signal that never fires, for running a task outside a supervisor
    pub fn never() -> Self {
        Self { rx: None }
    }
}

/// Restart bookkeeping for one task
#[derive(Clone, Debug, Serialize)]
pub struct RestartState {
    pub name: String,
    pub restarts: u64,
    pub running: bool,
    pub last_exit: Option<String>,
    #[serde(skip)]
    pub restart_delay: Duration,
}

impl RestartState {
    fn new(name: &str, restart_delay: Duration) -> Self {
        Self {
            name: name.to_string(),
            restarts: 0,
            running: false,
            last_exit: None,
            restart_delay,
        }
    }

    fn record_exit(&mut self, reason: String) {
        self.running = false;
        self.last_exit = Some(reason);
    }
}

struct SupervisedTask {
    state: Arc<Mutex<RestartState>>,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Owns every supervised background task
#[derive(Default)]
pub struct RestartManager {
    tasks: Mutex<Vec<SupervisedTask>>,
    events: Option<Arc<dyn EventSink>>,
}

impl RestartManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Task exits are also reported to `events`
    pub fn with_events(events: Arc<dyn EventSink>) -> Self {
        Self {
            tasks: Mutex::default(),
            events: Some(events),
        }
    }

    /// Run `task` forever under supervision. Returns immediately.
    pub fn supervise<F, Fut>(&self, name: &str, restart_delay: Duration, task: F)
    where
        F: Fn(ShutdownSignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (stop, rx) = watch::channel(false);
        let state = Arc::new(Mutex::new(RestartState::new(name, restart_delay)));
        let signal = ShutdownSignal { rx: Some(rx) };

        let handle = tokio::spawn(supervise_loop(
            Arc::clone(&state),
            signal,
            restart_delay,
            self.events.clone(),
            task,
        ));

        log::info!("Started supervised task '{}'", name);
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SupervisedTask {
                state,
                stop,
                handle,
            });
    }

    pub fn status(&self) -> Vec<RestartState> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|t| t.state.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .collect()
    }

    /// Human-readable one-line summary
    pub fn status_report(&self) -> String {
        self.status()
            .iter()
            .map(|s| {
                format!(
                    "{}: {} (restarts {})",
                    s.name,
                    if s.running { "RUNNING" } else { "RESTART_PENDING" },
                    s.restarts
                )
            })
            .collect::<Vec<_>>()
            .join(" | ")
    }

    /// Cancel every task and wait for the supervisors to finish.
    pub async fn shutdown(&self) {
        let tasks: Vec<SupervisedTask> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        for task in &tasks {
            let _ = task.stop.send(true);
        }
        for task in tasks {
            let _ = task.handle.await;
        }
        log::info!("All supervised tasks stopped");
    }
}

impl Drop for RestartManager {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.iter() {
            let _ = task.stop.send(true);
            task.handle.abort();
        }
    }
}

async fn supervise_loop<F, Fut>(
    state: Arc<Mutex<RestartState>>,
    mut signal: ShutdownSignal,
    restart_delay: Duration,
    events: Option<Arc<dyn EventSink>>,
    task: F,
) where
    F: Fn(ShutdownSignal) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let name = state
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .name
        .clone();

    loop {
        if signal.is_cancelled() {
            break;
        }

        state.lock().unwrap_or_else(PoisonError::into_inner).running = true;
        let mut handle = tokio::spawn(task(signal.clone()));

        let outcome = tokio::select! {
            res = &mut handle => res,
            _ = signal.cancelled() => {
                handle.abort();
                state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .record_exit("cancelled".to_string());
                break;
            }
        };

        let reason = match outcome {
            Ok(Ok(())) => {
                log::warn!(
                    "[SUPERVISOR] Task '{}' exited, restarting in {:.1}s",
                    name,
                    restart_delay.as_secs_f64()
                );
                "exited".to_string()
            }
            Ok(Err(e)) => {
                log::error!(
                    "[SUPERVISOR] Task '{}' failed: {}, restarting in {:.1}s",
                    name,
                    e,
                    restart_delay.as_secs_f64()
                );
                format!("error: {}", e)
            }
            Err(join_err) if join_err.is_panic() => {
                log::error!(
                    "[SUPERVISOR] Task '{}' panicked, restarting in {:.1}s",
                    name,
                    restart_delay.as_secs_f64()
                );
                "panicked".to_string()
            }
            Err(_) => {
                log::warn!("[SUPERVISOR] Task '{}' was cancelled", name);
                "cancelled".to_string()
            }
        };
        if let Some(events) = &events {
            events.emit(GatewayEvent::TaskExited {
                task: name.clone(),
                reason: reason.clone(),
                restart_in_secs: restart_delay.as_secs_f64(),
            });
        }
        state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_exit(reason);

        tokio::select! {
            _ = tokio::time::sleep(restart_delay) => {}
            _ = signal.cancelled() => break,
        }

        let restarts = {
            let mut s = state.lock().unwrap_or_else(PoisonError::into_inner);
            s.restarts += 1;
            s.restarts
        };
        log::info!("[SUPERVISOR] Restarting '{}' (restart #{})", name, restarts);
    }

    log::debug!("[SUPERVISOR] Supervisor for '{}' finished", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::ConnectionRegistry;
    use crate::error::GatewayError;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_exiting_task_is_restarted() {
        let manager = RestartManager::new();
        let runs = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&runs);

        manager.supervise("exits", Duration::from_millis(10), move |_signal| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), GatewayError>(())
            }
        });

        wait_until(|| runs.load(Ordering::SeqCst) >= 3).await;
        let status = manager.status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].name, "exits");
        assert!(status[0].restarts >= 2);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_panicking_and_failing_tasks_are_restarted() {
        let manager = RestartManager::new();
        let panics = Arc::new(AtomicU32::new(0));
        let failures = Arc::new(AtomicU32::new(0));

        let p = Arc::clone(&panics);
        manager.supervise("panics", Duration::from_millis(5), move |_| {
            let p = Arc::clone(&p);
            async move {
                if p.fetch_add(1, Ordering::SeqCst) < u32::MAX {
                    panic!("sensor went away");
                }
                Ok::<(), GatewayError>(())
            }
        });

        let f = Arc::clone(&failures);
        manager.supervise("fails", Duration::from_millis(5), move |_| {
            let f = Arc::clone(&f);
            async move {
                f.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(GatewayError::Connection("serial port closed".into()))
            }
        });

        wait_until(|| panics.load(Ordering::SeqCst) >= 2 && failures.load(Ordering::SeqCst) >= 2)
            .await;

        let status = manager.status();
        let panicked = status.iter().find(|s| s.name == "panics").unwrap();
        assert!(panicked.restarts >= 1);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_cancels_long_running_task() {
        let manager = RestartManager::new();
        let started = Arc::new(AtomicU32::new(0));
        let s = Arc::clone(&started);

        manager.supervise("forever", Duration::from_millis(5), move |mut signal| {
            let s = Arc::clone(&s);
            async move {
                s.fetch_add(1, Ordering::SeqCst);
                signal.cancelled().await;
                Ok::<(), GatewayError>(())
            }
        });

        wait_until(|| started.load(Ordering::SeqCst) == 1).await;
        assert!(manager.status()[0].running);

        tokio::time::timeout(Duration::from_secs(2), manager.shutdown())
            .await
            .expect("shutdown should not hang");
        assert!(manager.status().is_empty());
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exits_reported_to_event_sink() {
        let events = Arc::new(ConnectionRegistry::new());
        let (_id, mut rx) = events.register_with_capacity(64);
        let manager = RestartManager::with_events(Arc::clone(&events) as Arc<dyn EventSink>);

        manager.supervise("fails", Duration::from_millis(5), |_| async {
            Err::<(), _>(GatewayError::Connection("serial port closed".into()))
        });

        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no exit event")
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(json["event"], "task_exited");
        assert_eq!(json["task"], "fails");
        assert!(json["reason"].as_str().unwrap().contains("serial port closed"));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_status_report_names_tasks() {
        let manager = RestartManager::new();
        manager.supervise("stats", Duration::from_secs(1), |mut signal| async move {
            signal.cancelled().await;
            Ok::<(), GatewayError>(())
        });
        wait_until(|| manager.status().iter().all(|s| s.running)).await;
        assert!(manager.status_report().contains("stats: RUNNING"));
        manager.shutdown().await;
    }
}
