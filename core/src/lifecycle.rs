//! Process lifecycle shared by the two service binaries.
//!
//! Both binaries are the same shape of process: a handful of long-lived
//! loops (download workers, the status poller, the retention cleaner,
//! the analysis API) that must stop when the operator asks, finish the
//! unit of work they hold, and never leave a `.part` file or an
//! unacknowledged queue claim behind. [`Lifecycle`] owns the stop flag
//! and the named task handles; each loop carries a [`StopSignal`] and
//! selects on it between units of work.

use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

/// Drain budget per tracked task. Long enough for an in-flight
/// download or persist batch to finish, short enough that one wedged
/// loop cannot hold the process hostage.
const DRAIN_BUDGET: Duration = Duration::from_secs(20);

/// A loop's view of the stop flag.
#[derive(Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once stop has been requested. Borrows, so a loop can
    /// keep selecting on the same signal between ticks.
    pub async fn recv(&mut self) {
        let _ = self.rx.wait_for(|&stopped| stopped).await;
    }

    /// Owned variant of [`recv`](Self::recv) for consumers that need a
    /// `'static` future, like the analysis API's graceful shutdown.
    pub async fn stopped(mut self) {
        self.recv().await;
    }
}

struct TrackedTask {
    name: String,
    handle: JoinHandle<()>,
}

/// Owner of the stop flag and the background loops that honor it.
pub struct Lifecycle {
    tx: watch::Sender<bool>,
    signal: StopSignal,
    tasks: Mutex<Vec<TrackedTask>>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx,
            signal: StopSignal { rx },
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.signal.clone()
    }

    /// Flip the stop flag. Idempotent; loops observe it at their next
    /// select point.
    pub fn request_stop(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_stopping(&self) -> bool {
        self.signal.is_stopped()
    }

    /// Adopt a background loop under a name. The name is what shows up
    /// in drain logs, so a worker that refuses to stop is identifiable
    /// from the output alone.
    pub async fn track(&self, name: impl Into<String>, handle: JoinHandle<()>) {
        self.tasks.lock().await.push(TrackedTask {
            name: name.into(),
            handle,
        });
    }

    /// Translate Ctrl+C or SIGTERM into a stop request.
    pub fn watch_os_signals(&self) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let signal = wait_for_os_signal().await;
            tracing::info!(signal, "Stop requested by OS signal");
            let _ = tx.send(true);
        });
    }

    /// Request stop, then await every tracked task under its own drain
    /// budget. A task that overruns is abandoned and named in the log;
    /// queue leases and the `.part` rename protocol make that safe.
    pub async fn drain(&self) {
        self.request_stop();
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        tracing::debug!(count = tasks.len(), "Draining background tasks");

        for TrackedTask { name, handle } in tasks {
            match tokio::time::timeout(DRAIN_BUDGET, handle).await {
                Ok(Ok(())) => tracing::debug!(task = %name, "Task drained"),
                Ok(Err(e)) => {
                    tracing::warn!(task = %name, error = %e, "Task ended abnormally");
                }
                Err(_) => {
                    tracing::warn!(
                        task = %name,
                        budget_s = DRAIN_BUDGET.as_secs(),
                        "Task ignored the stop request, abandoning it"
                    );
                }
            }
        }

        tracing::debug!("Drain complete");
    }
}

async fn wait_for_os_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => "interrupt",
                    _ = terminate.recv() => "terminate",
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Cannot install SIGTERM handler; Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
                "interrupt"
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "interrupt"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_not_stopping_initially() {
        let lifecycle = Lifecycle::new();
        assert!(!lifecycle.is_stopping());
        assert!(!lifecycle.stop_signal().is_stopped());
    }

    #[tokio::test]
    async fn test_request_stop_reaches_every_signal() {
        let lifecycle = Lifecycle::new();
        let early = lifecycle.stop_signal();
        lifecycle.request_stop();
        let late = lifecycle.stop_signal();

        assert!(early.is_stopped());
        assert!(late.is_stopped());
    }

    #[tokio::test]
    async fn test_stopped_future_resolves_on_request() {
        let lifecycle = Lifecycle::new();
        let waiter = tokio::spawn(lifecycle.stop_signal().stopped());

        tokio::task::yield_now().await;
        lifecycle.request_stop();

        tokio::time::timeout(Duration::from_millis(100), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_drain_waits_for_cooperative_tasks() {
        let lifecycle = Lifecycle::new();
        let mut stop = lifecycle.stop_signal();
        lifecycle
            .track(
                "cooperative-loop",
                tokio::spawn(async move {
                    stop.recv().await;
                }),
            )
            .await;

        tokio::time::timeout(Duration::from_millis(200), lifecycle.drain())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_recv_is_reusable_across_a_loop() {
        let lifecycle = Lifecycle::new();
        let mut stop = lifecycle.stop_signal();

        // A select loop polls recv() many times before stop; the signal
        // must stay usable and then resolve promptly.
        for _ in 0..3 {
            tokio::select! {
                biased;
                _ = stop.recv() => panic!("stopped too early"),
                _ = tokio::time::sleep(Duration::from_millis(1)) => {}
            }
        }
        lifecycle.request_stop();
        tokio::time::timeout(Duration::from_millis(100), stop.recv())
            .await
            .unwrap();
    }
}
