//! Graceful shutdown.
//!
//! The server registers every background component here. On SIGTERM or
//! Ctrl+C the HTTP listener stops first, then [`ShutdownCoordinator::shutdown`]
//! broadcasts the stop signal and waits for each component, bounded by one
//! grace period.
//!
//! ```ignore
//! let mut shutdown = ShutdownCoordinator::new(Duration::from_secs(30));
//! let worker = InvoiceWorker::new(queue, generator, config).spawn(&shutdown.subscribe());
//! shutdown.register(Arc::new(worker));
//! shutdown.track("enqueue-reconciler", tokio::spawn(reconciler.run(every, shutdown.subscribe())));
//!
//! wait_for_signal().await?;
//! shutdown.shutdown().await?;
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// A background component that must drain before the process exits.
#[async_trait]
pub trait ShutdownHandler: Send + Sync {
    /// Name used in logs and failure reports.
    fn name(&self) -> &str;

    /// Wait for in-flight work to finish.
    async fn shutdown(&self) -> Result<(), String>;
}

/// Broadcasts the stop signal and drains registered components.
pub struct ShutdownCoordinator {
    handlers: Vec<Arc<dyn ShutdownHandler>>,
    signal: broadcast::Sender<()>,
    grace: Duration,
}

impl ShutdownCoordinator {
    /// Each component gets at most `grace` to drain.
    #[must_use]
    pub fn new(grace: Duration) -> Self {
        let (signal, _) = broadcast::channel(1);
        Self {
            handlers: Vec::new(),
            signal,
            grace,
        }
    }

    /// Drain `handler` on shutdown.
    pub fn register(&mut self, handler: Arc<dyn ShutdownHandler>) {
        info!(component = handler.name(), "Registered for shutdown");
        self.handlers.push(handler);
    }

    /// Await `task` on shutdown. The task should stop on a receiver from
    /// [`subscribe`](Self::subscribe).
    pub fn track(&mut self, name: impl Into<String>, task: JoinHandle<()>) {
        self.register(Arc::new(TrackedTask {
            name: name.into(),
            task: Mutex::new(Some(task)),
        }));
    }

    /// A receiver that fires once shutdown begins.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.signal.subscribe()
    }

    /// Signal every subscriber, then drain all components concurrently.
    ///
    /// # Errors
    ///
    /// One `"{name}: {reason}"` entry per component that failed or overran
    /// the grace period.
    pub async fn shutdown(&self) -> Result<(), Vec<String>> {
        info!(
            components = self.handlers.len(),
            grace_secs = self.grace.as_secs(),
            "Shutting down"
        );

        if self.signal.send(()).is_err() {
            warn!("Nothing was listening for the shutdown signal");
        }

        let drains = self.handlers.iter().map(|handler| async move {
            let name = handler.name();
            match tokio::time::timeout(self.grace, handler.shutdown()).await {
                Ok(Ok(())) => {
                    info!(component = name, "Drained");
                    None
                }
                Ok(Err(reason)) => {
                    error!(component = name, error = %reason, "Drain failed");
                    Some(format!("{name}: {reason}"))
                }
                Err(_) => {
                    error!(component = name, "Drain exceeded grace period");
                    Some(format!("{name}: exceeded grace period of {:?}", self.grace))
                }
            }
        });

        let failures: Vec<String> = futures::future::join_all(drains)
            .await
            .into_iter()
            .flatten()
            .collect();

        if failures.is_empty() { Ok(()) } else { Err(failures) }
    }
}

struct TrackedTask {
    name: String,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl ShutdownHandler for TrackedTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn shutdown(&self) -> Result<(), String> {
        match self.task.lock().await.take() {
            Some(task) => task.await.map_err(|e| e.to_string()),
            None => Ok(()),
        }
    }
}

/// Resolve on SIGTERM or Ctrl+C.
///
/// # Errors
///
/// If the signal handlers cannot be installed.
pub async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res?;
                info!("Received Ctrl+C");
            }
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    struct Drain {
        name: &'static str,
        takes: Duration,
        outcome: Result<(), String>,
    }

    #[async_trait]
    impl ShutdownHandler for Drain {
        fn name(&self) -> &str {
            self.name
        }

        async fn shutdown(&self) -> Result<(), String> {
            tokio::time::sleep(self.takes).await;
            self.outcome.clone()
        }
    }

    fn drain(name: &'static str, takes: Duration, outcome: Result<(), String>) -> Arc<Drain> {
        Arc::new(Drain {
            name,
            takes,
            outcome,
        })
    }

    #[tokio::test]
    async fn reports_only_failed_and_overrunning_components() {
        let mut shutdown = ShutdownCoordinator::new(Duration::from_millis(50));
        shutdown.register(drain("invoice-worker", Duration::ZERO, Ok(())));
        shutdown.register(drain("broken", Duration::ZERO, Err("disk gone".into())));
        shutdown.register(drain("stuck", Duration::from_secs(5), Ok(())));

        let mut failures = shutdown.shutdown().await.unwrap_err();
        failures.sort();

        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0], "broken: disk gone");
        assert!(failures[1].starts_with("stuck: exceeded grace period"));
    }

    #[tokio::test]
    async fn tracked_task_stops_on_signal_and_is_awaited() {
        let mut shutdown = ShutdownCoordinator::new(Duration::from_secs(1));
        let mut stop = shutdown.subscribe();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        shutdown.track(
            "loop",
            tokio::spawn(async move {
                let _ = stop.recv().await;
                let _ = done_tx.send(());
            }),
        );

        shutdown.shutdown().await.unwrap();
        assert!(done_rx.await.is_ok());
    }

    #[tokio::test]
    async fn panicked_task_is_a_failure() {
        let mut shutdown = ShutdownCoordinator::new(Duration::from_secs(1));
        shutdown.track(
            "crashy",
            tokio::spawn(async {
                let items: Vec<u8> = Vec::new();
                let _ = items[1];
            }),
        );

        let failures = shutdown.shutdown().await.unwrap_err();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].starts_with("crashy: "));
    }
}
