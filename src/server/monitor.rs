use crate::Supervisor;
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;

/// Runs [`Supervisor::reconcile_now`] on a fixed interval.
pub struct ReconcileMonitor {
    supervisor: Supervisor,
    interval: Duration,
    /// Monitor task
    task: Option<JoinHandle<()>>,
    /// Running flag
    running: Arc<Mutex<bool>>,
    /// Completed passes
    passes: Arc<AtomicU64>,
}

impl ReconcileMonitor {
    pub fn new(supervisor: Supervisor, interval: Duration) -> Self {
        Self {
            supervisor,
            interval,
            task: None,
            running: Arc::new(Mutex::new(false)),
            passes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start the monitor. The first pass runs immediately.
    pub fn start(&mut self) -> Result<()> {
        {
            let mut running = self
                .running
                .lock()
                .map_err(|_| Error::Other("Failed to lock running flag".to_string()))?;

            if *running {
                return Ok(());
            }

            *running = true;
        }

        let supervisor = self.supervisor.clone();
        let running = Arc::clone(&self.running);
        let passes = Arc::clone(&self.passes);
        let period = self.interval;

        let task = tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                if !running.lock().map(|r| *r).unwrap_or(false) {
                    break;
                }

                match supervisor.reconcile_now().await {
                    Ok(changes) if !changes.is_empty() => {
                        tracing::debug!(num_changes = changes.len(), "Reconciliation pass changed statuses");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "Reconciliation pass failed"),
                }
                passes.fetch_add(1, Ordering::Relaxed);
            }
        });

        self.task = Some(task);
        tracing::info!(interval_ms = period.as_millis() as u64, "Reconcile monitor started");

        Ok(())
    }

    /// Stop the monitor
    pub fn stop(&mut self) -> Result<()> {
        {
            let mut running = self
                .running
                .lock()
                .map_err(|_| Error::Other("Failed to lock running flag".to_string()))?;

            if !*running {
                return Ok(());
            }

            *running = false;
        }

        if let Some(task) = self.task.take() {
            task.abort();
        }
        tracing::info!("Reconcile monitor stopped");

        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().map(|r| *r).unwrap_or(false)
    }

    /// Number of passes completed since creation.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }
}

impl Drop for ReconcileMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
