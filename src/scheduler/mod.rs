//! Owned recurring background tasks
//!
//! A [`RecurringTask`] is created and held by the host application. It runs
//! its job once per period until [`RecurringTask::shutdown`] is awaited or
//! the handle is dropped.

use crate::config::MaintenanceConfig;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Counters reported when a task stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    pub runs: u64,
    pub failures: u64,
}

/// Handle to a job running on a fixed period
pub struct RecurringTask {
    name: String,
    cancel: CancellationToken,
    handle: Option<JoinHandle<TaskStats>>,
}

impl RecurringTask {
    /// Spawn `job` on the current Tokio runtime; the first run happens one
    /// `period` after spawning
    pub fn spawn<F, Fut>(name: impl Into<String>, period: Duration, job: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_periodically(
            name.clone(),
            period,
            cancel.clone(),
            job,
        ));

        tracing::info!(task = %name, ?period, "recurring task started");
        Self {
            name,
            cancel,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the task, letting an in-progress run finish first
    pub async fn shutdown(mut self) -> TaskStats {
        self.cancel.cancel();
        let Some(handle) = self.handle.take() else {
            return TaskStats::default();
        };

        match handle.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!(task = %self.name, error = %e, "recurring task aborted");
                TaskStats::default()
            }
        }
    }
}

impl Drop for RecurringTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_periodically<F, Fut>(
    name: String,
    period: Duration,
    cancel: CancellationToken,
    job: F,
) -> TaskStats
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut ticker = time::interval_at(time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stats = TaskStats::default();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                stats.runs += 1;
                if let Err(e) = job().await {
                    stats.failures += 1;
                    tracing::error!(task = %name, error = %e, "recurring task run failed");
                }
            }
        }
    }

    tracing::info!(
        task = %name,
        runs = stats.runs,
        failures = stats.failures,
        "recurring task stopped"
    );
    stats
}

/// External record store holding chat messages
#[async_trait]
pub trait ChatHistoryStore: Send + Sync {
    /// Delete messages created before `cutoff`, returning how many were deleted
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// Periodic removal of chat messages older than a retention window
#[derive(Clone)]
pub struct RetentionSweep {
    store: Arc<dyn ChatHistoryStore>,
    retention: chrono::Duration,
}

impl RetentionSweep {
    pub fn new(store: Arc<dyn ChatHistoryStore>, retention: chrono::Duration) -> Self {
        Self { store, retention }
    }

    pub fn from_config(store: Arc<dyn ChatHistoryStore>, config: &MaintenanceConfig) -> Self {
        Self::new(store, config.retention())
    }

    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.retention
    }

    /// Run a single sweep
    pub async fn run_once(&self) -> Result<usize> {
        let cutoff = self.cutoff(Utc::now());
        let deleted = self.store.delete_older_than(cutoff).await?;
        tracing::info!(deleted, %cutoff, "deleted old chat messages");
        Ok(deleted)
    }

    /// Run the sweep every `period` until the returned handle is shut down
    pub fn spawn(self, period: Duration) -> RecurringTask {
        let sweep = Arc::new(self);
        RecurringTask::spawn("chat-retention", period, move || {
            let sweep = Arc::clone(&sweep);
            async move { sweep.run_once().await.map(|_| ()) }
        })
    }
}
