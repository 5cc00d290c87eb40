//! Background worker for periodic and on-demand maintenance.
//!
//! A [`BackgroundWorker`] owns one tokio task that feeds submitted tasks to a
//! [`BackgroundRunnable`] and calls its tick hook at a fixed interval.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::debug;

const TASK_CHANNEL_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Work executed on a [`BackgroundWorker`]'s task.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    type Task: Send + 'static;

    /// Handle one submitted task.
    async fn run(&mut self, task: Self::Task);

    /// Called once per tick interval. Default is a no-op.
    async fn on_tick(&mut self) {}

    /// Called once after the loop exits. Default is a no-op.
    async fn shutdown(&mut self) {}
}

/// Errors from submitting to a worker.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("worker {0} is stopped")]
    Stopped(&'static str),
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Handle to a running background task.
pub struct BackgroundWorker<R: BackgroundRunnable> {
    name: &'static str,
    tx: Option<mpsc::Sender<R::Task>>,
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Spawns the worker loop. The first tick fires one full `tick` after
    /// start; ticks missed while a task runs are delayed, not bunched.
    pub fn start(name: &'static str, mut runnable: R, tick: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<R::Task>(TASK_CHANNEL_CAPACITY);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(worker = name, ?tick, "background worker started");

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    task = rx.recv() => match task {
                        Some(task) => runnable.run(task).await,
                        None => break,
                    },
                    _ = interval.tick() => runnable.on_tick().await,
                }
            }

            runnable.shutdown().await;
            debug!(worker = name, "background worker stopped");
        });

        Self {
            name,
            tx: Some(tx),
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Queues a task, waiting for channel capacity.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Stopped`] once the worker has stopped.
    pub async fn submit(&self, task: R::Task) -> Result<(), WorkerError> {
        let tx = self.tx.as_ref().ok_or(WorkerError::Stopped(self.name))?;
        tx.send(task)
            .await
            .map_err(|_| WorkerError::Stopped(self.name))
    }

    /// Signals the loop to exit and waits for the runnable's shutdown hook.
    pub async fn stop(&mut self) {
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }
        self.tx = None;
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
