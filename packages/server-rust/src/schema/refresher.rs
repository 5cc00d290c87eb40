//! Periodic refresh of the cached schema view.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::registry::SchemaRegistry;
use crate::service::worker::BackgroundRunnable;

/// On-demand work accepted by [`SchemaRefresher`].
#[derive(Debug)]
pub enum RefreshTask {
    /// Re-read the ledger now.
    Now,
}

/// Keeps the read-path schema cache close to the ledger. Writes do not
/// depend on it; they re-read the ledger themselves.
pub struct SchemaRefresher {
    registry: Arc<SchemaRegistry>,
}

impl SchemaRefresher {
    #[must_use]
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self { registry }
    }

    async fn refresh(&self) {
        if let Err(e) = self.registry.refresh().await {
            warn!(error = %e, "schema refresh failed; serving cached view");
        }
    }
}

#[async_trait]
impl BackgroundRunnable for SchemaRefresher {
    type Task = RefreshTask;

    async fn run(&mut self, task: RefreshTask) {
        match task {
            RefreshTask::Now => self.refresh().await,
        }
    }

    async fn on_tick(&mut self) {
        self.refresh().await;
    }
}
