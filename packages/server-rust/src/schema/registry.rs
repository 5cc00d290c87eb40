use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use tracing::{info, warn};
use twinport_core::{DomainError, SchemaHistory, SchemaVersion};

use crate::service::registry::{ManagedService, ServiceContext};
use crate::traits::MigrationLedger;

/// Holds the versioned entity schemas.
///
/// Reads use the cached history; write-path checks call [`refresh`] so a
/// migration applied by the external runner is seen before the next write.
/// The cached view only moves forward.
///
/// [`refresh`]: SchemaRegistry::refresh
pub struct SchemaRegistry {
    ledger: Arc<dyn MigrationLedger>,
    history: ArcSwapOption<SchemaHistory>,
}

impl SchemaRegistry {
    #[must_use]
    pub fn new(ledger: Arc<dyn MigrationLedger>) -> Self {
        Self {
            ledger,
            history: ArcSwapOption::empty(),
        }
    }

    /// Re-reads the ledger and publishes the resulting history.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the ledger cannot be read or does not fold into
    /// a valid history.
    pub async fn refresh(&self) -> Result<Arc<SchemaHistory>, DomainError> {
        let migrations = self
            .ledger
            .applied()
            .await
            .map_err(|e| DomainError::internal(format!("migration ledger unreadable: {e:#}")))?;
        let fresh = Arc::new(
            SchemaHistory::from_migrations(&migrations)
                .map_err(|e| DomainError::internal(format!("migration ledger invalid: {e}")))?,
        );

        let previous = self.history.rcu(|current| match current {
            Some(cur) if cur.latest().version > fresh.latest().version => Some(Arc::clone(cur)),
            _ => Some(Arc::clone(&fresh)),
        });

        let before = previous.as_ref().map(|h| h.latest().version);
        let after = fresh.latest().version;
        match before {
            Some(before) if before > after => {
                warn!(%before, %after, "ledger reported an older schema version; keeping cached view");
                return self.cached();
            }
            Some(before) if before == after => {}
            _ => {
                info!(version = %after, "active schema version");
                metrics::gauge!("twinport_schema_version").set(f64::from(after.0));
            }
        }
        Ok(fresh)
    }

    /// Cached history from the last refresh.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the registry was never initialized.
    pub fn cached(&self) -> Result<Arc<SchemaHistory>, DomainError> {
        self.history
            .load_full()
            .ok_or_else(|| DomainError::internal("schema registry not initialized"))
    }

    /// Active version of the cached view, if initialized.
    #[must_use]
    pub fn active_version(&self) -> Option<SchemaVersion> {
        self.history.load().as_ref().map(|h| h.latest().version)
    }
}

#[async_trait]
impl ManagedService for SchemaRegistry {
    fn name(&self) -> &'static str {
        "schema"
    }

    async fn init(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        self.refresh().await.map_err(|e| anyhow::anyhow!("{e}"))?;
        Ok(())
    }

    async fn shutdown(&self, _terminate: bool) -> anyhow::Result<()> {
        Ok(())
    }
}
