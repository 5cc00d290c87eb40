//! `DataStore` and `MigrationLedger` implementations.
//!
//! - [`NullDataStore`]: memory only
//! - [`MemoryLedger`]: in-process ledger, seeded with the baseline
//! - [`RedbDataStore`] / [`RedbLedger`]: embedded `redb` file (feature `redb`)

mod memory_ledger;
mod null;
#[cfg(feature = "redb")]
mod redb_store;

pub use memory_ledger::MemoryLedger;
pub use null::NullDataStore;
#[cfg(feature = "redb")]
pub use redb_store::{RedbDataStore, RedbLedger};

#[cfg(test)]
pub(crate) mod testing {
    use std::time::Duration;

    use async_trait::async_trait;
    use twinport_core::Entity;

    use crate::traits::{DataStore, RowChange};

    /// Persists nothing, but takes `delay` to do it.
    pub(crate) struct SlowDataStore {
        pub delay: Duration,
    }

    #[async_trait]
    impl DataStore for SlowDataStore {
        async fn load_all(&self) -> anyhow::Result<Vec<Entity>> {
            Ok(Vec::new())
        }

        async fn persist(&self, _changes: &[RowChange]) -> anyhow::Result<()> {
            tokio::time::sleep(self.delay).await;
            Ok(())
        }

        async fn close(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// Panics on every persist.
    pub(crate) struct PanickingDataStore;

    #[async_trait]
    impl DataStore for PanickingDataStore {
        async fn load_all(&self) -> anyhow::Result<Vec<Entity>> {
            Ok(Vec::new())
        }

        async fn persist(&self, _changes: &[RowChange]) -> anyhow::Result<()> {
            panic!("disk on fire");
        }

        async fn close(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }
}
