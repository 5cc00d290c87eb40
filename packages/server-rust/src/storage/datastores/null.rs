//! No-op [`DataStore`] implementation.
//!
//! [`NullDataStore`] discards all writes and loads nothing. Used for tests
//! and for deployments that keep state in memory only.

use async_trait::async_trait;
use twinport_core::Entity;

use crate::traits::{DataStore, RowChange};

/// No-op `DataStore` for tests and ephemeral deployments.
pub struct NullDataStore;

#[async_trait]
impl DataStore for NullDataStore {
    async fn load_all(&self) -> anyhow::Result<Vec<Entity>> {
        Ok(Vec::new())
    }

    async fn persist(&self, _changes: &[RowChange]) -> anyhow::Result<()> {
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn is_null(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use twinport_core::{EntityId, EntityKind};

    #[tokio::test]
    async fn load_all_returns_empty_vec() {
        assert!(NullDataStore.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn persist_discards_changes() {
        let changes = [RowChange::Delete {
            kind: EntityKind::Users,
            id: EntityId(1),
        }];
        assert!(NullDataStore.persist(&changes).await.is_ok());
        assert!(NullDataStore.load_all().await.unwrap().is_empty());
    }

    #[test]
    fn is_null_returns_true() {
        assert!(NullDataStore.is_null());
    }
}
