use async_trait::async_trait;
use twinport_core::{Entity, EntityId, EntityKind, Migration};

/// One row change in a committed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowChange {
    Put(Entity),
    Delete { kind: EntityKind, id: EntityId },
}

/// Pluggable persistence backend behind the in-memory store.
/// Implementations: redb (embedded file), null (memory only, tests).
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Load every persisted row. Called once at startup.
    async fn load_all(&self) -> anyhow::Result<Vec<Entity>>;

    /// Persist one committed batch atomically: either every change lands or
    /// none does.
    async fn persist(&self, changes: &[RowChange]) -> anyhow::Result<()>;

    /// Release resources and close files.
    async fn close(&self) -> anyhow::Result<()>;

    /// Whether this is a null (no-op) implementation.
    fn is_null(&self) -> bool {
        false
    }
}

/// Read side of the migration ledger maintained by the external migration
/// runner.
#[async_trait]
pub trait MigrationLedger: Send + Sync {
    /// All applied migrations, oldest first.
    async fn applied(&self) -> anyhow::Result<Vec<Migration>>;
}
