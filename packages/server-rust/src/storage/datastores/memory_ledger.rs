use async_trait::async_trait;
use parking_lot::RwLock;
use twinport_core::{baseline_migrations, Migration};

use crate::traits::MigrationLedger;

/// In-process migration ledger.
///
/// `record` stands in for the external migration runner: it appends a
/// migration the way the runner would append a row to its ledger table.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    migrations: RwLock<Vec<Migration>>,
}

impl MemoryLedger {
    #[must_use]
    pub fn new(migrations: Vec<Migration>) -> Self {
        Self {
            migrations: RwLock::new(migrations),
        }
    }

    /// Ledger holding the baseline migrations.
    #[must_use]
    pub fn baseline() -> Self {
        Self::new(baseline_migrations())
    }

    /// Appends an applied migration.
    ///
    /// # Errors
    ///
    /// Returns an error if `migration` does not follow the last recorded
    /// version.
    pub fn record(&self, migration: Migration) -> anyhow::Result<()> {
        let mut migrations = self.migrations.write();
        if let Some(last) = migrations.last() {
            anyhow::ensure!(
                migration.version > last.version,
                "migration {} does not follow {}",
                migration.version,
                last.version
            );
        }
        migrations.push(migration);
        Ok(())
    }
}

#[async_trait]
impl MigrationLedger for MemoryLedger {
    async fn applied(&self) -> anyhow::Result<Vec<Migration>> {
        Ok(self.migrations.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use twinport_core::SchemaVersion;

    fn bump(version: u32) -> Migration {
        Migration {
            version: SchemaVersion(version),
            description: "noop".to_string(),
            changes: Vec::new(),
        }
    }

    #[tokio::test]
    async fn baseline_is_applied() {
        let ledger = MemoryLedger::baseline();
        let applied = ledger.applied().await.unwrap();
        assert_eq!(applied.last().unwrap().version, SchemaVersion(2));
    }

    #[tokio::test]
    async fn record_requires_increasing_versions() {
        let ledger = MemoryLedger::baseline();
        assert!(ledger.record(bump(2)).is_err());
        ledger.record(bump(3)).unwrap();
        assert_eq!(ledger.applied().await.unwrap().len(), 3);
    }
}
