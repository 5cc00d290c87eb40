//! Embedded-file persistence on `redb`.
//!
//! One table per entity kind keyed by id, values are `MsgPack` encoded
//! entities. The migration ledger lives in the same file so that a data
//! directory is self-describing.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use tracing::info;
use twinport_core::{baseline_migrations, Entity, EntityKind, Migration};

use crate::traits::{DataStore, MigrationLedger, RowChange};

const USERS: TableDefinition<u64, &[u8]> = TableDefinition::new("users");
const ACCOUNTS: TableDefinition<u64, &[u8]> = TableDefinition::new("accounts");
const TRANSFERS: TableDefinition<u64, &[u8]> = TableDefinition::new("transfers");
const MIGRATIONS: TableDefinition<u32, &[u8]> = TableDefinition::new("schema_migrations");

fn table_for(kind: EntityKind) -> TableDefinition<'static, u64, &'static [u8]> {
    match kind {
        EntityKind::Users => USERS,
        EntityKind::Accounts => ACCOUNTS,
        EntityKind::Transfers => TRANSFERS,
    }
}

/// Write-through `DataStore` backed by a `redb` file.
pub struct RedbDataStore {
    db: Arc<Database>,
}

impl RedbDataStore {
    /// Opens (or creates) the database file and makes sure every table
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or is not a `redb`
    /// database.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let db = Database::create(path.as_ref())?;
        let txn = db.begin_write()?;
        for kind in EntityKind::ALL {
            txn.open_table(table_for(kind))?;
        }
        txn.open_table(MIGRATIONS)?;
        txn.commit()?;
        info!(path = %path.as_ref().display(), "opened redb data store");
        Ok(Self { db: Arc::new(db) })
    }

    /// Ledger stored in the same database file.
    #[must_use]
    pub fn ledger(&self) -> RedbLedger {
        RedbLedger {
            db: Arc::clone(&self.db),
        }
    }
}

#[async_trait]
impl DataStore for RedbDataStore {
    async fn load_all(&self) -> anyhow::Result<Vec<Entity>> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<Entity>> {
            let txn = db.begin_read()?;
            let mut rows = Vec::new();
            for kind in EntityKind::ALL {
                let table = txn.open_table(table_for(kind))?;
                for item in table.iter()? {
                    let (_, value) = item?;
                    rows.push(rmp_serde::from_slice::<Entity>(value.value())?);
                }
            }
            Ok(rows)
        })
        .await?
    }

    async fn persist(&self, changes: &[RowChange]) -> anyhow::Result<()> {
        let encoded = changes
            .iter()
            .map(|change| match change {
                RowChange::Put(entity) => Ok((
                    entity.kind,
                    entity.id.0,
                    Some(rmp_serde::to_vec_named(entity)?),
                )),
                RowChange::Delete { kind, id } => Ok((*kind, id.0, None)),
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let txn = db.begin_write()?;
            for (kind, id, bytes) in &encoded {
                let mut table = txn.open_table(table_for(*kind))?;
                match bytes {
                    Some(bytes) => {
                        table.insert(*id, bytes.as_slice())?;
                    }
                    None => {
                        table.remove(*id)?;
                    }
                }
            }
            txn.commit()?;
            Ok(())
        })
        .await?
    }

    async fn close(&self) -> anyhow::Result<()> {
        // redb flushes on every commit; nothing is buffered here.
        Ok(())
    }
}

/// Migration ledger in the `schema_migrations` table.
#[derive(Clone)]
pub struct RedbLedger {
    db: Arc<Database>,
}

impl RedbLedger {
    /// Writes the baseline migrations if the ledger is empty. Returns
    /// whether anything was written.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn seed_baseline(&self) -> anyhow::Result<bool> {
        if !self.applied().await?.is_empty() {
            return Ok(false);
        }
        for migration in baseline_migrations() {
            self.record(migration).await?;
        }
        info!("seeded migration ledger with baseline");
        Ok(true)
    }

    /// Appends a migration the way the migration runner does.
    ///
    /// # Errors
    ///
    /// Returns an error if the version is already recorded or on database
    /// failure.
    pub async fn record(&self, migration: Migration) -> anyhow::Result<()> {
        let bytes = rmp_serde::to_vec_named(&migration)?;
        let version = migration.version.0;
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(MIGRATIONS)?;
                anyhow::ensure!(
                    table.get(version)?.is_none(),
                    "migration v{version} already recorded"
                );
                table.insert(version, bytes.as_slice())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await?
    }
}

#[async_trait]
impl MigrationLedger for RedbLedger {
    async fn applied(&self) -> anyhow::Result<Vec<Migration>> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<Migration>> {
            let txn = db.begin_read()?;
            let table = txn.open_table(MIGRATIONS)?;
            let mut migrations = Vec::new();
            for item in table.iter()? {
                let (_, value) = item?;
                migrations.push(rmp_serde::from_slice::<Migration>(value.value())?);
            }
            Ok(migrations)
        })
        .await?
    }
}
