//! Per-scope transaction over the [`Store`].

use std::collections::BTreeMap;
use std::sync::Arc;

use twinport_core::{Entity, EntityId, EntityKind, SchemaVersion, Value};

use super::engine::{CommitBatch, PendingWrite, RowKey, Store, Table, Tables};

/// Isolation policy applied to every scope of a deployment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum IsolationLevel {
    /// Each read sees the latest committed state.
    ReadCommitted,
    /// All reads see the state as of `begin`.
    #[default]
    Snapshot,
    /// Snapshot reads, plus commit-time validation that nothing read
    /// has changed.
    Serializable,
}

impl IsolationLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadCommitted => "read-committed",
            Self::Snapshot => "snapshot",
            Self::Serializable => "serializable",
        }
    }
}

/// Private working state of one scope.
///
/// Writes are staged in a write set that only this transaction can see
/// (read-your-writes); nothing reaches the store until commit.
pub struct Transaction {
    store: Arc<Store>,
    isolation: IsolationLevel,
    snapshot: Arc<Tables>,
    writes: BTreeMap<RowKey, PendingWrite>,
    reads: BTreeMap<RowKey, Option<u64>>,
    scanned: BTreeMap<EntityKind, Arc<Table>>,
}

impl Transaction {
    #[must_use]
    pub fn begin(store: Arc<Store>, isolation: IsolationLevel) -> Self {
        let snapshot = store.snapshot();
        Self {
            store,
            isolation,
            snapshot,
            writes: BTreeMap::new(),
            reads: BTreeMap::new(),
            scanned: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    fn view(&self) -> Arc<Tables> {
        match self.isolation {
            IsolationLevel::ReadCommitted => self.store.snapshot(),
            IsolationLevel::Snapshot | IsolationLevel::Serializable => Arc::clone(&self.snapshot),
        }
    }

    /// Reads one row, preferring this transaction's own staged writes.
    pub fn get(&mut self, kind: EntityKind, id: EntityId) -> Option<Entity> {
        if let Some(write) = self.writes.get(&(kind, id)) {
            return match write {
                PendingWrite::Put { entity, .. } => Some(entity.clone()),
                PendingWrite::Delete { .. } => None,
            };
        }
        let row = self
            .view()
            .get(&kind)
            .and_then(|t| t.get(&id))
            .cloned();
        self.reads
            .entry((kind, id))
            .or_insert(row.as_ref().map(|e| e.revision));
        row
    }

    /// All visible rows of `kind`, in id order, with staged writes applied.
    pub fn scan(&mut self, kind: EntityKind) -> Vec<Entity> {
        let table = self.view().get(&kind).cloned().unwrap_or_default();
        let mut rows: BTreeMap<EntityId, Entity> = (*table).clone();
        self.scanned.entry(kind).or_insert(table);

        for (&(k, id), write) in &self.writes {
            if k != kind {
                continue;
            }
            match write {
                PendingWrite::Put { entity, .. } => {
                    rows.insert(id, entity.clone());
                }
                PendingWrite::Delete { .. } => {
                    rows.remove(&id);
                }
            }
        }
        rows.into_values().collect()
    }

    /// Stages a new row and returns its freshly allocated id.
    pub fn insert(
        &mut self,
        kind: EntityKind,
        fields: BTreeMap<String, Value>,
        schema_version: SchemaVersion,
    ) -> EntityId {
        let id = self.store.next_id(kind);
        let entity = Entity {
            kind,
            id,
            schema_version,
            revision: 0,
            fields,
        };
        self.writes.insert(
            (kind, id),
            PendingWrite::Put {
                entity,
                base_revision: None,
            },
        );
        id
    }

    /// Stages a new version of `entity`. The base revision is the one this
    /// transaction first observed for the row.
    pub fn update(&mut self, entity: Entity) {
        let key = (entity.kind, entity.id);
        let base_revision = match self.writes.get(&key) {
            Some(staged) => staged.base_revision(),
            None => Some(entity.revision),
        };
        self.writes.insert(
            key,
            PendingWrite::Put {
                entity,
                base_revision,
            },
        );
    }

    /// Stages removal of a row previously read by this transaction.
    pub fn delete(&mut self, entity: &Entity) {
        let key = (entity.kind, entity.id);
        match self.writes.get(&key).map(PendingWrite::base_revision) {
            // Inserted and deleted within the same scope: nothing to commit.
            Some(None) => {
                self.writes.remove(&key);
            }
            Some(Some(base_revision)) => {
                self.writes
                    .insert(key, PendingWrite::Delete { base_revision });
            }
            None => {
                self.writes.insert(
                    key,
                    PendingWrite::Delete {
                        base_revision: entity.revision,
                    },
                );
            }
        }
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.writes.is_empty()
    }

    #[must_use]
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Consumes the transaction into the batch submitted at commit.
    #[must_use]
    pub fn into_batch(self) -> CommitBatch {
        CommitBatch {
            writes: self.writes,
            reads: self.reads,
            scanned: self.scanned,
            validate_reads: self.isolation == IsolationLevel::Serializable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::datastores::NullDataStore;
    use crate::storage::CommitError;

    fn fields(name: &str) -> BTreeMap<String, Value> {
        let mut f = BTreeMap::new();
        f.insert("name".to_string(), Value::from(name));
        f
    }

    fn store() -> Arc<Store> {
        Arc::new(Store::new(Arc::new(NullDataStore)))
    }

    async fn seed(store: &Arc<Store>) -> EntityId {
        let mut txn = Transaction::begin(Arc::clone(store), IsolationLevel::Snapshot);
        let id = txn.insert(EntityKind::Transfers, fields("seed"), SchemaVersion(2));
        store.commit(txn.into_batch()).await.unwrap();
        id
    }

    #[tokio::test]
    async fn uncommitted_writes_are_private() {
        let store = store();
        let mut writer = Transaction::begin(Arc::clone(&store), IsolationLevel::ReadCommitted);
        let id = writer.insert(EntityKind::Transfers, fields("x"), SchemaVersion(2));

        let mut reader = Transaction::begin(Arc::clone(&store), IsolationLevel::ReadCommitted);
        assert!(reader.get(EntityKind::Transfers, id).is_none());
        assert!(writer.get(EntityKind::Transfers, id).is_some());
    }

    #[tokio::test]
    async fn snapshot_ignores_later_commits_read_committed_sees_them() {
        let store = store();
        let mut snap = Transaction::begin(Arc::clone(&store), IsolationLevel::Snapshot);
        let mut rc = Transaction::begin(Arc::clone(&store), IsolationLevel::ReadCommitted);

        seed(&store).await;

        assert!(snap.scan(EntityKind::Transfers).is_empty());
        assert_eq!(rc.scan(EntityKind::Transfers).len(), 1);
    }

    #[tokio::test]
    async fn concurrent_updates_first_committer_wins() {
        let store = store();
        let id = seed(&store).await;

        let mut a = Transaction::begin(Arc::clone(&store), IsolationLevel::Snapshot);
        let mut b = Transaction::begin(Arc::clone(&store), IsolationLevel::Snapshot);
        let mut row_a = a.get(EntityKind::Transfers, id).unwrap();
        let mut row_b = b.get(EntityKind::Transfers, id).unwrap();
        row_a.fields.insert("name".into(), Value::from("a"));
        row_b.fields.insert("name".into(), Value::from("b"));
        a.update(row_a);
        b.update(row_b);

        store.commit(a.into_batch()).await.unwrap();
        let err = store.commit(b.into_batch()).await.unwrap_err();
        assert!(matches!(err, CommitError::Conflict { .. }));

        let committed = store.snapshot()[&EntityKind::Transfers][&id].clone();
        assert_eq!(committed.get("name"), &Value::from("a"));
        assert_eq!(committed.revision, 2);
    }

    #[tokio::test]
    async fn insert_then_delete_in_one_scope_commits_nothing() {
        let store = store();
        let mut txn = Transaction::begin(Arc::clone(&store), IsolationLevel::Snapshot);
        let id = txn.insert(EntityKind::Transfers, fields("tmp"), SchemaVersion(2));
        let row = txn.get(EntityKind::Transfers, id).unwrap();
        txn.delete(&row);
        assert!(txn.is_read_only());
    }

    #[tokio::test]
    async fn serializable_read_of_changed_row_conflicts() {
        let store = store();
        let id = seed(&store).await;

        let mut reader = Transaction::begin(Arc::clone(&store), IsolationLevel::Serializable);
        let _ = reader.get(EntityKind::Transfers, id);
        reader.insert(EntityKind::Transfers, fields("derived"), SchemaVersion(2));

        let mut writer = Transaction::begin(Arc::clone(&store), IsolationLevel::Snapshot);
        let row = writer.get(EntityKind::Transfers, id).unwrap();
        writer.update(row);
        store.commit(writer.into_batch()).await.unwrap();

        assert!(store.commit(reader.into_batch()).await.is_err());
    }
}
