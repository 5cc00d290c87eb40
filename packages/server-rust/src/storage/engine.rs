//! In-memory versioned store with optimistic commit validation.
//!
//! Committed state is an immutable [`Tables`] value published through
//! `ArcSwap`: readers load a snapshot without locking, and each commit
//! builds the next value (cloning only the tables it touches) before
//! swapping it in. Commits are serialized by one async mutex; that mutex
//! is the engine's isolation mechanism and nothing outside this module
//! holds a lock across a suspension point.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tracing::{debug, info};
use twinport_core::{DomainError, Entity, EntityId, EntityKind, Value};

use crate::service::registry::{ManagedService, ServiceContext};
use crate::traits::{DataStore, RowChange};

/// Rows of one entity kind, keyed by id.
pub type Table = BTreeMap<EntityId, Entity>;

/// Committed state: one shared table per kind.
pub type Tables = BTreeMap<EntityKind, Arc<Table>>;

/// Key of a row across all tables.
pub type RowKey = (EntityKind, EntityId);

/// Condition evaluated under the commit lock, before validation. An error
/// refuses the batch.
pub type PreCommitCheck = Pin<Box<dyn Future<Output = Result<(), DomainError>> + Send>>;

/// A staged change with the revision it was based on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingWrite {
    /// Insert (`base_revision == None`) or update.
    Put {
        entity: Entity,
        base_revision: Option<u64>,
    },
    Delete { base_revision: u64 },
}

impl PendingWrite {
    #[must_use]
    pub fn base_revision(&self) -> Option<u64> {
        match self {
            Self::Put { base_revision, .. } => *base_revision,
            Self::Delete { base_revision } => Some(*base_revision),
        }
    }
}

/// Everything a transaction hands to [`Store::commit`].
#[derive(Debug, Default)]
pub struct CommitBatch {
    pub writes: BTreeMap<RowKey, PendingWrite>,
    /// Revisions observed by point reads (`None` = row was absent).
    pub reads: BTreeMap<RowKey, Option<u64>>,
    /// Tables read by scans, with the table version the scan saw.
    pub scanned: BTreeMap<EntityKind, Arc<Table>>,
    /// Validate `reads` and `scanned` as well as writes.
    pub validate_reads: bool,
}

impl CommitBatch {
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Why a commit was refused. Nothing is applied in any of these cases.
#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error("{kind} {id} changed since it was read")]
    Conflict { kind: EntityKind, id: EntityId },
    #[error("{kind} {id} violates unique key {key}")]
    Unique {
        kind: EntityKind,
        id: EntityId,
        key: &'static str,
    },
    #[error("persistence failed: {0}")]
    Persist(#[source] anyhow::Error),
    #[error("commit precondition failed: {0}")]
    Precondition(#[source] DomainError),
}

/// Summary of an applied commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOutcome {
    pub rows_written: usize,
}

/// Shared entity store.
pub struct Store {
    tables: ArcSwap<Tables>,
    sequences: BTreeMap<EntityKind, AtomicU64>,
    commit_lock: tokio::sync::Mutex<()>,
    data_store: Arc<dyn DataStore>,
}

impl Store {
    /// Creates an empty store writing through to `data_store`.
    #[must_use]
    pub fn new(data_store: Arc<dyn DataStore>) -> Self {
        let tables = EntityKind::ALL
            .iter()
            .map(|kind| (*kind, Arc::new(Table::new())))
            .collect();
        let sequences = EntityKind::ALL
            .iter()
            .map(|kind| (*kind, AtomicU64::new(1)))
            .collect();
        Self {
            tables: ArcSwap::from_pointee(tables),
            sequences,
            commit_lock: tokio::sync::Mutex::new(()),
            data_store,
        }
    }

    /// Loads every persisted row and resets id sequences past the highest
    /// id seen. Returns the number of rows loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing data store cannot be read.
    pub async fn load(&self) -> anyhow::Result<usize> {
        let _guard = self.commit_lock.lock().await;
        let rows = self.data_store.load_all().await?;
        let count = rows.len();

        let mut tables: BTreeMap<EntityKind, Table> =
            EntityKind::ALL.iter().map(|k| (*k, Table::new())).collect();
        for row in rows {
            if let Some(seq) = self.sequences.get(&row.kind) {
                seq.fetch_max(row.id.0 + 1, Ordering::SeqCst);
            }
            tables.entry(row.kind).or_default().insert(row.id, row);
        }

        self.tables.store(Arc::new(
            tables.into_iter().map(|(k, t)| (k, Arc::new(t))).collect(),
        ));
        Ok(count)
    }

    /// Current committed state.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Tables> {
        self.tables.load_full()
    }

    /// Allocates the next id for `kind`. Ids of rolled-back inserts are not
    /// reused.
    #[must_use]
    pub fn next_id(&self, kind: EntityKind) -> EntityId {
        let next = self
            .sequences
            .get(&kind)
            .map_or(0, |seq| seq.fetch_add(1, Ordering::SeqCst));
        EntityId(next)
    }

    /// Number of committed rows of `kind`.
    #[must_use]
    pub fn len(&self, kind: EntityKind) -> usize {
        self.tables.load().get(&kind).map_or(0, |t| t.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.load().values().all(|t| t.is_empty())
    }

    /// The persistence backend this store writes through to.
    #[must_use]
    pub fn data_store(&self) -> &Arc<dyn DataStore> {
        &self.data_store
    }

    /// Validates and applies a batch. First committer wins: a write whose
    /// base revision no longer matches the committed row is a conflict.
    ///
    /// # Errors
    ///
    /// Returns [`CommitError`] if validation fails or the data store refuses
    /// the batch; the published state is unchanged in every error case.
    pub async fn commit(&self, batch: CommitBatch) -> Result<CommitOutcome, CommitError> {
        self.commit_checked(batch, None).await
    }

    /// Like [`commit`](Self::commit), but first runs `check` while holding
    /// the commit lock, so no other commit of this store interleaves between
    /// the check and the publish. Read-only batches skip the check.
    ///
    /// # Errors
    ///
    /// As for `commit`, plus [`CommitError::Precondition`] when `check`
    /// fails.
    pub async fn commit_checked(
        &self,
        batch: CommitBatch,
        check: Option<PreCommitCheck>,
    ) -> Result<CommitOutcome, CommitError> {
        if batch.is_read_only() && !batch.validate_reads {
            return Ok(CommitOutcome { rows_written: 0 });
        }

        let _guard = self.commit_lock.lock().await;
        if let Some(check) = check {
            if !batch.is_read_only() {
                check.await.map_err(CommitError::Precondition)?;
            }
        }
        let current = self.tables.load_full();

        validate(&current, &batch)?;

        let mut next: Tables = (*current).clone();
        let mut changes = Vec::with_capacity(batch.writes.len());
        let mut touched = BTreeSet::new();

        for ((kind, id), write) in batch.writes {
            let table = Arc::make_mut(next.entry(kind).or_default());
            match write {
                PendingWrite::Put {
                    mut entity,
                    base_revision,
                } => {
                    entity.revision = base_revision.map_or(1, |r| r + 1);
                    changes.push(RowChange::Put(entity.clone()));
                    table.insert(id, entity);
                    touched.insert((kind, id));
                }
                PendingWrite::Delete { .. } => {
                    table.remove(&id);
                    changes.push(RowChange::Delete { kind, id });
                }
            }
        }

        check_unique(&next, &touched)?;

        if !changes.is_empty() {
            self.data_store
                .persist(&changes)
                .await
                .map_err(CommitError::Persist)?;
        }

        let rows_written = changes.len();
        self.tables.store(Arc::new(next));
        debug!(rows_written, "commit applied");
        Ok(CommitOutcome { rows_written })
    }
}

#[async_trait]
impl ManagedService for Store {
    fn name(&self) -> &'static str {
        "store"
    }

    async fn init(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        let rows = self.load().await?;
        info!(rows, persistent = !self.data_store.is_null(), "store loaded");
        Ok(())
    }

    async fn shutdown(&self, _terminate: bool) -> anyhow::Result<()> {
        self.data_store.close().await
    }
}

fn committed_revision(tables: &Tables, kind: EntityKind, id: EntityId) -> Option<u64> {
    tables
        .get(&kind)
        .and_then(|t| t.get(&id))
        .map(|e| e.revision)
}

fn validate(current: &Tables, batch: &CommitBatch) -> Result<(), CommitError> {
    for (&(kind, id), write) in &batch.writes {
        if committed_revision(current, kind, id) != write.base_revision() {
            return Err(CommitError::Conflict { kind, id });
        }
    }

    if batch.validate_reads {
        for (&(kind, id), seen) in &batch.reads {
            if committed_revision(current, kind, id) != *seen {
                return Err(CommitError::Conflict { kind, id });
            }
        }
        for (kind, seen) in &batch.scanned {
            let unchanged = current.get(kind).is_some_and(|now| Arc::ptr_eq(now, seen));
            if !unchanged {
                // Report the scan conflict against the table as a whole.
                return Err(CommitError::Conflict {
                    kind: *kind,
                    id: EntityId(0),
                });
            }
        }
    }
    Ok(())
}

fn check_unique(
    tables: &Tables,
    touched: &BTreeSet<(EntityKind, EntityId)>,
) -> Result<(), CommitError> {
    for &(kind, id) in touched {
        let Some(table) = tables.get(&kind) else {
            continue;
        };
        let Some(row) = table.get(&id) else {
            continue;
        };
        let (key, clash) = match kind {
            EntityKind::Users => (
                "users.email",
                table.values().any(|other| {
                    other.id != id && same_text(other.get("email"), row.get("email"))
                }),
            ),
            EntityKind::Accounts => (
                "accounts(user_id, name)",
                table.values().any(|other| {
                    other.id != id
                        && other.get("user_id") == row.get("user_id")
                        && other.get("name") == row.get("name")
                }),
            ),
            EntityKind::Transfers => continue,
        };
        if clash {
            return Err(CommitError::Unique { kind, id, key });
        }
    }
    Ok(())
}

fn same_text(a: &Value, b: &Value) -> bool {
    match (a.as_text(), b.as_text()) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    }
}
