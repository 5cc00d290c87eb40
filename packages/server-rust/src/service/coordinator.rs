//! Transaction scopes: begin, commit, rollback.
//!
//! Every externally visible request runs inside exactly one
//! [`ScopeHandle`]. A handle that is dropped without being committed or
//! rolled back (error path, cancelled future, timeout) rolls back in its
//! `Drop`. Once a commit starts it runs on its own tokio task, so dropping
//! the caller cannot leave a commit half-applied.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, warn};
use twinport_core::DomainError;

use crate::storage::{CommitError, IsolationLevel, PreCommitCheck, Store, Transaction};

/// Commit/rollback counters.
#[derive(Debug, Default)]
pub struct ScopeStats {
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

impl ScopeStats {
    #[must_use]
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::SeqCst)
    }

    fn committed(&self) {
        self.commits.fetch_add(1, Ordering::SeqCst);
        metrics::counter!("twinport_scope_commits_total").increment(1);
    }

    fn rolled_back(&self, reason: &'static str) {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        metrics::counter!("twinport_scope_rollbacks_total", "reason" => reason).increment(1);
    }
}

/// Owner of all transaction scopes.
pub struct TransactionCoordinator {
    store: Arc<Store>,
    isolation: IsolationLevel,
    open: Arc<DashMap<u64, ()>>,
    stats: Arc<ScopeStats>,
}

impl TransactionCoordinator {
    #[must_use]
    pub fn new(store: Arc<Store>, isolation: IsolationLevel) -> Self {
        Self {
            store,
            isolation,
            open: Arc::new(DashMap::new()),
            stats: Arc::new(ScopeStats::default()),
        }
    }

    #[must_use]
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    #[must_use]
    pub fn stats(&self) -> &ScopeStats {
        &self.stats
    }

    /// Number of scopes currently open.
    #[must_use]
    pub fn open_scopes(&self) -> usize {
        self.open.len()
    }

    /// Opens a scope for `call_id`.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if a scope for the same call is already open;
    /// scopes do not nest.
    pub fn begin(&self, call_id: u64) -> Result<ScopeHandle, DomainError> {
        match self.open.entry(call_id) {
            Entry::Occupied(_) => {
                return Err(DomainError::internal(format!(
                    "scope already open for call {call_id}"
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(());
            }
        }
        debug!(call_id, isolation = self.isolation.as_str(), "scope opened");
        Ok(ScopeHandle {
            call_id,
            txn: Some(Transaction::begin(Arc::clone(&self.store), self.isolation)),
            open: Arc::clone(&self.open),
            stats: Arc::clone(&self.stats),
        })
    }

    /// Commits the scope. The commit runs to completion even if the
    /// returned future is dropped.
    ///
    /// # Errors
    ///
    /// - `ConflictingWrite` if another scope committed a conflicting change
    ///   first (the scope is counted as rolled back)
    /// - `Internal` if persistence fails
    pub async fn commit(&self, scope: ScopeHandle) -> Result<(), DomainError> {
        self.commit_checked(scope, None).await
    }

    /// Commits the scope after `check` passes under the store's commit
    /// lock. A failed check is returned unchanged and counts as a rollback.
    ///
    /// # Errors
    ///
    /// As for [`commit`](Self::commit), plus the error raised by `check`.
    pub async fn commit_checked(
        &self,
        mut scope: ScopeHandle,
        check: Option<PreCommitCheck>,
    ) -> Result<(), DomainError> {
        let Some(txn) = scope.txn.take() else {
            return Err(DomainError::internal("scope already finished"));
        };
        let call_id = scope.call_id;
        let open = Arc::clone(&scope.open);
        let stats = Arc::clone(&scope.stats);
        let store = Arc::clone(txn.store());
        drop(scope);

        let task = {
            let open = Arc::clone(&open);
            let stats = Arc::clone(&stats);
            tokio::spawn(async move {
                let result = store.commit_checked(txn.into_batch(), check).await;
                open.remove(&call_id);
                match &result {
                    Ok(outcome) => {
                        stats.committed();
                        debug!(call_id, rows = outcome.rows_written, "scope committed");
                    }
                    Err(e) => {
                        stats.rolled_back("commit_failed");
                        debug!(call_id, error = %e, "commit refused; scope rolled back");
                    }
                }
                result
            })
        };

        match task.await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(commit_error(e)),
            Err(join) => {
                // The task died before its own bookkeeping; nothing was
                // published, since publishing is its last step.
                if open.remove(&call_id).is_some() {
                    stats.rolled_back("commit_panicked");
                }
                warn!(call_id, error = %join, "commit task failed");
                Err(DomainError::internal(format!("commit task failed: {join}")))
            }
        }
    }

    /// Discards the scope's staged writes.
    pub fn rollback(&self, scope: ScopeHandle) {
        drop(scope);
    }
}

fn commit_error(e: CommitError) -> DomainError {
    match e {
        CommitError::Conflict { kind, id } | CommitError::Unique { kind, id, .. } => {
            DomainError::ConflictingWrite { kind, id }
        }
        CommitError::Persist(e) => DomainError::internal(format!("{e:#}")),
        CommitError::Precondition(e) => e,
    }
}

/// One open transaction scope. Never shared across requests.
pub struct ScopeHandle {
    call_id: u64,
    txn: Option<Transaction>,
    open: Arc<DashMap<u64, ()>>,
    stats: Arc<ScopeStats>,
}

impl ScopeHandle {
    #[must_use]
    pub fn call_id(&self) -> u64 {
        self.call_id
    }

    /// The scope's transaction.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the scope has already finished.
    pub fn transaction_mut(&mut self) -> Result<&mut Transaction, DomainError> {
        self.txn
            .as_mut()
            .ok_or_else(|| DomainError::internal("scope already finished"))
    }
}

impl Drop for ScopeHandle {
    fn drop(&mut self) {
        // `txn` is taken by commit; anything still here was never committed.
        if self.txn.take().is_some() {
            self.open.remove(&self.call_id);
            self.stats.rolled_back("aborted");
            debug!(call_id = self.call_id, "scope rolled back");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::storage::datastores::testing::PanickingDataStore;
    use crate::storage::datastores::NullDataStore;
    use twinport_core::{EntityKind, ErrorKind, SchemaVersion, Value};

    fn coordinator() -> TransactionCoordinator {
        TransactionCoordinator::new(
            Arc::new(Store::new(Arc::new(NullDataStore))),
            IsolationLevel::Snapshot,
        )
    }

    fn stage_insert(scope: &mut ScopeHandle) {
        let mut fields = BTreeMap::new();
        fields.insert("amount".to_string(), Value::Int(1));
        scope
            .transaction_mut()
            .unwrap()
            .insert(EntityKind::Transfers, fields, SchemaVersion(2));
    }

    #[tokio::test]
    async fn commit_counts_once() {
        let coord = coordinator();
        let mut scope = coord.begin(1).unwrap();
        stage_insert(&mut scope);
        coord.commit(scope).await.unwrap();

        assert_eq!(coord.stats().commits(), 1);
        assert_eq!(coord.stats().rollbacks(), 0);
        assert_eq!(coord.open_scopes(), 0);
        assert_eq!(coord.store.len(EntityKind::Transfers), 1);
    }

    #[tokio::test]
    async fn explicit_and_implicit_rollback_discard_writes() {
        let coord = coordinator();

        let mut scope = coord.begin(1).unwrap();
        stage_insert(&mut scope);
        coord.rollback(scope);

        {
            let mut dropped = coord.begin(2).unwrap();
            stage_insert(&mut dropped);
        }

        assert_eq!(coord.stats().rollbacks(), 2);
        assert_eq!(coord.stats().commits(), 0);
        assert_eq!(coord.open_scopes(), 0);
        assert_eq!(coord.store.len(EntityKind::Transfers), 0);
    }

    #[tokio::test]
    async fn nested_begin_for_same_call_is_rejected() {
        let coord = coordinator();
        let _outer = coord.begin(7).unwrap();
        let err = coord.begin(7).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Internal);
        // A different call id is independent.
        assert!(coord.begin(8).is_ok());
    }

    #[tokio::test]
    async fn failed_precondition_counts_as_rollback() {
        let coord = coordinator();
        let mut scope = coord.begin(4).unwrap();
        stage_insert(&mut scope);
        let err = coord
            .commit_checked(
                scope,
                Some(Box::pin(async {
                    Err::<(), _>(DomainError::SchemaMismatch("moved".into()))
                })),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
        assert_eq!(coord.stats().commits(), 0);
        assert_eq!(coord.stats().rollbacks(), 1);
        assert_eq!(coord.store.len(EntityKind::Transfers), 0);
    }

    #[tokio::test]
    async fn panicking_commit_is_a_rollback() {
        let coord = TransactionCoordinator::new(
            Arc::new(Store::new(Arc::new(PanickingDataStore))),
            IsolationLevel::Snapshot,
        );
        let mut scope = coord.begin(5).unwrap();
        stage_insert(&mut scope);
        let err = coord.commit(scope).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(coord.open_scopes(), 0);
        assert_eq!(coord.stats().commits(), 0);
        assert_eq!(coord.stats().rollbacks(), 1);
        assert_eq!(coord.store.len(EntityKind::Transfers), 0);
        // The call id is free again.
        assert!(coord.begin(5).is_ok());
    }

    #[tokio::test]
    async fn call_id_is_reusable_after_finish() {
        let coord = coordinator();
        let scope = coord.begin(3).unwrap();
        coord.commit(scope).await.unwrap();
        assert!(coord.begin(3).is_ok());
    }
}
