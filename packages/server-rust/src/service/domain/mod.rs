//! Domain services: users, accounts, transfers.
//!
//! Each service is protocol-agnostic and enforces its own business
//! invariants against a [`DomainContext`]. Services never open, commit or
//! roll back a scope; they only stage reads and writes on the scope's
//! transaction.

mod accounts;
mod transfers;
mod users;

pub use accounts::AccountsService;
pub use transfers::TransfersService;
pub use users::UsersService;

use async_trait::async_trait;
use twinport_core::{
    DomainError, DomainRequest, Entity, EntityId, EntityKind, EntitySchema, OperationResult,
    SchemaSnapshot, Value,
};

use crate::storage::Transaction;

// ---------------------------------------------------------------------------
// DomainHandler trait
// ---------------------------------------------------------------------------

/// A domain service routed by name.
#[async_trait]
pub trait DomainHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(
        &self,
        ctx: &mut DomainContext<'_>,
        request: DomainRequest,
    ) -> Result<OperationResult, DomainError>;
}

// ---------------------------------------------------------------------------
// DomainContext
// ---------------------------------------------------------------------------

/// Typed access to the scope's transaction, projected through the active
/// schema.
pub struct DomainContext<'a> {
    txn: &'a mut Transaction,
    schema: &'a SchemaSnapshot,
    now: i64,
}

impl<'a> DomainContext<'a> {
    #[must_use]
    pub fn new(txn: &'a mut Transaction, schema: &'a SchemaSnapshot, now: i64) -> Self {
        Self { txn, schema, now }
    }

    #[must_use]
    pub fn schema(&self) -> &SchemaSnapshot {
        self.schema
    }

    /// Timestamp stamped on rows created or changed by this scope.
    #[must_use]
    pub fn now(&self) -> i64 {
        self.now
    }

    fn entity_schema(&self, kind: EntityKind) -> Result<&'a EntitySchema, DomainError> {
        self.schema.entity(kind).ok_or_else(|| {
            DomainError::SchemaMismatch(format!(
                "{kind} is not part of schema {}",
                self.schema.version
            ))
        })
    }

    /// # Errors
    ///
    /// Returns `SchemaMismatch` if the active schema lacks `kind`.
    pub fn find(&mut self, kind: EntityKind, id: EntityId) -> Result<Option<Entity>, DomainError> {
        let schema = self.entity_schema(kind)?;
        Ok(self.txn.get(kind, id).map(|e| e.projected(schema)))
    }

    /// # Errors
    ///
    /// Returns `NotFound` if the row does not exist.
    pub fn get(&mut self, kind: EntityKind, id: EntityId) -> Result<Entity, DomainError> {
        self.find(kind, id)?
            .ok_or_else(|| DomainError::not_found(kind, id))
    }

    /// Rows of `ids` that exist, in request order. Duplicates are kept once.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` if the active schema lacks `kind`.
    pub fn get_many(&mut self, kind: EntityKind, ids: &[EntityId]) -> Result<Vec<Entity>, DomainError> {
        let mut seen = std::collections::BTreeSet::new();
        let mut rows = Vec::with_capacity(ids.len());
        for &id in ids {
            if seen.insert(id) {
                if let Some(row) = self.find(kind, id)? {
                    rows.push(row);
                }
            }
        }
        Ok(rows)
    }

    /// All visible rows of `kind`, in id order.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` if the active schema lacks `kind`.
    pub fn scan(&mut self, kind: EntityKind) -> Result<Vec<Entity>, DomainError> {
        let schema = self.entity_schema(kind)?;
        Ok(self
            .txn
            .scan(kind)
            .into_iter()
            .map(|e| e.projected(schema))
            .collect())
    }

    /// Stages a new row.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` or `ValidationFailed` if `fields` do not fit
    /// the active schema.
    pub fn insert(
        &mut self,
        kind: EntityKind,
        fields: Vec<(&str, Value)>,
    ) -> Result<Entity, DomainError> {
        let schema = self.entity_schema(kind)?;
        let fields = schema.conform(
            fields
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )?;
        let id = self.txn.insert(kind, fields.clone(), self.schema.version);
        Ok(Entity {
            kind,
            id,
            schema_version: self.schema.version,
            revision: 0,
            fields,
        })
    }

    /// Stages `changes` on top of `entity`. The row is re-tagged with the
    /// active schema version.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` or `ValidationFailed` if the result does not
    /// fit the active schema.
    pub fn update(
        &mut self,
        entity: Entity,
        changes: Vec<(&str, Value)>,
    ) -> Result<Entity, DomainError> {
        let schema = self.entity_schema(entity.kind)?;
        let mut fields = entity.fields;
        for (k, v) in changes {
            fields.insert(k.to_string(), v);
        }
        let updated = Entity {
            fields: schema.conform(fields)?,
            schema_version: self.schema.version,
            ..entity
        };
        self.txn.update(updated.clone());
        Ok(updated)
    }

    pub fn delete(&mut self, entity: &Entity) {
        self.txn.delete(entity);
    }
}

// ---------------------------------------------------------------------------
// Shared validation
// ---------------------------------------------------------------------------

/// Trimmed, non-empty text.
pub(crate) fn require_text(field: &str, value: &str) -> Result<String, DomainError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::invalid(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

/// Syntactic email check: one `@`, non-empty local part, dotted domain,
/// no whitespace.
pub(crate) fn require_email(value: &str) -> Result<String, DomainError> {
    let email = value.trim();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(DomainError::invalid(format!("{email:?} is not a valid email")));
    }
    Ok(email.to_string())
}

fn unexpected(service: &str, request: &DomainRequest) -> DomainError {
    DomainError::internal(format!(
        "{service} cannot handle {}",
        request.operation_name()
    ))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use twinport_core::{baseline_migrations, SchemaHistory};

    use super::*;
    use crate::storage::datastores::NullDataStore;
    use crate::storage::{IsolationLevel, Store};

    /// Store plus baseline schema for exercising services directly.
    pub(crate) struct Fixture {
        pub store: Arc<Store>,
        pub history: SchemaHistory,
    }

    impl Fixture {
        pub(crate) fn new() -> Self {
            Self {
                store: Arc::new(Store::new(Arc::new(NullDataStore))),
                history: SchemaHistory::from_migrations(&baseline_migrations()).unwrap(),
            }
        }

        pub(crate) fn txn(&self) -> Transaction {
            Transaction::begin(Arc::clone(&self.store), IsolationLevel::Snapshot)
        }

        pub(crate) fn ctx<'a>(&'a self, txn: &'a mut Transaction) -> DomainContext<'a> {
            DomainContext::new(txn, self.history.latest(), 1_700_000_000_000)
        }

        /// Runs `request` in a fresh transaction and commits it.
        pub(crate) async fn run(
            &self,
            service: &dyn DomainHandler,
            request: DomainRequest,
        ) -> Result<OperationResult, DomainError> {
            let mut txn = self.txn();
            let out = {
                let mut ctx = self.ctx(&mut txn);
                service.handle(&mut ctx, request).await
            }?;
            self.store.commit(txn.into_batch()).await.unwrap();
            Ok(out)
        }
    }
}
