use twinport_core::{DomainError, DomainRequest, OperationResult, SchemaSnapshot};

use super::domain::DomainContext;
use super::router::DomainRouter;
use crate::storage::Transaction;

/// Domain access granted to a unit of work for the lifetime of one scope.
///
/// Calls run in issue order against the scope's transaction. The session
/// cannot commit or roll back; only dispatch can.
pub struct DomainSession<'a> {
    router: &'a DomainRouter,
    ctx: DomainContext<'a>,
    calls: u32,
}

impl<'a> DomainSession<'a> {
    #[must_use]
    pub fn new(
        router: &'a DomainRouter,
        txn: &'a mut Transaction,
        schema: &'a SchemaSnapshot,
        now: i64,
    ) -> Self {
        Self {
            router,
            ctx: DomainContext::new(txn, schema, now),
            calls: 0,
        }
    }

    /// Runs one domain operation inside the scope.
    ///
    /// # Errors
    ///
    /// Returns the domain failure unchanged.
    pub async fn call(&mut self, request: DomainRequest) -> Result<OperationResult, DomainError> {
        self.calls += 1;
        self.router.handle(&mut self.ctx, request).await
    }

    /// Number of domain calls issued so far.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls
    }

    /// Active schema the session resolves against.
    #[must_use]
    pub fn schema(&self) -> &SchemaSnapshot {
        self.ctx.schema()
    }
}
