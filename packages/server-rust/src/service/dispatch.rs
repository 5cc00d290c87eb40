//! The single entry point for all domain work.
//!
//! Every operation, whichever protocol it arrived on, runs through
//! [`Dispatcher`]: open a scope, check the caller's schema assumptions,
//! run the work, re-check the schema, commit. Any failure rolls the scope
//! back exactly once.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower::Service;
use tracing::debug;
use twinport_core::{Access, ClockSource, DomainError, SchemaVersion};

use super::coordinator::{ScopeHandle, TransactionCoordinator};
use super::operation::{Operation, OperationContext, OperationError, Work};
use super::router::DomainRouter;
use super::session::DomainSession;
use crate::schema::SchemaRegistry;
use crate::storage::PreCommitCheck;

/// Runs operations inside transaction scopes.
///
/// Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct Dispatcher {
    schema: Arc<SchemaRegistry>,
    coordinator: Arc<TransactionCoordinator>,
    router: Arc<DomainRouter>,
    clock: Arc<dyn ClockSource>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        schema: Arc<SchemaRegistry>,
        coordinator: Arc<TransactionCoordinator>,
        router: Arc<DomainRouter>,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        Self {
            schema,
            coordinator,
            router,
            clock,
        }
    }

    #[must_use]
    pub fn coordinator(&self) -> &Arc<TransactionCoordinator> {
        &self.coordinator
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<SchemaRegistry> {
        &self.schema
    }

    /// Executes `op` in its own scope.
    ///
    /// # Errors
    ///
    /// - `SchemaMismatch` if the work references a field that is gone or
    ///   retyped, or the schema moved while the work ran
    /// - `ConflictingWrite` if a concurrent scope committed first
    /// - any domain failure raised by the work
    pub async fn dispatch<W: Work>(&self, op: Operation<W>) -> Result<W::Output, DomainError> {
        let Operation { ctx, work } = op;
        let write = work.access() == Access::Write;
        let mut scope = self.coordinator.begin(ctx.call_id)?;

        let (output, active) = match self.run(&ctx, work, &mut scope).await {
            Ok(done) => done,
            Err(e) => {
                debug!(call_id = ctx.call_id, op = ctx.name, error = %e, "operation failed; rolling back");
                self.coordinator.rollback(scope);
                return Err(e);
            }
        };

        let check = write.then(|| self.schema_unchanged(active, ctx.name));
        ctx.commit.mark();
        self.coordinator.commit_checked(scope, check).await?;
        Ok(output)
    }

    /// Re-reads the ledger under the store's commit lock and refuses the
    /// commit if the active version moved while the work ran. The external
    /// migration runner does not take that lock, so a migration recorded
    /// after this read is caught by the next write rather than this one.
    fn schema_unchanged(&self, active: SchemaVersion, name: &'static str) -> PreCommitCheck {
        let schema = Arc::clone(&self.schema);
        Box::pin(async move {
            let latest = schema.refresh().await?.latest().version;
            if latest == active {
                Ok(())
            } else {
                Err(DomainError::SchemaMismatch(format!(
                    "schema moved from {active} to {latest} during {name}"
                )))
            }
        })
    }

    async fn run<W: Work>(
        &self,
        ctx: &OperationContext,
        work: W,
        scope: &mut ScopeHandle,
    ) -> Result<(W::Output, SchemaVersion), DomainError> {
        let history = match work.access() {
            Access::Write => {
                let history = self.schema.refresh().await?;
                history.check_write(ctx.assumed_version, &work.written_fields())?;
                history
            }
            Access::Read => self.schema.cached()?,
        };
        let active = Arc::clone(history.latest());
        let now = self.clock.now_millis();

        let mut session =
            DomainSession::new(&self.router, scope.transaction_mut()?, &active, now);
        let output = work.run(&mut session).await?;
        debug!(call_id = ctx.call_id, calls = session.calls(), "work finished");
        Ok((output, active.version))
    }
}

impl<W: Work> Service<Operation<W>> for Dispatcher {
    type Response = W::Output;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<W::Output, OperationError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, op: Operation<W>) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { this.dispatch(op).await.map_err(OperationError::from) })
    }
}
