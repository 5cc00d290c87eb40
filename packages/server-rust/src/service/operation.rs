//! Operation types carried through the pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use twinport_core::{
    Access, DomainError, DomainRequest, FieldRef, OperationResult, ProtocolOrigin, SchemaVersion,
};

use super::session::DomainSession;

/// Set once an operation's scope has been handed to the coordinator for
/// commit. From then on the outcome is the commit's own, and a deadline
/// that passes must not replace it.
#[derive(Debug, Clone, Default)]
pub struct CommitFence(Arc<AtomicBool>);

impl CommitFence {
    pub fn mark(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_committing(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Context carried with every operation through the pipeline.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub call_id: u64,
    /// Operation name used in spans and metrics labels.
    pub name: &'static str,
    pub origin: ProtocolOrigin,
    /// Schema version the caller was built against.
    pub assumed_version: SchemaVersion,
    pub call_timeout_ms: u64,
    pub commit: CommitFence,
}

impl OperationContext {
    #[must_use]
    pub fn new(
        call_id: u64,
        name: &'static str,
        origin: ProtocolOrigin,
        assumed_version: SchemaVersion,
        call_timeout_ms: u64,
    ) -> Self {
        Self {
            call_id,
            name,
            origin,
            assumed_version,
            call_timeout_ms,
            commit: CommitFence::default(),
        }
    }
}

/// A unit of work executed inside exactly one transaction scope.
///
/// A single domain request is the common case; the graph adapter submits a
/// whole document as one unit so every field it resolves shares the scope.
#[async_trait]
pub trait Work: Send + 'static {
    type Output: Send + 'static;

    fn name(&self) -> &'static str;

    fn access(&self) -> Access;

    /// Fields the work may write, checked against the caller's assumed
    /// schema version before it runs.
    fn written_fields(&self) -> Vec<FieldRef>;

    async fn run(self, session: &mut DomainSession<'_>) -> Result<Self::Output, DomainError>;
}

#[async_trait]
impl Work for DomainRequest {
    type Output = OperationResult;

    fn name(&self) -> &'static str {
        self.operation_name()
    }

    fn access(&self) -> Access {
        DomainRequest::access(self)
    }

    fn written_fields(&self) -> Vec<FieldRef> {
        DomainRequest::written_fields(self)
    }

    async fn run(self, session: &mut DomainSession<'_>) -> Result<OperationResult, DomainError> {
        session.call(self).await
    }
}

/// A classified unit of work with its context.
#[derive(Debug)]
pub struct Operation<W> {
    pub ctx: OperationContext,
    pub work: W,
}

impl<W> Operation<W> {
    #[must_use]
    pub fn ctx(&self) -> &OperationContext {
        &self.ctx
    }
}

/// Failure of an operation anywhere in the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("server overloaded, try again later")]
    Overloaded,
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl OperationError {
    /// Label used for the `outcome` metric dimension.
    #[must_use]
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Domain(e) => e.kind().as_str(),
            Self::Timeout { .. } => "TIMEOUT",
            Self::Overloaded => "OVERLOADED",
            Self::Internal(_) => "INTERNAL",
        }
    }
}
