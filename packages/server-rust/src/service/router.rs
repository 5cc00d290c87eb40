//! Domain routing: dispatches a [`DomainRequest`] to its service by name.

use std::collections::HashMap;
use std::sync::Arc;

use twinport_core::{DomainError, DomainRequest, OperationResult};

use super::domain::{DomainContext, DomainHandler};

/// Routes requests to the domain service registered under
/// `DomainRequest::service_name()`.
#[derive(Default)]
pub struct DomainRouter {
    services: HashMap<&'static str, Arc<dyn DomainHandler>>,
}

impl DomainRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Router with the users, accounts and transfers services.
    #[must_use]
    pub fn with_default_services() -> Self {
        let mut router = Self::new();
        router.register(Arc::new(super::domain::UsersService));
        router.register(Arc::new(super::domain::AccountsService));
        router.register(Arc::new(super::domain::TransfersService));
        router
    }

    pub fn register(&mut self, service: Arc<dyn DomainHandler>) {
        self.services.insert(service.name(), service);
    }

    #[must_use]
    pub fn service_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.services.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// # Errors
    ///
    /// Returns `Internal` for a request whose service is not registered,
    /// otherwise whatever the service returns.
    pub async fn handle(
        &self,
        ctx: &mut DomainContext<'_>,
        request: DomainRequest,
    ) -> Result<OperationResult, DomainError> {
        let name = request.service_name();
        match self.services.get(name) {
            Some(service) => service.handle(ctx, request).await,
            None => Err(DomainError::internal(format!("unknown service: {name}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use twinport_core::{baseline_migrations, EntityId, EntityKind, ErrorKind, SchemaHistory};

    use super::*;
    use crate::storage::datastores::NullDataStore;
    use crate::storage::{IsolationLevel, Store, Transaction};

    struct Stub;

    #[async_trait]
    impl DomainHandler for Stub {
        fn name(&self) -> &'static str {
            "users"
        }

        async fn handle(
            &self,
            _ctx: &mut DomainContext<'_>,
            _request: DomainRequest,
        ) -> Result<OperationResult, DomainError> {
            Ok(OperationResult::Removed {
                kind: EntityKind::Users,
                id: EntityId(0),
            })
        }
    }

    fn txn() -> Transaction {
        Transaction::begin(
            Arc::new(Store::new(Arc::new(NullDataStore))),
            IsolationLevel::Snapshot,
        )
    }

    #[tokio::test]
    async fn routes_by_service_name() {
        let history = SchemaHistory::from_migrations(&baseline_migrations()).unwrap();
        let mut txn = txn();
        let mut ctx = DomainContext::new(&mut txn, history.latest(), 0);

        let mut router = DomainRouter::new();
        router.register(Arc::new(Stub));

        let out = router
            .handle(&mut ctx, DomainRequest::GetUser { id: EntityId(1) })
            .await
            .unwrap();
        assert!(matches!(out, OperationResult::Removed { .. }));

        let err = router
            .handle(&mut ctx, DomainRequest::GetAccount { id: EntityId(1) })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn default_services_cover_every_domain() {
        let router = DomainRouter::with_default_services();
        assert_eq!(router.service_names(), vec!["accounts", "transfers", "users"]);
    }
}
