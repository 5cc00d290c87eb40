//! Stamps incoming work with an [`OperationContext`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use twinport_core::{ProtocolOrigin, SchemaVersion, BUILT_AGAINST};

use super::config::ServerConfig;
use super::operation::{Operation, OperationContext, Work};

// ---------------------------------------------------------------------------
// OperationService
// ---------------------------------------------------------------------------

/// Turns adapter-built work into an [`Operation`].
///
/// Each call gets a process-unique call id and the configured timeout. A
/// caller that does not state its schema version is assumed to be built
/// against the same version as the protocol surfaces.
pub struct OperationService {
    config: Arc<ServerConfig>,
    call_id_counter: AtomicU64,
}

impl OperationService {
    #[must_use]
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            config,
            call_id_counter: AtomicU64::new(1),
        }
    }

    fn next_call_id(&self) -> u64 {
        self.call_id_counter.fetch_add(1, Ordering::Relaxed)
    }

    pub fn classify<W: Work>(
        &self,
        origin: ProtocolOrigin,
        assumed_version: Option<SchemaVersion>,
        work: W,
    ) -> Operation<W> {
        let ctx = OperationContext::new(
            self.next_call_id(),
            work.name(),
            origin,
            assumed_version.unwrap_or(BUILT_AGAINST),
            self.config.default_operation_timeout_ms,
        );
        Operation { ctx, work }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use twinport_core::{DomainRequest, EntityId};

    fn service() -> OperationService {
        OperationService::new(Arc::new(ServerConfig {
            default_operation_timeout_ms: 1234,
            ..ServerConfig::default()
        }))
    }

    #[test]
    fn call_ids_are_unique_and_increasing() {
        let svc = service();
        let a = svc.classify(ProtocolOrigin::Rpc, None, DomainRequest::GetUser { id: EntityId(1) });
        let b = svc.classify(ProtocolOrigin::Graph, None, DomainRequest::GetUser { id: EntityId(1) });
        assert!(b.ctx.call_id > a.ctx.call_id);
    }

    #[test]
    fn context_carries_origin_version_and_timeout() {
        let op = service().classify(
            ProtocolOrigin::Graph,
            Some(SchemaVersion(1)),
            DomainRequest::GetAccount { id: EntityId(4) },
        );
        assert_eq!(op.ctx.origin, ProtocolOrigin::Graph);
        assert_eq!(op.ctx.assumed_version, SchemaVersion(1));
        assert_eq!(op.ctx.call_timeout_ms, 1234);
        assert_eq!(op.ctx.name, "get_account");
    }

    #[test]
    fn missing_version_defaults_to_built_against() {
        let op = service().classify(
            ProtocolOrigin::Rpc,
            None,
            DomainRequest::GetTransfer { id: EntityId(9) },
        );
        assert_eq!(op.ctx.assumed_version, BUILT_AGAINST);
    }
}
