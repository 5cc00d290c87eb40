//! Tower middleware layers for the operation pipeline.
//!
//! - [`load_shed`]: semaphore-based concurrency limiting
//! - [`timeout`]: per-operation timeout enforcement
//! - [`metrics`]: operation spans, counters and latency histograms
//! - [`pipeline`]: composes the layers around the dispatcher

use std::future::Future;
use std::pin::Pin;

use crate::service::operation::OperationError;

pub mod load_shed;
pub mod metrics;
pub mod pipeline;
pub mod timeout;

pub use load_shed::LoadShedLayer;
pub use metrics::MetricsLayer;
pub use pipeline::{build_operation_pipeline, OperationPipeline};
pub use timeout::TimeoutLayer;

/// Boxed future returned by every layer.
pub type OperationFuture<T> = Pin<Box<dyn Future<Output = Result<T, OperationError>> + Send>>;

#[cfg(test)]
pub(crate) mod testing {
    use std::task::{Context, Poll};
    use std::time::Duration;

    use tower::Service;
    use twinport_core::{DomainRequest, EntityId, ProtocolOrigin, BUILT_AGAINST};

    use super::OperationFuture;
    use crate::service::operation::{Operation, OperationContext, OperationError};

    /// Inner service that sleeps, then echoes the call id.
    #[derive(Clone)]
    pub(crate) struct Sleeper {
        pub delay: Duration,
    }

    impl Service<Operation<DomainRequest>> for Sleeper {
        type Response = u64;
        type Error = OperationError;
        type Future = OperationFuture<u64>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, op: Operation<DomainRequest>) -> Self::Future {
            let delay = self.delay;
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                Ok(op.ctx.call_id)
            })
        }
    }

    pub(crate) fn op(call_id: u64, timeout_ms: u64) -> Operation<DomainRequest> {
        Operation {
            ctx: OperationContext::new(
                call_id,
                "get_user",
                ProtocolOrigin::Rpc,
                BUILT_AGAINST,
                timeout_ms,
            ),
            work: DomainRequest::GetUser { id: EntityId(1) },
        }
    }
}
