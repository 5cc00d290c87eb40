//! Pipeline composition: the middleware stack around the dispatcher.

use std::sync::Arc;

use tower::{Service, ServiceBuilder, ServiceExt};
use twinport_core::{ProtocolOrigin, SchemaVersion};

use super::load_shed::LoadShedLayer;
use super::metrics::MetricsLayer;
use super::timeout::TimeoutLayer;
use super::OperationFuture;
use crate::service::classify::OperationService;
use crate::service::config::ServerConfig;
use crate::service::dispatch::Dispatcher;
use crate::service::operation::{Operation, OperationError, Work};

/// Wraps `dispatcher` with the operation middleware.
///
/// Layer order (outermost to innermost):
/// 1. `LoadShedLayer`: reject when overloaded before doing any work
/// 2. `TimeoutLayer`: per-operation deadline; a commit already under way
///    is awaited rather than abandoned
/// 3. `MetricsLayer`: span, timing and outcome, closest to dispatch
pub fn build_operation_pipeline<W: Work>(
    dispatcher: Dispatcher,
    load_shed: LoadShedLayer,
) -> impl Service<
    Operation<W>,
    Response = W::Output,
    Error = OperationError,
    Future = OperationFuture<W::Output>,
> + Send {
    ServiceBuilder::new()
        .layer(load_shed)
        .layer(TimeoutLayer)
        .layer(MetricsLayer)
        .service(dispatcher)
}

/// Entry point shared by every protocol adapter: classify, then run the
/// work through the middleware stack and dispatch.
#[derive(Clone)]
pub struct OperationPipeline {
    dispatcher: Dispatcher,
    classifier: Arc<OperationService>,
    load_shed: LoadShedLayer,
}

impl OperationPipeline {
    #[must_use]
    pub fn new(dispatcher: Dispatcher, config: Arc<ServerConfig>) -> Self {
        Self {
            load_shed: LoadShedLayer::new(config.max_concurrent_operations),
            classifier: Arc::new(OperationService::new(config)),
            dispatcher,
        }
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Classifies and executes `work`.
    ///
    /// # Errors
    ///
    /// Returns the dispatch failure, or `Overloaded` / `Timeout` from the
    /// middleware.
    pub async fn submit<W: Work>(
        &self,
        origin: ProtocolOrigin,
        assumed_version: Option<SchemaVersion>,
        work: W,
    ) -> Result<W::Output, OperationError> {
        let op = self.classifier.classify(origin, assumed_version, work);
        self.execute(op).await
    }

    /// Executes an already classified operation.
    ///
    /// # Errors
    ///
    /// See [`submit`](Self::submit).
    pub async fn execute<W: Work>(&self, op: Operation<W>) -> Result<W::Output, OperationError> {
        build_operation_pipeline(self.dispatcher.clone(), self.load_shed.clone())
            .oneshot(op)
            .await
    }
}
