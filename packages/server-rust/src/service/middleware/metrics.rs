//! Operation span plus counters and latency histogram.
//!
//! Every operation gets an `operation` span carrying its call id, name and
//! origin. On completion it increments `twinport_operations_total` and
//! records `twinport_operation_duration_seconds`, labelled by operation,
//! origin and outcome.

use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use super::OperationFuture;
use crate::service::operation::{Operation, OperationError, Work};

#[derive(Debug, Clone, Copy)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S, W> Service<Operation<W>> for MetricsService<S>
where
    W: Work,
    S: Service<Operation<W>, Error = OperationError> + Send,
    S::Response: Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = OperationError;
    type Future = OperationFuture<S::Response>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, op: Operation<W>) -> Self::Future {
        let call_id = op.ctx.call_id;
        let name = op.ctx.name;
        let origin = op.ctx.origin.as_str();

        let span = info_span!(
            "operation",
            call_id,
            op = name,
            origin,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(op);
        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();

                let outcome = match &result {
                    Ok(_) => "OK",
                    Err(e) => e.outcome(),
                };
                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;
                let span = tracing::Span::current();
                span.record("duration_ms", duration_ms);
                span.record("outcome", outcome);

                metrics::counter!(
                    "twinport_operations_total",
                    "op" => name,
                    "origin" => origin,
                    "outcome" => outcome
                )
                .increment(1);
                metrics::histogram!(
                    "twinport_operation_duration_seconds",
                    "op" => name,
                    "origin" => origin
                )
                .record(elapsed.as_secs_f64());

                match &result {
                    Ok(_) => tracing::debug!(duration_ms, "operation complete"),
                    Err(e) if outcome == "INTERNAL" => {
                        tracing::error!(duration_ms, error = %e, "operation failed");
                    }
                    Err(e) => tracing::info!(duration_ms, outcome, error = %e, "operation failed"),
                }
                result
            }
            .instrument(span),
        )
    }
}
