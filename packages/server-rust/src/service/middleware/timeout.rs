//! Per-operation timeout.
//!
//! The deadline comes from each operation's `call_timeout_ms`. When it
//! fires before the scope is handed to the coordinator, the inner future is
//! dropped and the scope rolls back. Once the operation's [`CommitFence`]
//! is marked the commit is already under way on its own task, so the layer
//! waits for that result and reports it instead of a timeout.
//!
//! [`CommitFence`]: crate::service::operation::CommitFence

use std::task::{Context, Poll};
use std::time::Duration;

use tower::{Layer, Service};
use tracing::debug;

use super::OperationFuture;
use crate::service::operation::{Operation, OperationError, Work};

#[derive(Debug, Clone, Copy)]
pub struct TimeoutLayer;

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
}

impl<S, W> Service<Operation<W>> for TimeoutService<S>
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
        let timeout_ms = op.ctx.call_timeout_ms;
        let call_id = op.ctx.call_id;
        let fence = op.ctx.commit.clone();
        let fut = self.inner.call(op);
        Box::pin(async move {
            let mut fut = std::pin::pin!(fut);
            match tokio::time::timeout(Duration::from_millis(timeout_ms), fut.as_mut()).await {
                Ok(result) => result,
                Err(_) if fence.is_committing() => {
                    debug!(call_id, timeout_ms, "deadline passed mid-commit; awaiting outcome");
                    fut.await
                }
                Err(_) => Err(OperationError::Timeout { timeout_ms }),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use tower::ServiceExt;
    use twinport_core::DomainRequest;

    use super::super::testing::{op, Sleeper};
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn completes_within_deadline() {
        let svc = TimeoutLayer.layer(Sleeper {
            delay: Duration::from_millis(10),
        });
        assert_eq!(svc.oneshot(op(1, 1_000)).await.unwrap(), 1);
    }

    /// Marks the commit fence at once, then takes `delay` to finish.
    #[derive(Clone)]
    struct SlowCommit {
        delay: Duration,
    }

    impl Service<Operation<DomainRequest>> for SlowCommit {
        type Response = u64;
        type Error = OperationError;
        type Future = OperationFuture<u64>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, op: Operation<DomainRequest>) -> Self::Future {
            let delay = self.delay;
            Box::pin(async move {
                op.ctx.commit.mark();
                tokio::time::sleep(delay).await;
                Ok(op.ctx.call_id)
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn started_commit_outlives_the_deadline() {
        let svc = TimeoutLayer.layer(SlowCommit {
            delay: Duration::from_millis(200),
        });
        assert_eq!(svc.oneshot(op(3, 50)).await.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_from_context() {
        let svc = TimeoutLayer.layer(Sleeper {
            delay: Duration::from_millis(200),
        });
        let err = svc.oneshot(op(1, 50)).await.unwrap_err();
        assert!(matches!(err, OperationError::Timeout { timeout_ms: 50 }));
        assert_eq!(err.outcome(), "TIMEOUT");
    }
}
