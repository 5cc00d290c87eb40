//! Load-shedding middleware.
//!
//! Rejects operations with `OperationError::Overloaded` when
//! `max_concurrent_operations` are already in flight, instead of queueing.

use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::Semaphore;
use tower::{Layer, Service};

use super::OperationFuture;
use crate::service::operation::{Operation, OperationError, Work};

/// Shares one semaphore between every service it wraps, so both adapters
/// draw from the same budget.
#[derive(Debug, Clone)]
pub struct LoadShedLayer {
    semaphore: Arc<Semaphore>,
}

impl LoadShedLayer {
    #[must_use]
    pub fn new(max_concurrent: u32) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent as usize)),
        }
    }

    /// Permits currently free.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl<S> Layer<S> for LoadShedLayer {
    type Service = LoadShedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadShedService {
            inner,
            semaphore: Arc::clone(&self.semaphore),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadShedService<S> {
    inner: S,
    semaphore: Arc<Semaphore>,
}

impl<S, W> Service<Operation<W>> for LoadShedService<S>
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
        let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
            metrics::counter!("twinport_operations_shed_total").increment(1);
            return Box::pin(async { Err(OperationError::Overloaded) });
        };

        let fut = self.inner.call(op);
        Box::pin(async move {
            let result = fut.await;
            drop(permit);
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tower::ServiceExt;

    use super::super::testing::{op, Sleeper};
    use super::*;

    #[tokio::test]
    async fn passes_under_limit() {
        let svc = LoadShedLayer::new(4).layer(Sleeper {
            delay: Duration::from_millis(1),
        });
        assert_eq!(svc.oneshot(op(7, 1_000)).await.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn sheds_when_saturated_and_recovers() {
        let layer = LoadShedLayer::new(1);
        let slow = layer.clone().layer(Sleeper {
            delay: Duration::from_secs(5),
        });
        let in_flight = tokio::spawn(slow.oneshot(op(1, 60_000)));
        tokio::task::yield_now().await;
        assert_eq!(layer.available(), 0);

        let fast = layer.clone().layer(Sleeper {
            delay: Duration::ZERO,
        });
        let err = fast.clone().oneshot(op(2, 60_000)).await.unwrap_err();
        assert!(matches!(err, OperationError::Overloaded));

        assert_eq!(in_flight.await.unwrap().unwrap(), 1);
        assert_eq!(layer.available(), 1);
        assert_eq!(fast.oneshot(op(3, 60_000)).await.unwrap(), 3);
    }
}
