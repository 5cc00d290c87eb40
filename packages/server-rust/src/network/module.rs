//! Network module with deferred startup.
//!
//! `new()` allocates shared state, `start()` binds the listener and
//! `serve()` accepts requests until shutdown. Binding before serving lets
//! the caller learn the OS-assigned port first.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context as _;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::{
    graph_handler, health_handler, liveness_handler, readiness_handler, rpc_handler,
    schema_handler, AppState,
};
use super::middleware::{admission, build_http_layers};
use super::shutdown::ShutdownController;
use crate::graph::GraphAdapter;
use crate::rpc::RpcAdapter;

/// Owns the HTTP listener and the routes of both protocol surfaces.
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    state: AppState,
}

impl NetworkModule {
    #[must_use]
    pub fn new(config: NetworkConfig, rpc: Arc<RpcAdapter>, graph: Arc<GraphAdapter>) -> Self {
        let state = AppState::new(
            rpc,
            graph,
            Arc::new(ShutdownController::new()),
            Arc::new(config.clone()),
        );
        Self {
            config,
            listener: None,
            state,
        }
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.state.shutdown)
    }

    /// Routes:
    /// - `POST /rpc/{method}`: `MsgPack` RPC
    /// - `POST /graph`: graph queries and mutations
    /// - `GET /schema`: schema-version contract
    /// - `GET /health`, `/health/live`, `/health/ready`
    ///
    /// Only the API routes pass admission; probes keep answering while the
    /// server drains.
    pub fn build_router(&self) -> Router {
        let api = Router::new()
            .route("/rpc/{method}", post(rpc_handler))
            .route("/graph", post(graph_handler))
            .route("/schema", get(schema_handler))
            .route_layer(axum::middleware::from_fn_with_state(
                self.state.clone(),
                admission,
            ));

        Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .merge(api)
            .layer(DefaultBodyLimit::max(self.config.max_body_bytes))
            .layer(build_http_layers(&self.config))
            .with_state(self.state.clone())
    }

    /// Binds the listener and returns the bound port, which differs from
    /// the configured one when that is 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        let port = listener.local_addr()?.port();

        info!(host = %self.config.host, port, "listener bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves, then drains.
    ///
    /// After the signal: health moves to Draining (new API requests get
    /// 503), axum stops accepting connections and finishes open ones, and
    /// the drain waits up to `drain_timeout` for in-flight requests.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called or the server hits a
    /// fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .context("start() must be called before serve()")?;
        let router = self.build_router();
        let controller = self.shutdown_controller();

        controller.set_ready();
        info!("serving rpc and graph surfaces");

        let signal_controller = Arc::clone(&controller);
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                signal_controller.trigger_shutdown();
            })
            .await?;

        if controller.wait_for_drain(self.config.drain_timeout).await {
            info!("all requests drained");
        } else {
            warn!(
                in_flight = controller.in_flight_count(),
                "drain timeout expired with requests in flight"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::network::handlers::testing::app_state;
    use crate::network::HealthState;

    async fn module() -> NetworkModule {
        let state = app_state().await;
        NetworkModule::new(NetworkConfig::default(), state.rpc, state.graph)
    }

    #[tokio::test]
    async fn new_does_not_bind() {
        let module = module().await;
        assert!(module.listener.is_none());
        assert!(Arc::ptr_eq(
            &module.shutdown_controller(),
            &module.shutdown_controller()
        ));
    }

    #[tokio::test]
    async fn start_binds_an_ephemeral_port() {
        let mut module = module().await;
        module.config.host = "127.0.0.1".to_string();
        let port = module.start().await.unwrap();
        assert!(port > 0);
        assert!(module.listener.is_some());
    }

    #[tokio::test]
    async fn serve_without_start_is_an_error() {
        let module = module().await;
        let err = module.serve(std::future::pending::<()>()).await.unwrap_err();
        assert!(err.to_string().contains("start()"));
    }

    #[tokio::test]
    async fn serve_stops_on_signal() {
        let mut module = module().await;
        module.config.host = "127.0.0.1".to_string();
        module.start().await.unwrap();
        let controller = module.shutdown_controller();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(module.serve(async move {
            let _ = rx.await;
        }));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(controller.health_state(), HealthState::Ready);

        tx.send(()).unwrap();
        server.await.unwrap().unwrap();
        assert_eq!(controller.health_state(), HealthState::Stopped);
    }
}
