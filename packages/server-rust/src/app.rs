//! Process assembly: storage, schema registry, dispatch, both adapters and
//! the HTTP surface, with their lifecycles in one place.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::Router;
use tracing::info;
use twinport_core::{ClockSource, SystemClock};

use crate::graph::GraphAdapter;
use crate::network::{NetworkConfig, NetworkModule, ShutdownController};
use crate::rpc::RpcAdapter;
use crate::schema::{SchemaRefresher, SchemaRegistry};
use crate::service::{
    BackgroundWorker, DomainRouter, Dispatcher, OperationPipeline, ServerConfig, ServiceContext,
    ServiceRegistry, TransactionCoordinator,
};
use crate::storage::datastores::{MemoryLedger, NullDataStore};
use crate::storage::Store;
use crate::traits::{DataStore, MigrationLedger};

/// Name of the database file inside the data directory.
pub const DATA_FILE: &str = "twinport.redb";

/// Everything needed to assemble a server.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub network: NetworkConfig,
    /// Directory for the persistent store. `None` keeps everything in
    /// memory.
    pub data_dir: Option<PathBuf>,
}

/// A fully wired server, not yet serving.
pub struct App {
    services: ServiceRegistry,
    refresher: BackgroundWorker<SchemaRefresher>,
    rpc: Arc<RpcAdapter>,
    graph: Arc<GraphAdapter>,
    network: NetworkModule,
}

impl App {
    /// Opens storage, loads the schema and committed rows, and wires the
    /// adapters.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be opened, the ledger
    /// cannot be read or replayed, or stored rows cannot be loaded.
    pub async fn build(config: AppConfig) -> anyhow::Result<Self> {
        Self::build_with_clock(config, Arc::new(SystemClock)).await
    }

    /// [`build`](Self::build) with an explicit time source.
    ///
    /// # Errors
    ///
    /// See [`build`](Self::build).
    pub async fn build_with_clock(
        config: AppConfig,
        clock: Arc<dyn ClockSource>,
    ) -> anyhow::Result<Self> {
        let (data_store, ledger) = open_storage(config.data_dir.as_deref()).await?;

        let services = ServiceRegistry::new();
        let schema = services.register(Arc::new(SchemaRegistry::new(ledger)));
        let store = services.register(Arc::new(Store::new(data_store)));

        let server_config = Arc::new(config.server);
        services
            .init_all(&ServiceContext {
                config: Arc::clone(&server_config),
            })
            .await?;

        let refresher = BackgroundWorker::start(
            "schema-refresh",
            SchemaRefresher::new(Arc::clone(&schema)),
            server_config.schema_refresh_interval,
        );

        let coordinator = Arc::new(TransactionCoordinator::new(store, server_config.isolation));
        let dispatcher = Dispatcher::new(
            schema,
            coordinator,
            Arc::new(DomainRouter::with_default_services()),
            clock,
        );
        let pipeline = OperationPipeline::new(dispatcher, Arc::clone(&server_config));
        let rpc = Arc::new(RpcAdapter::new(pipeline.clone()));
        let graph = Arc::new(GraphAdapter::new(pipeline));
        let network = NetworkModule::new(config.network, Arc::clone(&rpc), Arc::clone(&graph));

        info!(isolation = ?server_config.isolation, "server assembled");
        Ok(Self {
            services,
            refresher,
            rpc,
            graph,
            network,
        })
    }

    #[must_use]
    pub fn rpc(&self) -> &Arc<RpcAdapter> {
        &self.rpc
    }

    #[must_use]
    pub fn graph(&self) -> &Arc<GraphAdapter> {
        &self.graph
    }

    #[must_use]
    pub fn router(&self) -> Router {
        self.network.build_router()
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        self.network.shutdown_controller()
    }

    /// Binds the listener; returns the bound port.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        self.network.start().await
    }

    /// Serves until `shutdown` resolves, then drains and stops every
    /// service.
    ///
    /// # Errors
    ///
    /// Returns the serving error if there was one, else the first service
    /// shutdown error.
    pub async fn run(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let Self {
            services,
            mut refresher,
            network,
            ..
        } = self;
        let served = network.serve(shutdown).await;
        refresher.stop().await;
        let stopped = services.shutdown_all(false).await;
        served.and(stopped)
    }

    /// Stops background work and services without serving.
    ///
    /// # Errors
    ///
    /// Returns the first service shutdown error.
    pub async fn close(mut self) -> anyhow::Result<()> {
        self.refresher.stop().await;
        self.services.shutdown_all(false).await
    }
}

async fn open_storage(
    data_dir: Option<&Path>,
) -> anyhow::Result<(Arc<dyn DataStore>, Arc<dyn MigrationLedger>)> {
    let Some(dir) = data_dir else {
        info!("no data directory; state is kept in memory");
        return Ok((
            Arc::new(NullDataStore),
            Arc::new(MemoryLedger::baseline()),
        ));
    };
    open_persistent(dir).await
}

#[cfg(feature = "redb")]
async fn open_persistent(
    dir: &Path,
) -> anyhow::Result<(Arc<dyn DataStore>, Arc<dyn MigrationLedger>)> {
    use anyhow::Context as _;

    use crate::storage::datastores::RedbDataStore;

    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating data directory {}", dir.display()))?;
    let store = RedbDataStore::open(dir.join(DATA_FILE))?;
    let ledger = store.ledger();
    ledger.seed_baseline().await?;
    Ok((Arc::new(store), Arc::new(ledger)))
}

#[cfg(not(feature = "redb"))]
async fn open_persistent(
    dir: &Path,
) -> anyhow::Result<(Arc<dyn DataStore>, Arc<dyn MigrationLedger>)> {
    anyhow::bail!(
        "data directory {} requires the `redb` feature",
        dir.display()
    )
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::header::CONTENT_TYPE;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::adapter::ProtocolAdapter;

    #[tokio::test]
    async fn in_memory_app_serves_both_surfaces() {
        let app = App::build(AppConfig::default()).await.unwrap();
        app.shutdown_controller().set_ready();

        let response = app
            .router()
            .oneshot(
                Request::post("/graph")
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        r#"{"query": "mutation { createUser(name: \"Ada\", email: \"ada@bank.io\") { id } }"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value =
            serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap())
                .unwrap();
        assert_eq!(body, json!({"data": {"createUser": {"id": 1}}}));

        let health = app
            .router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body: Value =
            serde_json::from_slice(&to_bytes(health.into_body(), usize::MAX).await.unwrap())
                .unwrap();
        assert_eq!(body["commits"], 1);

        app.close().await.unwrap();
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let app = App::build(AppConfig {
            network: NetworkConfig {
                max_body_bytes: 16,
                ..NetworkConfig::default()
            },
            ..AppConfig::default()
        })
        .await
        .unwrap();
        app.shutdown_controller().set_ready();

        let response = app
            .router()
            .oneshot(
                Request::post("/rpc/CreateUser")
                    .body(Body::from(vec![0u8; 64]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let response = app
            .router()
            .oneshot(
                Request::post("/graph")
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"query": "{ users { id name email } }"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        // Rejected before dispatch: no scope was opened.
        let stats = app.rpc().pipeline().dispatcher().coordinator().stats();
        assert_eq!(stats.commits() + stats.rollbacks(), 0);
        app.close().await.unwrap();
    }
}
