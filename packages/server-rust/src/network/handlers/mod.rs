//! HTTP handlers and the shared state they extract.

pub mod graph;
pub mod health;
pub mod rpc;
pub mod schema;

pub use graph::graph_handler;
pub use health::{health_handler, liveness_handler, readiness_handler};
pub use rpc::rpc_handler;
pub use schema::schema_handler;

use std::sync::Arc;
use std::time::Instant;

use axum::http::HeaderMap;
use twinport_core::SchemaVersion;

use super::{NetworkConfig, ShutdownController};
use crate::adapter::ProtocolAdapter;
use crate::graph::GraphAdapter;
use crate::rpc::RpcAdapter;
use crate::schema::SchemaRegistry;
use crate::service::TransactionCoordinator;

/// Header carrying the schema version a client was built against.
pub const SCHEMA_VERSION_HEADER: &str = "schema-version";

/// Shared application state passed to all axum handlers via `State`.
///
/// Holds `Arc` references only, so cloning per request is cheap.
#[derive(Clone)]
pub struct AppState {
    pub rpc: Arc<RpcAdapter>,
    pub graph: Arc<GraphAdapter>,
    pub shutdown: Arc<ShutdownController>,
    pub config: Arc<NetworkConfig>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    #[must_use]
    pub fn new(
        rpc: Arc<RpcAdapter>,
        graph: Arc<GraphAdapter>,
        shutdown: Arc<ShutdownController>,
        config: Arc<NetworkConfig>,
    ) -> Self {
        Self {
            rpc,
            graph,
            shutdown,
            config,
            start_time: Instant::now(),
        }
    }

    /// Both adapters share one dispatcher; reach it through either.
    #[must_use]
    pub fn schema(&self) -> &Arc<SchemaRegistry> {
        self.rpc.pipeline().dispatcher().schema()
    }

    #[must_use]
    pub fn coordinator(&self) -> &Arc<TransactionCoordinator> {
        self.rpc.pipeline().dispatcher().coordinator()
    }
}

/// Reads the optional `schema-version` header.
///
/// An absent header means the client makes no claim; a present header
/// must be a non-negative integer.
pub(crate) fn assumed_version(headers: &HeaderMap) -> Result<Option<SchemaVersion>, String> {
    let Some(raw) = headers.get(SCHEMA_VERSION_HEADER) else {
        return Ok(None);
    };
    raw.to_str()
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
        .map(|v| Some(SchemaVersion(v)))
        .ok_or_else(|| format!("{SCHEMA_VERSION_HEADER} header must be a non-negative integer"))
}
