//! Twinport server: a typed RPC surface and a graph query surface over one
//! dispatch layer, one transaction coordinator and one versioned schema.

pub mod adapter;
pub mod app;
pub mod graph;
pub mod network;
pub mod rpc;
pub mod schema;
pub mod service;
pub mod storage;
pub mod traits;

pub use adapter::{ProtocolAdapter, Translation};
pub use app::{App, AppConfig};
pub use traits::{DataStore, MigrationLedger, RowChange};
