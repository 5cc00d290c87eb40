//! Process-wide schema state derived from the migration ledger.

pub mod refresher;
pub mod registry;

pub use refresher::{RefreshTask, SchemaRefresher};
pub use registry::SchemaRegistry;
