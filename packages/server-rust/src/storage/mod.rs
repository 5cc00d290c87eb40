//! Storage layers for the Twinport server.
//!
//! - **Engine** ([`Store`]): committed in-memory tables with snapshot reads
//!   and optimistic commit validation
//! - **Transaction** ([`Transaction`]): one scope's private write set and
//!   read set over the engine
//! - **Data stores** ([`datastores`]): write-through persistence and the
//!   migration ledger behind the engine

pub mod datastores;
pub mod engine;
pub mod transaction;

pub use engine::*;
pub use transaction::{IsolationLevel, Transaction};
