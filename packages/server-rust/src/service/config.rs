use std::time::Duration;

use crate::storage::IsolationLevel;

/// Dispatch-level configuration.
///
/// Controls operation timeouts, concurrency limits, transaction isolation
/// and the schema cache refresh interval.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Default timeout for one operation. A commit already under way when it
    /// passes is awaited, not abandoned.
    pub default_operation_timeout_ms: u64,
    /// Operations allowed in flight before load shedding.
    pub max_concurrent_operations: u32,
    /// Isolation policy applied to every transaction scope.
    pub isolation: IsolationLevel,
    /// How often the background worker re-reads the migration ledger.
    pub schema_refresh_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            default_operation_timeout_ms: 30_000,
            max_concurrent_operations: 1000,
            isolation: IsolationLevel::Snapshot,
            schema_refresh_interval: Duration::from_secs(30),
        }
    }
}
