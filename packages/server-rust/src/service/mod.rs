//! Operation routing and execution framework.
//!
//! 1. **Classification** (`classify`): adapter work -> [`Operation`]
//! 2. **Middleware** (`middleware`): Tower layers (load shedding, timeout, metrics)
//! 3. **Dispatch** (`dispatch`): schema checks, one transaction scope per operation
//! 4. **Routing** (`router`): domain requests to services by `service_name`
//! 5. **Domain services** (`domain`): users, accounts, transfers
//! 6. **Background workers** (`worker`): periodic tasks such as schema refresh

pub mod classify;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod domain;
pub mod middleware;
pub mod operation;
pub mod registry;
pub mod router;
pub mod session;
pub mod worker;

pub use classify::OperationService;
pub use config::ServerConfig;
pub use coordinator::{ScopeHandle, ScopeStats, TransactionCoordinator};
pub use dispatch::Dispatcher;
pub use middleware::OperationPipeline;
pub use operation::{CommitFence, Operation, OperationContext, OperationError, Work};
pub use registry::{ManagedService, ServiceContext, ServiceRegistry};
pub use router::DomainRouter;
pub use session::DomainSession;
pub use worker::{BackgroundRunnable, BackgroundWorker};
