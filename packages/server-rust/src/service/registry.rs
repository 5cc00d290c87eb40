use std::any::{Any, TypeId};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{info, warn};

use super::config::ServerConfig;

// ---------------------------------------------------------------------------
// ServiceContext
// ---------------------------------------------------------------------------

/// Context handed to services during initialization.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    pub config: Arc<ServerConfig>,
}

// ---------------------------------------------------------------------------
// ManagedService trait
// ---------------------------------------------------------------------------

/// A component with a start/stop lifecycle (schema registry, store).
///
/// Registered services are initialized in registration order and shut down
/// in reverse. The `Any` bound enables `ServiceRegistry::get::<T>()`.
#[async_trait]
pub trait ManagedService: Send + Sync + Any {
    fn name(&self) -> &'static str;

    async fn init(&self, ctx: &ServiceContext) -> anyhow::Result<()>;

    /// Shut down. If `terminate` is true, skip graceful cleanup.
    async fn shutdown(&self, terminate: bool) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// ServiceRegistry
// ---------------------------------------------------------------------------

/// Lookup by name or by concrete type, plus ordered lifecycle.
pub struct ServiceRegistry {
    by_name: DashMap<&'static str, Arc<dyn ManagedService>>,
    by_type: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    order: RwLock<Vec<&'static str>>,
}

impl ServiceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_name: DashMap::new(),
            by_type: DashMap::new(),
            order: RwLock::new(Vec::new()),
        }
    }

    /// Registers a shared service and returns it for wiring.
    pub fn register<T: ManagedService>(&self, service: Arc<T>) -> Arc<T> {
        let name = service.name();
        self.by_name.insert(name, service.clone());
        self.by_type.insert(TypeId::of::<T>(), service.clone());
        self.order.write().push(name);
        service
    }

    pub fn get<T: ManagedService>(&self) -> Option<Arc<T>> {
        self.by_type
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.value().clone().downcast::<T>().ok())
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn ManagedService>> {
        self.by_name.get(name).map(|entry| entry.value().clone())
    }

    /// Initializes services in registration order, stopping at the first
    /// failure.
    ///
    /// # Errors
    ///
    /// Returns the first `init()` error, tagged with the service name.
    pub async fn init_all(&self, ctx: &ServiceContext) -> anyhow::Result<()> {
        let order = self.order.read().clone();
        for name in order {
            let Some(service) = self.get_by_name(name) else {
                continue;
            };
            let started = Instant::now();
            service
                .init(ctx)
                .await
                .map_err(|e| e.context(format!("initializing {name}")))?;
            info!(service = name, elapsed_ms = started.elapsed().as_millis(), "service initialized");
        }
        Ok(())
    }

    /// Shuts services down in reverse registration order. Every service is
    /// asked to stop even if an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns the first `shutdown()` error after all services were visited.
    pub async fn shutdown_all(&self, terminate: bool) -> anyhow::Result<()> {
        let order = self.order.read().clone();
        let mut first_error = None;
        for name in order.into_iter().rev() {
            let Some(service) = self.get_by_name(name) else {
                continue;
            };
            if let Err(e) = service.shutdown(terminate).await {
                warn!(service = name, error = %e, "service shutdown failed");
                first_error.get_or_insert(e.context(format!("shutting down {name}")));
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    type Log = Arc<parking_lot::Mutex<Vec<String>>>;

    struct Recorded {
        name: &'static str,
        log: Log,
        fail_shutdown: bool,
    }

    impl Recorded {
        fn new(name: &'static str, log: &Log) -> Arc<Self> {
            Arc::new(Self {
                name,
                log: log.clone(),
                fail_shutdown: false,
            })
        }
    }

    #[async_trait]
    impl ManagedService for Recorded {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn init(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
            self.log.lock().push(format!("init:{}", self.name));
            Ok(())
        }

        async fn shutdown(&self, _terminate: bool) -> anyhow::Result<()> {
            self.log.lock().push(format!("shutdown:{}", self.name));
            anyhow::ensure!(!self.fail_shutdown, "{} refused to stop", self.name);
            Ok(())
        }
    }

    struct Typed;

    #[async_trait]
    impl ManagedService for Typed {
        fn name(&self) -> &'static str {
            "typed"
        }
        async fn init(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
            Ok(())
        }
        async fn shutdown(&self, _terminate: bool) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn ctx() -> ServiceContext {
        ServiceContext {
            config: Arc::new(ServerConfig::default()),
        }
    }

    #[test]
    fn lookup_by_name_and_type() {
        let registry = ServiceRegistry::new();
        let registered = registry.register(Arc::new(Typed));

        assert_eq!(registry.get_by_name("typed").unwrap().name(), "typed");
        assert!(Arc::ptr_eq(&registry.get::<Typed>().unwrap(), &registered));
        assert!(registry.get_by_name("missing").is_none());
        assert!(registry.get::<Recorded>().is_none());
    }

    #[tokio::test]
    async fn lifecycle_runs_in_order_and_reverse() {
        let log: Log = Arc::default();
        let registry = ServiceRegistry::new();
        registry.register(Recorded::new("schema", &log));
        registry.register(Recorded::new("store", &log));

        registry.init_all(&ctx()).await.unwrap();
        registry.shutdown_all(false).await.unwrap();

        assert_eq!(
            *log.lock(),
            vec!["init:schema", "init:store", "shutdown:store", "shutdown:schema"]
        );
    }

    #[tokio::test]
    async fn shutdown_visits_every_service_despite_failure() {
        let log: Log = Arc::default();
        let registry = ServiceRegistry::new();
        registry.register(Recorded::new("schema", &log));
        registry.register(Arc::new(Recorded {
            name: "store",
            log: log.clone(),
            fail_shutdown: true,
        }));

        let err = registry.shutdown_all(false).await.unwrap_err();
        assert!(format!("{err:#}").contains("store refused to stop"));
        assert_eq!(*log.lock(), vec!["shutdown:store", "shutdown:schema"]);
    }
}
