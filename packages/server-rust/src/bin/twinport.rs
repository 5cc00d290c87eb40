//! `twinport`: runs the RPC and graph surfaces over one store.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::EnvFilter;
use twinport_server::network::NetworkConfig;
use twinport_server::service::ServerConfig;
use twinport_server::storage::IsolationLevel;
use twinport_server::{App, AppConfig};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "twinport", version, about)]
struct Cli {
    /// Address to bind.
    #[arg(long, env = "TWINPORT_HOST", default_value = "0.0.0.0")]
    host: String,
    /// Port to listen on; 0 picks a free one.
    #[arg(long, env = "TWINPORT_PORT", default_value_t = 8080)]
    port: u16,
    /// Directory for the persistent store. Omit to keep state in memory.
    #[arg(long, env = "TWINPORT_DATA_DIR")]
    data_dir: Option<PathBuf>,
    /// Isolation applied to every transaction scope.
    #[arg(long, env = "TWINPORT_ISOLATION", value_enum, default_value_t = IsolationLevel::Snapshot)]
    isolation: IsolationLevel,
    /// Per-operation timeout in milliseconds, commit included.
    #[arg(long, env = "TWINPORT_OPERATION_TIMEOUT_MS", default_value_t = 30_000)]
    operation_timeout_ms: u64,
    /// Operations in flight before new ones are shed.
    #[arg(long, env = "TWINPORT_MAX_CONCURRENT", default_value_t = 1000)]
    max_concurrent: u32,
    /// Seconds between background schema refreshes.
    #[arg(long, env = "TWINPORT_SCHEMA_REFRESH_SECS", default_value_t = 30)]
    schema_refresh_secs: u64,
    /// Whole-request HTTP timeout in seconds; keep it above the operation
    /// timeout.
    #[arg(long, env = "TWINPORT_REQUEST_TIMEOUT_SECS", default_value_t = 35)]
    request_timeout_secs: u64,
    /// Largest accepted request body in bytes.
    #[arg(long, env = "TWINPORT_MAX_BODY_BYTES", default_value_t = 1024 * 1024)]
    max_body_bytes: usize,
    /// Allowed CORS origins, comma separated; `*` allows any.
    #[arg(long, env = "TWINPORT_CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    cors_origins: Vec<String>,
    /// Seconds to wait for in-flight requests on shutdown.
    #[arg(long, env = "TWINPORT_DRAIN_TIMEOUT_SECS", default_value_t = 30)]
    drain_timeout_secs: u64,
    /// Serve Prometheus metrics on this address.
    #[arg(long, env = "TWINPORT_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,
    /// Log output format.
    #[arg(long, env = "TWINPORT_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Cli {
    fn app_config(&self) -> AppConfig {
        AppConfig {
            server: ServerConfig {
                default_operation_timeout_ms: self.operation_timeout_ms,
                max_concurrent_operations: self.max_concurrent,
                isolation: self.isolation,
                schema_refresh_interval: Duration::from_secs(self.schema_refresh_secs),
            },
            network: NetworkConfig {
                host: self.host.clone(),
                port: self.port,
                cors_origins: self.cors_origins.clone(),
                request_timeout: Duration::from_secs(self.request_timeout_secs),
                max_body_bytes: self.max_body_bytes,
                drain_timeout: Duration::from_secs(self.drain_timeout_secs),
            },
            data_dir: self.data_dir.clone(),
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().flatten_event(true).init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    if let Some(addr) = cli.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("installing prometheus exporter")?;
        info!(%addr, "prometheus exporter listening");
    }

    let mut app = App::build(cli.app_config()).await?;
    let port = app.start().await?;
    info!(port, version = env!("CARGO_PKG_VERSION"), "twinport started");

    app.run(shutdown_signal()).await
}
