use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use loginguard::config::{GuardConfig, LogFormat, LoggingConfig, StoreBackend, StoreConfig};
use loginguard::grpc::GrpcServer;
use loginguard::guard::{DeviceRegistry, LoginGuard, MemoryDeviceRegistry, NoTrustedDevices};
use loginguard::ratelimit::{CounterStore, MemoryCounterStore, RedisCounterStore};

/// How often the in-process store drops expired counters.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Parser)]
#[command(name = "loginguard", version, about = "Brute-force protection for login endpoints")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "LOGINGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Override the gRPC listen address
    #[arg(long, env = "LOGINGUARD_GRPC_ADDR")]
    grpc_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => GuardConfig::from_file(path)?,
        None => GuardConfig::default(),
    };
    if let Some(addr) = args.grpc_addr {
        config.server.grpc_addr = addr;
    }

    init_tracing(&config.logging);

    info!("Starting Loginguard");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        grpc_addr = %config.server.grpc_addr,
        backend = ?config.store.backend,
        "Configuration loaded"
    );

    let tiers = Arc::new(config.tiers.build()?);
    for tier in tiers.iter() {
        info!(
            tier = %tier.kind(),
            key_prefix = %tier.key_prefix(),
            points = tier.points(),
            window_secs = tier.policy().window.as_secs(),
            block = ?tier.policy().block,
            "Tier configured"
        );
    }

    let store = connect_store(&config.store).await?;

    if config.devices.enabled && !config.trusts_devices() {
        warn!("Trusted-device tracking is in process only; disabled for the shared counter store");
    }
    let devices: Arc<dyn DeviceRegistry> = if config.trusts_devices() {
        Arc::new(MemoryDeviceRegistry::new())
    } else {
        Arc::new(NoTrustedDevices)
    };

    let guard = Arc::new(LoginGuard::new(tiers, store, devices));
    info!("Login guard initialized");

    let grpc_server = GrpcServer::new(config.server.grpc_addr, guard);

    info!("Starting gRPC server on {}", config.server.grpc_addr);

    // Run the server with graceful shutdown on Ctrl+C
    grpc_server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Loginguard stopped");
    Ok(())
}

/// Initialize tracing. `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

/// Build the configured counter store client.
async fn connect_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn CounterStore>> {
    match config.backend {
        StoreBackend::Memory => {
            warn!("Using the in-process counter store; counters are not shared between instances");
            let store = Arc::new(MemoryCounterStore::new());

            let purged = store.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(PURGE_INTERVAL);
                loop {
                    interval.tick().await;
                    purged.purge_expired();
                }
            });

            Ok(store as Arc<dyn CounterStore>)
        }
        StoreBackend::Redis => {
            let store = RedisCounterStore::connect(&config.redis_url, config.op_timeout()).await?;
            info!("Connected to counter store");
            Ok(Arc::new(store))
        }
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
