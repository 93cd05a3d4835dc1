//! wisp HTTP/3 reverse proxy entry point.

use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};
use tokio::sync::watch;

use wisp_config::loader::read_config;
use wisp_config::validator::validate as validate_config;
use wisp_edge::{FallbackListener, ListenerError, QuicListener};
use wisp_health::Checker;
use wisp_lb::BackendSet;
use wisp_proxy::{ProxyHandler, Router};
use wisp_telemetry::{Metrics, MetricsServer};

const APP_NAME: &str = "wisp";

/// Bounded wait for in-flight requests after the shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

const EXIT_CONFIG: i32 = 1;
const EXIT_BIND: i32 = 2;
const EXIT_TLS: i32 = 3;

#[derive(Parser)]
#[command(name = "wisp", version, about = "HTTP/3 reverse proxy", long_about = None)]
struct Cli {
    // Sets a custom config file
    #[arg(short, long, default_value = "configs/proxy.yaml")]
    config: String,

    // Force debug log level regardless of the configured one
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Read configuration file
    let config = match read_config(&cli.config) {
        Ok(cfg) => cfg,
        Err(err_msg) => {
            eprintln!("Error loading config: {}", err_msg);
            process::exit(EXIT_CONFIG);
        }
    };

    // Initialize the logger
    wisp_utils::logger::init_logger(&config.telemetry.logging.level, cli.debug);

    // Validate configuration
    if !validate_config(&config) {
        error!("Configuration validation failed. Exiting...");
        process::exit(EXIT_CONFIG);
    }

    info!("{} v{} starting", APP_NAME, env!("CARGO_PKG_VERSION"));

    // Install the default crypto provider for rustls
    let _ = rustls::crypto::CryptoProvider::install_default(
        rustls::crypto::ring::default_provider(),
    );

    let metrics = Arc::new(Metrics::new());

    let backends = match BackendSet::from_config(&config.backend_groups) {
        Ok(set) => Arc::new(set),
        Err(err) => {
            error!("Failed to build backend groups: {}", err);
            process::exit(EXIT_CONFIG);
        }
    };

    // backends start optimistic; the gauge reflects that
    for backend in backends.backends() {
        metrics.set_backend_health(backend.name(), true);
    }

    let handler = Arc::new(ProxyHandler::new(
        Router::new(&config.routing),
        backends.clone(),
        metrics.clone(),
    ));

    // Listeners stop on the first channel; health tasks and the metrics
    // endpoint stop on the second, after the drain completes.
    let (listener_shutdown_tx, listener_shutdown_rx) = watch::channel(false);
    let (background_shutdown_tx, background_shutdown_rx) = watch::channel(false);

    // One prober task per enabled backend
    for group_cfg in &config.backend_groups {
        if !group_cfg.health_check.enabled {
            continue;
        }
        let Some(group) = backends.group(&group_cfg.name) else {
            continue;
        };
        for backend in group.backends() {
            let checker = match Checker::new(
                backend.name().to_string(),
                backend.url(),
                &group_cfg.health_check,
            ) {
                Ok(checker) => checker,
                Err(err) => {
                    error!("Failed to build health checker: {}", err);
                    process::exit(EXIT_CONFIG);
                }
            };
            tokio::spawn(checker.run(
                backend.health_state(),
                metrics.clone(),
                background_shutdown_rx.clone(),
            ));
        }
    }

    // Metrics endpoint on its own bind address
    if config.telemetry.metrics.enabled {
        let addr = parse_addr(&config.telemetry.metrics.address);
        match MetricsServer::bind(addr, config.telemetry.metrics.path.clone(), metrics.clone())
            .await
        {
            Ok(server) => {
                tokio::spawn(server.run(background_shutdown_rx.clone()));
            }
            Err(err) => {
                error!("Failed to bind metrics endpoint {}: {}", addr, err);
                process::exit(EXIT_BIND);
            }
        }
    }

    // Optional plain-TCP ingress for clients without HTTP/3
    if let Some(ref fallback_address) = config.server.fallback_address {
        let addr = parse_addr(fallback_address);
        match FallbackListener::bind(addr, handler.clone()).await {
            Ok(listener) => {
                tokio::spawn(listener.run(listener_shutdown_rx.clone()));
            }
            Err(err) => {
                error!("Failed to bind fallback listener {}: {}", addr, err);
                process::exit(EXIT_BIND);
            }
        }
    }

    // Main QUIC/HTTP-3 ingress
    let quic = match QuicListener::bind(&config.server, handler.clone(), listener_shutdown_rx) {
        Ok(listener) => listener,
        Err(err @ ListenerError::Tls(_)) => {
            error!("{}", err);
            process::exit(EXIT_TLS);
        }
        Err(err @ ListenerError::Bind(_)) => {
            error!("{}", err);
            process::exit(EXIT_BIND);
        }
        Err(err) => {
            error!("{}", err);
            process::exit(EXIT_CONFIG);
        }
    };
    let quic_task = tokio::spawn(quic.run());

    shutdown_signal().await;
    info!("Shutdown signal received, draining...");

    // stop listeners, wait for the drain, then stop everything else
    let _ = listener_shutdown_tx.send(true);
    if tokio::time::timeout(DRAIN_TIMEOUT + Duration::from_secs(1), quic_task)
        .await
        .is_err()
    {
        warn!("Listener drain exceeded the deadline");
    }
    let _ = background_shutdown_tx.send(true);

    info!("{} stopped", APP_NAME);
}

// addresses were validated with the config; a parse failure here is a bug
fn parse_addr(addr: &str) -> SocketAddr {
    match addr.parse() {
        Ok(parsed) => parsed,
        Err(err) => {
            error!("Invalid bind address '{}': {}", addr, err);
            process::exit(EXIT_CONFIG);
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(err) => {
                error!("Failed to install SIGTERM handler: {}", err);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
