mod config;
mod error;
mod handlers;
mod health;
mod metrics;
mod patch;
mod policy;
mod review;
mod sidecar;
mod tls;
mod webhook;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::post;
use clap::Parser;
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto::Builder as HttpBuilder;
use hyper_util::service::TowerToHyperService;
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info};

use crate::sidecar::KubeConfigLookup;

#[derive(Parser)]
#[command(name = "sidecar-injector", about = "Kubernetes sidecar injecting admission webhook")]
struct Cli {
    /// Path to the configuration file
    #[arg(
        long,
        default_value = "/etc/sidecar-injector/config.yaml",
        env = "INJECTOR_CONFIG"
    )]
    config: String,

    /// Log at debug level regardless of the configured level
    #[arg(long)]
    debug: bool,
}

async fn shutdown_signal(shutdown_tx: watch::Sender<()>) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("received CTRL+C, starting graceful shutdown"),
            _ = sigterm.recv() => info!("received SIGTERM, starting graceful shutdown"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for ctrl_c");
        info!("received CTRL+C, starting graceful shutdown");
    }

    let _ = shutdown_tx.send(());
}

async fn run_webhook_server(
    addr: SocketAddr,
    tls_acceptor: TlsAcceptor,
    router: Router,
    ready: Arc<AtomicBool>,
    mut shutdown_rx: watch::Receiver<()>,
) {
    let listener = TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind HTTPS on {addr}: {e}"));

    info!(%addr, "webhook server listening");
    ready.store(true, Ordering::Relaxed);

    loop {
        let (tcp_stream, remote_addr) = tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("failed to accept TCP connection: {e}");
                        continue;
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                info!("webhook server shutting down");
                break;
            }
        };

        let tls_acceptor = tls_acceptor.clone();
        let router = router.clone();

        tokio::spawn(async move {
            let tls_stream = match tls_acceptor.accept(tcp_stream).await {
                Ok(stream) => stream,
                Err(e) => {
                    error!(%remote_addr, "TLS handshake failed: {e}");
                    return;
                }
            };

            let io = TokioIo::new(tls_stream);
            let service = TowerToHyperService::new(router.into_service());

            if let Err(e) = HttpBuilder::new(hyper_util::rt::TokioExecutor::new())
                .serve_connection(io, service)
                .await
            {
                error!(%remote_addr, "error serving connection: {e}");
            }
        });
    }
}

async fn run_health_server(
    addr: SocketAddr,
    router: Router,
    mut shutdown_rx: watch::Receiver<()>,
) {
    let listener = TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind HTTP on {addr}: {e}"));

    info!(%addr, "health/metrics server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
            info!("health/metrics server shutting down");
        })
        .await
        .unwrap_or_else(|e| error!("health/metrics server error: {e}"));
}

fn parse_addr(name: &str, value: &str) -> SocketAddr {
    value.parse().unwrap_or_else(|e| {
        eprintln!("Invalid {name} '{value}': {e}");
        std::process::exit(1);
    })
}

#[tokio::main]
async fn main() {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install default CryptoProvider");

    let cli = Cli::parse();

    let config = config::InjectorConfig::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Failed to load config from {}: {e}", cli.config);
        std::process::exit(1);
    });

    let log_level = if cli.debug { "debug" } else { config.log_level.as_str() };
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    info!(
        listen_addr = %config.listen_addr,
        metrics_addr = %config.metrics_addr,
        tls_cert_path = %config.tls_cert_path,
        tls_key_path = %config.tls_key_path,
        sidecar.config_map = %config.sidecar.config_map,
        sidecar.namespace = %config.sidecar.namespace,
        sidecar.key = %config.sidecar.key,
        sidecar.lookup_timeout_secs = config.sidecar.lookup_timeout_secs,
        "sidecar-injector starting"
    );

    let tls_config = tls::load_server_config(&config.tls_cert_path, &config.tls_key_path)
        .unwrap_or_else(|e| {
            eprintln!("Failed to load TLS config: {e}");
            std::process::exit(1);
        });
    let tls_acceptor = TlsAcceptor::from(tls_config);

    let client = kube::Client::try_default().await.unwrap_or_else(|e| {
        eprintln!("Failed to create Kubernetes client: {e}");
        std::process::exit(1);
    });
    let lookup = Arc::new(KubeConfigLookup::new(client));

    let mut registry = Registry::default();
    let injector_metrics = metrics::InjectorMetrics::new(&mut registry);
    let registry = Arc::new(registry);

    let app_state = Arc::new(handlers::AppState {
        webhook: webhook::Webhook::new(lookup, &config.sidecar),
        metrics: injector_metrics,
    });

    let webhook_router = Router::new()
        .route("/mutate", post(handlers::handle_mutate))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .with_state(app_state);

    let ready = Arc::new(AtomicBool::new(false));
    let health_router = health::router(Arc::new(health::HealthState {
        registry,
        ready: ready.clone(),
    }));

    let listen_addr = parse_addr("listen_addr", &config.listen_addr);
    let metrics_addr = parse_addr("metrics_addr", &config.metrics_addr);

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let webhook_shutdown_rx = shutdown_rx.clone();
    let health_shutdown_rx = shutdown_rx;

    tokio::spawn(shutdown_signal(shutdown_tx));

    tokio::join!(
        run_webhook_server(listen_addr, tls_acceptor, webhook_router, ready, webhook_shutdown_rx),
        run_health_server(metrics_addr, health_router, health_shutdown_rx),
    );

    info!("sidecar-injector shut down gracefully");
}
