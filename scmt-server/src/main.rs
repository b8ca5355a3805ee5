use clap::Parser;
use scmt_server::api::{self, AppState};
use scmt_server::{tls, Cli, Manager, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "scmt_server=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = ServerConfig::load(cli).unwrap_or_else(|err| {
        eprintln!("Failed to load configuration: {err}");
        std::process::exit(1);
    });

    tracing::info!(dir = %config.dir.display(), port = config.port, ssl = config.ssl, "configuration loaded");

    let manager = Manager::build(&config.dir, &config.domains, &config.storages)
        .await
        .unwrap_or_else(|err| {
            eprintln!("Failed to initialize manager: {err}");
            std::process::exit(1);
        });
    let manager = Arc::new(manager);

    let worker = tokio::spawn(Arc::clone(&manager).run());

    let tls_config = tls::bootstrap(&manager, &config.ssl).await.unwrap_or_else(|err| {
        eprintln!("Failed to provision local tls certificate: {err}");
        std::process::exit(1);
    });

    let app = api::router(AppState { manager }).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "listening");

    axum_server::bind_rustls(addr, tls_config)
        .handle(shutdown_handle())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .expect("server failed");

    worker.abort();
}

fn shutdown_handle() -> axum_server::Handle {
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received, draining connections");
        shutdown_handle.graceful_shutdown(Some(std::time::Duration::from_secs(30)));
    });
    handle
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl+c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
