use std::sync::Arc;

use classlog_reducer::ReducerCatalog;
use gateway::auth::FieldAuthenticator;
use gateway::state::AppState;
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "gateway starting");

    let cfg = match gateway::config::load_config() {
        Ok(cfg) => {
            info!(bind = %cfg.bind, store = %cfg.merkle.store, "config loaded");
            cfg
        }
        Err(e) => {
            eprintln!("FATAL: failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    // Analytics modules are registered by the deployment embedding this
    // binary; none are wired in here.
    let reducers = ReducerCatalog::new(Vec::new());
    let authenticator = Arc::new(FieldAuthenticator {
        field: "user_id".to_owned(),
    });

    let state = match AppState::new(&cfg, reducers, authenticator) {
        Ok(state) => state,
        Err(e) => {
            eprintln!("FATAL: failed to initialize state: {}", e);
            std::process::exit(1);
        }
    };

    let router = gateway::build_router(state);
    let listener = tokio::net::TcpListener::bind(&cfg.bind)
        .await
        .expect("failed to bind");
    info!(addr = %cfg.bind, "gateway listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
    info!("gateway shut down gracefully");
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
