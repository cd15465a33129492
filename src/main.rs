use std::sync::Arc;

use clap::Parser;
use marginalia::bus::PAGE_EVENTS;
use marginalia::config::{Cli, Config, default_config_dir, default_config_path};
use marginalia::db::Database;
use marginalia::handler::{AppState, app};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    // With --config, data (the database) lives next to the config file;
    // otherwise both live under ~/.marginalia/
    let (config_path, data_dir) = match args.config_path {
        Some(path) => {
            let path = std::path::PathBuf::from(path);
            let dir = path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| std::path::PathBuf::from("."));
            (path, dir)
        }
        None => (default_config_path(), default_config_dir()),
    };

    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        eprintln!("failed to create data directory {:?}: {}", data_dir, e);
        std::process::exit(1);
    }

    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    tracing::info!("marginalia.svc starting");

    let cfg = Config::new(&config_path.to_string_lossy()).unwrap_or_else(|e| {
        tracing::error!(error = %e, path = ?config_path, "failed to load config file");
        std::process::exit(1);
    });
    let db = Arc::new(Database::new(&cfg, &data_dir).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup database");
        std::process::exit(1);
    }));

    let state = AppState::new(db, &cfg);
    let cancellation_token = CancellationToken::new();

    let router_task = tokio::spawn(
        state
            .router
            .clone()
            .run(state.bus.subscribe(PAGE_EVENTS), cancellation_token.clone()),
    );

    let address = format!("127.0.0.1:{}", cfg.app.get_port());
    let listener = tokio::net::TcpListener::bind(&address).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup tcp listener");
        std::process::exit(1);
    });

    tracing::info!("marginalia.svc running on {}", &address);
    tokio::select! {
        result = axum::serve(listener, app(state)) => {
            if let Err(err) = result {
                tracing::error!(error = %err, "http server failed");
                std::process::exit(1);
            }
        }
        _ = signal::ctrl_c() => {
            tracing::info!("ctrl+c signal received, preparing to shutdown");
        }
    }

    cancellation_token.cancel();
    if let Err(e) = router_task.await {
        tracing::warn!("message router task ended abnormally: {}", e);
    }
    tracing::info!("marginalia.svc going off, graceful shutdown complete");
}
