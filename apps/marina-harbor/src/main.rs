use std::{sync::Arc, time::Duration};

use clap::Parser;
use marina_core::{
    CoordinatorConfig, HostingCoordinator, PolicyGate, WorkerRegistry,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use marina_harbor::{
    cli::{run_client_command, Cli},
    config::Config,
    handlers::build_router,
    launcher::ProcessLauncher,
    oracle::HttpLivenessOracle,
    storage::RedisStorage,
};

#[tokio::main]
async fn main() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    if let Some(command) = cli.command {
        if let Err(err) = run_client_command(command).await {
            error!("client command failed: {err:#}");
            std::process::exit(1);
        }
        return;
    }

    let config = Config::from_env();
    info!("starting marina-harbor on port {}", config.port);
    info!("redis url: {}", config.redis_url);
    info!("account api: {}", config.account_api_url);

    let storage = match RedisStorage::new(&config.redis_url).await {
        Ok(storage) => Arc::new(storage),
        Err(err) => {
            error!("failed to connect to redis: {err:#}");
            std::process::exit(1);
        }
    };

    let oracle = Arc::new(HttpLivenessOracle::new(config.account_api_url.clone()));
    let launcher = Arc::new(ProcessLauncher::new(
        config.worker_command.clone(),
        config.worker_args.clone(),
        Duration::from_millis(config.worker_startup_grace_ms),
    ));
    let registry = WorkerRegistry::new(
        launcher,
        Duration::from_secs(config.worker_start_timeout_seconds),
    );
    let coordinator = Arc::new(HostingCoordinator::new(
        oracle,
        PolicyGate::new(storage.clone(), storage.clone()),
        storage.clone(),
        storage.clone(),
        registry,
        CoordinatorConfig {
            default_command_prefix: config.default_command_prefix.clone(),
            page_size: config.page_size,
            protected_identities: config.protected_identities.clone(),
            ..CoordinatorConfig::default()
        },
    ));

    let app = build_router(coordinator.clone())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind {addr}: {err}");
            std::process::exit(1);
        }
    };
    info!("marina-harbor listening on {addr}");

    let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(err) = serve.await {
        error!("server error: {err}");
    }

    // Stop every hosted worker before the process exits.
    coordinator.drain().await;
    info!("drained workers; shutting down");
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {err}");
    }
}
