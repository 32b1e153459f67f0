//! RevBack server entry point
//!
//! One process hosts the HTTP surface and every queue worker pool. On
//! SIGTERM/ctrl-c the workers stop consuming, in-flight jobs finish or are
//! swept back to their queues, and the listener drains.

use revback_api_gateway::{routes, workers, AppState};
use revback_shared::PlatformConfig;
use std::process;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    if let Err(e) = init_tracing() {
        eprintln!("failed to initialize tracing: {e}");
        process::exit(1);
    }

    info!("starting RevBack v{}", env!("CARGO_PKG_VERSION"));

    let config = match PlatformConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e}");
            process::exit(1);
        }
    };

    let state = match AppState::initialize(config.clone()).await {
        Ok(state) => state,
        Err(e) => {
            error!("initialization failed: {e:#}");
            process::exit(1);
        }
    };

    // register (tenant × detector) scan schedules and the retention job
    if let Err(e) = state.scheduler.register_all().await {
        error!("failed to register scan schedules: {e}");
        process::exit(1);
    }

    let shutdown = CancellationToken::new();
    let worker_handles = workers::spawn_workers(&state, shutdown.clone()).await;

    let app = routes::router(state);
    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = match tokio::net::TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("could not bind {address}: {e}");
            process::exit(1);
        }
    };
    info!(address = %address, env = %config.env, "listening");

    let server_shutdown = shutdown.clone();
    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        server_shutdown.cancel();
    });

    if let Err(e) = serve.await {
        error!("server error: {e}");
    }

    // workers observe the cancelled token, finish in-flight attempts and
    // requeue whatever is still active
    for handle in worker_handles {
        let _ = handle.await;
    }

    info!("RevBack shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

    let filter = EnvFilter::try_new(&log_level).or_else(|_| EnvFilter::try_new("info"))?;

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        "pretty" | "text" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_file(true)
                        .with_line_number(true)
                        .with_target(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().compact())
                .init();
        }
    }

    Ok(())
}
