use anyhow::Result;
use clap::Parser;
use easel_core::{load_model, select_best_device, InferenceInvoker, Lifecycle};
use tokio::{self, net::TcpListener};
use tracing::{info, info_span, warn};

mod config;
mod error;
mod logging;
mod routes;

use config::{Args, Config};
use logging::LoggingConfig;
use routes::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_logging(&LoggingConfig::new(&args.log_level, args.log_json))?;
    let config = Config::from_args(&args)?;

    // --- Device is chosen once and never changes ---
    let device = select_best_device(config.device_map);

    // --- Load the model in the background; requests get 503 until it is ready ---
    let lifecycle = Lifecycle::new();
    let load_options = config.load.clone();
    let _loader = lifecycle.load_in_background(async move { load_model(&load_options, device).await })?;

    let app_state = AppState {
        invoker: InferenceInvoker::with_span(
            lifecycle,
            info_span!("invoker", model_id = %config.load.model_id),
        ),
        defaults: config.defaults,
        output_format: config.output_format,
    };
    let app = routes::router(app_state, config.request_timeout);

    // --- Start the server ---
    let listener = TcpListener::bind(&config.bind_address).await?;
    info!(address = %listener.local_addr()?, "started server");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
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
