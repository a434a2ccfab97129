//! Main entry point for the AeroVision review gateway

use aerovision_gateway::{
    api,
    backend::ConfiguredLoader,
    config::Settings,
    gateway::{EnvironmentSignal, SharedSignal},
    AppState,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    init_tracing(&settings);

    info!(
        host = %settings.server.host,
        port = settings.server.port,
        ocr_mode = %settings.ocr.mode,
        device = %settings.inference.device,
        debug = settings.debug,
        "Starting AeroVision review gateway"
    );

    let env_signal = SharedSignal::new(EnvironmentSignal::capture(&settings.ocr));
    let loader = Arc::new(ConfiguredLoader::new(
        settings.inference.clone(),
        settings.ocr.clone(),
        env_signal.clone(),
    ));

    let preload = settings.inference.preload;
    let health_interval = settings.inference.health_check_interval_secs;
    let addr = format!("{}:{}", settings.server.host, settings.server.port);

    let app_state = Arc::new(AppState::build(settings, loader, env_signal)?);

    for check in aerovision_gateway::review::CheckType::ALL {
        if let Err(e) = app_state.selector.resolve_for(check) {
            // Eager mode refuses to start with a check it cannot serve
            if preload {
                anyhow::bail!("preload aborted: {}", e);
            }
            warn!(check = %check, error = %e, "Check will fail until configuration is fixed");
        }
    }

    if preload {
        let report = app_state.gateway.preload(app_state.resolved_keys()).await;
        if !report.failed.is_empty() {
            warn!(failed = report.failed.len(), "Some models failed to preload");
        }
    }

    app_state.health_manager.start(health_interval).await;

    let app = api::create_router(app_state.clone());

    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    app_state.health_manager.stop().await;
    app_state.orchestrator.pool().close();
    info!("Server stopped");

    Ok(())
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.logging.level.clone()));

    let registry = tracing_subscriber::registry().with(filter);
    if settings.logging.format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining in-flight requests");
}
