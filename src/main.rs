mod acquisition;
mod camera;
mod config;
mod gemini;
mod models;
mod orchestrator;
mod parser;
mod routes;
mod state;

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use crate::acquisition::ImageAcquisitionController;
use crate::camera::{CameraSession, CaptureDevice, HttpSnapshotDevice, UnavailableDevice};
use crate::config::{mask_secret, AppConfig};
use crate::gemini::GeminiClient;
use crate::orchestrator::IdentificationOrchestrator;
use crate::routes::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = AppConfig::from_env();
    match &config.gemini.api_key {
        Some(key) => tracing::info!("Using API key: {}", mask_secret(key)),
        None => tracing::warn!("GEMINI_API_KEY not set; identification requests will fail until it is configured"),
    }

    let device: Arc<dyn CaptureDevice> = match &config.camera_snapshot_url {
        Some(url) => {
            tracing::info!(%url, "Camera backed by HTTP snapshot endpoint");
            Arc::new(HttpSnapshotDevice::new(url.clone())?)
        }
        None => {
            tracing::info!("CAMERA_SNAPSHOT_URL not set; camera capture disabled");
            Arc::new(UnavailableDevice)
        }
    };

    let session = Arc::default();
    let gemini = GeminiClient::new(&config.gemini)?;
    let state = AppState {
        acquisition: Arc::new(ImageAcquisitionController::new(CameraSession::new(device), Arc::clone(&session))),
        orchestrator: Arc::new(IdentificationOrchestrator::new(Arc::new(gemini), Arc::clone(&session))),
        session,
    };
    let acquisition = state.acquisition.clone();

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("binding {}", addr))?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    acquisition.shutdown().await;
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}
