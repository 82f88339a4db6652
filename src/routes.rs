use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};

use crate::{
    acquisition::ImageAcquisitionController,
    camera::CameraError,
    models::SessionView,
    orchestrator::{IdentificationOrchestrator, IdentifyOutcome},
    state::{view, SessionState},
};

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<Mutex<SessionState>>,
    pub acquisition: Arc<ImageAcquisitionController>,
    pub orchestrator: Arc<IdentificationOrchestrator>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error("bad upload: {0}")]
    BadUpload(String),
    #[error("identification task failed: {0}")]
    Task(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Camera(CameraError::DeviceAccess(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Camera(CameraError::NotActive) => StatusCode::CONFLICT,
            ApiError::Camera(CameraError::Frame(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Camera(CameraError::Encode(_)) | ApiError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadUpload(_) => StatusCode::BAD_REQUEST,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/session", get(get_session))
        // Uploads are taken as-is, whatever their size
        .route("/api/image", post(upload_image).layer(DefaultBodyLimit::disable()).get(get_image))
        .route("/api/camera/start", post(start_camera))
        .route("/api/camera/stop", post(stop_camera))
        .route("/api/camera/capture", post(capture_frame))
        .route("/api/identify", post(identify))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}

fn session_view(state: &AppState) -> SessionView {
    view(&state.session.lock(), state.acquisition.camera_active())
}

pub async fn get_session(State(state): State<AppState>) -> Json<SessionView> {
    Json(session_view(&state))
}

pub async fn upload_image(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<SessionView>, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(|e| ApiError::BadUpload(e.to_string()))? {
        if field.name() != Some("file") {
            continue;
        }
        let content_type = field.content_type().map(str::to_owned);
        let data = field.bytes().await.map_err(|e| ApiError::BadUpload(e.to_string()))?;
        tracing::info!("📤 Received upload of {} bytes", data.len());
        state.acquisition.set_from_file(data, content_type.as_deref()).await;
        return Ok(Json(session_view(&state)));
    }
    Err(ApiError::BadUpload("missing multipart field 'file'".into()))
}

pub async fn get_image(State(state): State<AppState>) -> Response {
    let image = state.session.lock().image.clone();
    match image {
        Some(img) => ([(header::CONTENT_TYPE, img.mime_type)], img.bytes).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn start_camera(State(state): State<AppState>) -> Result<Json<SessionView>, ApiError> {
    state.acquisition.start_camera().await?;
    Ok(Json(session_view(&state)))
}

pub async fn stop_camera(State(state): State<AppState>) -> Json<SessionView> {
    state.acquisition.stop_camera().await;
    Json(session_view(&state))
}

pub async fn capture_frame(State(state): State<AppState>) -> Result<Json<SessionView>, ApiError> {
    state.acquisition.capture().await?;
    Ok(Json(session_view(&state)))
}

pub async fn identify(State(state): State<AppState>) -> Result<Response, ApiError> {
    // Detached so a dropped client connection does not abandon the request
    let orchestrator = state.orchestrator.clone();
    let outcome = tokio::spawn(async move { orchestrator.identify().await })
        .await
        .map_err(|e| ApiError::Task(e.to_string()))?;

    let status = match outcome {
        IdentifyOutcome::AlreadyPending => StatusCode::CONFLICT,
        IdentifyOutcome::NothingToIdentify | IdentifyOutcome::Finished(_) => StatusCode::OK,
    };
    Ok((status, Json(session_view(&state))).into_response())
}
