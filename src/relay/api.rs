//! HTTP API for the generation server.
//!
//! - `POST /generate`: synthesize and publish a notification
//! - `GET /state`: 200 with the ready record, 202 while not ready
//! - `GET /artifact/{id}`: artifact bytes or 404
//! - `GET /status`: server introspection

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::artifact::{self, ArtifactError};
use super::generator::{GenerateRequest, Generator};
use super::publish::StateSnapshot;
use crate::synth::VoiceSettings;

pub const CHECKSUM_HEADER: &str = "x-checksum";

#[derive(Clone)]
pub struct ApiState {
    pub generator: Arc<Generator>,
}

// --- Response types ---

#[derive(Serialize)]
struct GenerateResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    locator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    settings: Option<VoiceSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl GenerateResponse {
    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            id: None,
            checksum: None,
            locator: None,
            settings: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Serialize)]
struct StatusResponse {
    ready: bool,
    publishing: bool,
    backend: String,
    latest_id: Option<String>,
    artifacts: usize,
}

/// Build the axum router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/generate", post(handle_generate))
        .route("/state", get(handle_state))
        .route("/artifact/{id}", get(handle_artifact))
        .route("/status", get(handle_status))
        .with_state(state)
}

/// Bind and serve until the listener fails.
pub async fn serve(state: ApiState, addr: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Generation API listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await
}

// --- Handlers ---

async fn handle_generate(
    State(state): State<ApiState>,
    body: Result<Json<GenerateRequest>, axum::extract::rejection::JsonRejection>,
) -> (StatusCode, Json<GenerateResponse>) {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => {
            debug!("Rejected /generate body: {rejection}");
            return (
                StatusCode::BAD_REQUEST,
                Json(GenerateResponse::err(rejection.body_text())),
            );
        }
    };

    match state.generator.generate(req).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(GenerateResponse {
                success: true,
                id: Some(outcome.id),
                checksum: Some(outcome.checksum),
                locator: Some(outcome.locator),
                settings: Some(outcome.settings),
                error: None,
            }),
        ),
        Err(e) if e.is_client_error() => {
            (StatusCode::BAD_REQUEST, Json(GenerateResponse::err(e.to_string())))
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(GenerateResponse::err(e.to_string())),
        ),
    }
}

async fn handle_state(State(state): State<ApiState>) -> (StatusCode, Json<StateSnapshot>) {
    let snapshot = state.generator.cell().read_state();
    let status = if snapshot.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    (status, Json(snapshot))
}

async fn handle_artifact(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.generator.store().load(&id) {
        Ok(bytes) => {
            let sum = artifact::checksum(&bytes);
            let mut response = bytes.into_response();
            let headers = response.headers_mut();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("audio/wav"));
            if let Ok(value) = HeaderValue::from_str(&sum) {
                headers.insert(CHECKSUM_HEADER, value);
            }
            response
        }
        Err(ArtifactError::NotFound(_)) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!("Failed to load artifact {id}: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let generator = &state.generator;
    let record = generator.cell().record();
    Json(StatusResponse {
        ready: record.ready,
        publishing: generator.cell().publishing(),
        backend: generator.backend_name().to_string(),
        latest_id: record.latest.map(|p| p.id),
        artifacts: generator.store().list().len(),
    })
}
