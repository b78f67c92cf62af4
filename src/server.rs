//! HTTP surface: job submission, status lookup and a tool check.

use crate::controller::JobController;
use crate::init::ffmpeg_version;
use crate::request::JobRequest;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<JobController>,
}

pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/generate", post(generate))
        .route("/status/:job_id", get(status))
        .route("/ffmpeg-test", get(ffmpeg_test))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

fn error_response(code: StatusCode, message: impl Into<String>) -> Response {
    (code, Json(json!({ "success": false, "error": message.into() }))).into_response()
}

async fn generate(State(state): State<AppState>, body: Bytes) -> Response {
    if !state.controller.has_storage() {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "storage not configured");
    }

    let value: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "body must be JSON"),
    };
    let request = match JobRequest::from_value(value) {
        Ok(r) => r,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
    };

    let job_id = Uuid::new_v4().to_string();
    if let Err(err) = state.controller.submit(job_id.clone(), request) {
        tracing::warn!("Submission rejected: {}", err);
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "could not queue job");
    }

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "job_id": job_id,
            "status": "processing",
            "message": "Video generation started",
        })),
    )
        .into_response()
}

async fn status(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
    match state.controller.status(&job_id) {
        Some(view) => Json(view).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "job not found"),
    }
}

async fn ffmpeg_test() -> Response {
    match ffmpeg_version().await {
        Ok(version) => Json(json!({ "available": true, "version": version })).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "available": false, "error": format!("{:#}", err) })),
        )
            .into_response(),
    }
}
