// Config API
// HTTP load/save of the pipeline document stored next to the worker

use crate::config::{ConfigDocument, StoreError};
use crate::worker::WorkerState;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

pub const SAVED_MESSAGE: &str = "Pipeline configuration saved successfully";

/// Body returned by a successful save
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveResponse {
    pub message: String,
    pub config: ConfigDocument,
}

/// Store failure surfaced as `500 {"detail": ...}`
pub(crate) struct ApiError {
    action: &'static str,
    source: StoreError,
}

impl ApiError {
    fn new(action: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| Self { action, source }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.source, "failed to {} pipeline configuration", self.action);
        let detail = format!("Failed to {} pipeline configuration: {}", self.action, self.source);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "detail": detail })),
        )
            .into_response()
    }
}

/// A missing document loads as an empty pipeline
pub(crate) async fn load_pipeline(
    State(state): State<WorkerState>,
) -> Result<Json<ConfigDocument>, ApiError> {
    let pipeline = state.store.load().await.map_err(ApiError::new("load"))?;
    Ok(Json(ConfigDocument { pipeline }))
}

pub(crate) async fn save_pipeline(
    State(state): State<WorkerState>,
    Json(doc): Json<ConfigDocument>,
) -> Result<Json<SaveResponse>, ApiError> {
    state
        .store
        .save(&doc.pipeline)
        .await
        .map_err(ApiError::new("save"))?;
    Ok(Json(SaveResponse {
        message: SAVED_MESSAGE.to_string(),
        config: doc,
    }))
}
