use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderName, header};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use ragdoc_core::{IngestionReport, QueryResponse, QueryStream};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

/// Set to `not-found` when `/ask_stream` answers without consulting the model.
pub const RESULT_HEADER: HeaderName = HeaderName::from_static("x-ragdoc-result");

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    #[serde(default)]
    pub question: String,
}

pub async fn health(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let indexed_chunks = state.pipeline().indexed_chunks().await?;
    Ok(Json(json!({ "status": "ok", "service": "ragdoc", "indexed_chunks": indexed_chunks })))
}

pub async fn ask_stream(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Response, ApiError> {
    let guard = state.read_index().await;

    match state.pipeline().ask_stream(&request.question).await? {
        QueryStream::NotFound { message, best_score } => {
            info!(?best_score, "answered without context");
            Ok(([(header::CONTENT_TYPE, TEXT_PLAIN), (RESULT_HEADER, "not-found")], message)
                .into_response())
        }
        QueryStream::Answer(mut events) => {
            let body = async_stream::stream! {
                let _guard = guard;
                while let Some(event) = events.next().await {
                    yield event.map(|event| event.to_wire());
                }
            };
            Ok(([(header::CONTENT_TYPE, TEXT_PLAIN)], Body::from_stream(body)).into_response())
        }
    }
}

pub async fn ask(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let _guard = state.read_index().await;
    Ok(Json(state.pipeline().ask(&request.question).await?))
}

pub async fn ingest(State(state): State<AppState>) -> Result<Json<IngestionReport>, ApiError> {
    let _guard = state.write_index().await;
    info!(dir = %state.source_dir().display(), "rebuilding index");
    let report = state.pipeline().ingest_directory(state.source_dir()).await?;
    Ok(Json(report))
}
