use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::error::CloudError;
use crate::fetch::DiscourseClient;
use crate::settings::Settings;
use crate::{CancelToken, Config, batch_identifier, generate};

struct ServerState {
    settings: Settings,
    output_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    topic_ids: Vec<u64>,
    cookie: Option<String>,
    seed: Option<u64>,
    /// Per-request stopwords, filtered out on top of any configured list.
    stopwords: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct GenerateResponse {
    identifier: String,
    image_base64: String,
    frequencies: Vec<(String, u64)>,
    comment_count: usize,
    placed: usize,
    dropped: usize,
    /// Topics that yielded no comments or failed to fetch; the batch
    /// continues without them.
    failed_topic_ids: Vec<u64>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub async fn run_server(settings: Settings, output_dir: PathBuf, addr: String) -> Result<()> {
    let state = Arc::new(ServerState {
        settings,
        output_dir,
    });
    let app = Router::new()
        .route("/health", get(health))
        .route("/generate", post(generate_cloud))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| "failed to bind server address")?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn generate_cloud(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, (StatusCode, Json<ErrorResponse>)> {
    if payload.topic_ids.is_empty() {
        return Err(bad_request("topic_ids must not be empty"));
    }

    let client = DiscourseClient::new(
        &state.settings.base_url,
        payload.cookie.clone(),
        Duration::from_millis(state.settings.request_delay_ms),
    )
    .map_err(internal)?;

    let mut comments = Vec::new();
    let mut fetched_ids = Vec::new();
    let mut failed_topic_ids = Vec::new();
    for topic_id in &payload.topic_ids {
        match client.fetch_topic_comments(*topic_id).await {
            Ok(topic_comments) if topic_comments.is_empty() => {
                warn!(topic_id = *topic_id, "topic has no comments, skipping");
                failed_topic_ids.push(*topic_id);
            }
            Ok(topic_comments) => {
                comments.extend(topic_comments);
                fetched_ids.push(*topic_id);
            }
            Err(err) => {
                warn!(topic_id = *topic_id, error = %format!("{:#}", err), "topic fetch failed, skipping");
                failed_topic_ids.push(*topic_id);
            }
        }
    }
    if fetched_ids.is_empty() {
        return Err(bad_request("no topic yielded any comments"));
    }

    let identifier = batch_identifier(&fetched_ids);
    let mut config = Config::new(identifier.clone(), state.output_dir.clone());
    config.seed = payload.seed;
    config.extra_stopwords = payload.stopwords.unwrap_or_default();
    let settings = state.settings.clone();
    let comment_count = comments.len();

    let outcome = tokio::task::spawn_blocking(move || {
        generate(&comments, &config, &settings, &CancelToken::new())
    })
    .await
    .map_err(|err| internal(anyhow::anyhow!("generation task failed: {}", err)))?
    .map_err(pipeline_error)?;

    let image = std::fs::read(&outcome.image_path)
        .with_context(|| "failed to read rendered image")
        .map_err(internal)?;

    Ok(Json(GenerateResponse {
        identifier,
        image_base64: BASE64.encode(image),
        frequencies: outcome
            .ranked
            .iter()
            .map(|entry| (entry.word.clone(), entry.count))
            .collect(),
        comment_count,
        placed: outcome.placed,
        dropped: outcome.dropped,
        failed_topic_ids,
    }))
}

/// Requests that filtered every token down to nothing are the caller's to
/// fix; everything else the pipeline can raise here is a server-side fault.
fn pipeline_error(err: CloudError) -> (StatusCode, Json<ErrorResponse>) {
    match err {
        CloudError::EmptyInput => bad_request(err.to_string()),
        other => internal(anyhow::Error::new(other)),
    }
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn internal(err: anyhow::Error) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: format!("{:#}", err),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_deserializes_with_optional_fields() {
        let request: GenerateRequest =
            serde_json::from_str(r#"{"topic_ids": [369211, 254606]}"#).expect("parse");
        assert_eq!(request.topic_ids, vec![369211, 254606]);
        assert!(request.cookie.is_none());
        assert!(request.seed.is_none());
        assert!(request.stopwords.is_none());
    }

    #[test]
    fn request_carries_per_request_stopwords() {
        let request: GenerateRequest = serde_json::from_str(
            r#"{"topic_ids": [369211], "stopwords": ["的", "词云"]}"#,
        )
        .expect("parse");
        assert_eq!(
            request.stopwords,
            Some(vec!["的".to_string(), "词云".to_string()])
        );
    }

    #[test]
    fn only_empty_input_is_a_client_error() {
        let (status, _) = pipeline_error(CloudError::EmptyInput);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = pipeline_error(CloudError::Render("font machinery broke".to_string()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let (status, _) = pipeline_error(CloudError::ArtifactWrite {
            path: PathBuf::from("/out/x.png"),
            source: std::io::Error::other("disk full"),
        });
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn error_response_serializes_flat() {
        let json = serde_json::to_string(&ErrorResponse {
            error: "boom".to_string(),
        })
        .expect("serialize");
        assert_eq!(json, r#"{"error":"boom"}"#);
    }
}
