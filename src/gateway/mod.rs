//! The chat request gateway: a stateless axum service that fronts every
//! provider behind one endpoint.
//!
//! `POST /chat/{provider}` validates the request body field by field,
//! opens the provider's native streaming call, and relays the reply as a
//! uniform SSE stream of `text-delta`/`error` events closed by a `[DONE]`
//! sentinel. The gateway holds no state beyond a shared HTTP client; API
//! keys arrive in the request body and go no further than the upstream
//! call.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::Sse;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::api::ChatMessage;
use crate::core::models;
use crate::core::providers::Provider;

mod upstream;

/// Failures the chat endpoint can answer with.
///
/// Validation failures are plain-text 400s so the caller can tell them
/// apart; anything that goes wrong while opening the upstream call is a
/// single 500 with a JSON envelope.
#[derive(Debug)]
pub enum GatewayError {
    BadRequest(&'static str),
    Upstream(String),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            GatewayError::BadRequest(reason) => {
                (StatusCode::BAD_REQUEST, reason).into_response()
            }
            GatewayError::Upstream(details) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Failed to process chat request",
                    "details": details,
                    "timestamp": Utc::now().to_rfc3339(),
                })),
            )
                .into_response(),
        }
    }
}

/// Build the gateway router with its shared upstream client.
pub fn router() -> Router {
    router_with_client(reqwest::Client::new())
}

pub fn router_with_client(client: reqwest::Client) -> Router {
    Router::new()
        .route("/chat/{provider}", post(chat))
        .layer(CorsLayer::permissive())
        .with_state(client)
}

/// Handle one chat completion request.
///
/// The body is taken as raw JSON rather than a typed extractor so each
/// missing field maps to its own 400 reason, and so the checks run in a
/// fixed order: provider, then API key, then messages, then model.
async fn chat(
    State(client): State<reqwest::Client>,
    Path(provider): Path<String>,
    Json(body): Json<Value>,
) -> Result<Response, GatewayError> {
    let provider: Provider = provider
        .parse()
        .map_err(|_| GatewayError::BadRequest("Unsupported provider"))?;

    let api_key = body
        .get("apiKey")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .ok_or(GatewayError::BadRequest("API key not provided"))?
        .to_string();

    let mut messages: Vec<ChatMessage> = body
        .get("messages")
        .filter(|value| value.is_array())
        .and_then(|value| serde_json::from_value(value.clone()).ok())
        .ok_or(GatewayError::BadRequest("Messages array is required"))?;

    let model = models::resolve(provider, body.get("model").and_then(Value::as_str))
        .unwrap_or_else(|| models::default_model(provider).to_string());
    if model.trim().is_empty() {
        return Err(GatewayError::BadRequest("Model not provided"));
    }

    if let Some(context) = body.get("systemContext").and_then(Value::as_str) {
        if !context.trim().is_empty() {
            messages.insert(0, ChatMessage::new("system", context));
        }
    }

    info!(%provider, %model, messages = messages.len(), "relaying chat request");
    let (response, parser) = upstream::open(&client, provider, &model, &api_key, messages).await?;
    Ok(Sse::new(upstream::translate(response, parser)).into_response())
}
