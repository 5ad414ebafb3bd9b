//! Upstream provider adapters.
//!
//! Opens the streaming completion call for a provider and translates its
//! native SSE vocabulary into the gateway's `text-delta`/`error` events.
//! Four providers share the OpenAI-compatible adapter and differ only in
//! base URL; Anthropic and Gemini get their own request shapes and payload
//! parsers.

use std::convert::Infallible;

use axum::response::sse::Event;
use futures_util::{Stream, StreamExt};
use memchr::memchr;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api::{ChatMessage, CompletionChunk, CompletionRequest, StreamEvent};
use crate::core::providers::{Provider, WireFlavor};
use crate::utils::auth::add_auth_headers;
use crate::utils::url::construct_api_url;

use super::GatewayError;

/// The only sampling parameter the gateway exposes.
const TEMPERATURE: f64 = 0.7;

/// Anthropic requires an explicit completion budget.
const ANTHROPIC_MAX_TOKENS: u32 = 4096;

/// How to interpret `data:` payloads from an open upstream stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum UpstreamParser {
    OpenAiCompatible,
    Anthropic,
    Gemini,
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f64,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
struct AnthropicEvent {
    #[serde(rename = "type")]
    kind: String,
    delta: Option<AnthropicDelta>,
    error: Option<AnthropicError>,
}

#[derive(Deserialize)]
struct AnthropicDelta {
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicError {
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContentBody>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
struct GeminiContent {
    role: &'static str,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiContentBody {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f64,
}

#[derive(Deserialize)]
struct GeminiChunk {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiChunkError>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
}

#[derive(Deserialize)]
struct GeminiCandidateContent {
    parts: Option<Vec<GeminiCandidatePart>>,
}

#[derive(Deserialize)]
struct GeminiCandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct GeminiChunkError {
    message: String,
}

/// Open the streaming completion call for `provider`.
///
/// Any failure here — request dispatch, upstream non-2xx — is a
/// construction-time error and becomes the gateway's 500 envelope.
pub(super) async fn open(
    client: &reqwest::Client,
    provider: Provider,
    model: &str,
    api_key: &str,
    messages: Vec<ChatMessage>,
) -> Result<(reqwest::Response, UpstreamParser), GatewayError> {
    let (request, parser) = match provider.wire_flavor() {
        WireFlavor::OpenAiCompatible { base_url } => {
            let url = construct_api_url(base_url, "chat/completions");
            let body = CompletionRequest {
                model: model.to_string(),
                messages,
                stream: true,
                temperature: TEMPERATURE,
            };
            (client.post(url).json(&body), UpstreamParser::OpenAiCompatible)
        }
        WireFlavor::Anthropic { base_url } => {
            let url = construct_api_url(base_url, "messages");
            let body = anthropic_request(model, messages);
            (client.post(url).json(&body), UpstreamParser::Anthropic)
        }
        WireFlavor::Gemini { base_url } => {
            let url = construct_api_url(
                base_url,
                &format!("models/{model}:streamGenerateContent?alt=sse"),
            );
            let body = gemini_request(messages);
            (client.post(url).json(&body), UpstreamParser::Gemini)
        }
    };

    let response = add_auth_headers(request, provider, api_key)
        .header("Content-Type", "application/json")
        .send()
        .await
        .map_err(|e| GatewayError::Upstream(e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<no body>".to_string());
        warn!(%provider, %status, "upstream rejected the completion request");
        return Err(GatewayError::Upstream(format!(
            "{provider} returned {status}: {body}"
        )));
    }

    Ok((response, parser))
}

/// Anthropic rejects `system` entries in the message list; lift them into
/// the dedicated field instead.
fn anthropic_request(model: &str, messages: Vec<ChatMessage>) -> AnthropicRequest {
    let (system_entries, messages): (Vec<ChatMessage>, Vec<ChatMessage>) =
        messages.into_iter().partition(|m| m.role == "system");
    let system = if system_entries.is_empty() {
        None
    } else {
        Some(
            system_entries
                .into_iter()
                .map(|m| m.content)
                .collect::<Vec<_>>()
                .join("\n\n"),
        )
    };
    AnthropicRequest {
        model: model.to_string(),
        max_tokens: ANTHROPIC_MAX_TOKENS,
        temperature: TEMPERATURE,
        stream: true,
        system,
        messages,
    }
}

fn gemini_request(messages: Vec<ChatMessage>) -> GeminiRequest {
    let mut system_parts = Vec::new();
    let mut contents = Vec::new();
    for message in messages {
        match message.role.as_str() {
            "system" => system_parts.push(GeminiPart {
                text: message.content,
            }),
            "assistant" => contents.push(GeminiContent {
                role: "model",
                parts: vec![GeminiPart {
                    text: message.content,
                }],
            }),
            _ => contents.push(GeminiContent {
                role: "user",
                parts: vec![GeminiPart {
                    text: message.content,
                }],
            }),
        }
    }
    GeminiRequest {
        contents,
        system_instruction: if system_parts.is_empty() {
            None
        } else {
            Some(GeminiContentBody {
                parts: system_parts,
            })
        },
        generation_config: GeminiGenerationConfig {
            temperature: TEMPERATURE,
        },
    }
}

impl UpstreamParser {
    /// Translate one upstream `data:` payload. `None` means the payload
    /// carries nothing the gateway forwards (keep-alives, stop events,
    /// malformed frames).
    pub(super) fn parse_payload(self, payload: &str) -> Option<StreamEvent> {
        match self {
            UpstreamParser::OpenAiCompatible => {
                if let Ok(chunk) = serde_json::from_str::<CompletionChunk>(payload) {
                    let delta = chunk.choices.first()?.delta.content.clone()?;
                    return Some(StreamEvent::TextDelta { delta });
                }
                extract_error_message(payload).map(|error_text| StreamEvent::Error { error_text })
            }
            UpstreamParser::Anthropic => {
                let event: AnthropicEvent = serde_json::from_str(payload).ok()?;
                match event.kind.as_str() {
                    "content_block_delta" => {
                        let delta = event.delta?.text?;
                        Some(StreamEvent::TextDelta { delta })
                    }
                    "error" => Some(StreamEvent::Error {
                        error_text: event.error?.message,
                    }),
                    _ => None,
                }
            }
            UpstreamParser::Gemini => {
                let chunk: GeminiChunk = serde_json::from_str(payload).ok()?;
                if let Some(error) = chunk.error {
                    return Some(StreamEvent::Error {
                        error_text: error.message,
                    });
                }
                let text: String = chunk
                    .candidates?
                    .into_iter()
                    .next()?
                    .content?
                    .parts?
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect();
                if text.is_empty() {
                    None
                } else {
                    Some(StreamEvent::TextDelta { delta: text })
                }
            }
        }
    }
}

/// Pull a human-readable message out of an upstream error payload.
fn extract_error_message(payload: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.to_string()),
                _ => None,
            })
        })
}

/// Translate an open upstream stream into the gateway's SSE framing.
///
/// The upstream body is drained to the end even after an error payload,
/// and a `[DONE]` sentinel closes the stream.
pub(super) fn translate(
    response: reqwest::Response,
    parser: UpstreamParser,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let mut bytes = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        while let Some(chunk) = bytes.next().await {
            let chunk_bytes = match chunk {
                Ok(chunk_bytes) => chunk_bytes,
                Err(e) => {
                    debug!(error = %e, "upstream body failed mid-stream");
                    break;
                }
            };
            buffer.extend_from_slice(&chunk_bytes);

            while let Some(newline_pos) = memchr(b'\n', &buffer) {
                let line: Vec<u8> = buffer.drain(..=newline_pos).collect();
                let Ok(line_str) = std::str::from_utf8(&line) else {
                    continue;
                };
                let Some(payload) = line_str.trim().strip_prefix("data:") else {
                    continue;
                };
                let payload = payload.trim();
                if payload.is_empty() || payload == "[DONE]" {
                    continue;
                }
                if let Some(event) = parser.parse_payload(payload) {
                    match Event::default().json_data(&event) {
                        Ok(frame) => yield Ok(frame),
                        Err(e) => debug!(error = %e, "could not encode stream event"),
                    }
                }
            }
        }
        yield Ok(Event::default().data("[DONE]"));
    }
}
