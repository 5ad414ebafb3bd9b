//! Wire payloads shared by the gateway and the streaming ingestion side.

use serde::{Deserialize, Serialize};

/// A single role/content pair as it travels over HTTP, both in gateway
/// request bodies and in upstream completion requests.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Body of `POST /chat/{provider}`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct GatewayRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(rename = "systemContext", skip_serializing_if = "Option::is_none")]
    pub system_context: Option<String>,
    #[serde(rename = "apiKey")]
    pub api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// One decoded SSE frame payload on the gateway's response stream.
///
/// The `[DONE]` sentinel is transport framing, not an event, and never
/// appears as a variant here.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "text-delta")]
    TextDelta { delta: String },
    #[serde(rename = "error")]
    Error {
        #[serde(rename = "errorText")]
        error_text: String,
    },
}

/// Upstream request body for OpenAI-compatible completion endpoints.
#[derive(Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub temperature: f64,
}

#[derive(Deserialize)]
pub struct CompletionDelta {
    pub content: Option<String>,
}

#[derive(Deserialize)]
pub struct CompletionChoice {
    pub delta: CompletionDelta,
}

/// One streamed chunk from an OpenAI-compatible `chat/completions` call.
#[derive(Deserialize)]
pub struct CompletionChunk {
    pub choices: Vec<CompletionChoice>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_events_round_trip_their_tagged_form() {
        let delta = StreamEvent::TextDelta {
            delta: "Hi".to_string(),
        };
        let encoded = serde_json::to_string(&delta).unwrap();
        assert_eq!(encoded, r#"{"type":"text-delta","delta":"Hi"}"#);

        let error: StreamEvent =
            serde_json::from_str(r#"{"type":"error","errorText":"rate limited"}"#).unwrap();
        assert_eq!(
            error,
            StreamEvent::Error {
                error_text: "rate limited".to_string()
            }
        );
    }

    #[test]
    fn gateway_request_accepts_camel_case_fields() {
        let body = r#"{
            "messages": [{"role": "user", "content": "Hello"}],
            "systemContext": "Be brief.",
            "apiKey": "sk-test",
            "model": "gpt-4-turbo"
        }"#;
        let request: GatewayRequest = serde_json::from_str(body).unwrap();
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.system_context.as_deref(), Some("Be brief."));
        assert_eq!(request.api_key, "sk-test");
        assert_eq!(request.model.as_deref(), Some("gpt-4-turbo"));
    }

    #[test]
    fn completion_chunk_parses_delta_content() {
        let chunk: CompletionChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{"content":"Hey"}}]}"#).unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hey"));
    }
}
