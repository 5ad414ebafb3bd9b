//! Streaming response ingestion.
//!
//! One engine runs per (chat, provider) send. It posts the provider's
//! history to the gateway, decodes the SSE response incrementally, and
//! persists exactly one terminal outcome. Engines for different providers
//! share nothing but the store and the update channel; none can stall or
//! cancel another, and every engine runs to a terminal state.

use std::sync::Arc;

use futures_util::StreamExt;
use memchr::memmem;
use tokio::sync::mpsc;
use tracing::debug;

use crate::api::{GatewayRequest, StreamEvent};
use crate::core::providers::Provider;
use crate::core::session::provider_history;
use crate::store::{Role, Store};
use crate::utils::url::construct_api_url;

/// Live update published by an engine while it runs.
#[derive(Clone, Debug)]
pub enum StreamMessage {
    Chunk(String),
    Error(String),
    End,
}

/// Incremental decoder for `data: <json>\n\n` framed byte streams.
///
/// Bytes are buffered until a complete frame is available; the trailing
/// partial frame is kept across calls and evaluated once more bytes arrive
/// or the stream ends. Decoding is best-effort: frames without a `data:`
/// prefix, the `[DONE]` sentinel, and malformed JSON payloads are all
/// dropped without aborting the stream.
#[derive(Default)]
pub struct SseFrameDecoder {
    buffer: Vec<u8>,
}

impl SseFrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed newly arrived bytes, returning every event completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = memmem::find(&self.buffer, b"\n\n") {
            let frame: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            if let Some(event) = parse_frame(&frame) {
                events.push(event);
            }
        }
        events
    }

    /// Evaluate whatever is left in the buffer as a final frame.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let rest = std::mem::take(&mut self.buffer);
        parse_frame(&rest).into_iter().collect()
    }
}

fn parse_frame(frame: &[u8]) -> Option<StreamEvent> {
    let text = std::str::from_utf8(frame).ok()?;
    let payload = text.trim().strip_prefix("data:")?.trim();
    if payload == "[DONE]" {
        return None;
    }
    serde_json::from_str(payload).ok()
}

/// Everything an engine needs for one run.
pub struct EngineParams {
    pub client: reqwest::Client,
    pub gateway_url: String,
    pub store: Arc<Store>,
    pub chat_id: String,
    pub provider: Provider,
    pub model: Option<String>,
    pub api_key: String,
    pub system_context: Option<String>,
    pub tx: mpsc::UnboundedSender<(StreamMessage, Provider)>,
}

/// Run one ingestion engine to completion on its own task.
pub fn spawn_engine(params: EngineParams) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run_engine(params))
}

async fn run_engine(params: EngineParams) {
    let EngineParams {
        client,
        gateway_url,
        store,
        chat_id,
        provider,
        model,
        api_key,
        system_context,
        tx,
    } = params;

    let history = provider_history(&store.messages(&chat_id), provider);
    let request = GatewayRequest {
        messages: history,
        system_context,
        api_key,
        model,
    };
    let url = construct_api_url(&gateway_url, &format!("chat/{provider}"));

    let response = match client.post(url).json(&request).send().await {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            debug!(%provider, status = %response.status(), "gateway returned an error status");
            persist_transport_failure(&store, &chat_id, provider);
            let _ = tx.send((StreamMessage::End, provider));
            return;
        }
        Err(e) => {
            debug!(%provider, error = %e, "gateway request failed");
            persist_transport_failure(&store, &chat_id, provider);
            let _ = tx.send((StreamMessage::End, provider));
            return;
        }
    };

    let mut decoder = SseFrameDecoder::new();
    let mut accumulated = String::new();
    let mut error_text: Option<String> = None;
    let mut transport_failed = false;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                for event in decoder.push(&bytes) {
                    apply_event(event, &mut accumulated, &mut error_text, &tx, provider);
                }
            }
            Err(e) => {
                debug!(%provider, error = %e, "response body failed mid-stream");
                transport_failed = true;
                break;
            }
        }
    }
    if !transport_failed {
        for event in decoder.finish() {
            apply_event(event, &mut accumulated, &mut error_text, &tx, provider);
        }
    }

    // Terminal persistence: exactly one durable outcome per engine run.
    if transport_failed {
        persist_transport_failure(&store, &chat_id, provider);
    } else if let Some(error_text) = error_text {
        store.add_message(
            &chat_id,
            format!("Error from {provider}: {error_text}"),
            Role::Assistant,
            Some(provider),
        );
    } else if !accumulated.is_empty() {
        store.add_message(&chat_id, accumulated, Role::Assistant, Some(provider));
    }

    let _ = tx.send((StreamMessage::End, provider));
}

fn apply_event(
    event: StreamEvent,
    accumulated: &mut String,
    error_text: &mut Option<String>,
    tx: &mpsc::UnboundedSender<(StreamMessage, Provider)>,
    provider: Provider,
) {
    match event {
        StreamEvent::TextDelta { delta } => {
            accumulated.push_str(&delta);
            let _ = tx.send((StreamMessage::Chunk(delta), provider));
        }
        // Capture the error but keep draining; stopping early would leave
        // the connection half-read.
        StreamEvent::Error { error_text: text } => {
            let _ = tx.send((StreamMessage::Error(text.clone()), provider));
            *error_text = Some(text);
        }
    }
}

fn persist_transport_failure(store: &Store, chat_id: &str, provider: Provider) {
    store.add_message(
        chat_id,
        format!("Error: Failed to get response from {provider}"),
        Role::Assistant,
        Some(provider),
    );
}
