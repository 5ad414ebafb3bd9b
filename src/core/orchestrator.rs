//! Fan-out of one user send to every targeted provider.
//!
//! The orchestrator persists the outbound user message for each target
//! before any engine starts, so the transcript reflects intent even when a
//! provider call later fails, then spawns one independent ingestion engine
//! per provider. Title synthesis rides along as a detached task whose
//! outcome is discarded.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;

use crate::api::{ChatMessage, GatewayRequest, StreamEvent};
use crate::core::chat_stream::{spawn_engine, EngineParams, SseFrameDecoder, StreamMessage};
use crate::core::models;
use crate::core::providers::Provider;
use crate::core::session::{self, ChatState};
use crate::store::{Role, Store, StoredMessage};
use crate::utils::url::construct_api_url;

const TITLE_SYSTEM_PROMPT: &str = "You are a helpful assistant that writes concise chat titles \
(3-6 words). Do not use quotes or punctuation. Return only the title.";

/// Default titles still eligible for generated replacement.
fn has_default_title(title: &str) -> bool {
    title.to_lowercase().contains("new chat")
}

#[derive(Debug, PartialEq, Eq)]
pub enum SendError {
    NoProvidersEnabled,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::NoProvidersEnabled => f.write_str("no providers enabled"),
        }
    }
}

impl Error for SendError {}

pub struct Orchestrator {
    store: Arc<Store>,
    client: reqwest::Client,
    gateway_url: String,
    tx: mpsc::UnboundedSender<(StreamMessage, Provider)>,
}

impl Orchestrator {
    /// Returns the orchestrator and the channel on which all engines
    /// publish their live updates, keyed by provider.
    pub fn new(
        store: Arc<Store>,
        gateway_url: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<(StreamMessage, Provider)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                store,
                client: reqwest::Client::new(),
                gateway_url: gateway_url.into(),
                tx,
            },
            rx,
        )
    }

    /// Current per-provider columns for a chat, re-derived from the store.
    pub fn provider_views(
        &self,
        chat_id: &str,
    ) -> std::collections::HashMap<Provider, Vec<StoredMessage>> {
        session::provider_views(&self.store.messages(chat_id))
    }

    /// Fan one user message out to every targeted provider.
    ///
    /// Returns the join handles of the spawned engines; callers may await
    /// them or let the engines run detached, both are safe.
    pub async fn send_message(
        &self,
        state: &mut ChatState,
        chat_id: &str,
        content: &str,
        project_id: Option<&str>,
    ) -> Result<Vec<tokio::task::JoinHandle<()>>, SendError> {
        let targets = state.target_providers();
        if targets.is_empty() {
            return Err(SendError::NoProvidersEnabled);
        }

        let system_context = project_id
            .and_then(|id| self.store.project(id))
            .map(|p| p.system_context)
            .filter(|ctx| !ctx.trim().is_empty());

        // Persist outbound intent for every target before any engine runs.
        for provider in &targets {
            self.store
                .add_message(chat_id, content, Role::User, Some(*provider));
        }

        let mut handles = Vec::new();
        for provider in targets {
            let Some(key) = self.store.api_key(provider) else {
                self.store.add_message(
                    chat_id,
                    format!("Error: No API key configured for {provider}"),
                    Role::Assistant,
                    Some(provider),
                );
                continue;
            };
            state.begin_stream(provider);
            handles.push(spawn_engine(EngineParams {
                client: self.client.clone(),
                gateway_url: self.gateway_url.clone(),
                store: Arc::clone(&self.store),
                chat_id: chat_id.to_string(),
                provider,
                model: Some(state.pane(provider).selected_model.clone()),
                api_key: key.secret,
                system_context: system_context.clone(),
                tx: self.tx.clone(),
            }));
        }

        if let Some(chat) = self.store.chat(chat_id) {
            if has_default_title(&chat.title) {
                let store = Arc::clone(&self.store);
                let client = self.client.clone();
                let gateway_url = self.gateway_url.clone();
                let chat_id = chat_id.to_string();
                let first_message = content.to_string();
                // Fire-and-forget: the result is discarded and no failure
                // can reach the send path.
                tokio::spawn(async move {
                    generate_title(store, client, gateway_url, chat_id, first_message).await;
                });
            }
        }

        Ok(handles)
    }
}

/// Retitle a chat from its first message using the cheapest model of the
/// first key-bearing provider. Every failure path returns silently.
async fn generate_title(
    store: Arc<Store>,
    client: reqwest::Client,
    gateway_url: String,
    chat_id: String,
    first_message: String,
) {
    let Some((provider, secret)) = Provider::TITLE_PRIORITY
        .into_iter()
        .find_map(|p| store.api_key(p).map(|k| (p, k.secret)))
    else {
        return;
    };

    let request = GatewayRequest {
        messages: vec![
            ChatMessage::new("system", TITLE_SYSTEM_PROMPT),
            ChatMessage::new("user", first_message),
        ],
        system_context: None,
        api_key: secret,
        model: Some(models::small_model(provider).to_string()),
    };
    let url = construct_api_url(&gateway_url, &format!("chat/{provider}"));

    let response = match client.post(url).json(&request).send().await {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            debug!(%provider, status = %response.status(), "title generation rejected");
            return;
        }
        Err(e) => {
            debug!(%provider, error = %e, "title generation request failed");
            return;
        }
    };

    let mut decoder = SseFrameDecoder::new();
    let mut title = String::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(bytes) = chunk else {
            return;
        };
        for event in decoder.push(&bytes) {
            if let StreamEvent::TextDelta { delta } = event {
                title.push_str(&delta);
            }
        }
    }
    for event in decoder.finish() {
        if let StreamEvent::TextDelta { delta } = event {
            title.push_str(&delta);
        }
    }

    let title = title.trim();
    if !title.is_empty() {
        store.update_chat_title(&chat_id, title);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::convert::Infallible;
    use std::time::Duration;

    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::response::sse::{Event, Sse};
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::Router;
    use tempfile::TempDir;

    /// Canned behavior for one provider route on the stub gateway.
    #[derive(Clone)]
    enum StubReply {
        Events(Vec<StreamEvent>),
        Status(StatusCode),
    }

    async fn stub_chat(
        State(replies): State<Arc<HashMap<String, StubReply>>>,
        Path(provider): Path<String>,
    ) -> Response {
        match replies.get(&provider) {
            Some(StubReply::Events(events)) => {
                let frames: Vec<Result<Event, Infallible>> = events
                    .iter()
                    .map(|event| {
                        Ok(Event::default().data(serde_json::to_string(event).unwrap()))
                    })
                    .chain(std::iter::once(Ok(Event::default().data("[DONE]"))))
                    .collect();
                Sse::new(tokio_stream::iter(frames)).into_response()
            }
            Some(StubReply::Status(status)) => (*status).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        }
    }

    async fn spawn_stub_gateway(replies: HashMap<String, StubReply>) -> String {
        let app = Router::new()
            .route("/chat/{provider}", post(stub_chat))
            .with_state(Arc::new(replies));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn deltas(parts: &[&str]) -> StubReply {
        StubReply::Events(
            parts
                .iter()
                .map(|part| StreamEvent::TextDelta {
                    delta: part.to_string(),
                })
                .collect(),
        )
    }

    fn open_store() -> (TempDir, Arc<Store>) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(dir.path()));
        (dir, store)
    }

    async fn drive(
        orchestrator: &Orchestrator,
        state: &mut ChatState,
        chat_id: &str,
        content: &str,
    ) {
        let handles = orchestrator
            .send_message(state, chat_id, content, None)
            .await
            .expect("send should fan out");
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn fan_out_persists_per_provider_user_and_assistant_messages() {
        let (_dir, store) = open_store();
        store.set_api_key(Provider::OpenAi, "sk-a");
        store.set_api_key(Provider::Claude, "sk-b");
        let chat = store.create_chat("weekend plans", None);

        let gateway = spawn_stub_gateway(HashMap::from([
            ("openai".to_string(), deltas(&["Hi"])),
            ("claude".to_string(), deltas(&["He", "y"])),
        ]))
        .await;

        let (orchestrator, _rx) = Orchestrator::new(Arc::clone(&store), gateway);
        let mut state = ChatState::new(&store.providers_with_keys());
        drive(&orchestrator, &mut state, &chat.id, "Hello").await;

        let messages = store.messages(&chat.id);
        assert_eq!(messages.len(), 4);

        let views = orchestrator.provider_views(&chat.id);
        let openai: Vec<(&str, &str)> = views[&Provider::OpenAi]
            .iter()
            .map(|m| (m.role.as_str(), m.content.as_str()))
            .collect();
        assert_eq!(openai, vec![("user", "Hello"), ("assistant", "Hi")]);
        let claude: Vec<(&str, &str)> = views[&Provider::Claude]
            .iter()
            .map(|m| (m.role.as_str(), m.content.as_str()))
            .collect();
        assert_eq!(claude, vec![("user", "Hello"), ("assistant", "Hey")]);
        assert!(views[&Provider::Gemini].is_empty());
    }

    #[tokio::test]
    async fn send_with_no_providers_is_rejected_without_persisting() {
        let (_dir, store) = open_store();
        let chat = store.create_chat("untouched", None);

        let (orchestrator, _rx) = Orchestrator::new(Arc::clone(&store), "http://127.0.0.1:9");
        let mut state = ChatState::new(&[]);
        let err = orchestrator
            .send_message(&mut state, &chat.id, "Hello", None)
            .await
            .unwrap_err();

        assert_eq!(err, SendError::NoProvidersEnabled);
        assert!(store.messages(&chat.id).is_empty());
    }

    #[tokio::test]
    async fn single_provider_mode_targets_exactly_one_engine() {
        let (_dir, store) = open_store();
        store.set_api_key(Provider::OpenAi, "sk-a");
        store.set_api_key(Provider::Gemini, "sk-c");
        let chat = store.create_chat("focused", None);

        let gateway =
            spawn_stub_gateway(HashMap::from([("gemini".to_string(), deltas(&["ok"]))])).await;

        let (orchestrator, _rx) = Orchestrator::new(Arc::clone(&store), gateway);
        let mut state = ChatState::new(&store.providers_with_keys());
        state.enter_single_provider_mode(Provider::Gemini);
        drive(&orchestrator, &mut state, &chat.id, "X").await;

        let messages = store.messages(&chat.id);
        let user_messages: Vec<&StoredMessage> =
            messages.iter().filter(|m| m.role.is_user()).collect();
        assert_eq!(user_messages.len(), 1);
        assert_eq!(user_messages[0].provider, Some(Provider::Gemini));
        assert!(messages
            .iter()
            .all(|m| m.provider == Some(Provider::Gemini)));
    }

    #[tokio::test]
    async fn error_only_stream_persists_one_visible_error_message() {
        let (_dir, store) = open_store();
        store.set_api_key(Provider::OpenAi, "sk-a");
        let chat = store.create_chat("failing", None);

        let gateway = spawn_stub_gateway(HashMap::from([(
            "openai".to_string(),
            StubReply::Events(vec![StreamEvent::Error {
                error_text: "quota exhausted".to_string(),
            }]),
        )]))
        .await;

        let (orchestrator, _rx) = Orchestrator::new(Arc::clone(&store), gateway);
        let mut state = ChatState::new(&store.providers_with_keys());
        drive(&orchestrator, &mut state, &chat.id, "Hello").await;

        let messages = store.messages(&chat.id);
        let assistant: Vec<&StoredMessage> =
            messages.iter().filter(|m| m.role.is_assistant()).collect();
        assert_eq!(assistant.len(), 1);
        assert!(assistant[0].content.contains("quota exhausted"));
        assert!(messages.iter().all(|m| !m.content.is_empty()));
    }

    #[tokio::test]
    async fn empty_completion_persists_nothing() {
        let (_dir, store) = open_store();
        store.set_api_key(Provider::OpenAi, "sk-a");
        let chat = store.create_chat("quiet", None);

        let gateway =
            spawn_stub_gateway(HashMap::from([("openai".to_string(), deltas(&[]))])).await;

        let (orchestrator, _rx) = Orchestrator::new(Arc::clone(&store), gateway);
        let mut state = ChatState::new(&store.providers_with_keys());
        drive(&orchestrator, &mut state, &chat.id, "Hello").await;

        let messages = store.messages(&chat.id);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].role.is_user());
    }

    #[tokio::test]
    async fn gateway_failure_surfaces_as_a_provider_scoped_message() {
        let (_dir, store) = open_store();
        store.set_api_key(Provider::OpenAi, "sk-a");
        store.set_api_key(Provider::Claude, "sk-b");
        let chat = store.create_chat("partial outage", None);

        let gateway = spawn_stub_gateway(HashMap::from([
            (
                "openai".to_string(),
                StubReply::Status(StatusCode::INTERNAL_SERVER_ERROR),
            ),
            ("claude".to_string(), deltas(&["fine"])),
        ]))
        .await;

        let (orchestrator, _rx) = Orchestrator::new(Arc::clone(&store), gateway);
        let mut state = ChatState::new(&store.providers_with_keys());
        drive(&orchestrator, &mut state, &chat.id, "Hello").await;

        let views = orchestrator.provider_views(&chat.id);
        assert_eq!(
            views[&Provider::OpenAi][1].content,
            "Error: Failed to get response from openai"
        );
        assert_eq!(views[&Provider::Claude][1].content, "fine");
    }

    #[tokio::test]
    async fn missing_key_for_an_enabled_provider_yields_a_visible_error() {
        let (_dir, store) = open_store();
        store.set_api_key(Provider::OpenAi, "sk-a");
        let chat = store.create_chat("keyless", None);

        let gateway =
            spawn_stub_gateway(HashMap::from([("openai".to_string(), deltas(&["hi"]))])).await;

        let (orchestrator, _rx) = Orchestrator::new(Arc::clone(&store), gateway);
        // Claude is toggled on even though no key is stored for it.
        let mut state = ChatState::new(&[Provider::OpenAi, Provider::Claude]);
        drive(&orchestrator, &mut state, &chat.id, "Hello").await;

        let views = orchestrator.provider_views(&chat.id);
        assert_eq!(
            views[&Provider::Claude][1].content,
            "Error: No API key configured for claude"
        );
        assert_eq!(views[&Provider::OpenAi][1].content, "hi");
    }

    #[tokio::test]
    async fn default_titled_chats_are_retitled_from_the_first_message() {
        let (_dir, store) = open_store();
        store.set_api_key(Provider::OpenAi, "sk-a");
        let chat = store.create_chat("New Chat", None);

        let gateway = spawn_stub_gateway(HashMap::from([(
            "openai".to_string(),
            deltas(&["Recursion", " Basics"]),
        )]))
        .await;

        let (orchestrator, _rx) = Orchestrator::new(Arc::clone(&store), gateway);
        let mut state = ChatState::new(&store.providers_with_keys());
        drive(&orchestrator, &mut state, &chat.id, "Explain recursion").await;

        // The title task is detached; poll until it lands.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if store.chat(&chat.id).unwrap().title == "Recursion Basics" {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "title was never updated"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // The main assistant message persisted independently of the title.
        let messages = store.messages(&chat.id);
        assert!(messages
            .iter()
            .any(|m| m.role.is_assistant() && m.content == "Recursion Basics"));
    }

    #[tokio::test]
    async fn custom_titles_are_left_alone() {
        let (_dir, store) = open_store();
        store.set_api_key(Provider::OpenAi, "sk-a");
        let chat = store.create_chat("Rust questions", None);

        let gateway =
            spawn_stub_gateway(HashMap::from([("openai".to_string(), deltas(&["sure"]))])).await;

        let (orchestrator, _rx) = Orchestrator::new(Arc::clone(&store), gateway);
        let mut state = ChatState::new(&store.providers_with_keys());
        drive(&orchestrator, &mut state, &chat.id, "Hello").await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.chat(&chat.id).unwrap().title, "Rust questions");
    }
}
