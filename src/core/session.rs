//! Ephemeral per-chat session state and the projection rules that turn the
//! store's flat message sequence into per-provider views.
//!
//! Nothing here is durable: streaming flags and live preview text never
//! touch the store, and the state is only mutated through the transition
//! methods below.

use std::collections::HashMap;

use crate::api::ChatMessage;
use crate::core::chat_stream::StreamMessage;
use crate::core::models;
use crate::core::providers::Provider;
use crate::store::StoredMessage;

/// UI-facing state for one provider's column.
#[derive(Debug, Clone)]
pub struct ProviderPane {
    pub enabled: bool,
    pub selected_model: String,
    pub custom_models: Vec<String>,
    pub streaming: bool,
    pub preview: String,
}

impl ProviderPane {
    fn new(provider: Provider, enabled: bool) -> Self {
        Self {
            enabled,
            selected_model: models::model_labels(provider)[0].to_string(),
            custom_models: Vec::new(),
            streaming: false,
            preview: String::new(),
        }
    }
}

/// Session state shared by all six provider columns of one chat view.
pub struct ChatState {
    panes: HashMap<Provider, ProviderPane>,
    single_provider_mode: Option<Provider>,
}

impl ChatState {
    /// `available` is the set of providers with stored API keys; those start
    /// enabled, everything else starts toggled off.
    pub fn new(available: &[Provider]) -> Self {
        let panes = Provider::ALL
            .into_iter()
            .map(|p| (p, ProviderPane::new(p, available.contains(&p))))
            .collect();
        Self {
            panes,
            single_provider_mode: None,
        }
    }

    pub fn pane(&self, provider: Provider) -> &ProviderPane {
        &self.panes[&provider]
    }

    pub fn single_provider_mode(&self) -> Option<Provider> {
        self.single_provider_mode
    }

    /// Re-derive enabled toggles after keys were added or removed. Single
    /// provider mode survives only if its provider is still available.
    pub fn sync_available_providers(&mut self, available: &[Provider]) {
        for (provider, pane) in &mut self.panes {
            pane.enabled = available.contains(provider);
        }
        if let Some(single) = self.single_provider_mode {
            if !available.contains(&single) {
                self.single_provider_mode = None;
            }
        }
    }

    pub fn toggle_provider(&mut self, provider: Provider, available: &[Provider]) {
        if !available.contains(&provider) {
            return;
        }
        let pane = self.panes.get_mut(&provider).expect("pane exists");
        pane.enabled = !pane.enabled;
        if self.single_provider_mode == Some(provider) {
            self.single_provider_mode = None;
        }
    }

    pub fn select_model(&mut self, provider: Provider, model: impl Into<String>) {
        self.panes.get_mut(&provider).expect("pane exists").selected_model = model.into();
    }

    /// Register a user-entered model identifier and select it.
    pub fn add_custom_model(&mut self, provider: Provider, model: &str) {
        let model = model.trim();
        if model.is_empty() {
            return;
        }
        let pane = self.panes.get_mut(&provider).expect("pane exists");
        pane.custom_models.push(model.to_string());
        pane.selected_model = model.to_string();
    }

    /// Restrict fan-out to exactly one provider; calling with the current
    /// single provider leaves the mode.
    pub fn enter_single_provider_mode(&mut self, provider: Provider) {
        if self.single_provider_mode == Some(provider) {
            self.single_provider_mode = None;
        } else {
            self.single_provider_mode = Some(provider);
        }
    }

    pub fn exit_single_provider_mode(&mut self) {
        self.single_provider_mode = None;
    }

    /// The providers a send fans out to, in catalog order.
    pub fn target_providers(&self) -> Vec<Provider> {
        if let Some(single) = self.single_provider_mode {
            return vec![single];
        }
        Provider::ALL
            .into_iter()
            .filter(|p| self.panes[p].enabled)
            .collect()
    }

    pub fn begin_stream(&mut self, provider: Provider) {
        let pane = self.panes.get_mut(&provider).expect("pane exists");
        pane.streaming = true;
        pane.preview.clear();
    }

    /// Fold one engine update into the provider's pane. `End` is terminal
    /// cleanup: the caller is expected to re-query the store afterwards so
    /// the column shows the durable record instead of the preview.
    pub fn apply(&mut self, message: StreamMessage, provider: Provider) {
        let pane = self.panes.get_mut(&provider).expect("pane exists");
        match message {
            StreamMessage::Chunk(delta) => pane.preview.push_str(&delta),
            StreamMessage::Error(_) => {}
            StreamMessage::End => {
                pane.streaming = false;
                pane.preview.clear();
            }
        }
    }
}

/// Split a chat's flat sequence into six order-preserving columns.
///
/// User messages without a provider tag are shared context and appear in
/// every column; tagged user messages and assistant messages appear only in
/// their own provider's column.
pub fn provider_views(messages: &[StoredMessage]) -> HashMap<Provider, Vec<StoredMessage>> {
    let mut views: HashMap<Provider, Vec<StoredMessage>> = Provider::ALL
        .into_iter()
        .map(|p| (p, Vec::new()))
        .collect();
    for message in messages {
        if message.role.is_user() {
            match message.provider {
                Some(provider) => views.get_mut(&provider).expect("view exists").push(message.clone()),
                None => {
                    for view in views.values_mut() {
                        view.push(message.clone());
                    }
                }
            }
        } else if let Some(provider) = message.provider {
            views.get_mut(&provider).expect("view exists").push(message.clone());
        }
    }
    views
}

/// The history actually sent upstream for one provider's next call: shared
/// or same-provider user messages plus this provider's own replies. A
/// provider never sees another provider's assistant output.
pub fn provider_history(messages: &[StoredMessage], provider: Provider) -> Vec<ChatMessage> {
    messages
        .iter()
        .filter(|m| {
            if m.role.is_user() {
                m.provider.is_none() || m.provider == Some(provider)
            } else {
                m.provider == Some(provider)
            }
        })
        .map(|m| ChatMessage::new(m.role.as_str(), m.content.clone()))
        .collect()
}
