//! The conversation store: four JSON-file collections with best-effort
//! persistence.
//!
//! Each collection lives in its own file and behind its own lock, so
//! concurrent engines writing different collections never contend and a
//! read-modify-write on one collection can never interleave with another
//! write to the same collection. No method holds more than one collection
//! lock at a time.
//!
//! Disk failures are logged and otherwise swallowed: the medium is local,
//! and callers do not branch on persistence errors.

use std::error::Error;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::providers::Provider;

pub mod records;

pub use records::{ApiKey, Chat, Project, Role, StoredMessage};

use records::new_id;

const API_KEYS_FILE: &str = "api_keys.json";
const PROJECTS_FILE: &str = "projects.json";
const CHATS_FILE: &str = "chats.json";
const MESSAGES_FILE: &str = "messages.json";

/// Bulk export/import document. Collections absent from an import payload
/// are left untouched.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    api_keys: Option<Vec<ApiKey>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    projects: Option<Vec<Project>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    chats: Option<Vec<Chat>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    messages: Option<Vec<StoredMessage>>,
}

#[derive(Debug)]
pub struct ImportError;

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid data format")
    }
}

impl Error for ImportError {}

pub struct Store {
    dir: PathBuf,
    api_keys: Mutex<Vec<ApiKey>>,
    projects: Mutex<Vec<Project>>,
    chats: Mutex<Vec<Chat>>,
    messages: Mutex<Vec<StoredMessage>>,
}

impl Store {
    /// Open (or create) a store rooted at `dir`. Collections that are
    /// missing or fail to parse load as empty.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(e) = fs::create_dir_all(&dir) {
            warn!(dir = %dir.display(), error = %e, "could not create store directory");
        }
        Self {
            api_keys: Mutex::new(load_collection(&dir, API_KEYS_FILE)),
            projects: Mutex::new(load_collection(&dir, PROJECTS_FILE)),
            chats: Mutex::new(load_collection(&dir, CHATS_FILE)),
            messages: Mutex::new(load_collection(&dir, MESSAGES_FILE)),
            dir,
        }
    }

    // ── API keys ─────────────────────────────────────────────────────────

    pub fn api_keys(&self) -> Vec<ApiKey> {
        self.api_keys.lock().unwrap().clone()
    }

    pub fn api_key(&self, provider: Provider) -> Option<ApiKey> {
        self.api_keys
            .lock()
            .unwrap()
            .iter()
            .find(|k| k.provider == provider)
            .cloned()
    }

    /// Store a credential for `provider`, replacing any existing one.
    pub fn set_api_key(&self, provider: Provider, secret: impl Into<String>) -> ApiKey {
        let record = ApiKey {
            id: new_id(),
            provider,
            secret: secret.into(),
            created_at: Utc::now(),
        };
        let mut keys = self.api_keys.lock().unwrap();
        match keys.iter_mut().find(|k| k.provider == provider) {
            Some(existing) => *existing = record.clone(),
            None => keys.push(record.clone()),
        }
        self.persist(API_KEYS_FILE, &keys);
        record
    }

    pub fn delete_api_key(&self, provider: Provider) {
        let mut keys = self.api_keys.lock().unwrap();
        keys.retain(|k| k.provider != provider);
        self.persist(API_KEYS_FILE, &keys);
    }

    /// Providers that currently have a stored credential, in catalog order.
    pub fn providers_with_keys(&self) -> Vec<Provider> {
        let keys = self.api_keys.lock().unwrap();
        Provider::ALL
            .into_iter()
            .filter(|p| keys.iter().any(|k| k.provider == *p))
            .collect()
    }

    // ── Projects ─────────────────────────────────────────────────────────

    /// All projects, most recently updated first.
    pub fn projects(&self) -> Vec<Project> {
        let mut projects = self.projects.lock().unwrap().clone();
        projects.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        projects
    }

    pub fn project(&self, id: &str) -> Option<Project> {
        self.projects
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }

    pub fn create_project(
        &self,
        name: impl Into<String>,
        system_context: impl Into<String>,
    ) -> Project {
        let now = Utc::now();
        let project = Project {
            id: new_id(),
            name: name.into(),
            system_context: system_context.into(),
            created_at: now,
            updated_at: now,
        };
        let mut projects = self.projects.lock().unwrap();
        projects.push(project.clone());
        self.persist(PROJECTS_FILE, &projects);
        project
    }

    pub fn update_project(&self, id: &str, name: Option<&str>, system_context: Option<&str>) {
        let mut projects = self.projects.lock().unwrap();
        if let Some(project) = projects.iter_mut().find(|p| p.id == id) {
            if let Some(name) = name {
                project.name = name.to_string();
            }
            if let Some(system_context) = system_context {
                project.system_context = system_context.to_string();
            }
            project.updated_at = Utc::now();
            self.persist(PROJECTS_FILE, &projects);
        }
    }

    /// Delete a project along with its chats and their messages.
    pub fn delete_project(&self, id: &str) {
        {
            let mut projects = self.projects.lock().unwrap();
            projects.retain(|p| p.id != id);
            self.persist(PROJECTS_FILE, &projects);
        }
        let chat_ids: Vec<String> = {
            let chats = self.chats.lock().unwrap();
            chats
                .iter()
                .filter(|c| c.project_id.as_deref() == Some(id))
                .map(|c| c.id.clone())
                .collect()
        };
        for chat_id in chat_ids {
            self.delete_chat(&chat_id);
        }
    }

    // ── Chats ────────────────────────────────────────────────────────────

    /// All chats, most recently updated first.
    pub fn chats(&self) -> Vec<Chat> {
        let mut chats = self.chats.lock().unwrap().clone();
        chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        chats
    }

    pub fn chat(&self, id: &str) -> Option<Chat> {
        self.chats
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }

    pub fn create_chat(&self, title: impl Into<String>, project_id: Option<String>) -> Chat {
        let now = Utc::now();
        let chat = Chat {
            id: new_id(),
            title: title.into(),
            project_id,
            created_at: now,
            updated_at: now,
        };
        let mut chats = self.chats.lock().unwrap();
        chats.push(chat.clone());
        self.persist(CHATS_FILE, &chats);
        chat
    }

    pub fn update_chat_title(&self, id: &str, title: &str) {
        let mut chats = self.chats.lock().unwrap();
        if let Some(chat) = chats.iter_mut().find(|c| c.id == id) {
            chat.title = title.to_string();
            chat.updated_at = Utc::now();
            self.persist(CHATS_FILE, &chats);
        }
    }

    /// Delete a chat and exactly the messages that belong to it.
    pub fn delete_chat(&self, id: &str) {
        {
            let mut chats = self.chats.lock().unwrap();
            chats.retain(|c| c.id != id);
            self.persist(CHATS_FILE, &chats);
        }
        let mut messages = self.messages.lock().unwrap();
        messages.retain(|m| m.chat_id != id);
        self.persist(MESSAGES_FILE, &messages);
    }

    // ── Messages ─────────────────────────────────────────────────────────

    /// A chat's flat message sequence, oldest first. The sort is stable, so
    /// messages created in the same instant keep insertion order.
    pub fn messages(&self, chat_id: &str) -> Vec<StoredMessage> {
        let mut messages: Vec<StoredMessage> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        messages
    }

    /// Append a message and bump the owning chat's `updated_at`.
    pub fn add_message(
        &self,
        chat_id: &str,
        content: impl Into<String>,
        role: Role,
        provider: Option<Provider>,
    ) -> StoredMessage {
        let message = StoredMessage {
            id: new_id(),
            chat_id: chat_id.to_string(),
            content: content.into(),
            role,
            provider,
            created_at: Utc::now(),
        };
        {
            let mut messages = self.messages.lock().unwrap();
            messages.push(message.clone());
            self.persist(MESSAGES_FILE, &messages);
        }
        let mut chats = self.chats.lock().unwrap();
        if let Some(chat) = chats.iter_mut().find(|c| c.id == chat_id) {
            chat.updated_at = Utc::now();
            self.persist(CHATS_FILE, &chats);
        }
        message
    }

    // ── Bulk transfer ────────────────────────────────────────────────────

    /// One JSON document holding all four collections verbatim.
    pub fn export_data(&self) -> String {
        let document = TransferDocument {
            api_keys: Some(self.api_keys.lock().unwrap().clone()),
            projects: Some(self.projects.lock().unwrap().clone()),
            chats: Some(self.chats.lock().unwrap().clone()),
            messages: Some(self.messages.lock().unwrap().clone()),
        };
        serde_json::to_string_pretty(&document).unwrap_or_else(|e| {
            warn!(error = %e, "could not serialize export document");
            "{}".to_string()
        })
    }

    /// Overwrite each collection present in the payload. The whole payload
    /// is parsed up front, so a malformed document changes nothing.
    pub fn import_data(&self, json: &str) -> Result<(), ImportError> {
        let document: TransferDocument = serde_json::from_str(json).map_err(|_| ImportError)?;
        if let Some(api_keys) = document.api_keys {
            let mut guard = self.api_keys.lock().unwrap();
            *guard = api_keys;
            self.persist(API_KEYS_FILE, &guard);
        }
        if let Some(projects) = document.projects {
            let mut guard = self.projects.lock().unwrap();
            *guard = projects;
            self.persist(PROJECTS_FILE, &guard);
        }
        if let Some(chats) = document.chats {
            let mut guard = self.chats.lock().unwrap();
            *guard = chats;
            self.persist(CHATS_FILE, &guard);
        }
        if let Some(messages) = document.messages {
            let mut guard = self.messages.lock().unwrap();
            *guard = messages;
            self.persist(MESSAGES_FILE, &guard);
        }
        Ok(())
    }

    /// Drop everything from all four collections.
    pub fn clear_all(&self) {
        let mut api_keys = self.api_keys.lock().unwrap();
        api_keys.clear();
        self.persist(API_KEYS_FILE, &api_keys);
        drop(api_keys);

        let mut projects = self.projects.lock().unwrap();
        projects.clear();
        self.persist(PROJECTS_FILE, &projects);
        drop(projects);

        let mut chats = self.chats.lock().unwrap();
        chats.clear();
        self.persist(CHATS_FILE, &chats);
        drop(chats);

        let mut messages = self.messages.lock().unwrap();
        messages.clear();
        self.persist(MESSAGES_FILE, &messages);
    }

    fn persist<T: Serialize>(&self, file: &str, records: &[T]) {
        let path = self.dir.join(file);
        let contents = match serde_json::to_string_pretty(records) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(file, error = %e, "could not serialize collection");
                return;
            }
        };
        if let Err(e) = fs::write(&path, contents) {
            warn!(path = %path.display(), error = %e, "could not write collection");
        }
    }
}

fn load_collection<T: DeserializeOwned>(dir: &Path, file: &str) -> Vec<T> {
    let path = dir.join(file);
    if !path.exists() {
        return Vec::new();
    }
    match fs::read_to_string(&path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(records) => records,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not parse collection; starting empty");
                Vec::new()
            }
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read collection; starting empty");
            Vec::new()
        }
    }
}
