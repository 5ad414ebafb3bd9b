//! Polychat is a multi-provider chat backend: one durable conversation
//! store, a stateless SSE gateway in front of six LLM providers, and an
//! orchestrator that fans a single user message out to every enabled
//! provider in parallel.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the provider catalog, model resolution, per-chat session
//!   state, the streaming ingestion engine, and the fan-out orchestrator.
//! - [`gateway`] is the axum HTTP surface that translates each provider's
//!   native streaming API into one uniform SSE vocabulary.
//! - [`store`] persists API keys, projects, chats, and messages as JSON
//!   collection files on disk.
//! - [`api`] defines the wire payloads shared by the gateway and the
//!   ingestion side.
//! - [`utils`] carries the URL and auth-header helpers both sides use.
//!
//! The binary crate (`src/main.rs`) loads configuration, serves the gateway
//! router, and exposes store export/import maintenance commands.

pub mod api;
pub mod core;
pub mod gateway;
pub mod store;
pub mod utils;
