pub mod chat_stream;
pub mod config;
pub mod models;
pub mod orchestrator;
pub mod providers;
pub mod session;
