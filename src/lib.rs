//! vibepath
//!
//! A conversation engine that helps a user iteratively define a learning path
//! (topic, subtopic, level) through multi-turn dialogue with a generative-text
//! backend, then produces practice questions derived from that path.
//!
//! The crate is organized around three components:
//! - [`parser`] turns free-form backend replies into structured results,
//! - [`store`] persists and restores conversation sessions,
//! - [`engine`] owns the conversation state machine and orchestrates both.
//!
//! The backend itself is injected through [`llm::TextGenerator`], and the
//! persistence substrate through [`store::KeyValueStore`], so the whole
//! orchestration layer can be driven in tests without network or disk.

pub mod config;
pub mod engine;
pub mod llm;
pub mod models;
pub mod parser;
pub mod prompt;
pub mod store;

pub use config::{Config, ConfigError};
pub use engine::ConversationEngine;
pub use llm::{GeminiClient, ModelTier, TextGenerator};
pub use models::{
    EngineState, LearningPath, Message, ParsedResponse, QAData, QAEntry, Sender, Session,
    SessionSummary,
};
pub use prompt::PromptTemplates;
pub use store::{InMemoryStore, JsonFileStore, KeyValueStore, SessionStore, StoreError};
