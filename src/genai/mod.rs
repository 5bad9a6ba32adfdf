//! Thin wrappers over the Gemini REST API.
//!
//! The module contains typed request/response models, a retrying HTTP client,
//! chat sessions with automatic function calling, the Files API, embeddings,
//! and response-schema helpers used by the CLI commands.

/// Chat sessions and conversation history.
pub mod chat;
pub(crate) mod chat_runtime;
/// Client configuration and generation endpoints.
pub mod client;
/// Embedding model client.
pub mod embeddings;
pub mod error;
/// Files API helpers.
pub mod files;
/// Structured output schemas.
pub mod schema;
pub mod streaming;
/// Tool declarations and the local tool registry.
pub mod tools;
/// Wire types shared by all endpoints.
pub mod types;

pub use chat::{ChatConfig, ChatReply, ChatSession};
pub use client::{DEFAULT_MODEL, GeminiClient, GeminiConfig};
pub use error::GenAiError;
pub use tools::ToolRegistry;
