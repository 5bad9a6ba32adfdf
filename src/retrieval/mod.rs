//! Context providers and the fallback policy used by the agent.
//!
//! A provider turns a question into a short text summary (a vector search over
//! indexed documents, or a text-to-SQL round trip). When the provider is
//! missing or fails, a fixed sentinel string stands in for its output.

pub mod rag;
pub mod sql;

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::genai::GenAiError;

/// Errors raised while retrieving context.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Model(#[from] GenAiError),
    #[error("vector store error: {0}")]
    VectorStore(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("refusing to run non read-only SQL: {0}")]
    UnsafeSql(String),
    #[error("model did not return a SQL query")]
    EmptySql,
    #[error("table '{0}' does not exist")]
    UnknownTable(String),
    #[error("no documents found in '{}'", .0.display())]
    NoDocuments(PathBuf),
    #[error("failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl RetrievalError {
    /// Short class name folded into the failure sentinel.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Model(err) => err.kind(),
            Self::VectorStore(_) => "VectorStoreError",
            Self::Database(_) => "DatabaseError",
            Self::UnsafeSql(_) => "UnsafeSql",
            Self::EmptySql => "EmptySql",
            Self::UnknownTable(_) => "UnknownTable",
            Self::NoDocuments(_) => "NoDocuments",
            Self::Io { .. } => "IoError",
        }
    }
}

/// Something that can answer a question with context text.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn retrieve(&self, question: &str) -> Result<String, RetrievalError>;
}

/// Kind of context injected into the agent prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextSource {
    Sql,
    Rag,
}

impl ContextSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sql => "sql",
            Self::Rag => "rag",
        }
    }

    /// Prefix of the context block in the final prompt.
    pub fn label(self) -> &'static str {
        match self {
            Self::Sql => "DATA CONTEXT",
            Self::Rag => "CONTEXT (from company policy)",
        }
    }

    /// How the instruction line refers back to the context block.
    pub fn reference(self) -> &'static str {
        match self {
            Self::Sql => "DATA CONTEXT",
            Self::Rag => "CONTEXT",
        }
    }

    pub fn unavailable_text(self) -> &'static str {
        match self {
            Self::Sql => "SQL DATA UNAVAILABLE. Cannot access the database.",
            Self::Rag => "POLICY DATA UNAVAILABLE. Cannot access company policy documents.",
        }
    }

    pub fn failure_text(self, kind: &str) -> String {
        match self {
            Self::Sql => format!("SQL Query failed: Could not process request. Error: {kind}"),
            Self::Rag => {
                format!("Policy lookup failed: Could not process request. Error: {kind}")
            }
        }
    }
}

/// Which branch of the fallback policy produced the context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextOutcome {
    Retrieved(String),
    Failed { kind: &'static str, message: String },
    Unavailable,
}

impl ContextOutcome {
    /// Text injected into the prompt for this outcome.
    pub fn text(&self, source: ContextSource) -> String {
        match self {
            Self::Retrieved(text) => text.clone(),
            Self::Failed { kind, .. } => source.failure_text(kind),
            Self::Unavailable => source.unavailable_text().to_string(),
        }
    }
}

/// Asks `provider` for context; a missing or failing provider degrades to a sentinel.
pub async fn gather_context(
    source: ContextSource,
    provider: Option<&dyn ContextProvider>,
    question: &str,
) -> ContextOutcome {
    let Some(provider) = provider else {
        info!(source = source.as_str(), "context provider not initialized; skipping");
        return ContextOutcome::Unavailable;
    };

    match provider.retrieve(question).await {
        Ok(text) => ContextOutcome::Retrieved(text.trim().to_string()),
        Err(err) => {
            warn!(source = source.as_str(), error = %err, "context retrieval failed");
            ContextOutcome::Failed {
                kind: err.kind(),
                message: err.to_string(),
            }
        }
    }
}
