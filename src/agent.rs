//! Context-injecting agent: retrieve, compose, then chat with tools.

use tracing::info;

use crate::genai::{ChatReply, ChatSession, GenAiError};
use crate::retrieval::{ContextOutcome, ContextProvider, ContextSource, gather_context};

pub const SCIENCE_PERSONA: &str = "You are a highly professional, academic physics assistant. \
Your tone must be formal, serious, and concise. You MUST decline non-scientific questions politely.";

pub const CORPORATE_PERSONA: &str = "You are a highly professional Corporate Information Assistant. \
You must answer questions using external tools if possible, otherwise rely on your general knowledge. \
Maintain a formal, concise tone.";

pub const DATA_PERSONA: &str = "You are a highly professional Corporate Information Assistant. \
You will translate user requests into SQL queries and provide only data-driven answers. \
Maintain a formal, concise tone.";

/// Builds the single prompt sent to the chat: context block, blank line, instruction.
pub fn compose_prompt(source: ContextSource, context: &str, question: &str) -> String {
    format!(
        "{}: {context}\n\nBased ONLY on the {} and your available tools, answer the user's question: {question}",
        source.label(),
        source.reference()
    )
}

#[derive(Debug, Clone)]
pub struct AgentReply {
    pub text: String,
    pub outcome: ContextOutcome,
    pub prompt: String,
}

/// Routes questions through an optional context provider into a tool-enabled chat.
pub struct UltimateAgent {
    session: ChatSession,
    source: ContextSource,
    provider: Option<Box<dyn ContextProvider>>,
}

impl UltimateAgent {
    pub fn new(
        session: ChatSession,
        source: ContextSource,
        provider: Option<Box<dyn ContextProvider>>,
    ) -> Self {
        Self {
            session,
            source,
            provider,
        }
    }

    pub fn source(&self) -> ContextSource {
        self.source
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    /// Gathers context for `question`, injects it and returns the chat's trimmed answer.
    pub async fn run_query(&mut self, question: &str) -> Result<AgentReply, GenAiError> {
        let outcome = gather_context(self.source, self.provider.as_deref(), question).await;
        let branch = match &outcome {
            ContextOutcome::Retrieved(_) => "retrieved",
            ContextOutcome::Failed { .. } => "failed",
            ContextOutcome::Unavailable => "unavailable",
        };
        info!(source = self.source.as_str(), branch, "context gathered");

        let prompt = compose_prompt(self.source, &outcome.text(self.source), question);
        let reply = self.session.send_message(prompt.clone()).await?;
        Ok(AgentReply {
            text: reply.text.trim().to_string(),
            outcome,
            prompt,
        })
    }

    /// Sends `question` to the chat without gathering context.
    pub async fn ask_direct(&mut self, question: &str) -> Result<ChatReply, GenAiError> {
        self.session.send_message(question).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_prompt_places_context_before_question() {
        let prompt = compose_prompt(ContextSource::Sql, "Sales leads.", "Who earns most?");
        assert_eq!(
            prompt,
            "DATA CONTEXT: Sales leads.\n\nBased ONLY on the DATA CONTEXT and your available tools, \
             answer the user's question: Who earns most?"
        );
    }

    #[test]
    fn rag_prompt_uses_policy_label() {
        let prompt = compose_prompt(
            ContextSource::Rag,
            ContextSource::Rag.unavailable_text(),
            "Mileage rate?",
        );
        assert!(prompt.starts_with("CONTEXT (from company policy): POLICY DATA UNAVAILABLE."));
        assert!(prompt.contains("Based ONLY on the CONTEXT and your available tools"));
    }
}
