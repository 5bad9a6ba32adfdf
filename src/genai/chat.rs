//! Stateful chat sessions with automatic function calling.
//!
//! The REST API is stateless, so the session owns the ordered turn history
//! and replays it on every request. Model function calls are executed through
//! the session's [`ToolRegistry`] and fed back as function-response turns until
//! the model answers in plain text or the round limit is reached.

use tracing::{debug, warn};

use crate::genai::client::GeminiClient;
use crate::genai::error::GenAiError;
use crate::genai::tools::ToolRegistry;
use crate::genai::types::{
    Content, FunctionCall, GenerateRequest, GenerateResponse, GenerationConfig, Part, Role,
    ToolBlock, UsageMetadata,
};

pub const DEFAULT_MAX_TOOL_ROUNDS: u32 = 10;

/// Settings fixed for the lifetime of a chat session.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub model: String,
    pub system_instruction: Option<String>,
    pub tools: ToolRegistry,
    pub generation: GenerationConfig,
    pub max_tool_rounds: u32,
}

impl ChatConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_instruction: None,
            tools: ToolRegistry::new(),
            generation: GenerationConfig::default(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_system_instruction(mut self, instruction: Option<String>) -> Self {
        self.system_instruction = instruction.filter(|text| !text.trim().is_empty());
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: u32) -> Self {
        self.max_tool_rounds = rounds;
        self
    }
}

/// Final answer of one `send_message` exchange.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub text: String,
    pub tool_calls: Vec<FunctionCall>,
    pub usage: Option<UsageMetadata>,
}

/// A conversation bound to one model, persona and tool set.
#[derive(Debug)]
pub struct ChatSession {
    client: GeminiClient,
    config: ChatConfig,
    history: Vec<Content>,
    last_usage: Option<UsageMetadata>,
}

impl GeminiClient {
    /// Opens a chat session that reuses this client's connection settings.
    pub fn chat(&self, config: ChatConfig) -> ChatSession {
        ChatSession {
            client: self.clone(),
            config,
            history: Vec::new(),
            last_usage: None,
        }
    }
}

type ChunkSink<'a> = Option<&'a mut (dyn FnMut(&str) + Send)>;

impl ChatSession {
    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn history(&self) -> &[Content] {
        &self.history
    }

    /// Usage metadata of the most recent model response.
    pub fn last_usage(&self) -> Option<&UsageMetadata> {
        self.last_usage.as_ref()
    }

    /// Sends a user message and returns the model's final text.
    ///
    /// On error the history is rolled back to its state before the call.
    pub async fn send_message(&mut self, message: impl Into<String>) -> Result<ChatReply, GenAiError> {
        self.exchange(message.into(), None).await
    }

    /// Like [`send_message`](Self::send_message), streaming text deltas to `on_chunk`.
    pub async fn send_message_stream(
        &mut self,
        message: impl Into<String>,
        on_chunk: &mut (dyn FnMut(&str) + Send),
    ) -> Result<ChatReply, GenAiError> {
        self.exchange(message.into(), Some(on_chunk)).await
    }

    async fn exchange(&mut self, message: String, on_chunk: ChunkSink<'_>) -> Result<ChatReply, GenAiError> {
        let checkpoint = self.history.len();
        self.history.push(Content::user_text(message));

        match self.run_rounds(on_chunk).await {
            Ok(reply) => Ok(reply),
            Err(err) => {
                self.history.truncate(checkpoint);
                Err(err)
            }
        }
    }

    async fn run_rounds(&mut self, mut on_chunk: ChunkSink<'_>) -> Result<ChatReply, GenAiError> {
        let mut executed = Vec::new();
        let mut rounds = 0;

        loop {
            let request = self.build_request();
            let response = match on_chunk.as_deref_mut() {
                Some(sink) => {
                    self.client
                        .generate_stream(&self.config.model, &request, |delta| sink(delta))
                        .await?
                }
                None => self.client.generate(&self.config.model, &request).await?,
            };
            let content = model_turn(&response)?;
            self.last_usage = response.usage_metadata.clone();

            let calls = content.function_calls();
            if calls.is_empty() || self.config.tools.is_empty() {
                let text = content.text();
                self.history.push(content);
                return Ok(ChatReply {
                    text,
                    tool_calls: executed,
                    usage: self.last_usage.clone(),
                });
            }

            rounds += 1;
            if rounds > self.config.max_tool_rounds {
                warn!(rounds, "tool round limit reached; returning partial answer");
                let text = content.text();
                if !text.is_empty() {
                    self.history.push(Content::model(vec![Part::text(text.clone())]));
                }
                return Ok(ChatReply {
                    text,
                    tool_calls: executed,
                    usage: self.last_usage.clone(),
                });
            }

            self.history.push(content);
            let responses = calls
                .iter()
                .map(|call| {
                    debug!(tool = %call.name, args = %call.args, "executing tool");
                    Part::function_response(call.name.clone(), self.config.tools.invoke_to_response(call))
                })
                .collect();
            self.history.push(Content::user(responses));
            executed.extend(calls);
        }
    }

    fn build_request(&self) -> GenerateRequest {
        let mut request = GenerateRequest::new(self.history.clone())
            .with_system_instruction(self.config.system_instruction.clone())
            .with_generation_config(self.config.generation.clone());
        if !self.config.tools.is_empty() {
            request.tools = vec![ToolBlock::from_functions(&self.config.tools.functions())];
        }
        request
    }

    /// Counts the tokens the current history would cost as input.
    pub async fn count_history_tokens(&self, model: Option<&str>) -> Result<u32, GenAiError> {
        let model = model.unwrap_or(&self.config.model);
        self.client.count_tokens(model, &self.history).await
    }

    /// Keeps the most recent `keep` turns, then drops leading turns until the
    /// history starts at a user prompt. Returns how many turns were removed.
    pub fn truncate_history(&mut self, keep: usize) -> usize {
        truncate_turns(&mut self.history, keep)
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    pub fn render_history(&self) -> Vec<String> {
        render_history(&self.history)
    }
}

fn model_turn(response: &GenerateResponse) -> Result<Content, GenAiError> {
    let mut content = response
        .content()
        .cloned()
        .ok_or(GenAiError::EmptyResponse("a candidate"))?;
    content.role = Some(Role::Model);
    Ok(content)
}

pub(crate) fn truncate_turns(history: &mut Vec<Content>, keep: usize) -> usize {
    let before = history.len();
    if before <= keep {
        return 0;
    }
    history.drain(..before - keep);
    while history.first().is_some_and(|turn| !turn.is_user_prompt()) {
        history.remove(0);
    }
    before - history.len()
}

/// One header line per turn followed by one indented line per part.
pub fn render_history(history: &[Content]) -> Vec<String> {
    let mut lines = Vec::new();
    for (index, turn) in history.iter().enumerate() {
        let role = turn.role.map(Role::as_str).unwrap_or("system");
        lines.push(format!("[Turn {index} - {}]", role.to_uppercase()));
        for part in &turn.parts {
            if let Some(text) = &part.text {
                lines.push(format!("    > TEXT: '{text}'"));
            } else if let Some(call) = &part.function_call {
                lines.push(format!("    > FUNCTION CALL: {}({})", call.name, call.args));
            } else if let Some(response) = &part.function_response {
                lines.push(format!(
                    "    > FUNCTION RESPONSE: {} -> {}",
                    response.name, response.response
                ));
            } else if let Some(blob) = &part.inline_data {
                lines.push(format!("    > INLINE DATA: {}", blob.mime_type));
            } else if let Some(file) = &part.file_data {
                lines.push(format!("    > FILE: {}", file.file_uri));
            }
            if let Some(signature) = &part.thought_signature {
                lines.push(format!("    > THOUGHT: signature of {} chars", signature.len()));
            }
        }
    }
    lines
}
