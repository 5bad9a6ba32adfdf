//! Gemini API walkthrough: prompting, multimodal input, structured output,
//! tool-calling chat, file grounding, retrieval and a context-injecting agent.

pub mod agent;
pub mod commands;
pub mod config;
pub mod genai;
pub mod logging;
pub mod retrieval;
pub mod weather;
