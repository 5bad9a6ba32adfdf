use std::env;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::genai::chat_runtime::{RetryConfig, send_with_retry};
use crate::genai::error::GenAiError;
use crate::genai::streaming::parse_sse_stream;
use crate::genai::types::{
    Candidate, Content, GenerateRequest, GenerateResponse, Part, UsageMetadata,
};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

const API_KEY_ENVS: [&str; 2] = ["GEMINI_API_KEY", "GOOGLE_API_KEY"];

/// Connection settings for [`GeminiClient`].
#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub api_base: String,
    pub timeout_secs: Option<u64>,
    pub retries: u32,
    pub retry_delay_ms: u64,
}

impl fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("timeout_secs", &self.timeout_secs)
            .field("retries", &self.retries)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .finish()
    }
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            timeout_secs: None,
            retries: 0,
            retry_delay_ms: 500,
        }
    }

    /// Reads the key from `GEMINI_API_KEY`, then `GOOGLE_API_KEY`.
    pub fn from_env() -> Result<Self, GenAiError> {
        API_KEY_ENVS
            .iter()
            .find_map(|name| env::var(name).ok().filter(|value| !value.trim().is_empty()))
            .map(Self::new)
            .ok_or(GenAiError::MissingApiKey {
                key_env: API_KEY_ENVS[0],
            })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout_secs: Option<u64>) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_retries(mut self, retries: u32, retry_delay_ms: u64) -> Self {
        self.retries = retries;
        self.retry_delay_ms = retry_delay_ms;
        self
    }
}

/// True when one of the accepted API key variables holds a non-blank value.
pub fn is_api_key_present() -> bool {
    API_KEY_ENVS.iter().any(|name| {
        env::var(name)
            .ok()
            .is_some_and(|value| !value.trim().is_empty())
    })
}

/// Gemini REST client.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    pub(crate) config: GeminiConfig,
    pub(crate) http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, GenAiError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    pub(crate) fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            timeout_secs: self.config.timeout_secs,
            retries: self.config.retries,
            retry_delay_ms: self.config.retry_delay_ms,
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base, path.trim_start_matches('/'))
    }

    pub(crate) fn model_url(&self, model: &str, method: &str) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        self.url(&format!("v1beta/models/{model}:{method}"))
    }

    pub(crate) async fn post_json<B, T>(&self, url: &str, body: &B) -> Result<T, GenAiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = send_with_retry(
            || {
                self.http
                    .post(url)
                    .header("x-goog-api-key", &self.config.api_key)
                    .json(body)
            },
            self.retry_config(),
        )
        .await?;

        response
            .json::<T>()
            .await
            .map_err(|err| GenAiError::Decode(err.to_string()))
    }

    /// Single-shot generation.
    pub async fn generate(
        &self,
        model: &str,
        request: &GenerateRequest,
    ) -> Result<GenerateResponse, GenAiError> {
        debug!(model, turns = request.contents.len(), "gemini generateContent");
        let url = self.model_url(model, "generateContent");
        self.post_json(&url, request).await
    }

    /// Streams a generation, handing each text delta to `on_chunk` as it arrives.
    ///
    /// The returned response aggregates the streamed text into one part and
    /// keeps every function call in arrival order.
    pub async fn generate_stream(
        &self,
        model: &str,
        request: &GenerateRequest,
        mut on_chunk: impl FnMut(&str),
    ) -> Result<GenerateResponse, GenAiError> {
        debug!(model, turns = request.contents.len(), "gemini streamGenerateContent");
        let url = format!("{}?alt=sse", self.model_url(model, "streamGenerateContent"));
        let response = send_with_retry(
            || {
                self.http
                    .post(&url)
                    .header("x-goog-api-key", &self.config.api_key)
                    .json(request)
            },
            self.retry_config(),
        )
        .await?;

        let mut text = String::new();
        let mut calls = Vec::new();
        let mut usage: Option<UsageMetadata> = None;
        let mut finish_reason = None;

        parse_sse_stream(response, |event| {
            let chunk: GenerateResponse = serde_json::from_str(&event.data)
                .map_err(|err| GenAiError::Decode(err.to_string()))?;
            if let Some(candidate) = chunk.candidates.first() {
                if let Some(content) = &candidate.content {
                    for part in &content.parts {
                        if part.thought.unwrap_or(false) {
                            continue;
                        }
                        if let Some(delta) = part.text.as_deref().filter(|t| !t.is_empty()) {
                            text.push_str(delta);
                            on_chunk(delta);
                        }
                        if part.function_call.is_some() {
                            calls.push(part.clone());
                        }
                    }
                }
                if candidate.finish_reason.is_some() {
                    finish_reason = candidate.finish_reason.clone();
                }
            }
            if chunk.usage_metadata.is_some() {
                usage = chunk.usage_metadata;
            }
            Ok(())
        })
        .await?;

        let mut parts = Vec::with_capacity(calls.len() + 1);
        if !text.is_empty() {
            parts.push(Part::text(text));
        }
        parts.extend(calls);
        if parts.is_empty() {
            return Err(GenAiError::EmptyResponse("streamed content"));
        }

        Ok(GenerateResponse {
            candidates: vec![Candidate {
                content: Some(Content::model(parts)),
                finish_reason,
            }],
            usage_metadata: usage,
            model_version: None,
        })
    }

    /// Counts the input tokens `contents` would cost for `model`.
    pub async fn count_tokens(&self, model: &str, contents: &[Content]) -> Result<u32, GenAiError> {
        #[derive(Serialize)]
        struct CountTokensRequest<'a> {
            contents: &'a [Content],
        }

        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct CountTokensResponse {
            #[serde(default)]
            total_tokens: u32,
        }

        let url = self.model_url(model, "countTokens");
        let body: CountTokensResponse = self.post_json(&url, &CountTokensRequest { contents }).await?;
        Ok(body.total_tokens)
    }
}
