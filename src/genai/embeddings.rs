use serde::{Deserialize, Serialize};

use crate::genai::client::GeminiClient;
use crate::genai::error::GenAiError;
use crate::genai::types::Content;

pub const DEFAULT_EMBEDDING_MODEL: &str = "models/embedding-001";

/// Gemini embeddings client.
#[derive(Debug, Clone)]
pub struct GeminiEmbeddings {
    client: GeminiClient,
    model: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: String,
    content: Content,
    task_type: &'a str,
}

#[derive(Deserialize)]
struct EmbedContentResponse {
    embedding: EmbeddingValues,
}

#[derive(Deserialize)]
struct EmbeddingValues {
    #[serde(default)]
    values: Vec<f32>,
}

impl GeminiEmbeddings {
    /// Creates an embedder sharing `client`'s connection settings.
    pub fn new(client: GeminiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Embeds a search query.
    pub async fn embed_query(&self, input: &str) -> Result<Vec<f32>, GenAiError> {
        self.embed(input, "RETRIEVAL_QUERY").await
    }

    /// Embeds a document chunk for storage.
    pub async fn embed_document(&self, input: &str) -> Result<Vec<f32>, GenAiError> {
        self.embed(input, "RETRIEVAL_DOCUMENT").await
    }

    async fn embed(&self, input: &str, task_type: &str) -> Result<Vec<f32>, GenAiError> {
        let model = if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        };
        let url = self.client.model_url(&model, "embedContent");
        let body: EmbedContentResponse = self
            .client
            .post_json(
                &url,
                &EmbedContentRequest {
                    model,
                    content: Content::instruction(input),
                    task_type,
                },
            )
            .await?;

        if body.embedding.values.is_empty() {
            return Err(GenAiError::EmptyResponse("embedding values"));
        }
        Ok(body.embedding.values)
    }
}
