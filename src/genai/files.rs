//! Files API: upload a local document for grounding, reference it, delete it.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::genai::chat_runtime::send_with_retry;
use crate::genai::client::GeminiClient;
use crate::genai::error::GenAiError;
use crate::genai::types::{Content, GenerateRequest, GenerateResponse, Part};

/// Metadata of a file stored by the Files API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    /// Resource name, e.g. `files/abc123`.
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<String>,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub state: Option<String>,
}

impl UploadedFile {
    /// Part referencing this file inside a prompt.
    pub fn as_part(&self) -> Part {
        Part::file_data(self.mime_type.clone(), self.uri.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub display_name: Option<String>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileEnvelope {
    file: UploadedFile,
}

/// Result of [`query_with_upload`].
#[derive(Debug, Clone)]
pub struct UploadedAnswer {
    pub file: UploadedFile,
    pub response: GenerateResponse,
}

/// Best-effort MIME type from the file extension.
pub fn guess_mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "pdf" => "application/pdf",
        "json" => "application/json",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        _ => "text/plain",
    }
}

pub(crate) fn read_local_file(path: &Path) -> Result<Vec<u8>, GenAiError> {
    fs::read(path).map_err(|source| {
        if source.kind() == ErrorKind::NotFound {
            GenAiError::FileNotFound(path.to_path_buf())
        } else {
            GenAiError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

impl GeminiClient {
    /// Uploads `path` with the resumable protocol and returns the stored file.
    pub async fn upload_file(
        &self,
        path: &Path,
        options: &UploadOptions,
    ) -> Result<UploadedFile, GenAiError> {
        let bytes = read_local_file(path)?;
        let mime_type = options
            .mime_type
            .clone()
            .unwrap_or_else(|| guess_mime_type(path).to_string());
        let display_name = options.display_name.clone().unwrap_or_else(|| {
            path.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload".to_string())
        });

        debug!(path = %path.display(), %mime_type, size = bytes.len(), "starting file upload");
        let start_url = self.url("upload/v1beta/files");
        let metadata = json!({ "file": { "display_name": display_name } });
        let start = send_with_retry(
            || {
                self.http
                    .post(&start_url)
                    .header("x-goog-api-key", &self.config.api_key)
                    .header("X-Goog-Upload-Protocol", "resumable")
                    .header("X-Goog-Upload-Command", "start")
                    .header("X-Goog-Upload-Header-Content-Length", bytes.len().to_string())
                    .header("X-Goog-Upload-Header-Content-Type", mime_type.as_str())
                    .json(&metadata)
            },
            self.retry_config(),
        )
        .await?;

        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or(GenAiError::EmptyResponse("an upload URL"))?;

        let finished = send_with_retry(
            || {
                self.http
                    .post(&upload_url)
                    .header("x-goog-api-key", &self.config.api_key)
                    .header("X-Goog-Upload-Offset", "0")
                    .header("X-Goog-Upload-Command", "upload, finalize")
                    .body(bytes.clone())
            },
            self.retry_config(),
        )
        .await?;

        let envelope: FileEnvelope = finished
            .json()
            .await
            .map_err(|err| GenAiError::Decode(err.to_string()))?;
        info!(name = %envelope.file.name, "file uploaded");
        Ok(envelope.file)
    }

    /// Deletes a stored file by resource name.
    pub async fn delete_file(&self, name: &str) -> Result<(), GenAiError> {
        let url = self.url(&format!("v1beta/{name}"));
        send_with_retry(
            || {
                self.http
                    .delete(&url)
                    .header("x-goog-api-key", &self.config.api_key)
            },
            self.retry_config(),
        )
        .await?;
        info!(name, "file deleted");
        Ok(())
    }
}

/// Uploads `path`, asks `prompt` about it, and deletes the upload whatever the
/// generation outcome.
pub async fn query_with_upload(
    client: &GeminiClient,
    path: &Path,
    options: &UploadOptions,
    model: &str,
    prompt: &str,
) -> Result<UploadedAnswer, GenAiError> {
    let file = client.upload_file(path, options).await?;

    let request = GenerateRequest::new(vec![Content::user(vec![
        Part::text(prompt),
        file.as_part(),
    ])]);
    let generated = client.generate(model, &request).await;
    let cleanup = client.delete_file(&file.name).await;

    match (generated, cleanup) {
        (Ok(response), Ok(())) => Ok(UploadedAnswer { file, response }),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(cleanup_err)) => {
            warn!(name = %file.name, error = %cleanup_err, "failed to delete uploaded file");
            Err(err)
        }
    }
}
