use std::path::PathBuf;

use reqwest::StatusCode;

/// Errors raised by the Gemini client wrappers.
#[derive(Debug, thiserror::Error)]
pub enum GenAiError {
    #[error("{key_env} is not set in the environment")]
    MissingApiKey { key_env: &'static str },
    #[error("gemini request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("gemini API error {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("gemini response did not contain {0}")]
    EmptyResponse(&'static str),
    #[error("failed to decode gemini response: {0}")]
    Decode(String),
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid image: {0}")]
    Image(String),
    #[error("stream interrupted: {0}")]
    Stream(String),
}

impl GenAiError {
    /// Short class name, used where an error is folded into prompt text.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingApiKey { .. } => "MissingApiKey",
            Self::Request(_) => "RequestError",
            Self::Api { status, .. } if *status == StatusCode::TOO_MANY_REQUESTS => {
                "ResourceExhausted"
            }
            Self::Api { .. } => "ApiError",
            Self::EmptyResponse(_) => "EmptyResponse",
            Self::Decode(_) => "DecodeError",
            Self::FileNotFound(_) => "FileNotFound",
            Self::Io { .. } => "IoError",
            Self::Image(_) => "ImageError",
            Self::Stream(_) => "StreamError",
        }
    }
}
