use std::path::PathBuf;

use clap::Args;
use tracing::info;

use crate::commands::{LogArgs, ModelArgs, heading};
use crate::genai::files::read_local_file;
use crate::genai::tools::encode_image_base64_from_bytes;
use crate::genai::types::{Content, GenerateRequest, Part};

pub const DEFAULT_DESCRIBE_PROMPT: &str = "Describe this image in detail and write a caption for it.";

#[derive(Debug, Args, Clone)]
pub struct DescribeArgs {
    /// Image file to send with the prompt
    pub image: PathBuf,
    /// Instruction sent after the image
    #[arg(long, default_value = DEFAULT_DESCRIBE_PROMPT)]
    pub prompt: String,
    #[command(flatten)]
    pub model: ModelArgs,
    #[command(flatten)]
    pub log: LogArgs,
}

/// Image part first, then the text instruction.
pub fn multimodal_request(image_base64: String, prompt: &str) -> GenerateRequest {
    GenerateRequest::new(vec![Content::user(vec![
        Part::inline_data("image/png", image_base64),
        Part::text(prompt),
    ])])
}

pub async fn run(args: DescribeArgs) -> Result<(), String> {
    args.log.init();

    let bytes = read_local_file(&args.image).map_err(|err| format!("Image error: {err}"))?;
    let encoded = encode_image_base64_from_bytes(&bytes).map_err(|err| err.to_string())?;

    let settings = args.model.resolve()?;
    let client = settings.client()?;
    info!(image = %args.image.display(), model = %settings.model, "sending multimodal prompt");

    let response = client
        .generate(&settings.model, &multimodal_request(encoded, &args.prompt))
        .await
        .map_err(|err| format!("API call failed: {err}"))?;

    println!("{}", heading("--- MULTIMODAL RESPONSE ---"));
    println!("{}", response.text().trim_end());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_precedes_instruction() {
        let request = multimodal_request("aGVsbG8=".to_string(), "Caption it.");
        let parts = &request.contents[0].parts;
        assert_eq!(parts.len(), 2);
        assert_eq!(
            parts[0].inline_data.as_ref().map(|blob| blob.mime_type.as_str()),
            Some("image/png")
        );
        assert_eq!(parts[1].text.as_deref(), Some("Caption it."));
    }
}
