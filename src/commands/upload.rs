use std::path::PathBuf;

use clap::Args;

use crate::commands::{LogArgs, ModelArgs, heading};
use crate::genai::files::{UploadOptions, query_with_upload};

pub const DEFAULT_UPLOAD_PROMPT: &str = "Based *only* on the provided report, what was the primary \
quantitative finding in Q3, and what is the specific recommendation to mitigate the second main \
risk? Respond in bullet points.";

#[derive(Debug, Args, Clone)]
pub struct UploadArgs {
    /// Local file to upload for the duration of one query
    pub file: PathBuf,
    /// Display name stored with the upload
    #[arg(long = "display-name")]
    pub display_name: Option<String>,
    /// MIME type (guessed from the extension when omitted)
    #[arg(long = "mime-type")]
    pub mime_type: Option<String>,
    #[arg(long, default_value = DEFAULT_UPLOAD_PROMPT)]
    pub prompt: String,
    #[command(flatten)]
    pub model: ModelArgs,
    #[command(flatten)]
    pub log: LogArgs,
}

pub async fn run(args: UploadArgs) -> Result<(), String> {
    args.log.init();

    if !args.file.is_file() {
        return Err(format!(
            "File not found. Please ensure '{}' exists.",
            args.file.display()
        ));
    }

    let settings = args.model.resolve()?;
    let client = settings.client()?;
    let options = UploadOptions {
        display_name: args.display_name.clone(),
        mime_type: args.mime_type.clone(),
    };

    println!("Uploading {} and querying {}...", args.file.display(), settings.model);
    let answer = query_with_upload(&client, &args.file, &options, &settings.model, &args.prompt)
        .await
        .map_err(|err| err.to_string())?;

    println!("File: {} ({})", answer.file.name, answer.file.uri);
    println!("{}", heading("--- MODEL ANALYSIS ---"));
    println!("{}", answer.response.text().trim_end());
    println!("Uploaded file '{}' deleted.", answer.file.name);
    Ok(())
}
