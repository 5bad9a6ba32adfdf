use clap::Args;
use tracing::debug;

use crate::commands::{LogArgs, ModelArgs, heading, read_prompt};
use crate::genai::schema::ProductReview;
use crate::genai::types::{Content, GenerateRequest, GenerationConfig, Part};

pub const SAMPLE_REVIEW: &str = "I bought this laptop last month. The battery life is amazing, \
10 hours easily! It does get hot when I game, which is annoying. The screen quality is perfect \
for video editing. I wish the keyboard was quieter.";

const EXTRACT_INSTRUCTION: &str =
    "Analyze the following user review and extract the structured data:";

#[derive(Debug, Args, Clone)]
pub struct ExtractArgs {
    /// Review text; read from stdin when omitted
    pub review: Option<String>,
    /// Use the bundled laptop review
    #[arg(long, conflicts_with = "review")]
    pub sample: bool,
    /// Print the parsed record as JSON
    #[arg(long)]
    pub json: bool,
    #[command(flatten)]
    pub model: ModelArgs,
    #[command(flatten)]
    pub log: LogArgs,
}

pub fn extraction_request(review: &str) -> GenerateRequest {
    GenerateRequest::new(vec![Content::user(vec![
        Part::text(EXTRACT_INSTRUCTION),
        Part::text(review),
    ])])
    .with_generation_config(GenerationConfig::default().with_json_schema(&ProductReview::schema()))
}

pub fn render_review(review: &ProductReview) -> Vec<String> {
    vec![
        format!("Product: {}", review.product_name),
        format!("Score: {}/10", review.sentiment_score),
        format!("Pros: {}", review.key_pros.join("; ")),
        format!("Cons: {}", review.key_cons.join("; ")),
    ]
}

pub async fn run(args: ExtractArgs) -> Result<(), String> {
    args.log.init();

    let review = if args.sample {
        SAMPLE_REVIEW.to_string()
    } else {
        read_prompt(args.review)?
    };

    let settings = args.model.resolve()?;
    let client = settings.client()?;
    let response = client
        .generate(&settings.model, &extraction_request(&review))
        .await
        .map_err(|err| err.to_string())?;
    debug!(raw = %response.text(), "structured output");

    let parsed: ProductReview = response
        .parsed()
        .map_err(|err| format!("Failed to parse JSON response: {err}"))?;
    parsed
        .validate()
        .map_err(|err| format!("Structured output failed validation: {err}"))?;

    if args.json {
        let encoded = serde_json::to_string_pretty(&parsed)
            .map_err(|err| format!("Failed to encode review: {err}"))?;
        println!("{encoded}");
        return Ok(());
    }

    println!("{}", heading("--- JSON DATA EXTRACTED ---"));
    for line in render_review(&parsed) {
        println!("{line}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_schema_and_both_parts() {
        let request = extraction_request(SAMPLE_REVIEW);
        assert_eq!(request.contents[0].parts.len(), 2);
        assert_eq!(
            request.generation_config.response_mime_type.as_deref(),
            Some("application/json")
        );
        let schema = request
            .generation_config
            .response_schema
            .expect("schema attached");
        assert_eq!(schema["properties"]["sentiment_score"]["type"], "INTEGER");
    }

    #[test]
    fn review_renders_one_line_per_field() {
        let review = ProductReview {
            product_name: "Aero 14 Laptop".to_string(),
            sentiment_score: 7,
            key_pros: vec!["battery".to_string(), "screen".to_string()],
            key_cons: vec!["heat".to_string()],
        };
        assert_eq!(
            render_review(&review),
            vec![
                "Product: Aero 14 Laptop",
                "Score: 7/10",
                "Pros: battery; screen",
                "Cons: heat",
            ]
        );
    }
}
