use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Instant;

use clap::Args;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::commands::{
    LogArgs, Resolved, env_value, first_some, parse_env, read_prompt, resolve_settings,
    save_output, version_text,
};
use crate::config::{OUTPUT_MODES, load_optional_profile};
use crate::genai::client::is_api_key_present;
use crate::genai::types::{GenerateRequest, GenerateResponse, GenerationConfig, UsageMetadata};

#[derive(Debug, Args, Clone)]
pub struct AskArgs {
    /// Prompt text; read from stdin when omitted
    pub prompt: Option<String>,
    /// Model name (default gemini-2.5-flash)
    #[arg(long)]
    pub model: Option<String>,
    /// System instruction
    #[arg(long)]
    pub system: Option<String>,
    #[arg(long)]
    pub temperature: Option<f32>,
    #[arg(long = "max-tokens")]
    pub max_tokens: Option<u32>,
    /// Request timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
    #[arg(long)]
    pub retries: Option<u32>,
    /// Base retry delay in milliseconds
    #[arg(long = "retry-delay")]
    pub retry_delay: Option<u64>,
    /// Output mode
    #[arg(long, value_parser = OUTPUT_MODES)]
    pub output: Option<String>,
    /// Shorthand for --output json
    #[arg(long)]
    pub json: bool,
    /// Print text as it is generated
    #[arg(long)]
    pub stream: bool,
    /// Also write the JSON record to this file
    #[arg(long)]
    pub save: Option<PathBuf>,
    /// Print the request without calling the API
    #[arg(long = "dry-run")]
    pub dry_run: bool,
    /// Print token usage on stderr
    #[arg(long = "show-usage")]
    pub show_usage: bool,
    #[arg(long)]
    pub profile: Option<String>,
    /// Print build metadata
    #[arg(long)]
    pub version: bool,
    #[command(flatten)]
    pub log: LogArgs,
}

/// Fully resolved invocation.
#[derive(Debug)]
struct AskPlan {
    settings: Resolved,
    prompt: String,
    system: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    output: String,
    show_usage: bool,
}

impl AskPlan {
    fn request(&self) -> GenerateRequest {
        GenerateRequest::prompt(self.prompt.clone())
            .with_system_instruction(self.system.clone())
            .with_generation_config(GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
                ..GenerationConfig::default()
            })
    }

    fn messages(&self) -> Vec<Value> {
        let mut messages = Vec::new();
        if let Some(system) = &self.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": self.prompt}));
        messages
    }

    fn request_options(&self) -> Value {
        json!({
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "timeout_secs": self.settings.timeout_secs,
            "retries": self.settings.retries,
            "retry_delay_ms": self.settings.retry_delay_ms,
        })
    }

    fn dry_run_record(&self) -> Value {
        json!({
            "dry_run": true,
            "model": self.settings.model,
            "api_base": self.settings.api_base,
            "output": self.output,
            "messages": self.messages(),
            "request": self.request_options(),
            "body": self.request(),
        })
    }

    fn response_record(&self, response: &GenerateResponse, latency_ms: u128) -> Value {
        json!({
            "model": self.settings.model,
            "model_version": response.model_version,
            "output": self.output,
            "messages": self.messages(),
            "request": self.request_options(),
            "text": response.text(),
            "finish_reason": response.candidates.first().and_then(|c| c.finish_reason.clone()),
            "usage": response.usage_metadata,
            "latency_ms": latency_ms,
        })
    }
}

pub async fn run(args: AskArgs) -> Result<(), String> {
    if args.version {
        println!("{}", version_text());
        return Ok(());
    }
    args.log.init();

    let plan = resolve(args.clone())?;
    debug!(
        model = %plan.settings.model,
        output = %plan.output,
        api_key_present = is_api_key_present(),
        "ask configuration"
    );

    if args.dry_run {
        let record = plan.dry_run_record();
        let encoded = serde_json::to_string(&record)
            .map_err(|err| format!("Failed to encode dry-run request: {err}"))?;
        println!("{encoded}");
        if let Some(path) = &args.save {
            save_output(path, &encoded)?;
        }
        if plan.show_usage && !args.log.quiet {
            eprintln!("usage: unavailable latency_ms=0 (dry-run)");
        }
        return Ok(());
    }

    let client = plan.settings.client()?;
    let request = plan.request();
    let started = Instant::now();

    let live = args.stream && plan.output == "text";
    let response = if args.stream {
        let mut stdout = io::stdout();
        let response = client
            .generate_stream(&plan.settings.model, &request, |chunk| {
                if live {
                    let _ = write!(stdout, "{chunk}");
                    let _ = stdout.flush();
                }
            })
            .await
            .map_err(|err| err.to_string())?;
        if live {
            println!();
        }
        response
    } else {
        client
            .generate(&plan.settings.model, &request)
            .await
            .map_err(|err| err.to_string())?
    };
    let latency_ms = started.elapsed().as_millis();
    info!(latency_ms, "ask completed");

    let record = plan.response_record(&response, latency_ms);
    if plan.output == "json" {
        let encoded = serde_json::to_string(&record)
            .map_err(|err| format!("Failed to encode response: {err}"))?;
        println!("{encoded}");
    } else if !live {
        println!("{}", response.text().trim_end());
    }

    if let Some(path) = &args.save {
        let encoded = serde_json::to_string_pretty(&record)
            .map_err(|err| format!("Failed to encode response: {err}"))?;
        save_output(path, &encoded)?;
    }

    if plan.show_usage && !args.log.quiet {
        eprintln!("{}", usage_line(response.usage_metadata.as_ref(), latency_ms));
    }
    Ok(())
}

fn resolve(args: AskArgs) -> Result<AskPlan, String> {
    let profile = load_optional_profile(args.profile.as_deref())?;
    let prompt = read_prompt(args.prompt)?;

    let system = args
        .system
        .or_else(|| env_value("GEMLAB_SYSTEM"))
        .or_else(|| profile.system.clone());
    let temperature = first_some(
        args.temperature,
        parse_env("GEMLAB_TEMPERATURE")?,
        profile.temperature,
    );
    let max_tokens = first_some(
        args.max_tokens,
        parse_env("GEMLAB_MAX_TOKENS")?,
        profile.max_tokens,
    );

    let env_output = env_value("GEMLAB_OUTPUT");
    if let Some(value) = env_output.as_deref() {
        if !OUTPUT_MODES.contains(&value) {
            return Err(format!(
                "Invalid GEMLAB_OUTPUT '{value}'. Supported values: text, json."
            ));
        }
    }
    let output = if args.json {
        "json".to_string()
    } else {
        args.output
            .or(env_output)
            .or_else(|| profile.output.clone())
            .unwrap_or_else(|| "text".to_string())
    };
    let show_usage = args.show_usage || profile.show_usage.unwrap_or(false);

    let settings = resolve_settings(
        profile,
        args.model,
        args.timeout,
        args.retries,
        args.retry_delay,
    )?;

    Ok(AskPlan {
        settings,
        prompt,
        system,
        temperature,
        max_tokens,
        output,
        show_usage,
    })
}

fn usage_line(usage: Option<&UsageMetadata>, latency_ms: u128) -> String {
    match usage {
        Some(usage) => format!(
            "usage: prompt_tokens={} completion_tokens={} thoughts_tokens={} total_tokens={} latency_ms={latency_ms}",
            count(usage.prompt_token_count),
            count(usage.candidates_token_count),
            count(usage.thoughts_token_count),
            count(usage.total_token_count),
        ),
        None => format!("usage: unavailable latency_ms={latency_ms}"),
    }
}

fn count(value: Option<u32>) -> String {
    value.map_or_else(|| "-".to_string(), |n| n.to_string())
}
