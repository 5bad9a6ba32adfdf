//! CLI command handlers. Each `run` returns a human-readable error string.

pub mod agent;
pub mod ask;
pub mod chat;
pub mod config;
pub mod describe;
pub mod extract;
pub mod rag;
pub mod upload;

use std::env;
use std::fmt::Display;
use std::fs;
use std::io::{self, IsTerminal, Read};
use std::path::Path;
use std::str::FromStr;

use clap::Args;
use owo_colors::OwoColorize;
use tracing::debug;

use crate::config::{ProfileConfig, load_optional_profile};
use crate::genai::client::{DEFAULT_API_BASE, is_api_key_present};
use crate::genai::{DEFAULT_MODEL, GeminiClient, GeminiConfig};
use crate::logging;

pub const BUILD_SHA: &str = env!("GEMLAB_GIT_SHA");
pub const BUILD_TS: &str = env!("GEMLAB_BUILD_TS");

const DEFAULT_RETRY_DELAY_MS: u64 = 500;

pub fn version_text() -> String {
    format!(
        "{} {}\ncommit: {BUILD_SHA}\nbuilt: {BUILD_TS}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )
}

/// Log verbosity flags accepted by every command.
#[derive(Debug, Args, Clone, Copy, Default)]
pub struct LogArgs {
    /// Debug logs on stderr (API keys are never printed)
    #[arg(long)]
    pub verbose: bool,
    /// Silence logs and usage lines; fatal errors stay visible
    #[arg(long)]
    pub quiet: bool,
}

impl LogArgs {
    pub fn init(self) {
        logging::init(self.verbose, self.quiet);
    }
}

/// Model and connection options shared by the non-`ask` commands.
#[derive(Debug, Args, Clone, Default)]
pub struct ModelArgs {
    /// Model name (e.g. gemini-2.5-flash)
    #[arg(long)]
    pub model: Option<String>,
    /// Profile name from the config file
    #[arg(long)]
    pub profile: Option<String>,
    /// Request timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
    /// Retries for 429/5xx and transport errors
    #[arg(long)]
    pub retries: Option<u32>,
    /// Base retry delay in milliseconds
    #[arg(long = "retry-delay")]
    pub retry_delay: Option<u64>,
}

/// Model plus client settings after applying CLI > env > profile > defaults.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub profile: ProfileConfig,
    pub model: String,
    pub api_base: String,
    pub timeout_secs: Option<u64>,
    pub retries: u32,
    pub retry_delay_ms: u64,
}

impl Resolved {
    pub fn client(&self) -> Result<GeminiClient, String> {
        debug!(
            model = %self.model,
            api_base = %self.api_base,
            api_key_present = is_api_key_present(),
            "resolved client settings"
        );
        let config = GeminiConfig::from_env()
            .map_err(|err| err.to_string())?
            .with_api_base(self.api_base.clone())
            .with_timeout(self.timeout_secs)
            .with_retries(self.retries, self.retry_delay_ms);
        GeminiClient::new(config).map_err(|err| err.to_string())
    }
}

impl ModelArgs {
    pub fn resolve(&self) -> Result<Resolved, String> {
        let profile = load_optional_profile(self.profile.as_deref())?;
        resolve_settings(
            profile,
            self.model.clone(),
            self.timeout,
            self.retries,
            self.retry_delay,
        )
    }
}

pub(crate) fn resolve_settings(
    profile: ProfileConfig,
    model: Option<String>,
    timeout: Option<u64>,
    retries: Option<u32>,
    retry_delay: Option<u64>,
) -> Result<Resolved, String> {
    let model = model
        .or_else(|| env_value("GEMLAB_MODEL"))
        .or_else(|| profile.model.clone())
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let api_base = env_value("GEMLAB_API_BASE")
        .or_else(|| profile.api_base.clone())
        .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
    let timeout_secs = first_some(timeout, parse_env("GEMLAB_TIMEOUT")?, profile.timeout);
    let retries = first_some(retries, parse_env("GEMLAB_RETRIES")?, profile.retries).unwrap_or(0);
    let retry_delay_ms = first_some(
        retry_delay,
        parse_env("GEMLAB_RETRY_DELAY")?,
        profile.retry_delay,
    )
    .unwrap_or(DEFAULT_RETRY_DELAY_MS);

    Ok(Resolved {
        profile,
        model,
        api_base,
        timeout_secs,
        retries,
        retry_delay_ms,
    })
}

pub(crate) fn first_some<T>(cli: Option<T>, env: Option<T>, profile: Option<T>) -> Option<T> {
    cli.or(env).or(profile)
}

pub(crate) fn env_value(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn parse_env<T>(name: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: Display,
{
    match env_value(name) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|err| format!("Invalid {name} '{raw}': {err}")),
        None => Ok(None),
    }
}

/// Uses the argument when present, otherwise reads stdin when it is piped.
pub(crate) fn read_prompt(arg: Option<String>) -> Result<String, String> {
    if let Some(prompt) = arg.filter(|value| !value.trim().is_empty()) {
        return Ok(prompt);
    }
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Err("No prompt provided. Pass it as an argument or via stdin.".to_string());
    }
    let mut buffer = String::new();
    stdin
        .lock()
        .read_to_string(&mut buffer)
        .map_err(|err| format!("Failed to read prompt from stdin: {err}"))?;
    let prompt = buffer.trim_end_matches(['\n', '\r']).to_string();
    if prompt.trim().is_empty() {
        return Err("No prompt provided. Pass it as an argument or via stdin.".to_string());
    }
    Ok(prompt)
}

/// Writes `contents` to `path`, creating missing parent directories.
pub(crate) fn save_output(path: &Path, contents: &str) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| {
            format!(
                "Failed to create output directory '{}': {err}",
                parent.display()
            )
        })?;
    }
    fs::write(path, contents)
        .map_err(|err| format!("Failed to write output file '{}': {err}", path.display()))
}

/// Section title, colored only when stdout is a terminal.
pub(crate) fn heading(title: &str) -> String {
    if io::stdout().is_terminal() {
        format!("{}", title.bold().cyan())
    } else {
        title.to_string()
    }
}

pub(crate) fn dimmed(text: &str) -> String {
    if io::stdout().is_terminal() {
        format!("{}", text.dimmed())
    } else {
        text.to_string()
    }
}
