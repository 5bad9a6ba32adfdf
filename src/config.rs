use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;

use serde::Deserialize;

pub const OUTPUT_MODES: [&str; 2] = ["text", "json"];

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProfileConfig {
    pub model: Option<String>,
    pub system: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout: Option<u64>,
    pub retries: Option<u32>,
    pub retry_delay: Option<u64>,
    pub output: Option<String>,
    pub show_usage: Option<bool>,
    pub api_base: Option<String>,
    pub embedding_model: Option<String>,
    pub chroma_url: Option<String>,
    pub collection: Option<String>,
    pub data_dir: Option<String>,
    pub database_url: Option<String>,
    pub tables: Option<Vec<String>>,
    pub top_k: Option<usize>,
}

impl ProfileConfig {
    fn validate(&self, name: &str) -> Result<(), String> {
        if let Some(output) = self.output.as_deref() {
            if !OUTPUT_MODES.contains(&output) {
                return Err(format!(
                    "Invalid profile output '{output}' in profile '{name}'. Supported values: text, json."
                ));
            }
        }
        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(format!(
                    "Invalid profile temperature '{temperature}' in profile '{name}'. Expected 0.0..=2.0."
                ));
            }
        }
        if self.top_k == Some(0) {
            return Err(format!("Invalid profile top_k '0' in profile '{name}'."));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    profiles: Option<HashMap<String, ProfileConfig>>,
}

pub fn load_profile(name: &str) -> Result<ProfileConfig, String> {
    let path = config_path()?;
    let profiles = read_profiles(&path)?;

    let profile = profiles.get(name).cloned().ok_or_else(|| {
        format!(
            "Profile '{}' not found in config file '{}'.",
            name,
            path.display()
        )
    })?;
    profile.validate(name)?;
    Ok(profile)
}

/// Loads `name` when given; no profile means every field falls back to defaults.
pub fn load_optional_profile(name: Option<&str>) -> Result<ProfileConfig, String> {
    match name {
        Some(name) => load_profile(name),
        None => Ok(ProfileConfig::default()),
    }
}

/// Parses the config file and checks one profile, or all of them.
pub fn validate_config(profile: Option<&str>) -> Result<PathBuf, String> {
    let path = config_path()?;
    let profiles = read_profiles(&path)?;

    match profile {
        Some(name) => {
            let selected = profiles.get(name).ok_or_else(|| {
                format!(
                    "Profile '{}' not found in config file '{}'.",
                    name,
                    path.display()
                )
            })?;
            selected.validate(name)?;
        }
        None => {
            let mut names: Vec<&String> = profiles.keys().collect();
            names.sort();
            for name in names {
                profiles[name].validate(name)?;
            }
        }
    }
    Ok(path)
}

fn read_profiles(path: &PathBuf) -> Result<HashMap<String, ProfileConfig>, String> {
    let raw = fs::read_to_string(path)
        .map_err(|err| format!("Failed to read config file '{}': {err}", path.display()))?;

    let config: ConfigFile = toml::from_str(&raw)
        .map_err(|err| format!("Failed to parse config file '{}': {err}", path.display()))?;

    config.profiles.ok_or_else(|| {
        format!(
            "Config file '{}' does not contain a [profiles] section.",
            path.display()
        )
    })
}

pub fn config_path() -> Result<PathBuf, String> {
    if let Ok(path) = env::var("GEMLAB_CONFIG") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }

    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let trimmed = xdg.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed).join("gemlab").join("config.toml"));
        }
    }

    let home = env::var("HOME").map_err(|_| {
        "Cannot resolve config path: set GEMLAB_CONFIG or HOME/XDG_CONFIG_HOME.".to_string()
    })?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("gemlab")
        .join("config.toml"))
}
