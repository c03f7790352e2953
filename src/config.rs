//! Chatvine Configuration
//!
//! Loads and saves configuration from `~/.chatvine/config.json`. Secrets can
//! be supplied via environment variables instead of the file.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Config file name within the chatvine directory.
const CONFIG_FILENAME: &str = "config.json";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ChatvineConfig {
    /// Base URL of the OpenAI-compatible chat API.
    pub api_url: String,
    /// API key; `CHATVINE_API_KEY` overrides the file value.
    pub api_key: String,
    pub model: String,
    /// Completion token cap per model call.
    pub max_response_tokens: u32,
    /// Prompt token budget; 0 means use the model's full context window.
    pub context_budget: usize,
    pub db_path: String,
    /// WolframAlpha app id for the compute tool; `CHATVINE_WOLFRAM_APP_ID`
    /// overrides. Empty disables the tool's backend (calls fail softly).
    pub wolfram_app_id: String,
    pub system_prompt: String,
    pub max_tool_rounds: u32,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub log_level: String,
}

impl Default for ChatvineConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com".to_string(),
            api_key: String::new(),
            model: "gpt-4o".to_string(),
            max_response_tokens: 4096,
            context_budget: 0,
            db_path: "~/.chatvine/log.db".to_string(),
            wolfram_app_id: String::new(),
            system_prompt: "You are a concise assistant. Use the available tools when a question needs current information or exact computation.".to_string(),
            max_tool_rounds: 5,
            retry_max_attempts: 3,
            retry_base_delay_ms: 500,
            log_level: "info".to_string(),
        }
    }
}

/// Returns the chatvine directory: `~/.chatvine`.
pub fn get_chatvine_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/root"))
        .join(".chatvine")
}

/// Returns the full path to the config file: `~/.chatvine/config.json`.
pub fn get_config_path() -> PathBuf {
    get_chatvine_dir().join(CONFIG_FILENAME)
}

/// Load the config from disk, fill unset fields with defaults, and apply
/// environment overrides. A missing file yields plain defaults so the CLI
/// can run against env vars alone.
pub fn load_config() -> ChatvineConfig {
    let config_path = get_config_path();
    let mut config: ChatvineConfig = fs::read_to_string(&config_path)
        .ok()
        .and_then(|contents| serde_json::from_str(&contents).ok())
        .unwrap_or_default();

    let defaults = ChatvineConfig::default();
    if config.api_url.is_empty() {
        config.api_url = defaults.api_url;
    }
    if config.model.is_empty() {
        config.model = defaults.model;
    }
    if config.max_response_tokens == 0 {
        config.max_response_tokens = defaults.max_response_tokens;
    }
    if config.db_path.is_empty() {
        config.db_path = defaults.db_path;
    }
    if config.max_tool_rounds == 0 {
        config.max_tool_rounds = defaults.max_tool_rounds;
    }
    if config.retry_max_attempts == 0 {
        config.retry_max_attempts = defaults.retry_max_attempts;
    }

    if let Ok(key) = std::env::var("CHATVINE_API_KEY") {
        if !key.is_empty() {
            config.api_key = key;
        }
    }
    if let Ok(app_id) = std::env::var("CHATVINE_WOLFRAM_APP_ID") {
        if !app_id.is_empty() {
            config.wolfram_app_id = app_id;
        }
    }

    config
}

/// Save the config to disk at `~/.chatvine/config.json`.
///
/// The directory is created with mode 0o700 and the file written with mode
/// 0o600 since it may contain API keys.
pub fn save_config(config: &ChatvineConfig) -> Result<()> {
    let dir = get_chatvine_dir();
    if !dir.exists() {
        fs::create_dir_all(&dir).context("Failed to create chatvine directory")?;
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))?;
    }

    let config_path = get_config_path();
    let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;

    fs::write(&config_path, &json).context("Failed to write config file")?;
    fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;

    Ok(())
}

/// Resolve a path that may start with `~` to an absolute path.
pub fn resolve_path(p: &str) -> String {
    if let Some(rest) = p.strip_prefix('~') {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"));
        let rest = rest.strip_prefix('/').unwrap_or(rest);
        home.join(rest).to_string_lossy().to_string()
    } else {
        p.to_string()
    }
}
