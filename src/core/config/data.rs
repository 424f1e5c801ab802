use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::io::ConfigError;
use crate::clients::{anthropic, bedrock, ollama, Platform};

pub const DEFAULT_TEMPERATURE: f32 = 0.0;
pub const DEFAULT_TOP_P: f32 = 0.9;
pub const DEFAULT_MAX_STEPS: usize = 10;
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

fn default_url() -> String {
    ollama::DEFAULT_URL.to_string()
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_top_p() -> f32 {
    DEFAULT_TOP_P
}

fn default_max_steps() -> usize {
    DEFAULT_MAX_STEPS
}

fn default_region() -> String {
    bedrock::DEFAULT_REGION.to_string()
}

fn default_anthropic_url() -> String {
    anthropic::DEFAULT_URL.to_string()
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

/// Persisted user settings. Every field has a default so partial files load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub platform: Platform,
    /// Ollama generate endpoint.
    #[serde(default = "default_url")]
    pub url: String,
    /// Model id; when unset the platform's default model is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    /// Tool invocations allowed per exchange.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Root for the file tools; defaults to `<data dir>/workspace`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_dir: Option<PathBuf>,
    /// AWS region for Bedrock.
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_anthropic_url")]
    pub anthropic_url: String,
    /// Anthropic `max_tokens`; the Messages API requires one.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            platform: Platform::default(),
            url: default_url(),
            model: None,
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            max_steps: DEFAULT_MAX_STEPS,
            workspace_dir: None,
            region: default_region(),
            anthropic_url: default_anthropic_url(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl UserConfig {
    pub fn model_or_default(&self) -> &str {
        self.model
            .as_deref()
            .filter(|model| !model.trim().is_empty())
            .unwrap_or_else(|| self.platform.default_model())
    }

    /// Directory the file tools operate in.
    pub fn resolved_workspace_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.workspace_dir {
            Some(dir) => Ok(dir.clone()),
            None => super::io::default_workspace_dir(),
        }
    }
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
