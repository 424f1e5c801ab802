//! String-keyed access to [`UserConfig`] for `config set` and friends.

use std::path::PathBuf;

use super::data::UserConfig;
use super::io::ConfigError;
use crate::clients::Platform;

pub const KEYS: [&str; 10] = [
    "platform",
    "url",
    "model",
    "temperature",
    "top_p",
    "max_steps",
    "workspace_dir",
    "region",
    "anthropic_url",
    "max_tokens",
];

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn parse_http_url(key: &str, value: &str) -> Result<String, ConfigError> {
    let url = reqwest::Url::parse(value).map_err(|err| invalid(key, err.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(key, "expected an http or https URL"));
    }
    Ok(value.to_string())
}

fn parse_unit_interval(key: &str, value: &str, max: f32) -> Result<f32, ConfigError> {
    let parsed: f32 = value
        .parse()
        .map_err(|_| invalid(key, format!("'{value}' is not a number")))?;
    if !(0.0..=max).contains(&parsed) {
        return Err(invalid(key, format!("must be between 0 and {max}")));
    }
    Ok(parsed)
}

fn non_empty(key: &str, value: &str) -> Result<String, ConfigError> {
    if value.is_empty() {
        return Err(invalid(key, "must not be empty"));
    }
    Ok(value.to_string())
}

impl UserConfig {
    /// Set one field from its textual form, validating it first.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        match key {
            "platform" => {
                self.platform = value.parse::<Platform>().map_err(|err| invalid(key, err))?;
            }
            "url" => self.url = parse_http_url(key, value)?,
            "model" => self.model = Some(non_empty(key, value)?),
            "temperature" => self.temperature = parse_unit_interval(key, value, 2.0)?,
            "top_p" => self.top_p = parse_unit_interval(key, value, 1.0)?,
            "max_steps" => {
                self.max_steps = value
                    .parse()
                    .ok()
                    .filter(|n: &usize| *n > 0)
                    .ok_or_else(|| invalid(key, "expected a positive integer"))?;
            }
            "workspace_dir" => self.workspace_dir = Some(PathBuf::from(non_empty(key, value)?)),
            "region" => self.region = non_empty(key, value)?,
            "anthropic_url" => self.anthropic_url = parse_http_url(key, value)?,
            "max_tokens" => {
                self.max_tokens = value
                    .parse()
                    .ok()
                    .filter(|n: &u32| *n > 0)
                    .ok_or_else(|| invalid(key, "expected a positive integer"))?;
            }
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        Ok(())
    }

    /// Restore one field to its default.
    pub fn unset(&mut self, key: &str) -> Result<(), ConfigError> {
        let defaults = UserConfig::default();
        match key {
            "platform" => self.platform = defaults.platform,
            "url" => self.url = defaults.url,
            "model" => self.model = defaults.model,
            "temperature" => self.temperature = defaults.temperature,
            "top_p" => self.top_p = defaults.top_p,
            "max_steps" => self.max_steps = defaults.max_steps,
            "workspace_dir" => self.workspace_dir = defaults.workspace_dir,
            "region" => self.region = defaults.region,
            "anthropic_url" => self.anthropic_url = defaults.anthropic_url,
            "max_tokens" => self.max_tokens = defaults.max_tokens,
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        Ok(())
    }

    /// Current value of `key` as shown to the user.
    pub fn get(&self, key: &str) -> Result<String, ConfigError> {
        let value = match key {
            "platform" => self.platform.to_string(),
            "url" => self.url.clone(),
            "model" => match &self.model {
                Some(model) => model.clone(),
                None => format!("{} (platform default)", self.model_or_default()),
            },
            "temperature" => self.temperature.to_string(),
            "top_p" => self.top_p.to_string(),
            "max_steps" => self.max_steps.to_string(),
            "workspace_dir" => match self.resolved_workspace_dir() {
                Ok(dir) => super::data::path_display(dir),
                Err(_) => "(unavailable)".to_string(),
            },
            "region" => self.region.clone(),
            "anthropic_url" => self.anthropic_url.clone(),
            "max_tokens" => self.max_tokens.to_string(),
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        };
        Ok(value)
    }
}
