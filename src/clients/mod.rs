//! Streaming model backends behind one interface.
//!
//! Every backend turns a conversation into a stream of strings where each
//! item is the full response text received so far. Consumers replace what
//! they display with the latest item; they never concatenate items.

pub mod anthropic;
pub mod bedrock;
pub mod lines;
pub mod ollama;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use futures_core::Stream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::core::config::data::UserConfig;
use crate::core::credentials;
use crate::core::message::Message;

pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, StreamError>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Ollama,
    Aws,
    Anthropic,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Ollama, Platform::Aws, Platform::Anthropic];

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Ollama => "ollama",
            Platform::Aws => "aws",
            Platform::Anthropic => "anthropic",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Platform::Ollama => ollama::DEFAULT_MODEL,
            Platform::Aws => bedrock::DEFAULT_MODEL,
            Platform::Anthropic => anthropic::DEFAULT_MODEL,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!("unknown platform '{s}' (expected one of: ollama, aws, anthropic)")
            })
    }
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode response: {0}")]
    Decode(String),
    #[error("{0}")]
    Remote(String),
    #[error("stream aborted")]
    Aborted,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("missing credentials: {0}")]
    Credentials(String),
    #[error("could not build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
}

pub trait StreamingClient: Send + Sync {
    fn platform(&self) -> Platform;

    fn model(&self) -> &str;

    /// Start a new response for `messages`.
    ///
    /// The stream ends with `Err(StreamError::Aborted)` once `cancel` fires.
    fn stream(&self, messages: &[Message], cancel: CancellationToken) -> TextStream;
}

/// Build the backend selected by `config.platform`.
pub fn build_client(config: &UserConfig) -> Result<Arc<dyn StreamingClient>, ClientError> {
    let http = reqwest::Client::builder().build()?;
    let params = SamplingParams {
        temperature: config.temperature,
        top_p: config.top_p,
    };
    let model = config.model_or_default().to_string();

    let client: Arc<dyn StreamingClient> = match config.platform {
        Platform::Ollama => Arc::new(ollama::OllamaClient::new(
            http,
            config.url.clone(),
            model,
            params,
        )),
        Platform::Aws => {
            let creds = credentials::aws_credentials()?;
            Arc::new(bedrock::BedrockClient::new(
                http,
                config.region.clone(),
                model,
                params,
                creds,
            ))
        }
        Platform::Anthropic => {
            let api_key = credentials::anthropic_api_key()?;
            Arc::new(anthropic::AnthropicClient::new(
                http,
                config.anthropic_url.clone(),
                api_key,
                model,
                params,
                config.max_tokens,
            ))
        }
    };
    Ok(client)
}

/// Await `fut` unless `cancel` fires first.
pub(crate) async fn or_abort<F, T>(cancel: &CancellationToken, fut: F) -> Result<T, StreamError>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StreamError::Aborted),
        value = fut => Ok(value),
    }
}

/// Next body chunk, or `Aborted` if `cancel` fires while waiting.
pub(crate) async fn next_chunk<S, B>(
    body: &mut S,
    cancel: &CancellationToken,
) -> Result<Option<B>, StreamError>
where
    S: Stream<Item = Result<B, reqwest::Error>> + Unpin,
{
    match or_abort(cancel, body.next()).await? {
        Some(Ok(chunk)) => Ok(Some(chunk)),
        Some(Err(err)) => Err(StreamError::Transport(err)),
        None => Ok(None),
    }
}

/// Turn a non-success response into a `Status` error carrying a readable body.
pub(crate) async fn status_error(response: reqwest::Response) -> StreamError {
    let status = response.status().as_u16();
    let text = response
        .text()
        .await
        .unwrap_or_else(|_| "<no body>".to_string());
    StreamError::Status {
        status,
        body: format_api_error(&text),
    }
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.to_string()),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary.map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Reduce an error body to a one-line summary when it is JSON.
pub(crate) fn format_api_error(error_text: &str) -> String {
    let trimmed = error_text.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(summary) = extract_error_summary(&json_value) {
            if !summary.is_empty() {
                return summary;
            }
        }
        return json_value.to_string();
    }

    trimmed.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_parses_case_insensitively() {
        assert_eq!("Ollama".parse::<Platform>(), Ok(Platform::Ollama));
        assert_eq!(" aws ".parse::<Platform>(), Ok(Platform::Aws));
        assert_eq!("anthropic".parse::<Platform>(), Ok(Platform::Anthropic));
        assert!("openrouter".parse::<Platform>().is_err());
    }

    #[test]
    fn format_api_error_prefers_json_summary() {
        assert_eq!(
            format_api_error(r#"{"error":{"message":"model   overloaded","type":"x"}}"#),
            "model overloaded"
        );
        assert_eq!(format_api_error(r#"{"error":"model 'x' not found"}"#), "model 'x' not found");
        assert_eq!(format_api_error(r#"{"message":"denied"}"#), "denied");
        assert_eq!(format_api_error(r#"{"status":"failed"}"#), r#"{"status":"failed"}"#);
    }

    #[test]
    fn format_api_error_handles_plaintext_and_empty() {
        assert_eq!(format_api_error("  bad\n gateway "), "bad gateway");
        assert_eq!(format_api_error(""), "<empty>");
    }
}
