use async_stream::try_stream;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::lines::{Framing, JsonLines};
use super::{
    next_chunk, or_abort, status_error, Platform, SamplingParams, StreamError, StreamingClient,
    TextStream,
};
use crate::core::message::{Message, Role};
use crate::utils::url::construct_api_url;

pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20240620";
pub const DEFAULT_URL: &str = "https://api.anthropic.com/v1";
pub const API_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Turn>,
}

#[derive(Debug, PartialEq, Serialize)]
struct Turn {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockDelta { delta: Delta },
    MessageStop,
    Error { error: ApiError },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

/// Map the conversation onto the Messages API shape.
///
/// The leading System message becomes `system`. The API has no mid-thread
/// system role, so later System messages travel as tagged user turns, and
/// adjacent turns with the same role are merged.
fn to_turns(messages: &[Message]) -> (Option<String>, Vec<Turn>) {
    let (system, rest) = match messages.split_first() {
        Some((first, rest)) if first.role.is_system() => (Some(first.content.clone()), rest),
        _ => (None, messages),
    };

    let mut turns: Vec<Turn> = Vec::new();
    for message in rest {
        let (role, content) = match message.role {
            Role::System => ("user", format!("[system] {}", message.content)),
            Role::User => ("user", message.content.clone()),
            Role::Assistant => ("assistant", message.content.clone()),
        };
        if role == "assistant" && content.is_empty() {
            continue;
        }
        match turns.last_mut() {
            Some(last) if last.role == role => {
                last.content.push_str("\n\n");
                last.content.push_str(&content);
            }
            _ => turns.push(Turn { role, content }),
        }
    }
    (system, turns)
}

pub struct AnthropicClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    params: SamplingParams,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn new(
        http: reqwest::Client,
        base_url: String,
        api_key: String,
        model: String,
        params: SamplingParams,
        max_tokens: u32,
    ) -> Self {
        Self {
            http,
            base_url,
            api_key,
            model,
            params,
            max_tokens,
        }
    }
}

impl StreamingClient for AnthropicClient {
    fn platform(&self) -> Platform {
        Platform::Anthropic
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn stream(&self, messages: &[Message], cancel: CancellationToken) -> TextStream {
        let (system, turns) = to_turns(messages);
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.params.temperature,
            top_p: self.params.top_p,
            stream: true,
            system,
            messages: turns,
        };
        let url = construct_api_url(&self.base_url, "messages");
        debug!(%url, model = %self.model, turns = body.messages.len(), "Starting Anthropic stream");
        let request = self
            .http
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body);
        Box::pin(sse_stream(request, cancel))
    }
}

enum Step {
    Text,
    Skip,
    Stop,
}

fn apply(event: StreamEvent, text: &mut String) -> Result<Step, StreamError> {
    match event {
        StreamEvent::ContentBlockDelta {
            delta: Delta::TextDelta { text: delta },
        } => {
            text.push_str(&delta);
            Ok(Step::Text)
        }
        StreamEvent::MessageStop => Ok(Step::Stop),
        StreamEvent::Error { error } => Err(StreamError::Remote(if error.kind.is_empty() {
            error.message
        } else {
            format!("{}: {}", error.kind, error.message)
        })),
        StreamEvent::ContentBlockDelta { .. } | StreamEvent::Other => Ok(Step::Skip),
    }
}

fn sse_stream(
    request: reqwest::RequestBuilder,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<String, StreamError>> + Send + 'static {
    try_stream! {
        let response = or_abort(&cancel, request.send()).await??;
        if !response.status().is_success() {
            Err::<(), _>(status_error(response).await)?;
            return;
        }

        let mut body = response.bytes_stream();
        let mut decoder = JsonLines::new(Framing::ServerSentEvents);
        let mut text = String::new();

        while let Some(bytes) = next_chunk(&mut body, &cancel).await? {
            for event in decoder.push::<StreamEvent>(&bytes) {
                match apply(event, &mut text)? {
                    Step::Text => yield text.clone(),
                    Step::Skip => {}
                    Step::Stop => return,
                }
            }
        }

        if let Some(event) = decoder.finish::<StreamEvent>() {
            if let Step::Text = apply(event, &mut text)? {
                yield text.clone();
            }
        }
    }
}
