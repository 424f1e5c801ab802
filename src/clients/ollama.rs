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
use crate::core::message::Message;
use crate::core::prompt;

pub const DEFAULT_MODEL: &str = "llama3.1";
pub const DEFAULT_URL: &str = "http://localhost:11434/api/generate";

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    temperature: f32,
    top_p: f32,
    stream: bool,
    raw: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

pub struct OllamaClient {
    http: reqwest::Client,
    url: String,
    model: String,
    params: SamplingParams,
}

impl OllamaClient {
    pub fn new(http: reqwest::Client, url: String, model: String, params: SamplingParams) -> Self {
        Self {
            http,
            url,
            model,
            params,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl StreamingClient for OllamaClient {
    fn platform(&self) -> Platform {
        Platform::Ollama
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn stream(&self, messages: &[Message], cancel: CancellationToken) -> TextStream {
        let body = GenerateRequest {
            model: &self.model,
            prompt: prompt::render_for_completion(messages),
            temperature: self.params.temperature,
            top_p: self.params.top_p,
            stream: true,
            raw: true,
            options: GenerateOptions {
                temperature: self.params.temperature,
                top_p: self.params.top_p,
            },
        };
        debug!(url = %self.url, model = %self.model, prompt_len = body.prompt.len(), "Starting Ollama stream");
        let request = self.http.post(&self.url).json(&body);
        Box::pin(generate_stream(request, cancel))
    }
}

enum Step {
    Text,
    Done,
}

fn apply(chunk: GenerateChunk, text: &mut String) -> Result<Step, StreamError> {
    if let Some(error) = chunk.error {
        return Err(StreamError::Remote(error));
    }
    if chunk.done {
        return Ok(Step::Done);
    }
    text.push_str(&chunk.response);
    Ok(Step::Text)
}

fn generate_stream(
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
        let mut decoder = JsonLines::new(Framing::Plain);
        let mut text = String::new();

        while let Some(bytes) = next_chunk(&mut body, &cancel).await? {
            for chunk in decoder.push::<GenerateChunk>(&bytes) {
                match apply(chunk, &mut text)? {
                    Step::Text => yield text.clone(),
                    Step::Done => {
                        debug!(chars = text.len(), "Ollama stream finished");
                        return;
                    }
                }
            }
        }

        if let Some(chunk) = decoder.finish::<GenerateChunk>() {
            if let Step::Text = apply(chunk, &mut text)? {
                yield text.clone();
            }
        }
        debug!(chars = text.len(), "Ollama stream closed without done marker");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::{collect_stream, spawn_http_server, CannedResponse};
    use futures_util::StreamExt;

    fn client(url: String) -> OllamaClient {
        OllamaClient::new(
            reqwest::Client::new(),
            url,
            DEFAULT_MODEL.to_string(),
            SamplingParams {
                temperature: 0.0,
                top_p: 0.9,
            },
        )
    }

    #[tokio::test]
    async fn yields_cumulative_text_across_split_chunks() {
        let server = spawn_http_server(CannedResponse::ok(
            "application/x-ndjson",
            vec![
                br#"{"response":"Hel"#.to_vec(),
                b"lo\",\"done\":false}\n{\"response\":\" world\",\"done\":false}\n{\"done\":true}\n"
                    .to_vec(),
            ],
        ))
        .await;

        let stream = client(server.url.clone()).stream(
            &[Message::user("hi")],
            CancellationToken::new(),
        );
        let fragments = collect_stream(stream).await;
        let fragments: Vec<String> = fragments.into_iter().map(Result::unwrap).collect();
        assert_eq!(fragments, vec!["Hello".to_string(), "Hello world".to_string()]);
    }

    #[tokio::test]
    async fn sends_raw_prompt_and_sampling_parameters() {
        let server = spawn_http_server(CannedResponse::ok(
            "application/x-ndjson",
            vec![b"{\"done\":true}\n".to_vec()],
        ))
        .await;

        let stream = client(server.url.clone()).stream(
            &[Message::system("tools"), Message::user("2+2?")],
            CancellationToken::new(),
        );
        assert!(collect_stream(stream).await.is_empty());

        let request = server.request().await;
        assert!(request.head.starts_with("POST / HTTP/1.1"));
        let body: serde_json::Value = serde_json::from_str(&request.body).unwrap();
        assert_eq!(body["model"], "llama3.1");
        assert_eq!(body["stream"], true);
        assert_eq!(body["raw"], true);
        assert_eq!(body["top_p"].as_f64().unwrap() as f32, 0.9);
        let prompt = body["prompt"].as_str().unwrap();
        assert!(prompt.starts_with("<|begin_of_text|>"));
        assert!(prompt.contains("user<|end_header_id|>\n2+2?\n"));
    }

    #[tokio::test]
    async fn error_status_is_a_transport_level_failure() {
        let server = spawn_http_server(CannedResponse::status(
            404,
            r#"{"error":"model 'llama9' not found"}"#,
        ))
        .await;

        let stream = client(server.url.clone()).stream(&[], CancellationToken::new());
        let results = collect_stream(stream).await;
        assert_eq!(results.len(), 1);
        match &results[0] {
            Err(StreamError::Status { status, body }) => {
                assert_eq!(*status, 404);
                assert_eq!(body, "model 'llama9' not found");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn inline_error_record_ends_the_stream() {
        let server = spawn_http_server(CannedResponse::ok(
            "application/x-ndjson",
            vec![b"{\"response\":\"a\",\"done\":false}\n{\"error\":\"out of memory\"}\n".to_vec()],
        ))
        .await;

        let stream = client(server.url.clone()).stream(&[], CancellationToken::new());
        let results = collect_stream(stream).await;
        assert_eq!(results[0].as_deref().ok(), Some("a"));
        assert!(matches!(&results[1], Err(StreamError::Remote(msg)) if msg == "out of memory"));
    }

    #[tokio::test]
    async fn cancellation_ends_with_aborted() {
        let server = spawn_http_server(
            CannedResponse::ok(
                "application/x-ndjson",
                vec![b"{\"response\":\"partial\",\"done\":false}\n".to_vec()],
            )
            .hold_open(),
        )
        .await;

        let cancel = CancellationToken::new();
        let mut stream = client(server.url.clone()).stream(&[], cancel.clone());
        assert_eq!(stream.next().await.unwrap().unwrap(), "partial");

        cancel.cancel();
        let next = stream.next().await.unwrap();
        assert!(matches!(next, Err(StreamError::Aborted)));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn connection_refused_is_transport_error() {
        let url = crate::utils::test_utils::unused_local_url().await;
        let stream = client(url).stream(&[], CancellationToken::new());
        let results = collect_stream(stream).await;
        assert!(matches!(results.as_slice(), [Err(StreamError::Transport(_))]));
    }
}
