//! AWS Bedrock `InvokeModelWithResponseStream` over plain HTTP.
//!
//! Requests are signed with SigV4 and the response body is an AWS event
//! stream whose `chunk` events carry base64-encoded `{"generation": ...}`
//! documents.

pub mod eventstream;
pub mod sigv4;

use async_stream::try_stream;
use base64::Engine;
use chrono::{DateTime, Utc};
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use self::eventstream::{Frame, FrameDecoder};
use self::sigv4::{AwsCredentials, CanonicalRequest, SigningScope};
use super::{
    next_chunk, or_abort, status_error, Platform, SamplingParams, StreamError, StreamingClient,
    TextStream,
};
use crate::core::message::Message;
use crate::core::prompt;
use crate::utils::url::{host_header, normalize_base_url};

pub const DEFAULT_MODEL: &str = "meta.llama3-1-70b-instruct-v1:0";
pub const DEFAULT_REGION: &str = "us-west-2";
const SERVICE: &str = "bedrock";
const EVENT_STREAM_CONTENT_TYPE: &str = "application/vnd.amazon.eventstream";

#[derive(Serialize)]
struct InvokeBody {
    prompt: String,
    temperature: f32,
    top_p: f32,
}

#[derive(Deserialize)]
struct ChunkPayload {
    bytes: String,
}

#[derive(Deserialize)]
struct GenerationChunk {
    #[serde(default)]
    generation: Option<String>,
}

#[derive(Deserialize)]
struct ExceptionPayload {
    #[serde(default)]
    message: Option<String>,
}

pub struct BedrockClient {
    http: reqwest::Client,
    endpoint: String,
    region: String,
    model: String,
    params: SamplingParams,
    credentials: AwsCredentials,
}

impl BedrockClient {
    pub fn new(
        http: reqwest::Client,
        region: String,
        model: String,
        params: SamplingParams,
        credentials: AwsCredentials,
    ) -> Self {
        Self {
            http,
            endpoint: format!("https://bedrock-runtime.{region}.amazonaws.com"),
            region,
            model,
            params,
            credentials,
        }
    }

    /// Point the client at a different runtime endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn build_request(
        &self,
        messages: &[Message],
        now: DateTime<Utc>,
    ) -> Result<reqwest::RequestBuilder, StreamError> {
        let path = format!(
            "/model/{}/invoke-with-response-stream",
            sigv4::uri_encode(&self.model, true)
        );
        let url = format!("{}{}", normalize_base_url(&self.endpoint), path);
        let parsed = reqwest::Url::parse(&url)
            .map_err(|err| StreamError::Decode(format!("invalid endpoint {url}: {err}")))?;
        let host = host_header(&parsed)
            .ok_or_else(|| StreamError::Decode(format!("endpoint {url} has no host")))?;

        let payload = serde_json::to_vec(&InvokeBody {
            prompt: prompt::render_for_completion(messages),
            temperature: self.params.temperature,
            top_p: self.params.top_p,
        })
        .map_err(|err| StreamError::Decode(err.to_string()))?;

        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let mut signed: Vec<(&str, &str)> = vec![
            ("content-type", "application/json"),
            ("host", &host),
            ("x-amz-date", &amz_date),
        ];
        if let Some(token) = self.credentials.session_token.as_deref() {
            signed.push(("x-amz-security-token", token));
        }
        let authorization = sigv4::authorization(
            &CanonicalRequest {
                method: "POST",
                path: parsed.path(),
                query: "",
                headers: &signed,
                payload: &payload,
            },
            &self.credentials,
            &SigningScope {
                region: &self.region,
                service: SERVICE,
                amz_date: &amz_date,
            },
        );

        let mut request = self
            .http
            .post(parsed)
            .header("content-type", "application/json")
            .header("accept", EVENT_STREAM_CONTENT_TYPE)
            .header("x-amz-date", &amz_date)
            .header("authorization", authorization);
        if let Some(token) = self.credentials.session_token.as_deref() {
            request = request.header("x-amz-security-token", token);
        }
        Ok(request.body(payload))
    }
}

impl StreamingClient for BedrockClient {
    fn platform(&self) -> Platform {
        Platform::Aws
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn stream(&self, messages: &[Message], cancel: CancellationToken) -> TextStream {
        debug!(region = %self.region, model = %self.model, "Starting Bedrock stream");
        match self.build_request(messages, Utc::now()) {
            Ok(request) => Box::pin(event_stream(request, cancel)),
            Err(err) => Box::pin(futures_util::stream::once(async move { Err(err) })),
        }
    }
}

/// Extract the generation text from one event frame.
fn generation_of(frame: &Frame) -> Result<Option<String>, StreamError> {
    match frame.header_str(":message-type") {
        Some("exception") | Some("error") => {
            let kind = frame
                .header_str(":exception-type")
                .or_else(|| frame.header_str(":error-code"))
                .unwrap_or("exception");
            let message = serde_json::from_slice::<ExceptionPayload>(&frame.payload)
                .ok()
                .and_then(|p| p.message)
                .unwrap_or_else(|| String::from_utf8_lossy(&frame.payload).into_owned());
            Err(StreamError::Remote(format!("{kind}: {message}")))
        }
        Some("event") if frame.header_str(":event-type") == Some("chunk") => {
            let chunk: ChunkPayload = serde_json::from_slice(&frame.payload)
                .map_err(|err| StreamError::Decode(format!("chunk event: {err}")))?;
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(chunk.bytes.as_bytes())
                .map_err(|err| StreamError::Decode(format!("chunk bytes: {err}")))?;
            let generation: GenerationChunk = serde_json::from_slice(&decoded)
                .map_err(|err| StreamError::Decode(format!("chunk document: {err}")))?;
            Ok(generation.generation.filter(|text| !text.is_empty()))
        }
        _ => Ok(None),
    }
}

fn event_stream(
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
        let mut decoder = FrameDecoder::new();
        let mut text = String::new();

        while let Some(bytes) = next_chunk(&mut body, &cancel).await? {
            decoder.push(&bytes);
            while let Some(frame) = decoder
                .next_frame()
                .map_err(|err| StreamError::Decode(err.to_string()))?
            {
                if let Some(generation) = generation_of(&frame)? {
                    text.push_str(&generation);
                    yield text.clone();
                }
            }
        }

        if decoder.buffered() > 0 {
            debug!(bytes = decoder.buffered(), "Bedrock stream ended inside a frame");
        }
    }
}
