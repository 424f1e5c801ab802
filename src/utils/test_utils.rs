//! Shared fixtures: a canned-response HTTP server and a scripted client.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::clients::{Platform, StreamError, StreamingClient, TextStream};
use crate::core::message::Message;

/// Drain a stream into a vector.
pub async fn collect_stream(stream: TextStream) -> Vec<Result<String, StreamError>> {
    stream.collect().await
}

#[derive(Debug, Clone)]
pub struct CannedResponse {
    status: u16,
    content_type: String,
    chunks: Vec<Vec<u8>>,
    hold_open: bool,
}

impl CannedResponse {
    /// A 200 response whose body is sent as one HTTP chunk per entry.
    pub fn ok(content_type: &str, chunks: Vec<Vec<u8>>) -> Self {
        Self {
            status: 200,
            content_type: content_type.to_string(),
            chunks,
            hold_open: false,
        }
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "application/json".to_string(),
            chunks: vec![body.as_bytes().to_vec()],
            hold_open: false,
        }
    }

    /// Never finish the body; the connection stays open until the client leaves.
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub head: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

pub struct MockServer {
    pub url: String,
    requests: tokio::sync::Mutex<mpsc::UnboundedReceiver<CapturedRequest>>,
}

impl MockServer {
    /// Next request the server received.
    pub async fn request(&self) -> CapturedRequest {
        self.requests
            .lock()
            .await
            .recv()
            .await
            .expect("server stopped before a request arrived")
    }
}

/// Serve `response` to every connection on an ephemeral local port.
pub async fn spawn_http_server(response: CannedResponse) -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("local addr should resolve");
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let response = response.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let _ = serve(stream, response, tx).await;
            });
        }
    });

    MockServer {
        url: format!("http://{addr}/"),
        requests: tokio::sync::Mutex::new(rx),
    }
}

/// A local URL nothing is listening on.
pub async fn unused_local_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("local addr should resolve");
    drop(listener);
    format!("http://{addr}/")
}

async fn serve(
    mut stream: TcpStream,
    response: CannedResponse,
    tx: mpsc::UnboundedSender<CapturedRequest>,
) -> std::io::Result<()> {
    let request = read_request(&mut stream).await?;
    let _ = tx.send(request);

    let reason = if response.status < 400 { "OK" } else { "Error" };
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n",
        response.status, reason, response.content_type
    );
    stream.write_all(head.as_bytes()).await?;
    stream.flush().await?;

    for chunk in response.chunks.iter().filter(|c| !c.is_empty()) {
        stream
            .write_all(format!("{:x}\r\n", chunk.len()).as_bytes())
            .await?;
        stream.write_all(chunk).await?;
        stream.write_all(b"\r\n").await?;
        stream.flush().await?;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    if response.hold_open {
        let mut sink = [0u8; 256];
        while stream.read(&mut sink).await? > 0 {}
        return Ok(());
    }

    stream.write_all(b"0\r\n\r\n").await?;
    stream.flush().await
}

async fn read_request(stream: &mut TcpStream) -> std::io::Result<CapturedRequest> {
    let mut buffer = Vec::new();
    let header_end = loop {
        if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let mut chunk = [0u8; 1024];
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        buffer.extend_from_slice(&chunk[..read]);
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).into_owned();
    let headers: Vec<(String, String)> = head
        .split("\r\n")
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect();
    let content_length = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buffer[header_end..].to_vec();
    while body.len() < content_length {
        let mut chunk = vec![0u8; content_length - body.len()];
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }

    Ok(CapturedRequest {
        head,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

pub enum ScriptStep {
    Fragment(String),
    Fail(StreamError),
    /// Park until the exchange is cancelled, then end with `Aborted`.
    WaitForCancel,
}

impl ScriptStep {
    pub fn fragments(texts: &[&str]) -> Vec<ScriptStep> {
        texts
            .iter()
            .map(|text| ScriptStep::Fragment(text.to_string()))
            .collect()
    }
}

/// A client that plays back one script per `stream` call.
pub struct ScriptedClient {
    scripts: Mutex<VecDeque<Vec<ScriptStep>>>,
    repeat: Option<Vec<String>>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedClient {
    pub fn new(scripts: Vec<Vec<ScriptStep>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            repeat: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answer every call with the same fragments.
    pub fn repeating(fragments: &[&str]) -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            repeat: Some(fragments.iter().map(|f| f.to_string()).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Conversations passed to each `stream` call so far.
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().unwrap().clone()
    }
}

impl StreamingClient for ScriptedClient {
    fn platform(&self) -> Platform {
        Platform::Ollama
    }

    fn model(&self) -> &str {
        "scripted"
    }

    fn stream(&self, messages: &[Message], cancel: CancellationToken) -> TextStream {
        self.calls.lock().unwrap().push(messages.to_vec());
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or_else(|| {
            self.repeat
                .as_deref()
                .map(|fragments| {
                    fragments
                        .iter()
                        .map(|f| ScriptStep::Fragment(f.clone()))
                        .collect()
                })
                .unwrap_or_default()
        });

        Box::pin(async_stream::stream! {
            for step in script {
                if cancel.is_cancelled() {
                    yield Err(StreamError::Aborted);
                    return;
                }
                match step {
                    ScriptStep::Fragment(text) => yield Ok(text),
                    ScriptStep::Fail(err) => {
                        yield Err(err);
                        return;
                    }
                    ScriptStep::WaitForCancel => {
                        cancel.cancelled().await;
                        yield Err(StreamError::Aborted);
                        return;
                    }
                }
            }
        })
    }
}
