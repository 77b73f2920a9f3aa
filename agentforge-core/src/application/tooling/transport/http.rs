use super::{
    CancelOnDrop, McpTransport, ToolInvokeError, cancellation_params, header_map,
    notification_message, request_message, response_key, response_result, server_request_reply,
    spawn_detached,
};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, Response, StatusCode, Url};
use serde_json::Value;
use std::collections::HashMap;
use std::string::FromUtf8Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const SESSION_HEADER: &str = "mcp-session-id";

/// Streamable HTTP transport: each message is a POST, the reply is either a
/// JSON body or an SSE stream carrying the response.
#[derive(Clone)]
pub struct StreamableHttpTransport {
    inner: Arc<HttpInner>,
}

struct HttpInner {
    server: String,
    url: Url,
    http: Client,
    headers: HeaderMap,
    session_id: Mutex<Option<String>>,
    id_counter: AtomicU64,
}

impl StreamableHttpTransport {
    pub fn new(
        server: &str,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Self, ToolInvokeError> {
        let url = Url::parse(url)
            .map_err(|err| ToolInvokeError::transport(server, format!("invalid url: {err}")))?;
        let mut headers = header_map(server, headers)?;
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/event-stream"),
        );
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|source| ToolInvokeError::Http {
                server: server.to_string(),
                source,
            })?;

        Ok(Self {
            inner: Arc::new(HttpInner {
                server: server.to_string(),
                url,
                http,
                headers,
                session_id: Mutex::new(None),
                id_counter: AtomicU64::new(1),
            }),
        })
    }
}

#[async_trait]
impl McpTransport for StreamableHttpTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ToolInvokeError> {
        let id = format!("req-{}", self.inner.id_counter.fetch_add(1, Ordering::SeqCst));

        // Dropping the in-flight POST aborts it; the server is told separately.
        let guard = {
            let inner = Arc::clone(&self.inner);
            let id = id.clone();
            CancelOnDrop::new(move || {
                spawn_detached(async move {
                    let message =
                        notification_message("notifications/cancelled", cancellation_params(&id));
                    if let Err(err) = inner.post(&message).await {
                        debug!(server = %inner.server, %err, "failed to send cancellation");
                    }
                });
            })
        };

        let result = self.inner.exchange(&id, method, params).await;
        guard.disarm();
        result
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), ToolInvokeError> {
        let response = self.inner.post(&notification_message(method, params)).await?;
        self.inner.check_status(response.status())
    }

    async fn close(&self) -> Result<(), ToolInvokeError> {
        let session = self
            .inner
            .session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(session) = session else {
            return Ok(());
        };

        let response = self
            .inner
            .http
            .delete(self.inner.url.clone())
            .headers(self.inner.headers.clone())
            .header(SESSION_HEADER, session)
            .send()
            .await
            .map_err(|source| ToolInvokeError::Http {
                server: self.inner.server.clone(),
                source,
            })?;
        // Servers may refuse explicit session termination.
        if response.status() == StatusCode::METHOD_NOT_ALLOWED {
            return Ok(());
        }
        self.inner.check_status(response.status())
    }
}

impl HttpInner {
    async fn exchange(&self, id: &str, method: &str, params: Value) -> Result<Value, ToolInvokeError> {
        let response = self.post(&request_message(id, method, params)).await?;
        self.check_status(response.status())?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let message = if content_type.contains("text/event-stream") {
            self.read_event_stream(id, response).await?
        } else {
            let body = response.bytes().await.map_err(|source| ToolInvokeError::Http {
                server: self.server.clone(),
                source,
            })?;
            let value: Value =
                serde_json::from_slice(&body).map_err(|source| ToolInvokeError::InvalidJson {
                    server: self.server.clone(),
                    source,
                })?;
            find_response(id, value).ok_or_else(|| {
                ToolInvokeError::transport(&self.server, format!("no response for request '{id}'"))
            })?
        };
        response_result(&self.server, message)
    }

    /// Reads SSE events until the response for `id` arrives, answering any
    /// server requests sent on the stream along the way.
    async fn read_event_stream(&self, id: &str, response: Response) -> Result<Value, ToolInvokeError> {
        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::default();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| ToolInvokeError::Http {
                server: self.server.clone(),
                source,
            })?;
            decoder.push(&chunk);

            while let Some(block) = decoder.next_block() {
                let block = block.map_err(|err| {
                    ToolInvokeError::transport(
                        &self.server,
                        format!("event stream is not valid UTF-8: {err}"),
                    )
                })?;
                let Some(event) = parse_sse_event(&block) else {
                    continue;
                };
                if !event.is_message() {
                    continue;
                }
                match serde_json::from_str::<Value>(&event.data) {
                    Ok(value) => {
                        if let Some(found) = self.take_response(id, value).await {
                            return Ok(found);
                        }
                    }
                    Err(source) => warn!(
                        server = %self.server,
                        data = %event.data,
                        %source,
                        "failed to parse SSE event data as JSON-RPC message"
                    ),
                }
            }
        }
        Err(ToolInvokeError::transport(
            &self.server,
            format!("event stream ended before response to '{id}'"),
        ))
    }

    /// Returns the response for `id` from a message or batch. Server requests
    /// in it are answered with a separate POST.
    async fn take_response(&self, id: &str, value: Value) -> Option<Value> {
        let messages = match value {
            Value::Array(items) => items,
            message => vec![message],
        };
        let mut found = None;
        for message in messages {
            let request = message
                .get("id")
                .zip(message.get("method").and_then(Value::as_str))
                .map(|(request_id, method)| {
                    server_request_reply(&self.server, request_id.clone(), method)
                });
            if let Some(reply) = request {
                self.send_reply(&reply).await;
            } else if found.is_none() && is_response_for(id, &message) {
                found = Some(message);
            }
        }
        found
    }

    async fn send_reply(&self, reply: &Value) {
        match self.post(reply).await {
            Ok(response) if response.status().is_success() => {
                debug!(server = %self.server, id = %reply["id"], "answered server request");
            }
            Ok(response) => warn!(
                server = %self.server,
                status = %response.status(),
                "server rejected reply to its request"
            ),
            Err(err) => warn!(server = %self.server, %err, "failed to reply to server request"),
        }
    }

    async fn post(&self, message: &Value) -> Result<Response, ToolInvokeError> {
        let mut request = self
            .http
            .post(self.url.clone())
            .headers(self.headers.clone())
            .json(message);
        if let Some(session) = self.current_session() {
            request = request.header(SESSION_HEADER, session);
        }
        let response = request.send().await.map_err(|source| ToolInvokeError::Http {
            server: self.server.clone(),
            source,
        })?;
        self.capture_session(response.headers());
        Ok(response)
    }

    fn check_status(&self, status: StatusCode) -> Result<(), ToolInvokeError> {
        if status.is_success() {
            Ok(())
        } else {
            Err(ToolInvokeError::transport(
                &self.server,
                format!("server returned HTTP {status}"),
            ))
        }
    }

    fn current_session(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn capture_session(&self, headers: &HeaderMap) {
        let Some(value) = headers.get(SESSION_HEADER).and_then(|value| value.to_str().ok()) else {
            return;
        };
        let mut session = self.session_id.lock().unwrap_or_else(PoisonError::into_inner);
        if session.as_deref() != Some(value) {
            debug!(server = %self.server, session_id = value, "captured MCP session ID");
            *session = Some(value.to_string());
        }
    }
}

/// Buffers raw stream bytes and yields complete event blocks. A block is
/// decoded only once its blank-line terminator has arrived, so multi-byte
/// characters split across chunks stay intact.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    fn next_block(&mut self) -> Option<Result<String, FromUtf8Error>> {
        let (end, terminator) = [&b"\r\n\r\n"[..], &b"\n\n"[..]]
            .into_iter()
            .filter_map(|terminator| {
                find_bytes(&self.buffer, terminator).map(|at| (at, terminator.len()))
            })
            .min_by_key(|(at, _)| *at)?;
        let mut block: Vec<u8> = self.buffer.drain(..end + terminator).collect();
        block.truncate(end);
        Some(String::from_utf8(block))
    }
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// A single parsed `text/event-stream` event.
#[derive(Debug, Default, PartialEq, Eq)]
struct SseEvent {
    event: Option<String>,
    data: String,
}

impl SseEvent {
    fn is_message(&self) -> bool {
        self.event.as_deref().is_none_or(|event| event == "message") && !self.data.is_empty()
    }
}

fn parse_sse_event(block: &str) -> Option<SseEvent> {
    let mut event = SseEvent::default();
    let mut has_data = false;
    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event.event = Some(value.to_string()),
            "data" => {
                if has_data {
                    event.data.push('\n');
                }
                event.data.push_str(value);
                has_data = true;
            }
            _ => {}
        }
    }
    has_data.then_some(event)
}

/// Picks the response for `id` out of a single message or a batch.
fn find_response(id: &str, value: Value) -> Option<Value> {
    match value {
        Value::Array(items) => items.into_iter().find(|item| is_response_for(id, item)),
        message => is_response_for(id, &message).then_some(message),
    }
}

fn is_response_for(id: &str, message: &Value) -> bool {
    message.get("method").is_none()
        && message.get("id").and_then(response_key).as_deref() == Some(id)
}
