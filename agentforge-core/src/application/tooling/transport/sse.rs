use super::{
    CancelOnDrop, McpTransport, PendingRequests, ToolInvokeError, cancellation_params, header_map,
    notification_message, request_message, server_request_reply, spawn_detached,
};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::HeaderMap;
use reqwest::{Client, Url};
use reqwest_eventsource::{Event, EventSource};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// How long the server has to announce its message endpoint.
const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(15);

/// Legacy HTTP+SSE transport: responses arrive on a long-lived event stream,
/// requests are POSTed to the endpoint the stream announces first.
pub struct SseTransport {
    inner: Arc<SseInner>,
    reader: AsyncMutex<Option<JoinHandle<()>>>,
}

struct SseInner {
    server: String,
    http: Client,
    headers: HeaderMap,
    post_url: Url,
    pending: Arc<PendingRequests>,
}

impl SseTransport {
    pub async fn connect(
        server: &str,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Self, ToolInvokeError> {
        let stream_url = Url::parse(url)
            .map_err(|err| ToolInvokeError::transport(server, format!("invalid url: {err}")))?;
        let headers = header_map(server, headers)?;
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|source| ToolInvokeError::Http {
                server: server.to_string(),
                source,
            })?;

        let mut source = EventSource::new(http.get(stream_url.clone()).headers(headers.clone()))
            .map_err(|err| ToolInvokeError::transport(server, err.to_string()))?;

        let endpoint = match tokio::time::timeout(ENDPOINT_TIMEOUT, wait_for_endpoint(server, &mut source)).await {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(err)) => {
                source.close();
                return Err(err);
            }
            Err(_) => {
                source.close();
                return Err(ToolInvokeError::transport(
                    server,
                    "timed out waiting for endpoint event",
                ));
            }
        };
        let post_url = stream_url.join(endpoint.trim()).map_err(|err| {
            ToolInvokeError::transport(server, format!("invalid endpoint '{endpoint}': {err}"))
        })?;
        debug!(server, endpoint = %post_url, "SSE server announced message endpoint");

        let inner = Arc::new(SseInner {
            server: server.to_string(),
            http,
            headers,
            post_url,
            pending: Arc::new(PendingRequests::new(server)),
        });
        let reader_inner = Arc::clone(&inner);
        let reader = tokio::spawn(async move {
            reader_inner.reader_loop(source).await;
        });

        Ok(Self {
            inner,
            reader: AsyncMutex::new(Some(reader)),
        })
    }
}

async fn wait_for_endpoint(server: &str, source: &mut EventSource) -> Result<String, ToolInvokeError> {
    while let Some(event) = source.next().await {
        match event {
            Ok(Event::Open) => continue,
            Ok(Event::Message(message)) if message.event == "endpoint" => {
                return Ok(message.data);
            }
            Ok(Event::Message(message)) => {
                debug!(server, event = %message.event, "ignoring event before endpoint announcement");
            }
            Err(err) => return Err(ToolInvokeError::transport(server, err.to_string())),
        }
    }
    Err(ToolInvokeError::transport(
        server,
        "event stream closed before endpoint announcement",
    ))
}

#[async_trait]
impl McpTransport for SseTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ToolInvokeError> {
        let pending = Arc::clone(&self.inner.pending);
        let id = pending.next_id();
        let rx = pending.register(&id);

        let guard = {
            let inner = Arc::clone(&self.inner);
            let id = id.clone();
            CancelOnDrop::new(move || {
                if inner.pending.release(&id) {
                    spawn_detached(async move {
                        let message =
                            notification_message("notifications/cancelled", cancellation_params(&id));
                        if let Err(err) = inner.post(&message).await {
                            debug!(server = %inner.server, %err, "failed to send cancellation");
                        }
                    });
                }
            })
        };

        if let Err(err) = self.inner.post(&request_message(&id, method, params)).await {
            guard.disarm();
            pending.release(&id);
            return Err(err);
        }

        let outcome = rx.await;
        guard.disarm();
        match outcome {
            Ok(result) => result,
            Err(_) => Err(ToolInvokeError::Cancelled {
                server: self.inner.server.clone(),
            }),
        }
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), ToolInvokeError> {
        self.inner.post(&notification_message(method, params)).await
    }

    async fn close(&self) -> Result<(), ToolInvokeError> {
        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
        }
        self.inner.pending.fail_all();
        Ok(())
    }
}

impl SseInner {
    async fn reader_loop(self: Arc<Self>, mut source: EventSource) {
        while let Some(event) = source.next().await {
            match event {
                Ok(Event::Open) => debug!(server = %self.server, "SSE stream opened"),
                Ok(Event::Message(message)) => {
                    if !message.event.is_empty() && message.event != "message" {
                        debug!(server = %self.server, event = %message.event, "ignoring SSE event");
                        continue;
                    }
                    match serde_json::from_str::<Value>(&message.data) {
                        Ok(value) => self.process_inbound_message(value).await,
                        Err(source) => warn!(
                            server = %self.server,
                            data = %message.data,
                            %source,
                            "received invalid JSON on SSE stream"
                        ),
                    }
                }
                Err(err) => {
                    warn!(server = %self.server, %err, "SSE stream failed");
                    break;
                }
            }
        }
        source.close();
        self.pending.fail_all();
    }

    async fn process_inbound_message(&self, value: Value) {
        let method = value
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_string);
        match (value.get("id").cloned(), method) {
            (Some(id), Some(method)) => {
                let reply = server_request_reply(&self.server, id, &method);
                if let Err(err) = self.post(&reply).await {
                    warn!(server = %self.server, %err, "failed to answer server request");
                }
            }
            (Some(_), None) => self.pending.resolve(value),
            (None, Some(method)) => {
                debug!(server = %self.server, method = %method, "received notification from server");
            }
            (None, None) => {}
        }
    }

    async fn post(&self, message: &Value) -> Result<(), ToolInvokeError> {
        let response = self
            .http
            .post(self.post_url.clone())
            .headers(self.headers.clone())
            .json(message)
            .send()
            .await
            .map_err(|source| ToolInvokeError::Http {
                server: self.server.clone(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ToolInvokeError::transport(
                &self.server,
                format!("message endpoint returned HTTP {status}"),
            ));
        }
        Ok(())
    }
}
