use super::{
    CancelOnDrop, McpTransport, PendingRequests, ToolInvokeError, cancellation_params,
    notification_message, request_message, server_request_reply, spawn_detached,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

/// How long a server gets to exit after its stdin closes before it is killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Newline-delimited JSON-RPC over a child process's stdin/stdout.
#[derive(Clone)]
pub struct StdioTransport {
    inner: Arc<StdioInner>,
}

struct StdioInner {
    server: String,
    writer: AsyncMutex<Option<BufWriter<ChildStdin>>>,
    child: AsyncMutex<Option<Child>>,
    pending: Arc<PendingRequests>,
}

impl StdioTransport {
    pub async fn spawn(
        server: &str,
        command: &Path,
        args: &[String],
        env: &HashMap<String, String>,
        workdir: Option<&PathBuf>,
    ) -> Result<Self, ToolInvokeError> {
        let mut process = Command::new(command);
        process
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = workdir {
            process.current_dir(dir);
        }
        if !args.is_empty() {
            process.args(args);
        }
        for (key, value) in env {
            process.env(key, value);
        }

        let mut child = process.spawn().map_err(|source| ToolInvokeError::Spawn {
            server: server.to_string(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolInvokeError::transport(server, "failed to capture server stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolInvokeError::transport(server, "failed to capture server stdout"))?;
        debug!(server, pid = ?child.id(), "Spawned MCP server process");

        let inner = Arc::new(StdioInner {
            server: server.to_string(),
            writer: AsyncMutex::new(Some(BufWriter::new(stdin))),
            child: AsyncMutex::new(Some(child)),
            pending: Arc::new(PendingRequests::new(server)),
        });

        let reader = Arc::clone(&inner);
        tokio::spawn(async move {
            reader.reader_loop(stdout).await;
        });

        Ok(Self { inner })
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
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
                        if let Err(err) = inner.write_message(&message).await {
                            debug!(server = %inner.server, %err, "failed to send cancellation");
                        }
                    });
                }
            })
        };

        if let Err(err) = self
            .inner
            .write_message(&request_message(&id, method, params))
            .await
        {
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
        self.inner
            .write_message(&notification_message(method, params))
            .await
    }

    async fn close(&self) -> Result<(), ToolInvokeError> {
        // Closing stdin asks the server to exit on its own.
        self.inner.writer.lock().await.take();

        let child = self.inner.child.lock().await.take();
        if let Some(mut child) = child {
            match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(server = %self.inner.server, %status, "MCP server exited");
                }
                Ok(Err(err)) => {
                    debug!(server = %self.inner.server, %err, "failed to wait for MCP server");
                }
                Err(_) => {
                    warn!(
                        server = %self.inner.server,
                        "MCP server ignored shutdown, killing process"
                    );
                    if let Err(err) = child.kill().await {
                        debug!(
                            server = %self.inner.server,
                            %err,
                            "failed to kill MCP server process (may have already exited)"
                        );
                    }
                }
            }
        }

        self.inner.pending.fail_all();
        Ok(())
    }
}

impl StdioInner {
    async fn reader_loop(self: Arc<Self>, stdout: ChildStdout) {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(raw)) = lines.next_line().await {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with('\u{1b}') {
                debug!(
                    server = %self.server,
                    line = trimmed,
                    "skipping non-JSON ANSI log line from MCP server"
                );
                continue;
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(value) => self.process_inbound_message(value).await,
                Err(source) => {
                    warn!(
                        server = %self.server,
                        line = trimmed,
                        %source,
                        "received invalid JSON from MCP server"
                    );
                }
            }
        }

        debug!(server = %self.server, "MCP server stdout closed");
        self.writer.lock().await.take();
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
                if let Err(err) = self.write_message(&reply).await {
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

    async fn write_message(&self, message: &Value) -> Result<(), ToolInvokeError> {
        let encoded =
            serde_json::to_string(message).map_err(|source| ToolInvokeError::InvalidJson {
                server: self.server.clone(),
                source,
            })?;

        let mut writer = self.writer.lock().await;
        let stream = writer
            .as_mut()
            .ok_or_else(|| ToolInvokeError::Terminated {
                server: self.server.clone(),
            })?;
        let io_error = |source: std::io::Error| ToolInvokeError::Transport {
            server: self.server.clone(),
            message: source.to_string(),
        };
        stream.write_all(encoded.as_bytes()).await.map_err(io_error)?;
        stream.write_all(b"\n").await.map_err(io_error)?;
        stream.flush().await.map_err(io_error)?;
        Ok(())
    }
}
