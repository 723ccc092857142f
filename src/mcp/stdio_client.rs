use crate::deadline::{Deadlines, with_deadline};
use crate::error::{DispatchError, Result};
use crate::mcp::types::{ListToolsResult, McpTool, NormalizedResult};
use crate::transport::StdioTarget;
use serde_json::{Value, json};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, Command},
    sync::{Mutex, mpsc, oneshot},
    task::JoinHandle,
    time::Instant,
};

const PROTOCOL_VERSION: &str = "2025-03-26";

/// How long a closing server gets to exit on its own after stdin is closed.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// Lifecycle of a [`StdioSession`].
#[derive(Debug)]
enum SessionState {
    Disconnected,
    Connecting { started_at: Instant },
    Connected(Channel),
}

/// A protocol session with one locally spawned server process.
///
/// Every operation takes `&mut self`, so a session never has more than one
/// request in flight. Any failure while connecting or connected tears the
/// process down and leaves the session `Disconnected`.
#[derive(Debug)]
pub struct StdioSession {
    deadlines: Deadlines,
    inherit_stderr: bool,
    state: SessionState,
}

impl StdioSession {
    pub fn new(deadlines: Deadlines) -> Self {
        Self {
            deadlines,
            inherit_stderr: false,
            state: SessionState::Disconnected,
        }
    }

    /// Forward the server's stderr to ours instead of discarding it.
    pub fn inherit_stderr(mut self, inherit: bool) -> Self {
        self.inherit_stderr = inherit;
        self
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, SessionState::Connected(_))
    }

    /// OS process id of the connected server.
    pub fn pid(&self) -> Option<u32> {
        match &self.state {
            SessionState::Connected(channel) => channel.child.id(),
            _ => None,
        }
    }

    /// Spawn the server and complete the `initialize` handshake within the
    /// connect deadline. An existing connection is closed first.
    pub async fn connect(&mut self, target: &StdioTarget) -> Result<()> {
        self.close().await;

        self.state = SessionState::Connecting {
            started_at: Instant::now(),
        };
        tracing::debug!(name: "session.connecting", command = %target.command, "spawning protocol server");

        let label = format!("connect {}", target.command);
        let opened = with_deadline(
            Channel::open(target, self.inherit_stderr),
            self.deadlines.connect,
            &label,
        )
        .await;

        let elapsed_ms = match &self.state {
            SessionState::Connecting { started_at } => {
                u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
            }
            _ => 0,
        };

        // A dropped `Channel::open` future drops its child, which is spawned
        // with kill-on-drop.
        match opened {
            Ok(channel) => {
                tracing::debug!(
                    name: "session.connected",
                    command = %target.command,
                    pid = channel.child.id(),
                    elapsed_ms,
                    "protocol server ready"
                );
                self.state = SessionState::Connected(channel);
                Ok(())
            }
            Err(err) => {
                self.state = SessionState::Disconnected;
                tracing::warn!(
                    name: "session.connect_failed",
                    command = %target.command,
                    elapsed_ms,
                    error = %err,
                    "connect failed"
                );
                Err(match err {
                    DispatchError::ConnectionFailed { .. } => err,
                    other => DispatchError::connection(other.to_string()),
                })
            }
        }
    }

    /// All tools the server advertises, following pagination cursors.
    pub async fn list_capabilities(&mut self) -> Result<Vec<McpTool>> {
        let SessionState::Connected(channel) = &mut self.state else {
            return Err(DispatchError::NotConnected);
        };

        let outcome = with_deadline(channel.list_tools_all(), self.deadlines.call, "tools/list").await;
        if outcome.is_err() {
            self.abort().await;
        }
        outcome
    }

    /// Call one tool. The returned `is_error` flag is the server's own.
    pub async fn invoke(&mut self, name: &str, arguments: Value) -> Result<NormalizedResult> {
        let SessionState::Connected(channel) = &mut self.state else {
            return Err(DispatchError::NotConnected);
        };

        let label = format!("tools/call {name}");
        let outcome = with_deadline(
            channel.call_tool(name, arguments),
            self.deadlines.call,
            &label,
        )
        .await;
        if outcome.is_err() {
            self.abort().await;
        }
        outcome
    }

    /// Terminate the server and release the channel. Safe in any state.
    pub async fn close(&mut self) {
        if let SessionState::Connected(channel) =
            std::mem::replace(&mut self.state, SessionState::Disconnected)
        {
            channel.shutdown(SHUTDOWN_GRACE).await;
        }
    }

    /// Failure path: kill without waiting for a graceful exit.
    async fn abort(&mut self) {
        if let SessionState::Connected(channel) =
            std::mem::replace(&mut self.state, SessionState::Disconnected)
        {
            channel.shutdown(Duration::ZERO).await;
        }
    }
}

/// Live process plus the newline-delimited JSON-RPC plumbing around it.
#[derive(Debug)]
struct Channel {
    child: Child,
    tx: mpsc::UnboundedSender<String>,
    pending: PendingMap,
    next_id: u64,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Channel {
    async fn open(target: &StdioTarget, inherit_stderr: bool) -> Result<Self> {
        let mut cmd = Command::new(&target.command);
        cmd.args(&target.args)
            .envs(&target.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(if inherit_stderr {
                std::process::Stdio::inherit()
            } else {
                std::process::Stdio::null()
            })
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            DispatchError::connection(format!("failed to spawn '{}': {e}", target.command))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DispatchError::connection("missing stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DispatchError::connection("missing stdout"))?;

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        // Writer task: each JSON-RPC message is a single line, newline-terminated.
        let writer = tokio::spawn(async move {
            let mut w = stdin;
            while let Some(line) = rx.recv().await {
                let line = line.replace('\n', "");
                if w.write_all(line.as_bytes()).await.is_err()
                    || w.write_all(b"\n").await.is_err()
                    || w.flush().await.is_err()
                {
                    break;
                }
            }
        });

        // Reader task: route responses to waiters by id.
        let pending_reader = Arc::clone(&pending);
        let reader = tokio::spawn(async move {
            let mut r = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = r.next_line().await {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let Ok(parsed) = serde_json::from_str::<Value>(line) else {
                    tracing::trace!(name: "session.stdout.ignored", line, "non-JSON line from server");
                    continue;
                };
                // Requests and notifications from the server carry a method.
                if parsed.get("method").is_some() {
                    continue;
                }
                if let Some(id) = parsed.get("id").and_then(Value::as_u64) {
                    if let Some(waiter) = pending_reader.lock().await.remove(&id) {
                        let _ = waiter.send(parsed);
                    }
                }
            }
            // EOF: wake every waiter with a closed channel.
            pending_reader.lock().await.clear();
        });

        let mut channel = Self {
            child,
            tx,
            pending,
            next_id: 1,
            reader,
            writer,
        };
        channel.initialize().await?;
        Ok(channel)
    }

    async fn initialize(&mut self) -> Result<()> {
        self.request(
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        )
        .await
        .map_err(|e| DispatchError::connection(format!("initialize failed: {e}")))?;

        self.send(&json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        }))
    }

    fn send(&self, msg: &Value) -> Result<()> {
        let line = serde_json::to_string(msg)
            .map_err(|e| DispatchError::Protocol(format!("unserializable request: {e}")))?;
        self.tx
            .send(line)
            .map_err(|_closed| DispatchError::Protocol("stdio writer task ended".into()))
    }

    /// Send one request and return its `result` member.
    async fn request(&mut self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        }))?;

        let resp = rx.await.map_err(|_closed| {
            DispatchError::Protocol(format!("server closed the connection during {method}"))
        })?;

        if let Some(err) = resp.get("error") {
            return Err(DispatchError::Rpc {
                code: err.get("code").and_then(Value::as_i64).unwrap_or_default(),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }
        resp.get("result")
            .cloned()
            .ok_or_else(|| DispatchError::Protocol(format!("missing result in {method} response")))
    }

    async fn list_tools_all(&mut self) -> Result<Vec<McpTool>> {
        let mut out = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = match &cursor {
                Some(c) => json!({ "cursor": c }),
                None => json!({}),
            };
            let result = self.request("tools/list", params).await?;
            let parsed: ListToolsResult = serde_json::from_value(result)
                .map_err(|e| DispatchError::Protocol(format!("invalid tools/list result: {e}")))?;
            out.extend(parsed.tools);

            match parsed.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(out)
    }

    async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<NormalizedResult> {
        let result = self
            .request(
                "tools/call",
                json!({
                    "name": name,
                    "arguments": arguments
                }),
            )
            .await?;
        serde_json::from_value(result)
            .map_err(|e| DispatchError::Protocol(format!("invalid tools/call result: {e}")))
    }

    /// Close stdin, give the process `grace` to exit, then kill it.
    async fn shutdown(mut self, grace: Duration) {
        drop(self.tx);
        self.writer.abort();

        let exited = !grace.is_zero()
            && matches!(
                tokio::time::timeout(grace, self.child.wait()).await,
                Ok(Ok(_))
            );
        if !exited {
            let _ = self.child.kill().await;
        }
        self.reader.abort();
        tracing::debug!(name: "session.closed", graceful = exited, "protocol server stopped");
    }
}
