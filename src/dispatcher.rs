//! Capability dispatch.
//!
//! [`Dispatcher::dispatch`] resolves a capability, runs it over the mapped
//! transport under the configured deadlines, and returns a
//! [`NormalizedResult`]. Stdio capabilities get a fresh
//! [`StdioSession`] per call which is always closed before returning.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value, json};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::deadline::{Deadlines, with_deadline};
use crate::error::{DispatchError, Result};
use crate::http::HttpInvoker;
use crate::mcp::config::load_capability_file;
use crate::mcp::stdio_client::StdioSession;
use crate::mcp::types::{ListToolsResult, McpTool, NormalizedResult};
use crate::retry::RetryPolicy;
use crate::transport::{HttpFraming, HttpTarget, Route, StdioTarget, TransportDescriptor, TransportTable};

/// A logical call: which capability, with which arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityRequest {
    capability_id: String,
    arguments: Map<String, Value>,
}

impl CapabilityRequest {
    pub fn new(capability_id: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            capability_id: capability_id.into(),
            arguments,
        }
    }

    /// Build from a JSON value; anything but an object is rejected.
    pub fn from_value(capability_id: impl Into<String>, arguments: Value) -> Result<Self> {
        match arguments {
            Value::Object(map) => Ok(Self::new(capability_id, map)),
            Value::Null => Ok(Self::new(capability_id, Map::new())),
            other => Err(DispatchError::Protocol(format!(
                "arguments must be a JSON object, got {other}"
            ))),
        }
    }

    pub fn capability_id(&self) -> &str {
        &self.capability_id
    }

    pub fn arguments(&self) -> &Map<String, Value> {
        &self.arguments
    }
}

/// Options for `search`.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub query: String,
    pub count: Option<u32>,
    pub domain_filter: Option<String>,
    /// `oneDay`, `oneWeek`, `oneMonth`, `oneYear` or `noLimit`.
    pub recency_filter: Option<String>,
    /// `medium` or `high`.
    pub content_size: Option<String>,
}

/// Options for `read`.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub url: String,
    /// `markdown` or `text`.
    pub return_format: Option<String>,
    pub retain_images: Option<bool>,
    pub no_cache: Option<bool>,
    /// Server-side fetch timeout in seconds.
    pub timeout_secs: Option<u64>,
}

/// Options for `repo_search`.
#[derive(Debug, Clone, Default)]
pub struct RepoSearchOptions {
    /// `owner/name` on GitHub.
    pub repo: String,
    pub query: String,
    pub language: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    table: Arc<TransportTable>,
    http: HttpInvoker,
    deadlines: Deadlines,
    retry: RetryPolicy,
    inherit_stderr: bool,
}

impl Dispatcher {
    pub fn new(table: TransportTable, http: HttpInvoker, deadlines: Deadlines) -> Self {
        Self {
            table: Arc::new(table),
            http,
            deadlines,
            retry: RetryPolicy::default(),
            inherit_stderr: false,
        }
    }

    /// Built-in vendor table plus the configured override file, if any.
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let mut table = TransportTable::builtin(cfg)?;
        if let Some(path) = &cfg.capabilities_file {
            table = table.with_overrides(load_capability_file(path)?)?;
        }
        Ok(Self::new(table, HttpInvoker::new(), cfg.deadlines()).with_retry(cfg.retry_policy()))
    }

    /// Retry policy used by the capability helpers (`search`, `read`, ...).
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Let stdio servers write to our stderr.
    pub fn inherit_stderr(mut self, inherit: bool) -> Self {
        self.inherit_stderr = inherit;
        self
    }

    pub fn table(&self) -> &TransportTable {
        &self.table
    }

    pub fn deadlines(&self) -> Deadlines {
        self.deadlines
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub async fn dispatch(&self, request: &CapabilityRequest) -> Result<NormalizedResult> {
        let route = self.table.resolve(request.capability_id())?;
        self.call_route(route, request).await
    }

    /// Resolve once, then retry the transport call for retryable failures.
    pub async fn dispatch_with_retry(
        &self,
        request: &CapabilityRequest,
        policy: &RetryPolicy,
    ) -> Result<NormalizedResult> {
        let route = self.table.resolve(request.capability_id())?;
        policy
            .run_if(|| self.call_route(route, request), DispatchError::is_retryable)
            .await
    }

    /// Tools advertised behind a capability's transport.
    pub async fn list_tools(&self, capability_id: &str) -> Result<Vec<McpTool>> {
        let route = self.table.resolve(capability_id)?;
        match &route.transport {
            TransportDescriptor::Stdio(target) => {
                let mut session = self.session();
                session.connect(target).await?;
                let outcome = session.list_capabilities().await;
                session.close().await;
                outcome
            }
            TransportDescriptor::Http(target) if target.framing == HttpFraming::ToolCall => {
                let body = rpc_envelope("tools/list", json!({}));
                let payload = with_deadline(
                    self.http.invoke(target, Some(&body)),
                    self.deadlines.call,
                    "tools/list",
                )
                .await?;
                let payload = reject_rpc_error(payload)?;
                let parsed: ListToolsResult = serde_json::from_value(payload).map_err(|e| {
                    DispatchError::Protocol(format!("invalid tools/list result: {e}"))
                })?;
                Ok(parsed.tools)
            }
            TransportDescriptor::Http(_) => Err(DispatchError::Protocol(format!(
                "capability '{capability_id}' is a plain HTTP endpoint without a tool listing"
            ))),
        }
    }

    pub async fn search(&self, opts: SearchOptions) -> Result<NormalizedResult> {
        let mut args = Map::new();
        args.insert("search_engine".into(), json!("search-prime"));
        args.insert("search_query".into(), json!(opts.query));
        insert_opt(&mut args, "count", opts.count);
        insert_opt(&mut args, "search_domain_filter", opts.domain_filter);
        insert_opt(&mut args, "search_recency_filter", opts.recency_filter);
        insert_opt(&mut args, "content_size", opts.content_size);
        self.run(CapabilityRequest::new("search", args)).await
    }

    pub async fn read(&self, opts: ReadOptions) -> Result<NormalizedResult> {
        let mut args = Map::new();
        args.insert("url".into(), json!(opts.url));
        insert_opt(&mut args, "return_format", opts.return_format);
        insert_opt(&mut args, "retain_images", opts.retain_images);
        insert_opt(&mut args, "no_cache", opts.no_cache);
        insert_opt(&mut args, "timeout", opts.timeout_secs);
        self.run(CapabilityRequest::new("read", args)).await
    }

    pub async fn repo_search(&self, opts: RepoSearchOptions) -> Result<NormalizedResult> {
        let mut args = Map::new();
        args.insert("repo_name".into(), json!(opts.repo));
        args.insert("query".into(), json!(opts.query));
        insert_opt(&mut args, "language", opts.language);
        self.run(CapabilityRequest::new("repo_search", args)).await
    }

    pub async fn repo_tree(&self, repo: &str, dir_path: Option<&str>) -> Result<NormalizedResult> {
        let mut args = Map::new();
        args.insert("repo_name".into(), json!(repo));
        insert_opt(&mut args, "dir_path", dir_path);
        self.run(CapabilityRequest::new("repo_tree", args)).await
    }

    pub async fn repo_read(&self, repo: &str, file_path: &str) -> Result<NormalizedResult> {
        let mut args = Map::new();
        args.insert("repo_name".into(), json!(repo));
        args.insert("file_path".into(), json!(file_path));
        self.run(CapabilityRequest::new("repo_read", args)).await
    }

    /// Run a single-source vision tool. `source` is a local path or URL.
    pub async fn vision(&self, tool: &str, source: &str, prompt: &str) -> Result<NormalizedResult> {
        let source_key = if tool == "video_analysis" {
            "video_source"
        } else {
            "image_source"
        };
        let mut args = Map::new();
        args.insert(source_key.into(), json!(source));
        args.insert("prompt".into(), json!(prompt));
        self.run(CapabilityRequest::new(tool, args)).await
    }

    async fn run(&self, request: CapabilityRequest) -> Result<NormalizedResult> {
        self.dispatch_with_retry(&request, &self.retry).await
    }

    async fn call_route(&self, route: &Route, request: &CapabilityRequest) -> Result<NormalizedResult> {
        let span = tracing::info_span!(
            "dispatch",
            capability = %request.capability_id(),
            request_id = %Uuid::new_v4()
        );
        async move {
            let started = Instant::now();
            tracing::debug!(name: "dispatch.start", transport = %route.transport, "dispatching");

            let outcome = match &route.transport {
                TransportDescriptor::Stdio(target) => {
                    self.call_stdio(target, &route.tool, request).await
                }
                TransportDescriptor::Http(target) => {
                    self.call_http(target, &route.tool, request).await
                }
            };

            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            match &outcome {
                Ok(result) => tracing::info!(
                    name: "dispatch.finished",
                    is_error = result.is_error,
                    elapsed_ms,
                    "capability call finished"
                ),
                Err(err) => tracing::warn!(
                    name: "dispatch.failed",
                    error = %err,
                    elapsed_ms,
                    "capability call failed"
                ),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn call_stdio(
        &self,
        target: &StdioTarget,
        tool: &str,
        request: &CapabilityRequest,
    ) -> Result<NormalizedResult> {
        let mut session = self.session();
        session.connect(target).await?;
        let outcome = session
            .invoke(tool, Value::Object(request.arguments().clone()))
            .await;
        session.close().await;
        outcome
    }

    async fn call_http(
        &self,
        target: &HttpTarget,
        tool: &str,
        request: &CapabilityRequest,
    ) -> Result<NormalizedResult> {
        let arguments = Value::Object(request.arguments().clone());
        let body = match target.framing {
            HttpFraming::Plain => arguments,
            HttpFraming::ToolCall => rpc_envelope(
                "tools/call",
                json!({
                    "name": tool,
                    "arguments": arguments
                }),
            ),
        };

        let label = format!("{} request", request.capability_id());
        let payload = with_deadline(
            self.http.invoke(target, Some(&body)),
            self.deadlines.call,
            &label,
        )
        .await?;

        Ok(NormalizedResult::from_tool_payload(reject_rpc_error(payload)?))
    }

    fn session(&self) -> StdioSession {
        StdioSession::new(self.deadlines).inherit_stderr(self.inherit_stderr)
    }
}

fn rpc_envelope(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": Uuid::new_v4().to_string(),
        "method": method,
        "params": params
    })
}

/// A JSON-RPC error envelope survives body decoding intact (it has no
/// `result`); turn it into a typed error.
fn reject_rpc_error(payload: Value) -> Result<Value> {
    if payload.get("jsonrpc").is_some() {
        if let Some(err) = payload.get("error") {
            return Err(DispatchError::Rpc {
                code: err.get("code").and_then(Value::as_i64).unwrap_or_default(),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }
    }
    Ok(payload)
}

fn insert_opt<T: Into<Value>>(args: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(value) = value {
        args.insert(key.to_string(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unsupported_capability_performs_no_io() {
        // An empty table has nothing to connect to; resolution fails first.
        let dispatcher = Dispatcher::new(TransportTable::new(), HttpInvoker::new(), Deadlines::default());
        let request = CapabilityRequest::new("chat", Map::new());

        let err = dispatcher.dispatch(&request).await.unwrap_err();
        assert!(matches!(err, DispatchError::UnsupportedCapability(ref id) if id == "chat"));

        let err = dispatcher
            .dispatch_with_retry(&request, &RetryPolicy::new(3))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnsupportedCapability(_)));
    }

    #[test]
    fn test_request_from_value() {
        let req = CapabilityRequest::from_value("read", json!({"url": "https://example.com"})).unwrap();
        assert_eq!(req.arguments()["url"], json!("https://example.com"));

        let req = CapabilityRequest::from_value("read", Value::Null).unwrap();
        assert!(req.arguments().is_empty());

        assert!(CapabilityRequest::from_value("read", json!([1, 2])).is_err());
    }

    #[test]
    fn test_rpc_error_payload_is_typed() {
        let err = reject_rpc_error(json!({
            "jsonrpc": "2.0",
            "id": "1",
            "error": {"code": -32602, "message": "Unknown tool"}
        }))
        .unwrap_err();
        assert!(matches!(err, DispatchError::Rpc { code: -32602, ref message } if message == "Unknown tool"));

        // Vendor payloads that merely mention an error are data.
        let payload = json!({"error": "none", "items": []});
        assert_eq!(reject_rpc_error(payload.clone()).unwrap(), payload);
    }
}
