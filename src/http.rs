//! Single-exchange HTTP invoker.
//!
//! A vendor endpoint may answer the same request either as one JSON document
//! or as a one-shot Server-Sent-Events stream, optionally wrapped in a
//! JSON-RPC `{ "result": ... }` envelope. [`decode_body`] folds all of these
//! into one payload value.

use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

use crate::error::{DispatchError, Result};
use crate::transport::HttpTarget;

const ACCEPT_BOTH: &str = "application/json, text/event-stream";

/// Performs request/response exchanges against [`HttpTarget`]s.
#[derive(Debug, Clone, Default)]
pub struct HttpInvoker {
    http: reqwest::Client,
}

impl HttpInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured client (proxies, TLS roots, user agent, ...).
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// POST `body` when present, otherwise GET, and decode the response.
    pub async fn invoke(&self, target: &HttpTarget, body: Option<&Value>) -> Result<Value> {
        let headers = request_headers(target)?;
        let request = match body {
            Some(body) => self.http.post(target.url.clone()).json(body),
            None => self.http.get(target.url.clone()),
        }
        .headers(headers);

        tracing::debug!(name: "http.request", url = %target.url, post = body.is_some(), "sending request");
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            tracing::debug!(name: "http.status", url = %target.url, status = status.as_u16(), "non-success status");
            // The body only adds detail; the status decides the error.
            let text = response.text().await.unwrap_or_default();
            return Err(DispatchError::Http {
                status_code: status.as_u16(),
                status_text: status_text(status, &text),
            });
        }

        let text = response.text().await?;
        decode_body(&text)
    }
}

/// Default `Accept` and `Content-Type`, then the target's headers, one value
/// per name. `RequestBuilder::headers` replaces what `.json()` set.
fn request_headers(target: &HttpTarget) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_BOTH));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    for (name, value) in &target.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| DispatchError::Protocol(format!("invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| DispatchError::Protocol(format!("invalid value for header '{name}': {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Canonical reason phrase, plus the vendor's message when the error body
/// carries one (`{"error":{"message":..}}`, `{"error":".."}` or `{"msg":..}`).
fn status_text(status: reqwest::StatusCode, body: &str) -> String {
    let reason = status.canonical_reason().unwrap_or("Unknown Status");
    let detail = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        v.pointer("/error/message")
            .or_else(|| v.get("error"))
            .or_else(|| v.get("msg"))
            .or_else(|| v.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    match detail {
        Some(detail) if !detail.is_empty() => format!("{reason}: {detail}"),
        _ => reason.to_string(),
    }
}

/// Decode a success body into a payload.
///
/// - Event-stream framing (any line starting with `event:` or `data:`): the
///   first `data:` line is JSON-decoded if possible, otherwise returned as a
///   string; no `data:` line at all is [`DispatchError::MalformedStream`].
/// - Otherwise the whole body is JSON-decoded, falling back to the raw text.
///
/// Decoded objects carrying a `result` key are unwrapped to that value.
pub fn decode_body(body: &str) -> Result<Value> {
    if is_event_stream(body) {
        let data = body
            .lines()
            .find_map(sse_data_payload)
            .ok_or(DispatchError::MalformedStream)?;
        return Ok(match serde_json::from_str::<Value>(data) {
            Ok(value) => unwrap_result(value),
            Err(_) => Value::String(data.to_string()),
        });
    }

    Ok(match serde_json::from_str::<Value>(body) {
        Ok(value) => unwrap_result(value),
        Err(_) => Value::String(body.to_string()),
    })
}

fn is_event_stream(body: &str) -> bool {
    body.lines()
        .any(|line| line.starts_with("event:") || line.starts_with("data:"))
}

fn sse_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

fn unwrap_result(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("result") => {
            map.remove("result").unwrap_or(Value::Null)
        }
        other => other,
    }
}
