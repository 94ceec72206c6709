use crate::config::MonitorConfig;
use crate::state::MetricKind;
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Opaque reference to a log record, as returned by the monitor service.
/// Empty when the service answered without a body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RemoteHandle(String);

impl RemoteHandle {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("<none>")
        } else {
            f.write_str(&self.0)
        }
    }
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request to monitor service failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("monitor service answered {status} for {url}")]
    Status { url: String, status: StatusCode },
}

/// Incident log operations against the monitor service. Implementations do
/// not retry; the next tick is the retry.
#[async_trait]
pub trait RemoteLog: Send + Sync {
    async fn open(&self, kind: MetricKind) -> Result<RemoteHandle, RemoteError>;

    async fn close(&self, kind: MetricKind, handle: &RemoteHandle) -> Result<(), RemoteError>;

    /// The record still open for `kind`, if the service has one.
    async fn fetch_open(&self, kind: MetricKind) -> Result<Option<RemoteHandle>, RemoteError>;
}

#[derive(Debug, Serialize)]
struct CloseBody<'a> {
    handle: &'a str,
}

#[derive(Clone)]
pub struct MonitorClient {
    client: Client,
    base_url: String,
    client_id: String,
}

impl MonitorClient {
    pub fn new(cfg: &MonitorConfig) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .user_agent(concat!("hostwatchd/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()?;
        Ok(Self::with_client(client, &cfg.server_url, &cfg.client_id))
    }

    pub fn with_client(client: Client, base_url: &str, client_id: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
        }
    }

    fn url(&self, op: &str, kind: MetricKind) -> String {
        format!(
            "{}/servers/{}/{}{}Log",
            self.base_url,
            self.client_id,
            op,
            kind.remote_name()
        )
    }

    async fn send(
        &self,
        method: Method,
        url: String,
        body: Option<CloseBody<'_>>,
    ) -> Result<String, RemoteError> {
        let mut req = self.client.request(method, &url);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RemoteError::Status { url, status });
        }
        Ok(resp.text().await?)
    }
}

#[async_trait]
impl RemoteLog for MonitorClient {
    async fn open(&self, kind: MetricKind) -> Result<RemoteHandle, RemoteError> {
        let url = self.url("insert", kind);
        let body = self.send(Method::POST, url, None).await?;
        let handle = handle_from_body(&body).unwrap_or_default();
        debug!(metric = %kind, handle = %handle, "log record inserted");
        Ok(handle)
    }

    async fn close(&self, kind: MetricKind, handle: &RemoteHandle) -> Result<(), RemoteError> {
        let url = self.url("update", kind);
        self.send(
            Method::PUT,
            url,
            Some(CloseBody {
                handle: handle.as_str(),
            }),
        )
        .await?;
        debug!(metric = %kind, handle = %handle, "log record updated");
        Ok(())
    }

    async fn fetch_open(&self, kind: MetricKind) -> Result<Option<RemoteHandle>, RemoteError> {
        let url = self.url("get", kind);
        let body = self.send(Method::GET, url, None).await?;
        Ok(handle_from_body(&body))
    }
}

/// Reads a record reference out of a response body. `null`, `{}`, `[]`,
/// `false` and blank bodies mean "no record". Objects are searched for an
/// id field; anything else non-empty is taken verbatim.
pub fn handle_from_body(body: &str) -> Option<RemoteHandle> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => handle_from_value(&value),
        Err(_) => Some(RemoteHandle::new(trimmed)),
    }
}

fn handle_from_value(value: &Value) -> Option<RemoteHandle> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::Bool(true) => Some(RemoteHandle::default()),
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(RemoteHandle::new(s.trim())),
        Value::Number(n) => Some(RemoteHandle::new(n.to_string())),
        Value::Array(items) => items.first().and_then(handle_from_value),
        Value::Object(map) if map.is_empty() => None,
        Value::Object(map) => {
            for key in ["id", "_id", "logId", "handle"] {
                match map.get(key) {
                    Some(Value::String(s)) if !s.is_empty() => return Some(RemoteHandle::new(s)),
                    Some(Value::Number(n)) => return Some(RemoteHandle::new(n.to_string())),
                    _ => {}
                }
            }
            if let Some(inner) = map.get("data") {
                return handle_from_value(inner);
            }
            Some(RemoteHandle::new(value.to_string()))
        }
    }
}
