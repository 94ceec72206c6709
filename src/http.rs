use crate::collectors::host::describe_host;
use crate::metrics::Metrics;
use crate::state::{Breaches, IncidentView, MetricSample, NetworkDelta, State as AgentState};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::error;

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub state: Arc<RwLock<AgentState>>,
    pub client: Client,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiState {
    pub started_at: String,
    pub last_tick_at: Option<String>,
    pub interface: String,
    pub ticks: u64,
    pub last_sample: Option<MetricSample>,
    pub last_delta: Option<NetworkDelta>,
    pub last_breaches: Option<Breaches>,
    pub incidents: Vec<IncidentView>,
    pub last_errors: Vec<String>,
}

impl From<&AgentState> for ApiState {
    fn from(value: &AgentState) -> Self {
        Self {
            started_at: format_unix(value.started_at_unix),
            last_tick_at: (value.ticks > 0).then(|| format_unix(value.last_tick_unix)),
            interface: value.interface.clone(),
            ticks: value.ticks,
            last_sample: value.last_sample.clone(),
            last_delta: value.last_delta,
            last_breaches: value.last_breaches,
            incidents: value.incidents.clone(),
            last_errors: value.last_errors.clone(),
        }
    }
}

pub fn build_router(
    metrics: Arc<Metrics>,
    state: Arc<RwLock<AgentState>>,
    client: Client,
) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/state", get(state_handler))
        .route("/api/host", get(host_handler))
        .with_state(HttpAppState {
            metrics,
            state,
            client,
        })
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    {
        let guard = state.state.read().await;
        state.metrics.update_from_state(&guard);
    }
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}

async fn state_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    let guard = state.state.read().await;
    Json(ApiState::from(&*guard))
}

async fn host_handler(State(state): State<HttpAppState>) -> Response {
    match describe_host(&state.client).await {
        Ok(facts) => Json(facts).into_response(),
        Err(err) => {
            error!(error = %err, "host facts collection failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to collect host facts: {err}"),
            )
                .into_response()
        }
    }
}

fn format_unix(ts: i64) -> String {
    let st = UNIX_EPOCH + Duration::from_secs(ts.max(0) as u64);
    humantime::format_rfc3339_seconds(st).to_string()
}
