//! Health, metrics and probe status endpoints
//!
//! `/probes` lists the run order with each probe's configuration and the
//! time its last result reached the sink.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use sti_lib::{
    health::{ComponentStatus, HealthRegistry},
    observability::AgentMetrics,
    runner::ProbeInfo,
};
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: AgentMetrics,
    /// Probes in run order, fixed at startup
    pub probes: Vec<ProbeInfo>,
    pub interval: Duration,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: AgentMetrics,
        probes: Vec<ProbeInfo>,
        interval: Duration,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            probes,
            interval,
        }
    }
}

#[derive(Debug, Serialize)]
struct ProbeStatus<'a> {
    #[serde(flatten)]
    probe: &'a ProbeInfo,
    last_success_timestamp: Option<i64>,
}

#[derive(Debug, Serialize)]
struct ProbesResponse<'a> {
    interval_secs: f64,
    probes: Vec<ProbeStatus<'a>>,
}

/// 200 while the scheduler and sink are healthy or degraded
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// 200 once the probe cycle is running
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

async fn probes(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let probes = state
        .probes
        .iter()
        .map(|probe| ProbeStatus {
            probe,
            last_success_timestamp: state.metrics.last_success(&probe.name),
        })
        .collect();

    Json(ProbesResponse {
        interval_secs: state.interval.as_secs_f64(),
        probes,
    })
    .into_response()
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = state.metrics.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            e.to_string().into_bytes(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", prometheus::TEXT_FORMAT)],
        buffer,
    )
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/probes", get(probes))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the API until the process exits
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::response::Response;
    use sti_lib::health::components;
    use tower::ServiceExt;

    fn probe_info(position: usize, name: &str, target: &str) -> ProbeInfo {
        ProbeInfo {
            position,
            name: name.to_string(),
            config: serde_json::json!({ "target": target }),
        }
    }

    async fn state_with(probes: Vec<ProbeInfo>) -> Arc<AppState> {
        let registry = HealthRegistry::with_threshold(2);
        registry.register(components::SCHEDULER).await;
        registry.register(components::SINK).await;
        Arc::new(AppState::new(
            registry,
            AgentMetrics::new(),
            probes,
            Duration::from_secs(60),
        ))
    }

    async fn state() -> Arc<AppState> {
        state_with(Vec::new()).await
    }

    async fn get(state: Arc<AppState>, path: &str) -> Response {
        create_router(state)
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_healthz_tracks_sink_failures() {
        let state = state().await;
        assert_eq!(get(state.clone(), "/healthz").await.status(), StatusCode::OK);

        state
            .health_registry
            .record_failure(components::SINK, "sink is not alive")
            .await;
        assert_eq!(get(state.clone(), "/healthz").await.status(), StatusCode::OK);

        state
            .health_registry
            .record_failure(components::SINK, "sink is not alive")
            .await;
        let response = get(state, "/healthz").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(body_text(response).await.contains("sink is not alive"));
    }

    #[tokio::test]
    async fn test_readyz_follows_cycle_start() {
        let state = state().await;
        assert_eq!(
            get(state.clone(), "/readyz").await.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );

        state.health_registry.set_ready(true).await;
        assert_eq!(get(state, "/readyz").await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_probes_lists_run_order_and_last_report() {
        let state = state_with(vec![
            probe_info(0, "api-test-ping", "1.1.1.1"),
            probe_info(1, "api-test-iperf", "192.0.2.1"),
        ])
        .await;
        state
            .metrics
            .set_last_success("api-test-ping", 1_700_000_000.0);

        let response = get(state, "/probes").await;
        assert_eq!(response.status(), StatusCode::OK);

        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["interval_secs"], 60.0);

        let probes = body["probes"].as_array().unwrap();
        assert_eq!(probes.len(), 2);
        assert_eq!(probes[0]["position"], 0);
        assert_eq!(probes[0]["name"], "api-test-ping");
        assert_eq!(probes[0]["config"]["target"], "1.1.1.1");
        assert_eq!(probes[0]["last_success_timestamp"], 1_700_000_000i64);
        assert_eq!(probes[1]["name"], "api-test-iperf");
        assert!(probes[1]["last_success_timestamp"].is_null());
    }

    #[tokio::test]
    async fn test_metrics_exposes_probe_counters() {
        let state = state().await;
        state.metrics.inc_probe_run("ping", "reported");

        let response = get(state, "/metrics").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("sti_probe_runs_total"));
    }
}
