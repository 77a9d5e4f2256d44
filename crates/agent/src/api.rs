//! HTTP API: message intake, canary withdrawal, status log, counters,
//! health checks and Prometheus metrics

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use fleetguard_lib::{
    canary::CanaryTester,
    health::HealthRegistry,
    notifier::Notifier,
    observability::AgentMetrics,
    transport::ChannelDelivery,
    Counter, Counters, InboundMessage,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_STATUS_LIMIT: usize = 20;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: AgentMetrics,
    /// Mailboxes of the workers hosted by this process
    pub inboxes: Arc<ChannelDelivery>,
    pub counters: Vec<(String, Arc<Counters>)>,
    pub notifier: Option<Arc<Notifier>>,
    pub canary: Option<Arc<CanaryTester>>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: AgentMetrics,
        inboxes: Arc<ChannelDelivery>,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            inboxes,
            counters: Vec::new(),
            notifier: None,
            canary: None,
        }
    }
}

fn error_body(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<serde_json::Value>) {
    (status, Json(json!({ "error": message.into() })))
}

/// Accept a message for one of this process's workers
async fn submit(
    State(state): State<Arc<AppState>>,
    Json(message): Json<InboundMessage>,
) -> impl IntoResponse {
    if !state.inboxes.has_mailbox(&message.recipient) {
        return error_body(
            StatusCode::NOT_FOUND,
            format!("no agent '{}' hosted here", message.recipient),
        );
    }

    let message_id = message.envelope.message_id.clone();
    let kind = message.envelope.kind();
    let sender = message.sender.clone();

    match state.inboxes.enqueue(message).await {
        Ok(()) => {
            info!(message_id = %message_id, kind = %kind, sender = %sender, "Message accepted");
            (StatusCode::ACCEPTED, Json(json!({ "message_id": message_id })))
        }
        Err(e) => {
            warn!(error = %e, kind = %kind, "Failed to enqueue inbound message");
            error_body(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

/// Abort a running canary test
async fn withdraw(
    State(state): State<Arc<AppState>>,
    Path(update_id): Path<String>,
) -> impl IntoResponse {
    let Some(tester) = &state.canary else {
        return error_body(StatusCode::NOT_FOUND, "canary worker not hosted here");
    };

    if tester.withdraw(&update_id) {
        (
            StatusCode::ACCEPTED,
            Json(json!({ "update_id": update_id, "withdrawn": true })),
        )
    } else {
        error_body(
            StatusCode::NOT_FOUND,
            format!("no canary test running for '{}'", update_id),
        )
    }
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    limit: Option<usize>,
}

/// Most recent status updates, newest first
async fn status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatusQuery>,
) -> Response {
    let Some(notifier) = &state.notifier else {
        return error_body(StatusCode::NOT_FOUND, "notifier worker not hosted here").into_response();
    };

    let updates = notifier.recent(query.limit.unwrap_or(DEFAULT_STATUS_LIMIT));
    Json(updates).into_response()
}

/// Work counters keyed by agent name
async fn counters(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body: BTreeMap<&str, BTreeMap<Counter, u64>> = state
        .counters
        .iter()
        .map(|(name, counters)| (name.as_str(), counters.snapshot()))
        .collect();
    Json(body).into_response()
}

/// 503 only when some component is unhealthy; degraded still serves
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = if health.status.is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/submit", post(submit))
        .route("/withdraw/:update_id", post(withdraw))
        .route("/status", get(status))
        .route("/counters", get(counters))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
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
    use fleetguard_lib::canary::{CanaryConfig, KnownFailures};
    use fleetguard_lib::health::components;
    use fleetguard_lib::{ActionStatus, ActionType, Envelope, ResponseAction, UpdatePackage};
    use std::time::Duration;
    use tower::ServiceExt;

    async fn setup_test_app() -> (Router, Arc<AppState>) {
        let health_registry = HealthRegistry::new();
        health_registry
            .register_all(&[components::DIRECTORY, components::TRANSPORT])
            .await;

        let counters = Arc::new(Counters::new());
        let mut state = AppState::new(
            health_registry,
            AgentMetrics::new(),
            Arc::new(ChannelDelivery::new()),
        );
        state.counters = vec![("communication_agent".to_string(), counters.clone())];
        state.notifier = Some(Arc::new(Notifier::new(counters)));
        state.canary = Some(Arc::new(CanaryTester::with_signal(
            CanaryConfig {
                sample_fraction: 1.0,
                window_units: 500,
                unit_interval: Duration::from_millis(5),
                seed: Some(1),
                ..CanaryConfig::default()
            },
            Arc::new(KnownFailures::default()),
        )));

        let state = Arc::new(state);
        (create_router(state.clone()), state)
    }

    fn update(id: &str) -> UpdatePackage {
        UpdatePackage {
            update_id: id.to_string(),
            version: "1.2.0".to_string(),
            description: "cache tuning".to_string(),
            target_subjects: vec!["server-1".to_string()],
            timestamp: 0,
        }
    }

    fn json_request(method: &str, uri: &str, body: &impl serde::Serialize) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_submit_reaches_worker_inbox() {
        let (app, state) = setup_test_app().await;
        let mut inbox = state.inboxes.mailbox("canary_agent");

        let inbound = InboundMessage {
            sender: "fgctl".to_string(),
            recipient: "canary_agent".to_string(),
            envelope: Envelope::new(update("UPD-100")),
        };
        let response = app
            .oneshot(json_request("POST", "/submit", &inbound))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert_eq!(body["message_id"], inbound.envelope.message_id);

        let received = inbox.recv().await.unwrap();
        assert_eq!(received, inbound);
    }

    #[tokio::test]
    async fn test_submit_to_unhosted_agent_is_not_found() {
        let (app, _state) = setup_test_app().await;

        let inbound = InboundMessage {
            sender: "fgctl".to_string(),
            recipient: "response_agent".to_string(),
            envelope: Envelope::new(update("UPD-101")),
        };
        let response = app
            .oneshot(json_request("POST", "/submit", &inbound))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_submit_rejects_unknown_kind() {
        let (app, state) = setup_test_app().await;
        let _inbox = state.inboxes.mailbox("canary_agent");

        let body = json!({
            "sender": "fgctl",
            "recipient": "canary_agent",
            "envelope": {
                "message_id": "m-1",
                "sent_at": 0,
                "message": { "kind": "reboot_everything" }
            }
        });
        let response = app
            .oneshot(json_request("POST", "/submit", &body))
            .await
            .unwrap();

        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_withdraw_running_and_unknown() {
        let (app, state) = setup_test_app().await;
        let tester = state.canary.clone().unwrap();

        let running = tokio::spawn(async move { tester.run_test(&update("UPD-200")).await });
        while state.canary.as_ref().unwrap().running().is_empty() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/withdraw/UPD-200")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(running.await.unwrap().is_err());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/withdraw/UPD-404")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status_and_counters() {
        let (app, state) = setup_test_app().await;
        let action = ResponseAction {
            action_id: "ACTION-1".to_string(),
            action_type: ActionType::ScaleUp,
            target_subjects: vec!["server-2".to_string()],
            reason: "Rule-based: CPU anomaly".to_string(),
            status: ActionStatus::Completed,
            timestamp: 0,
            oracle_request_id: None,
        };
        state.notifier.as_ref().unwrap().publish(&action);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/status?limit=5").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["status"], "RESOLVED");

        let response = app
            .oneshot(Request::builder().uri("/counters").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["communication_agent"]["notifications_sent"], 1);
        assert_eq!(body["communication_agent"]["tests_run"], 0);
    }

    #[tokio::test]
    async fn test_healthz_and_readyz() {
        let (app, state) = setup_test_app().await;

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.health_registry.set_ready(true).await;
        state
            .health_registry
            .set_degraded(components::TRANSPORT, "response_agent unreachable")
            .await;

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "degraded");
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        AgentMetrics::new().inc_messages_sent("update_package");
        let (app, _state) = setup_test_app().await;

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("fleetguard_messages_sent_total"));
    }
}
