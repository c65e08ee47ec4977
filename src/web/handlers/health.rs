// GET /__health and GET /__gtg.
//
// /__health always answers 200 with a report; /__gtg is the load balancer
// probe and answers 503 when the queue proxy check fails.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::web::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResult {
    pub id: &'static str,
    pub name: &'static str,
    pub ok: bool,
    pub severity: u8,
    pub business_impact: &'static str,
    pub technical_summary: &'static str,
    pub check_output: String,
    pub last_updated: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub schema_version: u8,
    pub name: &'static str,
    pub description: &'static str,
    pub checks: Vec<HealthCheckResult>,
    pub ok: bool,
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let outcome = state.health.queue_proxy_reachable().await;
    let ok = outcome.is_ok();
    let check = HealthCheckResult {
        id: "message-queue-proxy-reachable",
        name: "MessageQueueProxyReachable",
        ok,
        severity: 1,
        business_impact: "Notifications about newly modified/published content will not reach this app, nor will they reach its clients.",
        technical_summary: "Message queue proxy is not reachable/healthy",
        check_output: match outcome {
            Ok(()) => "OK".to_string(),
            Err(e) => format!("{e:#}"),
        },
        last_updated: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    };

    Json(HealthReport {
        schema_version: 1,
        name: "notifications-push",
        description: "Checks if all the dependent services are reachable and healthy.",
        checks: vec![check],
        ok,
    })
}

pub async fn gtg(State(state): State<AppState>) -> impl IntoResponse {
    match state.health.queue_proxy_reachable().await {
        Ok(()) => (StatusCode::OK, "OK"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "Queue proxy unreachable"),
    }
}
