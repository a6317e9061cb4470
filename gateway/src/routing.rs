//! API 路由

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::Utc;
use relay_adapter_kafka::{HealthCheckResult, TopicInfo};
use relay_config::TransportSummary;
use relay_errors::{AppError, ProblemDetails};
use relay_ports::{FailureKind, ProduceOutcome, ProduceRequest};
use relay_telemetry::HealthStatus;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use crate::state::AppState;

pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/produce", get(produce))
        .route("/health", get(health_check))
        .route("/topics", get(list_topics))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct ProduceParams {
    pub topic: Option<String>,
    pub msg: Option<String>,
    /// 可选的分区 key
    pub key: Option<String>,
}

/// 写入 Kafka 的 JSON 信封
#[derive(Debug, Clone, Serialize)]
pub struct MessageEnvelope {
    pub message: String,
    pub timestamp: String,
    pub environment: String,
}

#[derive(Debug, Serialize)]
pub struct ProduceResponse {
    pub success: bool,
    pub message: String,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub data: MessageEnvelope,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem: Option<ProblemDetails>,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            kind: None,
            attempts: None,
            problem: None,
        }
    }
}

fn error_response(status: StatusCode, body: ErrorResponse) -> Response {
    (status, Json(body)).into_response()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

async fn produce(State(state): State<AppState>, Query(params): Query<ProduceParams>) -> Response {
    let Some(topic) = non_blank(params.topic) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            ErrorResponse::new("Topic parameter is required"),
        );
    };
    let Some(message) = non_blank(params.msg) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            ErrorResponse::new("Message parameter is required"),
        );
    };
    let topic = topic.trim().to_string();

    let envelope = MessageEnvelope {
        message,
        timestamp: Utc::now().to_rfc3339(),
        environment: state.transport.environment.to_string(),
    };
    let payload = match serde_json::to_vec(&envelope) {
        Ok(payload) => payload,
        Err(e) => {
            error!(error = %e, "Failed to serialize message envelope");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new(format!("Failed to serialize message: {}", e)),
            );
        }
    };

    let mut request = ProduceRequest::new(topic.clone(), payload);
    if let Some(key) = non_blank(params.key) {
        request = request.with_key(key);
    }

    match state.publisher.publish(request).await {
        ProduceOutcome::Acknowledged(receipt) => {
            info!(
                topic = %topic,
                partition = receipt.partition,
                offset = receipt.offset,
                "Message produced"
            );
            Json(ProduceResponse {
                success: true,
                message: "Message produced successfully".to_string(),
                topic,
                partition: receipt.partition,
                offset: receipt.offset,
                data: envelope,
            })
            .into_response()
        }
        ProduceOutcome::Failed(failure) => {
            let problem = AppError::from(&failure).to_problem_details();
            let status =
                StatusCode::from_u16(problem.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            warn!(topic = %topic, status = problem.status, error = %problem.detail, "Produce failed");

            error_response(
                status,
                ErrorResponse {
                    success: false,
                    error: format!("Failed to produce message: {}", failure),
                    kind: Some(failure.kind),
                    attempts: Some(failure.attempts),
                    problem: Some(problem),
                },
            )
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub environment: String,
    pub kafka_config: TransportSummary,
    pub broker: HealthCheckResult,
    pub checks: HealthStatus,
}

async fn health_check(State(state): State<AppState>) -> Response {
    let broker = state.probe.probe().await;

    let mut checks = HealthStatus::new();
    checks.add_check("kafka", broker.healthy, broker.error.clone());

    let (status, code) = if checks.healthy {
        ("healthy", StatusCode::OK)
    } else {
        ("degraded", StatusCode::SERVICE_UNAVAILABLE)
    };

    let body = HealthResponse {
        status,
        environment: state.transport.environment.to_string(),
        kafka_config: state.transport.summary(),
        broker,
        checks,
    };

    (code, Json(body)).into_response()
}

#[derive(Debug, Serialize)]
pub struct TopicsResponse {
    pub success: bool,
    pub count: usize,
    pub topics: Vec<TopicInfo>,
}

async fn list_topics(State(state): State<AppState>) -> Response {
    match state.probe.topics().await {
        Ok(topics) => Json(TopicsResponse {
            success: true,
            count: topics.len(),
            topics,
        })
        .into_response(),
        Err(e) => {
            let problem = e.to_problem_details();
            let status =
                StatusCode::from_u16(problem.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            warn!(status = problem.status, error = %problem.detail, "Topic listing failed");

            error_response(
                status,
                ErrorResponse {
                    problem: Some(problem),
                    ..ErrorResponse::new(format!("Failed to list topics: {}", e))
                },
            )
        }
    }
}

async fn index() -> Json<serde_json::Value> {
    Json(json!({
        "message": "Kafka Relay API",
        "endpoints": {
            "produce": "GET /produce?topic=<topic_name>&msg=<message>[&key=<key>]",
            "health": "GET /health",
            "topics": "GET /topics"
        },
        "example": "GET /produce?topic=payments&msg=Payment processed for order 123"
    }))
}
