use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::{
    clients::{health::HealthChecker, status::INTERNAL_SECRET_HEADER},
    error::{ErrorKind, PipelineError},
    models::{
        health::HealthStatus,
        message::NotificationType,
        request::{HandleOutcome, NotificationRequest},
        response::ApiResponse,
        status::StatusUpdate,
    },
    orchestrator::NotificationOrchestrator,
};

const GENERIC_ERROR_MESSAGE: &str = "An unexpected error occurred. Please try again later.";

pub struct GatewayState {
    pub orchestrator: Arc<NotificationOrchestrator>,
    pub internal_secret: String,
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        if let PipelineError::Downstream { status, body, .. } = &self {
            if body.is_object() {
                let status = StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY);
                return (status, Json(body.clone())).into_response();
            }
        }

        let kind = self.kind();
        let status = match kind {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::ValidationError | ErrorKind::MalformedMessage => StatusCode::BAD_REQUEST,
            ErrorKind::ServiceUnavailable | ErrorKind::CircuitOpen => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if self.is_operational() {
            self.to_string()
        } else {
            error!(error = %self, "Unhandled error while serving request");
            GENERIC_ERROR_MESSAGE.to_string()
        };

        let body = ApiResponse::<()>::error(Some(json!({ "kind": kind.to_string() })), message);
        (status, Json(body)).into_response()
    }
}

pub fn health_routes(health_checker: Arc<HealthChecker>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(health_checker)
}

pub fn gateway_routes(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/api/v1/notifications", post(create_notification))
        .route("/api/v1/notifications/{request_id}", get(get_notification_status))
        .route(
            "/api/v1/notifications/{channel}/status",
            post(update_notification_status),
        )
        .route("/api/v1/internal/users/{user_id}/cache", delete(invalidate_user))
        .with_state(state)
}

pub async fn run_api_server(
    app: Router,
    port: u16,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = app.layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "HTTP server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

async fn health_check(State(health_checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    let health = health_checker.check_all().await;

    let status_code = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

fn authorize_internal(headers: &HeaderMap, secret: &str) -> Result<(), Response> {
    let provided = headers
        .get(INTERNAL_SECRET_HEADER)
        .and_then(|value| value.to_str().ok());

    if provided == Some(secret) {
        return Ok(());
    }

    warn!("Rejected internal call with missing or invalid secret");
    let body = ApiResponse::<()>::error(None, "Unauthorized internal request.".to_string());
    Err((StatusCode::UNAUTHORIZED, Json(body)).into_response())
}

async fn create_notification(
    State(state): State<Arc<GatewayState>>,
    payload: Result<Json<NotificationRequest>, JsonRejection>,
) -> Result<Response, PipelineError> {
    let Json(request) = payload.map_err(|e| PipelineError::validation(e.body_text()))?;

    let notification_type = request.notification_type;
    let summary = json!({
        "request_id": request.request_id,
        "notification_type": notification_type,
        "priority": request.priority,
    });

    let outcome = state.orchestrator.handle(request).await?;
    let message = outcome.message(notification_type);

    let (status, data) = match outcome {
        HandleOutcome::Queued(_) => (StatusCode::ACCEPTED, summary),
        HandleOutcome::DisabledByUser => (StatusCode::OK, summary),
        HandleOutcome::AlreadyProcessed(record) | HandleOutcome::PreviouslyFailed(record) => {
            (StatusCode::OK, serde_json::to_value(record)?)
        }
    };

    Ok((status, Json(ApiResponse::success(data, message))).into_response())
}

async fn update_notification_status(
    State(state): State<Arc<GatewayState>>,
    Path(channel): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<StatusUpdate>, JsonRejection>,
) -> Result<Response, PipelineError> {
    if let Err(rejection) = authorize_internal(&headers, &state.internal_secret) {
        return Ok(rejection);
    }

    let channel: NotificationType = channel.parse()?;
    let Json(update) = payload.map_err(|e| PipelineError::validation(e.body_text()))?;

    let record = state.orchestrator.update_status(channel, update).await?;
    let message = format!("{} notification status updated.", channel);

    Ok(Json(ApiResponse::success(record, message)).into_response())
}

async fn get_notification_status(
    State(state): State<Arc<GatewayState>>,
    Path(request_id): Path<String>,
) -> Result<Response, PipelineError> {
    let record = state.orchestrator.get_status(&request_id).await?;

    Ok(Json(ApiResponse::success(record, "Notification retrieved.".to_string())).into_response())
}

async fn invalidate_user(
    State(state): State<Arc<GatewayState>>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(rejection) = authorize_internal(&headers, &state.internal_secret) {
        return rejection;
    }

    state.orchestrator.user_changed(&user_id).await;
    StatusCode::NO_CONTENT.into_response()
}
