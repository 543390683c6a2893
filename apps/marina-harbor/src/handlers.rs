use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use marina_core::{
    CredentialReveal, HostError, HostReceipt, HostedListing, HostingCoordinator, Identity,
    RevalidationReport, UnhostReceipt,
};
use serde::{Deserialize, Serialize};
use tracing::error;

pub type SharedCoordinator = Arc<HostingCoordinator>;

pub fn build_router(coordinator: SharedCoordinator) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/hosted", post(host_account).get(list_hosted))
        .route("/hosted/revalidate", post(revalidate))
        .route("/hosted/:identifier", delete(unhost_account))
        .route("/hosted/:identifier/credential", get(view_credential))
        .with_state(coordinator)
}

#[derive(Debug, Deserialize)]
pub struct HostRequest {
    pub requester: Identity,
    pub credential: String,
}

#[derive(Debug, Serialize)]
pub struct HostResponse {
    pub success: bool,
    pub uid: u64,
    pub identity: Identity,
    pub updated: bool,
}

#[derive(Debug, Deserialize)]
pub struct RequesterQuery {
    pub requester: Identity,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub requester: Identity,
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub uids_only: bool,
}

#[derive(Debug, Deserialize)]
pub struct RevalidateRequest {
    pub requester: Identity,
}

#[derive(Debug, Serialize)]
pub struct UnhostResponse {
    pub success: bool,
    pub identity: Identity,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    reason: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

/// Maps the coordinator's typed rejections onto HTTP statuses. Internal
/// failures were already logged with context; callers only see a generic
/// message.
pub struct ApiError(HostError);

impl From<HostError> for ApiError {
    fn from(err: HostError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, reason, retry_after) = match &self.0 {
            HostError::RateLimited { retry_after } => {
                (StatusCode::TOO_MANY_REQUESTS, "rate_limited", Some(*retry_after))
            }
            HostError::ValidationFailed => {
                (StatusCode::UNPROCESSABLE_ENTITY, "validation_failed", None)
            }
            HostError::Blacklisted => (StatusCode::FORBIDDEN, "blacklisted", None),
            HostError::Unauthorized => (StatusCode::FORBIDDEN, "unauthorized", None),
            HostError::QuotaExceeded { .. } => (StatusCode::CONFLICT, "quota_exceeded", None),
            HostError::NotFound => (StatusCode::NOT_FOUND, "not_found", None),
            HostError::NotOwned => (StatusCode::FORBIDDEN, "not_owned", None),
            HostError::Storage(_) | HostError::WorkerStart(_) => {
                error!(error = %self.0, "operation failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };
        let message = if self.0.is_user_facing() {
            self.0.to_string()
        } else {
            "internal error".to_string()
        };
        let body = ErrorBody {
            success: false,
            reason,
            message,
            retry_after,
        };
        (status, Json(body)).into_response()
    }
}

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn host_account(
    State(coordinator): State<SharedCoordinator>,
    Json(request): Json<HostRequest>,
) -> Result<Json<HostResponse>, ApiError> {
    let HostReceipt {
        uid,
        identity,
        updated,
    } = coordinator.host(request.requester, &request.credential).await?;
    Ok(Json(HostResponse {
        success: true,
        uid,
        identity,
        updated,
    }))
}

pub async fn unhost_account(
    State(coordinator): State<SharedCoordinator>,
    Path(identifier): Path<String>,
    Query(query): Query<RequesterQuery>,
) -> Result<Json<UnhostResponse>, ApiError> {
    let UnhostReceipt { identity } = coordinator.unhost(query.requester, &identifier).await?;
    Ok(Json(UnhostResponse {
        success: true,
        identity,
    }))
}

pub async fn list_hosted(
    State(coordinator): State<SharedCoordinator>,
    Query(query): Query<ListQuery>,
) -> Result<Json<HostedListing>, ApiError> {
    let listing = coordinator
        .list(query.requester, query.page.unwrap_or(1), query.uids_only)
        .await?;
    Ok(Json(listing))
}

pub async fn view_credential(
    State(coordinator): State<SharedCoordinator>,
    Path(identifier): Path<String>,
    Query(query): Query<RequesterQuery>,
) -> Result<Json<CredentialReveal>, ApiError> {
    // Unlike unhost, the view operation only ever takes a uid.
    let uid: u64 = identifier.parse().map_err(|_| HostError::NotFound)?;
    let reveal = coordinator.view_credential(query.requester, uid).await?;
    Ok(Json(reveal))
}

pub async fn revalidate(
    State(coordinator): State<SharedCoordinator>,
    Json(request): Json<RevalidateRequest>,
) -> Result<Json<RevalidationReport>, ApiError> {
    let report = coordinator.revalidate(request.requester).await?;
    Ok(Json(report))
}
