//! JSON surface for programmatic clients under `/api/v1`.
//!
//! Two operations are exposed: posting a receipt against a purchase-order
//! line and recording a requisition decision. Both run the same repository
//! paths as the forms; responses carry the resulting records plus the
//! parent's recomputed status so callers never have to re-fetch.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::post;
use axum::Router;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use opsdesk_core::domain::purchasing::ApprovalDecision;
use opsdesk_core::errors::{ApplicationError, InterfaceError};
use opsdesk_db::repositories::{
    RepositoryError, SqlPurchaseOrderRepository, SqlRequisitionRepository,
};

use crate::web::{application_error, correlation_id, operation_context, status_for, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/orders/{id}/receipts", post(post_receipt))
        .route("/api/v1/requisitions/{id}/decisions", post(post_decision))
}

type ApiResult = Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)>;

/// Domain refusals keep their reason in the payload; anything else gets the
/// safe message only. The correlation id rides along either way.
fn api_error(error: RepositoryError, correlation: &str) -> (StatusCode, Json<serde_json::Value>) {
    let application = application_error(error);
    let domain_reason = match &application {
        ApplicationError::Domain(domain) => Some(domain.to_string()),
        _ => None,
    };
    let interface = application.into_interface(correlation);
    error!(
        event_name = "api.request_failed",
        correlation_id = correlation,
        error = %interface,
        "api request failed"
    );
    let message = domain_reason.unwrap_or_else(|| interface.user_message().to_owned());
    (
        status_for(&interface),
        Json(json!({ "error": message, "correlation_id": correlation })),
    )
}

fn bad_request(message: &str, correlation: &str) -> (StatusCode, Json<serde_json::Value>) {
    let interface = InterfaceError::BadRequest {
        message: message.to_owned(),
        correlation_id: correlation.to_owned(),
    };
    (status_for(&interface), Json(json!({ "error": message, "correlation_id": correlation })))
}

fn api_not_found(entity: &str, correlation: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("{entity} not found"), "correlation_id": correlation })),
    )
}

#[derive(Debug, Deserialize)]
pub struct ReceiptRequest {
    pub line_id: String,
    pub quantity: Decimal,
    #[serde(default)]
    pub received_by: String,
    #[serde(default)]
    pub note: String,
}

async fn post_receipt(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    Json(request): Json<ReceiptRequest>,
) -> ApiResult {
    let correlation = correlation_id();
    let repo = SqlPurchaseOrderRepository::new(state.db_pool.clone());

    let order = repo
        .find_by_id(&order_id)
        .await
        .map_err(|e| api_error(e, &correlation))?
        .ok_or_else(|| api_not_found("purchase order", &correlation))?;
    let lines = repo.list_lines(&order_id).await.map_err(|e| api_error(e, &correlation))?;
    if !lines.iter().any(|line| line.id == request.line_id) {
        return Err(bad_request("the line does not belong to this order", &correlation));
    }

    let ctx = operation_context(&request.received_by);
    let receipt = repo
        .post_receipt(&request.line_id, request.quantity, request.note.trim(), &ctx)
        .await
        .map_err(|e| api_error(e, &correlation))?;

    // Re-read for the recomputed status and any payable linked on full
    // receipt.
    let order = repo
        .find_by_id(&order.id)
        .await
        .map_err(|e| api_error(e, &correlation))?
        .ok_or_else(|| api_not_found("purchase order", &correlation))?;

    Ok(Json(json!({
        "receipt": receipt,
        "order": {
            "id": order.id,
            "code": order.code,
            "status": order.status,
            "linked_expense_id": order.linked_expense_id,
        },
        "correlation_id": correlation,
    })))
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub approver: String,
    pub decision: String,
    #[serde(default)]
    pub note: String,
}

async fn post_decision(
    State(state): State<AppState>,
    Path(requisition_id): Path<String>,
    Json(request): Json<DecisionRequest>,
) -> ApiResult {
    let correlation = correlation_id();
    let Some(decision) = ApprovalDecision::parse(&request.decision) else {
        return Err(bad_request("decision must be `approved` or `rejected`", &correlation));
    };
    let approver = request.approver.trim();
    if approver.is_empty() {
        return Err(bad_request("approver is required", &correlation));
    }

    let repo = SqlRequisitionRepository::new(state.db_pool.clone());
    if repo
        .find_by_id(&requisition_id)
        .await
        .map_err(|e| api_error(e, &correlation))?
        .is_none()
    {
        return Err(api_not_found("requisition", &correlation));
    }

    let ctx = operation_context(approver);
    let approval = repo
        .decide(&requisition_id, approver, decision, request.note.trim(), &ctx)
        .await
        .map_err(|e| api_error(e, &correlation))?;
    let requisition = repo
        .find_by_id(&requisition_id)
        .await
        .map_err(|e| api_error(e, &correlation))?
        .ok_or_else(|| api_not_found("requisition", &correlation))?;

    Ok(Json(json!({
        "approval": approval,
        "requisition": {
            "id": requisition.id,
            "code": requisition.code,
            "status": requisition.status,
        },
        "correlation_id": correlation,
    })))
}
