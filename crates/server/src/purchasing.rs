//! Purchasing pages: cost centers, requisitions, and purchase orders.
//!
//! A requisition walks draft -> pending -> approved/rejected through the
//! submit and decision forms, and an approved one converts into a draft
//! purchase order against a chosen supplier. Receipts are posted per order
//! line and flow into stock through the repository.

use std::collections::HashMap;

use axum::extract::{Form, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tera::Context;

use opsdesk_core::domain::purchasing::{
    order_total, ApprovalDecision, PurchaseOrder, PurchaseOrderStatus, RequisitionLine,
    RequisitionStatus,
};
use opsdesk_db::repositories::{
    NewRequisition, RequisitionLineDraft, SqlCostCenterRepository, SqlProductRepository,
    SqlPurchaseOrderRepository, SqlRequisitionRepository, SqlServiceRepository,
    SqlSupplierRepository,
};

use crate::web::{
    base_context, correlation_id, not_found, operation_context, optional, page_error,
    parse_date_field, parse_money_field, redirect, render, render_field_errors,
    render_form_failure, require_text_field, AppState, FormResult, NoticeQuery, PageResult,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/cost-centers", get(cost_centers_page).post(upsert_cost_center))
        .route("/cost-centers/{id}/deactivate", post(deactivate_cost_center))
        .route("/requisitions", get(requisitions_page).post(create_requisition))
        .route("/requisitions/table", get(requisitions_table))
        .route("/requisitions/{id}", get(requisition_detail_page).post(update_requisition))
        .route("/requisitions/{id}/lines", post(add_requisition_line))
        .route("/requisitions/{id}/lines/{line_id}/delete", post(delete_requisition_line))
        .route("/requisitions/{id}/submit", post(submit_requisition))
        .route("/requisitions/{id}/decision", post(decide_requisition))
        .route("/requisitions/{id}/convert", post(convert_requisition))
        .route("/orders", get(orders_page))
        .route("/orders/table", get(orders_table))
        .route("/orders/{id}", get(order_detail_page).post(update_order))
        .route("/orders/{id}/send", post(send_order))
        .route("/orders/{id}/cancel", post(cancel_order))
        .route("/orders/{id}/receipts", post(post_receipt))
}

// ---------------------------------------------------------------------------
// Cost centers
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct CostCenterQuery {
    pub include_inactive: Option<String>,
    pub notice: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CostCenterForm {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub name: String,
}

async fn cost_centers_context(
    state: &AppState,
    include_inactive: bool,
    notice: &NoticeQuery,
    correlation: &str,
) -> Result<Context, (StatusCode, Html<String>)> {
    let centers = SqlCostCenterRepository::new(state.db_pool.clone())
        .list(include_inactive)
        .await
        .map_err(|e| page_error(e, correlation))?;

    let mut context = base_context("cost-centers", notice);
    context.insert("cost_centers", &centers);
    context.insert("include_inactive", &include_inactive);
    Ok(context)
}

async fn cost_centers_page(
    State(state): State<AppState>,
    Query(query): Query<CostCenterQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let include_inactive =
        query.include_inactive.as_deref().is_some_and(|v| !v.is_empty() && v != "0");
    let notice = NoticeQuery { notice: query.notice };
    let context = cost_centers_context(&state, include_inactive, &notice, &correlation).await?;
    render(&state, "cost_centers.html", &context)
}

async fn upsert_cost_center(
    State(state): State<AppState>,
    Form(form): Form<CostCenterForm>,
) -> FormResult {
    let correlation = correlation_id();
    match SqlCostCenterRepository::new(state.db_pool.clone())
        .upsert(&form.code, &form.name)
        .await
    {
        Ok(_) => Ok(redirect("/cost-centers", "updated").into_response()),
        Err(e) => {
            let context =
                cost_centers_context(&state, false, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "cost_centers.html", context, e, &correlation)
        }
    }
}

async fn deactivate_cost_center(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> FormResult {
    let correlation = correlation_id();
    SqlCostCenterRepository::new(state.db_pool.clone())
        .deactivate(&id)
        .await
        .map_err(|e| page_error(e, &correlation))?;
    Ok(redirect("/cost-centers", "updated").into_response())
}

// ---------------------------------------------------------------------------
// Requisitions
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    pub status: Option<String>,
    pub notice: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RequisitionForm {
    #[serde(default)]
    pub requester: String,
    #[serde(default)]
    pub cost_center_id: String,
    #[serde(default)]
    pub justification: String,
    #[serde(default)]
    pub needed_by: String,
}

async fn requisitions_context(
    state: &AppState,
    status: Option<RequisitionStatus>,
    notice: &NoticeQuery,
    correlation: &str,
) -> Result<Context, (StatusCode, Html<String>)> {
    let requisitions = SqlRequisitionRepository::new(state.db_pool.clone())
        .list(status)
        .await
        .map_err(|e| page_error(e, correlation))?;
    let centers = SqlCostCenterRepository::new(state.db_pool.clone())
        .list(false)
        .await
        .map_err(|e| page_error(e, correlation))?;

    let mut context = base_context("requisitions", notice);
    context.insert("requisitions", &requisitions);
    context.insert("cost_centers", &centers);
    context.insert("status_filter", &status.map(|s| s.as_str()).unwrap_or(""));
    Ok(context)
}

async fn requisitions_page(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let status = query.status.as_deref().and_then(RequisitionStatus::parse);
    let notice = NoticeQuery { notice: query.notice };
    let context = requisitions_context(&state, status, &notice, &correlation).await?;
    render(&state, "requisitions.html", &context)
}

async fn requisitions_table(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let status = query.status.as_deref().and_then(RequisitionStatus::parse);
    let context =
        requisitions_context(&state, status, &NoticeQuery::default(), &correlation).await?;
    render(&state, "requisitions_table.html", &context)
}

async fn create_requisition(
    State(state): State<AppState>,
    Form(form): Form<RequisitionForm>,
) -> FormResult {
    let correlation = correlation_id();
    let mut errors = Vec::new();
    let requester = require_text_field(&mut errors, "requester", &form.requester);
    let needed_by = parse_date_field(&mut errors, "needed by", &form.needed_by);
    if !errors.is_empty() {
        let context =
            requisitions_context(&state, None, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "requisitions.html", context, errors);
    }

    let new = NewRequisition {
        requester,
        cost_center_id: optional(form.cost_center_id),
        justification: form.justification.trim().to_owned(),
        needed_by,
    };
    match SqlRequisitionRepository::new(state.db_pool.clone()).create(new).await {
        Ok(requisition) => {
            Ok(redirect(&format!("/requisitions/{}", requisition.id), "created").into_response())
        }
        Err(e) => {
            let context =
                requisitions_context(&state, None, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "requisitions.html", context, e, &correlation)
        }
    }
}

async fn requisition_detail_context(
    state: &AppState,
    id: &str,
    notice: &NoticeQuery,
    correlation: &str,
) -> Result<Context, (StatusCode, Html<String>)> {
    let repo = SqlRequisitionRepository::new(state.db_pool.clone());
    let requisition = repo
        .find_by_id(id)
        .await
        .map_err(|e| page_error(e, correlation))?
        .ok_or_else(|| not_found("Requisition"))?;
    let lines = repo.list_lines(id).await.map_err(|e| page_error(e, correlation))?;
    let approvals = repo.list_approvals(id).await.map_err(|e| page_error(e, correlation))?;
    let centers = SqlCostCenterRepository::new(state.db_pool.clone())
        .list(false)
        .await
        .map_err(|e| page_error(e, correlation))?;
    let products = SqlProductRepository::new(state.db_pool.clone())
        .list(false)
        .await
        .map_err(|e| page_error(e, correlation))?;
    let services = SqlServiceRepository::new(state.db_pool.clone())
        .list(false)
        .await
        .map_err(|e| page_error(e, correlation))?;
    let suppliers = SqlSupplierRepository::new(state.db_pool.clone())
        .list(None)
        .await
        .map_err(|e| page_error(e, correlation))?;

    let estimate: rust_decimal::Decimal =
        lines.iter().map(|line| line.quantity * line.estimated_unit_cost).sum();

    let mut context = base_context("requisitions", notice);
    context.insert("requisition", &requisition);
    context.insert("lines", &lines);
    context.insert("approvals", &approvals);
    context.insert("cost_centers", &centers);
    context.insert("products", &products);
    context.insert("services", &services);
    context.insert("suppliers", &suppliers);
    context.insert("estimate", &opsdesk_core::money::quantize(estimate));
    context.insert("can_edit", &(requisition.status == RequisitionStatus::Draft));
    context.insert("can_submit", &(requisition.status == RequisitionStatus::Draft));
    context.insert("can_decide", &(requisition.status == RequisitionStatus::Pending));
    context.insert("can_convert", &(requisition.status == RequisitionStatus::Approved));
    Ok(context)
}

async fn requisition_detail_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(notice): Query<NoticeQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let context = requisition_detail_context(&state, &id, &notice, &correlation).await?;
    render(&state, "requisition_detail.html", &context)
}

async fn update_requisition(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<RequisitionForm>,
) -> FormResult {
    let correlation = correlation_id();
    let repo = SqlRequisitionRepository::new(state.db_pool.clone());
    let mut requisition = repo
        .find_by_id(&id)
        .await
        .map_err(|e| page_error(e, &correlation))?
        .ok_or_else(|| not_found("Requisition"))?;

    let mut errors = Vec::new();
    requisition.requester = require_text_field(&mut errors, "requester", &form.requester);
    requisition.cost_center_id = optional(form.cost_center_id);
    requisition.justification = form.justification.trim().to_owned();
    requisition.needed_by = parse_date_field(&mut errors, "needed by", &form.needed_by);
    if !errors.is_empty() {
        let context =
            requisition_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "requisition_detail.html", context, errors);
    }

    match repo.save(requisition).await {
        Ok(_) => Ok(redirect(&format!("/requisitions/{id}"), "updated").into_response()),
        Err(e) => {
            let context =
                requisition_detail_context(&state, &id, &NoticeQuery::default(), &correlation)
                    .await?;
            render_form_failure(&state, "requisition_detail.html", context, e, &correlation)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RequisitionLineForm {
    #[serde(default)]
    pub product_id: String,
    #[serde(default)]
    pub service_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub quantity: String,
    #[serde(default)]
    pub estimated_unit_cost: String,
}

fn line_drafts(lines: Vec<RequisitionLine>) -> Vec<RequisitionLineDraft> {
    lines
        .into_iter()
        .map(|line| RequisitionLineDraft {
            product_id: line.product_id,
            service_id: line.service_id,
            description: line.description,
            quantity: line.quantity,
            estimated_unit_cost: line.estimated_unit_cost,
        })
        .collect()
}

async fn add_requisition_line(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<RequisitionLineForm>,
) -> FormResult {
    let correlation = correlation_id();
    let mut errors = Vec::new();
    let quantity = parse_money_field(&mut errors, "quantity", &form.quantity);
    let estimated_unit_cost =
        parse_money_field(&mut errors, "estimated unit cost", &form.estimated_unit_cost);
    if !errors.is_empty() {
        let context =
            requisition_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "requisition_detail.html", context, errors);
    }

    let repo = SqlRequisitionRepository::new(state.db_pool.clone());
    let mut drafts =
        line_drafts(repo.list_lines(&id).await.map_err(|e| page_error(e, &correlation))?);
    drafts.push(RequisitionLineDraft {
        product_id: optional(form.product_id),
        service_id: optional(form.service_id),
        description: form.description.trim().to_owned(),
        quantity,
        estimated_unit_cost,
    });

    match repo.replace_lines(&id, drafts).await {
        Ok(_) => Ok(redirect(&format!("/requisitions/{id}"), "updated").into_response()),
        Err(e) => {
            let context =
                requisition_detail_context(&state, &id, &NoticeQuery::default(), &correlation)
                    .await?;
            render_form_failure(&state, "requisition_detail.html", context, e, &correlation)
        }
    }
}

async fn delete_requisition_line(
    State(state): State<AppState>,
    Path((id, line_id)): Path<(String, String)>,
) -> FormResult {
    let correlation = correlation_id();
    let repo = SqlRequisitionRepository::new(state.db_pool.clone());
    let remaining: Vec<_> = repo
        .list_lines(&id)
        .await
        .map_err(|e| page_error(e, &correlation))?
        .into_iter()
        .filter(|line| line.id != line_id)
        .collect();

    match repo.replace_lines(&id, line_drafts(remaining)).await {
        Ok(_) => Ok(redirect(&format!("/requisitions/{id}"), "deleted").into_response()),
        Err(e) => {
            let context =
                requisition_detail_context(&state, &id, &NoticeQuery::default(), &correlation)
                    .await?;
            render_form_failure(&state, "requisition_detail.html", context, e, &correlation)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SubmitForm {
    #[serde(default)]
    pub actor: String,
}

async fn submit_requisition(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<SubmitForm>,
) -> FormResult {
    let correlation = correlation_id();
    let ctx = operation_context(&form.actor);
    match SqlRequisitionRepository::new(state.db_pool.clone()).submit(&id, &ctx).await {
        Ok(_) => Ok(redirect(&format!("/requisitions/{id}"), "submitted").into_response()),
        Err(e) => {
            let context =
                requisition_detail_context(&state, &id, &NoticeQuery::default(), &correlation)
                    .await?;
            render_form_failure(&state, "requisition_detail.html", context, e, &correlation)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DecisionForm {
    #[serde(default)]
    pub approver: String,
    #[serde(default)]
    pub decision: String,
    #[serde(default)]
    pub note: String,
}

async fn decide_requisition(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<DecisionForm>,
) -> FormResult {
    let correlation = correlation_id();
    let mut errors = Vec::new();
    let approver = require_text_field(&mut errors, "approver", &form.approver);
    let decision = match ApprovalDecision::parse(form.decision.trim()) {
        Some(decision) => decision,
        None => {
            errors.push("decision must be approved or rejected".to_owned());
            ApprovalDecision::Approved
        }
    };
    if !errors.is_empty() {
        let context =
            requisition_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "requisition_detail.html", context, errors);
    }

    let ctx = operation_context(&approver);
    match SqlRequisitionRepository::new(state.db_pool.clone())
        .decide(&id, &approver, decision, form.note.trim(), &ctx)
        .await
    {
        Ok(_) => Ok(redirect(&format!("/requisitions/{id}"), "decided").into_response()),
        Err(e) => {
            let context =
                requisition_detail_context(&state, &id, &NoticeQuery::default(), &correlation)
                    .await?;
            render_form_failure(&state, "requisition_detail.html", context, e, &correlation)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ConvertForm {
    #[serde(default)]
    pub supplier_id: String,
    #[serde(default)]
    pub freight_cost: String,
    #[serde(default)]
    pub expected_at: String,
}

async fn convert_requisition(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<ConvertForm>,
) -> FormResult {
    let correlation = correlation_id();
    let mut errors = Vec::new();
    let supplier_id = require_text_field(&mut errors, "supplier", &form.supplier_id);
    let freight_cost = parse_money_field(&mut errors, "freight", &form.freight_cost);
    let expected_at = parse_date_field(&mut errors, "expected date", &form.expected_at);
    if !errors.is_empty() {
        let context =
            requisition_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "requisition_detail.html", context, errors);
    }

    let ctx = operation_context("web");
    match SqlPurchaseOrderRepository::new(state.db_pool.clone())
        .create_from_requisition(&id, &supplier_id, freight_cost, expected_at, &ctx)
        .await
    {
        Ok(order) => Ok(redirect(&format!("/orders/{}", order.id), "converted").into_response()),
        Err(e) => {
            let context =
                requisition_detail_context(&state, &id, &NoticeQuery::default(), &correlation)
                    .await?;
            render_form_failure(&state, "requisition_detail.html", context, e, &correlation)
        }
    }
}

// ---------------------------------------------------------------------------
// Purchase orders
// ---------------------------------------------------------------------------

async fn orders_context(
    state: &AppState,
    status: Option<PurchaseOrderStatus>,
    notice: &NoticeQuery,
    correlation: &str,
) -> Result<Context, (StatusCode, Html<String>)> {
    let orders = SqlPurchaseOrderRepository::new(state.db_pool.clone())
        .list(status)
        .await
        .map_err(|e| page_error(e, correlation))?;
    let suppliers = SqlSupplierRepository::new(state.db_pool.clone())
        .list(None)
        .await
        .map_err(|e| page_error(e, correlation))?;

    let supplier_names: HashMap<&str, &str> =
        suppliers.iter().map(|s| (s.id.as_str(), s.legal_name.as_str())).collect();
    let rows: Vec<serde_json::Value> = orders
        .iter()
        .map(|order| {
            json!({
                "id": order.id,
                "code": order.code,
                "status": order.status.as_str(),
                "supplier_name": supplier_names.get(order.supplier_id.as_str()).unwrap_or(&"?"),
                "ordered_at": order.ordered_at,
                "expected_at": order.expected_at,
                "freight_cost": order.freight_cost,
            })
        })
        .collect();

    let mut context = base_context("orders", notice);
    context.insert("rows", &rows);
    context.insert("status_filter", &status.map(|s| s.as_str()).unwrap_or(""));
    Ok(context)
}

async fn orders_page(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let status = query.status.as_deref().and_then(PurchaseOrderStatus::parse);
    let notice = NoticeQuery { notice: query.notice };
    let context = orders_context(&state, status, &notice, &correlation).await?;
    render(&state, "orders.html", &context)
}

async fn orders_table(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let status = query.status.as_deref().and_then(PurchaseOrderStatus::parse);
    let context = orders_context(&state, status, &NoticeQuery::default(), &correlation).await?;
    render(&state, "orders_table.html", &context)
}

async fn order_detail_context(
    state: &AppState,
    id: &str,
    notice: &NoticeQuery,
    correlation: &str,
) -> Result<Context, (StatusCode, Html<String>)> {
    let repo = SqlPurchaseOrderRepository::new(state.db_pool.clone());
    let order = repo
        .find_by_id(id)
        .await
        .map_err(|e| page_error(e, correlation))?
        .ok_or_else(|| not_found("Purchase order"))?;
    let lines = repo.list_lines(id).await.map_err(|e| page_error(e, correlation))?;
    let receipts = repo.list_receipts(id).await.map_err(|e| page_error(e, correlation))?;
    let supplier = SqlSupplierRepository::new(state.db_pool.clone())
        .find_by_id(&order.supplier_id)
        .await
        .map_err(|e| page_error(e, correlation))?;

    let line_names: HashMap<&str, &str> =
        lines.iter().map(|l| (l.id.as_str(), l.description.as_str())).collect();
    let receipt_rows: Vec<serde_json::Value> = receipts
        .iter()
        .map(|receipt| {
            json!({
                "line": line_names.get(receipt.purchase_order_line_id.as_str()).unwrap_or(&"?"),
                "quantity": receipt.quantity,
                "received_by": receipt.received_by,
                "note": receipt.note,
                "received_at": receipt.received_at,
            })
        })
        .collect();
    let line_rows: Vec<serde_json::Value> = lines
        .iter()
        .map(|line| {
            json!({
                "id": line.id,
                "description": line.description,
                "quantity_ordered": line.quantity_ordered,
                "quantity_received": line.quantity_received,
                "outstanding": line.outstanding(),
                "unit_cost": line.unit_cost,
            })
        })
        .collect();

    let mut context = base_context("orders", notice);
    context.insert("total", &order_total(&lines, order.freight_cost));
    context.insert("can_edit", &matches!(order.status, PurchaseOrderStatus::Draft | PurchaseOrderStatus::Sent));
    context.insert("can_send", &(order.status == PurchaseOrderStatus::Draft));
    context.insert(
        "can_cancel",
        &order.can_transition_to(PurchaseOrderStatus::Cancelled),
    );
    context.insert(
        "can_receive",
        &matches!(
            order.status,
            PurchaseOrderStatus::Sent | PurchaseOrderStatus::PartiallyReceived
        ),
    );
    context.insert("order", &order);
    context.insert("supplier", &supplier);
    context.insert("lines", &line_rows);
    context.insert("receipts", &receipt_rows);
    Ok(context)
}

async fn order_detail_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(notice): Query<NoticeQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let context = order_detail_context(&state, &id, &notice, &correlation).await?;
    render(&state, "order_detail.html", &context)
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderForm {
    #[serde(default)]
    pub expected_at: String,
    #[serde(default)]
    pub freight_cost: String,
    #[serde(default)]
    pub notes: String,
}

async fn update_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<OrderForm>,
) -> FormResult {
    let correlation = correlation_id();
    let repo = SqlPurchaseOrderRepository::new(state.db_pool.clone());
    let mut order: PurchaseOrder = repo
        .find_by_id(&id)
        .await
        .map_err(|e| page_error(e, &correlation))?
        .ok_or_else(|| not_found("Purchase order"))?;

    let mut errors = Vec::new();
    order.expected_at = parse_date_field(&mut errors, "expected date", &form.expected_at);
    order.freight_cost = parse_money_field(&mut errors, "freight", &form.freight_cost);
    order.notes = form.notes.trim().to_owned();
    if !errors.is_empty() {
        let context =
            order_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "order_detail.html", context, errors);
    }

    match repo.save(order).await {
        Ok(_) => Ok(redirect(&format!("/orders/{id}"), "updated").into_response()),
        Err(e) => {
            let context =
                order_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "order_detail.html", context, e, &correlation)
        }
    }
}

async fn send_order(State(state): State<AppState>, Path(id): Path<String>) -> FormResult {
    let correlation = correlation_id();
    let ctx = operation_context("web");
    match SqlPurchaseOrderRepository::new(state.db_pool.clone()).mark_sent(&id, &ctx).await {
        Ok(_) => Ok(redirect(&format!("/orders/{id}"), "sent").into_response()),
        Err(e) => {
            let context =
                order_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "order_detail.html", context, e, &correlation)
        }
    }
}

async fn cancel_order(State(state): State<AppState>, Path(id): Path<String>) -> FormResult {
    let correlation = correlation_id();
    let ctx = operation_context("web");
    match SqlPurchaseOrderRepository::new(state.db_pool.clone()).cancel(&id, &ctx).await {
        Ok(_) => Ok(redirect(&format!("/orders/{id}"), "cancelled").into_response()),
        Err(e) => {
            let context =
                order_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "order_detail.html", context, e, &correlation)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ReceiptForm {
    #[serde(default)]
    pub line_id: String,
    #[serde(default)]
    pub quantity: String,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub received_by: String,
}

async fn post_receipt(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<ReceiptForm>,
) -> FormResult {
    let correlation = correlation_id();
    let mut errors = Vec::new();
    let line_id = require_text_field(&mut errors, "order line", &form.line_id);
    let quantity = parse_money_field(&mut errors, "quantity", &form.quantity);
    if !errors.is_empty() {
        let context =
            order_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "order_detail.html", context, errors);
    }

    let repo = SqlPurchaseOrderRepository::new(state.db_pool.clone());
    let lines = repo.list_lines(&id).await.map_err(|e| page_error(e, &correlation))?;
    if !lines.iter().any(|line| line.id == line_id) {
        let context =
            order_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(
            &state,
            "order_detail.html",
            context,
            vec!["the chosen line does not belong to this order".to_owned()],
        );
    }

    let ctx = operation_context(&form.received_by);
    match repo.post_receipt(&line_id, quantity, form.note.trim(), &ctx).await {
        Ok(_) => Ok(redirect(&format!("/orders/{id}"), "received").into_response()),
        Err(e) => {
            let context =
                order_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "order_detail.html", context, e, &correlation)
        }
    }
}
