//! Field-service pages: the asset register, service orders with their
//! status walk, and the helpdesk ticket thread.

use std::collections::HashMap;

use axum::extract::{Form, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tera::Context;

use opsdesk_core::domain::operations::{
    priority_label, Asset, ServiceOrder, ServiceOrderStatus, Ticket, TicketStatus,
};
use opsdesk_core::numbering;
use opsdesk_db::repositories::{
    NewServiceOrder, NewTicket, SqlAssetRepository, SqlCustomerRepository,
    SqlServiceOrderRepository, SqlTicketRepository,
};

use crate::web::{
    base_context, correlation_id, not_found, operation_context, page_error, parse_date_field,
    redirect, render, render_field_errors, render_form_failure, require_text_field, AppState,
    FormResult, NoticeQuery, PageResult,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/assets", get(assets_page).post(create_asset))
        .route("/assets/table", get(assets_table))
        .route("/assets/manufacturers", post(add_manufacturer))
        .route("/assets/types", post(add_asset_type))
        .route("/assets/{id}", get(asset_detail_page).post(update_asset))
        .route("/assets/{id}/delete", post(delete_asset))
        .route("/service-orders", get(service_orders_page).post(create_service_order))
        .route("/service-orders/table", get(service_orders_table))
        .route("/service-orders/{id}", get(service_order_detail_page).post(update_service_order))
        .route("/service-orders/{id}/status", post(change_service_order_status))
        .route("/tickets", get(tickets_page).post(create_ticket))
        .route("/tickets/table", get(tickets_table))
        .route("/tickets/{id}", get(ticket_detail_page).post(update_ticket))
        .route("/tickets/{id}/interactions", post(add_interaction))
        .route("/tickets/{id}/resolve", post(resolve_ticket))
        .route("/tickets/{id}/status", post(change_ticket_status))
}

async fn customer_names(
    state: &AppState,
    correlation: &str,
) -> Result<HashMap<String, String>, (StatusCode, Html<String>)> {
    let customers = SqlCustomerRepository::new(state.db_pool.clone())
        .list()
        .await
        .map_err(|e| page_error(e, correlation))?;
    Ok(customers.into_iter().map(|c| (c.id, c.legal_name)).collect())
}

// ---------------------------------------------------------------------------
// Assets
// ---------------------------------------------------------------------------

fn asset_rows(
    assets: &[Asset],
    customers: &HashMap<String, String>,
    today: chrono::NaiveDate,
) -> Vec<serde_json::Value> {
    assets
        .iter()
        .map(|asset| {
            json!({
                "id": asset.id,
                "customer": customers.get(&asset.customer_id).cloned().unwrap_or_default(),
                "model": asset.model,
                "serial_number": asset.serial_number,
                "warranty_until": asset.warranty_until,
                "under_warranty": asset.under_warranty(today),
            })
        })
        .collect()
}

async fn assets_context(
    state: &AppState,
    notice: &NoticeQuery,
    correlation: &str,
) -> Result<Context, (StatusCode, Html<String>)> {
    let repo = SqlAssetRepository::new(state.db_pool.clone());
    let assets = repo.list(None).await.map_err(|e| page_error(e, correlation))?;
    let manufacturers = repo.list_manufacturers().await.map_err(|e| page_error(e, correlation))?;
    let asset_types = repo.list_asset_types().await.map_err(|e| page_error(e, correlation))?;
    let customers = SqlCustomerRepository::new(state.db_pool.clone())
        .list()
        .await
        .map_err(|e| page_error(e, correlation))?;
    let names: HashMap<String, String> =
        customers.iter().map(|c| (c.id.clone(), c.legal_name.clone())).collect();

    let mut context = base_context("assets", notice);
    context.insert("rows", &asset_rows(&assets, &names, Utc::now().date_naive()));
    context.insert("customers", &customers);
    context.insert("manufacturers", &manufacturers);
    context.insert("asset_types", &asset_types);
    Ok(context)
}

async fn assets_page(State(state): State<AppState>, Query(notice): Query<NoticeQuery>) -> PageResult {
    let correlation = correlation_id();
    let context = assets_context(&state, &notice, &correlation).await?;
    render(&state, "assets.html", &context)
}

async fn assets_table(State(state): State<AppState>) -> PageResult {
    let correlation = correlation_id();
    let context = assets_context(&state, &NoticeQuery::default(), &correlation).await?;
    render(&state, "assets_table.html", &context)
}

#[derive(Debug, Default, Deserialize)]
pub struct NameForm {
    #[serde(default)]
    pub name: String,
}

async fn add_manufacturer(State(state): State<AppState>, Form(form): Form<NameForm>) -> FormResult {
    let correlation = correlation_id();
    let mut errors = Vec::new();
    let name = require_text_field(&mut errors, "name", &form.name);
    if !errors.is_empty() {
        let context = assets_context(&state, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "assets.html", context, errors);
    }
    match SqlAssetRepository::new(state.db_pool.clone()).upsert_manufacturer(&name).await {
        Ok(_) => Ok(redirect("/assets", "created").into_response()),
        Err(e) => {
            let context = assets_context(&state, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "assets.html", context, e, &correlation)
        }
    }
}

async fn add_asset_type(State(state): State<AppState>, Form(form): Form<NameForm>) -> FormResult {
    let correlation = correlation_id();
    let mut errors = Vec::new();
    let name = require_text_field(&mut errors, "name", &form.name);
    if !errors.is_empty() {
        let context = assets_context(&state, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "assets.html", context, errors);
    }
    match SqlAssetRepository::new(state.db_pool.clone()).upsert_asset_type(&name).await {
        Ok(_) => Ok(redirect("/assets", "created").into_response()),
        Err(e) => {
            let context = assets_context(&state, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "assets.html", context, e, &correlation)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AssetForm {
    #[serde(default)]
    pub customer_id: String,
    #[serde(default)]
    pub asset_type_id: String,
    #[serde(default)]
    pub manufacturer_id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub serial_number: String,
    #[serde(default)]
    pub acquired_on: String,
    #[serde(default)]
    pub warranty_until: String,
    #[serde(default)]
    pub notes: String,
}

async fn create_asset(State(state): State<AppState>, Form(form): Form<AssetForm>) -> FormResult {
    let correlation = correlation_id();
    let mut errors = Vec::new();
    let customer_id = require_text_field(&mut errors, "customer", &form.customer_id);
    let serial_number = require_text_field(&mut errors, "serial number", &form.serial_number);
    let acquired_on = parse_date_field(&mut errors, "acquisition date", &form.acquired_on);
    let warranty_until = parse_date_field(&mut errors, "warranty date", &form.warranty_until);
    if !errors.is_empty() {
        let context = assets_context(&state, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "assets.html", context, errors);
    }

    let asset = Asset {
        id: numbering::entity_id("AST"),
        customer_id,
        asset_type_id: crate::web::optional(form.asset_type_id),
        manufacturer_id: crate::web::optional(form.manufacturer_id),
        model: form.model.trim().to_owned(),
        serial_number,
        acquired_on,
        warranty_until,
        notes: form.notes.trim().to_owned(),
        created_at: Utc::now(),
    };
    match SqlAssetRepository::new(state.db_pool.clone()).save(asset).await {
        Ok(asset) => Ok(redirect(&format!("/assets/{}", asset.id), "created").into_response()),
        Err(e) => {
            let context = assets_context(&state, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "assets.html", context, e, &correlation)
        }
    }
}

async fn asset_detail_context(
    state: &AppState,
    id: &str,
    notice: &NoticeQuery,
    correlation: &str,
) -> Result<Context, (StatusCode, Html<String>)> {
    let repo = SqlAssetRepository::new(state.db_pool.clone());
    let asset = repo
        .find_by_id(id)
        .await
        .map_err(|e| page_error(e, correlation))?
        .ok_or_else(|| not_found("Asset"))?;
    let manufacturers = repo.list_manufacturers().await.map_err(|e| page_error(e, correlation))?;
    let asset_types = repo.list_asset_types().await.map_err(|e| page_error(e, correlation))?;
    let customer_name = SqlCustomerRepository::new(state.db_pool.clone())
        .find_by_id(&asset.customer_id)
        .await
        .map_err(|e| page_error(e, correlation))?
        .map(|customer| customer.legal_name)
        .unwrap_or_default();

    let mut context = base_context("assets", notice);
    context.insert("under_warranty", &asset.under_warranty(Utc::now().date_naive()));
    context.insert("asset", &asset);
    context.insert("customer_name", &customer_name);
    context.insert("manufacturers", &manufacturers);
    context.insert("asset_types", &asset_types);
    Ok(context)
}

async fn asset_detail_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(notice): Query<NoticeQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let context = asset_detail_context(&state, &id, &notice, &correlation).await?;
    render(&state, "asset_detail.html", &context)
}

async fn update_asset(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<AssetForm>,
) -> FormResult {
    let correlation = correlation_id();
    let repo = SqlAssetRepository::new(state.db_pool.clone());
    let mut asset = repo
        .find_by_id(&id)
        .await
        .map_err(|e| page_error(e, &correlation))?
        .ok_or_else(|| not_found("Asset"))?;

    let mut errors = Vec::new();
    asset.serial_number = require_text_field(&mut errors, "serial number", &form.serial_number);
    asset.acquired_on = parse_date_field(&mut errors, "acquisition date", &form.acquired_on);
    asset.warranty_until = parse_date_field(&mut errors, "warranty date", &form.warranty_until);
    asset.asset_type_id = crate::web::optional(form.asset_type_id);
    asset.manufacturer_id = crate::web::optional(form.manufacturer_id);
    asset.model = form.model.trim().to_owned();
    asset.notes = form.notes.trim().to_owned();
    if !errors.is_empty() {
        let context =
            asset_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "asset_detail.html", context, errors);
    }

    match repo.save(asset).await {
        Ok(_) => Ok(redirect(&format!("/assets/{id}"), "updated").into_response()),
        Err(e) => {
            let context =
                asset_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "asset_detail.html", context, e, &correlation)
        }
    }
}

async fn delete_asset(State(state): State<AppState>, Path(id): Path<String>) -> FormResult {
    let correlation = correlation_id();
    let ctx = operation_context("web");
    match SqlAssetRepository::new(state.db_pool.clone()).delete(&id, &ctx).await {
        Ok(()) => Ok(redirect("/assets", "deleted").into_response()),
        Err(e) => {
            let context =
                asset_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "asset_detail.html", context, e, &correlation)
        }
    }
}

// ---------------------------------------------------------------------------
// Service orders
// ---------------------------------------------------------------------------

fn service_order_rows(
    orders: &[ServiceOrder],
    customers: &HashMap<String, String>,
) -> Vec<serde_json::Value> {
    orders
        .iter()
        .map(|order| {
            json!({
                "id": order.id,
                "number": order.number,
                "customer": customers.get(&order.customer_id).cloned().unwrap_or_default(),
                "assigned_to": order.assigned_to,
                "status": order.status,
                "problem": order.problem,
            })
        })
        .collect()
}

async fn service_orders_context(
    state: &AppState,
    notice: &NoticeQuery,
    status: Option<ServiceOrderStatus>,
    correlation: &str,
) -> Result<Context, (StatusCode, Html<String>)> {
    let orders = SqlServiceOrderRepository::new(state.db_pool.clone())
        .list(status)
        .await
        .map_err(|e| page_error(e, correlation))?;
    let names = customer_names(state, correlation).await?;
    let customers = SqlCustomerRepository::new(state.db_pool.clone())
        .list()
        .await
        .map_err(|e| page_error(e, correlation))?;
    let assets = SqlAssetRepository::new(state.db_pool.clone())
        .list(None)
        .await
        .map_err(|e| page_error(e, correlation))?;

    let mut context = base_context("service_orders", notice);
    context.insert("rows", &service_order_rows(&orders, &names));
    context.insert("customers", &customers);
    context.insert("assets", &assets);
    context.insert("status_filter", &status.map(|value| value.as_str()).unwrap_or(""));
    Ok(context)
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusFilterQuery {
    pub status: Option<String>,
}

async fn service_orders_page(
    State(state): State<AppState>,
    Query(notice): Query<NoticeQuery>,
    Query(filter): Query<StatusFilterQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let status = filter.status.as_deref().and_then(ServiceOrderStatus::parse);
    let context = service_orders_context(&state, &notice, status, &correlation).await?;
    render(&state, "service_orders.html", &context)
}

async fn service_orders_table(
    State(state): State<AppState>,
    Query(filter): Query<StatusFilterQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let status = filter.status.as_deref().and_then(ServiceOrderStatus::parse);
    let context =
        service_orders_context(&state, &NoticeQuery::default(), status, &correlation).await?;
    render(&state, "service_orders_table.html", &context)
}

#[derive(Debug, Default, Deserialize)]
pub struct ServiceOrderForm {
    #[serde(default)]
    pub customer_id: String,
    #[serde(default)]
    pub asset_id: String,
    #[serde(default)]
    pub opened_by: String,
    #[serde(default)]
    pub assigned_to: String,
    #[serde(default)]
    pub problem: String,
    #[serde(default)]
    pub diagnosis: String,
}

async fn create_service_order(
    State(state): State<AppState>,
    Form(form): Form<ServiceOrderForm>,
) -> FormResult {
    let correlation = correlation_id();
    let mut errors = Vec::new();
    let customer_id = require_text_field(&mut errors, "customer", &form.customer_id);
    let problem = require_text_field(&mut errors, "problem", &form.problem);
    if !errors.is_empty() {
        let context =
            service_orders_context(&state, &NoticeQuery::default(), None, &correlation).await?;
        return render_field_errors(&state, "service_orders.html", context, errors);
    }

    let new = NewServiceOrder {
        customer_id,
        asset_id: crate::web::optional(form.asset_id),
        opened_by: form.opened_by.trim().to_owned(),
        assigned_to: form.assigned_to.trim().to_owned(),
        problem,
    };
    match SqlServiceOrderRepository::new(state.db_pool.clone()).create(new).await {
        Ok(order) => {
            Ok(redirect(&format!("/service-orders/{}", order.id), "created").into_response())
        }
        Err(e) => {
            let context =
                service_orders_context(&state, &NoticeQuery::default(), None, &correlation)
                    .await?;
            render_form_failure(&state, "service_orders.html", context, e, &correlation)
        }
    }
}

async fn service_order_detail_context(
    state: &AppState,
    id: &str,
    notice: &NoticeQuery,
    correlation: &str,
) -> Result<Context, (StatusCode, Html<String>)> {
    let order = SqlServiceOrderRepository::new(state.db_pool.clone())
        .find_by_id(id)
        .await
        .map_err(|e| page_error(e, correlation))?
        .ok_or_else(|| not_found("Service order"))?;
    let customer_name = SqlCustomerRepository::new(state.db_pool.clone())
        .find_by_id(&order.customer_id)
        .await
        .map_err(|e| page_error(e, correlation))?
        .map(|customer| customer.legal_name)
        .unwrap_or_default();

    let next_statuses: Vec<&str> = [
        ServiceOrderStatus::Open,
        ServiceOrderStatus::InProgress,
        ServiceOrderStatus::WaitingCustomer,
        ServiceOrderStatus::WaitingVendor,
        ServiceOrderStatus::Done,
        ServiceOrderStatus::Cancelled,
    ]
    .into_iter()
    .filter(|next| order.can_transition_to(*next))
    .map(|next| next.as_str())
    .collect();

    let mut context = base_context("service_orders", notice);
    context.insert("order", &order);
    context.insert("customer_name", &customer_name);
    context.insert("next_statuses", &next_statuses);
    Ok(context)
}

async fn service_order_detail_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(notice): Query<NoticeQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let context = service_order_detail_context(&state, &id, &notice, &correlation).await?;
    render(&state, "service_order_detail.html", &context)
}

async fn update_service_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<ServiceOrderForm>,
) -> FormResult {
    let correlation = correlation_id();
    let repo = SqlServiceOrderRepository::new(state.db_pool.clone());
    let mut order = repo
        .find_by_id(&id)
        .await
        .map_err(|e| page_error(e, &correlation))?
        .ok_or_else(|| not_found("Service order"))?;

    order.assigned_to = form.assigned_to.trim().to_owned();
    order.problem = if form.problem.trim().is_empty() {
        order.problem
    } else {
        form.problem.trim().to_owned()
    };
    order.diagnosis = form.diagnosis.trim().to_owned();

    match repo.save(order).await {
        Ok(_) => Ok(redirect(&format!("/service-orders/{id}"), "updated").into_response()),
        Err(e) => {
            let context =
                service_order_detail_context(&state, &id, &NoticeQuery::default(), &correlation)
                    .await?;
            render_form_failure(&state, "service_order_detail.html", context, e, &correlation)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusForm {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub actor: String,
}

async fn change_service_order_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<StatusForm>,
) -> FormResult {
    let correlation = correlation_id();
    let Some(next) = ServiceOrderStatus::parse(form.status.trim()) else {
        let context =
            service_order_detail_context(&state, &id, &NoticeQuery::default(), &correlation)
                .await?;
        return render_field_errors(
            &state,
            "service_order_detail.html",
            context,
            vec!["unknown service-order status".to_owned()],
        );
    };

    let ctx = operation_context(&form.actor);
    match SqlServiceOrderRepository::new(state.db_pool.clone()).transition(&id, next, &ctx).await {
        Ok(_) => Ok(redirect(&format!("/service-orders/{id}"), "status").into_response()),
        Err(e) => {
            let context =
                service_order_detail_context(&state, &id, &NoticeQuery::default(), &correlation)
                    .await?;
            render_form_failure(&state, "service_order_detail.html", context, e, &correlation)
        }
    }
}

// ---------------------------------------------------------------------------
// Tickets
// ---------------------------------------------------------------------------

fn ticket_rows(tickets: &[Ticket], customers: &HashMap<String, String>) -> Vec<serde_json::Value> {
    tickets
        .iter()
        .map(|ticket| {
            json!({
                "id": ticket.id,
                "code": ticket.code,
                "customer": customers.get(&ticket.customer_id).cloned().unwrap_or_default(),
                "subject": ticket.subject,
                "priority": ticket.priority,
                "priority_label": priority_label(ticket.priority),
                "status": ticket.status,
                "assigned_to": ticket.assigned_to,
            })
        })
        .collect()
}

async fn tickets_context(
    state: &AppState,
    notice: &NoticeQuery,
    status: Option<TicketStatus>,
    correlation: &str,
) -> Result<Context, (StatusCode, Html<String>)> {
    let tickets = SqlTicketRepository::new(state.db_pool.clone())
        .list(status)
        .await
        .map_err(|e| page_error(e, correlation))?;
    let names = customer_names(state, correlation).await?;
    let customers = SqlCustomerRepository::new(state.db_pool.clone())
        .list()
        .await
        .map_err(|e| page_error(e, correlation))?;
    let assets = SqlAssetRepository::new(state.db_pool.clone())
        .list(None)
        .await
        .map_err(|e| page_error(e, correlation))?;

    let mut context = base_context("tickets", notice);
    context.insert("rows", &ticket_rows(&tickets, &names));
    context.insert("customers", &customers);
    context.insert("assets", &assets);
    context.insert("status_filter", &status.map(|value| value.as_str()).unwrap_or(""));
    Ok(context)
}

async fn tickets_page(
    State(state): State<AppState>,
    Query(notice): Query<NoticeQuery>,
    Query(filter): Query<StatusFilterQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let status = filter.status.as_deref().and_then(TicketStatus::parse);
    let context = tickets_context(&state, &notice, status, &correlation).await?;
    render(&state, "tickets.html", &context)
}

async fn tickets_table(
    State(state): State<AppState>,
    Query(filter): Query<StatusFilterQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let status = filter.status.as_deref().and_then(TicketStatus::parse);
    let context = tickets_context(&state, &NoticeQuery::default(), status, &correlation).await?;
    render(&state, "tickets_table.html", &context)
}

#[derive(Debug, Default, Deserialize)]
pub struct TicketForm {
    #[serde(default)]
    pub customer_id: String,
    #[serde(default)]
    pub asset_id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub opened_by: String,
    #[serde(default)]
    pub assigned_to: String,
}

async fn create_ticket(State(state): State<AppState>, Form(form): Form<TicketForm>) -> FormResult {
    let correlation = correlation_id();
    let mut errors = Vec::new();
    let customer_id = require_text_field(&mut errors, "customer", &form.customer_id);
    let subject = require_text_field(&mut errors, "subject", &form.subject);
    let priority = match form.priority.trim() {
        "" => 3,
        raw => raw.parse::<u8>().unwrap_or_else(|_| {
            errors.push("priority must be 1 to 4".to_owned());
            3
        }),
    };
    if !errors.is_empty() {
        let context = tickets_context(&state, &NoticeQuery::default(), None, &correlation).await?;
        return render_field_errors(&state, "tickets.html", context, errors);
    }

    let new = NewTicket {
        customer_id,
        asset_id: crate::web::optional(form.asset_id),
        subject,
        description: form.description.trim().to_owned(),
        priority,
        opened_by: form.opened_by.trim().to_owned(),
        assigned_to: form.assigned_to.trim().to_owned(),
    };
    match SqlTicketRepository::new(state.db_pool.clone()).create(new).await {
        Ok(ticket) => Ok(redirect(&format!("/tickets/{}", ticket.id), "created").into_response()),
        Err(e) => {
            let context =
                tickets_context(&state, &NoticeQuery::default(), None, &correlation).await?;
            render_form_failure(&state, "tickets.html", context, e, &correlation)
        }
    }
}

async fn ticket_detail_context(
    state: &AppState,
    id: &str,
    notice: &NoticeQuery,
    correlation: &str,
) -> Result<Context, (StatusCode, Html<String>)> {
    let repo = SqlTicketRepository::new(state.db_pool.clone());
    let ticket = repo
        .find_by_id(id)
        .await
        .map_err(|e| page_error(e, correlation))?
        .ok_or_else(|| not_found("Ticket"))?;
    let interactions = repo.list_interactions(id).await.map_err(|e| page_error(e, correlation))?;
    let resolution = repo.find_resolution(id).await.map_err(|e| page_error(e, correlation))?;
    let customer_name = SqlCustomerRepository::new(state.db_pool.clone())
        .find_by_id(&ticket.customer_id)
        .await
        .map_err(|e| page_error(e, correlation))?
        .map(|customer| customer.legal_name)
        .unwrap_or_default();

    let next_statuses: Vec<&str> = [
        TicketStatus::Assigned,
        TicketStatus::Pending,
        TicketStatus::Resolved,
        TicketStatus::Closed,
    ]
    .into_iter()
    .filter(|next| ticket.can_transition_to(*next))
    .map(|next| next.as_str())
    .collect();

    let mut context = base_context("tickets", notice);
    context.insert("priority_text", priority_label(ticket.priority));
    context.insert("can_resolve", &ticket.can_transition_to(TicketStatus::Resolved));
    context.insert("ticket", &ticket);
    context.insert("customer_name", &customer_name);
    context.insert("interactions", &interactions);
    context.insert("resolution", &resolution);
    context.insert("next_statuses", &next_statuses);
    Ok(context)
}

async fn ticket_detail_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(notice): Query<NoticeQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let context = ticket_detail_context(&state, &id, &notice, &correlation).await?;
    render(&state, "ticket_detail.html", &context)
}

async fn update_ticket(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<TicketForm>,
) -> FormResult {
    let correlation = correlation_id();
    let repo = SqlTicketRepository::new(state.db_pool.clone());
    let mut ticket = repo
        .find_by_id(&id)
        .await
        .map_err(|e| page_error(e, &correlation))?
        .ok_or_else(|| not_found("Ticket"))?;

    let mut errors = Vec::new();
    if !form.priority.trim().is_empty() {
        match form.priority.trim().parse::<u8>() {
            Ok(priority) => ticket.priority = priority,
            Err(_) => errors.push("priority must be 1 to 4".to_owned()),
        }
    }
    ticket.assigned_to = form.assigned_to.trim().to_owned();
    if !form.description.trim().is_empty() {
        ticket.description = form.description.trim().to_owned();
    }
    if !errors.is_empty() {
        let context =
            ticket_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "ticket_detail.html", context, errors);
    }

    match repo.save(ticket).await {
        Ok(_) => Ok(redirect(&format!("/tickets/{id}"), "updated").into_response()),
        Err(e) => {
            let context =
                ticket_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "ticket_detail.html", context, e, &correlation)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct InteractionForm {
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub internal: Option<String>,
}

async fn add_interaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<InteractionForm>,
) -> FormResult {
    let correlation = correlation_id();
    let internal = crate::web::checkbox(&form.internal);
    match SqlTicketRepository::new(state.db_pool.clone())
        .add_interaction(&id, form.author.trim(), form.body.trim(), internal)
        .await
    {
        Ok(_) => Ok(redirect(&format!("/tickets/{id}"), "updated").into_response()),
        Err(e) => {
            let context =
                ticket_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "ticket_detail.html", context, e, &correlation)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ResolveForm {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub minutes_spent: String,
    #[serde(default)]
    pub resolved_by: String,
}

async fn resolve_ticket(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<ResolveForm>,
) -> FormResult {
    let correlation = correlation_id();
    let mut errors = Vec::new();
    let summary = require_text_field(&mut errors, "summary", &form.summary);
    let minutes_spent = match form.minutes_spent.trim() {
        "" => 0,
        raw => raw.parse::<i64>().unwrap_or_else(|_| {
            errors.push("minutes spent must be a whole number".to_owned());
            0
        }),
    };
    if !errors.is_empty() {
        let context =
            ticket_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "ticket_detail.html", context, errors);
    }

    let ctx = operation_context(&form.resolved_by);
    match SqlTicketRepository::new(state.db_pool.clone())
        .resolve(&id, &summary, minutes_spent, &ctx)
        .await
    {
        Ok(_) => Ok(redirect(&format!("/tickets/{id}"), "resolved").into_response()),
        Err(e) => {
            let context =
                ticket_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "ticket_detail.html", context, e, &correlation)
        }
    }
}

async fn change_ticket_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<StatusForm>,
) -> FormResult {
    let correlation = correlation_id();
    let Some(next) = TicketStatus::parse(form.status.trim()) else {
        let context =
            ticket_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(
            &state,
            "ticket_detail.html",
            context,
            vec!["unknown ticket status".to_owned()],
        );
    };

    let ctx = operation_context(&form.actor);
    match SqlTicketRepository::new(state.db_pool.clone()).transition(&id, next, &ctx).await {
        Ok(_) => Ok(redirect(&format!("/tickets/{id}"), "status").into_response()),
        Err(e) => {
            let context =
                ticket_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "ticket_detail.html", context, e, &correlation)
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::extract::{Form, Path, Query, State};
    use axum::http::{header, StatusCode};
    use chrono::Utc;
    use rust_decimal::Decimal;

    use opsdesk_core::domain::crm::Customer;
    use opsdesk_core::domain::operations::{ServiceOrderStatus, TicketStatus};
    use opsdesk_core::numbering;
    use opsdesk_db::repositories::{
        SqlCustomerRepository, SqlServiceOrderRepository, SqlTicketRepository,
    };

    use crate::web::testing;

    use super::*;

    fn location_of(response: &axum::response::Response) -> String {
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_owned()
    }

    fn id_from(location: &str, prefix: &str) -> String {
        location.trim_start_matches(prefix).split('?').next().unwrap().to_owned()
    }

    async fn seed_customer(state: &crate::web::AppState) -> String {
        let now = Utc::now();
        SqlCustomerRepository::new(state.db_pool.clone())
            .save(Customer {
                id: numbering::entity_id("CUS"),
                legal_name: "Hospital Vida".to_owned(),
                trade_name: String::new(),
                tax_id: "98.765.432/0001-10".to_owned(),
                tax_regime: String::new(),
                contributor_type: String::new(),
                email: String::new(),
                phone: String::new(),
                city: String::new(),
                state: String::new(),
                credit_limit: Decimal::ZERO,
                billing_blocked: false,
                preferred_distributor_id: None,
                notes: String::new(),
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("customer")
            .id
    }

    #[tokio::test]
    async fn a_service_order_completes_through_the_status_form() {
        let state = testing::state().await;
        let customer_id = seed_customer(&state).await;

        let response = create_service_order(
            State(state.clone()),
            Form(ServiceOrderForm {
                customer_id,
                opened_by: "Balcao".to_owned(),
                problem: "No-break nao liga".to_owned(),
                ..ServiceOrderForm::default()
            }),
        )
        .await
        .expect("create");
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let id = id_from(&location_of(&response), "/service-orders/");

        for status in ["open", "in_progress", "done"] {
            let response = change_service_order_status(
                State(state.clone()),
                Path(id.clone()),
                Form(StatusForm { status: status.to_owned(), actor: "Bancada".to_owned() }),
            )
            .await
            .expect("transition");
            assert_eq!(response.status(), StatusCode::SEE_OTHER, "{status}");
        }

        let order = SqlServiceOrderRepository::new(state.db_pool.clone())
            .find_by_id(&id)
            .await
            .expect("find")
            .expect("present");
        assert_eq!(order.status, ServiceOrderStatus::Done);
        assert!(order.completed_at.is_some(), "done must stamp completion");
        assert!(order.number.starts_with("OS-"));

        state.db_pool.close().await;
    }

    #[tokio::test]
    async fn a_cancelled_service_order_refuses_further_moves() {
        let state = testing::state().await;
        let customer_id = seed_customer(&state).await;

        let order = SqlServiceOrderRepository::new(state.db_pool.clone())
            .create(NewServiceOrder {
                customer_id,
                asset_id: None,
                opened_by: "Balcao".to_owned(),
                assigned_to: String::new(),
                problem: "Fonte queimada".to_owned(),
            })
            .await
            .expect("order");
        change_service_order_status(
            State(state.clone()),
            Path(order.id.clone()),
            Form(StatusForm { status: "cancelled".to_owned(), actor: String::new() }),
        )
        .await
        .expect("cancel");

        let response = change_service_order_status(
            State(state.clone()),
            Path(order.id),
            Form(StatusForm { status: "open".to_owned(), actor: String::new() }),
        )
        .await
        .expect("refusal renders");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        state.db_pool.close().await;
    }

    #[tokio::test]
    async fn a_ticket_resolves_once_and_keeps_one_resolution() {
        let state = testing::state().await;
        let customer_id = seed_customer(&state).await;

        let response = create_ticket(
            State(state.clone()),
            Form(TicketForm {
                customer_id,
                subject: "VPN fora do ar".to_owned(),
                priority: "2".to_owned(),
                opened_by: "Suporte".to_owned(),
                ..TicketForm::default()
            }),
        )
        .await
        .expect("create");
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let id = id_from(&location_of(&response), "/tickets/");

        add_interaction(
            State(state.clone()),
            Path(id.clone()),
            Form(InteractionForm {
                author: "Suporte".to_owned(),
                body: "Reiniciado o concentrador".to_owned(),
                internal: Some("on".to_owned()),
            }),
        )
        .await
        .expect("interaction");

        let response = resolve_ticket(
            State(state.clone()),
            Path(id.clone()),
            Form(ResolveForm {
                summary: "Certificado renovado".to_owned(),
                minutes_spent: "45".to_owned(),
                resolved_by: "Suporte".to_owned(),
            }),
        )
        .await
        .expect("resolve");
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let repo = SqlTicketRepository::new(state.db_pool.clone());
        let ticket = repo.find_by_id(&id).await.expect("find").expect("present");
        assert_eq!(ticket.status, TicketStatus::Resolved);
        let resolution = repo.find_resolution(&id).await.expect("find").expect("present");
        assert_eq!(resolution.minutes_spent, 45);

        let page =
            ticket_detail_page(State(state.clone()), Path(id), Query(NoticeQuery::default()))
                .await
                .expect("detail");
        let body = testing::body_of(&page);
        assert!(body.contains("Certificado renovado"));
        assert!(body.contains("Reiniciado o concentrador"));

        state.db_pool.close().await;
    }

    #[tokio::test]
    async fn a_priority_outside_the_scale_is_refused() {
        let state = testing::state().await;
        let customer_id = seed_customer(&state).await;

        let response = create_ticket(
            State(state.clone()),
            Form(TicketForm {
                customer_id,
                subject: "Impressora".to_owned(),
                priority: "9".to_owned(),
                ..TicketForm::default()
            }),
        )
        .await
        .expect("refusal renders");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        state.db_pool.close().await;
    }

    #[tokio::test]
    async fn duplicate_serial_numbers_are_refused_on_the_asset_form() {
        let state = testing::state().await;
        let customer_id = seed_customer(&state).await;

        let response = create_asset(
            State(state.clone()),
            Form(AssetForm {
                customer_id: customer_id.clone(),
                model: "PowerEdge R750".to_owned(),
                serial_number: "SN-001".to_owned(),
                ..AssetForm::default()
            }),
        )
        .await
        .expect("create");
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let response = create_asset(
            State(state.clone()),
            Form(AssetForm {
                customer_id,
                model: "PowerEdge R750".to_owned(),
                serial_number: "SN-001".to_owned(),
                ..AssetForm::default()
            }),
        )
        .await
        .expect("refusal renders");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        state.db_pool.close().await;
    }
}
