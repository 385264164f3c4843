//! CRM pages: customers, opportunities, proposals, and sales goals.
//!
//! HTML endpoints:
//! - `GET  /customers`, `GET /customers/table`, `GET /customers/{id}`
//! - `POST /customers`, `POST /customers/{id}`, `POST /customers/{id}/delete`
//! - `POST /customers/{id}/contacts[/{contact_id}/delete]`, `POST /customers/{id}/tags`
//! - `GET  /opportunities[?stage=]`, `GET /opportunities/table`, `GET /opportunities/{id}`
//! - `POST /opportunities`, `POST /opportunities/{id}`, `POST /opportunities/{id}/delete`
//! - `POST /opportunities/{id}/activities[/{activity_id}/delete|/toggle]`
//! - `POST /opportunities/{id}/proposals`
//! - `GET  /proposals/{id}`, `POST /proposals/{id}`, `POST /proposals/{id}/status`
//! - `POST /proposals/{id}/lines[/{line_id}/delete]`
//! - `GET  /goals[?year=&month=]`, `POST /goals`

use std::collections::HashMap;

use axum::extract::{Form, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::Router;
use chrono::{Datelike, Utc};
use serde::Deserialize;
use serde_json::json;
use tera::Context;

use opsdesk_core::domain::catalog::SupplierKind;
use opsdesk_core::domain::crm::{
    Activity, Contact, Customer, Opportunity, OpportunityKind, ProposalStatus, SalesGoal,
    SalesStage,
};
use opsdesk_core::numbering;
use opsdesk_db::repositories::{
    NewProposal, ProposalLineDraft, SqlCustomerRepository, SqlOpportunityRepository,
    SqlProductRepository, SqlProposalRepository, SqlSalesGoalRepository, SqlServiceRepository,
    SqlSupplierRepository,
};

use crate::web::{
    base_context, checkbox, correlation_id, not_found, operation_context, optional, page_error,
    parse_date_field, parse_money_field, redirect, render, render_field_errors,
    render_form_failure, require_text_field, AppState, FormResult, NoticeQuery, PageResult,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/customers", get(customers_page).post(create_customer))
        .route("/customers/table", get(customers_table))
        .route("/customers/{id}", get(customer_detail_page).post(update_customer))
        .route("/customers/{id}/delete", post(delete_customer))
        .route("/customers/{id}/contacts", post(create_contact))
        .route("/customers/{id}/contacts/{contact_id}/delete", post(delete_contact))
        .route("/customers/{id}/tags", post(set_tags))
        .route("/opportunities", get(opportunities_page).post(create_opportunity))
        .route("/opportunities/table", get(opportunities_table))
        .route("/opportunities/{id}", get(opportunity_detail_page).post(update_opportunity))
        .route("/opportunities/{id}/delete", post(delete_opportunity))
        .route("/opportunities/{id}/activities", post(create_activity))
        .route("/opportunities/{id}/activities/{activity_id}/delete", post(delete_activity))
        .route("/opportunities/{id}/activities/{activity_id}/toggle", post(toggle_activity))
        .route("/opportunities/{id}/proposals", post(create_proposal))
        .route("/proposals/{id}", get(proposal_detail_page).post(update_proposal))
        .route("/proposals/{id}/status", post(transition_proposal))
        .route("/proposals/{id}/lines", post(add_proposal_line))
        .route("/proposals/{id}/lines/{line_id}/delete", post(delete_proposal_line))
        .route("/goals", get(goals_page).post(upsert_goal))
}

// ---------------------------------------------------------------------------
// Customers
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct CustomerForm {
    #[serde(default)]
    pub legal_name: String,
    #[serde(default)]
    pub trade_name: String,
    #[serde(default)]
    pub tax_id: String,
    #[serde(default)]
    pub tax_regime: String,
    #[serde(default)]
    pub contributor_type: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub credit_limit: String,
    #[serde(default)]
    pub billing_blocked: Option<String>,
    #[serde(default)]
    pub preferred_distributor_id: String,
    #[serde(default)]
    pub notes: String,
}

async fn customers_context(
    state: &AppState,
    notice: &NoticeQuery,
    correlation: &str,
) -> Result<Context, (StatusCode, Html<String>)> {
    let customers = SqlCustomerRepository::new(state.db_pool.clone())
        .list()
        .await
        .map_err(|e| page_error(e, correlation))?;
    let distributors = SqlSupplierRepository::new(state.db_pool.clone())
        .list(Some(SupplierKind::Distributor))
        .await
        .map_err(|e| page_error(e, correlation))?;

    let mut context = base_context("customers", notice);
    context.insert("customers", &customers);
    context.insert("distributors", &distributors);
    Ok(context)
}

async fn customers_page(
    State(state): State<AppState>,
    Query(notice): Query<NoticeQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let context = customers_context(&state, &notice, &correlation).await?;
    render(&state, "customers.html", &context)
}

async fn customers_table(State(state): State<AppState>) -> PageResult {
    let correlation = correlation_id();
    let context = customers_context(&state, &NoticeQuery::default(), &correlation).await?;
    render(&state, "customers_table.html", &context)
}

fn customer_from_form(mut customer: Customer, form: &CustomerForm) -> (Customer, Vec<String>) {
    let mut errors = Vec::new();
    customer.legal_name = require_text_field(&mut errors, "legal name", &form.legal_name);
    customer.trade_name = form.trade_name.trim().to_owned();
    customer.tax_id = require_text_field(&mut errors, "tax id", &form.tax_id);
    customer.tax_regime = form.tax_regime.trim().to_owned();
    customer.contributor_type = form.contributor_type.trim().to_owned();
    customer.email = form.email.trim().to_owned();
    customer.phone = form.phone.trim().to_owned();
    customer.city = form.city.trim().to_owned();
    customer.state = form.state.trim().to_owned();
    customer.credit_limit = parse_money_field(&mut errors, "credit limit", &form.credit_limit);
    customer.billing_blocked = checkbox(&form.billing_blocked);
    customer.preferred_distributor_id = optional(form.preferred_distributor_id.clone());
    customer.notes = form.notes.trim().to_owned();
    (customer, errors)
}

fn blank_customer() -> Customer {
    let now = Utc::now();
    Customer {
        id: numbering::entity_id("CUS"),
        legal_name: String::new(),
        trade_name: String::new(),
        tax_id: String::new(),
        tax_regime: String::new(),
        contributor_type: String::new(),
        email: String::new(),
        phone: String::new(),
        city: String::new(),
        state: String::new(),
        credit_limit: rust_decimal::Decimal::ZERO,
        billing_blocked: false,
        preferred_distributor_id: None,
        notes: String::new(),
        created_at: now,
        updated_at: now,
    }
}

async fn create_customer(
    State(state): State<AppState>,
    Form(form): Form<CustomerForm>,
) -> FormResult {
    let correlation = correlation_id();
    let (customer, errors) = customer_from_form(blank_customer(), &form);
    if !errors.is_empty() {
        let context = customers_context(&state, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "customers.html", context, errors);
    }

    match SqlCustomerRepository::new(state.db_pool.clone()).save(customer).await {
        Ok(saved) => Ok(redirect(&format!("/customers/{}", saved.id), "created").into_response()),
        Err(e) => {
            let context = customers_context(&state, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "customers.html", context, e, &correlation)
        }
    }
}

async fn customer_detail_context(
    state: &AppState,
    id: &str,
    notice: &NoticeQuery,
    correlation: &str,
) -> Result<Context, (StatusCode, Html<String>)> {
    let repo = SqlCustomerRepository::new(state.db_pool.clone());
    let customer = repo
        .find_by_id(id)
        .await
        .map_err(|e| page_error(e, correlation))?
        .ok_or_else(|| not_found("Customer"))?;
    let contacts = repo.list_contacts(id).await.map_err(|e| page_error(e, correlation))?;
    let tags = repo.tags_for(id).await.map_err(|e| page_error(e, correlation))?;
    let distributors = SqlSupplierRepository::new(state.db_pool.clone())
        .list(Some(SupplierKind::Distributor))
        .await
        .map_err(|e| page_error(e, correlation))?;

    let mut context = base_context("customers", notice);
    context.insert("customer", &customer);
    context.insert("contacts", &contacts);
    context.insert("tags", &tags);
    context.insert("tags_joined", &tags.join(", "));
    context.insert("distributors", &distributors);
    Ok(context)
}

async fn customer_detail_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(notice): Query<NoticeQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let context = customer_detail_context(&state, &id, &notice, &correlation).await?;
    render(&state, "customer_detail.html", &context)
}

async fn update_customer(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<CustomerForm>,
) -> FormResult {
    let correlation = correlation_id();
    let repo = SqlCustomerRepository::new(state.db_pool.clone());
    let existing = repo
        .find_by_id(&id)
        .await
        .map_err(|e| page_error(e, &correlation))?
        .ok_or_else(|| not_found("Customer"))?;

    let (customer, errors) = customer_from_form(existing, &form);
    if !errors.is_empty() {
        let context =
            customer_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "customer_detail.html", context, errors);
    }

    match repo.save(customer).await {
        Ok(_) => Ok(redirect(&format!("/customers/{id}"), "updated").into_response()),
        Err(e) => {
            let context =
                customer_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "customer_detail.html", context, e, &correlation)
        }
    }
}

async fn delete_customer(State(state): State<AppState>, Path(id): Path<String>) -> FormResult {
    let correlation = correlation_id();
    let ctx = operation_context("web");
    match SqlCustomerRepository::new(state.db_pool.clone()).delete(&id, &ctx).await {
        Ok(()) => Ok(redirect("/customers", "deleted").into_response()),
        Err(e) => {
            let context =
                customer_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "customer_detail.html", context, e, &correlation)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ContactForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub decision_role: String,
    #[serde(default)]
    pub is_primary: Option<String>,
    #[serde(default)]
    pub is_whatsapp: Option<String>,
}

async fn create_contact(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<ContactForm>,
) -> FormResult {
    let correlation = correlation_id();
    let mut errors = Vec::new();
    let name = require_text_field(&mut errors, "contact name", &form.name);
    if !errors.is_empty() {
        let context =
            customer_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "customer_detail.html", context, errors);
    }

    let contact = Contact {
        id: numbering::entity_id("CON"),
        customer_id: id.clone(),
        name,
        email: form.email.trim().to_owned(),
        phone: form.phone.trim().to_owned(),
        decision_role: form.decision_role.trim().to_owned(),
        is_primary: checkbox(&form.is_primary),
        is_whatsapp: checkbox(&form.is_whatsapp),
    };
    match SqlCustomerRepository::new(state.db_pool.clone()).save_contact(contact).await {
        Ok(_) => Ok(redirect(&format!("/customers/{id}"), "created").into_response()),
        Err(e) => {
            let context =
                customer_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "customer_detail.html", context, e, &correlation)
        }
    }
}

async fn delete_contact(
    State(state): State<AppState>,
    Path((id, contact_id)): Path<(String, String)>,
) -> FormResult {
    let correlation = correlation_id();
    SqlCustomerRepository::new(state.db_pool.clone())
        .delete_contact(&contact_id)
        .await
        .map_err(|e| page_error(e, &correlation))?;
    Ok(redirect(&format!("/customers/{id}"), "deleted").into_response())
}

#[derive(Debug, Deserialize)]
pub struct TagsForm {
    #[serde(default)]
    pub tags: String,
}

async fn set_tags(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<TagsForm>,
) -> FormResult {
    let correlation = correlation_id();
    let tags: Vec<String> = form
        .tags
        .split(',')
        .map(|tag| tag.trim().to_owned())
        .filter(|tag| !tag.is_empty())
        .collect();
    match SqlCustomerRepository::new(state.db_pool.clone()).set_tags(&id, &tags).await {
        Ok(()) => Ok(redirect(&format!("/customers/{id}"), "updated").into_response()),
        Err(e) => {
            let context =
                customer_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "customer_detail.html", context, e, &correlation)
        }
    }
}

// ---------------------------------------------------------------------------
// Opportunities
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct OpportunityListQuery {
    pub stage: Option<String>,
    pub notice: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OpportunityForm {
    #[serde(default)]
    pub customer_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub stage_id: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub estimated_value: String,
    #[serde(default)]
    pub expected_close_date: String,
    #[serde(default)]
    pub notes: String,
}

/// Rows carry the customer and stage names the list table shows.
fn opportunity_rows(
    opportunities: &[Opportunity],
    customers: &[Customer],
    stages: &[SalesStage],
) -> Vec<serde_json::Value> {
    let customer_names: HashMap<&str, &str> =
        customers.iter().map(|c| (c.id.as_str(), c.legal_name.as_str())).collect();
    let stage_names: HashMap<&str, &str> =
        stages.iter().map(|s| (s.id.as_str(), s.name.as_str())).collect();

    opportunities
        .iter()
        .map(|o| {
            json!({
                "id": o.id,
                "title": o.title,
                "kind": o.kind.as_str(),
                "owner": o.owner,
                "estimated_value": o.estimated_value,
                "expected_close_date": o.expected_close_date,
                "actual_close_date": o.actual_close_date,
                "customer_name": customer_names.get(o.customer_id.as_str()).unwrap_or(&"?"),
                "stage_name": stage_names.get(o.stage_id.as_str()).unwrap_or(&"?"),
            })
        })
        .collect()
}

async fn opportunities_context(
    state: &AppState,
    stage: Option<&str>,
    notice: &NoticeQuery,
    correlation: &str,
) -> Result<Context, (StatusCode, Html<String>)> {
    let repo = SqlOpportunityRepository::new(state.db_pool.clone());
    let opportunities = repo.list(stage).await.map_err(|e| page_error(e, correlation))?;
    let stages = repo.list_stages().await.map_err(|e| page_error(e, correlation))?;
    let customers = SqlCustomerRepository::new(state.db_pool.clone())
        .list()
        .await
        .map_err(|e| page_error(e, correlation))?;

    let mut context = base_context("opportunities", notice);
    context.insert("rows", &opportunity_rows(&opportunities, &customers, &stages));
    context.insert("stages", &stages);
    context.insert("customers", &customers);
    context.insert("stage_filter", &stage.unwrap_or(""));
    Ok(context)
}

async fn opportunities_page(
    State(state): State<AppState>,
    Query(query): Query<OpportunityListQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let notice = NoticeQuery { notice: query.notice };
    let stage = query.stage.as_deref().filter(|value| !value.is_empty());
    let context = opportunities_context(&state, stage, &notice, &correlation).await?;
    render(&state, "opportunities.html", &context)
}

async fn opportunities_table(
    State(state): State<AppState>,
    Query(query): Query<OpportunityListQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let stage = query.stage.as_deref().filter(|value| !value.is_empty());
    let context =
        opportunities_context(&state, stage, &NoticeQuery::default(), &correlation).await?;
    render(&state, "opportunities_table.html", &context)
}

fn opportunity_from_form(
    mut opportunity: Opportunity,
    form: &OpportunityForm,
) -> (Opportunity, Vec<String>) {
    let mut errors = Vec::new();
    opportunity.customer_id = require_text_field(&mut errors, "customer", &form.customer_id);
    opportunity.title = require_text_field(&mut errors, "title", &form.title);
    opportunity.kind = match OpportunityKind::parse(form.kind.trim()) {
        Some(kind) => kind,
        None => {
            errors.push("kind must be project or contract".to_owned());
            OpportunityKind::Project
        }
    };
    opportunity.stage_id = require_text_field(&mut errors, "stage", &form.stage_id);
    opportunity.owner = require_text_field(&mut errors, "owner", &form.owner);
    opportunity.estimated_value =
        parse_money_field(&mut errors, "estimated value", &form.estimated_value);
    opportunity.expected_close_date =
        parse_date_field(&mut errors, "expected close date", &form.expected_close_date);
    opportunity.notes = form.notes.trim().to_owned();
    (opportunity, errors)
}

async fn create_opportunity(
    State(state): State<AppState>,
    Form(form): Form<OpportunityForm>,
) -> FormResult {
    let correlation = correlation_id();
    let now = Utc::now();
    let blank = Opportunity {
        id: numbering::entity_id("OPP"),
        customer_id: String::new(),
        title: String::new(),
        kind: OpportunityKind::Project,
        stage_id: String::new(),
        owner: String::new(),
        estimated_value: rust_decimal::Decimal::ZERO,
        expected_close_date: None,
        actual_close_date: None,
        notes: String::new(),
        created_at: now,
        updated_at: now,
    };
    let (opportunity, errors) = opportunity_from_form(blank, &form);
    if !errors.is_empty() {
        let context =
            opportunities_context(&state, None, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "opportunities.html", context, errors);
    }

    match SqlOpportunityRepository::new(state.db_pool.clone()).save(opportunity).await {
        Ok(saved) => {
            Ok(redirect(&format!("/opportunities/{}", saved.id), "created").into_response())
        }
        Err(e) => {
            let context =
                opportunities_context(&state, None, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "opportunities.html", context, e, &correlation)
        }
    }
}

async fn opportunity_detail_context(
    state: &AppState,
    id: &str,
    notice: &NoticeQuery,
    correlation: &str,
) -> Result<Context, (StatusCode, Html<String>)> {
    let repo = SqlOpportunityRepository::new(state.db_pool.clone());
    let opportunity = repo
        .find_by_id(id)
        .await
        .map_err(|e| page_error(e, correlation))?
        .ok_or_else(|| not_found("Opportunity"))?;
    let stages = repo.list_stages().await.map_err(|e| page_error(e, correlation))?;
    let activities = repo.list_activities(id).await.map_err(|e| page_error(e, correlation))?;
    let customers = SqlCustomerRepository::new(state.db_pool.clone())
        .list()
        .await
        .map_err(|e| page_error(e, correlation))?;
    let proposals = SqlProposalRepository::new(state.db_pool.clone())
        .list_for_opportunity(id)
        .await
        .map_err(|e| page_error(e, correlation))?;

    let mut context = base_context("opportunities", notice);
    context.insert("opportunity", &opportunity);
    context.insert("stages", &stages);
    context.insert("activities", &activities);
    context.insert("customers", &customers);
    context.insert("proposals", &proposals);
    Ok(context)
}

async fn opportunity_detail_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(notice): Query<NoticeQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let context = opportunity_detail_context(&state, &id, &notice, &correlation).await?;
    render(&state, "opportunity_detail.html", &context)
}

async fn update_opportunity(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<OpportunityForm>,
) -> FormResult {
    let correlation = correlation_id();
    let repo = SqlOpportunityRepository::new(state.db_pool.clone());
    let existing = repo
        .find_by_id(&id)
        .await
        .map_err(|e| page_error(e, &correlation))?
        .ok_or_else(|| not_found("Opportunity"))?;

    let (opportunity, errors) = opportunity_from_form(existing, &form);
    if !errors.is_empty() {
        let context =
            opportunity_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "opportunity_detail.html", context, errors);
    }

    match repo.save(opportunity).await {
        Ok(_) => Ok(redirect(&format!("/opportunities/{id}"), "updated").into_response()),
        Err(e) => {
            let context =
                opportunity_detail_context(&state, &id, &NoticeQuery::default(), &correlation)
                    .await?;
            render_form_failure(&state, "opportunity_detail.html", context, e, &correlation)
        }
    }
}

async fn delete_opportunity(State(state): State<AppState>, Path(id): Path<String>) -> FormResult {
    let correlation = correlation_id();
    let ctx = operation_context("web");
    match SqlOpportunityRepository::new(state.db_pool.clone()).delete(&id, &ctx).await {
        Ok(()) => Ok(redirect("/opportunities", "deleted").into_response()),
        Err(e) => {
            let context =
                opportunity_detail_context(&state, &id, &NoticeQuery::default(), &correlation)
                    .await?;
            render_form_failure(&state, "opportunity_detail.html", context, e, &correlation)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ActivityForm {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub due_date: String,
    #[serde(default)]
    pub done: Option<String>,
}

async fn create_activity(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<ActivityForm>,
) -> FormResult {
    let correlation = correlation_id();
    let mut errors = Vec::new();
    let summary = require_text_field(&mut errors, "summary", &form.summary);
    let due_date = parse_date_field(&mut errors, "due date", &form.due_date);
    if !errors.is_empty() {
        let context =
            opportunity_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "opportunity_detail.html", context, errors);
    }

    let activity = Activity {
        id: numbering::entity_id("ACT"),
        opportunity_id: id.clone(),
        kind: if form.kind.trim().is_empty() { "task".to_owned() } else { form.kind.trim().to_owned() },
        summary,
        due_date,
        done: checkbox(&form.done),
        created_at: Utc::now(),
    };
    match SqlOpportunityRepository::new(state.db_pool.clone()).save_activity(activity).await {
        Ok(_) => Ok(redirect(&format!("/opportunities/{id}"), "created").into_response()),
        Err(e) => {
            let context =
                opportunity_detail_context(&state, &id, &NoticeQuery::default(), &correlation)
                    .await?;
            render_form_failure(&state, "opportunity_detail.html", context, e, &correlation)
        }
    }
}

async fn delete_activity(
    State(state): State<AppState>,
    Path((id, activity_id)): Path<(String, String)>,
) -> FormResult {
    let correlation = correlation_id();
    SqlOpportunityRepository::new(state.db_pool.clone())
        .delete_activity(&activity_id)
        .await
        .map_err(|e| page_error(e, &correlation))?;
    Ok(redirect(&format!("/opportunities/{id}"), "deleted").into_response())
}

async fn toggle_activity(
    State(state): State<AppState>,
    Path((id, activity_id)): Path<(String, String)>,
) -> FormResult {
    let correlation = correlation_id();
    let repo = SqlOpportunityRepository::new(state.db_pool.clone());
    let activities = repo.list_activities(&id).await.map_err(|e| page_error(e, &correlation))?;
    let Some(mut activity) = activities.into_iter().find(|a| a.id == activity_id) else {
        return Err(not_found("Activity"));
    };
    activity.done = !activity.done;
    repo.save_activity(activity).await.map_err(|e| page_error(e, &correlation))?;
    Ok(redirect(&format!("/opportunities/{id}"), "updated").into_response())
}

// ---------------------------------------------------------------------------
// Proposals
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ProposalForm {
    #[serde(default)]
    pub valid_until: String,
    #[serde(default)]
    pub freight_value: String,
    #[serde(default)]
    pub discount_value: String,
    #[serde(default)]
    pub notes: String,
}

async fn create_proposal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<ProposalForm>,
) -> FormResult {
    let correlation = correlation_id();
    let mut errors = Vec::new();
    let valid_until = parse_date_field(&mut errors, "valid until", &form.valid_until);
    let freight_value = parse_money_field(&mut errors, "freight", &form.freight_value);
    let discount_value = parse_money_field(&mut errors, "discount", &form.discount_value);
    if !errors.is_empty() {
        let context =
            opportunity_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "opportunity_detail.html", context, errors);
    }

    let ctx = operation_context("web");
    let new = NewProposal {
        opportunity_id: id.clone(),
        valid_until,
        freight_value,
        discount_value,
        notes: form.notes.trim().to_owned(),
    };
    match SqlProposalRepository::new(state.db_pool.clone()).create(new, &ctx).await {
        Ok(proposal) => {
            Ok(redirect(&format!("/proposals/{}", proposal.id), "created").into_response())
        }
        Err(e) => {
            let context =
                opportunity_detail_context(&state, &id, &NoticeQuery::default(), &correlation)
                    .await?;
            render_form_failure(&state, "opportunity_detail.html", context, e, &correlation)
        }
    }
}

async fn proposal_detail_context(
    state: &AppState,
    id: &str,
    notice: &NoticeQuery,
    correlation: &str,
) -> Result<Context, (StatusCode, Html<String>)> {
    let repo = SqlProposalRepository::new(state.db_pool.clone());
    let proposal = repo
        .find_by_id(id)
        .await
        .map_err(|e| page_error(e, correlation))?
        .ok_or_else(|| not_found("Proposal"))?;
    let lines = repo.list_lines(id).await.map_err(|e| page_error(e, correlation))?;
    let opportunity = SqlOpportunityRepository::new(state.db_pool.clone())
        .find_by_id(&proposal.opportunity_id)
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

    let next_statuses: Vec<&str> =
        [ProposalStatus::Sent, ProposalStatus::Accepted, ProposalStatus::Declined]
            .into_iter()
            .filter(|next| proposal.can_transition_to(*next))
            .map(|next| next.as_str())
            .collect();

    let mut context = base_context("opportunities", notice);
    context.insert("proposal", &proposal);
    context.insert("lines", &lines);
    context.insert("opportunity", &opportunity);
    context.insert("products", &products);
    context.insert("services", &services);
    context.insert("next_statuses", &next_statuses);
    Ok(context)
}

async fn proposal_detail_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(notice): Query<NoticeQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let context = proposal_detail_context(&state, &id, &notice, &correlation).await?;
    render(&state, "proposal_detail.html", &context)
}

async fn update_proposal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<ProposalForm>,
) -> FormResult {
    let correlation = correlation_id();
    let repo = SqlProposalRepository::new(state.db_pool.clone());
    let mut proposal = repo
        .find_by_id(&id)
        .await
        .map_err(|e| page_error(e, &correlation))?
        .ok_or_else(|| not_found("Proposal"))?;

    let mut errors = Vec::new();
    proposal.valid_until = parse_date_field(&mut errors, "valid until", &form.valid_until);
    proposal.freight_value = parse_money_field(&mut errors, "freight", &form.freight_value);
    proposal.discount_value = parse_money_field(&mut errors, "discount", &form.discount_value);
    proposal.notes = form.notes.trim().to_owned();
    if !errors.is_empty() {
        let context =
            proposal_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "proposal_detail.html", context, errors);
    }

    match repo.save(proposal).await {
        Ok(_) => Ok(redirect(&format!("/proposals/{id}"), "updated").into_response()),
        Err(e) => {
            let context =
                proposal_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "proposal_detail.html", context, e, &correlation)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ProposalLineForm {
    #[serde(default)]
    pub product_id: String,
    #[serde(default)]
    pub service_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub quantity: String,
    #[serde(default)]
    pub unit_price: String,
}

async fn add_proposal_line(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<ProposalLineForm>,
) -> FormResult {
    let correlation = correlation_id();
    let mut errors = Vec::new();
    let quantity = parse_money_field(&mut errors, "quantity", &form.quantity);
    let unit_price = parse_money_field(&mut errors, "unit price", &form.unit_price);
    if !errors.is_empty() {
        let context =
            proposal_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "proposal_detail.html", context, errors);
    }

    let repo = SqlProposalRepository::new(state.db_pool.clone());
    let mut drafts: Vec<ProposalLineDraft> = repo
        .list_lines(&id)
        .await
        .map_err(|e| page_error(e, &correlation))?
        .into_iter()
        .map(|line| ProposalLineDraft {
            product_id: line.product_id,
            service_id: line.service_id,
            description: line.description,
            quantity: line.quantity,
            unit_price: line.unit_price,
        })
        .collect();
    drafts.push(ProposalLineDraft {
        product_id: optional(form.product_id),
        service_id: optional(form.service_id),
        description: form.description.trim().to_owned(),
        quantity,
        unit_price,
    });

    match repo.replace_lines(&id, drafts).await {
        Ok(_) => Ok(redirect(&format!("/proposals/{id}"), "updated").into_response()),
        Err(e) => {
            let context =
                proposal_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "proposal_detail.html", context, e, &correlation)
        }
    }
}

async fn delete_proposal_line(
    State(state): State<AppState>,
    Path((id, line_id)): Path<(String, String)>,
) -> FormResult {
    let correlation = correlation_id();
    let repo = SqlProposalRepository::new(state.db_pool.clone());
    let drafts: Vec<ProposalLineDraft> = repo
        .list_lines(&id)
        .await
        .map_err(|e| page_error(e, &correlation))?
        .into_iter()
        .filter(|line| line.id != line_id)
        .map(|line| ProposalLineDraft {
            product_id: line.product_id,
            service_id: line.service_id,
            description: line.description,
            quantity: line.quantity,
            unit_price: line.unit_price,
        })
        .collect();

    match repo.replace_lines(&id, drafts).await {
        Ok(_) => Ok(redirect(&format!("/proposals/{id}"), "deleted").into_response()),
        Err(e) => {
            let context =
                proposal_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "proposal_detail.html", context, e, &correlation)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProposalStatusForm {
    #[serde(default)]
    pub status: String,
}

async fn transition_proposal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<ProposalStatusForm>,
) -> FormResult {
    let correlation = correlation_id();
    let Some(status) = ProposalStatus::parse(form.status.trim()) else {
        let context =
            proposal_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(
            &state,
            "proposal_detail.html",
            context,
            vec![format!("unknown proposal status '{}'", form.status)],
        );
    };

    let ctx = operation_context("web");
    match SqlProposalRepository::new(state.db_pool.clone()).transition(&id, status, &ctx).await {
        Ok(_) => Ok(redirect(&format!("/proposals/{id}"), "status").into_response()),
        Err(e) => {
            let context =
                proposal_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "proposal_detail.html", context, e, &correlation)
        }
    }
}

// ---------------------------------------------------------------------------
// Sales goals
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct GoalsQuery {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub notice: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GoalForm {
    #[serde(default)]
    pub salesperson: String,
    #[serde(default)]
    pub year: String,
    #[serde(default)]
    pub month: String,
    #[serde(default)]
    pub target_value: String,
}

async fn goals_context(
    state: &AppState,
    year: i32,
    month: u32,
    notice: &NoticeQuery,
    correlation: &str,
) -> Result<Context, (StatusCode, Html<String>)> {
    let repo = SqlSalesGoalRepository::new(state.db_pool.clone());
    let goals = repo.list(year).await.map_err(|e| page_error(e, correlation))?;
    let attainment = repo.attainment(year, month).await.map_err(|e| page_error(e, correlation))?;

    let mut context = base_context("goals", notice);
    context.insert("goals", &goals);
    context.insert("attainment", &attainment);
    context.insert("year", &year);
    context.insert("month", &month);
    Ok(context)
}

async fn goals_page(State(state): State<AppState>, Query(query): Query<GoalsQuery>) -> PageResult {
    let correlation = correlation_id();
    let today = Utc::now().date_naive();
    let year = query.year.unwrap_or_else(|| today.year());
    let month = query.month.unwrap_or_else(|| today.month());
    let notice = NoticeQuery { notice: query.notice };
    let context = goals_context(&state, year, month, &notice, &correlation).await?;
    render(&state, "goals.html", &context)
}

async fn upsert_goal(State(state): State<AppState>, Form(form): Form<GoalForm>) -> FormResult {
    let correlation = correlation_id();
    let today = Utc::now().date_naive();
    let mut errors = Vec::new();
    let year: i32 = match form.year.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            errors.push("year must be a number".to_owned());
            today.year()
        }
    };
    let month: u32 = match form.month.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            errors.push("month must be a number from 1 to 12".to_owned());
            today.month()
        }
    };
    let target_value = parse_money_field(&mut errors, "target value", &form.target_value);
    if !errors.is_empty() {
        let context = goals_context(
            &state,
            today.year(),
            today.month(),
            &NoticeQuery::default(),
            &correlation,
        )
        .await?;
        return render_field_errors(&state, "goals.html", context, errors);
    }

    let goal = SalesGoal {
        id: numbering::entity_id("GOL"),
        salesperson: optional(form.salesperson),
        year,
        month,
        target_value,
    };
    match SqlSalesGoalRepository::new(state.db_pool.clone()).upsert(goal).await {
        Ok(_) => Ok(redirect(&format!("/goals?year={year}&month={month}"), "updated")
            .into_response()),
        Err(e) => {
            let context =
                goals_context(&state, year, month, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "goals.html", context, e, &correlation)
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::extract::{Form, Path, Query, State};
    use axum::http::{header, StatusCode};
    use rust_decimal::Decimal;

    use opsdesk_core::domain::crm::{Opportunity, OpportunityKind};
    use opsdesk_core::numbering;
    use opsdesk_db::repositories::{SqlCustomerRepository, SqlOpportunityRepository, SqlProposalRepository};

    use crate::web::testing;

    use super::*;

    fn customer_form(name: &str, tax_id: &str) -> CustomerForm {
        CustomerForm {
            legal_name: name.to_owned(),
            tax_id: tax_id.to_owned(),
            credit_limit: "10.000,00".to_owned(),
            ..CustomerForm::default()
        }
    }

    fn location_of(response: &axum::response::Response) -> String {
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_owned()
    }

    async fn seed_opportunity(state: &crate::web::AppState, stage_id: &str) -> (String, String) {
        let mut draft = super::blank_customer();
        draft.legal_name = "Fictional SA".to_owned();
        draft.tax_id = format!("tax-{}", draft.id);
        let customer = SqlCustomerRepository::new(state.db_pool.clone())
            .save(draft)
            .await
            .expect("customer");

        let now = chrono::Utc::now();
        let opportunity = SqlOpportunityRepository::new(state.db_pool.clone())
            .save(Opportunity {
                id: numbering::entity_id("OPP"),
                customer_id: customer.id.clone(),
                title: "Refit".to_owned(),
                kind: OpportunityKind::Project,
                stage_id: stage_id.to_owned(),
                owner: "Marina".to_owned(),
                estimated_value: Decimal::new(500_000, 2),
                expected_close_date: None,
                actual_close_date: None,
                notes: String::new(),
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("opportunity");
        (customer.id, opportunity.id)
    }

    #[tokio::test]
    async fn creating_a_customer_redirects_to_its_detail_page() {
        let state = testing::state().await;

        let response =
            create_customer(State(state.clone()), Form(customer_form("Acme Ltda", "11.222.333/0001-44")))
                .await
                .expect("create should succeed");

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = location_of(&response);
        assert!(location.starts_with("/customers/CUS-"), "{location}");
        assert!(location.ends_with("?notice=created"), "{location}");

        let customers =
            SqlCustomerRepository::new(state.db_pool.clone()).list().await.expect("list");
        assert_eq!(customers.len(), 1);
        assert_eq!(customers[0].legal_name, "Acme Ltda");
        assert_eq!(customers[0].credit_limit, Decimal::new(1_000_000, 2));

        state.db_pool.close().await;
    }

    #[tokio::test]
    async fn a_customer_with_an_open_opportunity_refuses_deletion() {
        let state = testing::state().await;
        let (customer_id, _) = seed_opportunity(&state, "stage-prospecting").await;

        let response = delete_customer(State(state.clone()), Path(customer_id.clone()))
            .await
            .expect("refusal renders the detail page");

        assert_eq!(response.status(), StatusCode::CONFLICT);

        let still_there = SqlCustomerRepository::new(state.db_pool.clone())
            .find_by_id(&customer_id)
            .await
            .expect("find");
        assert!(still_there.is_some(), "the customer row must survive the refusal");

        state.db_pool.close().await;
    }

    #[tokio::test]
    async fn missing_required_fields_re_render_the_form_with_messages() {
        let state = testing::state().await;

        let response = create_customer(State(state.clone()), Form(CustomerForm::default()))
            .await
            .expect("validation failure still renders");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        state.db_pool.close().await;
    }

    #[tokio::test]
    async fn proposal_walk_create_line_send_through_the_forms() {
        let state = testing::state().await;
        let (_, opportunity_id) = seed_opportunity(&state, "stage-proposal").await;

        let response = create_proposal(
            State(state.clone()),
            Path(opportunity_id.clone()),
            Form(ProposalForm {
                freight_value: "60,00".to_owned(),
                ..ProposalForm::default()
            }),
        )
        .await
        .expect("proposal create");
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = location_of(&response);
        let proposal_id =
            location.trim_start_matches("/proposals/").split('?').next().unwrap().to_owned();

        let response = add_proposal_line(
            State(state.clone()),
            Path(proposal_id.clone()),
            Form(ProposalLineForm {
                description: "Fiber rollout".to_owned(),
                quantity: "2".to_owned(),
                unit_price: "450,00".to_owned(),
                ..Default::default()
            }),
        )
        .await
        .expect("line add");
        // Description-only lines violate the product-or-service rule.
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let proposal = SqlProposalRepository::new(state.db_pool.clone())
            .find_by_id(&proposal_id)
            .await
            .expect("find")
            .expect("present");
        assert_eq!(proposal.total_value, Decimal::new(6_000, 2), "freight only so far");

        let response = transition_proposal(
            State(state.clone()),
            Path(proposal_id.clone()),
            Form(ProposalStatusForm { status: "sent".to_owned() }),
        )
        .await
        .expect("transition");
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        state.db_pool.close().await;
    }

    #[tokio::test]
    async fn proposals_are_refused_on_stages_that_disallow_them() {
        let state = testing::state().await;
        let (_, opportunity_id) = seed_opportunity(&state, "stage-prospecting").await;

        let response = create_proposal(
            State(state.clone()),
            Path(opportunity_id),
            Form(ProposalForm::default()),
        )
        .await
        .expect("refusal renders");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        state.db_pool.close().await;
    }

    #[tokio::test]
    async fn goals_page_shows_upserted_goals() {
        let state = testing::state().await;

        let response = upsert_goal(
            State(state.clone()),
            Form(GoalForm {
                salesperson: "Marina".to_owned(),
                year: "2026".to_owned(),
                month: "8".to_owned(),
                target_value: "15.000,00".to_owned(),
            }),
        )
        .await
        .expect("upsert");
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let page = goals_page(
            State(state.clone()),
            Query(GoalsQuery { year: Some(2026), month: Some(8), notice: None }),
        )
        .await
        .expect("page");
        assert!(testing::body_of(&page).contains("Marina"));

        state.db_pool.close().await;
    }
}
