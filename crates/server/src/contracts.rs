//! Contract pages: the register, terms editing, the status walk, monthly
//! billing, and the renewal window with its outbound notices.

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
use tracing::{info, warn};

use opsdesk_core::domain::contracts::{AdjustmentIndex, Contract, ContractKind, ContractStatus};
use opsdesk_db::repositories::{
    NewContract, SqlContractRepository, SqlCustomerRepository, SqlSupplierRepository,
};
use opsdesk_mail::OutboundMessage;

use crate::web::{
    base_context, correlation_id, not_found, operation_context, page_error, parse_date_field,
    parse_money_field, redirect, render, render_field_errors, render_form_failure, AppState,
    FormResult, NoticeQuery, PageResult,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/contracts", get(contracts_page).post(create_contract))
        .route("/contracts/table", get(contracts_table))
        .route("/contracts/{id}", get(contract_detail_page).post(update_contract))
        .route("/contracts/{id}/status", post(change_status))
        .route("/contracts/{id}/emit", post(emit_invoice))
        .route("/renewals", get(renewals_page))
        .route("/renewals/send", post(send_renewal_notices))
}

// ---------------------------------------------------------------------------
// List and create
// ---------------------------------------------------------------------------

fn contract_rows(
    contracts: &[Contract],
    customers: &HashMap<String, String>,
    suppliers: &HashMap<String, String>,
) -> Vec<serde_json::Value> {
    contracts
        .iter()
        .map(|contract| {
            let counterparty = contract
                .customer_id
                .as_deref()
                .and_then(|id| customers.get(id))
                .or_else(|| contract.supplier_id.as_deref().and_then(|id| suppliers.get(id)))
                .cloned()
                .unwrap_or_default();
            json!({
                "id": contract.id,
                "number": contract.number,
                "kind": contract.kind,
                "counterparty": counterparty,
                "status": contract.status,
                "monthly_value": contract.monthly_value,
                "next_renewal_date": contract.next_renewal_date,
            })
        })
        .collect()
}

async fn contracts_context(
    state: &AppState,
    notice: &NoticeQuery,
    status: Option<ContractStatus>,
    correlation: &str,
) -> Result<Context, (StatusCode, Html<String>)> {
    let contracts = SqlContractRepository::new(state.db_pool.clone())
        .list(status)
        .await
        .map_err(|e| page_error(e, correlation))?;
    let customers = SqlCustomerRepository::new(state.db_pool.clone())
        .list()
        .await
        .map_err(|e| page_error(e, correlation))?;
    let suppliers = SqlSupplierRepository::new(state.db_pool.clone())
        .list(None)
        .await
        .map_err(|e| page_error(e, correlation))?;

    let customer_names: HashMap<String, String> =
        customers.iter().map(|c| (c.id.clone(), c.legal_name.clone())).collect();
    let supplier_names: HashMap<String, String> =
        suppliers.iter().map(|s| (s.id.clone(), s.legal_name.clone())).collect();

    let mut context = base_context("contracts", notice);
    context.insert("rows", &contract_rows(&contracts, &customer_names, &supplier_names));
    context.insert("customers", &customers);
    context.insert("suppliers", &suppliers);
    context.insert(
        "status_filter",
        &status.map(|value| value.as_str()).unwrap_or(""),
    );
    Ok(context)
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusFilterQuery {
    pub status: Option<String>,
}

async fn contracts_page(
    State(state): State<AppState>,
    Query(notice): Query<NoticeQuery>,
    Query(filter): Query<StatusFilterQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let status = filter.status.as_deref().and_then(ContractStatus::parse);
    let context = contracts_context(&state, &notice, status, &correlation).await?;
    render(&state, "contracts.html", &context)
}

async fn contracts_table(
    State(state): State<AppState>,
    Query(filter): Query<StatusFilterQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let status = filter.status.as_deref().and_then(ContractStatus::parse);
    let context =
        contracts_context(&state, &NoticeQuery::default(), status, &correlation).await?;
    render(&state, "contracts_table.html", &context)
}

#[derive(Debug, Default, Deserialize)]
pub struct ContractForm {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub customer_id: String,
    #[serde(default)]
    pub supplier_id: String,
    #[serde(default)]
    pub opportunity_id: String,
    #[serde(default)]
    pub monthly_value: String,
    #[serde(default)]
    pub started_on: String,
    #[serde(default)]
    pub ends_on: String,
    #[serde(default)]
    pub adjustment_index: String,
    #[serde(default)]
    pub billing_day: String,
    #[serde(default)]
    pub next_renewal_date: String,
    #[serde(default)]
    pub notes: String,
}

fn parse_billing_day(errors: &mut Vec<String>, raw: &str) -> u32 {
    if raw.trim().is_empty() {
        return 10;
    }
    match raw.trim().parse::<u32>() {
        Ok(day) if (1..=31).contains(&day) => day,
        _ => {
            errors.push("billing day must be between 1 and 31".to_owned());
            10
        }
    }
}

async fn create_contract(
    State(state): State<AppState>,
    Form(form): Form<ContractForm>,
) -> FormResult {
    let correlation = correlation_id();
    let mut errors = Vec::new();
    let kind = ContractKind::parse(form.kind.trim()).unwrap_or(ContractKind::Revenue);
    let monthly_value = parse_money_field(&mut errors, "monthly value", &form.monthly_value);
    let started_on = parse_date_field(&mut errors, "start date", &form.started_on);
    let ends_on = parse_date_field(&mut errors, "end date", &form.ends_on);
    let next_renewal_date =
        parse_date_field(&mut errors, "renewal date", &form.next_renewal_date);
    let billing_day = parse_billing_day(&mut errors, &form.billing_day);
    let adjustment_index = AdjustmentIndex::parse(form.adjustment_index.trim())
        .unwrap_or(AdjustmentIndex::Fixed);
    if !errors.is_empty() {
        let context =
            contracts_context(&state, &NoticeQuery::default(), None, &correlation).await?;
        return render_field_errors(&state, "contracts.html", context, errors);
    }

    let new = NewContract {
        kind,
        customer_id: crate::web::optional(form.customer_id),
        supplier_id: crate::web::optional(form.supplier_id),
        opportunity_id: crate::web::optional(form.opportunity_id),
        monthly_value,
        started_on,
        ends_on,
        adjustment_index,
        billing_day,
        next_renewal_date,
        notes: form.notes.trim().to_owned(),
    };
    match SqlContractRepository::new(state.db_pool.clone()).create(new).await {
        Ok(contract) => {
            Ok(redirect(&format!("/contracts/{}", contract.id), "created").into_response())
        }
        Err(e) => {
            let context =
                contracts_context(&state, &NoticeQuery::default(), None, &correlation).await?;
            render_form_failure(&state, "contracts.html", context, e, &correlation)
        }
    }
}

// ---------------------------------------------------------------------------
// Detail, terms, and the status walk
// ---------------------------------------------------------------------------

async fn contract_detail_context(
    state: &AppState,
    id: &str,
    notice: &NoticeQuery,
    correlation: &str,
) -> Result<Context, (StatusCode, Html<String>)> {
    let repo = SqlContractRepository::new(state.db_pool.clone());
    let contract = repo
        .find_by_id(id)
        .await
        .map_err(|e| page_error(e, correlation))?
        .ok_or_else(|| not_found("Contract"))?;

    let counterparty = match (&contract.customer_id, &contract.supplier_id) {
        (Some(customer_id), _) => SqlCustomerRepository::new(state.db_pool.clone())
            .find_by_id(customer_id)
            .await
            .map_err(|e| page_error(e, correlation))?
            .map(|customer| customer.legal_name),
        (None, Some(supplier_id)) => SqlSupplierRepository::new(state.db_pool.clone())
            .find_by_id(supplier_id)
            .await
            .map_err(|e| page_error(e, correlation))?
            .map(|supplier| supplier.legal_name),
        (None, None) => None,
    };

    let next_statuses: Vec<&str> = [
        ContractStatus::Signed,
        ContractStatus::Active,
        ContractStatus::Suspended,
        ContractStatus::Closed,
    ]
    .into_iter()
    .filter(|next| contract.can_transition_to(*next))
    .map(|next| next.as_str())
    .collect();

    let today = Utc::now().date_naive();
    let mut context = base_context("contracts", notice);
    context.insert("can_bill", &(contract.status == ContractStatus::Active
        && contract.kind == ContractKind::Revenue));
    context.insert("contract", &contract);
    context.insert("counterparty", &counterparty.unwrap_or_default());
    context.insert("next_statuses", &next_statuses);
    context.insert("current_year", &today.year());
    context.insert("current_month", &today.month());
    Ok(context)
}

async fn contract_detail_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(notice): Query<NoticeQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let context = contract_detail_context(&state, &id, &notice, &correlation).await?;
    render(&state, "contract_detail.html", &context)
}

async fn update_contract(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<ContractForm>,
) -> FormResult {
    let correlation = correlation_id();
    let repo = SqlContractRepository::new(state.db_pool.clone());
    let mut contract = repo
        .find_by_id(&id)
        .await
        .map_err(|e| page_error(e, &correlation))?
        .ok_or_else(|| not_found("Contract"))?;

    let mut errors = Vec::new();
    contract.monthly_value = parse_money_field(&mut errors, "monthly value", &form.monthly_value);
    contract.started_on = parse_date_field(&mut errors, "start date", &form.started_on);
    contract.ends_on = parse_date_field(&mut errors, "end date", &form.ends_on);
    contract.next_renewal_date =
        parse_date_field(&mut errors, "renewal date", &form.next_renewal_date);
    contract.billing_day = parse_billing_day(&mut errors, &form.billing_day);
    if let Some(index) = AdjustmentIndex::parse(form.adjustment_index.trim()) {
        contract.adjustment_index = index;
    }
    contract.notes = form.notes.trim().to_owned();
    if !errors.is_empty() {
        let context =
            contract_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "contract_detail.html", context, errors);
    }

    match repo.save(contract).await {
        Ok(_) => Ok(redirect(&format!("/contracts/{id}"), "updated").into_response()),
        Err(e) => {
            let context =
                contract_detail_context(&state, &id, &NoticeQuery::default(), &correlation)
                    .await?;
            render_form_failure(&state, "contract_detail.html", context, e, &correlation)
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

async fn change_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<StatusForm>,
) -> FormResult {
    let correlation = correlation_id();
    let Some(next) = ContractStatus::parse(form.status.trim()) else {
        let context =
            contract_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(
            &state,
            "contract_detail.html",
            context,
            vec!["unknown contract status".to_owned()],
        );
    };

    let ctx = operation_context(&form.actor);
    match SqlContractRepository::new(state.db_pool.clone()).transition(&id, next, &ctx).await {
        Ok(_) => Ok(redirect(&format!("/contracts/{id}"), "status").into_response()),
        Err(e) => {
            let context =
                contract_detail_context(&state, &id, &NoticeQuery::default(), &correlation)
                    .await?;
            render_form_failure(&state, "contract_detail.html", context, e, &correlation)
        }
    }
}

// ---------------------------------------------------------------------------
// Monthly billing
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct EmitForm {
    #[serde(default)]
    pub year: String,
    #[serde(default)]
    pub month: String,
    #[serde(default)]
    pub actor: String,
}

async fn emit_invoice(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<EmitForm>,
) -> FormResult {
    let correlation = correlation_id();
    let today = Utc::now().date_naive();
    let year = form.year.trim().parse::<i32>().unwrap_or_else(|_| today.year());
    let month = form.month.trim().parse::<u32>().unwrap_or_else(|_| today.month());

    let ctx = operation_context(&form.actor);
    match SqlContractRepository::new(state.db_pool.clone())
        .emit_monthly_invoice(&id, year, month, &ctx)
        .await
    {
        Ok(invoice) => {
            info!(
                event_name = "contracts.invoice_emitted",
                correlation_id = %ctx.correlation_id,
                contract_id = %id,
                number = %invoice.number,
                "monthly invoice emitted"
            );
            Ok(redirect(&format!("/contracts/{id}"), "emitted").into_response())
        }
        Err(e) => {
            let context =
                contract_detail_context(&state, &id, &NoticeQuery::default(), &correlation)
                    .await?;
            render_form_failure(&state, "contract_detail.html", context, e, &correlation)
        }
    }
}

// ---------------------------------------------------------------------------
// Renewal window
// ---------------------------------------------------------------------------

async fn renewals_context(
    state: &AppState,
    notice: &NoticeQuery,
    correlation: &str,
) -> Result<Context, (StatusCode, Html<String>)> {
    let today = Utc::now().date_naive();
    let window = state.config.email.renewal_window_days;
    let notices = SqlContractRepository::new(state.db_pool.clone())
        .renewal_notices(today, window)
        .await
        .map_err(|e| page_error(e, correlation))?;

    let mut context = base_context("contracts", notice);
    context.insert("notices", &notices);
    context.insert("window_days", &window);
    context.insert("mailer_enabled", &state.mailer.is_enabled());
    context.insert(
        "notify_address",
        &state.config.email.notify_address.clone().unwrap_or_default(),
    );
    Ok(context)
}

async fn renewals_page(
    State(state): State<AppState>,
    Query(notice): Query<NoticeQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let context = renewals_context(&state, &notice, &correlation).await?;
    render(&state, "renewals.html", &context)
}

/// One message per due contract to the configured notify address. Partial
/// delivery is reported, not rolled back; a failed send leaves the notice
/// listed for the next run.
async fn send_renewal_notices(State(state): State<AppState>) -> FormResult {
    let correlation = correlation_id();
    let Some(to) = state.config.email.notify_address.clone().filter(|a| !a.is_empty()) else {
        let context = renewals_context(&state, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(
            &state,
            "renewals.html",
            context,
            vec!["configure email.notify_address before sending notices".to_owned()],
        );
    };

    let today = Utc::now().date_naive();
    let notices = SqlContractRepository::new(state.db_pool.clone())
        .renewal_notices(today, state.config.email.renewal_window_days)
        .await
        .map_err(|e| page_error(e, &correlation))?;

    let mut failures = Vec::new();
    for notice in &notices {
        let message = OutboundMessage::renewal(to.clone(), notice);
        if let Err(error) = state.mailer.send(&message).await {
            warn!(
                event_name = "contracts.renewal_notice_failed",
                correlation_id = correlation,
                contract = %notice.contract_number,
                error = %error,
                "renewal notice delivery failed"
            );
            failures.push(format!("{}: {error}", notice.contract_number));
        }
    }

    if failures.is_empty() {
        info!(
            event_name = "contracts.renewal_notices_sent",
            correlation_id = correlation,
            count = notices.len(),
            "renewal notices sent"
        );
        Ok(redirect("/renewals", "notified").into_response())
    } else {
        let context = renewals_context(&state, &NoticeQuery::default(), &correlation).await?;
        render_field_errors(&state, "renewals.html", context, failures)
    }
}

#[cfg(test)]
mod tests {
    use axum::extract::{Form, Path, Query, State};
    use axum::http::{header, StatusCode};
    use chrono::{Days, Utc};
    use rust_decimal::Decimal;

    use opsdesk_core::domain::contracts::ContractStatus;
    use opsdesk_core::domain::crm::Customer;
    use opsdesk_core::numbering;
    use opsdesk_db::repositories::{SqlContractRepository, SqlCustomerRepository};

    use crate::web::testing;

    use super::*;

    async fn seed_customer(state: &crate::web::AppState) -> String {
        let now = Utc::now();
        SqlCustomerRepository::new(state.db_pool.clone())
            .save(Customer {
                id: numbering::entity_id("CUS"),
                legal_name: "Acme Ltda".to_owned(),
                trade_name: String::new(),
                tax_id: "12.345.678/0001-90".to_owned(),
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

    fn location_of(response: &axum::response::Response) -> String {
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_owned()
    }

    async fn activate(state: &crate::web::AppState, id: &str) {
        let repo = SqlContractRepository::new(state.db_pool.clone());
        let ctx = crate::web::operation_context("test");
        repo.transition(id, ContractStatus::Signed, &ctx).await.expect("signed");
        repo.transition(id, ContractStatus::Active, &ctx).await.expect("active");
    }

    #[tokio::test]
    async fn a_contract_walks_from_the_form_to_active() {
        let state = testing::state().await;
        let customer_id = seed_customer(&state).await;

        let response = create_contract(
            State(state.clone()),
            Form(ContractForm {
                kind: "revenue".to_owned(),
                customer_id,
                monthly_value: "2.500,00".to_owned(),
                billing_day: "10".to_owned(),
                ..ContractForm::default()
            }),
        )
        .await
        .expect("create");
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let id = location_of(&response)
            .trim_start_matches("/contracts/")
            .split('?')
            .next()
            .unwrap()
            .to_owned();

        let response = change_status(
            State(state.clone()),
            Path(id.clone()),
            Form(StatusForm { status: "signed".to_owned(), actor: "Rafael".to_owned() }),
        )
        .await
        .expect("sign");
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        // Skipping straight to closed is refused from `signed`.
        let response = change_status(
            State(state.clone()),
            Path(id.clone()),
            Form(StatusForm { status: "closed".to_owned(), actor: "Rafael".to_owned() }),
        )
        .await
        .expect("refusal renders");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let contract = SqlContractRepository::new(state.db_pool.clone())
            .find_by_id(&id)
            .await
            .expect("find")
            .expect("present");
        assert_eq!(contract.status, ContractStatus::Signed);
        assert_eq!(contract.monthly_value, Decimal::new(250_000, 2));

        state.db_pool.close().await;
    }

    #[tokio::test]
    async fn emitting_twice_for_the_same_period_is_refused() {
        let state = testing::state().await;
        let customer_id = seed_customer(&state).await;

        let contract = SqlContractRepository::new(state.db_pool.clone())
            .create(NewContract {
                kind: opsdesk_core::domain::contracts::ContractKind::Revenue,
                customer_id: Some(customer_id),
                supplier_id: None,
                opportunity_id: None,
                monthly_value: Decimal::new(100_000, 2),
                started_on: None,
                ends_on: None,
                adjustment_index: opsdesk_core::domain::contracts::AdjustmentIndex::Fixed,
                billing_day: 10,
                next_renewal_date: None,
                notes: String::new(),
            })
            .await
            .expect("contract");
        activate(&state, &contract.id).await;

        let form = EmitForm {
            year: "2026".to_owned(),
            month: "8".to_owned(),
            actor: "Financeiro".to_owned(),
        };
        let response = emit_invoice(
            State(state.clone()),
            Path(contract.id.clone()),
            Form(EmitForm { ..form }),
        )
        .await
        .expect("first emission");
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let response = emit_invoice(
            State(state.clone()),
            Path(contract.id.clone()),
            Form(EmitForm {
                year: "2026".to_owned(),
                month: "8".to_owned(),
                actor: "Financeiro".to_owned(),
            }),
        )
        .await
        .expect("refusal renders");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        state.db_pool.close().await;
    }

    #[tokio::test]
    async fn renewal_notices_go_to_the_configured_address() {
        let state = testing::state().await;
        let customer_id = seed_customer(&state).await;

        let contract = SqlContractRepository::new(state.db_pool.clone())
            .create(NewContract {
                kind: opsdesk_core::domain::contracts::ContractKind::Revenue,
                customer_id: Some(customer_id),
                supplier_id: None,
                opportunity_id: None,
                monthly_value: Decimal::new(180_000, 2),
                started_on: None,
                ends_on: None,
                adjustment_index: opsdesk_core::domain::contracts::AdjustmentIndex::Igpm,
                billing_day: 5,
                next_renewal_date: Utc::now().date_naive().checked_add_days(Days::new(7)),
                notes: String::new(),
            })
            .await
            .expect("contract");
        activate(&state, &contract.id).await;

        let mut state = state;
        state.config.email.notify_address = Some("ops@example.com".to_owned());
        let mailer = std::sync::Arc::new(opsdesk_mail::MockMailer::new());
        state.mailer = mailer.clone();

        let page = renewals_page(State(state.clone()), Query(NoticeQuery::default()))
            .await
            .expect("window renders");
        assert!(testing::body_of(&page).contains(&contract.number));

        let response =
            send_renewal_notices(State(state.clone())).await.expect("notices sent");
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let sent = mailer.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ops@example.com");
        assert!(sent[0].subject.contains(&contract.number));

        state.db_pool.close().await;
    }

    #[tokio::test]
    async fn sending_without_a_notify_address_is_refused() {
        let state = testing::state().await;

        let response = send_renewal_notices(State(state.clone()))
            .await
            .expect("refusal renders");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        state.db_pool.close().await;
    }
}
