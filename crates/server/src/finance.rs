//! Finance pages: receivable invoices and payable expenses.
//!
//! Listing either side first sweeps open documents past their due date into
//! `overdue`, so the tables always reflect today. Payments, cancellations,
//! and renegotiations post back to the document page; attachments arrive as
//! multipart uploads and land under the configured uploads directory.

use std::collections::HashMap;

use axum::extract::{Form, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tera::Context;

use opsdesk_core::domain::finance::{Expense, ExpenseStatus, Invoice, InvoiceStatus};
use opsdesk_db::repositories::{
    NewExpense, NewInvoice, SqlCostCenterRepository, SqlCustomerRepository, SqlExpenseRepository,
    SqlInvoiceRepository, SqlSupplierRepository,
};

use crate::web::{
    base_context, correlation_id, not_found, operation_context, optional, page_error,
    parse_money_field, read_multipart_file, redirect, render, render_field_errors,
    render_form_failure, require_date_field, require_text_field, store_upload, AppState,
    FormResult, NoticeQuery, PageResult,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/invoices", get(invoices_page).post(create_invoice))
        .route("/invoices/table", get(invoices_table))
        .route("/invoices/{id}", get(invoice_detail_page).post(update_invoice))
        .route("/invoices/{id}/payments", post(pay_invoice))
        .route("/invoices/{id}/cancel", post(cancel_invoice))
        .route("/invoices/{id}/renegotiate", post(renegotiate_invoice))
        .route("/invoices/{id}/attachments", post(attach_invoice_file))
        .route("/expenses", get(expenses_page).post(create_expense))
        .route("/expenses/table", get(expenses_table))
        .route("/expenses/{id}", get(expense_detail_page).post(update_expense))
        .route("/expenses/{id}/payments", post(pay_expense))
        .route("/expenses/{id}/cancel", post(cancel_expense))
        .route("/expenses/{id}/attachments", post(attach_expense_file))
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    pub status: Option<String>,
    pub notice: Option<String>,
}

// ---------------------------------------------------------------------------
// Invoices (receivable)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct InvoiceCreateForm {
    #[serde(default)]
    pub customer_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub issue_date: String,
    #[serde(default)]
    pub due_date: String,
    #[serde(default)]
    pub original_value: String,
    #[serde(default)]
    pub payment_method: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct DocumentUpdateForm {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub issue_date: String,
    #[serde(default)]
    pub due_date: String,
    #[serde(default)]
    pub discount_value: String,
    #[serde(default)]
    pub interest_value: String,
    #[serde(default)]
    pub penalty_value: String,
    #[serde(default)]
    pub surcharge_value: String,
    #[serde(default)]
    pub payment_method: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PaymentForm {
    #[serde(default)]
    pub amount: String,
}

fn invoice_rows(invoices: &[Invoice], customer_names: &HashMap<String, String>) -> Vec<serde_json::Value> {
    invoices
        .iter()
        .map(|invoice| {
            json!({
                "id": invoice.id,
                "number": invoice.number,
                "customer_name": customer_names
                    .get(&invoice.customer_id)
                    .map(String::as_str)
                    .unwrap_or("?"),
                "status": invoice.status.as_str(),
                "due_date": invoice.due_date,
                "total": invoice.amounts.total,
                "balance": invoice.amounts.balance,
            })
        })
        .collect()
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

async fn invoices_context(
    state: &AppState,
    status: Option<InvoiceStatus>,
    notice: &NoticeQuery,
    correlation: &str,
) -> Result<Context, (StatusCode, Html<String>)> {
    let repo = SqlInvoiceRepository::new(state.db_pool.clone());
    repo.refresh_overdue(Utc::now().date_naive())
        .await
        .map_err(|e| page_error(e, correlation))?;
    let invoices = repo.list(status).await.map_err(|e| page_error(e, correlation))?;
    let names = customer_names(state, correlation).await?;
    let customers = SqlCustomerRepository::new(state.db_pool.clone())
        .list()
        .await
        .map_err(|e| page_error(e, correlation))?;

    let mut context = base_context("invoices", notice);
    context.insert("rows", &invoice_rows(&invoices, &names));
    context.insert("customers", &customers);
    context.insert("status_filter", &status.map(|s| s.as_str()).unwrap_or(""));
    Ok(context)
}

async fn invoices_page(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let status = query.status.as_deref().and_then(InvoiceStatus::parse);
    let notice = NoticeQuery { notice: query.notice };
    let context = invoices_context(&state, status, &notice, &correlation).await?;
    render(&state, "invoices.html", &context)
}

async fn invoices_table(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let status = query.status.as_deref().and_then(InvoiceStatus::parse);
    let context = invoices_context(&state, status, &NoticeQuery::default(), &correlation).await?;
    render(&state, "invoices_table.html", &context)
}

async fn create_invoice(
    State(state): State<AppState>,
    Form(form): Form<InvoiceCreateForm>,
) -> FormResult {
    let correlation = correlation_id();
    let mut errors = Vec::new();
    let customer_id = require_text_field(&mut errors, "customer", &form.customer_id);
    let issue_date = require_date_field(&mut errors, "issue date", &form.issue_date);
    let due_date = require_date_field(&mut errors, "due date", &form.due_date);
    let original_value = parse_money_field(&mut errors, "value", &form.original_value);
    if !errors.is_empty() {
        let context =
            invoices_context(&state, None, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "invoices.html", context, errors);
    }

    let ctx = operation_context("web");
    let new = NewInvoice {
        customer_id,
        description: form.description.trim().to_owned(),
        issue_date,
        due_date,
        original_value,
        payment_method: form.payment_method.trim().to_owned(),
    };
    match SqlInvoiceRepository::new(state.db_pool.clone()).create(new, &ctx).await {
        Ok(invoice) => {
            Ok(redirect(&format!("/invoices/{}", invoice.id), "created").into_response())
        }
        Err(e) => {
            let context =
                invoices_context(&state, None, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "invoices.html", context, e, &correlation)
        }
    }
}

async fn invoice_detail_context(
    state: &AppState,
    id: &str,
    notice: &NoticeQuery,
    correlation: &str,
) -> Result<Context, (StatusCode, Html<String>)> {
    let invoice = SqlInvoiceRepository::new(state.db_pool.clone())
        .find_by_id(id)
        .await
        .map_err(|e| page_error(e, correlation))?
        .ok_or_else(|| not_found("Invoice"))?;
    let names = customer_names(state, correlation).await?;

    let frozen = invoice.status.is_frozen();
    let mut context = base_context("invoices", notice);
    context.insert(
        "customer_name",
        &names.get(&invoice.customer_id).map(String::as_str).unwrap_or("?"),
    );
    context.insert("can_edit", &!frozen);
    context.insert("can_pay", &(!frozen && !invoice.amounts.is_settled()));
    context.insert("invoice", &invoice);
    Ok(context)
}

async fn invoice_detail_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(notice): Query<NoticeQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let context = invoice_detail_context(&state, &id, &notice, &correlation).await?;
    render(&state, "invoice_detail.html", &context)
}

async fn update_invoice(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<DocumentUpdateForm>,
) -> FormResult {
    let correlation = correlation_id();
    let repo = SqlInvoiceRepository::new(state.db_pool.clone());
    let mut invoice = repo
        .find_by_id(&id)
        .await
        .map_err(|e| page_error(e, &correlation))?
        .ok_or_else(|| not_found("Invoice"))?;

    let mut errors = Vec::new();
    invoice.description = form.description.trim().to_owned();
    invoice.issue_date = require_date_field(&mut errors, "issue date", &form.issue_date);
    invoice.due_date = require_date_field(&mut errors, "due date", &form.due_date);
    invoice.amounts.discount = parse_money_field(&mut errors, "discount", &form.discount_value);
    invoice.amounts.interest = parse_money_field(&mut errors, "interest", &form.interest_value);
    invoice.amounts.penalty = parse_money_field(&mut errors, "penalty", &form.penalty_value);
    invoice.amounts.surcharge = parse_money_field(&mut errors, "surcharge", &form.surcharge_value);
    invoice.payment_method = form.payment_method.trim().to_owned();
    if !errors.is_empty() {
        let context =
            invoice_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "invoice_detail.html", context, errors);
    }

    match repo.save(invoice).await {
        Ok(_) => Ok(redirect(&format!("/invoices/{id}"), "updated").into_response()),
        Err(e) => {
            let context =
                invoice_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "invoice_detail.html", context, e, &correlation)
        }
    }
}

async fn pay_invoice(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<PaymentForm>,
) -> FormResult {
    let correlation = correlation_id();
    let mut errors = Vec::new();
    let amount = parse_money_field(&mut errors, "amount", &form.amount);
    if !errors.is_empty() {
        let context =
            invoice_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "invoice_detail.html", context, errors);
    }

    let ctx = operation_context("web");
    match SqlInvoiceRepository::new(state.db_pool.clone()).register_payment(&id, amount, &ctx).await
    {
        Ok(_) => Ok(redirect(&format!("/invoices/{id}"), "paid").into_response()),
        Err(e) => {
            let context =
                invoice_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "invoice_detail.html", context, e, &correlation)
        }
    }
}

async fn cancel_invoice(State(state): State<AppState>, Path(id): Path<String>) -> FormResult {
    let correlation = correlation_id();
    let ctx = operation_context("web");
    match SqlInvoiceRepository::new(state.db_pool.clone()).cancel(&id, &ctx).await {
        Ok(_) => Ok(redirect(&format!("/invoices/{id}"), "cancelled").into_response()),
        Err(e) => {
            let context =
                invoice_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "invoice_detail.html", context, e, &correlation)
        }
    }
}

async fn renegotiate_invoice(State(state): State<AppState>, Path(id): Path<String>) -> FormResult {
    let correlation = correlation_id();
    let ctx = operation_context("web");
    match SqlInvoiceRepository::new(state.db_pool.clone()).mark_renegotiated(&id, &ctx).await {
        Ok(_) => Ok(redirect(&format!("/invoices/{id}"), "renegotiated").into_response()),
        Err(e) => {
            let context =
                invoice_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "invoice_detail.html", context, e, &correlation)
        }
    }
}

async fn attach_invoice_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> FormResult {
    let correlation = correlation_id();
    match store_attachment(&state, multipart).await {
        Ok(stored) => {
            match SqlInvoiceRepository::new(state.db_pool.clone()).attach_file(&id, &stored).await {
                Ok(_) => Ok(redirect(&format!("/invoices/{id}"), "attached").into_response()),
                Err(e) => {
                    let context =
                        invoice_detail_context(&state, &id, &NoticeQuery::default(), &correlation)
                            .await?;
                    render_form_failure(&state, "invoice_detail.html", context, e, &correlation)
                }
            }
        }
        Err(message) => {
            let context =
                invoice_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_field_errors(&state, "invoice_detail.html", context, vec![message])
        }
    }
}

/// Receives the multipart "file" field, runs the extension whitelist, and
/// writes the bytes under the uploads directory. Returns the stored name.
async fn store_attachment(state: &AppState, mut multipart: Multipart) -> Result<String, String> {
    let Some((name, bytes)) = read_multipart_file(&mut multipart).await? else {
        return Err("choose a file to attach".to_owned());
    };
    store_upload(&state.config.uploads.dir, &name, &bytes).await
}

// ---------------------------------------------------------------------------
// Expenses (payable)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ExpenseCreateForm {
    #[serde(default)]
    pub document_number: String,
    #[serde(default)]
    pub supplier_id: String,
    #[serde(default)]
    pub cost_center_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub issue_date: String,
    #[serde(default)]
    pub due_date: String,
    #[serde(default)]
    pub original_value: String,
    #[serde(default)]
    pub payment_method: String,
}

fn expense_rows(
    expenses: &[Expense],
    supplier_names: &HashMap<String, String>,
) -> Vec<serde_json::Value> {
    expenses
        .iter()
        .map(|expense| {
            json!({
                "id": expense.id,
                "document_number": expense.document_number,
                "supplier_name": expense
                    .supplier_id
                    .as_ref()
                    .and_then(|id| supplier_names.get(id))
                    .map(String::as_str)
                    .unwrap_or("-"),
                "status": expense.status.as_str(),
                "due_date": expense.due_date,
                "total": expense.amounts.total,
                "balance": expense.amounts.balance,
            })
        })
        .collect()
}

async fn expenses_context(
    state: &AppState,
    status: Option<ExpenseStatus>,
    notice: &NoticeQuery,
    correlation: &str,
) -> Result<Context, (StatusCode, Html<String>)> {
    let repo = SqlExpenseRepository::new(state.db_pool.clone());
    repo.refresh_overdue(Utc::now().date_naive())
        .await
        .map_err(|e| page_error(e, correlation))?;
    let expenses = repo.list(status).await.map_err(|e| page_error(e, correlation))?;
    let suppliers = SqlSupplierRepository::new(state.db_pool.clone())
        .list(None)
        .await
        .map_err(|e| page_error(e, correlation))?;
    let centers = SqlCostCenterRepository::new(state.db_pool.clone())
        .list(false)
        .await
        .map_err(|e| page_error(e, correlation))?;

    let names: HashMap<String, String> =
        suppliers.iter().map(|s| (s.id.clone(), s.legal_name.clone())).collect();

    let mut context = base_context("expenses", notice);
    context.insert("rows", &expense_rows(&expenses, &names));
    context.insert("suppliers", &suppliers);
    context.insert("cost_centers", &centers);
    context.insert("status_filter", &status.map(|s| s.as_str()).unwrap_or(""));
    Ok(context)
}

async fn expenses_page(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let status = query.status.as_deref().and_then(ExpenseStatus::parse);
    let notice = NoticeQuery { notice: query.notice };
    let context = expenses_context(&state, status, &notice, &correlation).await?;
    render(&state, "expenses.html", &context)
}

async fn expenses_table(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let status = query.status.as_deref().and_then(ExpenseStatus::parse);
    let context = expenses_context(&state, status, &NoticeQuery::default(), &correlation).await?;
    render(&state, "expenses_table.html", &context)
}

async fn create_expense(
    State(state): State<AppState>,
    Form(form): Form<ExpenseCreateForm>,
) -> FormResult {
    let correlation = correlation_id();
    let mut errors = Vec::new();
    let issue_date = require_date_field(&mut errors, "issue date", &form.issue_date);
    let due_date = require_date_field(&mut errors, "due date", &form.due_date);
    let original_value = parse_money_field(&mut errors, "value", &form.original_value);
    if !errors.is_empty() {
        let context =
            expenses_context(&state, None, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "expenses.html", context, errors);
    }

    let ctx = operation_context("web");
    let new = NewExpense {
        document_number: form.document_number.trim().to_owned(),
        supplier_id: optional(form.supplier_id),
        cost_center_id: optional(form.cost_center_id),
        description: form.description.trim().to_owned(),
        issue_date,
        due_date,
        original_value,
        payment_method: form.payment_method.trim().to_owned(),
    };
    match SqlExpenseRepository::new(state.db_pool.clone()).create(new, &ctx).await {
        Ok(expense) => {
            Ok(redirect(&format!("/expenses/{}", expense.id), "created").into_response())
        }
        Err(e) => {
            let context =
                expenses_context(&state, None, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "expenses.html", context, e, &correlation)
        }
    }
}

async fn expense_detail_context(
    state: &AppState,
    id: &str,
    notice: &NoticeQuery,
    correlation: &str,
) -> Result<Context, (StatusCode, Html<String>)> {
    let expense = SqlExpenseRepository::new(state.db_pool.clone())
        .find_by_id(id)
        .await
        .map_err(|e| page_error(e, correlation))?
        .ok_or_else(|| not_found("Expense"))?;

    let supplier = match expense.supplier_id.as_deref() {
        Some(supplier_id) => SqlSupplierRepository::new(state.db_pool.clone())
            .find_by_id(supplier_id)
            .await
            .map_err(|e| page_error(e, correlation))?,
        None => None,
    };

    let cancelled = expense.status == ExpenseStatus::Cancelled;
    let mut context = base_context("expenses", notice);
    context.insert("supplier", &supplier);
    context.insert("can_edit", &!cancelled);
    context.insert("can_pay", &(!cancelled && !expense.amounts.is_settled()));
    context.insert("expense", &expense);
    Ok(context)
}

async fn expense_detail_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(notice): Query<NoticeQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let context = expense_detail_context(&state, &id, &notice, &correlation).await?;
    render(&state, "expense_detail.html", &context)
}

async fn update_expense(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<DocumentUpdateForm>,
) -> FormResult {
    let correlation = correlation_id();
    let repo = SqlExpenseRepository::new(state.db_pool.clone());
    let mut expense = repo
        .find_by_id(&id)
        .await
        .map_err(|e| page_error(e, &correlation))?
        .ok_or_else(|| not_found("Expense"))?;

    let mut errors = Vec::new();
    expense.description = form.description.trim().to_owned();
    expense.issue_date = require_date_field(&mut errors, "issue date", &form.issue_date);
    expense.due_date = require_date_field(&mut errors, "due date", &form.due_date);
    expense.amounts.discount = parse_money_field(&mut errors, "discount", &form.discount_value);
    expense.amounts.interest = parse_money_field(&mut errors, "interest", &form.interest_value);
    expense.amounts.penalty = parse_money_field(&mut errors, "penalty", &form.penalty_value);
    expense.amounts.surcharge = parse_money_field(&mut errors, "surcharge", &form.surcharge_value);
    expense.payment_method = form.payment_method.trim().to_owned();
    if !errors.is_empty() {
        let context =
            expense_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "expense_detail.html", context, errors);
    }

    match repo.save(expense).await {
        Ok(_) => Ok(redirect(&format!("/expenses/{id}"), "updated").into_response()),
        Err(e) => {
            let context =
                expense_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "expense_detail.html", context, e, &correlation)
        }
    }
}

async fn pay_expense(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<PaymentForm>,
) -> FormResult {
    let correlation = correlation_id();
    let mut errors = Vec::new();
    let amount = parse_money_field(&mut errors, "amount", &form.amount);
    if !errors.is_empty() {
        let context =
            expense_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "expense_detail.html", context, errors);
    }

    let ctx = operation_context("web");
    match SqlExpenseRepository::new(state.db_pool.clone()).register_payment(&id, amount, &ctx).await
    {
        Ok(_) => Ok(redirect(&format!("/expenses/{id}"), "paid").into_response()),
        Err(e) => {
            let context =
                expense_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "expense_detail.html", context, e, &correlation)
        }
    }
}

async fn cancel_expense(State(state): State<AppState>, Path(id): Path<String>) -> FormResult {
    let correlation = correlation_id();
    let ctx = operation_context("web");
    match SqlExpenseRepository::new(state.db_pool.clone()).cancel(&id, &ctx).await {
        Ok(_) => Ok(redirect(&format!("/expenses/{id}"), "cancelled").into_response()),
        Err(e) => {
            let context =
                expense_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "expense_detail.html", context, e, &correlation)
        }
    }
}

async fn attach_expense_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> FormResult {
    let correlation = correlation_id();
    match store_attachment(&state, multipart).await {
        Ok(stored) => {
            match SqlExpenseRepository::new(state.db_pool.clone()).attach_file(&id, &stored).await {
                Ok(_) => Ok(redirect(&format!("/expenses/{id}"), "attached").into_response()),
                Err(e) => {
                    let context =
                        expense_detail_context(&state, &id, &NoticeQuery::default(), &correlation)
                            .await?;
                    render_form_failure(&state, "expense_detail.html", context, e, &correlation)
                }
            }
        }
        Err(message) => {
            let context =
                expense_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_field_errors(&state, "expense_detail.html", context, vec![message])
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::extract::{Form, Path, Query, State};
    use axum::http::{header, StatusCode};
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use opsdesk_core::domain::crm::Customer;
    use opsdesk_core::numbering;
    use opsdesk_db::repositories::{
        OperationContext, SqlCustomerRepository, SqlExpenseRepository, SqlInvoiceRepository,
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

    async fn seed_customer(state: &crate::web::AppState) -> String {
        let now = Utc::now();
        SqlCustomerRepository::new(state.db_pool.clone())
            .save(Customer {
                id: numbering::entity_id("CUS"),
                legal_name: "Horizonte Telecom SA".to_owned(),
                trade_name: String::new(),
                tax_id: "21.222.333/0001-01".to_owned(),
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
    async fn invoice_payments_walk_partial_then_paid() {
        let state = testing::state().await;
        let customer_id = seed_customer(&state).await;
        let today = Utc::now().date_naive();

        let response = create_invoice(
            State(state.clone()),
            Form(InvoiceCreateForm {
                customer_id,
                description: "August services".to_owned(),
                issue_date: today.to_string(),
                due_date: (today + Duration::days(30)).to_string(),
                original_value: "1.000,00".to_owned(),
                payment_method: "pix".to_owned(),
            }),
        )
        .await
        .expect("create");
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let invoice_id =
            location_of(&response).trim_start_matches("/invoices/").split('?').next().unwrap().to_owned();

        let response = pay_invoice(
            State(state.clone()),
            Path(invoice_id.clone()),
            Form(PaymentForm { amount: "400,00".to_owned() }),
        )
        .await
        .expect("partial payment");
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let repo = SqlInvoiceRepository::new(state.db_pool.clone());
        let invoice = repo.find_by_id(&invoice_id).await.expect("find").expect("present");
        assert_eq!(invoice.status, opsdesk_core::domain::finance::InvoiceStatus::Partial);
        assert_eq!(invoice.amounts.balance, Decimal::new(60_000, 2));

        pay_invoice(
            State(state.clone()),
            Path(invoice_id.clone()),
            Form(PaymentForm { amount: "600,00".to_owned() }),
        )
        .await
        .expect("settling payment");

        let invoice = repo.find_by_id(&invoice_id).await.expect("find").expect("present");
        assert_eq!(invoice.status, opsdesk_core::domain::finance::InvoiceStatus::Paid);
        assert!(invoice.settlement_date.is_some());

        state.db_pool.close().await;
    }

    #[tokio::test]
    async fn listing_sweeps_open_invoices_past_due_into_overdue() {
        let state = testing::state().await;
        let customer_id = seed_customer(&state).await;
        let today = Utc::now().date_naive();

        let ctx = OperationContext::new("test", "corr");
        let invoice = SqlInvoiceRepository::new(state.db_pool.clone())
            .create(
                NewInvoice {
                    customer_id,
                    description: String::new(),
                    issue_date: today - Duration::days(40),
                    due_date: today - Duration::days(10),
                    original_value: Decimal::new(25_000, 2),
                    payment_method: String::new(),
                },
                &ctx,
            )
            .await
            .expect("invoice");

        invoices_page(State(state.clone()), Query(StatusQuery::default()))
            .await
            .expect("page");

        let refreshed = SqlInvoiceRepository::new(state.db_pool.clone())
            .find_by_id(&invoice.id)
            .await
            .expect("find")
            .expect("present");
        assert_eq!(refreshed.status, opsdesk_core::domain::finance::InvoiceStatus::Overdue);

        state.db_pool.close().await;
    }

    #[tokio::test]
    async fn a_cancelled_expense_refuses_payments() {
        let state = testing::state().await;
        let today = Utc::now().date_naive();

        let ctx = OperationContext::new("test", "corr");
        let repo = SqlExpenseRepository::new(state.db_pool.clone());
        let expense = repo
            .create(
                NewExpense {
                    document_number: "NF-881".to_owned(),
                    supplier_id: None,
                    cost_center_id: None,
                    description: "Toner".to_owned(),
                    issue_date: today,
                    due_date: today + Duration::days(15),
                    original_value: Decimal::new(30_000, 2),
                    payment_method: "boleto".to_owned(),
                },
                &ctx,
            )
            .await
            .expect("expense");
        repo.cancel(&expense.id, &ctx).await.expect("cancel");

        let response = pay_expense(
            State(state.clone()),
            Path(expense.id.clone()),
            Form(PaymentForm { amount: "300,00".to_owned() }),
        )
        .await
        .expect("refusal renders");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        state.db_pool.close().await;
    }
}
