//! Shared state, template registry, and request helpers for the web UI.
//!
//! Every page handler follows the same shape: build a context, render a
//! template, redirect on success. Mutations that fail a domain rule re-render
//! the submitting page with the rule's message; infrastructure failures map
//! through `InterfaceError` to a terse error page carrying a correlation id.

use std::collections::HashMap;
use std::path::Path as FsPath;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::Router;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tera::{Context, Tera};
use tower_http::services::ServeDir;
use tracing::{error, warn};
use uuid::Uuid;

use opsdesk_core::config::AppConfig;
use opsdesk_core::errors::{ApplicationError, DomainError, InterfaceError};
use opsdesk_core::money;
use opsdesk_db::repositories::{OperationContext, RepositoryError};
use opsdesk_db::DbPool;
use opsdesk_mail::Mailer;

#[derive(Clone)]
pub struct AppState {
    pub db_pool: DbPool,
    pub templates: Arc<Tera>,
    pub config: AppConfig,
    pub mailer: Arc<dyn Mailer>,
}

/// A rendered page, or a terse error page with its status.
pub type PageResult = Result<Html<String>, (StatusCode, Html<String>)>;

/// A redirect or a re-rendered form page, or a terse error page.
pub type FormResult = Result<Response, (StatusCode, Html<String>)>;

pub fn router(state: AppState) -> Router {
    let body_limit = (state.config.uploads.max_size_mb as usize) * 1024 * 1024;
    Router::new()
        .merge(crate::dashboard::router())
        .merge(crate::crm::router())
        .merge(crate::catalog::router())
        .merge(crate::purchasing::router())
        .merge(crate::inventory::router())
        .merge(crate::finance::router())
        .merge(crate::contracts::router())
        .merge(crate::operations::router())
        .merge(crate::marketing::router())
        .merge(crate::api::router())
        .nest_service("/static", ServeDir::new("static"))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// Initialize the Tera engine: templates from `templates/` on disk, with the
/// same files embedded at compile time as a fallback for out-of-tree runs.
pub fn init_templates() -> Arc<Tera> {
    let mut tera = match Tera::new("templates/**/*.html") {
        Ok(engine) => engine,
        Err(e) => {
            warn!(error = %e, "failed to load templates from filesystem, using embedded set");
            Tera::default()
        }
    };

    register_template_filters(&mut tera);

    if let Err(e) = tera.add_raw_templates(vec![
        ("layout.html", include_str!("../../../templates/layout.html")),
        ("dashboard.html", include_str!("../../../templates/dashboard.html")),
        ("customers.html", include_str!("../../../templates/customers.html")),
        ("customers_table.html", include_str!("../../../templates/customers_table.html")),
        ("customer_detail.html", include_str!("../../../templates/customer_detail.html")),
        ("opportunities.html", include_str!("../../../templates/opportunities.html")),
        ("opportunities_table.html", include_str!("../../../templates/opportunities_table.html")),
        ("opportunity_detail.html", include_str!("../../../templates/opportunity_detail.html")),
        ("proposal_detail.html", include_str!("../../../templates/proposal_detail.html")),
        ("goals.html", include_str!("../../../templates/goals.html")),
        ("products.html", include_str!("../../../templates/products.html")),
        ("products_table.html", include_str!("../../../templates/products_table.html")),
        ("product_detail.html", include_str!("../../../templates/product_detail.html")),
        ("product_import.html", include_str!("../../../templates/product_import.html")),
        ("services.html", include_str!("../../../templates/services.html")),
        ("services_table.html", include_str!("../../../templates/services_table.html")),
        ("service_detail.html", include_str!("../../../templates/service_detail.html")),
        ("suppliers.html", include_str!("../../../templates/suppliers.html")),
        ("suppliers_table.html", include_str!("../../../templates/suppliers_table.html")),
        ("supplier_detail.html", include_str!("../../../templates/supplier_detail.html")),
        ("cost_centers.html", include_str!("../../../templates/cost_centers.html")),
        ("requisitions.html", include_str!("../../../templates/requisitions.html")),
        ("requisitions_table.html", include_str!("../../../templates/requisitions_table.html")),
        ("requisition_detail.html", include_str!("../../../templates/requisition_detail.html")),
        ("orders.html", include_str!("../../../templates/orders.html")),
        ("orders_table.html", include_str!("../../../templates/orders_table.html")),
        ("order_detail.html", include_str!("../../../templates/order_detail.html")),
        ("stock.html", include_str!("../../../templates/stock.html")),
        ("stock_table.html", include_str!("../../../templates/stock_table.html")),
        ("stock_movements.html", include_str!("../../../templates/stock_movements.html")),
        ("invoices.html", include_str!("../../../templates/invoices.html")),
        ("invoices_table.html", include_str!("../../../templates/invoices_table.html")),
        ("invoice_detail.html", include_str!("../../../templates/invoice_detail.html")),
        ("expenses.html", include_str!("../../../templates/expenses.html")),
        ("expenses_table.html", include_str!("../../../templates/expenses_table.html")),
        ("expense_detail.html", include_str!("../../../templates/expense_detail.html")),
        ("contracts.html", include_str!("../../../templates/contracts.html")),
        ("contracts_table.html", include_str!("../../../templates/contracts_table.html")),
        ("contract_detail.html", include_str!("../../../templates/contract_detail.html")),
        ("renewals.html", include_str!("../../../templates/renewals.html")),
        ("assets.html", include_str!("../../../templates/assets.html")),
        ("assets_table.html", include_str!("../../../templates/assets_table.html")),
        ("asset_detail.html", include_str!("../../../templates/asset_detail.html")),
        ("service_orders.html", include_str!("../../../templates/service_orders.html")),
        ("service_orders_table.html", include_str!("../../../templates/service_orders_table.html")),
        ("service_order_detail.html", include_str!("../../../templates/service_order_detail.html")),
        ("tickets.html", include_str!("../../../templates/tickets.html")),
        ("tickets_table.html", include_str!("../../../templates/tickets_table.html")),
        ("ticket_detail.html", include_str!("../../../templates/ticket_detail.html")),
        ("marketing.html", include_str!("../../../templates/marketing.html")),
    ]) {
        warn!(error = %e, "embedded template registration failed");
    }

    Arc::new(tera)
}

/// `brl` renders a decimal string as `R$ 1.234,56`.
pub fn register_template_filters(tera: &mut Tera) {
    tera.register_filter(
        "brl",
        |value: &tera::Value, _: &HashMap<String, tera::Value>| -> tera::Result<tera::Value> {
            let text = match value {
                tera::Value::String(raw) => raw.clone(),
                tera::Value::Number(number) => number.to_string(),
                other => return Ok(other.clone()),
            };
            match text.parse::<Decimal>() {
                Ok(amount) => Ok(tera::Value::String(money::format_brl(amount))),
                Err(_) => Ok(tera::Value::String(text)),
            }
        },
    );
}

pub fn render(state: &AppState, template: &str, context: &Context) -> PageResult {
    state.templates.render(template, context).map(Html).map_err(|e| {
        error!(event_name = "web.render_failed", template = template, error = %e, "template rendering failed");
        (StatusCode::INTERNAL_SERVER_ERROR, Html("<h1>Template error</h1>".to_string()))
    })
}

// ---------------------------------------------------------------------------
// Notices and redirects
// ---------------------------------------------------------------------------

/// `?notice=` tokens appended to post-redirect URLs.
#[derive(Debug, Default, serde::Deserialize)]
pub struct NoticeQuery {
    pub notice: Option<String>,
}

fn notice_text(token: &str) -> Option<&'static str> {
    match token {
        "created" => Some("Record created."),
        "updated" => Some("Record updated."),
        "deleted" => Some("Record deleted."),
        "submitted" => Some("Submitted for approval."),
        "decided" => Some("Decision recorded."),
        "converted" => Some("Converted into a purchase order."),
        "sent" => Some("Marked as sent."),
        "cancelled" => Some("Record cancelled."),
        "received" => Some("Receipt posted."),
        "paid" => Some("Payment registered."),
        "renegotiated" => Some("Marked as renegotiated."),
        "attached" => Some("Attachment stored."),
        "status" => Some("Status updated."),
        "resolved" => Some("Resolution recorded."),
        "emitted" => Some("Monthly invoice emitted."),
        "notified" => Some("Renewal notices sent."),
        "moved" => Some("Stock movement recorded."),
        "adjusted" => Some("Stock adjusted."),
        "configured" => Some("Stock settings saved."),
        _ => None,
    }
}

/// Context pre-loaded with the active nav item and any flash notice.
pub fn base_context(active: &str, notice: &NoticeQuery) -> Context {
    let mut context = Context::new();
    context.insert("active", active);
    if let Some(text) = notice.notice.as_deref().and_then(notice_text) {
        context.insert("notice", text);
    }
    context
}

pub fn redirect(path: &str, token: &str) -> Redirect {
    Redirect::to(&format!("{path}?notice={token}"))
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

pub fn application_error(error: RepositoryError) -> ApplicationError {
    match error {
        RepositoryError::Domain(domain) => ApplicationError::Domain(domain),
        RepositoryError::Database(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            ApplicationError::Domain(DomainError::Validation(
                "a record with this identifier already exists".to_owned(),
            ))
        }
        RepositoryError::Database(db) => ApplicationError::Persistence(db.to_string()),
        RepositoryError::Decode(message) => ApplicationError::Persistence(message),
    }
}

pub fn status_for(error: &InterfaceError) -> StatusCode {
    match error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Terse error page for failures that are not a form-rule violation.
pub fn page_error(error: RepositoryError, correlation_id: &str) -> (StatusCode, Html<String>) {
    interface_page(application_error(error), correlation_id)
}

pub fn interface_page(
    error: ApplicationError,
    correlation_id: &str,
) -> (StatusCode, Html<String>) {
    let interface = error.into_interface(correlation_id);
    error!(
        event_name = "web.request_failed",
        correlation_id = correlation_id,
        error = %interface,
        "request failed"
    );
    (
        status_for(&interface),
        Html(format!(
            "<h1>{}</h1><p>Correlation id: {correlation_id}</p>",
            interface.user_message()
        )),
    )
}

pub fn not_found(entity: &str) -> (StatusCode, Html<String>) {
    (StatusCode::NOT_FOUND, Html(format!("<h1>{entity} not found</h1>")))
}

/// Splits a repository failure into "show on the submitting page" (domain
/// rule) and "give up with an error page" (everything else).
pub enum FormFailure {
    Domain { status: StatusCode, message: String },
    Page((StatusCode, Html<String>)),
}

pub fn split_form_error(error: RepositoryError, correlation_id: &str) -> FormFailure {
    match application_error(error) {
        ApplicationError::Domain(domain) => {
            let status = match domain {
                DomainError::DuplicateDecision { .. } | DomainError::DeleteBlocked { .. } => {
                    StatusCode::CONFLICT
                }
                _ => StatusCode::BAD_REQUEST,
            };
            FormFailure::Domain { status, message: domain.to_string() }
        }
        other => FormFailure::Page(interface_page(other, correlation_id)),
    }
}

/// Re-render `template` with the failure message, or bubble the error page.
pub fn render_form_failure(
    state: &AppState,
    template: &str,
    mut context: Context,
    error: RepositoryError,
    correlation_id: &str,
) -> FormResult {
    match split_form_error(error, correlation_id) {
        FormFailure::Domain { status, message } => {
            context.insert("error", &message);
            let page = render(state, template, &context)?;
            Ok((status, page).into_response())
        }
        FormFailure::Page(response) => Err(response),
    }
}

/// Re-render `template` with field-level validation messages.
pub fn render_field_errors(
    state: &AppState,
    template: &str,
    mut context: Context,
    errors: Vec<String>,
) -> FormResult {
    context.insert("field_errors", &errors);
    let page = render(state, template, &context)?;
    Ok((StatusCode::BAD_REQUEST, page).into_response())
}

// ---------------------------------------------------------------------------
// Form field parsing
// ---------------------------------------------------------------------------

/// Empty input parses to zero; garbage records a field error.
pub fn parse_money_field(errors: &mut Vec<String>, field: &str, raw: &str) -> Decimal {
    if raw.trim().is_empty() {
        return Decimal::ZERO;
    }
    match money::parse_flexible(raw) {
        Ok(value) => value,
        Err(_) => {
            errors.push(format!("{field} must be an amount such as 1.234,56 or 1234.56"));
            Decimal::ZERO
        }
    }
}

pub fn parse_date_field(errors: &mut Vec<String>, field: &str, raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(_) => {
            errors.push(format!("{field} must be a date in YYYY-MM-DD form"));
            None
        }
    }
}

pub fn require_date_field(errors: &mut Vec<String>, field: &str, raw: &str) -> NaiveDate {
    match parse_date_field(errors, field, raw) {
        Some(date) => date,
        None => {
            if raw.trim().is_empty() {
                errors.push(format!("{field} is required"));
            }
            chrono::Utc::now().date_naive()
        }
    }
}

pub fn require_text_field(errors: &mut Vec<String>, field: &str, raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        errors.push(format!("{field} is required"));
    }
    trimmed.to_owned()
}

/// Trims; empty becomes `None`.
pub fn optional(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

pub fn checkbox(raw: &Option<String>) -> bool {
    raw.is_some()
}

// ---------------------------------------------------------------------------
// Actor / correlation plumbing
// ---------------------------------------------------------------------------

pub fn correlation_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Mutating repository calls carry the submitting actor; blank falls back to
/// the shared web identity.
pub fn operation_context(actor: &str) -> OperationContext {
    let actor = actor.trim();
    OperationContext::new(if actor.is_empty() { "web" } else { actor }, correlation_id())
}

// ---------------------------------------------------------------------------
// Uploads
// ---------------------------------------------------------------------------

pub const ALLOWED_UPLOAD_EXTENSIONS: [&str; 4] = ["pdf", "xml", "csv", "xlsx"];

pub fn validate_upload_name(original: &str) -> Result<String, String> {
    let name = FsPath::new(original)
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("")
        .trim()
        .to_owned();
    if name.is_empty() {
        return Err("the upload is missing a file name".to_owned());
    }
    let extension = FsPath::new(&name)
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    if !ALLOWED_UPLOAD_EXTENSIONS.contains(&extension.as_str()) {
        return Err(format!(
            "files of type `.{extension}` are not accepted (pdf, xml, csv, xlsx)"
        ));
    }
    Ok(name)
}

/// Store an upload under the configured directory; the returned name is the
/// stored filename recorded on the owning record.
pub async fn store_upload(dir: &FsPath, original: &str, bytes: &[u8]) -> Result<String, String> {
    let name = validate_upload_name(original)?;
    let stored = format!("{}-{name}", Uuid::new_v4().simple());
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| format!("could not create the uploads directory: {e}"))?;
    tokio::fs::write(dir.join(&stored), bytes)
        .await
        .map_err(|e| format!("could not store the file: {e}"))?;
    Ok(stored)
}

/// Pull the first `file` part out of a multipart body.
pub async fn read_multipart_file(
    multipart: &mut Multipart,
) -> Result<Option<(String, Vec<u8>)>, String> {
    while let Some(field) =
        multipart.next_field().await.map_err(|e| format!("could not read the upload: {e}"))?
    {
        if field.name() == Some("file") {
            let file_name = field.file_name().unwrap_or("").to_owned();
            let bytes =
                field.bytes().await.map_err(|e| format!("could not read the upload: {e}"))?;
            return Ok(Some((file_name, bytes.to_vec())));
        }
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use opsdesk_core::config::AppConfig;
    use opsdesk_db::{connect_with_settings, migrations};
    use opsdesk_mail::MockMailer;
    use uuid::Uuid;

    use super::{init_templates, AppState};

    /// Fresh in-memory state with migrations applied and a mock mailer.
    pub(crate) async fn state() -> AppState {
        let db_pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&db_pool).await.expect("migrations");

        let mut config = AppConfig::default();
        config.database.url = "sqlite::memory:".to_owned();
        config.database.max_connections = 1;
        config.uploads.dir =
            std::env::temp_dir().join(format!("opsdesk-test-{}", Uuid::new_v4().simple()));

        AppState {
            db_pool,
            templates: init_templates(),
            config,
            mailer: Arc::new(MockMailer::new()),
        }
    }

    pub(crate) fn body_of(page: &axum::response::Html<String>) -> &str {
        &page.0
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_money_field, validate_upload_name};
    use rust_decimal::Decimal;

    #[test]
    fn money_fields_accept_brazilian_and_plain_formats() {
        let mut errors = Vec::new();
        assert_eq!(parse_money_field(&mut errors, "amount", "R$ 1.234,56"), Decimal::new(123456, 2));
        assert_eq!(parse_money_field(&mut errors, "amount", "1234.56"), Decimal::new(123456, 2));
        assert_eq!(parse_money_field(&mut errors, "amount", ""), Decimal::ZERO);
        assert!(errors.is_empty());

        parse_money_field(&mut errors, "amount", "abc");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("amount"));
    }

    #[test]
    fn upload_names_are_whitelisted_by_extension() {
        assert_eq!(validate_upload_name("nota.pdf").expect("pdf"), "nota.pdf");
        assert_eq!(validate_upload_name("/tmp/evil/../nota.XML").expect("xml"), "nota.XML");
        assert!(validate_upload_name("script.sh").is_err());
        assert!(validate_upload_name("").is_err());
        assert!(validate_upload_name("no_extension").is_err());
    }
}
