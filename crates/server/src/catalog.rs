//! Catalog pages: products, services, and suppliers.
//!
//! Products get their SKU at creation and can be bulk-loaded from a CSV
//! upload on `/products/import`. Supplier detail pages double as the price
//! book editor for that supplier.

use std::collections::HashMap;

use axum::extract::{Form, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tera::Context;

use opsdesk_core::domain::catalog::{
    PricingMethod, Product, ProductKind, Service, ServiceBilling, ServiceCategory, Supplier,
    SupplierContact, SupplierKind, SupplierPrice,
};
use opsdesk_core::imports::parse_product_rows;
use opsdesk_core::numbering;
use opsdesk_db::repositories::{
    NewProduct, NewService, SqlProductRepository, SqlServiceRepository, SqlSupplierRepository,
};

use crate::web::{
    base_context, checkbox, correlation_id, not_found, operation_context, optional, page_error,
    parse_date_field, parse_money_field, read_multipart_file, redirect, render,
    render_field_errors, render_form_failure, require_text_field, AppState, FormResult,
    NoticeQuery, PageResult,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/products", get(products_page).post(create_product))
        .route("/products/table", get(products_table))
        .route("/products/import", get(import_page).post(import_products))
        .route("/products/{id}", get(product_detail_page).post(update_product))
        .route("/products/{id}/delete", post(delete_product))
        .route("/services", get(services_page).post(create_service))
        .route("/services/table", get(services_table))
        .route("/services/categories", post(upsert_service_category))
        .route("/services/{id}", get(service_detail_page).post(update_service))
        .route("/services/{id}/delete", post(delete_service))
        .route("/suppliers", get(suppliers_page).post(create_supplier))
        .route("/suppliers/table", get(suppliers_table))
        .route("/suppliers/{id}", get(supplier_detail_page).post(update_supplier))
        .route("/suppliers/{id}/delete", post(delete_supplier))
        .route("/suppliers/{id}/contacts", post(create_supplier_contact))
        .route("/suppliers/{id}/contacts/{contact_id}/delete", post(delete_supplier_contact))
        .route("/suppliers/{id}/prices", post(upsert_supplier_price))
}

#[derive(Debug, Default, Deserialize)]
pub struct CatalogListQuery {
    pub include_inactive: Option<String>,
    pub notice: Option<String>,
}

fn wants_inactive(raw: &Option<String>) -> bool {
    raw.as_deref().is_some_and(|value| !value.is_empty() && value != "0")
}

// ---------------------------------------------------------------------------
// Products
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ProductCreateForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category_name: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub pricing_method: String,
    #[serde(default)]
    pub standard_cost: String,
    #[serde(default)]
    pub markup_pct: String,
    #[serde(default)]
    pub list_price: String,
    #[serde(default)]
    pub unit: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProductUpdateForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category_id: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub pricing_method: String,
    #[serde(default)]
    pub standard_cost: String,
    #[serde(default)]
    pub markup_pct: String,
    #[serde(default)]
    pub list_price: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub active: Option<String>,
}

async fn products_context(
    state: &AppState,
    include_inactive: bool,
    notice: &NoticeQuery,
    correlation: &str,
) -> Result<Context, (StatusCode, Html<String>)> {
    let repo = SqlProductRepository::new(state.db_pool.clone());
    let products =
        repo.list(include_inactive).await.map_err(|e| page_error(e, correlation))?;
    let categories = repo.list_categories().await.map_err(|e| page_error(e, correlation))?;

    let mut context = base_context("products", notice);
    context.insert("products", &products);
    context.insert("categories", &categories);
    context.insert("include_inactive", &include_inactive);
    Ok(context)
}

async fn products_page(
    State(state): State<AppState>,
    Query(query): Query<CatalogListQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let notice = NoticeQuery { notice: query.notice };
    let context =
        products_context(&state, wants_inactive(&query.include_inactive), &notice, &correlation)
            .await?;
    render(&state, "products.html", &context)
}

async fn products_table(
    State(state): State<AppState>,
    Query(query): Query<CatalogListQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let context = products_context(
        &state,
        wants_inactive(&query.include_inactive),
        &NoticeQuery::default(),
        &correlation,
    )
    .await?;
    render(&state, "products_table.html", &context)
}

fn parse_kind(errors: &mut Vec<String>, raw: &str) -> ProductKind {
    match ProductKind::parse(raw.trim()) {
        Some(kind) => kind,
        None => {
            errors.push("kind must be good, service, or software".to_owned());
            ProductKind::Good
        }
    }
}

fn parse_pricing(errors: &mut Vec<String>, raw: &str) -> PricingMethod {
    match PricingMethod::parse(raw.trim()) {
        Some(method) => method,
        None => {
            errors.push("pricing method must be markup or fixed".to_owned());
            PricingMethod::Markup
        }
    }
}

async fn create_product(
    State(state): State<AppState>,
    Form(form): Form<ProductCreateForm>,
) -> FormResult {
    let correlation = correlation_id();
    let mut errors = Vec::new();
    let name = require_text_field(&mut errors, "name", &form.name);
    let kind = parse_kind(&mut errors, &form.kind);
    let pricing_method = parse_pricing(&mut errors, &form.pricing_method);
    let standard_cost = parse_money_field(&mut errors, "standard cost", &form.standard_cost);
    let markup_pct = parse_money_field(&mut errors, "markup", &form.markup_pct);
    let list_price = parse_money_field(&mut errors, "list price", &form.list_price);
    if !errors.is_empty() {
        let context =
            products_context(&state, false, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "products.html", context, errors);
    }

    let new = NewProduct {
        name,
        category_name: optional(form.category_name),
        kind,
        pricing_method,
        standard_cost,
        markup_pct,
        list_price,
        unit: if form.unit.trim().is_empty() { "un".to_owned() } else { form.unit.trim().to_owned() },
    };
    match SqlProductRepository::new(state.db_pool.clone()).create(new).await {
        Ok(product) => {
            Ok(redirect(&format!("/products/{}", product.id), "created").into_response())
        }
        Err(e) => {
            let context =
                products_context(&state, false, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "products.html", context, e, &correlation)
        }
    }
}

async fn product_detail_context(
    state: &AppState,
    id: &str,
    notice: &NoticeQuery,
    correlation: &str,
) -> Result<Context, (StatusCode, Html<String>)> {
    let repo = SqlProductRepository::new(state.db_pool.clone());
    let product = repo
        .find_by_id(id)
        .await
        .map_err(|e| page_error(e, correlation))?
        .ok_or_else(|| not_found("Product"))?;
    let categories = repo.list_categories().await.map_err(|e| page_error(e, correlation))?;
    let supplier_repo = SqlSupplierRepository::new(state.db_pool.clone());
    let prices =
        supplier_repo.prices_for_product(id).await.map_err(|e| page_error(e, correlation))?;
    let suppliers = supplier_repo.list(None).await.map_err(|e| page_error(e, correlation))?;

    let supplier_names: HashMap<&str, &str> =
        suppliers.iter().map(|s| (s.id.as_str(), s.legal_name.as_str())).collect();
    let price_rows: Vec<serde_json::Value> = prices
        .iter()
        .map(|price| {
            json!({
                "supplier_name": supplier_names.get(price.supplier_id.as_str()).unwrap_or(&"?"),
                "supplier_id": price.supplier_id,
                "unit_cost": price.unit_cost,
                "currency": price.currency,
                "valid_until": price.valid_until,
            })
        })
        .collect();

    let mut context = base_context("products", notice);
    context.insert("sale_price", &product.sale_price());
    context.insert("product", &product);
    context.insert("categories", &categories);
    context.insert("price_rows", &price_rows);
    Ok(context)
}

async fn product_detail_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(notice): Query<NoticeQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let context = product_detail_context(&state, &id, &notice, &correlation).await?;
    render(&state, "product_detail.html", &context)
}

async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<ProductUpdateForm>,
) -> FormResult {
    let correlation = correlation_id();
    let repo = SqlProductRepository::new(state.db_pool.clone());
    let mut product = repo
        .find_by_id(&id)
        .await
        .map_err(|e| page_error(e, &correlation))?
        .ok_or_else(|| not_found("Product"))?;

    let mut errors = Vec::new();
    product.name = require_text_field(&mut errors, "name", &form.name);
    product.category_id = optional(form.category_id);
    product.kind = parse_kind(&mut errors, &form.kind);
    product.pricing_method = parse_pricing(&mut errors, &form.pricing_method);
    product.standard_cost = parse_money_field(&mut errors, "standard cost", &form.standard_cost);
    product.markup_pct = parse_money_field(&mut errors, "markup", &form.markup_pct);
    product.list_price = parse_money_field(&mut errors, "list price", &form.list_price);
    if !form.unit.trim().is_empty() {
        product.unit = form.unit.trim().to_owned();
    }
    product.active = checkbox(&form.active);
    if !errors.is_empty() {
        let context =
            product_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "product_detail.html", context, errors);
    }

    match repo.save(product).await {
        Ok(_) => Ok(redirect(&format!("/products/{id}"), "updated").into_response()),
        Err(e) => {
            let context =
                product_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "product_detail.html", context, e, &correlation)
        }
    }
}

async fn delete_product(State(state): State<AppState>, Path(id): Path<String>) -> FormResult {
    let correlation = correlation_id();
    let ctx = operation_context("web");
    match SqlProductRepository::new(state.db_pool.clone()).delete(&id, &ctx).await {
        Ok(()) => Ok(redirect("/products", "deleted").into_response()),
        Err(e) => {
            let context =
                product_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "product_detail.html", context, e, &correlation)
        }
    }
}

async fn import_page(
    State(state): State<AppState>,
    Query(notice): Query<NoticeQuery>,
) -> PageResult {
    let context = base_context("products", &notice);
    render(&state, "product_import.html", &context)
}

/// The CSV lands as a multipart "file" field. Parsing problems surface as
/// field errors on the upload page; applied rows come back as a report.
async fn import_products(State(state): State<AppState>, mut multipart: Multipart) -> FormResult {
    let correlation = correlation_id();
    let context = base_context("products", &NoticeQuery::default());

    let upload = match read_multipart_file(&mut multipart).await {
        Ok(Some(upload)) => upload,
        Ok(None) => {
            return render_field_errors(
                &state,
                "product_import.html",
                context,
                vec!["choose a csv file to import".to_owned()],
            );
        }
        Err(message) => {
            return render_field_errors(&state, "product_import.html", context, vec![message]);
        }
    };

    let (name, bytes) = upload;
    if !name.to_ascii_lowercase().ends_with(".csv") {
        return render_field_errors(
            &state,
            "product_import.html",
            context,
            vec!["the import expects a .csv file".to_owned()],
        );
    }

    let parsed = match parse_product_rows(bytes.as_slice()) {
        Ok(parsed) => parsed,
        Err(e) => {
            return render_field_errors(&state, "product_import.html", context, vec![e.to_string()]);
        }
    };

    let ctx = operation_context("web");
    match SqlProductRepository::new(state.db_pool.clone()).import(parsed, &ctx).await {
        Ok(report) => {
            let mut context = base_context("products", &NoticeQuery::default());
            context.insert("report", &report);
            context.insert("report_summary", &report.summary());
            let page = render(&state, "product_import.html", &context)?;
            Ok(page.into_response())
        }
        Err(e) => {
            let context = base_context("products", &NoticeQuery::default());
            render_form_failure(&state, "product_import.html", context, e, &correlation)
        }
    }
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ServiceForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category_id: String,
    #[serde(default)]
    pub billing: String,
    #[serde(default)]
    pub standard_cost: String,
    #[serde(default)]
    pub list_price: String,
    #[serde(default)]
    pub active: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServiceCategoryForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub iss_rate_pct: String,
}

async fn services_context(
    state: &AppState,
    include_inactive: bool,
    notice: &NoticeQuery,
    correlation: &str,
) -> Result<Context, (StatusCode, Html<String>)> {
    let repo = SqlServiceRepository::new(state.db_pool.clone());
    let services =
        repo.list(include_inactive).await.map_err(|e| page_error(e, correlation))?;
    let categories = repo.list_categories().await.map_err(|e| page_error(e, correlation))?;

    let mut context = base_context("services", notice);
    context.insert("services", &services);
    context.insert("categories", &categories);
    context.insert("include_inactive", &include_inactive);
    Ok(context)
}

async fn services_page(
    State(state): State<AppState>,
    Query(query): Query<CatalogListQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let notice = NoticeQuery { notice: query.notice };
    let context =
        services_context(&state, wants_inactive(&query.include_inactive), &notice, &correlation)
            .await?;
    render(&state, "services.html", &context)
}

async fn services_table(
    State(state): State<AppState>,
    Query(query): Query<CatalogListQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let context = services_context(
        &state,
        wants_inactive(&query.include_inactive),
        &NoticeQuery::default(),
        &correlation,
    )
    .await?;
    render(&state, "services_table.html", &context)
}

fn parse_billing(errors: &mut Vec<String>, raw: &str) -> ServiceBilling {
    match ServiceBilling::parse(raw.trim()) {
        Some(billing) => billing,
        None => {
            errors.push("billing must be one_off or recurring".to_owned());
            ServiceBilling::OneOff
        }
    }
}

async fn create_service(
    State(state): State<AppState>,
    Form(form): Form<ServiceForm>,
) -> FormResult {
    let correlation = correlation_id();
    let mut errors = Vec::new();
    let name = require_text_field(&mut errors, "name", &form.name);
    let billing = parse_billing(&mut errors, &form.billing);
    let standard_cost = parse_money_field(&mut errors, "standard cost", &form.standard_cost);
    let list_price = parse_money_field(&mut errors, "list price", &form.list_price);
    if !errors.is_empty() {
        let context =
            services_context(&state, false, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "services.html", context, errors);
    }

    let new = NewService {
        name,
        category_id: optional(form.category_id),
        billing,
        standard_cost,
        list_price,
    };
    match SqlServiceRepository::new(state.db_pool.clone()).create(new).await {
        Ok(service) => {
            Ok(redirect(&format!("/services/{}", service.id), "created").into_response())
        }
        Err(e) => {
            let context =
                services_context(&state, false, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "services.html", context, e, &correlation)
        }
    }
}

async fn service_detail_context(
    state: &AppState,
    id: &str,
    notice: &NoticeQuery,
    correlation: &str,
) -> Result<Context, (StatusCode, Html<String>)> {
    let repo = SqlServiceRepository::new(state.db_pool.clone());
    let service = repo
        .find_by_id(id)
        .await
        .map_err(|e| page_error(e, correlation))?
        .ok_or_else(|| not_found("Service"))?;
    let categories = repo.list_categories().await.map_err(|e| page_error(e, correlation))?;

    let mut context = base_context("services", notice);
    context.insert("service", &service);
    context.insert("categories", &categories);
    Ok(context)
}

async fn service_detail_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(notice): Query<NoticeQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let context = service_detail_context(&state, &id, &notice, &correlation).await?;
    render(&state, "service_detail.html", &context)
}

async fn update_service(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<ServiceForm>,
) -> FormResult {
    let correlation = correlation_id();
    let repo = SqlServiceRepository::new(state.db_pool.clone());
    let mut service = repo
        .find_by_id(&id)
        .await
        .map_err(|e| page_error(e, &correlation))?
        .ok_or_else(|| not_found("Service"))?;

    let mut errors = Vec::new();
    service.name = require_text_field(&mut errors, "name", &form.name);
    service.category_id = optional(form.category_id);
    service.billing = parse_billing(&mut errors, &form.billing);
    service.standard_cost = parse_money_field(&mut errors, "standard cost", &form.standard_cost);
    service.list_price = parse_money_field(&mut errors, "list price", &form.list_price);
    service.active = checkbox(&form.active);
    if !errors.is_empty() {
        let context =
            service_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "service_detail.html", context, errors);
    }

    match repo.save(service).await {
        Ok(_) => Ok(redirect(&format!("/services/{id}"), "updated").into_response()),
        Err(e) => {
            let context =
                service_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "service_detail.html", context, e, &correlation)
        }
    }
}

async fn delete_service(State(state): State<AppState>, Path(id): Path<String>) -> FormResult {
    let correlation = correlation_id();
    let ctx = operation_context("web");
    match SqlServiceRepository::new(state.db_pool.clone()).delete(&id, &ctx).await {
        Ok(()) => Ok(redirect("/services", "deleted").into_response()),
        Err(e) => {
            let context =
                service_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "service_detail.html", context, e, &correlation)
        }
    }
}

async fn upsert_service_category(
    State(state): State<AppState>,
    Form(form): Form<ServiceCategoryForm>,
) -> FormResult {
    let correlation = correlation_id();
    let mut errors = Vec::new();
    let name = require_text_field(&mut errors, "category name", &form.name);
    let iss_rate_pct = parse_money_field(&mut errors, "ISS rate", &form.iss_rate_pct);
    if !errors.is_empty() {
        let context =
            services_context(&state, false, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "services.html", context, errors);
    }

    let category =
        ServiceCategory { id: numbering::entity_id("SCT"), name, iss_rate_pct };
    match SqlServiceRepository::new(state.db_pool.clone()).upsert_category(category).await {
        Ok(_) => Ok(redirect("/services", "updated").into_response()),
        Err(e) => {
            let context =
                services_context(&state, false, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "services.html", context, e, &correlation)
        }
    }
}

// ---------------------------------------------------------------------------
// Suppliers
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct SupplierListQuery {
    pub kind: Option<String>,
    pub notice: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SupplierForm {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub legal_name: String,
    #[serde(default)]
    pub trade_name: String,
    #[serde(default)]
    pub tax_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub rating: String,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SupplierContactForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SupplierPriceForm {
    #[serde(default)]
    pub product_id: String,
    #[serde(default)]
    pub unit_cost: String,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub valid_until: String,
}

async fn suppliers_context(
    state: &AppState,
    kind: Option<SupplierKind>,
    notice: &NoticeQuery,
    correlation: &str,
) -> Result<Context, (StatusCode, Html<String>)> {
    let suppliers = SqlSupplierRepository::new(state.db_pool.clone())
        .list(kind)
        .await
        .map_err(|e| page_error(e, correlation))?;

    let mut context = base_context("suppliers", notice);
    context.insert("suppliers", &suppliers);
    context.insert("kind_filter", &kind.map(|k| k.as_str()).unwrap_or(""));
    Ok(context)
}

async fn suppliers_page(
    State(state): State<AppState>,
    Query(query): Query<SupplierListQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let notice = NoticeQuery { notice: query.notice };
    let kind = query.kind.as_deref().and_then(SupplierKind::parse);
    let context = suppliers_context(&state, kind, &notice, &correlation).await?;
    render(&state, "suppliers.html", &context)
}

async fn suppliers_table(
    State(state): State<AppState>,
    Query(query): Query<SupplierListQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let kind = query.kind.as_deref().and_then(SupplierKind::parse);
    let context = suppliers_context(&state, kind, &NoticeQuery::default(), &correlation).await?;
    render(&state, "suppliers_table.html", &context)
}

fn supplier_from_form(mut supplier: Supplier, form: &SupplierForm) -> (Supplier, Vec<String>) {
    let mut errors = Vec::new();
    supplier.kind = match SupplierKind::parse(form.kind.trim()) {
        Some(kind) => kind,
        None => {
            errors.push("kind must be supplier or distributor".to_owned());
            SupplierKind::Supplier
        }
    };
    supplier.legal_name = require_text_field(&mut errors, "legal name", &form.legal_name);
    supplier.trade_name = form.trade_name.trim().to_owned();
    supplier.tax_id = require_text_field(&mut errors, "tax id", &form.tax_id);
    supplier.email = form.email.trim().to_owned();
    supplier.phone = form.phone.trim().to_owned();
    supplier.city = form.city.trim().to_owned();
    supplier.state = form.state.trim().to_owned();
    supplier.rating = match form.rating.trim() {
        "" => None,
        raw => match raw.parse::<u8>() {
            Ok(value) => Some(value),
            Err(_) => {
                errors.push("rating must be a number from 1 to 5".to_owned());
                None
            }
        },
    };
    supplier.notes = form.notes.trim().to_owned();
    (supplier, errors)
}

async fn create_supplier(
    State(state): State<AppState>,
    Form(form): Form<SupplierForm>,
) -> FormResult {
    let correlation = correlation_id();
    let now = chrono::Utc::now();
    let blank = Supplier {
        id: numbering::entity_id("SUP"),
        kind: SupplierKind::Supplier,
        legal_name: String::new(),
        trade_name: String::new(),
        tax_id: String::new(),
        email: String::new(),
        phone: String::new(),
        city: String::new(),
        state: String::new(),
        rating: None,
        notes: String::new(),
        created_at: now,
        updated_at: now,
    };
    let (supplier, errors) = supplier_from_form(blank, &form);
    if !errors.is_empty() {
        let context =
            suppliers_context(&state, None, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "suppliers.html", context, errors);
    }

    match SqlSupplierRepository::new(state.db_pool.clone()).save(supplier).await {
        Ok(saved) => Ok(redirect(&format!("/suppliers/{}", saved.id), "created").into_response()),
        Err(e) => {
            let context =
                suppliers_context(&state, None, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "suppliers.html", context, e, &correlation)
        }
    }
}

async fn supplier_detail_context(
    state: &AppState,
    id: &str,
    notice: &NoticeQuery,
    correlation: &str,
) -> Result<Context, (StatusCode, Html<String>)> {
    let repo = SqlSupplierRepository::new(state.db_pool.clone());
    let supplier = repo
        .find_by_id(id)
        .await
        .map_err(|e| page_error(e, correlation))?
        .ok_or_else(|| not_found("Supplier"))?;
    let contacts = repo.list_contacts(id).await.map_err(|e| page_error(e, correlation))?;
    let prices = repo.prices_for_supplier(id).await.map_err(|e| page_error(e, correlation))?;
    let products = SqlProductRepository::new(state.db_pool.clone())
        .list(false)
        .await
        .map_err(|e| page_error(e, correlation))?;

    let product_names: HashMap<&str, (&str, &str)> =
        products.iter().map(|p| (p.id.as_str(), (p.sku.as_str(), p.name.as_str()))).collect();
    let price_rows: Vec<serde_json::Value> = prices
        .iter()
        .map(|price| {
            let (sku, name) =
                product_names.get(price.product_id.as_str()).copied().unwrap_or(("?", "?"));
            json!({
                "id": price.id,
                "product_id": price.product_id,
                "product_sku": sku,
                "product_name": name,
                "unit_cost": price.unit_cost,
                "currency": price.currency,
                "valid_until": price.valid_until,
            })
        })
        .collect();

    let mut context = base_context("suppliers", notice);
    context.insert("supplier", &supplier);
    context.insert("contacts", &contacts);
    context.insert("price_rows", &price_rows);
    context.insert("products", &products);
    Ok(context)
}

async fn supplier_detail_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(notice): Query<NoticeQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let context = supplier_detail_context(&state, &id, &notice, &correlation).await?;
    render(&state, "supplier_detail.html", &context)
}

async fn update_supplier(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<SupplierForm>,
) -> FormResult {
    let correlation = correlation_id();
    let repo = SqlSupplierRepository::new(state.db_pool.clone());
    let existing = repo
        .find_by_id(&id)
        .await
        .map_err(|e| page_error(e, &correlation))?
        .ok_or_else(|| not_found("Supplier"))?;

    let (supplier, errors) = supplier_from_form(existing, &form);
    if !errors.is_empty() {
        let context =
            supplier_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "supplier_detail.html", context, errors);
    }

    match repo.save(supplier).await {
        Ok(_) => Ok(redirect(&format!("/suppliers/{id}"), "updated").into_response()),
        Err(e) => {
            let context =
                supplier_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "supplier_detail.html", context, e, &correlation)
        }
    }
}

async fn delete_supplier(State(state): State<AppState>, Path(id): Path<String>) -> FormResult {
    let correlation = correlation_id();
    let ctx = operation_context("web");
    match SqlSupplierRepository::new(state.db_pool.clone()).delete(&id, &ctx).await {
        Ok(()) => Ok(redirect("/suppliers", "deleted").into_response()),
        Err(e) => {
            let context =
                supplier_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "supplier_detail.html", context, e, &correlation)
        }
    }
}

async fn create_supplier_contact(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<SupplierContactForm>,
) -> FormResult {
    let correlation = correlation_id();
    let mut errors = Vec::new();
    let name = require_text_field(&mut errors, "contact name", &form.name);
    if !errors.is_empty() {
        let context =
            supplier_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "supplier_detail.html", context, errors);
    }

    let contact = SupplierContact {
        id: numbering::entity_id("SCO"),
        supplier_id: id.clone(),
        name,
        email: form.email.trim().to_owned(),
        phone: form.phone.trim().to_owned(),
        role: form.role.trim().to_owned(),
    };
    match SqlSupplierRepository::new(state.db_pool.clone()).save_contact(contact).await {
        Ok(_) => Ok(redirect(&format!("/suppliers/{id}"), "created").into_response()),
        Err(e) => {
            let context =
                supplier_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "supplier_detail.html", context, e, &correlation)
        }
    }
}

async fn delete_supplier_contact(
    State(state): State<AppState>,
    Path((id, contact_id)): Path<(String, String)>,
) -> FormResult {
    let correlation = correlation_id();
    SqlSupplierRepository::new(state.db_pool.clone())
        .delete_contact(&contact_id)
        .await
        .map_err(|e| page_error(e, &correlation))?;
    Ok(redirect(&format!("/suppliers/{id}"), "deleted").into_response())
}

async fn upsert_supplier_price(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<SupplierPriceForm>,
) -> FormResult {
    let correlation = correlation_id();
    let mut errors = Vec::new();
    let product_id = require_text_field(&mut errors, "product", &form.product_id);
    let unit_cost = parse_money_field(&mut errors, "unit cost", &form.unit_cost);
    let valid_until = parse_date_field(&mut errors, "valid until", &form.valid_until);
    if !errors.is_empty() {
        let context =
            supplier_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "supplier_detail.html", context, errors);
    }

    let price = SupplierPrice {
        id: numbering::entity_id("SPR"),
        supplier_id: id.clone(),
        product_id,
        unit_cost,
        currency: if form.currency.trim().is_empty() {
            "BRL".to_owned()
        } else {
            form.currency.trim().to_uppercase()
        },
        valid_until,
    };
    match SqlSupplierRepository::new(state.db_pool.clone()).upsert_price(price).await {
        Ok(_) => Ok(redirect(&format!("/suppliers/{id}"), "updated").into_response()),
        Err(e) => {
            let context =
                supplier_detail_context(&state, &id, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "supplier_detail.html", context, e, &correlation)
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::extract::{Form, Path, State};
    use axum::http::{header, StatusCode};
    use rust_decimal::Decimal;

    use opsdesk_db::repositories::SqlProductRepository;

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

    #[tokio::test]
    async fn creating_a_product_derives_its_sku_from_the_category() {
        let state = testing::state().await;

        let response = create_product(
            State(state.clone()),
            Form(ProductCreateForm {
                name: "24-port switch".to_owned(),
                category_name: "Networking".to_owned(),
                kind: "good".to_owned(),
                pricing_method: "markup".to_owned(),
                standard_cost: "400,00".to_owned(),
                markup_pct: "35".to_owned(),
                ..ProductCreateForm::default()
            }),
        )
        .await
        .expect("create");
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let products =
            SqlProductRepository::new(state.db_pool.clone()).list(false).await.expect("list");
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].sku, "NET-001");
        // 400.00 marked up 35%
        assert_eq!(products[0].list_price, Decimal::new(54_000, 2));

        state.db_pool.close().await;
    }

    #[tokio::test]
    async fn a_bad_kind_re_renders_the_product_form() {
        let state = testing::state().await;

        let response = create_product(
            State(state.clone()),
            Form(ProductCreateForm {
                name: "Mystery item".to_owned(),
                kind: "gadget".to_owned(),
                pricing_method: "markup".to_owned(),
                ..ProductCreateForm::default()
            }),
        )
        .await
        .expect("failure renders");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        state.db_pool.close().await;
    }

    #[tokio::test]
    async fn supplier_page_round_trip_with_contact_and_price() {
        let state = testing::state().await;

        let response = create_supplier(
            State(state.clone()),
            Form(SupplierForm {
                kind: "distributor".to_owned(),
                legal_name: "Distribuidora Norte Ltda".to_owned(),
                tax_id: "12.345.678/0001-00".to_owned(),
                rating: "4".to_owned(),
                ..SupplierForm::default()
            }),
        )
        .await
        .expect("create supplier");
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let supplier_id = location_of(&response)
            .trim_start_matches("/suppliers/")
            .split('?')
            .next()
            .unwrap()
            .to_owned();

        let product = SqlProductRepository::new(state.db_pool.clone())
            .create(opsdesk_db::repositories::NewProduct {
                name: "Cat6 cable".to_owned(),
                category_name: None,
                kind: ProductKind::Good,
                pricing_method: PricingMethod::Fixed,
                standard_cost: Decimal::new(1_000, 2),
                markup_pct: Decimal::ZERO,
                list_price: Decimal::new(1_890, 2),
                unit: "m".to_owned(),
            })
            .await
            .expect("product");

        let response = create_supplier_contact(
            State(state.clone()),
            Path(supplier_id.clone()),
            Form(SupplierContactForm { name: "Paulo".to_owned(), ..SupplierContactForm::default() }),
        )
        .await
        .expect("contact");
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let response = upsert_supplier_price(
            State(state.clone()),
            Path(supplier_id.clone()),
            Form(SupplierPriceForm {
                product_id: product.id.clone(),
                unit_cost: "9,80".to_owned(),
                ..SupplierPriceForm::default()
            }),
        )
        .await
        .expect("price");
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let page = supplier_detail_page(
            State(state.clone()),
            Path(supplier_id),
            axum::extract::Query(crate::web::NoticeQuery::default()),
        )
        .await
        .expect("detail");
        let body = testing::body_of(&page);
        assert!(body.contains("Paulo"));
        assert!(body.contains("Cat6 cable"));

        state.db_pool.close().await;
    }

    #[tokio::test]
    async fn ratings_outside_one_to_five_are_rejected() {
        let state = testing::state().await;

        let response = create_supplier(
            State(state.clone()),
            Form(SupplierForm {
                kind: "supplier".to_owned(),
                legal_name: "Acme".to_owned(),
                tax_id: "9".to_owned(),
                rating: "6".to_owned(),
                ..SupplierForm::default()
            }),
        )
        .await
        .expect("refusal renders");
        // The repository rejects it through Supplier::validate.
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        state.db_pool.close().await;
    }
}
