//! Stock pages: on-hand levels, manual movements, and per-product history.
//!
//! Every mutation posts back to `/stock`; the page shows the below-minimum
//! slice on top so replenishment needs stay visible.

use std::collections::HashMap;

use axum::extract::{Form, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tera::Context;

use opsdesk_core::domain::catalog::Product;
use opsdesk_core::domain::inventory::StockItem;
use opsdesk_db::repositories::{SqlProductRepository, SqlStockRepository};

use crate::web::{
    base_context, correlation_id, not_found, operation_context, page_error, parse_money_field,
    redirect, render, render_field_errors, render_form_failure, require_text_field, AppState,
    FormResult, NoticeQuery, PageResult,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stock", get(stock_page))
        .route("/stock/table", get(stock_table))
        .route("/stock/entry", post(register_entry))
        .route("/stock/exit", post(register_exit))
        .route("/stock/adjust", post(adjust_stock))
        .route("/stock/configure", post(configure_stock))
        .route("/stock/{product_id}/movements", get(movements_page))
}

fn stock_rows(items: &[StockItem], products: &[Product]) -> Vec<serde_json::Value> {
    let names: HashMap<&str, (&str, &str)> =
        products.iter().map(|p| (p.id.as_str(), (p.sku.as_str(), p.name.as_str()))).collect();
    items
        .iter()
        .map(|item| {
            let (sku, name) = names.get(item.product_id.as_str()).copied().unwrap_or(("?", "?"));
            json!({
                "product_id": item.product_id,
                "product_sku": sku,
                "product_name": name,
                "quantity_on_hand": item.quantity_on_hand,
                "minimum_quantity": item.minimum_quantity,
                "location": item.location,
                "below_minimum": item.is_below_minimum(),
            })
        })
        .collect()
}

async fn stock_context(
    state: &AppState,
    notice: &NoticeQuery,
    correlation: &str,
) -> Result<Context, (StatusCode, Html<String>)> {
    let repo = SqlStockRepository::new(state.db_pool.clone());
    let items = repo.list().await.map_err(|e| page_error(e, correlation))?;
    let products = SqlProductRepository::new(state.db_pool.clone())
        .list(false)
        .await
        .map_err(|e| page_error(e, correlation))?;

    let below: Vec<&StockItem> = items.iter().filter(|item| item.is_below_minimum()).collect();

    let mut context = base_context("stock", notice);
    context.insert("rows", &stock_rows(&items, &products));
    context.insert("below_minimum_count", &below.len());
    context.insert("products", &products);
    Ok(context)
}

async fn stock_page(State(state): State<AppState>, Query(notice): Query<NoticeQuery>) -> PageResult {
    let correlation = correlation_id();
    let context = stock_context(&state, &notice, &correlation).await?;
    render(&state, "stock.html", &context)
}

async fn stock_table(State(state): State<AppState>) -> PageResult {
    let correlation = correlation_id();
    let context = stock_context(&state, &NoticeQuery::default(), &correlation).await?;
    render(&state, "stock_table.html", &context)
}

#[derive(Debug, Default, Deserialize)]
pub struct MovementForm {
    #[serde(default)]
    pub product_id: String,
    #[serde(default)]
    pub quantity: String,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub moved_by: String,
}

enum MovementAction {
    Entry,
    Exit,
    Adjust,
}

async fn apply_movement_form(
    state: AppState,
    form: MovementForm,
    action: MovementAction,
) -> FormResult {
    let correlation = correlation_id();
    let mut errors = Vec::new();
    let product_id = require_text_field(&mut errors, "product", &form.product_id);
    let quantity = parse_money_field(&mut errors, "quantity", &form.quantity);
    if !errors.is_empty() {
        let context = stock_context(&state, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "stock.html", context, errors);
    }

    let repo = SqlStockRepository::new(state.db_pool.clone());
    let ctx = operation_context(&form.moved_by);
    let note = form.note.trim();
    let (result, token) = match action {
        MovementAction::Entry => {
            (repo.register_entry(&product_id, quantity, note, &ctx).await, "moved")
        }
        MovementAction::Exit => {
            (repo.register_exit(&product_id, quantity, note, &ctx).await, "moved")
        }
        MovementAction::Adjust => (repo.adjust(&product_id, quantity, note, &ctx).await, "adjusted"),
    };
    match result {
        Ok(_) => Ok(redirect("/stock", token).into_response()),
        Err(e) => {
            let context = stock_context(&state, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "stock.html", context, e, &correlation)
        }
    }
}

async fn register_entry(
    State(state): State<AppState>,
    Form(form): Form<MovementForm>,
) -> FormResult {
    apply_movement_form(state, form, MovementAction::Entry).await
}

async fn register_exit(
    State(state): State<AppState>,
    Form(form): Form<MovementForm>,
) -> FormResult {
    apply_movement_form(state, form, MovementAction::Exit).await
}

async fn adjust_stock(State(state): State<AppState>, Form(form): Form<MovementForm>) -> FormResult {
    apply_movement_form(state, form, MovementAction::Adjust).await
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfigureForm {
    #[serde(default)]
    pub product_id: String,
    #[serde(default)]
    pub minimum_quantity: String,
    #[serde(default)]
    pub location: String,
}

async fn configure_stock(
    State(state): State<AppState>,
    Form(form): Form<ConfigureForm>,
) -> FormResult {
    let correlation = correlation_id();
    let mut errors = Vec::new();
    let product_id = require_text_field(&mut errors, "product", &form.product_id);
    let minimum_quantity = parse_money_field(&mut errors, "minimum quantity", &form.minimum_quantity);
    if !errors.is_empty() {
        let context = stock_context(&state, &NoticeQuery::default(), &correlation).await?;
        return render_field_errors(&state, "stock.html", context, errors);
    }

    match SqlStockRepository::new(state.db_pool.clone())
        .configure(&product_id, minimum_quantity, form.location.trim())
        .await
    {
        Ok(_) => Ok(redirect("/stock", "configured").into_response()),
        Err(e) => {
            let context = stock_context(&state, &NoticeQuery::default(), &correlation).await?;
            render_form_failure(&state, "stock.html", context, e, &correlation)
        }
    }
}

async fn movements_page(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
    Query(notice): Query<NoticeQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let product = SqlProductRepository::new(state.db_pool.clone())
        .find_by_id(&product_id)
        .await
        .map_err(|e| page_error(e, &correlation))?
        .ok_or_else(|| not_found("Product"))?;
    let repo = SqlStockRepository::new(state.db_pool.clone());
    let item =
        repo.find_by_product(&product_id).await.map_err(|e| page_error(e, &correlation))?;
    let movements = repo
        .movements_for_product(&product_id)
        .await
        .map_err(|e| page_error(e, &correlation))?;

    let mut context = base_context("stock", &notice);
    context.insert("product", &product);
    context.insert("item", &item);
    context.insert("movements", &movements);
    render(&state, "stock_movements.html", &context)
}

#[cfg(test)]
mod tests {
    use axum::extract::{Form, Path, Query, State};
    use axum::http::StatusCode;
    use rust_decimal::Decimal;

    use opsdesk_core::domain::catalog::{PricingMethod, ProductKind};
    use opsdesk_db::repositories::{NewProduct, SqlProductRepository, SqlStockRepository};

    use crate::web::testing;

    use super::*;

    async fn seed_product(state: &crate::web::AppState) -> String {
        SqlProductRepository::new(state.db_pool.clone())
            .create(NewProduct {
                name: "Label roll".to_owned(),
                category_name: None,
                kind: ProductKind::Good,
                pricing_method: PricingMethod::Fixed,
                standard_cost: Decimal::new(500, 2),
                markup_pct: Decimal::ZERO,
                list_price: Decimal::new(900, 2),
                unit: "un".to_owned(),
            })
            .await
            .expect("product")
            .id
    }

    #[tokio::test]
    async fn entries_and_exits_move_the_on_hand_quantity() {
        let state = testing::state().await;
        let product_id = seed_product(&state).await;

        let response = register_entry(
            State(state.clone()),
            Form(MovementForm {
                product_id: product_id.clone(),
                quantity: "10".to_owned(),
                moved_by: "Rafael".to_owned(),
                ..MovementForm::default()
            }),
        )
        .await
        .expect("entry");
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let response = register_exit(
            State(state.clone()),
            Form(MovementForm {
                product_id: product_id.clone(),
                quantity: "3".to_owned(),
                ..MovementForm::default()
            }),
        )
        .await
        .expect("exit");
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let item = SqlStockRepository::new(state.db_pool.clone())
            .find_by_product(&product_id)
            .await
            .expect("find")
            .expect("present");
        assert_eq!(item.quantity_on_hand, Decimal::new(7, 0));

        state.db_pool.close().await;
    }

    #[tokio::test]
    async fn an_exit_past_the_on_hand_quantity_is_refused() {
        let state = testing::state().await;
        let product_id = seed_product(&state).await;

        register_entry(
            State(state.clone()),
            Form(MovementForm {
                product_id: product_id.clone(),
                quantity: "2".to_owned(),
                ..MovementForm::default()
            }),
        )
        .await
        .expect("entry");

        let response = register_exit(
            State(state.clone()),
            Form(MovementForm {
                product_id: product_id.clone(),
                quantity: "5".to_owned(),
                ..MovementForm::default()
            }),
        )
        .await
        .expect("refusal renders");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        state.db_pool.close().await;
    }

    #[tokio::test]
    async fn movement_history_renders_for_a_product() {
        let state = testing::state().await;
        let product_id = seed_product(&state).await;

        register_entry(
            State(state.clone()),
            Form(MovementForm {
                product_id: product_id.clone(),
                quantity: "4".to_owned(),
                note: "initial load".to_owned(),
                ..MovementForm::default()
            }),
        )
        .await
        .expect("entry");

        let page = movements_page(
            State(state.clone()),
            Path(product_id),
            Query(NoticeQuery::default()),
        )
        .await
        .expect("page");
        assert!(testing::body_of(&page).contains("initial load"));

        state.db_pool.close().await;
    }
}
