//! Landing dashboard: read-only aggregates across the modules.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::Router;

use opsdesk_db::repositories::SqlReportsRepository;

use crate::web::{
    base_context, correlation_id, page_error, render, AppState, NoticeQuery, PageResult,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(dashboard_page))
}

async fn dashboard_page(
    State(state): State<AppState>,
    Query(notice): Query<NoticeQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let summary = SqlReportsRepository::new(state.db_pool.clone())
        .dashboard()
        .await
        .map_err(|e| page_error(e, &correlation))?;

    let mut context = base_context("dashboard", &notice);
    context.insert("pipeline", &summary.pipeline);
    context.insert("receivable_balance", &summary.receivable_balance);
    context.insert("payable_balance", &summary.payable_balance);
    context.insert("below_minimum_items", &summary.below_minimum_items);
    context.insert("ticket_load", &summary.ticket_load);
    render(&state, "dashboard.html", &context)
}

#[cfg(test)]
mod tests {
    use axum::extract::{Query, State};

    use crate::web::testing;
    use crate::web::NoticeQuery;

    use super::dashboard_page;

    #[tokio::test]
    async fn dashboard_renders_on_an_empty_database() {
        let state = testing::state().await;

        let page = dashboard_page(State(state.clone()), Query(NoticeQuery::default()))
            .await
            .expect("dashboard should render");

        let body = testing::body_of(&page);
        assert!(body.contains("Dashboard"), "expected the dashboard heading");
        assert!(body.contains("R$ 0,00"), "empty books should show zero balances");

        state.db_pool.close().await;
    }
}
