//! Marketing page: channels, monthly spend entry, and the yearly
//! customer-acquisition-cost report, all on one screen.

use std::collections::HashMap;

use axum::extract::{Form, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::Router;
use chrono::{Datelike, Utc};
use serde::Deserialize;
use serde_json::json;
use tera::Context;

use opsdesk_db::repositories::SqlMarketingRepository;

use crate::web::{
    base_context, correlation_id, page_error, parse_money_field, redirect, render,
    render_field_errors, render_form_failure, require_text_field, AppState, FormResult,
    NoticeQuery, PageResult,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/marketing", get(marketing_page))
        .route("/marketing/channels", post(upsert_channel))
        .route("/marketing/spend", post(upsert_spend))
}

#[derive(Debug, Default, Deserialize)]
pub struct YearQuery {
    pub year: Option<i32>,
}

async fn marketing_context(
    state: &AppState,
    notice: &NoticeQuery,
    year: i32,
    correlation: &str,
) -> Result<Context, (StatusCode, Html<String>)> {
    let repo = SqlMarketingRepository::new(state.db_pool.clone());
    let channels = repo.list_channels().await.map_err(|e| page_error(e, correlation))?;
    let spend = repo.list_spend(year).await.map_err(|e| page_error(e, correlation))?;
    let report =
        repo.acquisition_cost_report(year).await.map_err(|e| page_error(e, correlation))?;

    let channel_names: HashMap<&str, &str> =
        channels.iter().map(|c| (c.id.as_str(), c.name.as_str())).collect();
    let spend_rows: Vec<serde_json::Value> = spend
        .iter()
        .map(|entry| {
            json!({
                "channel": channel_names.get(entry.channel_id.as_str()).unwrap_or(&"?"),
                "month": entry.month,
                "amount": entry.amount,
            })
        })
        .collect();

    let mut context = base_context("marketing", notice);
    context.insert("channels", &channels);
    context.insert("spend_rows", &spend_rows);
    context.insert("report", &report);
    context.insert("year", &year);
    Ok(context)
}

async fn marketing_page(
    State(state): State<AppState>,
    Query(notice): Query<NoticeQuery>,
    Query(query): Query<YearQuery>,
) -> PageResult {
    let correlation = correlation_id();
    let year = query.year.unwrap_or_else(|| Utc::now().date_naive().year());
    let context = marketing_context(&state, &notice, year, &correlation).await?;
    render(&state, "marketing.html", &context)
}

#[derive(Debug, Default, Deserialize)]
pub struct ChannelForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

async fn upsert_channel(
    State(state): State<AppState>,
    Form(form): Form<ChannelForm>,
) -> FormResult {
    let correlation = correlation_id();
    let year = Utc::now().date_naive().year();
    let mut errors = Vec::new();
    let name = require_text_field(&mut errors, "channel name", &form.name);
    if !errors.is_empty() {
        let context =
            marketing_context(&state, &NoticeQuery::default(), year, &correlation).await?;
        return render_field_errors(&state, "marketing.html", context, errors);
    }

    match SqlMarketingRepository::new(state.db_pool.clone())
        .upsert_channel(&name, form.description.trim())
        .await
    {
        Ok(_) => Ok(redirect("/marketing", "created").into_response()),
        Err(e) => {
            let context =
                marketing_context(&state, &NoticeQuery::default(), year, &correlation).await?;
            render_form_failure(&state, "marketing.html", context, e, &correlation)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SpendForm {
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub year: String,
    #[serde(default)]
    pub month: String,
    #[serde(default)]
    pub amount: String,
}

async fn upsert_spend(State(state): State<AppState>, Form(form): Form<SpendForm>) -> FormResult {
    let correlation = correlation_id();
    let today = Utc::now().date_naive();
    let mut errors = Vec::new();
    let channel_id = require_text_field(&mut errors, "channel", &form.channel_id);
    let year = match form.year.trim() {
        "" => today.year(),
        raw => raw.parse::<i32>().unwrap_or_else(|_| {
            errors.push("year must be a number such as 2026".to_owned());
            today.year()
        }),
    };
    let month = match form.month.trim() {
        "" => today.month(),
        raw => raw.parse::<u32>().unwrap_or_else(|_| {
            errors.push("month must be 1 to 12".to_owned());
            today.month()
        }),
    };
    let amount = parse_money_field(&mut errors, "amount", &form.amount);
    if !errors.is_empty() {
        let context =
            marketing_context(&state, &NoticeQuery::default(), year, &correlation).await?;
        return render_field_errors(&state, "marketing.html", context, errors);
    }

    match SqlMarketingRepository::new(state.db_pool.clone())
        .upsert_spend(&channel_id, year, month, amount)
        .await
    {
        Ok(_) => Ok(redirect("/marketing", "updated").into_response()),
        Err(e) => {
            let context =
                marketing_context(&state, &NoticeQuery::default(), year, &correlation).await?;
            render_form_failure(&state, "marketing.html", context, e, &correlation)
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::extract::{Form, Query, State};
    use axum::http::StatusCode;
    use rust_decimal::Decimal;

    use opsdesk_db::repositories::SqlMarketingRepository;

    use crate::web::testing;

    use super::*;

    #[tokio::test]
    async fn spend_upserts_replace_the_month_figure() {
        let state = testing::state().await;
        let channel = SqlMarketingRepository::new(state.db_pool.clone())
            .upsert_channel("Google Ads", "search campaigns")
            .await
            .expect("channel");

        for amount in ["1.000,00", "1.500,00"] {
            let response = upsert_spend(
                State(state.clone()),
                Form(SpendForm {
                    channel_id: channel.id.clone(),
                    year: "2026".to_owned(),
                    month: "3".to_owned(),
                    amount: amount.to_owned(),
                }),
            )
            .await
            .expect("upsert");
            assert_eq!(response.status(), StatusCode::SEE_OTHER);
        }

        let spend = SqlMarketingRepository::new(state.db_pool.clone())
            .list_spend(2026)
            .await
            .expect("list");
        assert_eq!(spend.len(), 1);
        assert_eq!(spend[0].amount, Decimal::new(150_000, 2));

        state.db_pool.close().await;
    }

    #[tokio::test]
    async fn a_thirteenth_month_is_refused() {
        let state = testing::state().await;
        let channel = SqlMarketingRepository::new(state.db_pool.clone())
            .upsert_channel("Eventos", "")
            .await
            .expect("channel");

        let response = upsert_spend(
            State(state.clone()),
            Form(SpendForm {
                channel_id: channel.id,
                year: "2026".to_owned(),
                month: "13".to_owned(),
                amount: "500,00".to_owned(),
            }),
        )
        .await
        .expect("refusal renders");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        state.db_pool.close().await;
    }

    #[tokio::test]
    async fn the_report_renders_twelve_months() {
        let state = testing::state().await;

        let page = marketing_page(
            State(state.clone()),
            Query(NoticeQuery::default()),
            Query(YearQuery { year: Some(2026) }),
        )
        .await
        .expect("page");
        let body = testing::body_of(&page);
        assert!(body.contains("Acquisition cost"));

        state.db_pool.close().await;
    }
}
