//! Marketing channels, monthly spend entry, and the acquisition-cost report.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::Row;

use opsdesk_core::domain::marketing::{acquisition_cost, MarketingChannel, MarketingSpend};
use opsdesk_core::errors::DomainError;
use opsdesk_core::numbering;

use crate::repositories::{parse_decimal, parse_i32, parse_u32, RepositoryError};
use crate::DbPool;

/// One month of the yearly report: spend across all channels against the
/// customers who landed that month. `cac` is empty when nobody did.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AcquisitionCostRow {
    pub month: u32,
    pub total_spend: Decimal,
    pub new_customers: i64,
    pub cac: Option<Decimal>,
}

pub struct SqlMarketingRepository {
    pool: DbPool,
}

impl SqlMarketingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// The name is the identity; a repeated name updates the description.
    pub async fn upsert_channel(
        &self,
        name: &str,
        description: &str,
    ) -> Result<MarketingChannel, RepositoryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::Validation("channel name is required".to_owned()).into());
        }

        sqlx::query(
            "INSERT INTO marketing_channel (id, name, description) VALUES (?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET description = excluded.description",
        )
        .bind(numbering::entity_id("MKC"))
        .bind(name)
        .bind(description)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT id, name, description FROM marketing_channel WHERE name = ?",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(MarketingChannel {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
        })
    }

    pub async fn list_channels(&self) -> Result<Vec<MarketingChannel>, RepositoryError> {
        let rows =
            sqlx::query("SELECT id, name, description FROM marketing_channel ORDER BY name")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|row| {
                Ok(MarketingChannel {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    description: row.try_get("description")?,
                })
            })
            .collect()
    }

    /// One figure per channel and month; entering it again replaces it.
    pub async fn upsert_spend(
        &self,
        channel_id: &str,
        year: i32,
        month: u32,
        amount: Decimal,
    ) -> Result<MarketingSpend, RepositoryError> {
        let spend = MarketingSpend {
            id: numbering::entity_id("MKS"),
            channel_id: channel_id.to_owned(),
            year,
            month,
            amount,
        };
        spend.validate()?;

        sqlx::query(
            "INSERT INTO marketing_spend (id, channel_id, year, month, amount)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(channel_id, year, month) DO UPDATE SET amount = excluded.amount",
        )
        .bind(&spend.id)
        .bind(&spend.channel_id)
        .bind(i64::from(spend.year))
        .bind(i64::from(spend.month))
        .bind(spend.amount.to_string())
        .execute(&self.pool)
        .await?;

        // The stored row keeps its first id across re-entries.
        let row = sqlx::query(
            "SELECT id, channel_id, year, month, amount
             FROM marketing_spend WHERE channel_id = ? AND year = ? AND month = ?",
        )
        .bind(channel_id)
        .bind(i64::from(year))
        .bind(i64::from(month))
        .fetch_one(&self.pool)
        .await?;
        spend_from_row(row)
    }

    pub async fn list_spend(&self, year: i32) -> Result<Vec<MarketingSpend>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT s.id, s.channel_id, s.year, s.month, s.amount
             FROM marketing_spend s
             JOIN marketing_channel c ON c.id = s.channel_id
             WHERE s.year = ?
             ORDER BY s.month, c.name",
        )
        .bind(i64::from(year))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(spend_from_row).collect()
    }

    /// Twelve rows, one per month of the year. New customers are counted by
    /// the month their record was created.
    pub async fn acquisition_cost_report(
        &self,
        year: i32,
    ) -> Result<Vec<AcquisitionCostRow>, RepositoryError> {
        let spend_rows =
            sqlx::query("SELECT month, amount FROM marketing_spend WHERE year = ?")
                .bind(i64::from(year))
                .fetch_all(&self.pool)
                .await?;
        let mut spend_by_month: BTreeMap<u32, Decimal> = BTreeMap::new();
        for row in spend_rows {
            let month = parse_u32("month", row.try_get("month")?)?;
            let amount = parse_decimal("amount", row.try_get("amount")?)?;
            *spend_by_month.entry(month).or_insert(Decimal::ZERO) += amount;
        }

        let customer_rows = sqlx::query(
            "SELECT substr(created_at, 1, 7) AS period, COUNT(*) AS new_customers
             FROM customer WHERE created_at LIKE ?
             GROUP BY period",
        )
        .bind(format!("{year}-%"))
        .fetch_all(&self.pool)
        .await?;
        let mut customers_by_month: BTreeMap<u32, i64> = BTreeMap::new();
        for row in customer_rows {
            let period: String = row.try_get("period")?;
            let month = period
                .get(5..7)
                .and_then(|m| m.parse::<u32>().ok())
                .ok_or_else(|| RepositoryError::Decode(format!("bad period: {period}")))?;
            customers_by_month.insert(month, row.try_get("new_customers")?);
        }

        Ok((1..=12)
            .map(|month| {
                let total_spend = spend_by_month.get(&month).copied().unwrap_or(Decimal::ZERO);
                let new_customers = customers_by_month.get(&month).copied().unwrap_or(0);
                AcquisitionCostRow {
                    month,
                    total_spend,
                    new_customers,
                    cac: acquisition_cost(total_spend, new_customers),
                }
            })
            .collect())
    }
}

fn spend_from_row(row: sqlx::sqlite::SqliteRow) -> Result<MarketingSpend, RepositoryError> {
    Ok(MarketingSpend {
        id: row.try_get("id")?,
        channel_id: row.try_get("channel_id")?,
        year: parse_i32("year", row.try_get("year")?)?,
        month: parse_u32("month", row.try_get("month")?)?,
        amount: parse_decimal("amount", row.try_get("amount")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Utc};
    use rust_decimal::Decimal;

    use opsdesk_core::domain::crm::Customer;
    use opsdesk_core::errors::DomainError;
    use opsdesk_core::numbering;

    use super::SqlMarketingRepository;
    use crate::repositories::crm::SqlCustomerRepository;
    use crate::repositories::RepositoryError;
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    async fn seed_customer(pool: &DbPool, tax_id: &str) {
        let now = Utc::now();
        SqlCustomerRepository::new(pool.clone())
            .save(Customer {
                id: numbering::entity_id("CUS"),
                legal_name: format!("Cliente {tax_id}"),
                trade_name: String::new(),
                tax_id: tax_id.to_owned(),
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
            .expect("customer");
    }

    #[tokio::test]
    async fn channels_upsert_on_their_name() {
        let pool = setup_pool().await;
        let repo = SqlMarketingRepository::new(pool.clone());

        let first = repo.upsert_channel("Google Ads", "search").await.expect("channel");
        let again = repo.upsert_channel("Google Ads", "search + display").await.expect("again");
        assert_eq!(first.id, again.id);
        assert_eq!(again.description, "search + display");
        assert_eq!(repo.list_channels().await.expect("list").len(), 1);
        pool.close().await;
    }

    #[tokio::test]
    async fn spend_upserts_on_channel_and_period() {
        let pool = setup_pool().await;
        let repo = SqlMarketingRepository::new(pool.clone());
        let channel = repo.upsert_channel("Indicacao", "").await.expect("channel");

        let first = repo
            .upsert_spend(&channel.id, 2026, 8, Decimal::new(40_000, 2))
            .await
            .expect("spend");
        let corrected = repo
            .upsert_spend(&channel.id, 2026, 8, Decimal::new(55_000, 2))
            .await
            .expect("corrected");
        assert_eq!(corrected.id, first.id);
        assert_eq!(corrected.amount, Decimal::new(55_000, 2));
        assert_eq!(repo.list_spend(2026).await.expect("list").len(), 1);

        let error = repo
            .upsert_spend(&channel.id, 2026, 13, Decimal::ONE)
            .await
            .expect_err("month out of range");
        assert!(matches!(error, RepositoryError::Domain(DomainError::Validation(_))));
        pool.close().await;
    }

    #[tokio::test]
    async fn the_cac_report_divides_spend_by_new_customers() {
        let pool = setup_pool().await;
        let repo = SqlMarketingRepository::new(pool.clone());

        let today = Utc::now().date_naive();
        let year = today.year();
        let month = today.month();
        let idle_month = if month == 1 { 2 } else { month - 1 };

        let ads = repo.upsert_channel("Google Ads", "").await.expect("ads");
        let events = repo.upsert_channel("Eventos", "").await.expect("events");
        repo.upsert_spend(&ads.id, year, month, Decimal::new(20_000, 2)).await.expect("spend");
        repo.upsert_spend(&events.id, year, month, Decimal::new(10_000, 2))
            .await
            .expect("spend");
        repo.upsert_spend(&ads.id, year, idle_month, Decimal::new(5_000, 2))
            .await
            .expect("idle spend");

        seed_customer(&pool, "11.111.111/0001-11").await;
        seed_customer(&pool, "22.222.222/0001-22").await;

        let report = repo.acquisition_cost_report(year).await.expect("report");
        assert_eq!(report.len(), 12);

        let current = &report[(month - 1) as usize];
        assert_eq!(current.total_spend, Decimal::new(30_000, 2));
        assert_eq!(current.new_customers, 2);
        // 300.00 across 2 customers
        assert_eq!(current.cac, Some(Decimal::new(15_000, 2)));

        let idle = &report[(idle_month - 1) as usize];
        assert_eq!(idle.total_spend, Decimal::new(5_000, 2));
        assert_eq!(idle.new_customers, 0);
        assert_eq!(idle.cac, None);
        pool.close().await;
    }
}
