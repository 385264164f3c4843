//! Read-only aggregates behind the dashboard.

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::Row;

use opsdesk_core::domain::operations::priority_label;

use crate::repositories::{parse_decimal, parse_u8, RepositoryError};
use crate::DbPool;

/// One pipeline stage with its count of opportunities still in play.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StageFunnelRow {
    pub stage_id: String,
    pub stage_name: String,
    pub open_opportunities: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TicketLoadRow {
    pub priority: u8,
    pub label: String,
    pub open_tickets: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DashboardSummary {
    pub pipeline: Vec<StageFunnelRow>,
    pub receivable_balance: Decimal,
    pub payable_balance: Decimal,
    pub below_minimum_items: i64,
    pub ticket_load: Vec<TicketLoadRow>,
}

pub struct SqlReportsRepository {
    pool: DbPool,
}

impl SqlReportsRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// The landing-page numbers. Opportunities count as open until their
    /// close date is stamped; invoices and expenses contribute their
    /// outstanding balance while unsettled.
    pub async fn dashboard(&self) -> Result<DashboardSummary, RepositoryError> {
        let pipeline = self.pipeline().await?;
        let receivable_balance = self
            .outstanding_balance(
                "SELECT balance_value FROM invoice
                 WHERE status IN ('open', 'partial', 'overdue')",
            )
            .await?;
        let payable_balance = self
            .outstanding_balance(
                "SELECT balance_value FROM expense
                 WHERE status IN ('pending', 'overdue')",
            )
            .await?;
        let below_minimum_items = self.below_minimum_items().await?;
        let ticket_load = self.ticket_load().await?;

        Ok(DashboardSummary {
            pipeline,
            receivable_balance,
            payable_balance,
            below_minimum_items,
            ticket_load,
        })
    }

    async fn pipeline(&self) -> Result<Vec<StageFunnelRow>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT s.id AS stage_id, s.name AS stage_name,
                    (SELECT COUNT(*) FROM opportunity o
                     WHERE o.stage_id = s.id AND o.actual_close_date IS NULL)
                        AS open_opportunities
             FROM sales_stage s
             ORDER BY s.position",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(StageFunnelRow {
                    stage_id: row.try_get("stage_id")?,
                    stage_name: row.try_get("stage_name")?,
                    open_opportunities: row.try_get("open_opportunities")?,
                })
            })
            .collect()
    }

    // Balances are decimal strings, so the sum happens here.
    async fn outstanding_balance(&self, query: &str) -> Result<Decimal, RepositoryError> {
        let rows = sqlx::query(query).fetch_all(&self.pool).await?;
        let mut total = Decimal::ZERO;
        for row in rows {
            total += parse_decimal("balance_value", row.try_get("balance_value")?)?;
        }
        Ok(total)
    }

    async fn below_minimum_items(&self) -> Result<i64, RepositoryError> {
        let rows =
            sqlx::query("SELECT quantity_on_hand, minimum_quantity FROM stock_item")
                .fetch_all(&self.pool)
                .await?;
        let mut count = 0;
        for row in rows {
            let on_hand = parse_decimal("quantity_on_hand", row.try_get("quantity_on_hand")?)?;
            let minimum = parse_decimal("minimum_quantity", row.try_get("minimum_quantity")?)?;
            if on_hand < minimum {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn ticket_load(&self) -> Result<Vec<TicketLoadRow>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT priority, COUNT(*) AS open_tickets
             FROM ticket WHERE status IN ('new', 'assigned', 'pending')
             GROUP BY priority
             ORDER BY priority",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let priority = parse_u8("priority", row.try_get("priority")?)?;
                Ok(TicketLoadRow {
                    priority,
                    label: priority_label(priority).to_owned(),
                    open_tickets: row.try_get("open_tickets")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use opsdesk_core::domain::catalog::{PricingMethod, ProductKind};
    use opsdesk_core::domain::crm::{Customer, Opportunity, OpportunityKind};
    use opsdesk_core::numbering;

    use super::SqlReportsRepository;
    use crate::repositories::catalog::{NewProduct, SqlProductRepository};
    use crate::repositories::crm::{SqlCustomerRepository, SqlOpportunityRepository};
    use crate::repositories::finance::{
        NewExpense, NewInvoice, SqlExpenseRepository, SqlInvoiceRepository,
    };
    use crate::repositories::inventory::SqlStockRepository;
    use crate::repositories::operations::{NewTicket, SqlTicketRepository};
    use crate::repositories::OperationContext;
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn ctx() -> OperationContext {
        OperationContext::new("dashboard", "corr-reports")
    }

    async fn seed_customer(pool: &DbPool) -> String {
        let now = Utc::now();
        let customer = SqlCustomerRepository::new(pool.clone())
            .save(Customer {
                id: numbering::entity_id("CUS"),
                legal_name: "Painel Cliente SA".to_owned(),
                trade_name: String::new(),
                tax_id: "55.555.555/0001-55".to_owned(),
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
        customer.id
    }

    #[tokio::test]
    async fn the_dashboard_aggregates_each_module() {
        let pool = setup_pool().await;
        let reports = SqlReportsRepository::new(pool.clone());
        let customer_id = seed_customer(&pool).await;
        let today = Utc::now().date_naive();

        // One opportunity still in play at the first stage.
        let now = Utc::now();
        SqlOpportunityRepository::new(pool.clone())
            .save(Opportunity {
                id: numbering::entity_id("OPP"),
                customer_id: customer_id.clone(),
                title: "Fiber uplink".to_owned(),
                kind: OpportunityKind::Project,
                stage_id: "stage-prospecting".to_owned(),
                owner: "Marina".to_owned(),
                estimated_value: Decimal::new(100_000, 2),
                expected_close_date: None,
                actual_close_date: None,
                notes: String::new(),
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("opportunity");

        // 150.00 receivable, of which 50.00 is already paid.
        let invoices = SqlInvoiceRepository::new(pool.clone());
        let invoice = invoices
            .create(
                NewInvoice {
                    customer_id: customer_id.clone(),
                    description: "Setup fee".to_owned(),
                    issue_date: today,
                    due_date: today + Duration::days(15),
                    original_value: Decimal::new(15_000, 2),
                    payment_method: "pix".to_owned(),
                },
                &ctx(),
            )
            .await
            .expect("invoice");
        invoices
            .register_payment(&invoice.id, Decimal::new(5_000, 2), &ctx())
            .await
            .expect("partial payment");

        // 80.00 payable.
        SqlExpenseRepository::new(pool.clone())
            .create(
                NewExpense {
                    document_number: "NF-778".to_owned(),
                    supplier_id: None,
                    cost_center_id: None,
                    description: "Tower rent".to_owned(),
                    issue_date: today,
                    due_date: today + Duration::days(10),
                    original_value: Decimal::new(8_000, 2),
                    payment_method: "boleto".to_owned(),
                },
                &ctx(),
            )
            .await
            .expect("expense");

        // A product configured with a minimum it does not meet.
        let product = SqlProductRepository::new(pool.clone())
            .create(NewProduct {
                name: "Patch cord".to_owned(),
                category_name: None,
                kind: ProductKind::Good,
                pricing_method: PricingMethod::Markup,
                standard_cost: Decimal::new(1_000, 2),
                markup_pct: Decimal::new(50, 0),
                list_price: Decimal::ZERO,
                unit: "un".to_owned(),
            })
            .await
            .expect("product");
        SqlStockRepository::new(pool.clone())
            .configure(&product.id, Decimal::new(5, 0), "Main")
            .await
            .expect("stock configured");

        // Two open tickets at high priority, one resolved out of the count.
        let tickets = SqlTicketRepository::new(pool.clone());
        for subject in ["Link down", "Latency spikes"] {
            tickets
                .create(NewTicket {
                    customer_id: customer_id.clone(),
                    asset_id: None,
                    subject: subject.to_owned(),
                    description: String::new(),
                    priority: 2,
                    opened_by: "helpdesk".to_owned(),
                    assigned_to: String::new(),
                })
                .await
                .expect("ticket");
        }
        let resolved = tickets
            .create(NewTicket {
                customer_id: customer_id.clone(),
                asset_id: None,
                subject: "Password reset".to_owned(),
                description: String::new(),
                priority: 4,
                opened_by: "helpdesk".to_owned(),
                assigned_to: String::new(),
            })
            .await
            .expect("ticket");
        tickets.resolve(&resolved.id, "Reset done", 5, &ctx()).await.expect("resolve");

        let summary = reports.dashboard().await.expect("dashboard");

        let prospecting = summary
            .pipeline
            .iter()
            .find(|row| row.stage_id == "stage-prospecting")
            .expect("stage present");
        assert_eq!(prospecting.open_opportunities, 1);
        assert!(summary.pipeline.iter().all(|row| {
            row.stage_id == "stage-prospecting" || row.open_opportunities == 0
        }));

        assert_eq!(summary.receivable_balance, Decimal::new(10_000, 2));
        assert_eq!(summary.payable_balance, Decimal::new(8_000, 2));
        assert_eq!(summary.below_minimum_items, 1);

        assert_eq!(summary.ticket_load.len(), 1);
        assert_eq!(summary.ticket_load[0].priority, 2);
        assert_eq!(summary.ticket_load[0].label, "High");
        assert_eq!(summary.ticket_load[0].open_tickets, 2);
        pool.close().await;
    }

    #[tokio::test]
    async fn an_empty_database_renders_zeroes() {
        let pool = setup_pool().await;
        let summary = SqlReportsRepository::new(pool.clone()).dashboard().await.expect("dashboard");

        assert_eq!(summary.pipeline.len(), 6);
        assert!(summary.pipeline.iter().all(|row| row.open_opportunities == 0));
        assert_eq!(summary.receivable_balance, Decimal::ZERO);
        assert_eq!(summary.payable_balance, Decimal::ZERO);
        assert_eq!(summary.below_minimum_items, 0);
        assert!(summary.ticket_load.is_empty());
        pool.close().await;
    }
}
