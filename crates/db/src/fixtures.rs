use crate::connection::DbPool;
use crate::repositories::{parse_decimal, RepositoryError};
use rust_decimal::Decimal;
use sqlx::Executor;

/// Expected shape of the demo dataset, one block per business module.
/// `config/fixtures/demo_seed_contract.json` mirrors these constants for
/// tooling outside the crate.
const SEED_MODULES: &[ModuleSeedContract] = &[
    ModuleSeedContract {
        module: "crm",
        description: "Two customers, an open pipeline, and an accepted proposal with July goals",
        tables: &[
            TableCount { table: "customer", id_column: "id", rows: 2 },
            TableCount { table: "customer_tag", id_column: "id", rows: 1 },
            TableCount { table: "customer_tag_link", id_column: "customer_id", rows: 1 },
            TableCount { table: "contact", id_column: "id", rows: 2 },
            TableCount { table: "opportunity", id_column: "id", rows: 2 },
            TableCount { table: "activity", id_column: "id", rows: 1 },
            TableCount { table: "proposal", id_column: "id", rows: 1 },
            TableCount { table: "proposal_line", id_column: "id", rows: 2 },
            TableCount { table: "sales_goal", id_column: "id", rows: 2 },
        ],
    },
    ModuleSeedContract {
        module: "catalog",
        description: "A distributor, a utility supplier, two stocked products, and an installation service",
        tables: &[
            TableCount { table: "supplier", id_column: "id", rows: 2 },
            TableCount { table: "supplier_price", id_column: "id", rows: 1 },
            TableCount { table: "product", id_column: "id", rows: 2 },
            TableCount { table: "service", id_column: "id", rows: 1 },
            TableCount { table: "cost_center", id_column: "id", rows: 1 },
        ],
    },
    ModuleSeedContract {
        module: "purchasing",
        description: "An approved requisition converted into a fully received purchase order",
        tables: &[
            TableCount { table: "requisition", id_column: "id", rows: 1 },
            TableCount { table: "requisition_line", id_column: "id", rows: 1 },
            TableCount { table: "requisition_approval", id_column: "id", rows: 1 },
            TableCount { table: "purchase_order", id_column: "id", rows: 1 },
            TableCount { table: "purchase_order_line", id_column: "id", rows: 1 },
            TableCount { table: "receipt", id_column: "id", rows: 2 },
        ],
    },
    ModuleSeedContract {
        module: "inventory",
        description: "Stock levels fed by the order receipts, with the router below its minimum",
        tables: &[
            TableCount { table: "stock_item", id_column: "id", rows: 2 },
            TableCount { table: "stock_movement", id_column: "id", rows: 4 },
        ],
    },
    ModuleSeedContract {
        module: "contracts",
        description: "An active revenue contract inside the renewal window and a supplier expense contract",
        tables: &[TableCount { table: "contract", id_column: "id", rows: 2 }],
    },
    ModuleSeedContract {
        module: "finance",
        description: "A settled contract bill, an open invoice, an overdue one, and two payables",
        tables: &[
            TableCount { table: "invoice", id_column: "id", rows: 3 },
            TableCount { table: "expense", id_column: "id", rows: 2 },
        ],
    },
    ModuleSeedContract {
        module: "operations",
        description: "A tracked radio, a service order in progress, and two helpdesk tickets",
        tables: &[
            TableCount { table: "manufacturer", id_column: "id", rows: 1 },
            TableCount { table: "asset_type", id_column: "id", rows: 1 },
            TableCount { table: "asset", id_column: "id", rows: 1 },
            TableCount { table: "service_order", id_column: "id", rows: 1 },
            TableCount { table: "ticket", id_column: "id", rows: 2 },
            TableCount { table: "ticket_interaction", id_column: "id", rows: 2 },
            TableCount { table: "ticket_resolution", id_column: "id", rows: 1 },
        ],
    },
    ModuleSeedContract {
        module: "marketing",
        description: "Channel spend across three months to feed the 2026 acquisition cost report",
        tables: &[
            TableCount { table: "marketing_channel", id_column: "id", rows: 2 },
            TableCount { table: "marketing_spend", id_column: "id", rows: 4 },
        ],
    },
    ModuleSeedContract {
        module: "audit",
        description: "The trail behind the proposal, the purchase flow, and the contract activation",
        tables: &[TableCount { table: "audit_event", id_column: "id", rows: 4 }],
    },
];

/// Cleanup statements in foreign-key order. The expense link on the
/// purchase order is cleared first because the two tables reference each
/// other.
const CLEAN_STATEMENTS: &[&str] = &[
    "DELETE FROM audit_event WHERE id LIKE 'demo-%'",
    "DELETE FROM marketing_spend WHERE id LIKE 'demo-%'",
    "DELETE FROM marketing_channel WHERE id LIKE 'demo-%'",
    "DELETE FROM ticket_resolution WHERE id LIKE 'demo-%'",
    "DELETE FROM ticket_interaction WHERE id LIKE 'demo-%'",
    "DELETE FROM ticket WHERE id LIKE 'demo-%'",
    "DELETE FROM service_order WHERE id LIKE 'demo-%'",
    "DELETE FROM asset WHERE id LIKE 'demo-%'",
    "DELETE FROM asset_type WHERE id LIKE 'demo-%'",
    "DELETE FROM manufacturer WHERE id LIKE 'demo-%'",
    "DELETE FROM invoice WHERE id LIKE 'demo-%'",
    "DELETE FROM contract WHERE id LIKE 'demo-%'",
    "UPDATE purchase_order SET linked_expense_id = NULL WHERE id LIKE 'demo-%'",
    "DELETE FROM expense WHERE id LIKE 'demo-%'",
    "DELETE FROM stock_movement WHERE id LIKE 'demo-%'",
    "DELETE FROM stock_item WHERE id LIKE 'demo-%'",
    "DELETE FROM receipt WHERE id LIKE 'demo-%'",
    "DELETE FROM purchase_order_line WHERE id LIKE 'demo-%'",
    "DELETE FROM purchase_order WHERE id LIKE 'demo-%'",
    "DELETE FROM requisition_approval WHERE id LIKE 'demo-%'",
    "DELETE FROM requisition_line WHERE id LIKE 'demo-%'",
    "DELETE FROM requisition WHERE id LIKE 'demo-%'",
    "DELETE FROM sales_goal WHERE id LIKE 'demo-%'",
    "DELETE FROM proposal_line WHERE id LIKE 'demo-%'",
    "DELETE FROM proposal WHERE id LIKE 'demo-%'",
    "DELETE FROM activity WHERE id LIKE 'demo-%'",
    "DELETE FROM opportunity WHERE id LIKE 'demo-%'",
    "DELETE FROM supplier_price WHERE id LIKE 'demo-%'",
    "DELETE FROM service WHERE id LIKE 'demo-%'",
    "DELETE FROM product WHERE id LIKE 'demo-%'",
    "DELETE FROM cost_center WHERE id LIKE 'demo-%'",
    "DELETE FROM contact WHERE id LIKE 'demo-%'",
    "DELETE FROM customer_tag_link WHERE customer_id LIKE 'demo-%'",
    "DELETE FROM customer_tag WHERE id LIKE 'demo-%'",
    "DELETE FROM customer WHERE id LIKE 'demo-%'",
    "DELETE FROM supplier WHERE id LIKE 'demo-%'",
];

/// Demo company dataset.
///
/// One small connectivity integrator with a closed deal threaded through
/// every module: the accepted proposal became a contract, the stock for it
/// came in through purchasing, the first bill is settled, and the helpdesk
/// has live work. `load` is idempotent, rows carry the `demo-` id prefix,
/// and `clean` removes only those rows.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    /// SQL fixture content for the demo dataset.
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed.sql");

    /// Load the demo dataset into the database, replacing any earlier load.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;

        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        let modules_seeded = SEED_MODULES
            .iter()
            .map(|module| ModuleSeedInfo {
                module: module.module,
                description: module.description,
            })
            .collect::<Vec<_>>();

        Ok(SeedResult { modules_seeded })
    }

    /// Verify that the loaded rows match the dataset contract.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for module in SEED_MODULES {
            for table in module.tables {
                let count: i64 = sqlx::query_scalar(&format!(
                    "SELECT COUNT(1) FROM {} WHERE {} LIKE 'demo-%'",
                    table.table, table.id_column
                ))
                .fetch_one(pool)
                .await?;
                checks.push((table.table, count == table.rows));
            }
        }

        checks.push(("contract-renewal-window", Self::verify_renewal_window(pool).await?));
        checks.push(("contract-proposal-anchor", Self::verify_proposal_anchor(pool).await?));
        checks.push(("order-received-in-full", Self::verify_received_order(pool).await?));
        checks.push(("order-expense-linkage", Self::verify_expense_linkage(pool).await?));
        checks.push(("stock-movement-trail", Self::verify_stock_trail(pool).await?));
        checks.push(("stock-below-minimum", Self::verify_below_minimum(pool).await?));

        let receivable = Self::outstanding_total(
            pool,
            "SELECT balance_value FROM invoice
             WHERE id LIKE 'demo-%' AND settlement_date IS NULL",
        )
        .await?;
        checks.push(("receivable-balance", receivable == Decimal::new(245_000, 2)));

        let payable = Self::outstanding_total(
            pool,
            "SELECT balance_value FROM expense
             WHERE id LIKE 'demo-%' AND settlement_date IS NULL",
        )
        .await?;
        checks.push(("payable-balance", payable == Decimal::new(141_500, 2)));

        checks.push(("resolved-ticket-record", Self::verify_resolved_ticket(pool).await?));

        let spend_rows: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM marketing_spend WHERE id LIKE 'demo-%' AND year = 2026",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("marketing-spend-year", spend_rows == 4));

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    async fn verify_renewal_window(pool: &DbPool) -> Result<bool, RepositoryError> {
        let ok: i64 = sqlx::query_scalar(
            "SELECT EXISTS(
                 SELECT 1 FROM contract
                 WHERE id = 'demo-ctr-fibra' AND kind = 'revenue'
                   AND status = 'active'
                   AND next_renewal_date BETWEEN date('now') AND date('now', '+30 days'))",
        )
        .fetch_one(pool)
        .await?;
        Ok(ok == 1)
    }

    async fn verify_proposal_anchor(pool: &DbPool) -> Result<bool, RepositoryError> {
        let ok: i64 = sqlx::query_scalar(
            "SELECT EXISTS(
                 SELECT 1 FROM contract c
                 JOIN proposal p ON p.id = c.proposal_id
                 WHERE c.id = 'demo-ctr-fibra' AND p.status = 'accepted'
                   AND c.number = 'CTR-' || p.code)",
        )
        .fetch_one(pool)
        .await?;
        Ok(ok == 1)
    }

    async fn verify_received_order(pool: &DbPool) -> Result<bool, RepositoryError> {
        let ok: i64 = sqlx::query_scalar(
            "SELECT EXISTS(
                 SELECT 1 FROM purchase_order o
                 JOIN purchase_order_line l ON l.purchase_order_id = o.id
                 WHERE o.id = 'demo-po-fieldkits' AND o.status = 'received'
                   AND l.quantity_received = l.quantity_ordered)",
        )
        .fetch_one(pool)
        .await?;
        Ok(ok == 1)
    }

    async fn verify_expense_linkage(pool: &DbPool) -> Result<bool, RepositoryError> {
        let ok: i64 = sqlx::query_scalar(
            "SELECT EXISTS(
                 SELECT 1 FROM purchase_order o
                 JOIN expense e ON e.id = o.linked_expense_id
                 WHERE o.id = 'demo-po-fieldkits'
                   AND e.purchase_order_id = o.id
                   AND e.document_number = o.code)",
        )
        .fetch_one(pool)
        .await?;
        Ok(ok == 1)
    }

    /// Every stock level must equal the resulting quantity of its latest
    /// movement, exactly what the application maintains.
    async fn verify_stock_trail(pool: &DbPool) -> Result<bool, RepositoryError> {
        let mismatched: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM stock_item s
             WHERE s.id LIKE 'demo-%'
               AND s.quantity_on_hand <> (
                   SELECT m.resulting_quantity FROM stock_movement m
                   WHERE m.stock_item_id = s.id
                   ORDER BY m.moved_at DESC, m.rowid DESC LIMIT 1)",
        )
        .fetch_one(pool)
        .await?;
        Ok(mismatched == 0)
    }

    async fn verify_below_minimum(pool: &DbPool) -> Result<bool, RepositoryError> {
        let ok: i64 = sqlx::query_scalar(
            "SELECT EXISTS(
                 SELECT 1 FROM stock_item
                 WHERE id = 'demo-stk-router'
                   AND CAST(quantity_on_hand AS REAL) < CAST(minimum_quantity AS REAL))",
        )
        .fetch_one(pool)
        .await?;
        Ok(ok == 1)
    }

    async fn verify_resolved_ticket(pool: &DbPool) -> Result<bool, RepositoryError> {
        let ok: i64 = sqlx::query_scalar(
            "SELECT EXISTS(
                 SELECT 1 FROM ticket t
                 JOIN ticket_resolution r ON r.ticket_id = t.id
                 WHERE t.id = 'demo-tic-wifi' AND t.status = 'resolved'
                   AND r.minutes_spent = 40)",
        )
        .fetch_one(pool)
        .await?;
        Ok(ok == 1)
    }

    async fn outstanding_total(pool: &DbPool, query: &str) -> Result<Decimal, RepositoryError> {
        let balances: Vec<String> = sqlx::query_scalar(query).fetch_all(pool).await?;
        let mut total = Decimal::ZERO;
        for raw in balances {
            total += parse_decimal("balance_value", raw)?;
        }
        Ok(total)
    }

    /// Remove the demo rows, leaving everything else untouched.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;
        for statement in CLEAN_STATEMENTS {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct ModuleSeedContract {
    module: &'static str,
    description: &'static str,
    tables: &'static [TableCount],
}

#[derive(Debug, Clone, Copy)]
struct TableCount {
    table: &'static str,
    id_column: &'static str,
    rows: i64,
}

#[derive(Debug)]
pub struct SeedResult {
    pub modules_seeded: Vec<ModuleSeedInfo>,
}

#[derive(Debug)]
pub struct ModuleSeedInfo {
    pub module: &'static str,
    pub description: &'static str,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
