use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::{connect_with_settings, migrations::MIGRATOR};

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "customer_tag",
        "sales_stage",
        "product_category",
        "service_category",
        "cost_center",
        "manufacturer",
        "asset_type",
        "marketing_channel",
        "supplier",
        "customer",
        "customer_tag_link",
        "contact",
        "opportunity",
        "activity",
        "product",
        "supplier_contact",
        "supplier_price",
        "service",
        "proposal",
        "proposal_line",
        "sales_goal",
        "requisition",
        "requisition_line",
        "requisition_approval",
        "purchase_order",
        "purchase_order_line",
        "receipt",
        "stock_item",
        "stock_movement",
        "contract",
        "invoice",
        "expense",
        "asset",
        "service_order",
        "ticket",
        "ticket_interaction",
        "ticket_resolution",
        "marketing_spend",
        "audit_event",
        "idx_contact_customer_id",
        "idx_opportunity_customer_id",
        "idx_opportunity_stage_id",
        "idx_activity_opportunity_id",
        "idx_proposal_opportunity_id",
        "idx_proposal_code",
        "idx_proposal_line_proposal_id",
        "idx_supplier_price_product_id",
        "idx_requisition_status",
        "idx_requisition_line_requisition_id",
        "idx_purchase_order_supplier_id",
        "idx_purchase_order_status",
        "idx_purchase_order_line_order_id",
        "idx_receipt_line_id",
        "idx_stock_movement_item_id",
        "idx_invoice_customer_id",
        "idx_invoice_status",
        "idx_invoice_due_date",
        "idx_expense_supplier_id",
        "idx_expense_due_date",
        "idx_contract_customer_id",
        "idx_contract_next_renewal_date",
        "idx_asset_customer_id",
        "idx_service_order_customer_id",
        "idx_ticket_customer_id",
        "idx_ticket_status",
        "idx_ticket_interaction_ticket_id",
        "idx_audit_event_entity",
        "idx_audit_event_created_at",
    ];

    fn managed_tables() -> impl Iterator<Item = &'static str> {
        MANAGED_SCHEMA_OBJECTS.iter().copied().filter(|name| !name.starts_with("idx_"))
    }

    #[tokio::test]
    async fn migrations_create_baseline_tables() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for table in managed_tables() {
            let count = sqlx::query(
                "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = ?",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .unwrap_or_else(|e| panic!("check {table} table: {e}"))
            .get::<i64, _>("count");

            assert_eq!(count, 1, "expected table {table} after migration");
        }
    }

    #[tokio::test]
    async fn migrations_seed_the_sales_stage_ladder() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let stages = sqlx::query(
            "SELECT name, allows_proposal, is_won FROM sales_stage ORDER BY position",
        )
        .fetch_all(&pool)
        .await
        .expect("load seeded stages");

        assert_eq!(stages.len(), 6);
        assert_eq!(stages[0].get::<String, _>("name"), "Prospecting");
        let won: Vec<String> = stages
            .iter()
            .filter(|row| row.get::<i64, _>("is_won") == 1)
            .map(|row| row.get::<String, _>("name"))
            .collect();
        assert_eq!(won, vec!["Won".to_owned()]);
    }

    #[tokio::test]
    async fn migrations_are_reversible() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        let customer_count = sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = 'customer'",
        )
        .fetch_one(&pool)
        .await
        .expect("check customer table removed")
        .get::<i64, _>("count");

        assert_eq!(customer_count, 0);
    }

    #[tokio::test]
    async fn migrations_up_down_up_preserves_schema_signature() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let initial_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            initial_signature.len(),
            MANAGED_SCHEMA_OBJECTS.len(),
            "initial migration pass should create all managed schema objects",
        );

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        let after_down_signature = managed_schema_signature(&pool).await;
        assert!(
            after_down_signature.is_empty(),
            "managed schema objects should be removed after full undo",
        );

        run_pending(&pool).await.expect("re-run migrations");

        let after_second_up_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            after_second_up_signature, initial_signature,
            "up/down/up should preserve migration-managed schema signature",
        );
    }

    async fn managed_schema_signature(pool: &sqlx::SqlitePool) -> Vec<(String, String, String)> {
        let mut signature: Vec<(String, String, String)> = sqlx::query(
            "SELECT type, name, IFNULL(sql, '') AS sql
             FROM sqlite_master
             WHERE type IN ('table', 'index')",
        )
        .fetch_all(pool)
        .await
        .expect("load schema objects")
        .into_iter()
        .filter_map(|row| {
            let name = row.get::<String, _>("name");
            if MANAGED_SCHEMA_OBJECTS.contains(&name.as_str()) {
                Some((row.get::<String, _>("type"), name, row.get::<String, _>("sql")))
            } else {
                None
            }
        })
        .collect();
        signature.sort();
        signature
    }
}
