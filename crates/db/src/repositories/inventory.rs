//! Stock levels and the movement log.
//!
//! The movement log is the audit trail here: every level change appends a
//! row in the same transaction, so no separate audit events are written.

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use opsdesk_core::domain::inventory::{MovementType, StockItem, StockMovement};
use opsdesk_core::errors::DomainError;
use opsdesk_core::numbering;

use crate::repositories::{parse_decimal, parse_timestamp, OperationContext, RepositoryError};
use crate::DbPool;

pub struct SqlStockRepository {
    pool: DbPool,
}

impl SqlStockRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self) -> Result<Vec<StockItem>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, product_id, quantity_on_hand, minimum_quantity, location
             FROM stock_item ORDER BY location, product_id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(stock_item_from_row).collect()
    }

    pub async fn find_by_product(
        &self,
        product_id: &str,
    ) -> Result<Option<StockItem>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, product_id, quantity_on_hand, minimum_quantity, location
             FROM stock_item WHERE product_id = ?",
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(stock_item_from_row).transpose()
    }

    /// Items at or past their reorder point. Quantities are stored as
    /// decimal strings, so the comparison happens here rather than in SQL.
    pub async fn below_minimum(&self) -> Result<Vec<StockItem>, RepositoryError> {
        let mut items = self.list().await?;
        items.retain(StockItem::is_below_minimum);
        Ok(items)
    }

    /// Manual goods-in. Creates the stock record on first movement.
    pub async fn register_entry(
        &self,
        product_id: &str,
        quantity: Decimal,
        note: &str,
        ctx: &OperationContext,
    ) -> Result<StockMovement, RepositoryError> {
        self.apply_movement(product_id, note, ctx, |item| {
            let resulting = item.receive(quantity)?;
            Ok((MovementType::Entry, quantity, resulting))
        })
        .await
    }

    /// Manual goods-out. Refused when it would drive the level negative,
    /// leaving both the level and the log untouched.
    pub async fn register_exit(
        &self,
        product_id: &str,
        quantity: Decimal,
        note: &str,
        ctx: &OperationContext,
    ) -> Result<StockMovement, RepositoryError> {
        self.apply_movement(product_id, note, ctx, |item| {
            let resulting = item.issue(quantity)?;
            Ok((MovementType::Exit, quantity, resulting))
        })
        .await
    }

    /// Stocktake recount. The movement records the signed delta against the
    /// counted level.
    pub async fn adjust(
        &self,
        product_id: &str,
        counted: Decimal,
        note: &str,
        ctx: &OperationContext,
    ) -> Result<StockMovement, RepositoryError> {
        self.apply_movement(product_id, note, ctx, |item| {
            let delta = item.adjust_to(counted)?;
            Ok((MovementType::Adjustment, delta, counted))
        })
        .await
    }

    async fn apply_movement(
        &self,
        product_id: &str,
        note: &str,
        ctx: &OperationContext,
        mutate: impl FnOnce(
            &mut StockItem,
        )
            -> Result<(MovementType, Decimal, Decimal), DomainError>,
    ) -> Result<StockMovement, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let mut item = stock_item_for_update(&mut tx, product_id).await?;
        let (movement_type, quantity, resulting) = mutate(&mut item)?;

        let movement = StockMovement {
            id: numbering::entity_id("MOV"),
            stock_item_id: item.id.clone(),
            movement_type,
            quantity,
            resulting_quantity: resulting,
            note: note.to_owned(),
            moved_by: ctx.actor.clone(),
            moved_at: Utc::now(),
        };

        persist_level(&mut tx, &item).await?;
        append_movement(&mut tx, &movement).await?;

        tx.commit().await?;
        Ok(movement)
    }

    /// Reorder point and bin location; creates the stock record if needed.
    pub async fn configure(
        &self,
        product_id: &str,
        minimum_quantity: Decimal,
        location: &str,
    ) -> Result<StockItem, RepositoryError> {
        if minimum_quantity.is_sign_negative() {
            return Err(DomainError::Validation(
                "minimum quantity cannot be negative".to_owned(),
            )
            .into());
        }

        let mut tx = self.pool.begin().await?;

        let mut item = stock_item_for_update(&mut tx, product_id).await?;
        item.minimum_quantity = minimum_quantity;
        item.location = location.to_owned();

        sqlx::query("UPDATE stock_item SET minimum_quantity = ?, location = ? WHERE id = ?")
            .bind(item.minimum_quantity.to_string())
            .bind(&item.location)
            .bind(&item.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(item)
    }

    pub async fn movements_for_product(
        &self,
        product_id: &str,
    ) -> Result<Vec<StockMovement>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT m.id, m.stock_item_id, m.movement_type, m.quantity, m.resulting_quantity,
                    m.note, m.moved_by, m.moved_at
             FROM stock_movement m
             JOIN stock_item s ON s.id = m.stock_item_id
             WHERE s.product_id = ?
             ORDER BY m.moved_at DESC, m.id DESC",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(movement_from_row).collect()
    }
}

/// Get-or-create, for callers holding a transaction. New records start at
/// zero on hand with the schema defaults for minimum and location.
pub(crate) async fn stock_item_for_update(
    conn: &mut sqlx::SqliteConnection,
    product_id: &str,
) -> Result<StockItem, RepositoryError> {
    let row = sqlx::query(
        "SELECT id, product_id, quantity_on_hand, minimum_quantity, location
         FROM stock_item WHERE product_id = ?",
    )
    .bind(product_id)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(row) = row {
        return stock_item_from_row(row);
    }

    let item = StockItem {
        id: numbering::entity_id("STK"),
        product_id: product_id.to_owned(),
        quantity_on_hand: Decimal::ZERO,
        minimum_quantity: Decimal::ONE,
        location: "Main".to_owned(),
    };
    sqlx::query(
        "INSERT INTO stock_item (id, product_id, quantity_on_hand, minimum_quantity, location)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&item.id)
    .bind(&item.product_id)
    .bind(item.quantity_on_hand.to_string())
    .bind(item.minimum_quantity.to_string())
    .bind(&item.location)
    .execute(&mut *conn)
    .await?;

    Ok(item)
}

pub(crate) async fn persist_level(
    conn: &mut sqlx::SqliteConnection,
    item: &StockItem,
) -> Result<(), RepositoryError> {
    sqlx::query("UPDATE stock_item SET quantity_on_hand = ? WHERE id = ?")
        .bind(item.quantity_on_hand.to_string())
        .bind(&item.id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub(crate) async fn append_movement(
    conn: &mut sqlx::SqliteConnection,
    movement: &StockMovement,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO stock_movement (id, stock_item_id, movement_type, quantity,
                                     resulting_quantity, note, moved_by, moved_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&movement.id)
    .bind(&movement.stock_item_id)
    .bind(movement.movement_type.as_str())
    .bind(movement.quantity.to_string())
    .bind(movement.resulting_quantity.to_string())
    .bind(&movement.note)
    .bind(&movement.moved_by)
    .bind(movement.moved_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn stock_item_from_row(row: SqliteRow) -> Result<StockItem, RepositoryError> {
    Ok(StockItem {
        id: row.try_get("id")?,
        product_id: row.try_get("product_id")?,
        quantity_on_hand: parse_decimal("quantity_on_hand", row.try_get("quantity_on_hand")?)?,
        minimum_quantity: parse_decimal("minimum_quantity", row.try_get("minimum_quantity")?)?,
        location: row.try_get("location")?,
    })
}

fn movement_from_row(row: SqliteRow) -> Result<StockMovement, RepositoryError> {
    let type_raw: String = row.try_get("movement_type")?;
    let movement_type = MovementType::parse(&type_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown movement type: {type_raw}")))?;

    Ok(StockMovement {
        id: row.try_get("id")?,
        stock_item_id: row.try_get("stock_item_id")?,
        movement_type,
        quantity: parse_decimal("quantity", row.try_get("quantity")?)?,
        resulting_quantity: parse_decimal(
            "resulting_quantity",
            row.try_get("resulting_quantity")?,
        )?,
        note: row.try_get("note")?,
        moved_by: row.try_get("moved_by")?,
        moved_at: parse_timestamp("moved_at", row.try_get("moved_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use opsdesk_core::domain::catalog::{PricingMethod, ProductKind};
    use opsdesk_core::domain::inventory::MovementType;
    use opsdesk_core::errors::DomainError;

    use super::SqlStockRepository;
    use crate::repositories::catalog::{NewProduct, SqlProductRepository};
    use crate::repositories::{OperationContext, RepositoryError};
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn ctx() -> OperationContext {
        OperationContext::new("warehouse", "corr-stock")
    }

    async fn seed_product(pool: &DbPool, name: &str) -> String {
        let repo = SqlProductRepository::new(pool.clone());
        let product = repo
            .create(NewProduct {
                name: name.to_owned(),
                category_name: None,
                kind: ProductKind::Good,
                pricing_method: PricingMethod::Markup,
                standard_cost: Decimal::new(5_000, 2),
                markup_pct: Decimal::new(20, 0),
                list_price: Decimal::ZERO,
                unit: "un".to_owned(),
            })
            .await
            .expect("product");
        product.id
    }

    #[tokio::test]
    async fn entries_and_exits_append_to_the_log() {
        let pool = setup_pool().await;
        let repo = SqlStockRepository::new(pool.clone());
        let product_id = seed_product(&pool, "Switch").await;

        let entry = repo
            .register_entry(&product_id, Decimal::new(10, 0), "initial load", &ctx())
            .await
            .expect("entry");
        assert_eq!(entry.movement_type, MovementType::Entry);
        assert_eq!(entry.resulting_quantity, Decimal::new(10, 0));

        let exit = repo
            .register_exit(&product_id, Decimal::new(4, 0), "order 123", &ctx())
            .await
            .expect("exit");
        assert_eq!(exit.resulting_quantity, Decimal::new(6, 0));

        let item = repo.find_by_product(&product_id).await.expect("find").expect("present");
        assert_eq!(item.quantity_on_hand, Decimal::new(6, 0));

        let log = repo.movements_for_product(&product_id).await.expect("log");
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].movement_type, MovementType::Exit);
        pool.close().await;
    }

    #[tokio::test]
    async fn an_exit_past_the_level_changes_nothing() {
        let pool = setup_pool().await;
        let repo = SqlStockRepository::new(pool.clone());
        let product_id = seed_product(&pool, "Router").await;

        repo.register_entry(&product_id, Decimal::new(3, 0), "", &ctx()).await.expect("entry");

        let error = repo
            .register_exit(&product_id, Decimal::new(5, 0), "", &ctx())
            .await
            .expect_err("insufficient");
        match error {
            RepositoryError::Domain(DomainError::InsufficientStock { requested, available }) => {
                assert_eq!(requested, Decimal::new(5, 0));
                assert_eq!(available, Decimal::new(3, 0));
            }
            other => panic!("expected insufficient stock, got {other:?}"),
        }

        let item = repo.find_by_product(&product_id).await.expect("find").expect("present");
        assert_eq!(item.quantity_on_hand, Decimal::new(3, 0));
        assert_eq!(repo.movements_for_product(&product_id).await.expect("log").len(), 1);
        pool.close().await;
    }

    #[tokio::test]
    async fn a_stocktake_records_the_signed_delta() {
        let pool = setup_pool().await;
        let repo = SqlStockRepository::new(pool.clone());
        let product_id = seed_product(&pool, "Access point").await;

        repo.register_entry(&product_id, Decimal::new(8, 0), "", &ctx()).await.expect("entry");
        let adjustment = repo
            .adjust(&product_id, Decimal::new(5, 0), "stocktake", &ctx())
            .await
            .expect("adjust");

        assert_eq!(adjustment.movement_type, MovementType::Adjustment);
        assert_eq!(adjustment.quantity, Decimal::new(-3, 0));
        assert_eq!(adjustment.resulting_quantity, Decimal::new(5, 0));

        let error =
            repo.adjust(&product_id, Decimal::new(-1, 0), "", &ctx()).await.expect_err("negative");
        assert!(matches!(error, RepositoryError::Domain(DomainError::Validation(_))));
        pool.close().await;
    }

    #[tokio::test]
    async fn below_minimum_flags_items_at_their_reorder_point() {
        let pool = setup_pool().await;
        let repo = SqlStockRepository::new(pool.clone());
        let low = seed_product(&pool, "Patch cord").await;
        let healthy = seed_product(&pool, "Rack").await;

        repo.register_entry(&low, Decimal::new(2, 0), "", &ctx()).await.expect("entry");
        repo.configure(&low, Decimal::new(5, 0), "Main").await.expect("configure");
        repo.register_entry(&healthy, Decimal::new(10, 0), "", &ctx()).await.expect("entry");

        let short = repo.below_minimum().await.expect("below");
        assert_eq!(short.len(), 1);
        assert_eq!(short[0].product_id, low);
        assert_eq!(short[0].minimum_quantity, Decimal::new(5, 0));
        pool.close().await;
    }
}
