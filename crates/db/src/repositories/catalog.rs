//! Products, services, suppliers, and the CSV product import.

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use opsdesk_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use opsdesk_core::domain::catalog::{
    slugify, PricingMethod, Product, ProductCategory, ProductKind, Service, ServiceBilling,
    ServiceCategory, Supplier, SupplierContact, SupplierKind, SupplierPrice,
};
use opsdesk_core::errors::DomainError;
use opsdesk_core::imports::{ImportReport, ParsedImport, ProductRow};
use opsdesk_core::numbering;

use crate::repositories::{
    insert_audit_event, parse_decimal, parse_optional_date, parse_timestamp, parse_u8,
    OperationContext, RepositoryError,
};
use crate::DbPool;

/// Caller-supplied fields for a new product; the SKU and list price are
/// assigned here.
#[derive(Clone, Debug)]
pub struct NewProduct {
    pub name: String,
    pub category_name: Option<String>,
    pub kind: ProductKind,
    pub pricing_method: PricingMethod,
    pub standard_cost: Decimal,
    pub markup_pct: Decimal,
    pub list_price: Decimal,
    pub unit: String,
}

pub struct SqlProductRepository {
    pool: DbPool,
}

impl SqlProductRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// SKUs take their prefix from the category name when it yields three
    /// characters, otherwise from the product kind.
    pub async fn create(&self, new: NewProduct) -> Result<Product, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let category_id = match new.category_name.as_deref() {
            Some(name) if !name.trim().is_empty() => {
                Some(ensure_category(&mut tx, name.trim()).await?)
            }
            _ => None,
        };

        let prefix =
            numbering::sku_prefix(new.category_name.as_deref(), new.kind.default_sku_prefix());
        let sku = next_sku(&mut tx, &prefix).await?;

        let now = Utc::now();
        let mut product = Product {
            id: numbering::entity_id("PRD"),
            sku,
            name: new.name,
            category_id,
            kind: new.kind,
            pricing_method: new.pricing_method,
            standard_cost: new.standard_cost,
            markup_pct: new.markup_pct,
            list_price: new.list_price,
            unit: new.unit,
            active: true,
            created_at: now,
            updated_at: now,
        };
        product.validate()?;
        product.list_price = product.sale_price();

        insert_product(&mut tx, &product).await?;

        tx.commit().await?;
        Ok(product)
    }

    /// The SKU is fixed at creation; everything else follows the caller.
    /// Markup-priced products get their list price recomputed from cost.
    pub async fn save(&self, mut product: Product) -> Result<Product, RepositoryError> {
        product.validate()?;
        product.list_price = product.sale_price();
        product.updated_at = Utc::now();

        sqlx::query(
            "INSERT INTO product (id, sku, name, category_id, kind, pricing_method,
                                  standard_cost, markup_pct, list_price, unit, active,
                                  created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 category_id = excluded.category_id,
                 kind = excluded.kind,
                 pricing_method = excluded.pricing_method,
                 standard_cost = excluded.standard_cost,
                 markup_pct = excluded.markup_pct,
                 list_price = excluded.list_price,
                 unit = excluded.unit,
                 active = excluded.active,
                 updated_at = excluded.updated_at",
        )
        .bind(&product.id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(&product.category_id)
        .bind(product.kind.as_str())
        .bind(product.pricing_method.as_str())
        .bind(product.standard_cost.to_string())
        .bind(product.markup_pct.to_string())
        .bind(product.list_price.to_string())
        .bind(&product.unit)
        .bind(i64::from(product.active))
        .bind(product.created_at.to_rfc3339())
        .bind(product.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(product)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query(&product_select("id = ?")).bind(id).fetch_optional(&self.pool).await?;
        row.map(product_from_row).transpose()
    }

    pub async fn find_by_sku(&self, sku: &str) -> Result<Option<Product>, RepositoryError> {
        let row =
            sqlx::query(&product_select("sku = ?")).bind(sku).fetch_optional(&self.pool).await?;
        row.map(product_from_row).transpose()
    }

    pub async fn list(&self, include_inactive: bool) -> Result<Vec<Product>, RepositoryError> {
        let sql = if include_inactive {
            "SELECT id, sku, name, category_id, kind, pricing_method, standard_cost, markup_pct,
                    list_price, unit, active, created_at, updated_at
             FROM product ORDER BY sku"
        } else {
            "SELECT id, sku, name, category_id, kind, pricing_method, standard_cost, markup_pct,
                    list_price, unit, active, created_at, updated_at
             FROM product WHERE active = 1 ORDER BY sku"
        };
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(product_from_row).collect()
    }

    /// Refused while stock movements, order lines, proposal lines, or
    /// requisition lines reference the product. Supplier prices and an
    /// untouched stock record go with it.
    pub async fn delete(&self, id: &str, ctx: &OperationContext) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let counts = sqlx::query(
            "SELECT
                 (SELECT COUNT(*) FROM stock_movement m
                  JOIN stock_item s ON s.id = m.stock_item_id
                  WHERE s.product_id = ?1) AS movements,
                 (SELECT COUNT(*) FROM purchase_order_line WHERE product_id = ?1) AS order_lines,
                 (SELECT COUNT(*) FROM proposal_line WHERE product_id = ?1) AS proposal_lines,
                 (SELECT COUNT(*) FROM requisition_line WHERE product_id = ?1) AS requisition_lines",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        let blockers: Vec<String> = [
            blocker(counts.try_get("movements")?, "stock movement", "stock movements"),
            blocker(counts.try_get("order_lines")?, "purchase order line", "purchase order lines"),
            blocker(counts.try_get("proposal_lines")?, "proposal line", "proposal lines"),
            blocker(
                counts.try_get("requisition_lines")?,
                "requisition line",
                "requisition lines",
            ),
        ]
        .into_iter()
        .flatten()
        .collect();

        if !blockers.is_empty() {
            return Err(DomainError::DeleteBlocked {
                entity: "product",
                blockers: blockers.join(", "),
            }
            .into());
        }

        sqlx::query("DELETE FROM supplier_price WHERE product_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM stock_item WHERE product_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM product WHERE id = ?").bind(id).execute(&mut *tx).await?;

        let event = AuditEvent::new(
            "product",
            id,
            &ctx.correlation_id,
            AuditCategory::Catalog,
            "product_deleted",
            &ctx.actor,
            AuditOutcome::Success,
        );
        insert_audit_event(&mut tx, &event).await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn list_categories(&self) -> Result<Vec<ProductCategory>, RepositoryError> {
        let rows =
            sqlx::query("SELECT id, name, slug FROM product_category ORDER BY name")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(category_from_row).collect()
    }

    /// Applies a parsed CSV import. Each row commits on its own: a row that
    /// fails validation lands in the report and the rest still import.
    /// Rows carrying a SKU match on it; rows without match on the name.
    pub async fn import(
        &self,
        parsed: ParsedImport,
        ctx: &OperationContext,
    ) -> Result<ImportReport, RepositoryError> {
        let mut report = ImportReport { errors: parsed.errors, ..ImportReport::default() };

        for (line, row) in parsed.rows {
            match self.apply_import_row(&row).await {
                Ok(true) => report.created += 1,
                Ok(false) => report.updated += 1,
                Err(RepositoryError::Domain(error)) => {
                    report.errors.push(format!("line {line}: {error}"));
                }
                Err(other) => return Err(other),
            }
        }

        let event = AuditEvent::new(
            "product",
            "import",
            &ctx.correlation_id,
            AuditCategory::Catalog,
            "import_completed",
            &ctx.actor,
            if report.errors.is_empty() { AuditOutcome::Success } else { AuditOutcome::Rejected },
        )
        .with_metadata("created", report.created.to_string())
        .with_metadata("updated", report.updated.to_string())
        .with_metadata("failed", report.errors.len().to_string());
        let mut conn = self.pool.acquire().await?;
        insert_audit_event(&mut conn, &event).await?;

        Ok(report)
    }

    /// `Ok(true)` created, `Ok(false)` updated.
    async fn apply_import_row(&self, row: &ProductRow) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let claimed_sku = row.sku.as_deref().map(str::trim).filter(|sku| !sku.is_empty());
        let existing_id: Option<String> = match claimed_sku {
            Some(sku) => {
                sqlx::query_scalar("SELECT id FROM product WHERE sku = ?")
                    .bind(sku)
                    .fetch_optional(&mut *tx)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT id FROM product WHERE name = ? ORDER BY sku LIMIT 1")
                    .bind(&row.name)
                    .fetch_optional(&mut *tx)
                    .await?
            }
        };

        let category_id = match row.category.as_deref() {
            Some(name) if !name.trim().is_empty() => {
                Some(ensure_category(&mut tx, name.trim()).await?)
            }
            _ => None,
        };

        let created = match existing_id {
            Some(id) => {
                let current = product_from_row(
                    sqlx::query(&product_select("id = ?")).bind(&id).fetch_one(&mut *tx).await?,
                )?;
                let mut product = Product {
                    name: row.name.clone(),
                    category_id: category_id.or(current.category_id),
                    kind: row.kind,
                    pricing_method: row.pricing_method,
                    standard_cost: row.standard_cost,
                    markup_pct: row.markup_pct,
                    list_price: row.list_price,
                    unit: row.unit.clone(),
                    updated_at: Utc::now(),
                    ..current
                };
                product.validate()?;
                product.list_price = product.sale_price();

                sqlx::query(
                    "UPDATE product SET name = ?, category_id = ?, kind = ?, pricing_method = ?,
                                        standard_cost = ?, markup_pct = ?, list_price = ?,
                                        unit = ?, updated_at = ?
                     WHERE id = ?",
                )
                .bind(&product.name)
                .bind(&product.category_id)
                .bind(product.kind.as_str())
                .bind(product.pricing_method.as_str())
                .bind(product.standard_cost.to_string())
                .bind(product.markup_pct.to_string())
                .bind(product.list_price.to_string())
                .bind(&product.unit)
                .bind(product.updated_at.to_rfc3339())
                .bind(&id)
                .execute(&mut *tx)
                .await?;
                false
            }
            None => {
                let sku = match claimed_sku {
                    Some(sku) => sku.to_owned(),
                    None => {
                        let prefix = numbering::sku_prefix(
                            row.category.as_deref(),
                            row.kind.default_sku_prefix(),
                        );
                        next_sku(&mut tx, &prefix).await?
                    }
                };

                let now = Utc::now();
                let mut product = Product {
                    id: numbering::entity_id("PRD"),
                    sku,
                    name: row.name.clone(),
                    category_id,
                    kind: row.kind,
                    pricing_method: row.pricing_method,
                    standard_cost: row.standard_cost,
                    markup_pct: row.markup_pct,
                    list_price: row.list_price,
                    unit: row.unit.clone(),
                    active: true,
                    created_at: now,
                    updated_at: now,
                };
                product.validate()?;
                product.list_price = product.sale_price();

                insert_product(&mut tx, &product).await?;
                true
            }
        };

        tx.commit().await?;
        Ok(created)
    }
}

pub struct SqlSupplierRepository {
    pool: DbPool,
}

impl SqlSupplierRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, mut supplier: Supplier) -> Result<Supplier, RepositoryError> {
        supplier.validate()?;
        supplier.updated_at = Utc::now();

        sqlx::query(
            "INSERT INTO supplier (id, kind, legal_name, trade_name, tax_id, email, phone,
                                   city, state, rating, notes, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 kind = excluded.kind,
                 legal_name = excluded.legal_name,
                 trade_name = excluded.trade_name,
                 tax_id = excluded.tax_id,
                 email = excluded.email,
                 phone = excluded.phone,
                 city = excluded.city,
                 state = excluded.state,
                 rating = excluded.rating,
                 notes = excluded.notes,
                 updated_at = excluded.updated_at",
        )
        .bind(&supplier.id)
        .bind(supplier.kind.as_str())
        .bind(&supplier.legal_name)
        .bind(&supplier.trade_name)
        .bind(&supplier.tax_id)
        .bind(&supplier.email)
        .bind(&supplier.phone)
        .bind(&supplier.city)
        .bind(&supplier.state)
        .bind(supplier.rating.map(i64::from))
        .bind(&supplier.notes)
        .bind(supplier.created_at.to_rfc3339())
        .bind(supplier.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(supplier)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Supplier>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, kind, legal_name, trade_name, tax_id, email, phone, city, state,
                    rating, notes, created_at, updated_at
             FROM supplier WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(supplier_from_row).transpose()
    }

    pub async fn list(
        &self,
        kind: Option<SupplierKind>,
    ) -> Result<Vec<Supplier>, RepositoryError> {
        let rows = match kind {
            Some(kind) => {
                sqlx::query(
                    "SELECT id, kind, legal_name, trade_name, tax_id, email, phone, city,
                            state, rating, notes, created_at, updated_at
                     FROM supplier WHERE kind = ? ORDER BY legal_name",
                )
                .bind(kind.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, kind, legal_name, trade_name, tax_id, email, phone, city,
                            state, rating, notes, created_at, updated_at
                     FROM supplier ORDER BY legal_name",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.into_iter().map(supplier_from_row).collect()
    }

    pub async fn delete(&self, id: &str, ctx: &OperationContext) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let counts = sqlx::query(
            "SELECT
                 (SELECT COUNT(*) FROM purchase_order WHERE supplier_id = ?1) AS orders,
                 (SELECT COUNT(*) FROM supplier_price WHERE supplier_id = ?1) AS prices,
                 (SELECT COUNT(*) FROM expense WHERE supplier_id = ?1) AS expenses",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        let blockers: Vec<String> = [
            blocker(counts.try_get("orders")?, "purchase order", "purchase orders"),
            blocker(counts.try_get("prices")?, "supplier price", "supplier prices"),
            blocker(counts.try_get("expenses")?, "expense", "expenses"),
        ]
        .into_iter()
        .flatten()
        .collect();

        if !blockers.is_empty() {
            return Err(DomainError::DeleteBlocked {
                entity: "supplier",
                blockers: blockers.join(", "),
            }
            .into());
        }

        sqlx::query("DELETE FROM supplier_contact WHERE supplier_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM supplier WHERE id = ?").bind(id).execute(&mut *tx).await?;

        let event = AuditEvent::new(
            "supplier",
            id,
            &ctx.correlation_id,
            AuditCategory::Catalog,
            "supplier_deleted",
            &ctx.actor,
            AuditOutcome::Success,
        );
        insert_audit_event(&mut tx, &event).await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn save_contact(
        &self,
        contact: SupplierContact,
    ) -> Result<SupplierContact, RepositoryError> {
        sqlx::query(
            "INSERT INTO supplier_contact (id, supplier_id, name, email, phone, role)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 email = excluded.email,
                 phone = excluded.phone,
                 role = excluded.role",
        )
        .bind(&contact.id)
        .bind(&contact.supplier_id)
        .bind(&contact.name)
        .bind(&contact.email)
        .bind(&contact.phone)
        .bind(&contact.role)
        .execute(&self.pool)
        .await?;
        Ok(contact)
    }

    pub async fn list_contacts(
        &self,
        supplier_id: &str,
    ) -> Result<Vec<SupplierContact>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, supplier_id, name, email, phone, role
             FROM supplier_contact WHERE supplier_id = ? ORDER BY name",
        )
        .bind(supplier_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(supplier_contact_from_row).collect()
    }

    pub async fn delete_contact(&self, id: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM supplier_contact WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// One price per (supplier, product); re-quoting replaces it.
    pub async fn upsert_price(
        &self,
        price: SupplierPrice,
    ) -> Result<SupplierPrice, RepositoryError> {
        if price.unit_cost.is_sign_negative() {
            return Err(DomainError::Validation("unit cost cannot be negative".to_owned()).into());
        }

        sqlx::query(
            "INSERT INTO supplier_price (id, supplier_id, product_id, unit_cost, currency,
                                         valid_until)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(supplier_id, product_id) DO UPDATE SET
                 unit_cost = excluded.unit_cost,
                 currency = excluded.currency,
                 valid_until = excluded.valid_until",
        )
        .bind(&price.id)
        .bind(&price.supplier_id)
        .bind(&price.product_id)
        .bind(price.unit_cost.to_string())
        .bind(&price.currency)
        .bind(price.valid_until.map(|date| date.to_string()))
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT id, supplier_id, product_id, unit_cost, currency, valid_until
             FROM supplier_price WHERE supplier_id = ? AND product_id = ?",
        )
        .bind(&price.supplier_id)
        .bind(&price.product_id)
        .fetch_one(&self.pool)
        .await?;
        price_from_row(row)
    }

    pub async fn prices_for_supplier(
        &self,
        supplier_id: &str,
    ) -> Result<Vec<SupplierPrice>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, supplier_id, product_id, unit_cost, currency, valid_until
             FROM supplier_price WHERE supplier_id = ? ORDER BY product_id",
        )
        .bind(supplier_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(price_from_row).collect()
    }

    /// Cheapest quote first, for sourcing comparisons.
    pub async fn prices_for_product(
        &self,
        product_id: &str,
    ) -> Result<Vec<SupplierPrice>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, supplier_id, product_id, unit_cost, currency, valid_until
             FROM supplier_price WHERE product_id = ?
             ORDER BY CAST(unit_cost AS REAL)",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(price_from_row).collect()
    }
}

/// Caller-supplied fields for a new service; the code is assigned here.
#[derive(Clone, Debug)]
pub struct NewService {
    pub name: String,
    pub category_id: Option<String>,
    pub billing: ServiceBilling,
    pub standard_cost: Decimal,
    pub list_price: Decimal,
}

pub struct SqlServiceRepository {
    pool: DbPool,
}

impl SqlServiceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, new: NewService) -> Result<Service, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let category_name: Option<String> = match new.category_id.as_deref() {
            Some(category_id) => {
                sqlx::query_scalar("SELECT name FROM service_category WHERE id = ?")
                    .bind(category_id)
                    .fetch_optional(&mut *tx)
                    .await?
            }
            None => None,
        };

        let prefix = numbering::sku_prefix(category_name.as_deref(), "SRV");
        let latest: Option<String> = sqlx::query_scalar(
            "SELECT code FROM service WHERE code LIKE ? ORDER BY code DESC LIMIT 1",
        )
        .bind(format!("{prefix}-%"))
        .fetch_optional(&mut *tx)
        .await?;
        let sequence = latest.as_deref().and_then(numbering::numeric_tail).unwrap_or(0) + 1;

        let now = Utc::now();
        let service = Service {
            id: numbering::entity_id("SVC"),
            code: numbering::sku(&prefix, sequence),
            name: new.name,
            category_id: new.category_id,
            billing: new.billing,
            standard_cost: new.standard_cost,
            list_price: new.list_price,
            active: true,
            created_at: now,
            updated_at: now,
        };
        service.validate()?;

        sqlx::query(
            "INSERT INTO service (id, code, name, category_id, billing, standard_cost,
                                  list_price, active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&service.id)
        .bind(&service.code)
        .bind(&service.name)
        .bind(&service.category_id)
        .bind(service.billing.as_str())
        .bind(service.standard_cost.to_string())
        .bind(service.list_price.to_string())
        .bind(i64::from(service.active))
        .bind(service.created_at.to_rfc3339())
        .bind(service.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(service)
    }

    pub async fn save(&self, mut service: Service) -> Result<Service, RepositoryError> {
        service.validate()?;
        service.updated_at = Utc::now();

        sqlx::query(
            "UPDATE service SET name = ?, category_id = ?, billing = ?, standard_cost = ?,
                                list_price = ?, active = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&service.name)
        .bind(&service.category_id)
        .bind(service.billing.as_str())
        .bind(service.standard_cost.to_string())
        .bind(service.list_price.to_string())
        .bind(i64::from(service.active))
        .bind(service.updated_at.to_rfc3339())
        .bind(&service.id)
        .execute(&self.pool)
        .await?;

        Ok(service)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Service>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, code, name, category_id, billing, standard_cost, list_price, active,
                    created_at, updated_at
             FROM service WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(service_from_row).transpose()
    }

    pub async fn list(&self, include_inactive: bool) -> Result<Vec<Service>, RepositoryError> {
        let sql = if include_inactive {
            "SELECT id, code, name, category_id, billing, standard_cost, list_price, active,
                    created_at, updated_at
             FROM service ORDER BY code"
        } else {
            "SELECT id, code, name, category_id, billing, standard_cost, list_price, active,
                    created_at, updated_at
             FROM service WHERE active = 1 ORDER BY code"
        };
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(service_from_row).collect()
    }

    pub async fn delete(&self, id: &str, ctx: &OperationContext) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let counts = sqlx::query(
            "SELECT
                 (SELECT COUNT(*) FROM proposal_line WHERE service_id = ?1) AS proposal_lines,
                 (SELECT COUNT(*) FROM requisition_line WHERE service_id = ?1) AS requisition_lines",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        let blockers: Vec<String> = [
            blocker(counts.try_get("proposal_lines")?, "proposal line", "proposal lines"),
            blocker(
                counts.try_get("requisition_lines")?,
                "requisition line",
                "requisition lines",
            ),
        ]
        .into_iter()
        .flatten()
        .collect();

        if !blockers.is_empty() {
            return Err(DomainError::DeleteBlocked {
                entity: "service",
                blockers: blockers.join(", "),
            }
            .into());
        }

        sqlx::query("DELETE FROM service WHERE id = ?").bind(id).execute(&mut *tx).await?;

        let event = AuditEvent::new(
            "service",
            id,
            &ctx.correlation_id,
            AuditCategory::Catalog,
            "service_deleted",
            &ctx.actor,
            AuditOutcome::Success,
        );
        insert_audit_event(&mut tx, &event).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Keyed on the unique category name.
    pub async fn upsert_category(
        &self,
        category: ServiceCategory,
    ) -> Result<ServiceCategory, RepositoryError> {
        sqlx::query(
            "INSERT INTO service_category (id, name, iss_rate_pct) VALUES (?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET iss_rate_pct = excluded.iss_rate_pct",
        )
        .bind(&category.id)
        .bind(&category.name)
        .bind(category.iss_rate_pct.to_string())
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT id, name, iss_rate_pct FROM service_category WHERE name = ?",
        )
        .bind(&category.name)
        .fetch_one(&self.pool)
        .await?;
        service_category_from_row(row)
    }

    pub async fn list_categories(&self) -> Result<Vec<ServiceCategory>, RepositoryError> {
        let rows = sqlx::query("SELECT id, name, iss_rate_pct FROM service_category ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(service_category_from_row).collect()
    }
}

/// Resolves a category by slug, creating it on first sight.
async fn ensure_category(
    conn: &mut sqlx::SqliteConnection,
    name: &str,
) -> Result<String, RepositoryError> {
    let slug = slugify(name);
    let existing: Option<String> =
        sqlx::query_scalar("SELECT id FROM product_category WHERE slug = ?")
            .bind(&slug)
            .fetch_optional(&mut *conn)
            .await?;

    match existing {
        Some(id) => Ok(id),
        None => {
            let id = numbering::entity_id("CAT");
            sqlx::query("INSERT INTO product_category (id, name, slug) VALUES (?, ?, ?)")
                .bind(&id)
                .bind(name)
                .bind(&slug)
                .execute(&mut *conn)
                .await?;
            Ok(id)
        }
    }
}

async fn next_sku(
    conn: &mut sqlx::SqliteConnection,
    prefix: &str,
) -> Result<String, RepositoryError> {
    let latest: Option<String> =
        sqlx::query_scalar("SELECT sku FROM product WHERE sku LIKE ? ORDER BY sku DESC LIMIT 1")
            .bind(format!("{prefix}-%"))
            .fetch_optional(&mut *conn)
            .await?;
    let sequence = latest.as_deref().and_then(numbering::numeric_tail).unwrap_or(0) + 1;
    Ok(numbering::sku(prefix, sequence))
}

async fn insert_product(
    conn: &mut sqlx::SqliteConnection,
    product: &Product,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO product (id, sku, name, category_id, kind, pricing_method, standard_cost,
                              markup_pct, list_price, unit, active, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&product.id)
    .bind(&product.sku)
    .bind(&product.name)
    .bind(&product.category_id)
    .bind(product.kind.as_str())
    .bind(product.pricing_method.as_str())
    .bind(product.standard_cost.to_string())
    .bind(product.markup_pct.to_string())
    .bind(product.list_price.to_string())
    .bind(&product.unit)
    .bind(i64::from(product.active))
    .bind(product.created_at.to_rfc3339())
    .bind(product.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn product_select(filter: &str) -> String {
    format!(
        "SELECT id, sku, name, category_id, kind, pricing_method, standard_cost, markup_pct,
                list_price, unit, active, created_at, updated_at
         FROM product WHERE {filter}"
    )
}

fn blocker(count: i64, singular: &str, plural: &str) -> Option<String> {
    match count {
        0 => None,
        1 => Some(format!("1 {singular}")),
        n => Some(format!("{n} {plural}")),
    }
}

fn product_from_row(row: SqliteRow) -> Result<Product, RepositoryError> {
    let kind_raw: String = row.try_get("kind")?;
    let kind = ProductKind::parse(&kind_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown product kind: {kind_raw}")))?;
    let method_raw: String = row.try_get("pricing_method")?;
    let pricing_method = PricingMethod::parse(&method_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown pricing method: {method_raw}")))?;

    Ok(Product {
        id: row.try_get("id")?,
        sku: row.try_get("sku")?,
        name: row.try_get("name")?,
        category_id: row.try_get("category_id")?,
        kind,
        pricing_method,
        standard_cost: parse_decimal("standard_cost", row.try_get("standard_cost")?)?,
        markup_pct: parse_decimal("markup_pct", row.try_get("markup_pct")?)?,
        list_price: parse_decimal("list_price", row.try_get("list_price")?)?,
        unit: row.try_get("unit")?,
        active: row.try_get::<i64, _>("active")? != 0,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn category_from_row(row: SqliteRow) -> Result<ProductCategory, RepositoryError> {
    Ok(ProductCategory {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
    })
}

fn supplier_from_row(row: SqliteRow) -> Result<Supplier, RepositoryError> {
    let kind_raw: String = row.try_get("kind")?;
    let kind = SupplierKind::parse(&kind_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown supplier kind: {kind_raw}")))?;

    Ok(Supplier {
        id: row.try_get("id")?,
        kind,
        legal_name: row.try_get("legal_name")?,
        trade_name: row.try_get("trade_name")?,
        tax_id: row.try_get("tax_id")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        city: row.try_get("city")?,
        state: row.try_get("state")?,
        rating: row
            .try_get::<Option<i64>, _>("rating")?
            .map(|value| parse_u8("rating", value))
            .transpose()?,
        notes: row.try_get("notes")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn supplier_contact_from_row(row: SqliteRow) -> Result<SupplierContact, RepositoryError> {
    Ok(SupplierContact {
        id: row.try_get("id")?,
        supplier_id: row.try_get("supplier_id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        role: row.try_get("role")?,
    })
}

fn price_from_row(row: SqliteRow) -> Result<SupplierPrice, RepositoryError> {
    Ok(SupplierPrice {
        id: row.try_get("id")?,
        supplier_id: row.try_get("supplier_id")?,
        product_id: row.try_get("product_id")?,
        unit_cost: parse_decimal("unit_cost", row.try_get("unit_cost")?)?,
        currency: row.try_get("currency")?,
        valid_until: parse_optional_date("valid_until", row.try_get("valid_until")?)?,
    })
}

fn service_category_from_row(row: SqliteRow) -> Result<ServiceCategory, RepositoryError> {
    Ok(ServiceCategory {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        iss_rate_pct: parse_decimal("iss_rate_pct", row.try_get("iss_rate_pct")?)?,
    })
}

fn service_from_row(row: SqliteRow) -> Result<Service, RepositoryError> {
    let billing_raw: String = row.try_get("billing")?;
    let billing = ServiceBilling::parse(&billing_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown billing mode: {billing_raw}")))?;

    Ok(Service {
        id: row.try_get("id")?,
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        category_id: row.try_get("category_id")?,
        billing,
        standard_cost: parse_decimal("standard_cost", row.try_get("standard_cost")?)?,
        list_price: parse_decimal("list_price", row.try_get("list_price")?)?,
        active: row.try_get::<i64, _>("active")? != 0,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
