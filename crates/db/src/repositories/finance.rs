//! Receivables and payables.
//!
//! Every write path runs the document through its recalculation first, so
//! stored totals, balances, and statuses never drift from the value columns.

use chrono::{Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use opsdesk_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use opsdesk_core::domain::finance::{
    Amounts, Expense, ExpenseStatus, Invoice, InvoiceOrigin, InvoiceStatus,
};
use opsdesk_core::errors::DomainError;
use opsdesk_core::numbering;

use crate::repositories::{
    insert_audit_event, parse_date, parse_decimal, parse_optional_date, parse_string_list,
    parse_timestamp, OperationContext, RepositoryError,
};
use crate::DbPool;

/// Caller-supplied fields for a manual receivable; the number, totals, and
/// status are assigned here.
#[derive(Clone, Debug)]
pub struct NewInvoice {
    pub customer_id: String,
    pub description: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub original_value: Decimal,
    pub payment_method: String,
}

/// Caller-supplied fields for a manual payable. The document number is the
/// counterparty's, so it arrives free-form.
#[derive(Clone, Debug)]
pub struct NewExpense {
    pub document_number: String,
    pub supplier_id: Option<String>,
    pub cost_center_id: Option<String>,
    pub description: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub original_value: Decimal,
    pub payment_method: String,
}

pub struct SqlInvoiceRepository {
    pool: DbPool,
}

impl SqlInvoiceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Numbers run yearly: the issue year plus a seven-digit sequence.
    pub async fn create(
        &self,
        new: NewInvoice,
        ctx: &OperationContext,
    ) -> Result<Invoice, RepositoryError> {
        if new.original_value.is_sign_negative() {
            return Err(
                DomainError::Validation("invoice value cannot be negative".to_owned()).into()
            );
        }

        let mut tx = self.pool.begin().await?;

        let year = new.issue_date.year();
        let sequence = next_invoice_sequence(&mut tx, year).await?;

        let now = Utc::now();
        let mut invoice = Invoice {
            id: numbering::entity_id("INV"),
            number: numbering::invoice_number(year, sequence),
            customer_id: new.customer_id,
            origin: InvoiceOrigin::Manual,
            description: new.description,
            issue_date: new.issue_date,
            due_date: new.due_date,
            settlement_date: None,
            amounts: Amounts { original: new.original_value, ..Amounts::default() },
            payment_method: new.payment_method,
            status: InvoiceStatus::Open,
            contract_id: None,
            attachments: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        invoice.recalculate(Utc::now().date_naive());

        insert_invoice(&mut tx, &invoice).await?;

        let event = AuditEvent::new(
            "invoice",
            &invoice.id,
            &ctx.correlation_id,
            AuditCategory::Finance,
            "invoice_created",
            &ctx.actor,
            AuditOutcome::Success,
        )
        .with_metadata("number", &invoice.number);
        insert_audit_event(&mut tx, &event).await?;

        tx.commit().await?;
        Ok(invoice)
    }

    /// The number and origin are fixed at creation; values and dates follow
    /// the caller, then the document is recalculated.
    pub async fn save(&self, mut invoice: Invoice) -> Result<Invoice, RepositoryError> {
        invoice.recalculate(Utc::now().date_naive());
        invoice.updated_at = Utc::now();

        let result = sqlx::query(
            "UPDATE invoice SET customer_id = ?, description = ?, issue_date = ?, due_date = ?,
                                settlement_date = ?, original_value = ?, discount_value = ?,
                                interest_value = ?, penalty_value = ?, surcharge_value = ?,
                                total_value = ?, paid_value = ?, balance_value = ?,
                                payment_method = ?, status = ?, contract_id = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&invoice.customer_id)
        .bind(&invoice.description)
        .bind(invoice.issue_date.to_string())
        .bind(invoice.due_date.to_string())
        .bind(invoice.settlement_date.map(|date| date.to_string()))
        .bind(invoice.amounts.original.to_string())
        .bind(invoice.amounts.discount.to_string())
        .bind(invoice.amounts.interest.to_string())
        .bind(invoice.amounts.penalty.to_string())
        .bind(invoice.amounts.surcharge.to_string())
        .bind(invoice.amounts.total.to_string())
        .bind(invoice.amounts.paid.to_string())
        .bind(invoice.amounts.balance.to_string())
        .bind(&invoice.payment_method)
        .bind(invoice.status.as_str())
        .bind(&invoice.contract_id)
        .bind(invoice.updated_at.to_rfc3339())
        .bind(&invoice.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound.into());
        }
        Ok(invoice)
    }

    pub async fn register_payment(
        &self,
        id: &str,
        amount: Decimal,
        ctx: &OperationContext,
    ) -> Result<Invoice, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let mut invoice = invoice_from_row(
            sqlx::query(&invoice_select("id = ?")).bind(id).fetch_one(&mut *tx).await?,
        )?;
        invoice.register_payment(amount, Utc::now().date_naive())?;
        invoice.updated_at = Utc::now();

        persist_invoice_amounts(&mut tx, &invoice).await?;

        let event = AuditEvent::new(
            "invoice",
            id,
            &ctx.correlation_id,
            AuditCategory::Finance,
            "payment_registered",
            &ctx.actor,
            AuditOutcome::Success,
        )
        .with_metadata("amount", amount.to_string())
        .with_metadata("status", invoice.status.as_str());
        insert_audit_event(&mut tx, &event).await?;

        tx.commit().await?;
        Ok(invoice)
    }

    pub async fn cancel(&self, id: &str, ctx: &OperationContext) -> Result<Invoice, RepositoryError> {
        self.freeze(id, InvoiceStatus::Cancelled, "invoice_cancelled", ctx).await
    }

    /// Marks the document replaced by a renegotiated one; the balance stays
    /// for the record but stops moving.
    pub async fn mark_renegotiated(
        &self,
        id: &str,
        ctx: &OperationContext,
    ) -> Result<Invoice, RepositoryError> {
        self.freeze(id, InvoiceStatus::Renegotiated, "invoice_renegotiated", ctx).await
    }

    async fn freeze(
        &self,
        id: &str,
        next: InvoiceStatus,
        action: &str,
        ctx: &OperationContext,
    ) -> Result<Invoice, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let mut invoice = invoice_from_row(
            sqlx::query(&invoice_select("id = ?")).bind(id).fetch_one(&mut *tx).await?,
        )?;
        if invoice.status.is_frozen() {
            return Err(DomainError::Validation(format!(
                "invoice {} is already {}",
                invoice.number,
                invoice.status.as_str()
            ))
            .into());
        }
        invoice.status = next;
        invoice.updated_at = Utc::now();

        sqlx::query("UPDATE invoice SET status = ?, updated_at = ? WHERE id = ?")
            .bind(invoice.status.as_str())
            .bind(invoice.updated_at.to_rfc3339())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let event = AuditEvent::new(
            "invoice",
            id,
            &ctx.correlation_id,
            AuditCategory::Finance,
            action,
            &ctx.actor,
            AuditOutcome::Success,
        );
        insert_audit_event(&mut tx, &event).await?;

        tx.commit().await?;
        Ok(invoice)
    }

    pub async fn attach_file(&self, id: &str, path: &str) -> Result<Invoice, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let mut invoice = invoice_from_row(
            sqlx::query(&invoice_select("id = ?")).bind(id).fetch_one(&mut *tx).await?,
        )?;
        invoice.attachments.push(path.to_owned());
        invoice.updated_at = Utc::now();

        sqlx::query("UPDATE invoice SET attachments = ?, updated_at = ? WHERE id = ?")
            .bind(serde_json::to_string(&invoice.attachments).map_err(|error| {
                RepositoryError::Decode(format!("attachments serialize: {error}"))
            })?)
            .bind(invoice.updated_at.to_rfc3339())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(invoice)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Invoice>, RepositoryError> {
        let row = sqlx::query(&invoice_select("id = ?")).bind(id).fetch_optional(&self.pool).await?;
        row.map(invoice_from_row).transpose()
    }

    pub async fn list(
        &self,
        status: Option<InvoiceStatus>,
    ) -> Result<Vec<Invoice>, RepositoryError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&invoice_select("status = ? ORDER BY due_date, number"))
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query(&invoice_select("1 = 1 ORDER BY due_date, number"))
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(invoice_from_row).collect()
    }

    /// Sweeps open documents past their due date. Partial, settled, and
    /// frozen documents keep their status.
    pub async fn refresh_overdue(&self, today: NaiveDate) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE invoice SET status = 'overdue', updated_at = ?
             WHERE status = 'open' AND due_date < ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(today.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

pub struct SqlExpenseRepository {
    pool: DbPool,
}

impl SqlExpenseRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        new: NewExpense,
        ctx: &OperationContext,
    ) -> Result<Expense, RepositoryError> {
        if new.original_value.is_sign_negative() {
            return Err(
                DomainError::Validation("expense value cannot be negative".to_owned()).into()
            );
        }

        let now = Utc::now();
        let mut expense = Expense {
            id: numbering::entity_id("EXP"),
            document_number: new.document_number,
            supplier_id: new.supplier_id,
            purchase_order_id: None,
            cost_center_id: new.cost_center_id,
            description: new.description,
            issue_date: new.issue_date,
            due_date: new.due_date,
            settlement_date: None,
            amounts: Amounts { original: new.original_value, ..Amounts::default() },
            payment_method: new.payment_method,
            status: ExpenseStatus::Pending,
            attachments: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        expense.recalculate(Utc::now().date_naive());

        let mut tx = self.pool.begin().await?;
        insert_expense(&mut tx, &expense).await?;

        let event = AuditEvent::new(
            "expense",
            &expense.id,
            &ctx.correlation_id,
            AuditCategory::Finance,
            "expense_created",
            &ctx.actor,
            AuditOutcome::Success,
        );
        insert_audit_event(&mut tx, &event).await?;

        tx.commit().await?;
        Ok(expense)
    }

    pub async fn save(&self, mut expense: Expense) -> Result<Expense, RepositoryError> {
        expense.recalculate(Utc::now().date_naive());
        expense.updated_at = Utc::now();

        let result = sqlx::query(
            "UPDATE expense SET document_number = ?, supplier_id = ?, cost_center_id = ?,
                                description = ?, issue_date = ?, due_date = ?,
                                settlement_date = ?, original_value = ?, discount_value = ?,
                                interest_value = ?, penalty_value = ?, surcharge_value = ?,
                                total_value = ?, paid_value = ?, balance_value = ?,
                                payment_method = ?, status = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&expense.document_number)
        .bind(&expense.supplier_id)
        .bind(&expense.cost_center_id)
        .bind(&expense.description)
        .bind(expense.issue_date.to_string())
        .bind(expense.due_date.to_string())
        .bind(expense.settlement_date.map(|date| date.to_string()))
        .bind(expense.amounts.original.to_string())
        .bind(expense.amounts.discount.to_string())
        .bind(expense.amounts.interest.to_string())
        .bind(expense.amounts.penalty.to_string())
        .bind(expense.amounts.surcharge.to_string())
        .bind(expense.amounts.total.to_string())
        .bind(expense.amounts.paid.to_string())
        .bind(expense.amounts.balance.to_string())
        .bind(&expense.payment_method)
        .bind(expense.status.as_str())
        .bind(expense.updated_at.to_rfc3339())
        .bind(&expense.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound.into());
        }
        Ok(expense)
    }

    pub async fn register_payment(
        &self,
        id: &str,
        amount: Decimal,
        ctx: &OperationContext,
    ) -> Result<Expense, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let mut expense = expense_from_row(
            sqlx::query(&expense_select("id = ?")).bind(id).fetch_one(&mut *tx).await?,
        )?;
        expense.register_payment(amount, Utc::now().date_naive())?;
        expense.updated_at = Utc::now();

        sqlx::query(
            "UPDATE expense SET settlement_date = ?, total_value = ?, paid_value = ?,
                                balance_value = ?, status = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(expense.settlement_date.map(|date| date.to_string()))
        .bind(expense.amounts.total.to_string())
        .bind(expense.amounts.paid.to_string())
        .bind(expense.amounts.balance.to_string())
        .bind(expense.status.as_str())
        .bind(expense.updated_at.to_rfc3339())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let event = AuditEvent::new(
            "expense",
            id,
            &ctx.correlation_id,
            AuditCategory::Finance,
            "payment_registered",
            &ctx.actor,
            AuditOutcome::Success,
        )
        .with_metadata("amount", amount.to_string())
        .with_metadata("status", expense.status.as_str());
        insert_audit_event(&mut tx, &event).await?;

        tx.commit().await?;
        Ok(expense)
    }

    pub async fn cancel(&self, id: &str, ctx: &OperationContext) -> Result<Expense, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let mut expense = expense_from_row(
            sqlx::query(&expense_select("id = ?")).bind(id).fetch_one(&mut *tx).await?,
        )?;
        if expense.status == ExpenseStatus::Cancelled {
            return Err(DomainError::Validation(format!(
                "expense {} is already cancelled",
                expense.document_number
            ))
            .into());
        }
        expense.status = ExpenseStatus::Cancelled;
        expense.updated_at = Utc::now();

        sqlx::query("UPDATE expense SET status = ?, updated_at = ? WHERE id = ?")
            .bind(expense.status.as_str())
            .bind(expense.updated_at.to_rfc3339())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let event = AuditEvent::new(
            "expense",
            id,
            &ctx.correlation_id,
            AuditCategory::Finance,
            "expense_cancelled",
            &ctx.actor,
            AuditOutcome::Success,
        );
        insert_audit_event(&mut tx, &event).await?;

        tx.commit().await?;
        Ok(expense)
    }

    pub async fn attach_file(&self, id: &str, path: &str) -> Result<Expense, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let mut expense = expense_from_row(
            sqlx::query(&expense_select("id = ?")).bind(id).fetch_one(&mut *tx).await?,
        )?;
        expense.attachments.push(path.to_owned());
        expense.updated_at = Utc::now();

        sqlx::query("UPDATE expense SET attachments = ?, updated_at = ? WHERE id = ?")
            .bind(serde_json::to_string(&expense.attachments).map_err(|error| {
                RepositoryError::Decode(format!("attachments serialize: {error}"))
            })?)
            .bind(expense.updated_at.to_rfc3339())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(expense)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Expense>, RepositoryError> {
        let row = sqlx::query(&expense_select("id = ?")).bind(id).fetch_optional(&self.pool).await?;
        row.map(expense_from_row).transpose()
    }

    pub async fn list(
        &self,
        status: Option<ExpenseStatus>,
    ) -> Result<Vec<Expense>, RepositoryError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&expense_select("status = ? ORDER BY due_date, document_number"))
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query(&expense_select("1 = 1 ORDER BY due_date, document_number"))
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(expense_from_row).collect()
    }

    pub async fn refresh_overdue(&self, today: NaiveDate) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE expense SET status = 'overdue', updated_at = ?
             WHERE status = 'pending' AND due_date < ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(today.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

/// Scans the issue year's numbers inside the caller's transaction.
pub(crate) async fn next_invoice_sequence(
    conn: &mut sqlx::SqliteConnection,
    year: i32,
) -> Result<u32, RepositoryError> {
    let latest: Option<String> = sqlx::query_scalar(
        "SELECT number FROM invoice WHERE number LIKE ? ORDER BY number DESC LIMIT 1",
    )
    .bind(format!("{year}-%"))
    .fetch_optional(&mut *conn)
    .await?;
    Ok(latest.as_deref().and_then(numbering::numeric_tail).unwrap_or(0) + 1)
}

pub(crate) async fn insert_invoice(
    conn: &mut sqlx::SqliteConnection,
    invoice: &Invoice,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO invoice (id, number, customer_id, origin, description, issue_date,
                              due_date, settlement_date, original_value, discount_value,
                              interest_value, penalty_value, surcharge_value, total_value,
                              paid_value, balance_value, payment_method, status, contract_id,
                              attachments, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&invoice.id)
    .bind(&invoice.number)
    .bind(&invoice.customer_id)
    .bind(invoice.origin.as_str())
    .bind(&invoice.description)
    .bind(invoice.issue_date.to_string())
    .bind(invoice.due_date.to_string())
    .bind(invoice.settlement_date.map(|date| date.to_string()))
    .bind(invoice.amounts.original.to_string())
    .bind(invoice.amounts.discount.to_string())
    .bind(invoice.amounts.interest.to_string())
    .bind(invoice.amounts.penalty.to_string())
    .bind(invoice.amounts.surcharge.to_string())
    .bind(invoice.amounts.total.to_string())
    .bind(invoice.amounts.paid.to_string())
    .bind(invoice.amounts.balance.to_string())
    .bind(&invoice.payment_method)
    .bind(invoice.status.as_str())
    .bind(&invoice.contract_id)
    .bind(
        serde_json::to_string(&invoice.attachments)
            .map_err(|error| RepositoryError::Decode(format!("attachments serialize: {error}")))?,
    )
    .bind(invoice.created_at.to_rfc3339())
    .bind(invoice.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn insert_expense(
    conn: &mut sqlx::SqliteConnection,
    expense: &Expense,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO expense (id, document_number, supplier_id, purchase_order_id,
                              cost_center_id, description, issue_date, due_date,
                              settlement_date, original_value, discount_value, interest_value,
                              penalty_value, surcharge_value, total_value, paid_value,
                              balance_value, payment_method, status, attachments, created_at,
                              updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&expense.id)
    .bind(&expense.document_number)
    .bind(&expense.supplier_id)
    .bind(&expense.purchase_order_id)
    .bind(&expense.cost_center_id)
    .bind(&expense.description)
    .bind(expense.issue_date.to_string())
    .bind(expense.due_date.to_string())
    .bind(expense.settlement_date.map(|date| date.to_string()))
    .bind(expense.amounts.original.to_string())
    .bind(expense.amounts.discount.to_string())
    .bind(expense.amounts.interest.to_string())
    .bind(expense.amounts.penalty.to_string())
    .bind(expense.amounts.surcharge.to_string())
    .bind(expense.amounts.total.to_string())
    .bind(expense.amounts.paid.to_string())
    .bind(expense.amounts.balance.to_string())
    .bind(&expense.payment_method)
    .bind(expense.status.as_str())
    .bind(
        serde_json::to_string(&expense.attachments)
            .map_err(|error| RepositoryError::Decode(format!("attachments serialize: {error}")))?,
    )
    .bind(expense.created_at.to_rfc3339())
    .bind(expense.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn persist_invoice_amounts(
    conn: &mut sqlx::SqliteConnection,
    invoice: &Invoice,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE invoice SET settlement_date = ?, total_value = ?, paid_value = ?,
                            balance_value = ?, status = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(invoice.settlement_date.map(|date| date.to_string()))
    .bind(invoice.amounts.total.to_string())
    .bind(invoice.amounts.paid.to_string())
    .bind(invoice.amounts.balance.to_string())
    .bind(invoice.status.as_str())
    .bind(invoice.updated_at.to_rfc3339())
    .bind(&invoice.id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn invoice_select(filter: &str) -> String {
    format!(
        "SELECT id, number, customer_id, origin, description, issue_date, due_date,
                settlement_date, original_value, discount_value, interest_value, penalty_value,
                surcharge_value, total_value, paid_value, balance_value, payment_method, status,
                contract_id, attachments, created_at, updated_at
         FROM invoice WHERE {filter}"
    )
}

fn expense_select(filter: &str) -> String {
    format!(
        "SELECT id, document_number, supplier_id, purchase_order_id, cost_center_id,
                description, issue_date, due_date, settlement_date, original_value,
                discount_value, interest_value, penalty_value, surcharge_value, total_value,
                paid_value, balance_value, payment_method, status, attachments, created_at,
                updated_at
         FROM expense WHERE {filter}"
    )
}

fn amounts_from_row(row: &SqliteRow) -> Result<Amounts, RepositoryError> {
    Ok(Amounts {
        original: parse_decimal("original_value", row.try_get("original_value")?)?,
        discount: parse_decimal("discount_value", row.try_get("discount_value")?)?,
        interest: parse_decimal("interest_value", row.try_get("interest_value")?)?,
        penalty: parse_decimal("penalty_value", row.try_get("penalty_value")?)?,
        surcharge: parse_decimal("surcharge_value", row.try_get("surcharge_value")?)?,
        total: parse_decimal("total_value", row.try_get("total_value")?)?,
        paid: parse_decimal("paid_value", row.try_get("paid_value")?)?,
        balance: parse_decimal("balance_value", row.try_get("balance_value")?)?,
    })
}

pub(crate) fn invoice_from_row(row: SqliteRow) -> Result<Invoice, RepositoryError> {
    let origin_raw: String = row.try_get("origin")?;
    let origin = InvoiceOrigin::parse(&origin_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown invoice origin: {origin_raw}")))?;
    let status_raw: String = row.try_get("status")?;
    let status = InvoiceStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown invoice status: {status_raw}")))?;
    let amounts = amounts_from_row(&row)?;

    Ok(Invoice {
        id: row.try_get("id")?,
        number: row.try_get("number")?,
        customer_id: row.try_get("customer_id")?,
        origin,
        description: row.try_get("description")?,
        issue_date: parse_date("issue_date", row.try_get("issue_date")?)?,
        due_date: parse_date("due_date", row.try_get("due_date")?)?,
        settlement_date: parse_optional_date(
            "settlement_date",
            row.try_get("settlement_date")?,
        )?,
        amounts,
        payment_method: row.try_get("payment_method")?,
        status,
        contract_id: row.try_get("contract_id")?,
        attachments: parse_string_list("attachments", row.try_get("attachments")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

pub(crate) fn expense_from_row(row: SqliteRow) -> Result<Expense, RepositoryError> {
    let status_raw: String = row.try_get("status")?;
    let status = ExpenseStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown expense status: {status_raw}")))?;
    let amounts = amounts_from_row(&row)?;

    Ok(Expense {
        id: row.try_get("id")?,
        document_number: row.try_get("document_number")?,
        supplier_id: row.try_get("supplier_id")?,
        purchase_order_id: row.try_get("purchase_order_id")?,
        cost_center_id: row.try_get("cost_center_id")?,
        description: row.try_get("description")?,
        issue_date: parse_date("issue_date", row.try_get("issue_date")?)?,
        due_date: parse_date("due_date", row.try_get("due_date")?)?,
        settlement_date: parse_optional_date(
            "settlement_date",
            row.try_get("settlement_date")?,
        )?,
        amounts,
        payment_method: row.try_get("payment_method")?,
        status,
        attachments: parse_string_list("attachments", row.try_get("attachments")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
