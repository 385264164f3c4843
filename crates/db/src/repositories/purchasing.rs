//! Requisitions, their approval trail, and purchase orders.
//!
//! Posting a receipt is the widest transaction in the crate: it moves the
//! order line, the receipt log, the stock level, the order status, and on
//! full receipt the linked payable, all or nothing.

use std::collections::BTreeSet;

use chrono::{Datelike, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use opsdesk_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use opsdesk_core::domain::finance::{Amounts, Expense, ExpenseStatus};
use opsdesk_core::domain::inventory::{MovementType, StockMovement};
use opsdesk_core::domain::purchasing::{
    draft_order_line, order_total, recompute_order_status, ApprovalDecision, CostCenter,
    PurchaseOrder, PurchaseOrderLine, PurchaseOrderStatus, Receipt, Requisition,
    RequisitionApproval, RequisitionLine, RequisitionStatus,
};
use opsdesk_core::errors::DomainError;
use opsdesk_core::numbering;

use crate::repositories::finance::insert_expense;
use crate::repositories::inventory::{append_movement, persist_level, stock_item_for_update};
use crate::repositories::{
    insert_audit_event, parse_decimal, parse_optional_date, parse_timestamp, OperationContext,
    RepositoryError,
};
use crate::DbPool;

/// Caller-supplied fields for a new requisition; the code and status are
/// assigned here.
#[derive(Clone, Debug)]
pub struct NewRequisition {
    pub requester: String,
    pub cost_center_id: Option<String>,
    pub justification: String,
    pub needed_by: Option<NaiveDate>,
}

#[derive(Clone, Debug)]
pub struct RequisitionLineDraft {
    pub product_id: Option<String>,
    pub service_id: Option<String>,
    pub description: String,
    pub quantity: Decimal,
    pub estimated_unit_cost: Decimal,
}

pub struct SqlRequisitionRepository {
    pool: DbPool,
}

impl SqlRequisitionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, new: NewRequisition) -> Result<Requisition, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let year = Utc::now().date_naive().year();
        let latest: Option<String> = sqlx::query_scalar(
            "SELECT code FROM requisition WHERE code LIKE ? ORDER BY code DESC LIMIT 1",
        )
        .bind(format!("REQ-{year}-%"))
        .fetch_optional(&mut *tx)
        .await?;
        let sequence = latest.as_deref().and_then(numbering::numeric_tail).unwrap_or(0) + 1;

        let now = Utc::now();
        let requisition = Requisition {
            id: numbering::entity_id("REQ"),
            code: numbering::requisition_code(year, sequence),
            requester: new.requester,
            cost_center_id: new.cost_center_id,
            status: RequisitionStatus::Draft,
            justification: new.justification,
            needed_by: new.needed_by,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO requisition (id, code, requester, cost_center_id, status,
                                      justification, needed_by, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&requisition.id)
        .bind(&requisition.code)
        .bind(&requisition.requester)
        .bind(&requisition.cost_center_id)
        .bind(requisition.status.as_str())
        .bind(&requisition.justification)
        .bind(requisition.needed_by.map(|date| date.to_string()))
        .bind(requisition.created_at.to_rfc3339())
        .bind(requisition.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(requisition)
    }

    /// Header fields stay editable while the requisition is a draft.
    pub async fn save(&self, mut requisition: Requisition) -> Result<Requisition, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let current = requisition_from_row(
            sqlx::query(&requisition_select("id = ?"))
                .bind(&requisition.id)
                .fetch_one(&mut *tx)
                .await?,
        )?;
        if current.status != RequisitionStatus::Draft {
            return Err(DomainError::Validation(
                "only draft requisitions can be edited".to_owned(),
            )
            .into());
        }

        requisition.code = current.code;
        requisition.status = current.status;
        requisition.updated_at = Utc::now();

        sqlx::query(
            "UPDATE requisition SET requester = ?, cost_center_id = ?, justification = ?,
                                    needed_by = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&requisition.requester)
        .bind(&requisition.cost_center_id)
        .bind(&requisition.justification)
        .bind(requisition.needed_by.map(|date| date.to_string()))
        .bind(requisition.updated_at.to_rfc3339())
        .bind(&requisition.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(requisition)
    }

    pub async fn replace_lines(
        &self,
        requisition_id: &str,
        drafts: Vec<RequisitionLineDraft>,
    ) -> Result<Vec<RequisitionLine>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let requisition = requisition_from_row(
            sqlx::query(&requisition_select("id = ?"))
                .bind(requisition_id)
                .fetch_one(&mut *tx)
                .await?,
        )?;
        if requisition.status != RequisitionStatus::Draft {
            return Err(DomainError::Validation(
                "only draft requisitions can be edited".to_owned(),
            )
            .into());
        }

        let mut lines = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let line = RequisitionLine {
                id: numbering::entity_id("RQL"),
                requisition_id: requisition_id.to_owned(),
                product_id: draft.product_id,
                service_id: draft.service_id,
                description: draft.description,
                quantity: draft.quantity,
                estimated_unit_cost: draft.estimated_unit_cost,
            };
            line.validate()?;
            lines.push(line);
        }

        sqlx::query("DELETE FROM requisition_line WHERE requisition_id = ?")
            .bind(requisition_id)
            .execute(&mut *tx)
            .await?;

        for line in &lines {
            sqlx::query(
                "INSERT INTO requisition_line (id, requisition_id, product_id, service_id,
                                               description, quantity, estimated_unit_cost)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&line.id)
            .bind(&line.requisition_id)
            .bind(&line.product_id)
            .bind(&line.service_id)
            .bind(&line.description)
            .bind(line.quantity.to_string())
            .bind(line.estimated_unit_cost.to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(lines)
    }

    /// Draft to pending, opening the approval window.
    pub async fn submit(
        &self,
        id: &str,
        ctx: &OperationContext,
    ) -> Result<Requisition, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let mut requisition = requisition_from_row(
            sqlx::query(&requisition_select("id = ?")).bind(id).fetch_one(&mut *tx).await?,
        )?;
        requisition.transition_to(RequisitionStatus::Pending)?;
        requisition.updated_at = Utc::now();

        sqlx::query("UPDATE requisition SET status = ?, updated_at = ? WHERE id = ?")
            .bind(requisition.status.as_str())
            .bind(requisition.updated_at.to_rfc3339())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let event = AuditEvent::new(
            "requisition",
            id,
            &ctx.correlation_id,
            AuditCategory::Purchasing,
            "requisition_submitted",
            &ctx.actor,
            AuditOutcome::Success,
        )
        .with_metadata("code", &requisition.code);
        insert_audit_event(&mut tx, &event).await?;

        tx.commit().await?;
        Ok(requisition)
    }

    /// One decision per approver. The first decision settles the status;
    /// later approvers still get their position on the record.
    pub async fn decide(
        &self,
        id: &str,
        approver: &str,
        decision: ApprovalDecision,
        note: &str,
        ctx: &OperationContext,
    ) -> Result<RequisitionApproval, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let mut requisition = requisition_from_row(
            sqlx::query(&requisition_select("id = ?")).bind(id).fetch_one(&mut *tx).await?,
        )?;
        if !matches!(
            requisition.status,
            RequisitionStatus::Pending
                | RequisitionStatus::Approved
                | RequisitionStatus::Rejected
        ) {
            return Err(DomainError::Validation(format!(
                "requisition {} is {} and cannot take decisions",
                requisition.code,
                requisition.status.as_str()
            ))
            .into());
        }

        let already: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM requisition_approval WHERE requisition_id = ? AND approver = ?",
        )
        .bind(id)
        .bind(approver)
        .fetch_one(&mut *tx)
        .await?;
        if already > 0 {
            return Err(DomainError::DuplicateDecision { approver: approver.to_owned() }.into());
        }

        let approval = RequisitionApproval {
            id: numbering::entity_id("APR"),
            requisition_id: id.to_owned(),
            approver: approver.to_owned(),
            decision,
            note: note.to_owned(),
            decided_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO requisition_approval (id, requisition_id, approver, decision, note,
                                               decided_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&approval.id)
        .bind(&approval.requisition_id)
        .bind(&approval.approver)
        .bind(approval.decision.as_str())
        .bind(&approval.note)
        .bind(approval.decided_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        if requisition.status == RequisitionStatus::Pending {
            let next = match decision {
                ApprovalDecision::Approved => RequisitionStatus::Approved,
                ApprovalDecision::Rejected => RequisitionStatus::Rejected,
            };
            requisition.transition_to(next)?;
            requisition.updated_at = Utc::now();

            sqlx::query("UPDATE requisition SET status = ?, updated_at = ? WHERE id = ?")
                .bind(requisition.status.as_str())
                .bind(requisition.updated_at.to_rfc3339())
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        let event = AuditEvent::new(
            "requisition",
            id,
            &ctx.correlation_id,
            AuditCategory::Purchasing,
            "requisition_decided",
            &ctx.actor,
            AuditOutcome::Success,
        )
        .with_metadata("decision", decision.as_str())
        .with_metadata("status", requisition.status.as_str());
        insert_audit_event(&mut tx, &event).await?;

        tx.commit().await?;
        Ok(approval)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Requisition>, RepositoryError> {
        let row = sqlx::query(&requisition_select("id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(requisition_from_row).transpose()
    }

    pub async fn list(
        &self,
        status: Option<RequisitionStatus>,
    ) -> Result<Vec<Requisition>, RepositoryError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&requisition_select("status = ? ORDER BY code DESC"))
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query(&requisition_select("1 = 1 ORDER BY code DESC"))
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(requisition_from_row).collect()
    }

    pub async fn list_lines(
        &self,
        requisition_id: &str,
    ) -> Result<Vec<RequisitionLine>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, requisition_id, product_id, service_id, description, quantity,
                    estimated_unit_cost
             FROM requisition_line WHERE requisition_id = ? ORDER BY rowid",
        )
        .bind(requisition_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(requisition_line_from_row).collect()
    }

    pub async fn list_approvals(
        &self,
        requisition_id: &str,
    ) -> Result<Vec<RequisitionApproval>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, requisition_id, approver, decision, note, decided_at
             FROM requisition_approval WHERE requisition_id = ? ORDER BY decided_at, id",
        )
        .bind(requisition_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(approval_from_row).collect()
    }
}

pub struct SqlPurchaseOrderRepository {
    pool: DbPool,
}

impl SqlPurchaseOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Turns an approved requisition into a draft order. Product lines carry
    /// their product through to receiving; service lines come over as
    /// description-only and never touch stock. Line descriptions fall back
    /// to the referenced product or service name.
    pub async fn create_from_requisition(
        &self,
        requisition_id: &str,
        supplier_id: &str,
        freight_cost: Decimal,
        expected_at: Option<NaiveDate>,
        ctx: &OperationContext,
    ) -> Result<PurchaseOrder, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let mut requisition = requisition_from_row(
            sqlx::query(&requisition_select("id = ?"))
                .bind(requisition_id)
                .fetch_one(&mut *tx)
                .await?,
        )?;

        let line_rows = sqlx::query(
            "SELECT id, requisition_id, product_id, service_id, description, quantity,
                    estimated_unit_cost
             FROM requisition_line WHERE requisition_id = ? ORDER BY rowid",
        )
        .bind(requisition_id)
        .fetch_all(&mut *tx)
        .await?;
        let requisition_lines: Vec<RequisitionLine> =
            line_rows.into_iter().map(requisition_line_from_row).collect::<Result<_, _>>()?;
        if requisition_lines.is_empty() {
            return Err(DomainError::Validation(format!(
                "requisition {} has no lines to convert",
                requisition.code
            ))
            .into());
        }

        requisition.transition_to(RequisitionStatus::Converted)?;
        requisition.updated_at = Utc::now();

        let year = Utc::now().date_naive().year();
        let latest: Option<String> = sqlx::query_scalar(
            "SELECT code FROM purchase_order WHERE code LIKE ? ORDER BY code DESC LIMIT 1",
        )
        .bind(format!("PO-{year}-%"))
        .fetch_optional(&mut *tx)
        .await?;
        let sequence = latest.as_deref().and_then(numbering::numeric_tail).unwrap_or(0) + 1;

        let now = Utc::now();
        let order = PurchaseOrder {
            id: numbering::entity_id("PUR"),
            code: numbering::purchase_order_code(year, sequence),
            supplier_id: supplier_id.to_owned(),
            requisition_id: Some(requisition_id.to_owned()),
            status: PurchaseOrderStatus::Draft,
            ordered_at: None,
            expected_at,
            freight_cost,
            linked_expense_id: None,
            notes: requisition.justification.clone(),
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO purchase_order (id, code, supplier_id, requisition_id, status,
                                         ordered_at, expected_at, freight_cost,
                                         linked_expense_id, notes, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&order.id)
        .bind(&order.code)
        .bind(&order.supplier_id)
        .bind(&order.requisition_id)
        .bind(order.status.as_str())
        .bind(order.ordered_at.map(|date| date.to_string()))
        .bind(order.expected_at.map(|date| date.to_string()))
        .bind(order.freight_cost.to_string())
        .bind(&order.linked_expense_id)
        .bind(&order.notes)
        .bind(order.created_at.to_rfc3339())
        .bind(order.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        let mut seen_descriptions = BTreeSet::new();
        for line in &requisition_lines {
            let resolved_name: String = if let Some(product_id) = line.product_id.as_deref() {
                sqlx::query_scalar("SELECT name FROM product WHERE id = ?")
                    .bind(product_id)
                    .fetch_one(&mut *tx)
                    .await?
            } else if let Some(service_id) = line.service_id.as_deref() {
                sqlx::query_scalar("SELECT name FROM service WHERE id = ?")
                    .bind(service_id)
                    .fetch_one(&mut *tx)
                    .await?
            } else {
                String::new()
            };

            let draft = draft_order_line(line, &resolved_name);
            if !seen_descriptions.insert(draft.description.clone()) {
                return Err(DomainError::Validation(format!(
                    "duplicate order line description '{}'",
                    draft.description
                ))
                .into());
            }

            sqlx::query(
                "INSERT INTO purchase_order_line (id, purchase_order_id, product_id,
                                                  description, quantity_ordered, unit_cost,
                                                  quantity_received)
                 VALUES (?, ?, ?, ?, ?, ?, '0')",
            )
            .bind(numbering::entity_id("POL"))
            .bind(&order.id)
            .bind(&draft.product_id)
            .bind(&draft.description)
            .bind(draft.quantity.to_string())
            .bind(draft.unit_cost.to_string())
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE requisition SET status = ?, updated_at = ? WHERE id = ?")
            .bind(requisition.status.as_str())
            .bind(requisition.updated_at.to_rfc3339())
            .bind(requisition_id)
            .execute(&mut *tx)
            .await?;

        let event = AuditEvent::new(
            "requisition",
            requisition_id,
            &ctx.correlation_id,
            AuditCategory::Purchasing,
            "requisition_converted",
            &ctx.actor,
            AuditOutcome::Success,
        )
        .with_metadata("order_code", &order.code);
        insert_audit_event(&mut tx, &event).await?;

        tx.commit().await?;
        Ok(order)
    }

    /// Commercial terms stay editable until goods start arriving.
    pub async fn save(&self, mut order: PurchaseOrder) -> Result<PurchaseOrder, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let current = order_from_row(
            sqlx::query(&order_select("id = ?")).bind(&order.id).fetch_one(&mut *tx).await?,
        )?;
        if !matches!(current.status, PurchaseOrderStatus::Draft | PurchaseOrderStatus::Sent) {
            return Err(DomainError::Validation(format!(
                "order {} is {} and can no longer be edited",
                current.code,
                current.status.as_str()
            ))
            .into());
        }

        order.code = current.code;
        order.status = current.status;
        order.linked_expense_id = current.linked_expense_id;
        order.updated_at = Utc::now();

        sqlx::query(
            "UPDATE purchase_order SET supplier_id = ?, expected_at = ?, freight_cost = ?,
                                       notes = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&order.supplier_id)
        .bind(order.expected_at.map(|date| date.to_string()))
        .bind(order.freight_cost.to_string())
        .bind(&order.notes)
        .bind(order.updated_at.to_rfc3339())
        .bind(&order.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(order)
    }

    /// Marks the order placed with the supplier and stamps the order date.
    pub async fn mark_sent(
        &self,
        id: &str,
        ctx: &OperationContext,
    ) -> Result<PurchaseOrder, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let mut order = order_from_row(
            sqlx::query(&order_select("id = ?")).bind(id).fetch_one(&mut *tx).await?,
        )?;
        order.transition_to(PurchaseOrderStatus::Sent)?;
        if order.ordered_at.is_none() {
            order.ordered_at = Some(Utc::now().date_naive());
        }
        order.updated_at = Utc::now();

        sqlx::query(
            "UPDATE purchase_order SET status = ?, ordered_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(order.status.as_str())
        .bind(order.ordered_at.map(|date| date.to_string()))
        .bind(order.updated_at.to_rfc3339())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let event = AuditEvent::new(
            "purchase_order",
            id,
            &ctx.correlation_id,
            AuditCategory::Purchasing,
            "order_sent",
            &ctx.actor,
            AuditOutcome::Success,
        )
        .with_metadata("code", &order.code);
        insert_audit_event(&mut tx, &event).await?;

        tx.commit().await?;
        Ok(order)
    }

    pub async fn cancel(
        &self,
        id: &str,
        ctx: &OperationContext,
    ) -> Result<PurchaseOrder, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let mut order = order_from_row(
            sqlx::query(&order_select("id = ?")).bind(id).fetch_one(&mut *tx).await?,
        )?;
        order.transition_to(PurchaseOrderStatus::Cancelled)?;
        order.updated_at = Utc::now();

        sqlx::query("UPDATE purchase_order SET status = ?, updated_at = ? WHERE id = ?")
            .bind(order.status.as_str())
            .bind(order.updated_at.to_rfc3339())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let event = AuditEvent::new(
            "purchase_order",
            id,
            &ctx.correlation_id,
            AuditCategory::Purchasing,
            "order_cancelled",
            &ctx.actor,
            AuditOutcome::Success,
        )
        .with_metadata("code", &order.code);
        insert_audit_event(&mut tx, &event).await?;

        tx.commit().await?;
        Ok(order)
    }

    /// Books arrived goods against an order line. In one transaction: the
    /// line's received quantity moves, the receipt is logged, product stock
    /// goes up, the order status is recomputed, and the moment every line is
    /// fully received a pending payable is raised and linked. Any refusal
    /// rolls the whole posting back.
    pub async fn post_receipt(
        &self,
        line_id: &str,
        quantity: Decimal,
        note: &str,
        ctx: &OperationContext,
    ) -> Result<Receipt, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let mut line = order_line_from_row(
            sqlx::query(&order_line_select("id = ?")).bind(line_id).fetch_one(&mut *tx).await?,
        )?;
        let mut order = order_from_row(
            sqlx::query(&order_select("id = ?"))
                .bind(&line.purchase_order_id)
                .fetch_one(&mut *tx)
                .await?,
        )?;

        if !order.accepts_receipts() {
            return Err(DomainError::Validation(format!(
                "order {} is {} and does not accept receipts",
                order.code,
                order.status.as_str()
            ))
            .into());
        }
        line.apply_receipt(quantity)?;

        sqlx::query("UPDATE purchase_order_line SET quantity_received = ? WHERE id = ?")
            .bind(line.quantity_received.to_string())
            .bind(line_id)
            .execute(&mut *tx)
            .await?;

        let receipt = Receipt {
            id: numbering::entity_id("RCP"),
            purchase_order_line_id: line_id.to_owned(),
            quantity,
            received_by: ctx.actor.clone(),
            note: note.to_owned(),
            received_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO receipt (id, purchase_order_line_id, quantity, received_by, note,
                                  received_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&receipt.id)
        .bind(&receipt.purchase_order_line_id)
        .bind(receipt.quantity.to_string())
        .bind(&receipt.received_by)
        .bind(&receipt.note)
        .bind(receipt.received_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        if let Some(product_id) = line.product_id.clone() {
            let mut item = stock_item_for_update(&mut tx, &product_id).await?;
            let resulting = item.receive(quantity)?;
            persist_level(&mut tx, &item).await?;
            append_movement(
                &mut tx,
                &StockMovement {
                    id: numbering::entity_id("MOV"),
                    stock_item_id: item.id.clone(),
                    movement_type: MovementType::Entry,
                    quantity,
                    resulting_quantity: resulting,
                    note: format!("receipt against {}", order.code),
                    moved_by: ctx.actor.clone(),
                    moved_at: receipt.received_at,
                },
            )
            .await?;
        }

        let line_rows = sqlx::query(&order_line_select("purchase_order_id = ? ORDER BY rowid"))
            .bind(&order.id)
            .fetch_all(&mut *tx)
            .await?;
        let lines: Vec<PurchaseOrderLine> =
            line_rows.into_iter().map(order_line_from_row).collect::<Result<_, _>>()?;

        if let Some(next) = recompute_order_status(&lines) {
            if next != order.status {
                order.transition_to(next)?;
            }
        }

        if order.status == PurchaseOrderStatus::Received && order.linked_expense_id.is_none() {
            let today = Utc::now().date_naive();
            let now = Utc::now();
            let mut expense = Expense {
                id: numbering::entity_id("EXP"),
                document_number: order.code.clone(),
                supplier_id: Some(order.supplier_id.clone()),
                purchase_order_id: Some(order.id.clone()),
                cost_center_id: None,
                description: format!("Purchase order {}", order.code),
                issue_date: today,
                due_date: today + Duration::days(30),
                settlement_date: None,
                amounts: Amounts {
                    original: order_total(&lines, order.freight_cost),
                    ..Amounts::default()
                },
                payment_method: String::new(),
                status: ExpenseStatus::Pending,
                attachments: Vec::new(),
                created_at: now,
                updated_at: now,
            };
            expense.recalculate(today);

            insert_expense(&mut tx, &expense).await?;
            order.linked_expense_id = Some(expense.id);
        }

        order.updated_at = Utc::now();
        sqlx::query(
            "UPDATE purchase_order SET status = ?, linked_expense_id = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(order.status.as_str())
        .bind(&order.linked_expense_id)
        .bind(order.updated_at.to_rfc3339())
        .bind(&order.id)
        .execute(&mut *tx)
        .await?;

        let event = AuditEvent::new(
            "purchase_order",
            &order.id,
            &ctx.correlation_id,
            AuditCategory::Purchasing,
            "receipt_posted",
            &ctx.actor,
            AuditOutcome::Success,
        )
        .with_metadata("line_id", line_id)
        .with_metadata("quantity", quantity.to_string())
        .with_metadata("status", order.status.as_str());
        insert_audit_event(&mut tx, &event).await?;

        tx.commit().await?;
        Ok(receipt)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<PurchaseOrder>, RepositoryError> {
        let row = sqlx::query(&order_select("id = ?")).bind(id).fetch_optional(&self.pool).await?;
        row.map(order_from_row).transpose()
    }

    pub async fn list(
        &self,
        status: Option<PurchaseOrderStatus>,
    ) -> Result<Vec<PurchaseOrder>, RepositoryError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&order_select("status = ? ORDER BY code DESC"))
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query(&order_select("1 = 1 ORDER BY code DESC"))
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(order_from_row).collect()
    }

    pub async fn list_lines(
        &self,
        order_id: &str,
    ) -> Result<Vec<PurchaseOrderLine>, RepositoryError> {
        let rows = sqlx::query(&order_line_select("purchase_order_id = ? ORDER BY rowid"))
            .bind(order_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(order_line_from_row).collect()
    }

    pub async fn list_receipts(&self, order_id: &str) -> Result<Vec<Receipt>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT r.id, r.purchase_order_line_id, r.quantity, r.received_by, r.note,
                    r.received_at
             FROM receipt r
             JOIN purchase_order_line l ON l.id = r.purchase_order_line_id
             WHERE l.purchase_order_id = ?
             ORDER BY r.received_at, r.id",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(receipt_from_row).collect()
    }
}

fn requisition_select(filter: &str) -> String {
    format!(
        "SELECT id, code, requester, cost_center_id, status, justification, needed_by,
                created_at, updated_at
         FROM requisition WHERE {filter}"
    )
}

fn order_select(filter: &str) -> String {
    format!(
        "SELECT id, code, supplier_id, requisition_id, status, ordered_at, expected_at,
                freight_cost, linked_expense_id, notes, created_at, updated_at
         FROM purchase_order WHERE {filter}"
    )
}

fn order_line_select(filter: &str) -> String {
    format!(
        "SELECT id, purchase_order_id, product_id, description, quantity_ordered, unit_cost,
                quantity_received
         FROM purchase_order_line WHERE {filter}"
    )
}

fn requisition_from_row(row: SqliteRow) -> Result<Requisition, RepositoryError> {
    let status_raw: String = row.try_get("status")?;
    let status = RequisitionStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown requisition status: {status_raw}"))
    })?;

    Ok(Requisition {
        id: row.try_get("id")?,
        code: row.try_get("code")?,
        requester: row.try_get("requester")?,
        cost_center_id: row.try_get("cost_center_id")?,
        status,
        justification: row.try_get("justification")?,
        needed_by: parse_optional_date("needed_by", row.try_get("needed_by")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn requisition_line_from_row(row: SqliteRow) -> Result<RequisitionLine, RepositoryError> {
    Ok(RequisitionLine {
        id: row.try_get("id")?,
        requisition_id: row.try_get("requisition_id")?,
        product_id: row.try_get("product_id")?,
        service_id: row.try_get("service_id")?,
        description: row.try_get("description")?,
        quantity: parse_decimal("quantity", row.try_get("quantity")?)?,
        estimated_unit_cost: parse_decimal(
            "estimated_unit_cost",
            row.try_get("estimated_unit_cost")?,
        )?,
    })
}

fn approval_from_row(row: SqliteRow) -> Result<RequisitionApproval, RepositoryError> {
    let decision_raw: String = row.try_get("decision")?;
    let decision = ApprovalDecision::parse(&decision_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown approval decision: {decision_raw}"))
    })?;

    Ok(RequisitionApproval {
        id: row.try_get("id")?,
        requisition_id: row.try_get("requisition_id")?,
        approver: row.try_get("approver")?,
        decision,
        note: row.try_get("note")?,
        decided_at: parse_timestamp("decided_at", row.try_get("decided_at")?)?,
    })
}

fn order_from_row(row: SqliteRow) -> Result<PurchaseOrder, RepositoryError> {
    let status_raw: String = row.try_get("status")?;
    let status = PurchaseOrderStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown order status: {status_raw}")))?;

    Ok(PurchaseOrder {
        id: row.try_get("id")?,
        code: row.try_get("code")?,
        supplier_id: row.try_get("supplier_id")?,
        requisition_id: row.try_get("requisition_id")?,
        status,
        ordered_at: parse_optional_date("ordered_at", row.try_get("ordered_at")?)?,
        expected_at: parse_optional_date("expected_at", row.try_get("expected_at")?)?,
        freight_cost: parse_decimal("freight_cost", row.try_get("freight_cost")?)?,
        linked_expense_id: row.try_get("linked_expense_id")?,
        notes: row.try_get("notes")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

pub struct SqlCostCenterRepository {
    pool: DbPool,
}

impl SqlCostCenterRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get-or-create by code; a repeated code updates the name and
    /// reactivates the center.
    pub async fn upsert(&self, code: &str, name: &str) -> Result<CostCenter, RepositoryError> {
        let code = code.trim().to_uppercase();
        let name = name.trim();
        if code.is_empty() || name.is_empty() {
            return Err(
                DomainError::Validation("cost center code and name are required".to_owned())
                    .into(),
            );
        }

        let center =
            CostCenter { id: numbering::entity_id("CC"), code, name: name.to_owned(), active: true };
        sqlx::query(
            "INSERT INTO cost_center (id, code, name, active) VALUES (?, ?, ?, 1)
             ON CONFLICT(code) DO UPDATE SET name = excluded.name, active = 1",
        )
        .bind(&center.id)
        .bind(&center.code)
        .bind(&center.name)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT id, code, name, active FROM cost_center WHERE code = ?")
            .bind(&center.code)
            .fetch_one(&self.pool)
            .await?;
        cost_center_from_row(row)
    }

    pub async fn deactivate(&self, id: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE cost_center SET active = 0 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::Database(sqlx::Error::RowNotFound));
        }
        Ok(())
    }

    pub async fn list(&self, include_inactive: bool) -> Result<Vec<CostCenter>, RepositoryError> {
        let query = if include_inactive {
            "SELECT id, code, name, active FROM cost_center ORDER BY code"
        } else {
            "SELECT id, code, name, active FROM cost_center WHERE active = 1 ORDER BY code"
        };
        let rows = sqlx::query(query).fetch_all(&self.pool).await?;
        rows.into_iter().map(cost_center_from_row).collect()
    }
}

fn cost_center_from_row(row: SqliteRow) -> Result<CostCenter, RepositoryError> {
    Ok(CostCenter {
        id: row.try_get("id")?,
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        active: row.try_get::<i64, _>("active")? != 0,
    })
}

fn order_line_from_row(row: SqliteRow) -> Result<PurchaseOrderLine, RepositoryError> {
    Ok(PurchaseOrderLine {
        id: row.try_get("id")?,
        purchase_order_id: row.try_get("purchase_order_id")?,
        product_id: row.try_get("product_id")?,
        description: row.try_get("description")?,
        quantity_ordered: parse_decimal("quantity_ordered", row.try_get("quantity_ordered")?)?,
        unit_cost: parse_decimal("unit_cost", row.try_get("unit_cost")?)?,
        quantity_received: parse_decimal(
            "quantity_received",
            row.try_get("quantity_received")?,
        )?,
    })
}

fn receipt_from_row(row: SqliteRow) -> Result<Receipt, RepositoryError> {
    Ok(Receipt {
        id: row.try_get("id")?,
        purchase_order_line_id: row.try_get("purchase_order_line_id")?,
        quantity: parse_decimal("quantity", row.try_get("quantity")?)?,
        received_by: row.try_get("received_by")?,
        note: row.try_get("note")?,
        received_at: parse_timestamp("received_at", row.try_get("received_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Duration, Utc};
    use rust_decimal::Decimal;

    use opsdesk_core::domain::catalog::{
        PricingMethod, ProductKind, ServiceBilling, Supplier, SupplierKind,
    };
    use opsdesk_core::domain::finance::ExpenseStatus;
    use opsdesk_core::domain::purchasing::{
        ApprovalDecision, PurchaseOrderStatus, RequisitionStatus,
    };
    use opsdesk_core::errors::DomainError;
    use opsdesk_core::numbering;

    use super::{
        NewRequisition, RequisitionLineDraft, SqlCostCenterRepository,
        SqlPurchaseOrderRepository, SqlRequisitionRepository,
    };
    use crate::repositories::catalog::{
        NewProduct, NewService, SqlProductRepository, SqlServiceRepository,
        SqlSupplierRepository,
    };
    use crate::repositories::finance::SqlExpenseRepository;
    use crate::repositories::inventory::SqlStockRepository;
    use crate::repositories::{OperationContext, RepositoryError};
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn ctx() -> OperationContext {
        OperationContext::new("buyer", "corr-purchasing")
    }

    struct Fixture {
        supplier_id: String,
        product_id: String,
        service_id: String,
    }

    async fn seed_catalog(pool: &DbPool) -> Fixture {
        let now = Utc::now();
        let supplier = SqlSupplierRepository::new(pool.clone())
            .save(Supplier {
                id: numbering::entity_id("SUP"),
                kind: SupplierKind::Supplier,
                legal_name: "Omega Equipamentos SA".to_owned(),
                trade_name: String::new(),
                tax_id: "31.415.926/0001-53".to_owned(),
                email: String::new(),
                phone: String::new(),
                city: String::new(),
                state: String::new(),
                rating: None,
                notes: String::new(),
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("supplier");
        let product = SqlProductRepository::new(pool.clone())
            .create(NewProduct {
                name: "Outdoor antenna".to_owned(),
                category_name: None,
                kind: ProductKind::Good,
                pricing_method: PricingMethod::Markup,
                standard_cost: Decimal::new(10_000, 2),
                markup_pct: Decimal::new(40, 0),
                list_price: Decimal::ZERO,
                unit: "un".to_owned(),
            })
            .await
            .expect("product");
        let service = SqlServiceRepository::new(pool.clone())
            .create(NewService {
                name: "Mast installation".to_owned(),
                category_id: None,
                billing: ServiceBilling::OneOff,
                standard_cost: Decimal::ZERO,
                list_price: Decimal::new(20_000, 2),
            })
            .await
            .expect("service");

        Fixture { supplier_id: supplier.id, product_id: product.id, service_id: service.id }
    }

    async fn approved_requisition(pool: &DbPool, fixture: &Fixture) -> String {
        let repo = SqlRequisitionRepository::new(pool.clone());
        let requisition = repo
            .create(NewRequisition {
                requester: "Rafael".to_owned(),
                cost_center_id: None,
                justification: "Tower refit".to_owned(),
                needed_by: Some(Utc::now().date_naive() + Duration::days(14)),
            })
            .await
            .expect("requisition");
        repo.replace_lines(
            &requisition.id,
            vec![
                RequisitionLineDraft {
                    product_id: Some(fixture.product_id.clone()),
                    service_id: None,
                    description: String::new(),
                    quantity: Decimal::new(5, 0),
                    estimated_unit_cost: Decimal::new(10_000, 2),
                },
                RequisitionLineDraft {
                    product_id: None,
                    service_id: Some(fixture.service_id.clone()),
                    description: String::new(),
                    quantity: Decimal::new(1, 0),
                    estimated_unit_cost: Decimal::new(20_000, 2),
                },
            ],
        )
        .await
        .expect("lines");
        repo.submit(&requisition.id, &ctx()).await.expect("submit");
        repo.decide(&requisition.id, "Helena", ApprovalDecision::Approved, "ok", &ctx())
            .await
            .expect("approve");
        requisition.id
    }

    #[tokio::test]
    async fn requisitions_walk_submit_decide_convert() {
        let pool = setup_pool().await;
        let fixture = seed_catalog(&pool).await;
        let requisitions = SqlRequisitionRepository::new(pool.clone());
        let orders = SqlPurchaseOrderRepository::new(pool.clone());

        let requisition_id = approved_requisition(&pool, &fixture).await;
        let requisition =
            requisitions.find_by_id(&requisition_id).await.expect("find").expect("present");
        assert_eq!(requisition.status, RequisitionStatus::Approved);
        let year = Utc::now().date_naive().year();
        assert_eq!(requisition.code, format!("REQ-{year}-0001"));

        let order = orders
            .create_from_requisition(
                &requisition_id,
                &fixture.supplier_id,
                Decimal::new(5_000, 2),
                None,
                &ctx(),
            )
            .await
            .expect("convert");
        assert_eq!(order.code, format!("PO-{year}-0001"));
        assert_eq!(order.status, PurchaseOrderStatus::Draft);

        let converted =
            requisitions.find_by_id(&requisition_id).await.expect("find").expect("present");
        assert_eq!(converted.status, RequisitionStatus::Converted);

        let lines = orders.list_lines(&order.id).await.expect("lines");
        assert_eq!(lines.len(), 2);
        // Blank descriptions resolve to the referenced product and service.
        assert_eq!(lines[0].description, "Outdoor antenna");
        assert_eq!(lines[0].product_id.as_deref(), Some(fixture.product_id.as_str()));
        assert_eq!(lines[1].description, "Mast installation");
        assert!(lines[1].product_id.is_none());
        pool.close().await;
    }

    #[tokio::test]
    async fn an_approver_gets_exactly_one_decision() {
        let pool = setup_pool().await;
        let fixture = seed_catalog(&pool).await;
        let repo = SqlRequisitionRepository::new(pool.clone());
        let requisition_id = approved_requisition(&pool, &fixture).await;

        let error = repo
            .decide(&requisition_id, "Helena", ApprovalDecision::Rejected, "", &ctx())
            .await
            .expect_err("duplicate");
        match error {
            RepositoryError::Domain(DomainError::DuplicateDecision { approver }) => {
                assert_eq!(approver, "Helena");
            }
            other => panic!("expected duplicate decision, got {other:?}"),
        }

        // A later approver is recorded without moving the settled status.
        repo.decide(&requisition_id, "Bruno", ApprovalDecision::Rejected, "too costly", &ctx())
            .await
            .expect("second opinion");
        let requisition =
            repo.find_by_id(&requisition_id).await.expect("find").expect("present");
        assert_eq!(requisition.status, RequisitionStatus::Approved);
        assert_eq!(repo.list_approvals(&requisition_id).await.expect("approvals").len(), 2);
        pool.close().await;
    }

    #[tokio::test]
    async fn submitted_requisitions_are_no_longer_editable() {
        let pool = setup_pool().await;
        let fixture = seed_catalog(&pool).await;
        let repo = SqlRequisitionRepository::new(pool.clone());

        let requisition = repo
            .create(NewRequisition {
                requester: "Rafael".to_owned(),
                cost_center_id: None,
                justification: String::new(),
                needed_by: None,
            })
            .await
            .expect("requisition");
        repo.replace_lines(
            &requisition.id,
            vec![RequisitionLineDraft {
                product_id: Some(fixture.product_id.clone()),
                service_id: None,
                description: String::new(),
                quantity: Decimal::new(1, 0),
                estimated_unit_cost: Decimal::ZERO,
            }],
        )
        .await
        .expect("lines");
        repo.submit(&requisition.id, &ctx()).await.expect("submit");

        let error = repo
            .replace_lines(&requisition.id, Vec::new())
            .await
            .expect_err("locked after submit");
        assert!(matches!(error, RepositoryError::Domain(DomainError::Validation(_))));
        pool.close().await;
    }

    #[tokio::test]
    async fn a_line_must_reference_product_or_service() {
        let pool = setup_pool().await;
        let _fixture = seed_catalog(&pool).await;
        let repo = SqlRequisitionRepository::new(pool.clone());

        let requisition = repo
            .create(NewRequisition {
                requester: "Rafael".to_owned(),
                cost_center_id: None,
                justification: String::new(),
                needed_by: None,
            })
            .await
            .expect("requisition");

        let error = repo
            .replace_lines(
                &requisition.id,
                vec![RequisitionLineDraft {
                    product_id: None,
                    service_id: None,
                    description: "mystery item".to_owned(),
                    quantity: Decimal::new(1, 0),
                    estimated_unit_cost: Decimal::ZERO,
                }],
            )
            .await
            .expect_err("no target");
        assert!(matches!(
            error,
            RepositoryError::Domain(DomainError::LineTargetViolation)
        ));
        pool.close().await;
    }

    #[tokio::test]
    async fn receipts_move_stock_status_and_raise_the_payable() {
        let pool = setup_pool().await;
        let fixture = seed_catalog(&pool).await;
        let orders = SqlPurchaseOrderRepository::new(pool.clone());
        let stock = SqlStockRepository::new(pool.clone());

        let requisition_id = approved_requisition(&pool, &fixture).await;
        let order = orders
            .create_from_requisition(
                &requisition_id,
                &fixture.supplier_id,
                Decimal::new(5_000, 2),
                None,
                &ctx(),
            )
            .await
            .expect("convert");
        let order = orders.mark_sent(&order.id, &ctx()).await.expect("send");
        assert_eq!(order.ordered_at, Some(Utc::now().date_naive()));

        let lines = orders.list_lines(&order.id).await.expect("lines");
        let product_line = &lines[0];
        let service_line = &lines[1];

        orders
            .post_receipt(&product_line.id, Decimal::new(3, 0), "first pallet", &ctx())
            .await
            .expect("partial receipt");

        let after_partial = orders.find_by_id(&order.id).await.expect("find").expect("present");
        assert_eq!(after_partial.status, PurchaseOrderStatus::PartiallyReceived);
        assert!(after_partial.linked_expense_id.is_none());
        let item =
            stock.find_by_product(&fixture.product_id).await.expect("stock").expect("item");
        assert_eq!(item.quantity_on_hand, Decimal::new(3, 0));

        orders
            .post_receipt(&product_line.id, Decimal::new(2, 0), "rest", &ctx())
            .await
            .expect("second receipt");
        orders
            .post_receipt(&service_line.id, Decimal::new(1, 0), "visit done", &ctx())
            .await
            .expect("service receipt");

        let received = orders.find_by_id(&order.id).await.expect("find").expect("present");
        assert_eq!(received.status, PurchaseOrderStatus::Received);
        let expense_id = received.linked_expense_id.expect("payable linked");

        let expense = SqlExpenseRepository::new(pool.clone())
            .find_by_id(&expense_id)
            .await
            .expect("expense")
            .expect("present");
        assert_eq!(expense.document_number, received.code);
        assert_eq!(expense.status, ExpenseStatus::Pending);
        // 5 x 100.00 goods + 200.00 service + 50.00 freight
        assert_eq!(expense.amounts.total, Decimal::new(75_000, 2));
        assert_eq!(
            expense.due_date,
            Utc::now().date_naive() + Duration::days(30)
        );

        // The service line never touched stock.
        let item =
            stock.find_by_product(&fixture.product_id).await.expect("stock").expect("item");
        assert_eq!(item.quantity_on_hand, Decimal::new(5, 0));
        assert_eq!(
            stock.movements_for_product(&fixture.product_id).await.expect("log").len(),
            2
        );
        assert_eq!(orders.list_receipts(&order.id).await.expect("receipts").len(), 3);
        pool.close().await;
    }

    #[tokio::test]
    async fn an_over_receipt_rolls_the_whole_posting_back() {
        let pool = setup_pool().await;
        let fixture = seed_catalog(&pool).await;
        let orders = SqlPurchaseOrderRepository::new(pool.clone());
        let stock = SqlStockRepository::new(pool.clone());

        let requisition_id = approved_requisition(&pool, &fixture).await;
        let order = orders
            .create_from_requisition(&requisition_id, &fixture.supplier_id, Decimal::ZERO, None, &ctx())
            .await
            .expect("convert");
        orders.mark_sent(&order.id, &ctx()).await.expect("send");
        let lines = orders.list_lines(&order.id).await.expect("lines");
        let product_line = &lines[0];

        let error = orders
            .post_receipt(&product_line.id, Decimal::new(9, 0), "", &ctx())
            .await
            .expect_err("over receipt");
        match error {
            RepositoryError::Domain(DomainError::OverReceipt { requested, outstanding }) => {
                assert_eq!(requested, Decimal::new(9, 0));
                assert_eq!(outstanding, Decimal::new(5, 0));
            }
            other => panic!("expected over receipt, got {other:?}"),
        }

        let lines = orders.list_lines(&order.id).await.expect("lines");
        assert_eq!(lines[0].quantity_received, Decimal::ZERO);
        let after = orders.find_by_id(&order.id).await.expect("find").expect("present");
        assert_eq!(after.status, PurchaseOrderStatus::Sent);
        assert!(stock.find_by_product(&fixture.product_id).await.expect("stock").is_none());
        assert!(orders.list_receipts(&order.id).await.expect("receipts").is_empty());
        pool.close().await;
    }

    #[tokio::test]
    async fn cancelled_orders_refuse_receipts() {
        let pool = setup_pool().await;
        let fixture = seed_catalog(&pool).await;
        let orders = SqlPurchaseOrderRepository::new(pool.clone());

        let requisition_id = approved_requisition(&pool, &fixture).await;
        let order = orders
            .create_from_requisition(&requisition_id, &fixture.supplier_id, Decimal::ZERO, None, &ctx())
            .await
            .expect("convert");
        orders.mark_sent(&order.id, &ctx()).await.expect("send");
        let lines = orders.list_lines(&order.id).await.expect("lines");
        orders.cancel(&order.id, &ctx()).await.expect("cancel");

        let error = orders
            .post_receipt(&lines[0].id, Decimal::new(1, 0), "", &ctx())
            .await
            .expect_err("cancelled");
        match error {
            RepositoryError::Domain(DomainError::Validation(message)) => {
                assert!(message.contains("does not accept receipts"), "{message}");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        pool.close().await;
    }

    #[tokio::test]
    async fn cost_center_codes_are_normalized_and_reused() {
        let pool = setup_pool().await;
        let centers = SqlCostCenterRepository::new(pool.clone());

        let first = centers.upsert("eng", "Engineering").await.expect("create");
        assert_eq!(first.code, "ENG");
        assert!(first.active);

        let second = centers.upsert("ENG", "Engineering & Projects").await.expect("reuse");
        assert_eq!(second.id, first.id);
        assert_eq!(second.name, "Engineering & Projects");

        centers.deactivate(&first.id).await.expect("deactivate");
        let active = centers.list(false).await.expect("list");
        assert!(active.iter().all(|center| center.code != "ENG"));
        let all = centers.list(true).await.expect("list all");
        assert!(all.iter().any(|center| center.code == "ENG" && !center.active));

        let error = centers.upsert("  ", "Blank").await.expect_err("blank code");
        assert!(matches!(
            error,
            RepositoryError::Domain(DomainError::Validation(_))
        ));
        pool.close().await;
    }
}
