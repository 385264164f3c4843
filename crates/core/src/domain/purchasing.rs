//! Requisition, purchase order, and receipt rules.
//!
//! The receipt guard here is the authority for the over-receipt rule: the
//! accumulated received quantity of a line never exceeds its ordered
//! quantity. Repositories run these checks inside the posting transaction so
//! a rejection leaves every row untouched.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::validate_line_target;
use crate::errors::DomainError;
use crate::money;

/// Shared lookup for requisitions and expenses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostCenter {
    pub id: String,
    pub code: String,
    pub name: String,
    pub active: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequisitionStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
    Converted,
}

impl RequisitionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Converted => "converted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(Self::Draft),
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "converted" => Some(Self::Converted),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Requisition {
    pub id: String,
    pub code: String,
    pub requester: String,
    pub cost_center_id: Option<String>,
    pub status: RequisitionStatus,
    pub justification: String,
    pub needed_by: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Requisition {
    pub fn can_transition_to(&self, next: RequisitionStatus) -> bool {
        matches!(
            (self.status, next),
            (RequisitionStatus::Draft, RequisitionStatus::Pending)
                | (RequisitionStatus::Pending, RequisitionStatus::Approved)
                | (RequisitionStatus::Pending, RequisitionStatus::Rejected)
                | (RequisitionStatus::Approved, RequisitionStatus::Converted)
        )
    }

    pub fn transition_to(&mut self, next: RequisitionStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidStatusTransition {
            entity: "requisition",
            from: self.status.as_str(),
            to: next.as_str(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequisitionLine {
    pub id: String,
    pub requisition_id: String,
    pub product_id: Option<String>,
    pub service_id: Option<String>,
    pub description: String,
    pub quantity: Decimal,
    pub estimated_unit_cost: Decimal,
}

impl RequisitionLine {
    pub fn validate(&self) -> Result<(), DomainError> {
        validate_line_target(self.product_id.as_deref(), self.service_id.as_deref())?;
        if self.quantity <= Decimal::ZERO {
            return Err(DomainError::Validation("quantity must be positive".to_owned()));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

impl ApprovalDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequisitionApproval {
    pub id: String,
    pub requisition_id: String,
    pub approver: String,
    pub decision: ApprovalDecision,
    pub note: String,
    pub decided_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOrderStatus {
    Draft,
    Sent,
    PartiallyReceived,
    Received,
    Cancelled,
}

impl PurchaseOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::PartiallyReceived => "partially_received",
            Self::Received => "received",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(Self::Draft),
            "sent" => Some(Self::Sent),
            "partially_received" => Some(Self::PartiallyReceived),
            "received" => Some(Self::Received),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub id: String,
    pub code: String,
    pub supplier_id: String,
    pub requisition_id: Option<String>,
    pub status: PurchaseOrderStatus,
    pub ordered_at: Option<NaiveDate>,
    pub expected_at: Option<NaiveDate>,
    pub freight_cost: Decimal,
    pub linked_expense_id: Option<String>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PurchaseOrder {
    pub fn can_transition_to(&self, next: PurchaseOrderStatus) -> bool {
        matches!(
            (self.status, next),
            (PurchaseOrderStatus::Draft, PurchaseOrderStatus::Sent)
                | (PurchaseOrderStatus::Sent, PurchaseOrderStatus::PartiallyReceived)
                | (PurchaseOrderStatus::Sent, PurchaseOrderStatus::Received)
                | (PurchaseOrderStatus::PartiallyReceived, PurchaseOrderStatus::Received)
                | (PurchaseOrderStatus::Draft, PurchaseOrderStatus::Cancelled)
                | (PurchaseOrderStatus::Sent, PurchaseOrderStatus::Cancelled)
                | (PurchaseOrderStatus::PartiallyReceived, PurchaseOrderStatus::Cancelled)
        )
    }

    pub fn transition_to(&mut self, next: PurchaseOrderStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidStatusTransition {
            entity: "purchase order",
            from: self.status.as_str(),
            to: next.as_str(),
        })
    }

    pub fn accepts_receipts(&self) -> bool {
        matches!(
            self.status,
            PurchaseOrderStatus::Sent | PurchaseOrderStatus::PartiallyReceived
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrderLine {
    pub id: String,
    pub purchase_order_id: String,
    pub product_id: Option<String>,
    pub description: String,
    pub quantity_ordered: Decimal,
    pub unit_cost: Decimal,
    pub quantity_received: Decimal,
}

impl PurchaseOrderLine {
    pub fn outstanding(&self) -> Decimal {
        self.quantity_ordered - self.quantity_received
    }

    pub fn is_fully_received(&self) -> bool {
        self.quantity_received >= self.quantity_ordered
    }

    /// The over-receipt guard. Quantity must be positive and must not push
    /// the accumulated receipts past the ordered quantity.
    pub fn validate_receipt(&self, quantity: Decimal) -> Result<(), DomainError> {
        if quantity <= Decimal::ZERO {
            return Err(DomainError::Validation(
                "receipt quantity must be positive".to_owned(),
            ));
        }
        let outstanding = self.outstanding();
        if quantity > outstanding {
            return Err(DomainError::OverReceipt { requested: quantity, outstanding });
        }
        Ok(())
    }

    pub fn apply_receipt(&mut self, quantity: Decimal) -> Result<(), DomainError> {
        self.validate_receipt(quantity)?;
        self.quantity_received += quantity;
        Ok(())
    }

    pub fn line_total(&self) -> Decimal {
        money::quantize(self.quantity_ordered * self.unit_cost)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub id: String,
    pub purchase_order_line_id: String,
    pub quantity: Decimal,
    pub received_by: String,
    pub note: String,
    pub received_at: DateTime<Utc>,
}

/// Status implied by the receipt totals across all of an order's lines.
/// `None` means no receipt has landed yet and the stored status stands.
pub fn recompute_order_status(lines: &[PurchaseOrderLine]) -> Option<PurchaseOrderStatus> {
    if lines.is_empty() {
        return None;
    }
    if lines.iter().all(PurchaseOrderLine::is_fully_received) {
        return Some(PurchaseOrderStatus::Received);
    }
    if lines.iter().any(|line| line.quantity_received > Decimal::ZERO) {
        return Some(PurchaseOrderStatus::PartiallyReceived);
    }
    None
}

/// Goods value of the order: ordered quantities at line cost, plus freight.
pub fn order_total(lines: &[PurchaseOrderLine], freight_cost: Decimal) -> Decimal {
    let goods: Decimal = lines.iter().map(PurchaseOrderLine::line_total).sum();
    money::quantize(goods + freight_cost)
}

/// Line content for an order drafted from a requisition. Product lines keep
/// their product reference; service lines carry description only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderLineDraft {
    pub product_id: Option<String>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
}

pub fn draft_order_line(line: &RequisitionLine, resolved_name: &str) -> OrderLineDraft {
    let description = if line.description.trim().is_empty() {
        resolved_name.to_owned()
    } else {
        line.description.clone()
    };

    OrderLineDraft {
        product_id: line.product_id.clone(),
        description,
        quantity: line.quantity,
        unit_cost: line.estimated_unit_cost,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use crate::errors::DomainError;

    use super::{
        draft_order_line, order_total, recompute_order_status, PurchaseOrder, PurchaseOrderLine,
        PurchaseOrderStatus, Requisition, RequisitionLine, RequisitionStatus,
    };

    fn order(status: PurchaseOrderStatus) -> PurchaseOrder {
        PurchaseOrder {
            id: "PO-1".to_owned(),
            code: "PO-2026-0001".to_owned(),
            supplier_id: "SUP-1".to_owned(),
            requisition_id: None,
            status,
            ordered_at: None,
            expected_at: None,
            freight_cost: Decimal::new(3500, 2),
            linked_expense_id: None,
            notes: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn line(ordered: i64, received: i64) -> PurchaseOrderLine {
        PurchaseOrderLine {
            id: "POL-1".to_owned(),
            purchase_order_id: "PO-1".to_owned(),
            product_id: Some("PRD-1".to_owned()),
            description: "Switch".to_owned(),
            quantity_ordered: Decimal::new(ordered, 0),
            unit_cost: Decimal::new(10_000, 2),
            quantity_received: Decimal::new(received, 0),
        }
    }

    #[test]
    fn receipt_within_outstanding_balance_is_accepted() {
        let mut line = line(10, 4);
        line.apply_receipt(Decimal::new(6, 0)).expect("receipt up to the balance");
        assert!(line.is_fully_received());
    }

    #[test]
    fn over_receipt_is_rejected_with_the_outstanding_balance() {
        let line = line(10, 4);
        let error = line.validate_receipt(Decimal::new(7, 0)).expect_err("over-receipt");
        assert_eq!(
            error,
            DomainError::OverReceipt {
                requested: Decimal::new(7, 0),
                outstanding: Decimal::new(6, 0),
            }
        );
    }

    #[test]
    fn non_positive_receipts_are_rejected() {
        let line = line(10, 0);
        assert!(line.validate_receipt(Decimal::ZERO).is_err());
        assert!(line.validate_receipt(Decimal::new(-1, 0)).is_err());
    }

    #[test]
    fn order_status_recomputes_from_line_totals() {
        assert_eq!(recompute_order_status(&[line(10, 0), line(5, 0)]), None);
        assert_eq!(
            recompute_order_status(&[line(10, 3), line(5, 0)]),
            Some(PurchaseOrderStatus::PartiallyReceived)
        );
        assert_eq!(
            recompute_order_status(&[line(10, 10), line(5, 5)]),
            Some(PurchaseOrderStatus::Received)
        );
        assert_eq!(recompute_order_status(&[]), None);
    }

    #[test]
    fn order_total_sums_lines_and_freight() {
        let total = order_total(&[line(10, 0), line(5, 0)], Decimal::new(3500, 2));
        // 10 * 100.00 + 5 * 100.00 + 35.00
        assert_eq!(total, Decimal::new(153_500, 2));
    }

    #[test]
    fn cancelled_orders_do_not_accept_receipts() {
        assert!(order(PurchaseOrderStatus::Sent).accepts_receipts());
        assert!(order(PurchaseOrderStatus::PartiallyReceived).accepts_receipts());
        assert!(!order(PurchaseOrderStatus::Cancelled).accepts_receipts());
        assert!(!order(PurchaseOrderStatus::Received).accepts_receipts());
        assert!(!order(PurchaseOrderStatus::Draft).accepts_receipts());
    }

    #[test]
    fn requisition_walks_draft_pending_approved_converted() {
        let mut requisition = Requisition {
            id: "REQ-1".to_owned(),
            code: "REQ-2026-0001".to_owned(),
            requester: "almoxarifado".to_owned(),
            cost_center_id: None,
            status: RequisitionStatus::Draft,
            justification: String::new(),
            needed_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        requisition.transition_to(RequisitionStatus::Pending).expect("draft -> pending");
        requisition.transition_to(RequisitionStatus::Approved).expect("pending -> approved");
        requisition.transition_to(RequisitionStatus::Converted).expect("approved -> converted");

        let error = requisition
            .transition_to(RequisitionStatus::Pending)
            .expect_err("converted is terminal");
        assert!(matches!(error, DomainError::InvalidStatusTransition { .. }));
    }

    #[test]
    fn service_lines_convert_to_description_only() {
        let service_line = RequisitionLine {
            id: "RL-1".to_owned(),
            requisition_id: "REQ-1".to_owned(),
            product_id: None,
            service_id: Some("SER-1".to_owned()),
            description: String::new(),
            quantity: Decimal::new(2, 0),
            estimated_unit_cost: Decimal::new(15_000, 2),
        };

        let draft = draft_order_line(&service_line, "On-site installation");
        assert_eq!(draft.product_id, None);
        assert_eq!(draft.description, "On-site installation");
        assert_eq!(draft.quantity, Decimal::new(2, 0));
    }

    #[test]
    fn product_lines_keep_their_reference() {
        let product_line = RequisitionLine {
            id: "RL-2".to_owned(),
            requisition_id: "REQ-1".to_owned(),
            product_id: Some("PRD-1".to_owned()),
            service_id: None,
            description: "24-port switch".to_owned(),
            quantity: Decimal::new(10, 0),
            estimated_unit_cost: Decimal::new(10_000, 2),
        };

        let draft = draft_order_line(&product_line, "ignored");
        assert_eq!(draft.product_id.as_deref(), Some("PRD-1"));
        assert_eq!(draft.description, "24-port switch");
    }
}
