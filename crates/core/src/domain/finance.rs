//! Receivables and payables.
//!
//! Invoices and expenses share one amount breakdown. `total` and `balance`
//! are computed fields, recalculated on every save together with the status.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::money;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Amounts {
    pub original: Decimal,
    pub discount: Decimal,
    pub interest: Decimal,
    pub penalty: Decimal,
    pub surcharge: Decimal,
    pub total: Decimal,
    pub paid: Decimal,
    pub balance: Decimal,
}

impl Amounts {
    /// `total = original + interest + penalty + surcharge - discount`,
    /// `balance = total - paid`.
    pub fn recompute(&mut self) {
        self.total = money::quantize(
            self.original + self.interest + self.penalty + self.surcharge - self.discount,
        );
        self.balance = money::quantize(self.total - self.paid);
    }

    pub fn is_settled(&self) -> bool {
        self.total > Decimal::ZERO && self.paid >= self.total
    }

    pub fn is_partially_paid(&self) -> bool {
        self.paid > Decimal::ZERO && self.paid < self.total
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceOrigin {
    Manual,
    PurchaseOrder,
    Contract,
    Import,
}

impl InvoiceOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::PurchaseOrder => "purchase_order",
            Self::Contract => "contract",
            Self::Import => "import",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "manual" => Some(Self::Manual),
            "purchase_order" => Some(Self::PurchaseOrder),
            "contract" => Some(Self::Contract),
            "import" => Some(Self::Import),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Open,
    Paid,
    Partial,
    Overdue,
    Cancelled,
    Renegotiated,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Paid => "paid",
            Self::Partial => "partial",
            Self::Overdue => "overdue",
            Self::Cancelled => "cancelled",
            Self::Renegotiated => "renegotiated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(Self::Open),
            "paid" => Some(Self::Paid),
            "partial" => Some(Self::Partial),
            "overdue" => Some(Self::Overdue),
            "cancelled" => Some(Self::Cancelled),
            "renegotiated" => Some(Self::Renegotiated),
            _ => None,
        }
    }

    /// Cancelled and renegotiated records keep their status on save.
    pub fn is_frozen(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Renegotiated)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub number: String,
    pub customer_id: String,
    pub origin: InvoiceOrigin,
    pub description: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub settlement_date: Option<NaiveDate>,
    pub amounts: Amounts,
    pub payment_method: String,
    pub status: InvoiceStatus,
    pub contract_id: Option<String>,
    pub attachments: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Every save runs this: recompute the figures, then derive the status.
    pub fn recalculate(&mut self, today: NaiveDate) {
        self.amounts.recompute();
        if self.status.is_frozen() {
            return;
        }

        if self.amounts.is_settled() {
            self.status = InvoiceStatus::Paid;
            if self.settlement_date.is_none() {
                self.settlement_date = Some(today);
            }
        } else if self.amounts.is_partially_paid() {
            self.status = InvoiceStatus::Partial;
        } else if self.due_date < today {
            self.status = InvoiceStatus::Overdue;
        } else {
            self.status = InvoiceStatus::Open;
        }
    }

    pub fn register_payment(
        &mut self,
        amount: Decimal,
        today: NaiveDate,
    ) -> Result<(), DomainError> {
        if amount <= Decimal::ZERO {
            return Err(DomainError::Validation("payment amount must be positive".to_owned()));
        }
        if self.status.is_frozen() {
            return Err(DomainError::Validation(
                "payments cannot be registered on a cancelled or renegotiated invoice".to_owned(),
            ));
        }
        self.amounts.paid = money::quantize(self.amounts.paid + amount);
        self.recalculate(today);
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseStatus {
    Pending,
    Paid,
    Overdue,
    Cancelled,
}

impl ExpenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Overdue => "overdue",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "paid" => Some(Self::Paid),
            "overdue" => Some(Self::Overdue),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub id: String,
    pub document_number: String,
    pub supplier_id: Option<String>,
    pub purchase_order_id: Option<String>,
    pub cost_center_id: Option<String>,
    pub description: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub settlement_date: Option<NaiveDate>,
    pub amounts: Amounts,
    pub payment_method: String,
    pub status: ExpenseStatus,
    pub attachments: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Expense {
    pub fn recalculate(&mut self, today: NaiveDate) {
        self.amounts.recompute();
        if self.status == ExpenseStatus::Cancelled {
            return;
        }

        if self.amounts.is_settled() {
            self.status = ExpenseStatus::Paid;
            if self.settlement_date.is_none() {
                self.settlement_date = Some(today);
            }
        } else if self.due_date < today {
            self.status = ExpenseStatus::Overdue;
        } else {
            self.status = ExpenseStatus::Pending;
        }
    }

    pub fn register_payment(
        &mut self,
        amount: Decimal,
        today: NaiveDate,
    ) -> Result<(), DomainError> {
        if amount <= Decimal::ZERO {
            return Err(DomainError::Validation("payment amount must be positive".to_owned()));
        }
        if self.status == ExpenseStatus::Cancelled {
            return Err(DomainError::Validation(
                "payments cannot be registered on a cancelled expense".to_owned(),
            ));
        }
        self.amounts.paid = money::quantize(self.amounts.paid + amount);
        self.recalculate(today);
        Ok(())
    }
}
