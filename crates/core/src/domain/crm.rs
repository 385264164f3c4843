use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::validate_line_target;
use crate::errors::DomainError;
use crate::money;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub legal_name: String,
    pub trade_name: String,
    pub tax_id: String,
    pub tax_regime: String,
    pub contributor_type: String,
    pub email: String,
    pub phone: String,
    pub city: String,
    pub state: String,
    pub credit_limit: Decimal,
    pub billing_blocked: bool,
    pub preferred_distributor_id: Option<String>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.legal_name.trim().is_empty() {
            return Err(DomainError::Validation("legal name is required".to_owned()));
        }
        if self.tax_id.trim().is_empty() {
            return Err(DomainError::Validation("tax id is required".to_owned()));
        }
        if self.credit_limit.is_sign_negative() {
            return Err(DomainError::Validation("credit limit cannot be negative".to_owned()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub customer_id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub decision_role: String,
    pub is_primary: bool,
    pub is_whatsapp: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesStage {
    pub id: String,
    pub name: String,
    pub position: i64,
    pub allows_proposal: bool,
    pub is_won: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityKind {
    Project,
    Contract,
}

impl OpportunityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Contract => "contract",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "project" => Some(Self::Project),
            "contract" => Some(Self::Contract),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    pub customer_id: String,
    pub title: String,
    pub kind: OpportunityKind,
    pub stage_id: String,
    pub owner: String,
    pub estimated_value: Decimal,
    pub expected_close_date: Option<NaiveDate>,
    pub actual_close_date: Option<NaiveDate>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Opportunity {
    /// Landing on a won stage stamps the close date once.
    pub fn close_if_won(&mut self, stage: &SalesStage, today: NaiveDate) {
        if stage.is_won && self.actual_close_date.is_none() {
            self.actual_close_date = Some(today);
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    pub opportunity_id: String,
    pub kind: String,
    pub summary: String,
    pub due_date: Option<NaiveDate>,
    pub done: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Draft,
    Sent,
    Accepted,
    Declined,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(Self::Draft),
            "sent" => Some(Self::Sent),
            "accepted" => Some(Self::Accepted),
            "declined" => Some(Self::Declined),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub opportunity_id: String,
    pub code: String,
    pub status: ProposalStatus,
    pub valid_until: Option<NaiveDate>,
    pub freight_value: Decimal,
    pub discount_value: Decimal,
    pub total_value: Decimal,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Proposal {
    pub fn can_transition_to(&self, next: ProposalStatus) -> bool {
        matches!(
            (self.status, next),
            (ProposalStatus::Draft, ProposalStatus::Sent)
                | (ProposalStatus::Sent, ProposalStatus::Accepted)
                | (ProposalStatus::Sent, ProposalStatus::Declined)
        )
    }

    pub fn transition_to(&mut self, next: ProposalStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidStatusTransition {
            entity: "proposal",
            from: self.status.as_str(),
            to: next.as_str(),
        })
    }

    /// Total is recomputed from the lines on every save.
    pub fn recompute_total(&mut self, lines: &[ProposalLine]) {
        let line_sum: Decimal = lines.iter().map(|line| line.line_total).sum();
        self.total_value = money::quantize(line_sum + self.freight_value - self.discount_value);
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProposalLine {
    pub id: String,
    pub proposal_id: String,
    pub product_id: Option<String>,
    pub service_id: Option<String>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

impl ProposalLine {
    pub fn validate(&self) -> Result<(), DomainError> {
        validate_line_target(self.product_id.as_deref(), self.service_id.as_deref())?;
        if self.quantity <= Decimal::ZERO {
            return Err(DomainError::Validation("quantity must be positive".to_owned()));
        }
        if self.unit_price.is_sign_negative() {
            return Err(DomainError::Validation("unit price cannot be negative".to_owned()));
        }
        Ok(())
    }

    pub fn recompute_total(&mut self) {
        self.line_total = money::quantize(self.quantity * self.unit_price);
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SalesGoal {
    pub id: String,
    pub salesperson: Option<String>,
    pub year: i32,
    pub month: u32,
    pub target_value: Decimal,
}

/// Goal attainment as a percentage, `None` when the target is zero.
pub fn attainment_pct(achieved: Decimal, target: Decimal) -> Option<Decimal> {
    if target <= Decimal::ZERO {
        return None;
    }
    Some(money::quantize(achieved / target * Decimal::ONE_HUNDRED))
}
