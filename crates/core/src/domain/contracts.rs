use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::money;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
    Revenue,
    Expense,
}

impl ContractKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Revenue => "revenue",
            Self::Expense => "expense",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "revenue" => Some(Self::Revenue),
            "expense" => Some(Self::Expense),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentIndex {
    Igpm,
    Ipca,
    Fixed,
}

impl AdjustmentIndex {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Igpm => "igpm",
            Self::Ipca => "ipca",
            Self::Fixed => "fixed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "igpm" => Some(Self::Igpm),
            "ipca" => Some(Self::Ipca),
            "fixed" => Some(Self::Fixed),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Drafting,
    Signed,
    Active,
    Suspended,
    Closed,
}

impl ContractStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drafting => "drafting",
            Self::Signed => "signed",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "drafting" => Some(Self::Drafting),
            "signed" => Some(Self::Signed),
            "active" => Some(Self::Active),
            "suspended" => Some(Self::Suspended),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub id: String,
    pub number: String,
    pub kind: ContractKind,
    pub customer_id: Option<String>,
    pub supplier_id: Option<String>,
    pub opportunity_id: Option<String>,
    pub proposal_id: Option<String>,
    pub status: ContractStatus,
    pub monthly_value: Decimal,
    pub started_on: Option<NaiveDate>,
    pub ends_on: Option<NaiveDate>,
    pub adjustment_index: AdjustmentIndex,
    pub billing_day: u32,
    pub next_renewal_date: Option<NaiveDate>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contract {
    pub fn can_transition_to(&self, next: ContractStatus) -> bool {
        matches!(
            (self.status, next),
            (ContractStatus::Drafting, ContractStatus::Signed)
                | (ContractStatus::Signed, ContractStatus::Active)
                | (ContractStatus::Active, ContractStatus::Suspended)
                | (ContractStatus::Suspended, ContractStatus::Active)
                | (ContractStatus::Active, ContractStatus::Closed)
                | (ContractStatus::Suspended, ContractStatus::Closed)
        )
    }

    pub fn transition_to(&mut self, next: ContractStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidStatusTransition {
            entity: "contract",
            from: self.status.as_str(),
            to: next.as_str(),
        })
    }

    /// A notice goes out while the renewal date sits inside
    /// `[today, today + window_days]` and the contract is active.
    pub fn is_due_for_renewal(&self, today: NaiveDate, window_days: u64) -> bool {
        if self.status != ContractStatus::Active {
            return false;
        }
        let Some(renewal) = self.next_renewal_date else {
            return false;
        };
        let horizon = today.checked_add_days(Days::new(window_days)).unwrap_or(today);
        renewal >= today && renewal <= horizon
    }

    /// Due date of the monthly invoice in the given period: the billing day
    /// clamped to the month's length.
    pub fn billing_due_date(&self, year: i32, month: u32) -> Option<NaiveDate> {
        let day = self.billing_day.clamp(1, days_in_month(year, month)?);
        NaiveDate::from_ymd_opt(year, month, day)
    }
}

fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next_month = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some(next_month.signed_duration_since(first).num_days() as u32)
}

/// Payload for one renewal reminder email.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RenewalNotice {
    pub contract_number: String,
    pub counterparty: String,
    pub renewal_date: NaiveDate,
    pub monthly_value: Decimal,
}

impl RenewalNotice {
    pub fn subject(&self) -> String {
        format!("Contract renewal alert - {}", self.contract_number)
    }

    pub fn body(&self) -> String {
        format!(
            "Contract {} with {} reaches its renewal date on {}.\n\
             Current monthly value: {}.\n\n\
             Review the terms and confirm the renewal before the date above.",
            self.contract_number,
            self.counterparty,
            self.renewal_date.format("%Y-%m-%d"),
            money::format_brl(self.monthly_value),
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    use super::{AdjustmentIndex, Contract, ContractKind, ContractStatus, RenewalNotice};

    fn contract(status: ContractStatus, renewal: Option<NaiveDate>) -> Contract {
        Contract {
            id: "CTR-1".to_owned(),
            number: "CTR-20260801M001".to_owned(),
            kind: ContractKind::Revenue,
            customer_id: Some("CUS-1".to_owned()),
            supplier_id: None,
            opportunity_id: None,
            proposal_id: None,
            status,
            monthly_value: Decimal::new(250_000, 2),
            started_on: NaiveDate::from_ymd_opt(2025, 9, 1),
            ends_on: None,
            adjustment_index: AdjustmentIndex::Igpm,
            billing_day: 10,
            next_renewal_date: renewal,
            notes: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn renewal_window_includes_both_edges() {
        let today = NaiveDate::from_ymd_opt(2026, 8, 23).unwrap();
        let in_window = NaiveDate::from_ymd_opt(2026, 9, 10).unwrap();
        let at_horizon = NaiveDate::from_ymd_opt(2026, 9, 22).unwrap();
        let past_horizon = NaiveDate::from_ymd_opt(2026, 9, 23).unwrap();
        let yesterday = NaiveDate::from_ymd_opt(2026, 8, 22).unwrap();

        assert!(contract(ContractStatus::Active, Some(today)).is_due_for_renewal(today, 30));
        assert!(contract(ContractStatus::Active, Some(in_window)).is_due_for_renewal(today, 30));
        assert!(contract(ContractStatus::Active, Some(at_horizon)).is_due_for_renewal(today, 30));
        assert!(!contract(ContractStatus::Active, Some(past_horizon))
            .is_due_for_renewal(today, 30));
        assert!(!contract(ContractStatus::Active, Some(yesterday)).is_due_for_renewal(today, 30));
        assert!(!contract(ContractStatus::Active, None).is_due_for_renewal(today, 30));
    }

    #[test]
    fn only_active_contracts_trigger_notices() {
        let today = NaiveDate::from_ymd_opt(2026, 8, 23).unwrap();
        let renewal = NaiveDate::from_ymd_opt(2026, 9, 1).unwrap();

        assert!(!contract(ContractStatus::Suspended, Some(renewal)).is_due_for_renewal(today, 30));
        assert!(!contract(ContractStatus::Drafting, Some(renewal)).is_due_for_renewal(today, 30));
        assert!(!contract(ContractStatus::Closed, Some(renewal)).is_due_for_renewal(today, 30));
    }

    #[test]
    fn billing_day_clamps_to_month_length() {
        let mut contract = contract(ContractStatus::Active, None);
        contract.billing_day = 31;

        assert_eq!(
            contract.billing_due_date(2026, 2),
            NaiveDate::from_ymd_opt(2026, 2, 28)
        );
        assert_eq!(
            contract.billing_due_date(2024, 2),
            NaiveDate::from_ymd_opt(2024, 2, 29)
        );
        assert_eq!(
            contract.billing_due_date(2026, 8),
            NaiveDate::from_ymd_opt(2026, 8, 31)
        );
    }

    #[test]
    fn status_walk_allows_suspend_and_resume() {
        let mut contract = contract(ContractStatus::Drafting, None);
        contract.transition_to(ContractStatus::Signed).expect("drafting -> signed");
        contract.transition_to(ContractStatus::Active).expect("signed -> active");
        contract.transition_to(ContractStatus::Suspended).expect("active -> suspended");
        contract.transition_to(ContractStatus::Active).expect("suspended -> active");
        contract.transition_to(ContractStatus::Closed).expect("active -> closed");

        assert!(contract.transition_to(ContractStatus::Active).is_err());
    }

    #[test]
    fn notice_text_names_the_contract_and_value() {
        let notice = RenewalNotice {
            contract_number: "CTR-20260801M001".to_owned(),
            counterparty: "Acme Ltda".to_owned(),
            renewal_date: NaiveDate::from_ymd_opt(2026, 9, 12).unwrap(),
            monthly_value: Decimal::new(250_000, 2),
        };

        assert_eq!(notice.subject(), "Contract renewal alert - CTR-20260801M001");
        let body = notice.body();
        assert!(body.contains("Acme Ltda"));
        assert!(body.contains("2026-09-12"));
        assert!(body.contains("R$ 2.500,00"));
    }
}
