use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::money;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketingChannel {
    pub id: String,
    pub name: String,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketingSpend {
    pub id: String,
    pub channel_id: String,
    pub year: i32,
    pub month: u32,
    pub amount: Decimal,
}

impl MarketingSpend {
    pub fn validate(&self) -> Result<(), DomainError> {
        if !(1..=12).contains(&self.month) {
            return Err(DomainError::Validation("month must be between 1 and 12".to_owned()));
        }
        if self.amount.is_sign_negative() {
            return Err(DomainError::Validation("spend amount cannot be negative".to_owned()));
        }
        Ok(())
    }
}

/// Customer-acquisition cost for one month: spend over new customers.
/// `None` when no customer landed, so the report can show a dash.
pub fn acquisition_cost(total_spend: Decimal, new_customers: i64) -> Option<Decimal> {
    if new_customers <= 0 {
        return None;
    }
    Some(money::quantize(total_spend / Decimal::from(new_customers)))
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{acquisition_cost, MarketingSpend};

    #[test]
    fn month_is_bounded() {
        let mut spend = MarketingSpend {
            id: "MKS-1".to_owned(),
            channel_id: "MKC-1".to_owned(),
            year: 2026,
            month: 8,
            amount: Decimal::new(120_000, 2),
        };
        assert!(spend.validate().is_ok());

        spend.month = 0;
        assert!(spend.validate().is_err());
        spend.month = 13;
        assert!(spend.validate().is_err());
    }

    #[test]
    fn acquisition_cost_divides_spend_by_new_customers() {
        assert_eq!(
            acquisition_cost(Decimal::new(120_000, 2), 4),
            Some(Decimal::new(30_000, 2))
        );
        assert_eq!(acquisition_cost(Decimal::new(120_000, 2), 0), None);
    }
}
