//! Stock items and the movement log.
//!
//! `quantity_on_hand` changes only through movements; every mutation returns
//! the movement quantity and resulting level so callers can append the log
//! row in the same transaction.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Entry,
    Exit,
    Adjustment,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Exit => "exit",
            Self::Adjustment => "adjustment",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "entry" => Some(Self::Entry),
            "exit" => Some(Self::Exit),
            "adjustment" => Some(Self::Adjustment),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StockItem {
    pub id: String,
    pub product_id: String,
    pub quantity_on_hand: Decimal,
    pub minimum_quantity: Decimal,
    pub location: String,
}

impl StockItem {
    pub fn is_below_minimum(&self) -> bool {
        self.quantity_on_hand < self.minimum_quantity
    }

    /// Goods in. Returns the resulting quantity for the movement row.
    pub fn receive(&mut self, quantity: Decimal) -> Result<Decimal, DomainError> {
        if quantity <= Decimal::ZERO {
            return Err(DomainError::Validation("entry quantity must be positive".to_owned()));
        }
        self.quantity_on_hand += quantity;
        Ok(self.quantity_on_hand)
    }

    /// Goods out. Refused when it would drive the level negative.
    pub fn issue(&mut self, quantity: Decimal) -> Result<Decimal, DomainError> {
        if quantity <= Decimal::ZERO {
            return Err(DomainError::Validation("exit quantity must be positive".to_owned()));
        }
        if quantity > self.quantity_on_hand {
            return Err(DomainError::InsufficientStock {
                requested: quantity,
                available: self.quantity_on_hand,
            });
        }
        self.quantity_on_hand -= quantity;
        Ok(self.quantity_on_hand)
    }

    /// Stocktake recount. Returns the signed delta for the movement row.
    pub fn adjust_to(&mut self, counted: Decimal) -> Result<Decimal, DomainError> {
        if counted.is_sign_negative() {
            return Err(DomainError::Validation(
                "counted quantity cannot be negative".to_owned(),
            ));
        }
        let delta = counted - self.quantity_on_hand;
        self.quantity_on_hand = counted;
        Ok(delta)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: String,
    pub stock_item_id: String,
    pub movement_type: MovementType,
    pub quantity: Decimal,
    pub resulting_quantity: Decimal,
    pub note: String,
    pub moved_by: String,
    pub moved_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use crate::errors::DomainError;

    use super::StockItem;

    fn item(on_hand: i64, minimum: i64) -> StockItem {
        StockItem {
            id: "STK-1".to_owned(),
            product_id: "PRD-1".to_owned(),
            quantity_on_hand: Decimal::new(on_hand, 0),
            minimum_quantity: Decimal::new(minimum, 0),
            location: "Main".to_owned(),
        }
    }

    #[test]
    fn receive_raises_the_level() {
        let mut item = item(3, 1);
        let resulting = item.receive(Decimal::new(4, 0)).expect("entry");
        assert_eq!(resulting, Decimal::new(7, 0));
        assert_eq!(item.quantity_on_hand, Decimal::new(7, 0));
    }

    #[test]
    fn issue_refuses_to_go_negative() {
        let mut item = item(3, 1);
        let error = item.issue(Decimal::new(5, 0)).expect_err("insufficient stock");
        assert_eq!(
            error,
            DomainError::InsufficientStock {
                requested: Decimal::new(5, 0),
                available: Decimal::new(3, 0),
            }
        );
        assert_eq!(item.quantity_on_hand, Decimal::new(3, 0));
    }

    #[test]
    fn issue_to_exactly_zero_is_allowed() {
        let mut item = item(3, 1);
        let resulting = item.issue(Decimal::new(3, 0)).expect("exit to zero");
        assert_eq!(resulting, Decimal::ZERO);
    }

    #[test]
    fn adjustment_returns_the_signed_delta() {
        let mut item = item(10, 1);
        assert_eq!(item.adjust_to(Decimal::new(7, 0)).unwrap(), Decimal::new(-3, 0));
        assert_eq!(item.adjust_to(Decimal::new(12, 0)).unwrap(), Decimal::new(5, 0));
        assert!(item.adjust_to(Decimal::new(-1, 0)).is_err());
    }

    #[test]
    fn below_minimum_flags_shortage() {
        assert!(item(0, 1).is_below_minimum());
        assert!(!item(1, 1).is_below_minimum());
    }
}
