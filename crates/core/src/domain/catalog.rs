use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::money;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCategory {
    pub id: String,
    pub name: String,
    pub slug: String,
}

/// URL-safe slug for a category name.
pub fn slugify(name: &str) -> String {
    let mut slug = String::new();
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_end_matches('-').to_owned()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductKind {
    Good,
    Service,
    Software,
}

impl ProductKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Service => "service",
            Self::Software => "software",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "good" => Some(Self::Good),
            "service" => Some(Self::Service),
            "software" => Some(Self::Software),
            _ => None,
        }
    }

    /// SKU prefix used when the category name is too short to derive one.
    pub fn default_sku_prefix(&self) -> &'static str {
        match self {
            Self::Good => "PRD",
            Self::Service => "SER",
            Self::Software => "SFT",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingMethod {
    Markup,
    Fixed,
}

impl PricingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Markup => "markup",
            Self::Fixed => "fixed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "markup" => Some(Self::Markup),
            "fixed" => Some(Self::Fixed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub sku: String,
    pub name: String,
    pub category_id: Option<String>,
    pub kind: ProductKind,
    pub pricing_method: PricingMethod,
    pub standard_cost: Decimal,
    pub markup_pct: Decimal,
    pub list_price: Decimal,
    pub unit: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::Validation("product name is required".to_owned()));
        }
        if self.standard_cost.is_sign_negative()
            || self.markup_pct.is_sign_negative()
            || self.list_price.is_sign_negative()
        {
            return Err(DomainError::Validation(
                "cost, markup, and price cannot be negative".to_owned(),
            ));
        }
        Ok(())
    }

    /// Markup pricing derives the sale price from cost; fixed pricing takes
    /// the list price as entered.
    pub fn sale_price(&self) -> Decimal {
        match self.pricing_method {
            PricingMethod::Markup => {
                let factor = Decimal::ONE + self.markup_pct / Decimal::ONE_HUNDRED;
                money::quantize(self.standard_cost * factor)
            }
            PricingMethod::Fixed => money::quantize(self.list_price),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupplierKind {
    Supplier,
    Distributor,
}

impl SupplierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Supplier => "supplier",
            Self::Distributor => "distributor",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "supplier" => Some(Self::Supplier),
            "distributor" => Some(Self::Distributor),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Supplier {
    pub id: String,
    pub kind: SupplierKind,
    pub legal_name: String,
    pub trade_name: String,
    pub tax_id: String,
    pub email: String,
    pub phone: String,
    pub city: String,
    pub state: String,
    pub rating: Option<u8>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Supplier {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.legal_name.trim().is_empty() {
            return Err(DomainError::Validation("legal name is required".to_owned()));
        }
        if self.tax_id.trim().is_empty() {
            return Err(DomainError::Validation("tax id is required".to_owned()));
        }
        if let Some(rating) = self.rating {
            if !(1..=5).contains(&rating) {
                return Err(DomainError::Validation("rating must be between 1 and 5".to_owned()));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierContact {
    pub id: String,
    pub supplier_id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub role: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SupplierPrice {
    pub id: String,
    pub supplier_id: String,
    pub product_id: String,
    pub unit_cost: Decimal,
    pub currency: String,
    pub valid_until: Option<NaiveDate>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceCategory {
    pub id: String,
    pub name: String,
    pub iss_rate_pct: Decimal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceBilling {
    OneOff,
    Recurring,
}

impl ServiceBilling {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneOff => "one_off",
            Self::Recurring => "recurring",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "one_off" => Some(Self::OneOff),
            "recurring" => Some(Self::Recurring),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub code: String,
    pub name: String,
    pub category_id: Option<String>,
    pub billing: ServiceBilling,
    pub standard_cost: Decimal,
    pub list_price: Decimal,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Service {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::Validation("service name is required".to_owned()));
        }
        if self.standard_cost.is_sign_negative() || self.list_price.is_sign_negative() {
            return Err(DomainError::Validation("cost and price cannot be negative".to_owned()));
        }
        Ok(())
    }
}
