//! Formatters for the human-readable codes issued across the modules.
//!
//! Repositories find the current maximum for a period and call these helpers
//! inside the insert transaction, so codes stay unique and monotonic within
//! their scope.

use chrono::NaiveDate;
use uuid::Uuid;

/// Random row id with an entity prefix, e.g. `CUS-4f9a…`.
pub fn entity_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

/// Trailing digit run of an issued code, used to continue a sequence.
pub fn numeric_tail(code: &str) -> Option<u32> {
    let digits: String =
        code.chars().rev().take_while(|c| c.is_ascii_digit()).collect::<String>();
    if digits.is_empty() {
        return None;
    }
    digits.chars().rev().collect::<String>().parse().ok()
}

pub fn owner_initial(owner: &str) -> char {
    owner
        .chars()
        .find(|c| c.is_alphabetic())
        .map(|c| c.to_ascii_uppercase())
        .unwrap_or('X')
}

/// Date + owner initial prefix shared by one day's proposals, e.g. `20260823M`.
pub fn proposal_code_prefix(date: NaiveDate, owner: &str) -> String {
    format!("{}{}", date.format("%Y%m%d"), owner_initial(owner))
}

pub fn proposal_code(date: NaiveDate, owner: &str, sequence: u32) -> String {
    format!("{}{sequence:03}", proposal_code_prefix(date, owner))
}

pub fn invoice_number(year: i32, sequence: u32) -> String {
    format!("{year}-{sequence:07}")
}

pub fn purchase_order_code(year: i32, sequence: u32) -> String {
    format!("PO-{year}-{sequence:04}")
}

pub fn service_order_number(year: i32, sequence: u32) -> String {
    format!("OS-{year}-{sequence:04}")
}

pub fn ticket_code(sequence: u32) -> String {
    format!("TKT-{sequence:06}")
}

pub fn requisition_code(year: i32, sequence: u32) -> String {
    format!("REQ-{year}-{sequence:04}")
}

/// Three-character SKU prefix from the category name, or the kind fallback.
pub fn sku_prefix(category_name: Option<&str>, fallback: &str) -> String {
    let from_category: String = category_name
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(3)
        .collect::<String>()
        .to_ascii_uppercase();

    if from_category.len() == 3 {
        from_category
    } else {
        fallback.to_owned()
    }
}

pub fn sku(prefix: &str, sequence: u32) -> String {
    format!("{prefix}-{sequence:03}")
}

/// Contract numbers anchor on a proposal code when one exists.
pub fn contract_number(anchor: Option<&str>) -> String {
    match anchor {
        Some(code) if !code.is_empty() => format!("CTR-{code}"),
        _ => {
            let suffix = Uuid::new_v4().simple().to_string();
            format!("CTR-{}", suffix[..8].to_ascii_uppercase())
        }
    }
}
