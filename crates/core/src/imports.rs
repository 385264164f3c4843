//! CSV product import parsing.
//!
//! The parser is tolerant row by row: a malformed row lands in the error
//! list with its line number and the remaining rows still import. Matching
//! and persistence happen in the catalog repository; this module only turns
//! bytes into candidate rows.

use std::io::Read;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::catalog::{PricingMethod, ProductKind};
use crate::errors::DomainError;
use crate::money;

pub const PRODUCT_IMPORT_HEADERS: &[&str] = &[
    "sku",
    "name",
    "category",
    "kind",
    "pricing_method",
    "standard_cost",
    "markup_pct",
    "list_price",
    "unit",
];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductRow {
    pub sku: Option<String>,
    pub name: String,
    pub category: Option<String>,
    pub kind: ProductKind,
    pub pricing_method: PricingMethod,
    pub standard_cost: Decimal,
    pub markup_pct: Decimal,
    pub list_price: Decimal,
    pub unit: String,
}

#[derive(Debug, Default)]
pub struct ParsedImport {
    /// Valid rows, paired with their 1-based file line.
    pub rows: Vec<(u64, ProductRow)>,
    pub errors: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub created: usize,
    pub updated: usize,
    pub errors: Vec<String>,
}

impl ImportReport {
    pub fn summary(&self) -> String {
        format!(
            "{} created, {} updated, {} failed",
            self.created,
            self.updated,
            self.errors.len()
        )
    }
}

pub fn parse_product_rows<R: Read>(reader: R) -> Result<ParsedImport, DomainError> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let headers = csv_reader
        .headers()
        .map_err(|error| DomainError::Validation(format!("unreadable csv header: {error}")))?
        .clone();
    let column = |name: &str| -> Option<usize> {
        headers.iter().position(|header| header.eq_ignore_ascii_case(name))
    };

    let Some(name_idx) = column("name") else {
        return Err(DomainError::Validation("csv is missing the 'name' column".to_owned()));
    };
    let sku_idx = column("sku");
    let category_idx = column("category");
    let kind_idx = column("kind");
    let pricing_idx = column("pricing_method");
    let cost_idx = column("standard_cost");
    let markup_idx = column("markup_pct");
    let price_idx = column("list_price");
    let unit_idx = column("unit");

    let mut parsed = ParsedImport::default();
    for (offset, record) in csv_reader.records().enumerate() {
        let line = offset as u64 + 2;
        let record = match record {
            Ok(record) => record,
            Err(error) => {
                parsed.errors.push(format!("row {line}: {error}"));
                continue;
            }
        };

        match parse_record(&record, name_idx, sku_idx, category_idx, kind_idx, pricing_idx,
            cost_idx, markup_idx, price_idx, unit_idx)
        {
            Ok(row) => parsed.rows.push((line, row)),
            Err(error) => parsed.errors.push(format!("row {line}: {error}")),
        }
    }

    Ok(parsed)
}

#[allow(clippy::too_many_arguments)]
fn parse_record(
    record: &csv::StringRecord,
    name_idx: usize,
    sku_idx: Option<usize>,
    category_idx: Option<usize>,
    kind_idx: Option<usize>,
    pricing_idx: Option<usize>,
    cost_idx: Option<usize>,
    markup_idx: Option<usize>,
    price_idx: Option<usize>,
    unit_idx: Option<usize>,
) -> Result<ProductRow, DomainError> {
    let cell = |idx: Option<usize>| -> Option<&str> {
        idx.and_then(|idx| record.get(idx)).filter(|value| !value.is_empty())
    };

    let name = record
        .get(name_idx)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| DomainError::Validation("name is required".to_owned()))?
        .to_owned();

    let kind = match cell(kind_idx) {
        Some(value) => ProductKind::parse(value)
            .ok_or_else(|| DomainError::Validation(format!("unknown kind '{value}'")))?,
        None => ProductKind::Good,
    };
    let pricing_method = match cell(pricing_idx) {
        Some(value) => PricingMethod::parse(value)
            .ok_or_else(|| DomainError::Validation(format!("unknown pricing method '{value}'")))?,
        None => PricingMethod::Markup,
    };

    let decimal_cell = |idx: Option<usize>| -> Result<Decimal, DomainError> {
        match cell(idx) {
            Some(value) => money::parse_flexible(value),
            None => Ok(Decimal::ZERO),
        }
    };

    Ok(ProductRow {
        sku: cell(sku_idx).map(str::to_owned),
        name,
        category: cell(category_idx).map(str::to_owned),
        kind,
        pricing_method,
        standard_cost: decimal_cell(cost_idx)?,
        markup_pct: decimal_cell(markup_idx)?,
        list_price: decimal_cell(price_idx)?,
        unit: cell(unit_idx).unwrap_or("un").to_owned(),
    })
}
