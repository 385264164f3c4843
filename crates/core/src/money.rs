//! Decimal helpers shared by pricing, finance, and the import pipeline.
//!
//! Values are carried as `rust_decimal::Decimal` end to end and quantized to
//! two decimal places wherever a monetary amount is persisted or displayed.

use rust_decimal::Decimal;

use crate::errors::DomainError;

/// Round a monetary amount to two decimal places (midpoint to even).
pub fn quantize(value: Decimal) -> Decimal {
    value.round_dp(2)
}

/// Parse an amount that may arrive in Brazilian formatting.
///
/// Accepts `R$ 1.234,56`, `1.234,56`, `1234,56`, and plain `1234.56`.
/// When both separators appear, the rightmost one is the decimal mark.
pub fn parse_flexible(input: &str) -> Result<Decimal, DomainError> {
    let trimmed = input.trim().trim_start_matches("R$").trim();
    if trimmed.is_empty() {
        return Err(DomainError::Validation("empty decimal value".to_owned()));
    }

    let cleaned: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    let last_dot = cleaned.rfind('.');
    let last_comma = cleaned.rfind(',');

    let normalized = match (last_dot, last_comma) {
        (Some(dot), Some(comma)) if comma > dot => {
            // 1.234,56: dots group thousands, comma is the decimal mark.
            cleaned.replace('.', "").replace(',', ".")
        }
        (Some(_), Some(_)) => {
            // 1,234.56: commas group thousands.
            cleaned.replace(',', "")
        }
        (None, Some(_)) => cleaned.replace(',', "."),
        _ => cleaned,
    };

    normalized
        .parse::<Decimal>()
        .map_err(|_| DomainError::Validation(format!("invalid decimal value '{}'", input.trim())))
}

/// Format an amount as `R$ 1.234,56` for rendered pages.
pub fn format_brl(value: Decimal) -> String {
    let quantized = quantize(value);
    let negative = quantized.is_sign_negative();
    let text = quantized.abs().to_string();
    let (int_part, frac_part) = match text.split_once('.') {
        Some((int_part, frac_part)) => (int_part.to_owned(), format!("{frac_part:0<2}")),
        None => (text, "00".to_owned()),
    };

    let mut grouped = String::new();
    for (position, digit) in int_part.chars().rev().enumerate() {
        if position > 0 && position % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(digit);
    }
    let grouped: String = grouped.chars().rev().collect();

    let sign = if negative { "-" } else { "" };
    format!("{sign}R$ {grouped},{frac_part}")
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{format_brl, parse_flexible, quantize};

    #[test]
    fn quantizes_to_two_places() {
        assert_eq!(quantize(Decimal::new(123456, 3)).to_string(), "123.46");
        assert_eq!(quantize(Decimal::new(10, 0)).to_string(), "10");
    }

    #[test]
    fn parses_brazilian_currency_strings() {
        assert_eq!(parse_flexible("R$ 1.234,56").unwrap(), Decimal::new(123456, 2));
        assert_eq!(parse_flexible("1.234,56").unwrap(), Decimal::new(123456, 2));
        assert_eq!(parse_flexible("1234,56").unwrap(), Decimal::new(123456, 2));
        assert_eq!(parse_flexible("12,5").unwrap(), Decimal::new(125, 1));
    }

    #[test]
    fn parses_plain_decimal_strings() {
        assert_eq!(parse_flexible("1234.56").unwrap(), Decimal::new(123456, 2));
        assert_eq!(parse_flexible("1,234.56").unwrap(), Decimal::new(123456, 2));
        assert_eq!(parse_flexible("  42 ").unwrap(), Decimal::new(42, 0));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_flexible("").is_err());
        assert!(parse_flexible("R$ ").is_err());
        assert!(parse_flexible("abc").is_err());
    }

    #[test]
    fn formats_with_thousand_groups() {
        assert_eq!(format_brl(Decimal::new(123456, 2)), "R$ 1.234,56");
        assert_eq!(format_brl(Decimal::new(50, 1)), "R$ 5,00");
        assert_eq!(format_brl(Decimal::new(-987654321, 2)), "-R$ 9.876.543,21");
        assert_eq!(format_brl(Decimal::ZERO), "R$ 0,00");
    }
}
