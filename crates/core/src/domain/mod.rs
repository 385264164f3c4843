pub mod catalog;
pub mod contracts;
pub mod crm;
pub mod finance;
pub mod inventory;
pub mod marketing;
pub mod operations;
pub mod purchasing;

use crate::errors::DomainError;

/// Proposal and requisition lines point at a product or a service, never
/// both and never neither.
pub fn validate_line_target(
    product_id: Option<&str>,
    service_id: Option<&str>,
) -> Result<(), DomainError> {
    let has_product = product_id.is_some_and(|id| !id.is_empty());
    let has_service = service_id.is_some_and(|id| !id.is_empty());
    if has_product == has_service {
        return Err(DomainError::LineTargetViolation);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::validate_line_target;

    #[test]
    fn line_must_reference_exactly_one_target() {
        assert!(validate_line_target(Some("PRD-1"), None).is_ok());
        assert!(validate_line_target(None, Some("SER-1")).is_ok());
        assert!(validate_line_target(Some("PRD-1"), Some("SER-1")).is_err());
        assert!(validate_line_target(None, None).is_err());
        assert!(validate_line_target(Some(""), Some("")).is_err());
    }
}
