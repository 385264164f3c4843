use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("receipt quantity {requested} exceeds outstanding balance {outstanding}")]
    OverReceipt { requested: Decimal, outstanding: Decimal },
    #[error("exit quantity {requested} exceeds quantity on hand {available}")]
    InsufficientStock { requested: Decimal, available: Decimal },
    #[error("invalid {entity} transition from {from} to {to}")]
    InvalidStatusTransition { entity: &'static str, from: &'static str, to: &'static str },
    #[error("a line must reference exactly one of product or service")]
    LineTargetViolation,
    #[error("{approver} already recorded a decision for this requisition")]
    DuplicateDecision { approver: String },
    #[error("cannot delete {entity}: referenced by {blockers}")]
    DeleteBlocked { entity: &'static str, blockers: String },
    #[error("validation failed: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Conflict { .. } => {
                "The request conflicts with the current state of the record."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Domain(
                error @ (DomainError::DuplicateDecision { .. } | DomainError::DeleteBlocked { .. }),
            ) => Self::Conflict {
                message: error.to_string(),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::Domain(error) => Self::BadRequest {
                message: error.to_string(),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use crate::errors::{ApplicationError, DomainError, InterfaceError};

    #[test]
    fn over_receipt_maps_to_bad_request_interface_error() {
        let interface = ApplicationError::from(DomainError::OverReceipt {
            requested: Decimal::new(8, 0),
            outstanding: Decimal::new(3, 0),
        })
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
    }

    #[test]
    fn bad_request_has_user_safe_message() {
        let interface =
            ApplicationError::from(DomainError::Validation("quantity must be positive".to_owned()))
                .into_interface("req-2");

        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn bad_request_carries_domain_reason() {
        let interface = ApplicationError::from(DomainError::OverReceipt {
            requested: Decimal::new(8, 0),
            outstanding: Decimal::new(3, 0),
        })
        .into_interface("req-3");

        match interface {
            InterfaceError::BadRequest { message, .. } => {
                assert!(message.contains("exceeds outstanding balance"));
            }
            other => panic!("expected bad request, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_decision_maps_to_conflict() {
        let interface =
            ApplicationError::from(DomainError::DuplicateDecision { approver: "ana".to_owned() })
                .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::Conflict { .. }));
        assert_eq!(
            interface.user_message(),
            "The request conflicts with the current state of the record."
        );
    }

    #[test]
    fn delete_blocked_maps_to_conflict() {
        let interface = ApplicationError::from(DomainError::DeleteBlocked {
            entity: "customer",
            blockers: "2 opportunities, 1 contract".to_owned(),
        })
        .into_interface("req-5");

        assert!(matches!(interface, InterfaceError::Conflict { .. }));
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-6");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface = ApplicationError::Configuration("missing smtp relay host".to_owned())
            .into_interface("req-7");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }
}
