use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Crm,
    Catalog,
    Purchasing,
    Inventory,
    Finance,
    Contracts,
    Operations,
    Persistence,
    System,
}

impl AuditCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crm => "crm",
            Self::Catalog => "catalog",
            Self::Purchasing => "purchasing",
            Self::Inventory => "inventory",
            Self::Finance => "finance",
            Self::Contracts => "contracts",
            Self::Operations => "operations",
            Self::Persistence => "persistence",
            Self::System => "system",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Rejected,
    Failed,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }
}

/// One recorded business event, keyed to the entity it happened to.
///
/// The event type is always `{category}.{action}` so the log can be filtered
/// by module without a separate column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub entity_kind: String,
    pub entity_id: String,
    pub correlation_id: String,
    pub event_type: String,
    pub actor: String,
    pub outcome: AuditOutcome,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        entity_kind: impl Into<String>,
        entity_id: impl Into<String>,
        correlation_id: impl Into<String>,
        category: AuditCategory,
        action: &str,
        actor: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            entity_kind: entity_kind.into(),
            entity_id: entity_id.into(),
            correlation_id: correlation_id.into(),
            event_type: format!("{}.{action}", category.as_str()),
            actor: actor.into(),
            outcome,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metadata_json(&self) -> String {
        serde_json::to_string(&self.metadata).unwrap_or_else(|_| "{}".to_owned())
    }
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditCategory, AuditEvent, AuditOutcome};

    #[test]
    fn events_carry_correlation_fields() {
        let event = AuditEvent::new(
            "purchase_order",
            "PO-2026-0042",
            "req-123",
            AuditCategory::Purchasing,
            "receipt_posted",
            "warehouse",
            AuditOutcome::Success,
        )
        .with_metadata("quantity", "4")
        .with_metadata("line", "POL-1");

        assert_eq!(event.correlation_id, "req-123");
        assert_eq!(event.entity_id, "PO-2026-0042");
        assert_eq!(event.entity_kind, "purchase_order");
        assert_eq!(event.event_type, "purchasing.receipt_posted");
        assert_eq!(event.outcome.as_str(), "success");
        assert!(event.metadata.contains_key("quantity"));
    }

    #[test]
    fn metadata_serializes_with_stable_key_order() {
        let event = AuditEvent::new(
            "invoice",
            "INV-1",
            "req-9",
            AuditCategory::Finance,
            "payment_registered",
            "treasury",
            AuditOutcome::Success,
        )
        .with_metadata("paid", "100.00")
        .with_metadata("balance", "50.00");

        assert_eq!(event.metadata_json(), r#"{"balance":"50.00","paid":"100.00"}"#);
    }
}
