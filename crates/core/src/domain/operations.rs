use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manufacturer {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetType {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub customer_id: String,
    pub asset_type_id: Option<String>,
    pub manufacturer_id: Option<String>,
    pub model: String,
    pub serial_number: String,
    pub acquired_on: Option<NaiveDate>,
    pub warranty_until: Option<NaiveDate>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

impl Asset {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.serial_number.trim().is_empty() {
            return Err(DomainError::Validation("serial number is required".to_owned()));
        }
        Ok(())
    }

    pub fn under_warranty(&self, today: NaiveDate) -> bool {
        self.warranty_until.is_some_and(|until| until >= today)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceOrderStatus {
    Draft,
    Open,
    InProgress,
    WaitingCustomer,
    WaitingVendor,
    Done,
    Cancelled,
}

impl ServiceOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::WaitingCustomer => "waiting_customer",
            Self::WaitingVendor => "waiting_vendor",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(Self::Draft),
            "open" => Some(Self::Open),
            "in_progress" => Some(Self::InProgress),
            "waiting_customer" => Some(Self::WaitingCustomer),
            "waiting_vendor" => Some(Self::WaitingVendor),
            "done" => Some(Self::Done),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceOrder {
    pub id: String,
    pub number: String,
    pub customer_id: String,
    pub asset_id: Option<String>,
    pub opened_by: String,
    pub assigned_to: String,
    pub status: ServiceOrderStatus,
    pub problem: String,
    pub diagnosis: String,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceOrder {
    pub fn can_transition_to(&self, next: ServiceOrderStatus) -> bool {
        matches!(
            (self.status, next),
            (ServiceOrderStatus::Draft, ServiceOrderStatus::Open)
                | (ServiceOrderStatus::Open, ServiceOrderStatus::InProgress)
                | (ServiceOrderStatus::InProgress, ServiceOrderStatus::WaitingCustomer)
                | (ServiceOrderStatus::InProgress, ServiceOrderStatus::WaitingVendor)
                | (ServiceOrderStatus::WaitingCustomer, ServiceOrderStatus::InProgress)
                | (ServiceOrderStatus::WaitingVendor, ServiceOrderStatus::InProgress)
                | (ServiceOrderStatus::InProgress, ServiceOrderStatus::Done)
                | (ServiceOrderStatus::Draft, ServiceOrderStatus::Cancelled)
                | (ServiceOrderStatus::Open, ServiceOrderStatus::Cancelled)
                | (ServiceOrderStatus::InProgress, ServiceOrderStatus::Cancelled)
                | (ServiceOrderStatus::WaitingCustomer, ServiceOrderStatus::Cancelled)
                | (ServiceOrderStatus::WaitingVendor, ServiceOrderStatus::Cancelled)
        )
    }

    /// Completion stamps `completed_at` exactly once.
    pub fn transition_to(
        &mut self,
        next: ServiceOrderStatus,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if !self.can_transition_to(next) {
            return Err(DomainError::InvalidStatusTransition {
                entity: "service order",
                from: self.status.as_str(),
                to: next.as_str(),
            });
        }

        self.status = next;
        if next == ServiceOrderStatus::Done && self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
        Ok(())
    }
}

pub fn priority_label(priority: u8) -> &'static str {
    match priority {
        1 => "Critical",
        2 => "High",
        3 => "Normal",
        _ => "Low",
    }
}

pub fn validate_priority(priority: u8) -> Result<(), DomainError> {
    if !(1..=4).contains(&priority) {
        return Err(DomainError::Validation("priority must be between 1 and 4".to_owned()));
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    New,
    Assigned,
    Pending,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Assigned => "assigned",
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new" => Some(Self::New),
            "assigned" => Some(Self::Assigned),
            "pending" => Some(Self::Pending),
            "resolved" => Some(Self::Resolved),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub code: String,
    pub customer_id: String,
    pub asset_id: Option<String>,
    pub subject: String,
    pub description: String,
    pub priority: u8,
    pub status: TicketStatus,
    pub opened_by: String,
    pub assigned_to: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    pub fn can_transition_to(&self, next: TicketStatus) -> bool {
        matches!(
            (self.status, next),
            (TicketStatus::New, TicketStatus::Assigned)
                | (TicketStatus::Assigned, TicketStatus::Pending)
                | (TicketStatus::Pending, TicketStatus::Assigned)
                | (TicketStatus::New, TicketStatus::Resolved)
                | (TicketStatus::Assigned, TicketStatus::Resolved)
                | (TicketStatus::Pending, TicketStatus::Resolved)
                | (TicketStatus::Resolved, TicketStatus::Closed)
                | (TicketStatus::Resolved, TicketStatus::Assigned)
        )
    }

    pub fn transition_to(&mut self, next: TicketStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidStatusTransition {
            entity: "ticket",
            from: self.status.as_str(),
            to: next.as_str(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketInteraction {
    pub id: String,
    pub ticket_id: String,
    pub author: String,
    pub body: String,
    pub internal: bool,
    pub posted_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketResolution {
    pub id: String,
    pub ticket_id: String,
    pub summary: String,
    pub minutes_spent: i64,
    pub resolved_by: String,
    pub resolved_at: DateTime<Utc>,
}

impl TicketResolution {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.summary.trim().is_empty() {
            return Err(DomainError::Validation("resolution summary is required".to_owned()));
        }
        if self.minutes_spent < 0 {
            return Err(DomainError::Validation("minutes spent cannot be negative".to_owned()));
        }
        Ok(())
    }
}
