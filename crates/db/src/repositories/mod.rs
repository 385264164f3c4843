use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use opsdesk_core::audit::AuditEvent;
use opsdesk_core::errors::DomainError;

pub mod catalog;
pub mod contracts;
pub mod crm;
pub mod finance;
pub mod inventory;
pub mod marketing;
pub mod operations;
pub mod purchasing;
pub mod reports;

pub use catalog::{
    NewProduct, NewService, SqlProductRepository, SqlServiceRepository, SqlSupplierRepository,
};
pub use contracts::{NewContract, SqlContractRepository};
pub use crm::{
    GoalAttainment, NewProposal, ProposalLineDraft, SqlCustomerRepository,
    SqlOpportunityRepository, SqlProposalRepository, SqlSalesGoalRepository,
};
pub use finance::{NewExpense, NewInvoice, SqlExpenseRepository, SqlInvoiceRepository};
pub use inventory::SqlStockRepository;
pub use marketing::{AcquisitionCostRow, SqlMarketingRepository};
pub use operations::{
    NewServiceOrder, NewTicket, SqlAssetRepository, SqlServiceOrderRepository, SqlTicketRepository,
};
pub use purchasing::{
    NewRequisition, RequisitionLineDraft, SqlCostCenterRepository, SqlPurchaseOrderRepository,
    SqlRequisitionRepository,
};
pub use reports::{DashboardSummary, SqlReportsRepository, StageFunnelRow, TicketLoadRow};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Actor and correlation id recorded with every mutating call.
#[derive(Clone, Debug)]
pub struct OperationContext {
    pub actor: String,
    pub correlation_id: String,
}

impl OperationContext {
    pub fn new(actor: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self { actor: actor.into(), correlation_id: correlation_id.into() }
    }
}

pub(crate) async fn insert_audit_event(
    conn: &mut sqlx::SqliteConnection,
    event: &AuditEvent,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO audit_event (id, entity_kind, entity_id, event_type, actor, outcome,
                                  correlation_id, metadata, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&event.event_id)
    .bind(&event.entity_kind)
    .bind(&event.entity_id)
    .bind(&event.event_type)
    .bind(&event.actor)
    .bind(event.outcome.as_str())
    .bind(&event.correlation_id)
    .bind(event.metadata_json())
    .bind(event.occurred_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) fn parse_decimal(
    column: &'static str,
    value: String,
) -> Result<Decimal, RepositoryError> {
    value
        .parse::<Decimal>()
        .map_err(|error| RepositoryError::Decode(format!("invalid decimal in {column}: {error}")))
}

pub(crate) fn parse_timestamp(
    column: &'static str,
    value: String,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|parsed| parsed.with_timezone(&Utc)).map_err(
        |error| RepositoryError::Decode(format!("invalid timestamp in {column}: {error}")),
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &'static str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|raw| parse_timestamp(column, raw)).transpose()
}

pub(crate) fn parse_date(
    column: &'static str,
    value: String,
) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(&value, "%Y-%m-%d")
        .map_err(|error| RepositoryError::Decode(format!("invalid date in {column}: {error}")))
}

pub(crate) fn parse_optional_date(
    column: &'static str,
    value: Option<String>,
) -> Result<Option<NaiveDate>, RepositoryError> {
    value.map(|raw| parse_date(column, raw)).transpose()
}

pub(crate) fn parse_i32(column: &'static str, value: i64) -> Result<i32, RepositoryError> {
    i32::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("{column} out of range: {value}")))
}

pub(crate) fn parse_u32(column: &'static str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("{column} out of range: {value}")))
}

pub(crate) fn parse_u8(column: &'static str, value: i64) -> Result<u8, RepositoryError> {
    u8::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("{column} out of range: {value}")))
}

pub(crate) fn parse_string_list(
    column: &'static str,
    value: String,
) -> Result<Vec<String>, RepositoryError> {
    serde_json::from_str(&value)
        .map_err(|error| RepositoryError::Decode(format!("invalid json in {column}: {error}")))
}
