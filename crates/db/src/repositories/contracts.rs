//! Recurring contracts: numbering anchored on the sales trail, the status
//! walk, monthly billing, and the renewal lookahead the notifier reads.

use chrono::{Datelike, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use opsdesk_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use opsdesk_core::domain::contracts::{
    AdjustmentIndex, Contract, ContractKind, ContractStatus, RenewalNotice,
};
use opsdesk_core::domain::finance::{Amounts, Invoice, InvoiceOrigin, InvoiceStatus};
use opsdesk_core::errors::DomainError;
use opsdesk_core::numbering;

use crate::repositories::finance::{insert_invoice, next_invoice_sequence};
use crate::repositories::{
    insert_audit_event, parse_decimal, parse_optional_date, parse_timestamp, parse_u32,
    OperationContext, RepositoryError,
};
use crate::DbPool;

#[derive(Clone, Debug)]
pub struct NewContract {
    pub kind: ContractKind,
    pub customer_id: Option<String>,
    pub supplier_id: Option<String>,
    pub opportunity_id: Option<String>,
    pub monthly_value: Decimal,
    pub started_on: Option<NaiveDate>,
    pub ends_on: Option<NaiveDate>,
    pub adjustment_index: AdjustmentIndex,
    pub billing_day: u32,
    pub next_renewal_date: Option<NaiveDate>,
    pub notes: String,
}

pub struct SqlContractRepository {
    pool: DbPool,
}

impl SqlContractRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// The number anchors on the customer's accepted proposal when one
    /// exists, then on their latest proposal, and otherwise gets a short
    /// unique suffix. The anchoring proposal is linked on the contract.
    pub async fn create(&self, new: NewContract) -> Result<Contract, RepositoryError> {
        validate_terms(new.monthly_value, new.billing_day)?;
        match new.kind {
            ContractKind::Revenue if new.customer_id.is_none() => {
                return Err(DomainError::Validation(
                    "a revenue contract needs a customer".to_owned(),
                )
                .into());
            }
            ContractKind::Expense if new.supplier_id.is_none() => {
                return Err(DomainError::Validation(
                    "an expense contract needs a supplier".to_owned(),
                )
                .into());
            }
            _ => {}
        }

        let mut tx = self.pool.begin().await?;

        let anchor = match new.customer_id.as_deref() {
            Some(customer_id) => anchor_proposal(&mut tx, customer_id).await?,
            None => None,
        };
        let mut number = numbering::contract_number(anchor.as_ref().map(|(_, code)| code.as_str()));
        let taken: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM contract WHERE number = ?")
            .bind(&number)
            .fetch_one(&mut *tx)
            .await?;
        if taken > 0 {
            number = numbering::contract_number(None);
        }

        let now = Utc::now();
        let contract = Contract {
            id: numbering::entity_id("CTR"),
            number,
            kind: new.kind,
            customer_id: new.customer_id,
            supplier_id: new.supplier_id,
            opportunity_id: new.opportunity_id,
            proposal_id: anchor.map(|(id, _)| id),
            status: ContractStatus::Drafting,
            monthly_value: new.monthly_value,
            started_on: new.started_on,
            ends_on: new.ends_on,
            adjustment_index: new.adjustment_index,
            billing_day: new.billing_day,
            next_renewal_date: new.next_renewal_date,
            notes: new.notes,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO contract (id, number, kind, customer_id, supplier_id, opportunity_id,
                                   proposal_id, status, monthly_value, started_on, ends_on,
                                   adjustment_index, billing_day, next_renewal_date, notes,
                                   created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&contract.id)
        .bind(&contract.number)
        .bind(contract.kind.as_str())
        .bind(&contract.customer_id)
        .bind(&contract.supplier_id)
        .bind(&contract.opportunity_id)
        .bind(&contract.proposal_id)
        .bind(contract.status.as_str())
        .bind(contract.monthly_value.to_string())
        .bind(contract.started_on.map(|date| date.to_string()))
        .bind(contract.ends_on.map(|date| date.to_string()))
        .bind(contract.adjustment_index.as_str())
        .bind(i64::from(contract.billing_day))
        .bind(contract.next_renewal_date.map(|date| date.to_string()))
        .bind(&contract.notes)
        .bind(contract.created_at.to_rfc3339())
        .bind(contract.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(contract)
    }

    /// Terms stay amendable in any state; the number, counterparties, and
    /// status only move through their dedicated paths.
    pub async fn save(&self, mut contract: Contract) -> Result<Contract, RepositoryError> {
        validate_terms(contract.monthly_value, contract.billing_day)?;
        contract.updated_at = Utc::now();

        let result = sqlx::query(
            "UPDATE contract SET monthly_value = ?, started_on = ?, ends_on = ?,
                                 adjustment_index = ?, billing_day = ?, next_renewal_date = ?,
                                 notes = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(contract.monthly_value.to_string())
        .bind(contract.started_on.map(|date| date.to_string()))
        .bind(contract.ends_on.map(|date| date.to_string()))
        .bind(contract.adjustment_index.as_str())
        .bind(i64::from(contract.billing_day))
        .bind(contract.next_renewal_date.map(|date| date.to_string()))
        .bind(&contract.notes)
        .bind(contract.updated_at.to_rfc3339())
        .bind(&contract.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound.into());
        }

        let row = sqlx::query(&contract_select("id = ?"))
            .bind(&contract.id)
            .fetch_one(&self.pool)
            .await?;
        contract_from_row(row)
    }

    pub async fn transition(
        &self,
        id: &str,
        next: ContractStatus,
        ctx: &OperationContext,
    ) -> Result<Contract, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let mut contract = contract_from_row(
            sqlx::query(&contract_select("id = ?")).bind(id).fetch_one(&mut *tx).await?,
        )?;
        let from = contract.status;
        contract.transition_to(next)?;
        contract.updated_at = Utc::now();

        sqlx::query("UPDATE contract SET status = ?, updated_at = ? WHERE id = ?")
            .bind(contract.status.as_str())
            .bind(contract.updated_at.to_rfc3339())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let event = AuditEvent::new(
            "contract",
            id,
            &ctx.correlation_id,
            AuditCategory::Contracts,
            "status_changed",
            &ctx.actor,
            AuditOutcome::Success,
        )
        .with_metadata("from", from.as_str())
        .with_metadata("to", next.as_str());
        insert_audit_event(&mut tx, &event).await?;

        tx.commit().await?;
        Ok(contract)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Contract>, RepositoryError> {
        let row = sqlx::query(&contract_select("id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(contract_from_row).transpose()
    }

    pub async fn list(
        &self,
        status: Option<ContractStatus>,
    ) -> Result<Vec<Contract>, RepositoryError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&contract_select("status = ? ORDER BY number"))
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query(&contract_select("1 = 1 ORDER BY number"))
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(contract_from_row).collect()
    }

    /// Active contracts whose renewal date falls inside the lookahead
    /// window. The SQL narrows the candidates; the domain rule decides.
    pub async fn renewals_due(
        &self,
        today: NaiveDate,
        window_days: u64,
    ) -> Result<Vec<Contract>, RepositoryError> {
        let horizon = today.checked_add_days(Days::new(window_days)).unwrap_or(today);
        let rows = sqlx::query(&contract_select(
            "status = 'active' AND next_renewal_date IS NOT NULL
               AND next_renewal_date >= ? AND next_renewal_date <= ?
             ORDER BY next_renewal_date, number",
        ))
        .bind(today.to_string())
        .bind(horizon.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut contracts: Vec<Contract> =
            rows.into_iter().map(contract_from_row).collect::<Result<_, _>>()?;
        contracts.retain(|contract| contract.is_due_for_renewal(today, window_days));
        Ok(contracts)
    }

    /// Reminder payloads for the renewal window, one per due contract.
    pub async fn renewal_notices(
        &self,
        today: NaiveDate,
        window_days: u64,
    ) -> Result<Vec<RenewalNotice>, RepositoryError> {
        let due = self.renewals_due(today, window_days).await?;

        let mut notices = Vec::with_capacity(due.len());
        for contract in due {
            let counterparty = self.counterparty_name(&contract).await?;
            let Some(renewal_date) = contract.next_renewal_date else {
                continue;
            };
            notices.push(RenewalNotice {
                contract_number: contract.number,
                counterparty,
                renewal_date,
                monthly_value: contract.monthly_value,
            });
        }
        Ok(notices)
    }

    /// Raises the month's invoice for an active revenue contract. One
    /// invoice per contract and period; a second emission for the same
    /// month is refused.
    pub async fn emit_monthly_invoice(
        &self,
        contract_id: &str,
        year: i32,
        month: u32,
        ctx: &OperationContext,
    ) -> Result<Invoice, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let contract = contract_from_row(
            sqlx::query(&contract_select("id = ?")).bind(contract_id).fetch_one(&mut *tx).await?,
        )?;
        if contract.kind != ContractKind::Revenue {
            return Err(DomainError::Validation(format!(
                "contract {} is an expense contract and does not bill customers",
                contract.number
            ))
            .into());
        }
        if contract.status != ContractStatus::Active {
            return Err(DomainError::Validation(format!(
                "contract {} is {} and cannot bill",
                contract.number,
                contract.status.as_str()
            ))
            .into());
        }
        let customer_id = contract.customer_id.clone().ok_or_else(|| {
            DomainError::Validation(format!("contract {} has no customer", contract.number))
        })?;
        let Some(due_date) = contract.billing_due_date(year, month) else {
            return Err(DomainError::Validation(format!(
                "invalid billing period {year}-{month:02}"
            ))
            .into());
        };

        let period = format!("{year}-{month:02}");
        let existing: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM invoice WHERE contract_id = ? AND substr(due_date, 1, 7) = ?",
        )
        .bind(contract_id)
        .bind(&period)
        .fetch_one(&mut *tx)
        .await?;
        if existing > 0 {
            return Err(DomainError::Validation(format!(
                "contract {} already has an invoice for {period}",
                contract.number
            ))
            .into());
        }

        let today = Utc::now().date_naive();
        let sequence = next_invoice_sequence(&mut tx, today.year()).await?;
        let now = Utc::now();
        let mut invoice = Invoice {
            id: numbering::entity_id("INV"),
            number: numbering::invoice_number(today.year(), sequence),
            customer_id,
            origin: InvoiceOrigin::Contract,
            description: format!("Contract {} billing {period}", contract.number),
            issue_date: today,
            due_date,
            settlement_date: None,
            amounts: Amounts { original: contract.monthly_value, ..Amounts::default() },
            payment_method: String::new(),
            status: InvoiceStatus::Open,
            contract_id: Some(contract.id.clone()),
            attachments: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        invoice.recalculate(today);
        insert_invoice(&mut tx, &invoice).await?;

        let event = AuditEvent::new(
            "contract",
            contract_id,
            &ctx.correlation_id,
            AuditCategory::Contracts,
            "invoice_emitted",
            &ctx.actor,
            AuditOutcome::Success,
        )
        .with_metadata("number", &invoice.number)
        .with_metadata("period", &period);
        insert_audit_event(&mut tx, &event).await?;

        tx.commit().await?;
        Ok(invoice)
    }

    async fn counterparty_name(&self, contract: &Contract) -> Result<String, RepositoryError> {
        if let Some(customer_id) = contract.customer_id.as_deref() {
            let name: Option<String> =
                sqlx::query_scalar("SELECT legal_name FROM customer WHERE id = ?")
                    .bind(customer_id)
                    .fetch_optional(&self.pool)
                    .await?;
            if let Some(name) = name {
                return Ok(name);
            }
        }
        if let Some(supplier_id) = contract.supplier_id.as_deref() {
            let name: Option<String> =
                sqlx::query_scalar("SELECT legal_name FROM supplier WHERE id = ?")
                    .bind(supplier_id)
                    .fetch_optional(&self.pool)
                    .await?;
            if let Some(name) = name {
                return Ok(name);
            }
        }
        Ok(String::new())
    }
}

fn validate_terms(monthly_value: Decimal, billing_day: u32) -> Result<(), DomainError> {
    if monthly_value.is_sign_negative() {
        return Err(DomainError::Validation("monthly value cannot be negative".to_owned()));
    }
    if !(1..=31).contains(&billing_day) {
        return Err(DomainError::Validation(
            "billing day must be between 1 and 31".to_owned(),
        ));
    }
    Ok(())
}

/// Id and code of the proposal a new contract number should anchor on:
/// the customer's most recently accepted proposal, else their latest one.
async fn anchor_proposal(
    conn: &mut sqlx::SqliteConnection,
    customer_id: &str,
) -> Result<Option<(String, String)>, RepositoryError> {
    let accepted: Option<(String, String)> = sqlx::query_as(
        "SELECT p.id, p.code
         FROM proposal p
         JOIN opportunity o ON o.id = p.opportunity_id
         WHERE o.customer_id = ? AND p.status = 'accepted'
         ORDER BY p.updated_at DESC, p.code DESC
         LIMIT 1",
    )
    .bind(customer_id)
    .fetch_optional(&mut *conn)
    .await?;
    if accepted.is_some() {
        return Ok(accepted);
    }

    let latest: Option<(String, String)> = sqlx::query_as(
        "SELECT p.id, p.code
         FROM proposal p
         JOIN opportunity o ON o.id = p.opportunity_id
         WHERE o.customer_id = ?
         ORDER BY p.created_at DESC, p.code DESC
         LIMIT 1",
    )
    .bind(customer_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(latest)
}

fn contract_select(filter: &str) -> String {
    format!(
        "SELECT id, number, kind, customer_id, supplier_id, opportunity_id, proposal_id,
                status, monthly_value, started_on, ends_on, adjustment_index, billing_day,
                next_renewal_date, notes, created_at, updated_at
         FROM contract WHERE {filter}"
    )
}

fn contract_from_row(row: SqliteRow) -> Result<Contract, RepositoryError> {
    let kind_raw: String = row.try_get("kind")?;
    let kind = ContractKind::parse(&kind_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown contract kind: {kind_raw}")))?;
    let status_raw: String = row.try_get("status")?;
    let status = ContractStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown contract status: {status_raw}"))
    })?;
    let index_raw: String = row.try_get("adjustment_index")?;
    let adjustment_index = AdjustmentIndex::parse(&index_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown adjustment index: {index_raw}"))
    })?;

    Ok(Contract {
        id: row.try_get("id")?,
        number: row.try_get("number")?,
        kind,
        customer_id: row.try_get("customer_id")?,
        supplier_id: row.try_get("supplier_id")?,
        opportunity_id: row.try_get("opportunity_id")?,
        proposal_id: row.try_get("proposal_id")?,
        status,
        monthly_value: parse_decimal("monthly_value", row.try_get("monthly_value")?)?,
        started_on: parse_optional_date("started_on", row.try_get("started_on")?)?,
        ends_on: parse_optional_date("ends_on", row.try_get("ends_on")?)?,
        adjustment_index,
        billing_day: parse_u32("billing_day", row.try_get("billing_day")?)?,
        next_renewal_date: parse_optional_date(
            "next_renewal_date",
            row.try_get("next_renewal_date")?,
        )?,
        notes: row.try_get("notes")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
