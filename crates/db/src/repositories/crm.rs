//! Customers, opportunities, proposals, and sales goals.
//!
//! Proposal codes are issued inside the insert transaction by scanning the
//! current per-day, per-owner maximum, so concurrent creates cannot collide.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use opsdesk_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use opsdesk_core::domain::crm::{
    attainment_pct, Activity, Contact, Customer, Opportunity, OpportunityKind, Proposal,
    ProposalLine, ProposalStatus, SalesGoal, SalesStage,
};
use opsdesk_core::errors::DomainError;
use opsdesk_core::numbering;

use crate::repositories::{
    insert_audit_event, parse_decimal, parse_i32, parse_optional_date, parse_timestamp,
    parse_u32, OperationContext, RepositoryError,
};
use crate::DbPool;

pub struct SqlCustomerRepository {
    pool: DbPool,
}

impl SqlCustomerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, mut customer: Customer) -> Result<Customer, RepositoryError> {
        customer.validate()?;
        customer.updated_at = Utc::now();

        sqlx::query(
            "INSERT INTO customer (id, legal_name, trade_name, tax_id, tax_regime,
                                   contributor_type, email, phone, city, state, credit_limit,
                                   billing_blocked, preferred_distributor_id, notes,
                                   created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 legal_name = excluded.legal_name,
                 trade_name = excluded.trade_name,
                 tax_id = excluded.tax_id,
                 tax_regime = excluded.tax_regime,
                 contributor_type = excluded.contributor_type,
                 email = excluded.email,
                 phone = excluded.phone,
                 city = excluded.city,
                 state = excluded.state,
                 credit_limit = excluded.credit_limit,
                 billing_blocked = excluded.billing_blocked,
                 preferred_distributor_id = excluded.preferred_distributor_id,
                 notes = excluded.notes,
                 updated_at = excluded.updated_at",
        )
        .bind(&customer.id)
        .bind(&customer.legal_name)
        .bind(&customer.trade_name)
        .bind(&customer.tax_id)
        .bind(&customer.tax_regime)
        .bind(&customer.contributor_type)
        .bind(&customer.email)
        .bind(&customer.phone)
        .bind(&customer.city)
        .bind(&customer.state)
        .bind(customer.credit_limit.to_string())
        .bind(i64::from(customer.billing_blocked))
        .bind(&customer.preferred_distributor_id)
        .bind(&customer.notes)
        .bind(customer.created_at.to_rfc3339())
        .bind(customer.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(customer)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Customer>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, legal_name, trade_name, tax_id, tax_regime, contributor_type, email,
                    phone, city, state, credit_limit, billing_blocked, preferred_distributor_id,
                    notes, created_at, updated_at
             FROM customer WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(customer_from_row).transpose()
    }

    pub async fn list(&self) -> Result<Vec<Customer>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, legal_name, trade_name, tax_id, tax_regime, contributor_type, email,
                    phone, city, state, credit_limit, billing_blocked, preferred_distributor_id,
                    notes, created_at, updated_at
             FROM customer ORDER BY legal_name",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(customer_from_row).collect()
    }

    /// Refused while business records reference the customer. Contacts and tag
    /// links are owned rows and go with it.
    pub async fn delete(&self, id: &str, ctx: &OperationContext) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let counts = sqlx::query(
            "SELECT
                 (SELECT COUNT(*) FROM opportunity WHERE customer_id = ?1) AS opportunities,
                 (SELECT COUNT(*) FROM invoice WHERE customer_id = ?1) AS invoices,
                 (SELECT COUNT(*) FROM contract WHERE customer_id = ?1) AS contracts,
                 (SELECT COUNT(*) FROM asset WHERE customer_id = ?1) AS assets,
                 (SELECT COUNT(*) FROM ticket WHERE customer_id = ?1) AS tickets,
                 (SELECT COUNT(*) FROM service_order WHERE customer_id = ?1) AS service_orders",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        let blockers: Vec<String> = [
            blocker(counts.try_get("opportunities")?, "opportunity", "opportunities"),
            blocker(counts.try_get("invoices")?, "invoice", "invoices"),
            blocker(counts.try_get("contracts")?, "contract", "contracts"),
            blocker(counts.try_get("assets")?, "asset", "assets"),
            blocker(counts.try_get("tickets")?, "ticket", "tickets"),
            blocker(counts.try_get("service_orders")?, "service order", "service orders"),
        ]
        .into_iter()
        .flatten()
        .collect();

        if !blockers.is_empty() {
            return Err(DomainError::DeleteBlocked {
                entity: "customer",
                blockers: blockers.join(", "),
            }
            .into());
        }

        sqlx::query("DELETE FROM customer_tag_link WHERE customer_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM contact WHERE customer_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM customer WHERE id = ?").bind(id).execute(&mut *tx).await?;

        let event = AuditEvent::new(
            "customer",
            id,
            &ctx.correlation_id,
            AuditCategory::Crm,
            "customer_deleted",
            &ctx.actor,
            AuditOutcome::Success,
        );
        insert_audit_event(&mut tx, &event).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Replaces the customer's tag set; unknown tag names are created.
    pub async fn set_tags(&self, customer_id: &str, tags: &[String]) -> Result<(), RepositoryError> {
        let wanted: BTreeSet<&str> =
            tags.iter().map(|tag| tag.trim()).filter(|tag| !tag.is_empty()).collect();

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM customer_tag_link WHERE customer_id = ?")
            .bind(customer_id)
            .execute(&mut *tx)
            .await?;

        for name in wanted {
            let existing: Option<String> =
                sqlx::query_scalar("SELECT id FROM customer_tag WHERE name = ?")
                    .bind(name)
                    .fetch_optional(&mut *tx)
                    .await?;

            let tag_id = match existing {
                Some(id) => id,
                None => {
                    let id = numbering::entity_id("TAG");
                    sqlx::query("INSERT INTO customer_tag (id, name) VALUES (?, ?)")
                        .bind(&id)
                        .bind(name)
                        .execute(&mut *tx)
                        .await?;
                    id
                }
            };

            sqlx::query("INSERT INTO customer_tag_link (customer_id, tag_id) VALUES (?, ?)")
                .bind(customer_id)
                .bind(&tag_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn tags_for(&self, customer_id: &str) -> Result<Vec<String>, RepositoryError> {
        let tags = sqlx::query_scalar(
            "SELECT t.name FROM customer_tag t
             JOIN customer_tag_link l ON l.tag_id = t.id
             WHERE l.customer_id = ?
             ORDER BY t.name",
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(tags)
    }

    pub async fn save_contact(&self, contact: Contact) -> Result<Contact, RepositoryError> {
        sqlx::query(
            "INSERT INTO contact (id, customer_id, name, email, phone, decision_role,
                                  is_primary, is_whatsapp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 email = excluded.email,
                 phone = excluded.phone,
                 decision_role = excluded.decision_role,
                 is_primary = excluded.is_primary,
                 is_whatsapp = excluded.is_whatsapp",
        )
        .bind(&contact.id)
        .bind(&contact.customer_id)
        .bind(&contact.name)
        .bind(&contact.email)
        .bind(&contact.phone)
        .bind(&contact.decision_role)
        .bind(i64::from(contact.is_primary))
        .bind(i64::from(contact.is_whatsapp))
        .execute(&self.pool)
        .await?;

        Ok(contact)
    }

    pub async fn list_contacts(&self, customer_id: &str) -> Result<Vec<Contact>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, customer_id, name, email, phone, decision_role, is_primary, is_whatsapp
             FROM contact WHERE customer_id = ?
             ORDER BY is_primary DESC, name",
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(contact_from_row).collect()
    }

    pub async fn delete_contact(&self, id: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM contact WHERE id = ?").bind(id).execute(&self.pool).await?;
        Ok(())
    }
}

pub struct SqlOpportunityRepository {
    pool: DbPool,
}

impl SqlOpportunityRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Saving onto a won stage stamps the close date once.
    pub async fn save(&self, mut opportunity: Opportunity) -> Result<Opportunity, RepositoryError> {
        let stage_row = sqlx::query(
            "SELECT id, name, position, allows_proposal, is_won FROM sales_stage WHERE id = ?",
        )
        .bind(&opportunity.stage_id)
        .fetch_one(&self.pool)
        .await?;
        let stage = stage_from_row(stage_row)?;

        opportunity.close_if_won(&stage, Utc::now().date_naive());
        opportunity.updated_at = Utc::now();

        sqlx::query(
            "INSERT INTO opportunity (id, customer_id, title, kind, stage_id, owner,
                                      estimated_value, expected_close_date, actual_close_date,
                                      notes, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 customer_id = excluded.customer_id,
                 title = excluded.title,
                 kind = excluded.kind,
                 stage_id = excluded.stage_id,
                 owner = excluded.owner,
                 estimated_value = excluded.estimated_value,
                 expected_close_date = excluded.expected_close_date,
                 actual_close_date = excluded.actual_close_date,
                 notes = excluded.notes,
                 updated_at = excluded.updated_at",
        )
        .bind(&opportunity.id)
        .bind(&opportunity.customer_id)
        .bind(&opportunity.title)
        .bind(opportunity.kind.as_str())
        .bind(&opportunity.stage_id)
        .bind(&opportunity.owner)
        .bind(opportunity.estimated_value.to_string())
        .bind(opportunity.expected_close_date.map(|date| date.to_string()))
        .bind(opportunity.actual_close_date.map(|date| date.to_string()))
        .bind(&opportunity.notes)
        .bind(opportunity.created_at.to_rfc3339())
        .bind(opportunity.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(opportunity)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Opportunity>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, customer_id, title, kind, stage_id, owner, estimated_value,
                    expected_close_date, actual_close_date, notes, created_at, updated_at
             FROM opportunity WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(opportunity_from_row).transpose()
    }

    pub async fn list(&self, stage_id: Option<&str>) -> Result<Vec<Opportunity>, RepositoryError> {
        let rows = match stage_id {
            Some(stage_id) => {
                sqlx::query(
                    "SELECT id, customer_id, title, kind, stage_id, owner, estimated_value,
                            expected_close_date, actual_close_date, notes, created_at, updated_at
                     FROM opportunity WHERE stage_id = ? ORDER BY created_at DESC",
                )
                .bind(stage_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, customer_id, title, kind, stage_id, owner, estimated_value,
                            expected_close_date, actual_close_date, notes, created_at, updated_at
                     FROM opportunity ORDER BY created_at DESC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(opportunity_from_row).collect()
    }

    pub async fn delete(&self, id: &str, ctx: &OperationContext) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let counts = sqlx::query(
            "SELECT
                 (SELECT COUNT(*) FROM proposal WHERE opportunity_id = ?1) AS proposals,
                 (SELECT COUNT(*) FROM contract WHERE opportunity_id = ?1) AS contracts",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        let blockers: Vec<String> = [
            blocker(counts.try_get("proposals")?, "proposal", "proposals"),
            blocker(counts.try_get("contracts")?, "contract", "contracts"),
        ]
        .into_iter()
        .flatten()
        .collect();

        if !blockers.is_empty() {
            return Err(DomainError::DeleteBlocked {
                entity: "opportunity",
                blockers: blockers.join(", "),
            }
            .into());
        }

        sqlx::query("DELETE FROM activity WHERE opportunity_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM opportunity WHERE id = ?").bind(id).execute(&mut *tx).await?;

        let event = AuditEvent::new(
            "opportunity",
            id,
            &ctx.correlation_id,
            AuditCategory::Crm,
            "opportunity_deleted",
            &ctx.actor,
            AuditOutcome::Success,
        );
        insert_audit_event(&mut tx, &event).await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn list_stages(&self) -> Result<Vec<SalesStage>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, position, allows_proposal, is_won
             FROM sales_stage ORDER BY position",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(stage_from_row).collect()
    }

    pub async fn save_activity(&self, activity: Activity) -> Result<Activity, RepositoryError> {
        sqlx::query(
            "INSERT INTO activity (id, opportunity_id, kind, summary, due_date, done, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 kind = excluded.kind,
                 summary = excluded.summary,
                 due_date = excluded.due_date,
                 done = excluded.done",
        )
        .bind(&activity.id)
        .bind(&activity.opportunity_id)
        .bind(&activity.kind)
        .bind(&activity.summary)
        .bind(activity.due_date.map(|date| date.to_string()))
        .bind(i64::from(activity.done))
        .bind(activity.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(activity)
    }

    pub async fn list_activities(
        &self,
        opportunity_id: &str,
    ) -> Result<Vec<Activity>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, opportunity_id, kind, summary, due_date, done, created_at
             FROM activity WHERE opportunity_id = ?
             ORDER BY done, due_date IS NULL, due_date, created_at",
        )
        .bind(opportunity_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(activity_from_row).collect()
    }

    pub async fn delete_activity(&self, id: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM activity WHERE id = ?").bind(id).execute(&self.pool).await?;
        Ok(())
    }
}

/// Fields the caller supplies when opening a proposal; code, status, and
/// totals are assigned here.
#[derive(Clone, Debug)]
pub struct NewProposal {
    pub opportunity_id: String,
    pub valid_until: Option<chrono::NaiveDate>,
    pub freight_value: Decimal,
    pub discount_value: Decimal,
    pub notes: String,
}

#[derive(Clone, Debug)]
pub struct ProposalLineDraft {
    pub product_id: Option<String>,
    pub service_id: Option<String>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

pub struct SqlProposalRepository {
    pool: DbPool,
}

impl SqlProposalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Opens a draft proposal with the next per-day, per-owner-initial code.
    /// Refused when the opportunity's stage does not allow proposals.
    pub async fn create(
        &self,
        new: NewProposal,
        ctx: &OperationContext,
    ) -> Result<Proposal, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let opportunity_row = sqlx::query(
            "SELECT id, customer_id, title, kind, stage_id, owner, estimated_value,
                    expected_close_date, actual_close_date, notes, created_at, updated_at
             FROM opportunity WHERE id = ?",
        )
        .bind(&new.opportunity_id)
        .fetch_one(&mut *tx)
        .await?;
        let opportunity = opportunity_from_row(opportunity_row)?;

        let stage_row = sqlx::query(
            "SELECT id, name, position, allows_proposal, is_won FROM sales_stage WHERE id = ?",
        )
        .bind(&opportunity.stage_id)
        .fetch_one(&mut *tx)
        .await?;
        let stage = stage_from_row(stage_row)?;

        if !stage.allows_proposal {
            return Err(DomainError::Validation(format!(
                "stage '{}' does not allow proposals",
                stage.name
            ))
            .into());
        }

        let today = Utc::now().date_naive();
        let prefix = numbering::proposal_code_prefix(today, &opportunity.owner);
        let latest: Option<String> = sqlx::query_scalar(
            "SELECT code FROM proposal WHERE code LIKE ? ORDER BY code DESC LIMIT 1",
        )
        .bind(format!("{prefix}%"))
        .fetch_optional(&mut *tx)
        .await?;
        let sequence =
            latest.as_deref().and_then(numbering::numeric_tail).unwrap_or(0) + 1;

        let now = Utc::now();
        let mut proposal = Proposal {
            id: numbering::entity_id("PRP"),
            opportunity_id: new.opportunity_id,
            code: numbering::proposal_code(today, &opportunity.owner, sequence),
            status: ProposalStatus::Draft,
            valid_until: new.valid_until,
            freight_value: new.freight_value,
            discount_value: new.discount_value,
            total_value: Decimal::ZERO,
            notes: new.notes,
            created_at: now,
            updated_at: now,
        };
        proposal.recompute_total(&[]);

        insert_proposal(&mut tx, &proposal).await?;

        let event = AuditEvent::new(
            "proposal",
            &proposal.id,
            &ctx.correlation_id,
            AuditCategory::Crm,
            "proposal_opened",
            &ctx.actor,
            AuditOutcome::Success,
        )
        .with_metadata("code", &proposal.code);
        insert_audit_event(&mut tx, &event).await?;

        tx.commit().await?;
        Ok(proposal)
    }

    /// Updates the commercial terms of a draft and recomputes the total from
    /// its stored lines.
    pub async fn save(&self, mut proposal: Proposal) -> Result<Proposal, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let current = proposal_from_row(
            sqlx::query(PROPOSAL_SELECT).bind(&proposal.id).fetch_one(&mut *tx).await?,
        )?;
        if current.status != ProposalStatus::Draft {
            return Err(DomainError::Validation(
                "only draft proposals can be edited".to_owned(),
            )
            .into());
        }

        let lines = fetch_proposal_lines(&mut tx, &proposal.id).await?;
        proposal.code = current.code;
        proposal.status = current.status;
        proposal.recompute_total(&lines);
        proposal.updated_at = Utc::now();

        sqlx::query(
            "UPDATE proposal SET valid_until = ?, freight_value = ?, discount_value = ?,
                                 total_value = ?, notes = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(proposal.valid_until.map(|date| date.to_string()))
        .bind(proposal.freight_value.to_string())
        .bind(proposal.discount_value.to_string())
        .bind(proposal.total_value.to_string())
        .bind(&proposal.notes)
        .bind(proposal.updated_at.to_rfc3339())
        .bind(&proposal.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(proposal)
    }

    /// Replaces the line set of a draft proposal and recomputes its total.
    pub async fn replace_lines(
        &self,
        proposal_id: &str,
        drafts: Vec<ProposalLineDraft>,
    ) -> Result<Proposal, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let mut proposal = proposal_from_row(
            sqlx::query(PROPOSAL_SELECT).bind(proposal_id).fetch_one(&mut *tx).await?,
        )?;
        if proposal.status != ProposalStatus::Draft {
            return Err(DomainError::Validation(
                "only draft proposals can be edited".to_owned(),
            )
            .into());
        }

        let mut lines = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let mut line = ProposalLine {
                id: numbering::entity_id("PRL"),
                proposal_id: proposal_id.to_owned(),
                product_id: draft.product_id,
                service_id: draft.service_id,
                description: draft.description,
                quantity: draft.quantity,
                unit_price: draft.unit_price,
                line_total: Decimal::ZERO,
            };
            line.validate()?;
            line.recompute_total();
            lines.push(line);
        }

        sqlx::query("DELETE FROM proposal_line WHERE proposal_id = ?")
            .bind(proposal_id)
            .execute(&mut *tx)
            .await?;

        for line in &lines {
            sqlx::query(
                "INSERT INTO proposal_line (id, proposal_id, product_id, service_id,
                                            description, quantity, unit_price, line_total)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&line.id)
            .bind(&line.proposal_id)
            .bind(&line.product_id)
            .bind(&line.service_id)
            .bind(&line.description)
            .bind(line.quantity.to_string())
            .bind(line.unit_price.to_string())
            .bind(line.line_total.to_string())
            .execute(&mut *tx)
            .await?;
        }

        proposal.recompute_total(&lines);
        proposal.updated_at = Utc::now();

        sqlx::query("UPDATE proposal SET total_value = ?, updated_at = ? WHERE id = ?")
            .bind(proposal.total_value.to_string())
            .bind(proposal.updated_at.to_rfc3339())
            .bind(proposal_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(proposal)
    }

    pub async fn transition(
        &self,
        id: &str,
        next: ProposalStatus,
        ctx: &OperationContext,
    ) -> Result<Proposal, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let mut proposal =
            proposal_from_row(sqlx::query(PROPOSAL_SELECT).bind(id).fetch_one(&mut *tx).await?)?;
        let from = proposal.status.as_str();
        proposal.transition_to(next)?;
        proposal.updated_at = Utc::now();

        sqlx::query("UPDATE proposal SET status = ?, updated_at = ? WHERE id = ?")
            .bind(proposal.status.as_str())
            .bind(proposal.updated_at.to_rfc3339())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let event = AuditEvent::new(
            "proposal",
            id,
            &ctx.correlation_id,
            AuditCategory::Crm,
            "proposal_status_changed",
            &ctx.actor,
            AuditOutcome::Success,
        )
        .with_metadata("from", from)
        .with_metadata("to", proposal.status.as_str());
        insert_audit_event(&mut tx, &event).await?;

        tx.commit().await?;
        Ok(proposal)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Proposal>, RepositoryError> {
        let row = sqlx::query(PROPOSAL_SELECT).bind(id).fetch_optional(&self.pool).await?;
        row.map(proposal_from_row).transpose()
    }

    pub async fn list_for_opportunity(
        &self,
        opportunity_id: &str,
    ) -> Result<Vec<Proposal>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, opportunity_id, code, status, valid_until, freight_value,
                    discount_value, total_value, notes, created_at, updated_at
             FROM proposal WHERE opportunity_id = ? ORDER BY code DESC",
        )
        .bind(opportunity_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(proposal_from_row).collect()
    }

    pub async fn list_lines(
        &self,
        proposal_id: &str,
    ) -> Result<Vec<ProposalLine>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        fetch_proposal_lines(&mut conn, proposal_id).await
    }
}

/// One row of the goal-attainment report.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GoalAttainment {
    /// `None` is the company-wide goal.
    pub salesperson: Option<String>,
    pub target_value: Decimal,
    pub achieved_value: Decimal,
    pub attainment_pct: Option<Decimal>,
}

pub struct SqlSalesGoalRepository {
    pool: DbPool,
}

impl SqlSalesGoalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Keyed on (salesperson, year, month). The upsert is done by hand
    /// because SQLite treats the NULL salesperson of company-wide goals as
    /// distinct in the unique index.
    pub async fn upsert(&self, goal: SalesGoal) -> Result<SalesGoal, RepositoryError> {
        if !(1..=12).contains(&goal.month) {
            return Err(
                DomainError::Validation("month must be between 1 and 12".to_owned()).into()
            );
        }
        if goal.target_value.is_sign_negative() {
            return Err(
                DomainError::Validation("target value cannot be negative".to_owned()).into()
            );
        }

        let mut tx = self.pool.begin().await?;

        let existing: Option<String> = sqlx::query_scalar(
            "SELECT id FROM sales_goal WHERE salesperson IS ? AND year = ? AND month = ?",
        )
        .bind(&goal.salesperson)
        .bind(i64::from(goal.year))
        .bind(i64::from(goal.month))
        .fetch_optional(&mut *tx)
        .await?;

        let stored = match existing {
            Some(id) => {
                sqlx::query("UPDATE sales_goal SET target_value = ? WHERE id = ?")
                    .bind(goal.target_value.to_string())
                    .bind(&id)
                    .execute(&mut *tx)
                    .await?;
                SalesGoal { id, ..goal }
            }
            None => {
                sqlx::query(
                    "INSERT INTO sales_goal (id, salesperson, year, month, target_value)
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&goal.id)
                .bind(&goal.salesperson)
                .bind(i64::from(goal.year))
                .bind(i64::from(goal.month))
                .bind(goal.target_value.to_string())
                .execute(&mut *tx)
                .await?;
                goal
            }
        };

        tx.commit().await?;
        Ok(stored)
    }

    pub async fn list(&self, year: i32) -> Result<Vec<SalesGoal>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, salesperson, year, month, target_value
             FROM sales_goal WHERE year = ?
             ORDER BY month, salesperson IS NOT NULL, salesperson",
        )
        .bind(i64::from(year))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(goal_from_row).collect()
    }

    /// Accepted proposal totals against the month's goals, grouped by the
    /// owning opportunity's salesperson.
    pub async fn attainment(
        &self,
        year: i32,
        month: u32,
    ) -> Result<Vec<GoalAttainment>, RepositoryError> {
        let period = format!("{year}-{month:02}");

        let accepted = sqlx::query(
            "SELECT o.owner AS owner, p.total_value AS total_value
             FROM proposal p
             JOIN opportunity o ON o.id = p.opportunity_id
             WHERE p.status = 'accepted' AND substr(p.updated_at, 1, 7) = ?",
        )
        .bind(&period)
        .fetch_all(&self.pool)
        .await?;

        let mut by_owner: BTreeMap<String, Decimal> = BTreeMap::new();
        let mut company_total = Decimal::ZERO;
        for row in accepted {
            let owner: String = row.try_get("owner")?;
            let total = parse_decimal("total_value", row.try_get("total_value")?)?;
            *by_owner.entry(owner).or_insert(Decimal::ZERO) += total;
            company_total += total;
        }

        let goal_rows = sqlx::query(
            "SELECT id, salesperson, year, month, target_value
             FROM sales_goal WHERE year = ? AND month = ?
             ORDER BY salesperson IS NOT NULL, salesperson",
        )
        .bind(i64::from(year))
        .bind(i64::from(month))
        .fetch_all(&self.pool)
        .await?;

        let mut report = Vec::with_capacity(goal_rows.len());
        for row in goal_rows {
            let goal = goal_from_row(row)?;
            let achieved = match &goal.salesperson {
                Some(name) => by_owner.get(name).copied().unwrap_or(Decimal::ZERO),
                None => company_total,
            };
            report.push(GoalAttainment {
                salesperson: goal.salesperson,
                target_value: goal.target_value,
                achieved_value: achieved,
                attainment_pct: attainment_pct(achieved, goal.target_value),
            });
        }

        Ok(report)
    }
}

const PROPOSAL_SELECT: &str = "SELECT id, opportunity_id, code, status, valid_until, \
                               freight_value, discount_value, total_value, notes, created_at, \
                               updated_at FROM proposal WHERE id = ?";

async fn insert_proposal(
    tx: &mut sqlx::SqliteConnection,
    proposal: &Proposal,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO proposal (id, opportunity_id, code, status, valid_until, freight_value,
                               discount_value, total_value, notes, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&proposal.id)
    .bind(&proposal.opportunity_id)
    .bind(&proposal.code)
    .bind(proposal.status.as_str())
    .bind(proposal.valid_until.map(|date| date.to_string()))
    .bind(proposal.freight_value.to_string())
    .bind(proposal.discount_value.to_string())
    .bind(proposal.total_value.to_string())
    .bind(&proposal.notes)
    .bind(proposal.created_at.to_rfc3339())
    .bind(proposal.updated_at.to_rfc3339())
    .execute(&mut *tx)
    .await?;
    Ok(())
}

async fn fetch_proposal_lines(
    conn: &mut sqlx::SqliteConnection,
    proposal_id: &str,
) -> Result<Vec<ProposalLine>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT id, proposal_id, product_id, service_id, description, quantity, unit_price,
                line_total
         FROM proposal_line WHERE proposal_id = ? ORDER BY rowid",
    )
    .bind(proposal_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(proposal_line_from_row).collect()
}

fn blocker(count: i64, singular: &str, plural: &str) -> Option<String> {
    match count {
        0 => None,
        1 => Some(format!("1 {singular}")),
        n => Some(format!("{n} {plural}")),
    }
}

fn customer_from_row(row: SqliteRow) -> Result<Customer, RepositoryError> {
    Ok(Customer {
        id: row.try_get("id")?,
        legal_name: row.try_get("legal_name")?,
        trade_name: row.try_get("trade_name")?,
        tax_id: row.try_get("tax_id")?,
        tax_regime: row.try_get("tax_regime")?,
        contributor_type: row.try_get("contributor_type")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        city: row.try_get("city")?,
        state: row.try_get("state")?,
        credit_limit: parse_decimal("credit_limit", row.try_get("credit_limit")?)?,
        billing_blocked: row.try_get::<i64, _>("billing_blocked")? != 0,
        preferred_distributor_id: row.try_get("preferred_distributor_id")?,
        notes: row.try_get("notes")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn contact_from_row(row: SqliteRow) -> Result<Contact, RepositoryError> {
    Ok(Contact {
        id: row.try_get("id")?,
        customer_id: row.try_get("customer_id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        decision_role: row.try_get("decision_role")?,
        is_primary: row.try_get::<i64, _>("is_primary")? != 0,
        is_whatsapp: row.try_get::<i64, _>("is_whatsapp")? != 0,
    })
}

fn stage_from_row(row: SqliteRow) -> Result<SalesStage, RepositoryError> {
    Ok(SalesStage {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        position: row.try_get("position")?,
        allows_proposal: row.try_get::<i64, _>("allows_proposal")? != 0,
        is_won: row.try_get::<i64, _>("is_won")? != 0,
    })
}

fn opportunity_from_row(row: SqliteRow) -> Result<Opportunity, RepositoryError> {
    let kind_raw: String = row.try_get("kind")?;
    let kind = OpportunityKind::parse(&kind_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown opportunity kind: {kind_raw}")))?;

    Ok(Opportunity {
        id: row.try_get("id")?,
        customer_id: row.try_get("customer_id")?,
        title: row.try_get("title")?,
        kind,
        stage_id: row.try_get("stage_id")?,
        owner: row.try_get("owner")?,
        estimated_value: parse_decimal("estimated_value", row.try_get("estimated_value")?)?,
        expected_close_date: parse_optional_date(
            "expected_close_date",
            row.try_get("expected_close_date")?,
        )?,
        actual_close_date: parse_optional_date(
            "actual_close_date",
            row.try_get("actual_close_date")?,
        )?,
        notes: row.try_get("notes")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn activity_from_row(row: SqliteRow) -> Result<Activity, RepositoryError> {
    Ok(Activity {
        id: row.try_get("id")?,
        opportunity_id: row.try_get("opportunity_id")?,
        kind: row.try_get("kind")?,
        summary: row.try_get("summary")?,
        due_date: parse_optional_date("due_date", row.try_get("due_date")?)?,
        done: row.try_get::<i64, _>("done")? != 0,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn proposal_from_row(row: SqliteRow) -> Result<Proposal, RepositoryError> {
    let status_raw: String = row.try_get("status")?;
    let status = ProposalStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown proposal status: {status_raw}")))?;

    Ok(Proposal {
        id: row.try_get("id")?,
        opportunity_id: row.try_get("opportunity_id")?,
        code: row.try_get("code")?,
        status,
        valid_until: parse_optional_date("valid_until", row.try_get("valid_until")?)?,
        freight_value: parse_decimal("freight_value", row.try_get("freight_value")?)?,
        discount_value: parse_decimal("discount_value", row.try_get("discount_value")?)?,
        total_value: parse_decimal("total_value", row.try_get("total_value")?)?,
        notes: row.try_get("notes")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn proposal_line_from_row(row: SqliteRow) -> Result<ProposalLine, RepositoryError> {
    Ok(ProposalLine {
        id: row.try_get("id")?,
        proposal_id: row.try_get("proposal_id")?,
        product_id: row.try_get("product_id")?,
        service_id: row.try_get("service_id")?,
        description: row.try_get("description")?,
        quantity: parse_decimal("quantity", row.try_get("quantity")?)?,
        unit_price: parse_decimal("unit_price", row.try_get("unit_price")?)?,
        line_total: parse_decimal("line_total", row.try_get("line_total")?)?,
    })
}

fn goal_from_row(row: SqliteRow) -> Result<SalesGoal, RepositoryError> {
    Ok(SalesGoal {
        id: row.try_get("id")?,
        salesperson: row.try_get("salesperson")?,
        year: parse_i32("year", row.try_get("year")?)?,
        month: parse_u32("month", row.try_get("month")?)?,
        target_value: parse_decimal("target_value", row.try_get("target_value")?)?,
    })
}
