//! Field operations: the asset base, service orders, and the helpdesk.

use chrono::{Datelike, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use opsdesk_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use opsdesk_core::domain::operations::{
    validate_priority, Asset, AssetType, Manufacturer, ServiceOrder, ServiceOrderStatus, Ticket,
    TicketInteraction, TicketResolution, TicketStatus,
};
use opsdesk_core::errors::DomainError;
use opsdesk_core::numbering;

use crate::repositories::{
    insert_audit_event, parse_optional_date, parse_optional_timestamp, parse_timestamp, parse_u8,
    OperationContext, RepositoryError,
};
use crate::DbPool;

pub struct SqlAssetRepository {
    pool: DbPool,
}

impl SqlAssetRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get-or-create by name; the name is the identity.
    pub async fn upsert_manufacturer(&self, name: &str) -> Result<Manufacturer, RepositoryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::Validation("manufacturer name is required".to_owned()).into());
        }

        if let Some(id) =
            sqlx::query_scalar::<_, String>("SELECT id FROM manufacturer WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?
        {
            return Ok(Manufacturer { id, name: name.to_owned() });
        }

        let manufacturer = Manufacturer { id: numbering::entity_id("MFR"), name: name.to_owned() };
        sqlx::query("INSERT INTO manufacturer (id, name) VALUES (?, ?)")
            .bind(&manufacturer.id)
            .bind(&manufacturer.name)
            .execute(&self.pool)
            .await?;
        Ok(manufacturer)
    }

    pub async fn list_manufacturers(&self) -> Result<Vec<Manufacturer>, RepositoryError> {
        let rows = sqlx::query("SELECT id, name FROM manufacturer ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                Ok(Manufacturer { id: row.try_get("id")?, name: row.try_get("name")? })
            })
            .collect()
    }

    pub async fn upsert_asset_type(&self, name: &str) -> Result<AssetType, RepositoryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::Validation("asset type name is required".to_owned()).into());
        }

        if let Some(id) =
            sqlx::query_scalar::<_, String>("SELECT id FROM asset_type WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?
        {
            return Ok(AssetType { id, name: name.to_owned() });
        }

        let asset_type = AssetType { id: numbering::entity_id("AST"), name: name.to_owned() };
        sqlx::query("INSERT INTO asset_type (id, name) VALUES (?, ?)")
            .bind(&asset_type.id)
            .bind(&asset_type.name)
            .execute(&self.pool)
            .await?;
        Ok(asset_type)
    }

    pub async fn list_asset_types(&self) -> Result<Vec<AssetType>, RepositoryError> {
        let rows = sqlx::query("SELECT id, name FROM asset_type ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| Ok(AssetType { id: row.try_get("id")?, name: row.try_get("name")? }))
            .collect()
    }

    pub async fn save(&self, asset: Asset) -> Result<Asset, RepositoryError> {
        asset.validate()?;

        sqlx::query(
            "INSERT INTO asset (id, customer_id, asset_type_id, manufacturer_id, model,
                                serial_number, acquired_on, warranty_until, notes, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 customer_id = excluded.customer_id,
                 asset_type_id = excluded.asset_type_id,
                 manufacturer_id = excluded.manufacturer_id,
                 model = excluded.model,
                 serial_number = excluded.serial_number,
                 acquired_on = excluded.acquired_on,
                 warranty_until = excluded.warranty_until,
                 notes = excluded.notes",
        )
        .bind(&asset.id)
        .bind(&asset.customer_id)
        .bind(&asset.asset_type_id)
        .bind(&asset.manufacturer_id)
        .bind(&asset.model)
        .bind(&asset.serial_number)
        .bind(asset.acquired_on.map(|date| date.to_string()))
        .bind(asset.warranty_until.map(|date| date.to_string()))
        .bind(&asset.notes)
        .bind(asset.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(asset)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Asset>, RepositoryError> {
        let row = sqlx::query(&asset_select("id = ?")).bind(id).fetch_optional(&self.pool).await?;
        row.map(asset_from_row).transpose()
    }

    pub async fn list(&self, customer_id: Option<&str>) -> Result<Vec<Asset>, RepositoryError> {
        let rows = match customer_id {
            Some(customer_id) => {
                sqlx::query(&asset_select("customer_id = ? ORDER BY serial_number"))
                    .bind(customer_id)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query(&asset_select("1 = 1 ORDER BY serial_number"))
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(asset_from_row).collect()
    }

    /// Refused while service orders or tickets still reference the asset.
    pub async fn delete(&self, id: &str, ctx: &OperationContext) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT
                 (SELECT COUNT(*) FROM service_order WHERE asset_id = ?1) AS service_orders,
                 (SELECT COUNT(*) FROM ticket WHERE asset_id = ?1) AS tickets",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        let blockers: Vec<String> = [
            blocker(row.try_get("service_orders")?, "service order", "service orders"),
            blocker(row.try_get("tickets")?, "ticket", "tickets"),
        ]
        .into_iter()
        .flatten()
        .collect();
        if !blockers.is_empty() {
            return Err(DomainError::DeleteBlocked {
                entity: "asset",
                blockers: blockers.join(", "),
            }
            .into());
        }

        let result = sqlx::query("DELETE FROM asset WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound.into());
        }

        let event = AuditEvent::new(
            "asset",
            id,
            &ctx.correlation_id,
            AuditCategory::Operations,
            "asset_deleted",
            &ctx.actor,
            AuditOutcome::Success,
        );
        insert_audit_event(&mut tx, &event).await?;

        tx.commit().await?;
        Ok(())
    }
}

/// Caller-supplied fields for a new service order.
#[derive(Clone, Debug)]
pub struct NewServiceOrder {
    pub customer_id: String,
    pub asset_id: Option<String>,
    pub opened_by: String,
    pub assigned_to: String,
    pub problem: String,
}

pub struct SqlServiceOrderRepository {
    pool: DbPool,
}

impl SqlServiceOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, new: NewServiceOrder) -> Result<ServiceOrder, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let year = Utc::now().date_naive().year();
        let latest: Option<String> = sqlx::query_scalar(
            "SELECT number FROM service_order WHERE number LIKE ? ORDER BY number DESC LIMIT 1",
        )
        .bind(format!("OS-{year}-%"))
        .fetch_optional(&mut *tx)
        .await?;
        let sequence = latest.as_deref().and_then(numbering::numeric_tail).unwrap_or(0) + 1;

        let now = Utc::now();
        let order = ServiceOrder {
            id: numbering::entity_id("SVO"),
            number: numbering::service_order_number(year, sequence),
            customer_id: new.customer_id,
            asset_id: new.asset_id,
            opened_by: new.opened_by,
            assigned_to: new.assigned_to,
            status: ServiceOrderStatus::Draft,
            problem: new.problem,
            diagnosis: String::new(),
            completed_at: None,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO service_order (id, number, customer_id, asset_id, opened_by,
                                        assigned_to, status, problem, diagnosis, completed_at,
                                        created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&order.id)
        .bind(&order.number)
        .bind(&order.customer_id)
        .bind(&order.asset_id)
        .bind(&order.opened_by)
        .bind(&order.assigned_to)
        .bind(order.status.as_str())
        .bind(&order.problem)
        .bind(&order.diagnosis)
        .bind(order.completed_at.map(|at| at.to_rfc3339()))
        .bind(order.created_at.to_rfc3339())
        .bind(order.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(order)
    }

    /// Work description fields; the number and status move elsewhere.
    pub async fn save(&self, order: ServiceOrder) -> Result<ServiceOrder, RepositoryError> {
        let result = sqlx::query(
            "UPDATE service_order SET asset_id = ?, assigned_to = ?, problem = ?,
                                      diagnosis = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&order.asset_id)
        .bind(&order.assigned_to)
        .bind(&order.problem)
        .bind(&order.diagnosis)
        .bind(Utc::now().to_rfc3339())
        .bind(&order.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound.into());
        }

        let row = sqlx::query(&service_order_select("id = ?"))
            .bind(&order.id)
            .fetch_one(&self.pool)
            .await?;
        service_order_from_row(row)
    }

    /// Completion stamps `completed_at` through the domain rule.
    pub async fn transition(
        &self,
        id: &str,
        next: ServiceOrderStatus,
        ctx: &OperationContext,
    ) -> Result<ServiceOrder, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let mut order = service_order_from_row(
            sqlx::query(&service_order_select("id = ?")).bind(id).fetch_one(&mut *tx).await?,
        )?;
        let from = order.status;
        order.transition_to(next, Utc::now())?;
        order.updated_at = Utc::now();

        sqlx::query(
            "UPDATE service_order SET status = ?, completed_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(order.status.as_str())
        .bind(order.completed_at.map(|at| at.to_rfc3339()))
        .bind(order.updated_at.to_rfc3339())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let event = AuditEvent::new(
            "service_order",
            id,
            &ctx.correlation_id,
            AuditCategory::Operations,
            "service_order_status_changed",
            &ctx.actor,
            AuditOutcome::Success,
        )
        .with_metadata("from", from.as_str())
        .with_metadata("to", next.as_str());
        insert_audit_event(&mut tx, &event).await?;

        tx.commit().await?;
        Ok(order)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<ServiceOrder>, RepositoryError> {
        let row = sqlx::query(&service_order_select("id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(service_order_from_row).transpose()
    }

    pub async fn list(
        &self,
        status: Option<ServiceOrderStatus>,
    ) -> Result<Vec<ServiceOrder>, RepositoryError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&service_order_select("status = ? ORDER BY number DESC"))
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query(&service_order_select("1 = 1 ORDER BY number DESC"))
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(service_order_from_row).collect()
    }
}

/// Caller-supplied fields for a new helpdesk ticket.
#[derive(Clone, Debug)]
pub struct NewTicket {
    pub customer_id: String,
    pub asset_id: Option<String>,
    pub subject: String,
    pub description: String,
    pub priority: u8,
    pub opened_by: String,
    pub assigned_to: String,
}

pub struct SqlTicketRepository {
    pool: DbPool,
}

impl SqlTicketRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, new: NewTicket) -> Result<Ticket, RepositoryError> {
        validate_priority(new.priority)?;

        let mut tx = self.pool.begin().await?;

        let latest: Option<String> = sqlx::query_scalar(
            "SELECT code FROM ticket WHERE code LIKE 'TKT-%' ORDER BY code DESC LIMIT 1",
        )
        .fetch_optional(&mut *tx)
        .await?;
        let sequence = latest.as_deref().and_then(numbering::numeric_tail).unwrap_or(0) + 1;

        let now = Utc::now();
        let ticket = Ticket {
            id: numbering::entity_id("TIC"),
            code: numbering::ticket_code(sequence),
            customer_id: new.customer_id,
            asset_id: new.asset_id,
            subject: new.subject,
            description: new.description,
            priority: new.priority,
            status: TicketStatus::New,
            opened_by: new.opened_by,
            assigned_to: new.assigned_to,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO ticket (id, code, customer_id, asset_id, subject, description,
                                 priority, status, opened_by, assigned_to, created_at,
                                 updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&ticket.id)
        .bind(&ticket.code)
        .bind(&ticket.customer_id)
        .bind(&ticket.asset_id)
        .bind(&ticket.subject)
        .bind(&ticket.description)
        .bind(i64::from(ticket.priority))
        .bind(ticket.status.as_str())
        .bind(&ticket.opened_by)
        .bind(&ticket.assigned_to)
        .bind(ticket.created_at.to_rfc3339())
        .bind(ticket.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ticket)
    }

    pub async fn save(&self, ticket: Ticket) -> Result<Ticket, RepositoryError> {
        validate_priority(ticket.priority)?;

        let result = sqlx::query(
            "UPDATE ticket SET asset_id = ?, subject = ?, description = ?, priority = ?,
                               assigned_to = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&ticket.asset_id)
        .bind(&ticket.subject)
        .bind(&ticket.description)
        .bind(i64::from(ticket.priority))
        .bind(&ticket.assigned_to)
        .bind(Utc::now().to_rfc3339())
        .bind(&ticket.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound.into());
        }

        let row =
            sqlx::query(&ticket_select("id = ?")).bind(&ticket.id).fetch_one(&self.pool).await?;
        ticket_from_row(row)
    }

    pub async fn transition(
        &self,
        id: &str,
        next: TicketStatus,
        ctx: &OperationContext,
    ) -> Result<Ticket, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let mut ticket = ticket_from_row(
            sqlx::query(&ticket_select("id = ?")).bind(id).fetch_one(&mut *tx).await?,
        )?;
        let from = ticket.status;
        ticket.transition_to(next)?;
        ticket.updated_at = Utc::now();

        sqlx::query("UPDATE ticket SET status = ?, updated_at = ? WHERE id = ?")
            .bind(ticket.status.as_str())
            .bind(ticket.updated_at.to_rfc3339())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let event = AuditEvent::new(
            "ticket",
            id,
            &ctx.correlation_id,
            AuditCategory::Operations,
            "ticket_status_changed",
            &ctx.actor,
            AuditOutcome::Success,
        )
        .with_metadata("from", from.as_str())
        .with_metadata("to", next.as_str());
        insert_audit_event(&mut tx, &event).await?;

        tx.commit().await?;
        Ok(ticket)
    }

    /// Stores the resolution record and moves the ticket to `resolved`. A
    /// ticket keeps exactly one resolution; resolving again after a reopen
    /// replaces its content.
    pub async fn resolve(
        &self,
        id: &str,
        summary: &str,
        minutes_spent: i64,
        ctx: &OperationContext,
    ) -> Result<TicketResolution, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let mut ticket = ticket_from_row(
            sqlx::query(&ticket_select("id = ?")).bind(id).fetch_one(&mut *tx).await?,
        )?;
        ticket.transition_to(TicketStatus::Resolved)?;
        ticket.updated_at = Utc::now();

        let resolution = TicketResolution {
            id: numbering::entity_id("RES"),
            ticket_id: id.to_owned(),
            summary: summary.to_owned(),
            minutes_spent,
            resolved_by: ctx.actor.clone(),
            resolved_at: Utc::now(),
        };
        resolution.validate()?;

        sqlx::query(
            "INSERT INTO ticket_resolution (id, ticket_id, summary, minutes_spent, resolved_by,
                                            resolved_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(ticket_id) DO UPDATE SET
                 summary = excluded.summary,
                 minutes_spent = excluded.minutes_spent,
                 resolved_by = excluded.resolved_by,
                 resolved_at = excluded.resolved_at",
        )
        .bind(&resolution.id)
        .bind(&resolution.ticket_id)
        .bind(&resolution.summary)
        .bind(resolution.minutes_spent)
        .bind(&resolution.resolved_by)
        .bind(resolution.resolved_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE ticket SET status = ?, updated_at = ? WHERE id = ?")
            .bind(ticket.status.as_str())
            .bind(ticket.updated_at.to_rfc3339())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let event = AuditEvent::new(
            "ticket",
            id,
            &ctx.correlation_id,
            AuditCategory::Operations,
            "ticket_resolved",
            &ctx.actor,
            AuditOutcome::Success,
        )
        .with_metadata("minutes_spent", minutes_spent.to_string());
        insert_audit_event(&mut tx, &event).await?;

        tx.commit().await?;

        // The stored row keeps its original id when this was a re-resolve.
        let row = sqlx::query(
            "SELECT id, ticket_id, summary, minutes_spent, resolved_by, resolved_at
             FROM ticket_resolution WHERE ticket_id = ?",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        resolution_from_row(row)
    }

    pub async fn add_interaction(
        &self,
        ticket_id: &str,
        author: &str,
        body: &str,
        internal: bool,
    ) -> Result<TicketInteraction, RepositoryError> {
        if body.trim().is_empty() {
            return Err(DomainError::Validation("interaction body is required".to_owned()).into());
        }

        // Surfaces a RowNotFound for unknown tickets before inserting.
        sqlx::query_scalar::<_, String>("SELECT id FROM ticket WHERE id = ?")
            .bind(ticket_id)
            .fetch_one(&self.pool)
            .await?;

        let interaction = TicketInteraction {
            id: numbering::entity_id("INT"),
            ticket_id: ticket_id.to_owned(),
            author: author.to_owned(),
            body: body.to_owned(),
            internal,
            posted_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO ticket_interaction (id, ticket_id, author, body, internal, posted_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&interaction.id)
        .bind(&interaction.ticket_id)
        .bind(&interaction.author)
        .bind(&interaction.body)
        .bind(i64::from(interaction.internal))
        .bind(interaction.posted_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(interaction)
    }

    pub async fn list_interactions(
        &self,
        ticket_id: &str,
    ) -> Result<Vec<TicketInteraction>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, ticket_id, author, body, internal, posted_at
             FROM ticket_interaction WHERE ticket_id = ?
             ORDER BY posted_at, rowid",
        )
        .bind(ticket_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(interaction_from_row).collect()
    }

    pub async fn find_resolution(
        &self,
        ticket_id: &str,
    ) -> Result<Option<TicketResolution>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, ticket_id, summary, minutes_spent, resolved_by, resolved_at
             FROM ticket_resolution WHERE ticket_id = ?",
        )
        .bind(ticket_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(resolution_from_row).transpose()
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Ticket>, RepositoryError> {
        let row = sqlx::query(&ticket_select("id = ?")).bind(id).fetch_optional(&self.pool).await?;
        row.map(ticket_from_row).transpose()
    }

    pub async fn list(&self, status: Option<TicketStatus>) -> Result<Vec<Ticket>, RepositoryError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&ticket_select("status = ? ORDER BY code DESC"))
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query(&ticket_select("1 = 1 ORDER BY code DESC"))
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(ticket_from_row).collect()
    }
}

fn blocker(count: i64, singular: &str, plural: &str) -> Option<String> {
    match count {
        0 => None,
        1 => Some(format!("1 {singular}")),
        n => Some(format!("{n} {plural}")),
    }
}

fn asset_select(filter: &str) -> String {
    format!(
        "SELECT id, customer_id, asset_type_id, manufacturer_id, model, serial_number,
                acquired_on, warranty_until, notes, created_at
         FROM asset WHERE {filter}"
    )
}

fn service_order_select(filter: &str) -> String {
    format!(
        "SELECT id, number, customer_id, asset_id, opened_by, assigned_to, status, problem,
                diagnosis, completed_at, created_at, updated_at
         FROM service_order WHERE {filter}"
    )
}

fn ticket_select(filter: &str) -> String {
    format!(
        "SELECT id, code, customer_id, asset_id, subject, description, priority, status,
                opened_by, assigned_to, created_at, updated_at
         FROM ticket WHERE {filter}"
    )
}

fn asset_from_row(row: SqliteRow) -> Result<Asset, RepositoryError> {
    Ok(Asset {
        id: row.try_get("id")?,
        customer_id: row.try_get("customer_id")?,
        asset_type_id: row.try_get("asset_type_id")?,
        manufacturer_id: row.try_get("manufacturer_id")?,
        model: row.try_get("model")?,
        serial_number: row.try_get("serial_number")?,
        acquired_on: parse_optional_date("acquired_on", row.try_get("acquired_on")?)?,
        warranty_until: parse_optional_date("warranty_until", row.try_get("warranty_until")?)?,
        notes: row.try_get("notes")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn service_order_from_row(row: SqliteRow) -> Result<ServiceOrder, RepositoryError> {
    let status_raw: String = row.try_get("status")?;
    let status = ServiceOrderStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown service order status: {status_raw}"))
    })?;

    Ok(ServiceOrder {
        id: row.try_get("id")?,
        number: row.try_get("number")?,
        customer_id: row.try_get("customer_id")?,
        asset_id: row.try_get("asset_id")?,
        opened_by: row.try_get("opened_by")?,
        assigned_to: row.try_get("assigned_to")?,
        status,
        problem: row.try_get("problem")?,
        diagnosis: row.try_get("diagnosis")?,
        completed_at: parse_optional_timestamp("completed_at", row.try_get("completed_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn ticket_from_row(row: SqliteRow) -> Result<Ticket, RepositoryError> {
    let status_raw: String = row.try_get("status")?;
    let status = TicketStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown ticket status: {status_raw}")))?;

    Ok(Ticket {
        id: row.try_get("id")?,
        code: row.try_get("code")?,
        customer_id: row.try_get("customer_id")?,
        asset_id: row.try_get("asset_id")?,
        subject: row.try_get("subject")?,
        description: row.try_get("description")?,
        priority: parse_u8("priority", row.try_get("priority")?)?,
        status,
        opened_by: row.try_get("opened_by")?,
        assigned_to: row.try_get("assigned_to")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn interaction_from_row(row: SqliteRow) -> Result<TicketInteraction, RepositoryError> {
    Ok(TicketInteraction {
        id: row.try_get("id")?,
        ticket_id: row.try_get("ticket_id")?,
        author: row.try_get("author")?,
        body: row.try_get("body")?,
        internal: row.try_get::<i64, _>("internal")? != 0,
        posted_at: parse_timestamp("posted_at", row.try_get("posted_at")?)?,
    })
}

fn resolution_from_row(row: SqliteRow) -> Result<TicketResolution, RepositoryError> {
    Ok(TicketResolution {
        id: row.try_get("id")?,
        ticket_id: row.try_get("ticket_id")?,
        summary: row.try_get("summary")?,
        minutes_spent: row.try_get("minutes_spent")?,
        resolved_by: row.try_get("resolved_by")?,
        resolved_at: parse_timestamp("resolved_at", row.try_get("resolved_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Duration, Utc};
    use rust_decimal::Decimal;

    use opsdesk_core::domain::crm::Customer;
    use opsdesk_core::domain::operations::{Asset, ServiceOrderStatus, TicketStatus};
    use opsdesk_core::errors::DomainError;
    use opsdesk_core::numbering;

    use super::{
        NewServiceOrder, NewTicket, SqlAssetRepository, SqlServiceOrderRepository,
        SqlTicketRepository,
    };
    use crate::repositories::crm::SqlCustomerRepository;
    use crate::repositories::{OperationContext, RepositoryError};
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn ctx() -> OperationContext {
        OperationContext::new("field-team", "corr-operations")
    }

    async fn seed_customer(pool: &DbPool) -> String {
        let now = Utc::now();
        let customer = SqlCustomerRepository::new(pool.clone())
            .save(Customer {
                id: numbering::entity_id("CUS"),
                legal_name: "Sigma Provedora Ltda".to_owned(),
                trade_name: String::new(),
                tax_id: "98.765.432/0001-10".to_owned(),
                tax_regime: String::new(),
                contributor_type: String::new(),
                email: String::new(),
                phone: String::new(),
                city: String::new(),
                state: String::new(),
                credit_limit: Decimal::ZERO,
                billing_blocked: false,
                preferred_distributor_id: None,
                notes: String::new(),
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("customer");
        customer.id
    }

    fn asset(customer_id: &str, serial: &str) -> Asset {
        Asset {
            id: numbering::entity_id("ASS"),
            customer_id: customer_id.to_owned(),
            asset_type_id: None,
            manufacturer_id: None,
            model: "RB4011".to_owned(),
            serial_number: serial.to_owned(),
            acquired_on: Some(Utc::now().date_naive() - Duration::days(200)),
            warranty_until: Some(Utc::now().date_naive() + Duration::days(165)),
            notes: String::new(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn assets_round_trip_with_their_lookups() {
        let pool = setup_pool().await;
        let repo = SqlAssetRepository::new(pool.clone());
        let customer_id = seed_customer(&pool).await;

        let first = repo.upsert_manufacturer("Mikrotik").await.expect("manufacturer");
        let again = repo.upsert_manufacturer("Mikrotik").await.expect("same manufacturer");
        assert_eq!(first.id, again.id);
        let router = repo.upsert_asset_type("Router").await.expect("asset type");

        let mut saved = asset(&customer_id, "SN-0001");
        saved.manufacturer_id = Some(first.id);
        saved.asset_type_id = Some(router.id);
        let saved = repo.save(saved).await.expect("save");

        let found = repo.find_by_id(&saved.id).await.expect("find").expect("present");
        assert_eq!(found.serial_number, "SN-0001");
        assert!(found.under_warranty(Utc::now().date_naive()));
        assert_eq!(repo.list(Some(&customer_id)).await.expect("list").len(), 1);

        let error = repo
            .save(Asset { serial_number: "   ".to_owned(), ..asset(&customer_id, "x") })
            .await
            .expect_err("missing serial");
        assert!(matches!(error, RepositoryError::Domain(DomainError::Validation(_))));
        pool.close().await;
    }

    #[tokio::test]
    async fn asset_delete_is_blocked_by_open_work() {
        let pool = setup_pool().await;
        let assets = SqlAssetRepository::new(pool.clone());
        let tickets = SqlTicketRepository::new(pool.clone());
        let customer_id = seed_customer(&pool).await;

        let tracked = assets.save(asset(&customer_id, "SN-0100")).await.expect("asset");
        tickets
            .create(NewTicket {
                customer_id: customer_id.clone(),
                asset_id: Some(tracked.id.clone()),
                subject: "Link flapping".to_owned(),
                description: String::new(),
                priority: 2,
                opened_by: "helpdesk".to_owned(),
                assigned_to: String::new(),
            })
            .await
            .expect("ticket");

        let error = assets.delete(&tracked.id, &ctx()).await.expect_err("referenced");
        match error {
            RepositoryError::Domain(DomainError::DeleteBlocked { entity, blockers }) => {
                assert_eq!(entity, "asset");
                assert_eq!(blockers, "1 ticket");
            }
            other => panic!("expected delete blocked, got {other:?}"),
        }

        let spare = assets.save(asset(&customer_id, "SN-0101")).await.expect("spare");
        assets.delete(&spare.id, &ctx()).await.expect("unreferenced delete");
        assert!(assets.find_by_id(&spare.id).await.expect("find").is_none());
        pool.close().await;
    }

    #[tokio::test]
    async fn service_orders_number_and_stamp_completion() {
        let pool = setup_pool().await;
        let repo = SqlServiceOrderRepository::new(pool.clone());
        let customer_id = seed_customer(&pool).await;

        let order = repo
            .create(NewServiceOrder {
                customer_id: customer_id.clone(),
                asset_id: None,
                opened_by: "noc".to_owned(),
                assigned_to: "Paulo".to_owned(),
                problem: "No signal at the tower".to_owned(),
            })
            .await
            .expect("order");
        let year = Utc::now().date_naive().year();
        assert_eq!(order.number, format!("OS-{year}-0001"));

        repo.transition(&order.id, ServiceOrderStatus::Open, &ctx()).await.expect("open");
        repo.transition(&order.id, ServiceOrderStatus::InProgress, &ctx())
            .await
            .expect("in progress");
        let done =
            repo.transition(&order.id, ServiceOrderStatus::Done, &ctx()).await.expect("done");
        assert!(done.completed_at.is_some());

        let error = repo
            .transition(&order.id, ServiceOrderStatus::Cancelled, &ctx())
            .await
            .expect_err("done is terminal");
        assert!(matches!(
            error,
            RepositoryError::Domain(DomainError::InvalidStatusTransition { .. })
        ));
        pool.close().await;
    }

    #[tokio::test]
    async fn tickets_thread_resolve_and_reopen() {
        let pool = setup_pool().await;
        let repo = SqlTicketRepository::new(pool.clone());
        let customer_id = seed_customer(&pool).await;

        let ticket = repo
            .create(NewTicket {
                customer_id: customer_id.clone(),
                asset_id: None,
                subject: "VPN unstable".to_owned(),
                description: "Drops every few minutes".to_owned(),
                priority: 2,
                opened_by: "helpdesk".to_owned(),
                assigned_to: "Carla".to_owned(),
            })
            .await
            .expect("ticket");
        assert_eq!(ticket.code, "TKT-000001");

        repo.add_interaction(&ticket.id, "Carla", "Re-keyed the tunnel", true)
            .await
            .expect("internal note");
        repo.add_interaction(&ticket.id, "helpdesk", "Customer confirms stable", false)
            .await
            .expect("public note");
        let thread = repo.list_interactions(&ticket.id).await.expect("thread");
        assert_eq!(thread.len(), 2);
        assert!(thread[0].internal);
        assert!(!thread[1].internal);

        let resolution =
            repo.resolve(&ticket.id, "MTU mismatch on the tunnel", 45, &ctx()).await.expect("resolve");
        assert_eq!(resolution.minutes_spent, 45);
        let resolved = repo.find_by_id(&ticket.id).await.expect("find").expect("present");
        assert_eq!(resolved.status, TicketStatus::Resolved);

        let error = repo
            .resolve(&ticket.id, "again", 1, &ctx())
            .await
            .expect_err("already resolved");
        assert!(matches!(
            error,
            RepositoryError::Domain(DomainError::InvalidStatusTransition { .. })
        ));

        // Reopening keeps the record; resolving again replaces its content.
        repo.transition(&ticket.id, TicketStatus::Assigned, &ctx()).await.expect("reopen");
        let second =
            repo.resolve(&ticket.id, "Underlying circuit swapped", 30, &ctx()).await.expect("re-resolve");
        assert_eq!(second.id, resolution.id);
        assert_eq!(second.summary, "Underlying circuit swapped");

        let closed =
            repo.transition(&ticket.id, TicketStatus::Closed, &ctx()).await.expect("close");
        assert_eq!(closed.status, TicketStatus::Closed);
        pool.close().await;
    }

    #[tokio::test]
    async fn ticket_priority_is_bounded() {
        let pool = setup_pool().await;
        let repo = SqlTicketRepository::new(pool.clone());
        let customer_id = seed_customer(&pool).await;

        for priority in [0u8, 5] {
            let error = repo
                .create(NewTicket {
                    customer_id: customer_id.clone(),
                    asset_id: None,
                    subject: "Out of band".to_owned(),
                    description: String::new(),
                    priority,
                    opened_by: String::new(),
                    assigned_to: String::new(),
                })
                .await
                .expect_err("priority out of range");
            assert!(matches!(error, RepositoryError::Domain(DomainError::Validation(_))));
        }
        pool.close().await;
    }
}
