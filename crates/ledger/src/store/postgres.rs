use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{DrawId, IntegrationEvent, Money, OrderId, TicketId, UserId, Version};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow, types::Json};
use uuid::Uuid;

use super::{OrderStore, OutboxMessage};
use crate::{LedgerError, Order, OrderLine, Result, Ticket};

const ORDER_COLUMNS: &str = "id, user_id, draw_id, status, expires_at, lines, total_amount_cents, ticket_id, cancellation_reason, version, created_at, updated_at";

/// PostgreSQL-backed order store.
///
/// Order updates are conditional on the stored version
/// (`WHERE id = $1 AND version = $expected`), so of two racing terminal
/// writes exactly one commits.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_order(row: &PgRow) -> Result<Order> {
        let status: String = row.try_get("status")?;
        let lines: Json<Vec<OrderLine>> = row.try_get("lines")?;
        Ok(Order::restore(
            OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            UserId::new(row.try_get("user_id")?),
            DrawId::from_uuid(row.try_get::<Uuid, _>("draw_id")?),
            status.parse()?,
            row.try_get("expires_at")?,
            lines.0,
            Money::from_cents(row.try_get("total_amount_cents")?),
            row.try_get::<Option<Uuid>, _>("ticket_id")?
                .map(TicketId::from_uuid),
            row.try_get("cancellation_reason")?,
            Version::new(row.try_get("version")?),
            row.try_get("created_at")?,
            row.try_get("updated_at")?,
        ))
    }

    fn row_to_ticket(row: &PgRow) -> Result<Ticket> {
        let status: String = row.try_get("status")?;
        Ok(Ticket {
            id: TicketId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            cell_id: row.try_get::<Uuid, _>("cell_id")?.into(),
            draw_id: DrawId::from_uuid(row.try_get::<Uuid, _>("draw_id")?),
            user_id: UserId::new(row.try_get("user_id")?),
            number: row.try_get("number")?,
            series: row.try_get("series")?,
            purchase_amount: Money::from_cents(row.try_get("purchase_amount_cents")?),
            transaction_id: row.try_get("transaction_id")?,
            status: status.parse()?,
            purchased_at: row.try_get("purchased_at")?,
        })
    }

    fn row_to_outbox(row: &PgRow) -> Result<OutboxMessage> {
        let payload: Json<IntegrationEvent> = row.try_get("payload")?;
        Ok(OutboxMessage {
            id: row.try_get("id")?,
            event: payload.0,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn stage_outbox(
        tx: &mut Transaction<'_, Postgres>,
        outbox: &[OutboxMessage],
    ) -> Result<()> {
        for message in outbox {
            sqlx::query(
                r#"
                INSERT INTO outbox (id, event_type, payload, created_at)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(message.id)
            .bind(message.event.event_type())
            .bind(Json(&message.event))
            .bind(message.created_at)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    async fn insert_tickets(tx: &mut Transaction<'_, Postgres>, tickets: &[Ticket]) -> Result<()> {
        for ticket in tickets {
            sqlx::query(
                r#"
                INSERT INTO tickets (id, order_id, cell_id, draw_id, user_id, number, series,
                                     purchase_amount_cents, transaction_id, status, purchased_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(ticket.id.as_uuid())
            .bind(ticket.order_id.as_uuid())
            .bind(ticket.cell_id.as_uuid())
            .bind(ticket.draw_id.as_uuid())
            .bind(ticket.user_id.as_i64())
            .bind(ticket.number)
            .bind(ticket.series)
            .bind(ticket.purchase_amount.cents())
            .bind(&ticket.transaction_id)
            .bind(ticket.status.as_str())
            .bind(ticket.purchased_at)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn get(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_order).transpose()
    }

    async fn insert(&self, order: &Order, outbox: Vec<OutboxMessage>) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, draw_id, status, expires_at, lines, total_amount_cents,
                                ticket_id, cancellation_reason, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.user_id().as_i64())
        .bind(order.draw_id().as_uuid())
        .bind(order.status().as_str())
        .bind(order.expires_at())
        .bind(Json(order.lines()))
        .bind(order.total_amount().cents())
        .bind(order.ticket_id().map(|t| t.as_uuid()))
        .bind(order.cancellation_reason())
        .bind(order.version().as_i64())
        .bind(order.created_at())
        .bind(order.updated_at())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        Self::stage_outbox(&mut tx, &outbox).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn update(
        &self,
        order: &Order,
        expected: Version,
        tickets: &[Ticket],
        outbox: Vec<OutboxMessage>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, expires_at = $3, lines = $4, total_amount_cents = $5,
                ticket_id = $6, cancellation_reason = $7, version = $8, updated_at = $9
            WHERE id = $1 AND version = $10
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.status().as_str())
        .bind(order.expires_at())
        .bind(Json(order.lines()))
        .bind(order.total_amount().cents())
        .bind(order.ticket_id().map(|t| t.as_uuid()))
        .bind(order.cancellation_reason())
        .bind(order.version().as_i64())
        .bind(order.updated_at())
        .bind(expected.as_i64())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(LedgerError::ConcurrencyConflict {
                order_id: order.id(),
                expected,
            });
        }

        Self::insert_tickets(&mut tx, tickets).await?;
        Self::stage_outbox(&mut tx, &outbox).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn tickets_for_order(&self, order_id: OrderId) -> Result<Vec<Ticket>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, cell_id, draw_id, user_id, number, series,
                   purchase_amount_cents, transaction_id, status, purchased_at
            FROM tickets
            WHERE order_id = $1
            ORDER BY number, series
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_ticket).collect()
    }

    async fn find_overdue_pending(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders
            WHERE status = 'Pending' AND expires_at < $1
            ORDER BY expires_at
            LIMIT $2
            "#
        ))
        .bind(cutoff)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_order).collect()
    }

    async fn pending_orders(&self) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE status = 'Pending' ORDER BY expires_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_order).collect()
    }

    async fn undispatched_outbox(&self, limit: usize) -> Result<Vec<OutboxMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, payload, created_at FROM outbox
            WHERE dispatched_at IS NULL
            ORDER BY sequence
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_outbox).collect()
    }

    async fn mark_dispatched(&self, ids: &[Uuid]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query("UPDATE outbox SET dispatched_at = NOW() WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
