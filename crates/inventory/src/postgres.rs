use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::Money;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    CellId, Draw, DrawConfig, DrawId, InventoryError, NumberAvailability, NumberCell, OrderId,
    Result, TicketId, Version,
    store::{
        DEFAULT_RESERVATION_TTL_SECS, NumberInventory, ensure_attachable, ensure_sellable,
        number_unavailable, validate_cell_ids,
    },
};

const CELL_COLUMNS: &str = "id, draw_id, number, series, status, reserving_order_id, sold_ticket_id, reservation_expires_at, version";

/// Attempts at picking a free series before giving up on a contended number.
const SINGLE_RESERVE_ATTEMPTS: usize = 3;

/// PostgreSQL-backed inventory.
///
/// Each mutation reads the target rows, checks their status, then updates
/// every row with `WHERE version = <read version>` inside one transaction.
/// A row that changed in between aborts the whole transaction.
#[derive(Clone)]
pub struct PostgresNumberInventory {
    pool: PgPool,
    reservation_ttl: Duration,
}

impl PostgresNumberInventory {
    pub fn new(pool: PgPool) -> Self {
        Self::with_reservation_ttl(pool, Duration::seconds(DEFAULT_RESERVATION_TTL_SECS))
    }

    pub fn with_reservation_ttl(pool: PgPool, reservation_ttl: Duration) -> Self {
        Self {
            pool,
            reservation_ttl,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_cell(row: &PgRow) -> Result<NumberCell> {
        let status: String = row.try_get("status")?;
        Ok(NumberCell {
            id: CellId::from_uuid(row.try_get::<Uuid, _>("id")?),
            draw_id: DrawId::from_uuid(row.try_get::<Uuid, _>("draw_id")?),
            number: row.try_get("number")?,
            series: row.try_get("series")?,
            status: status.parse()?,
            reserving_order_id: row
                .try_get::<Option<Uuid>, _>("reserving_order_id")?
                .map(OrderId::from_uuid),
            sold_ticket_id: row
                .try_get::<Option<Uuid>, _>("sold_ticket_id")?
                .map(TicketId::from_uuid),
            reservation_expires_at: row.try_get("reservation_expires_at")?,
            version: Version::new(row.try_get("version")?),
        })
    }

    fn row_to_draw(row: &PgRow) -> Result<Draw> {
        Ok(Draw {
            id: DrawId::from_uuid(row.try_get::<Uuid, _>("id")?),
            min_number: row.try_get("min_number")?,
            max_number: row.try_get("max_number")?,
            total_series: row.try_get("total_series")?,
            ticket_price: Money::from_cents(row.try_get("ticket_price_cents")?),
            created_at: row.try_get("created_at")?,
        })
    }

    async fn load_cells(
        tx: &mut Transaction<'_, Postgres>,
        cell_ids: &[CellId],
    ) -> Result<Vec<NumberCell>> {
        let ids: Vec<Uuid> = cell_ids.iter().map(CellId::as_uuid).collect();
        let rows = sqlx::query(&format!(
            "SELECT {CELL_COLUMNS} FROM number_cells WHERE id = ANY($1) ORDER BY number, series"
        ))
        .bind(ids)
        .fetch_all(&mut **tx)
        .await?;
        rows.iter().map(Self::row_to_cell).collect()
    }

    /// Moves one cell to Reserved if its version is unchanged.
    async fn reserve_row(
        tx: &mut Transaction<'_, Postgres>,
        cell: &NumberCell,
        order_id: OrderId,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<NumberCell>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE number_cells
            SET status = 'Reserved', reserving_order_id = $2, reservation_expires_at = $3,
                version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $4
            RETURNING {CELL_COLUMNS}
            "#
        ))
        .bind(cell.id.as_uuid())
        .bind(order_id.as_uuid())
        .bind(expires_at)
        .bind(cell.version.as_i64())
        .fetch_optional(&mut **tx)
        .await?;
        row.as_ref().map(Self::row_to_cell).transpose()
    }

    async fn sell_row(
        tx: &mut Transaction<'_, Postgres>,
        cell: &NumberCell,
        ticket_id: TicketId,
    ) -> Result<Option<NumberCell>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE number_cells
            SET status = 'Sold', sold_ticket_id = $2, reserving_order_id = NULL,
                reservation_expires_at = NULL, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $3
            RETURNING {CELL_COLUMNS}
            "#
        ))
        .bind(cell.id.as_uuid())
        .bind(ticket_id.as_uuid())
        .bind(cell.version.as_i64())
        .fetch_optional(&mut **tx)
        .await?;
        row.as_ref().map(Self::row_to_cell).transpose()
    }

    async fn release_row(
        tx: &mut Transaction<'_, Postgres>,
        cell: &NumberCell,
    ) -> Result<Option<NumberCell>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE number_cells
            SET status = 'Available', reserving_order_id = NULL, reservation_expires_at = NULL,
                version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING {CELL_COLUMNS}
            "#
        ))
        .bind(cell.id.as_uuid())
        .bind(cell.version.as_i64())
        .fetch_optional(&mut **tx)
        .await?;
        row.as_ref().map(Self::row_to_cell).transpose()
    }
}

#[async_trait]
impl NumberInventory for PostgresNumberInventory {
    async fn configure_draw(&self, config: DrawConfig) -> Result<Draw> {
        config.validate()?;
        let draw = Draw::from(config.clone());
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO draws (id, min_number, max_number, total_series, ticket_price_cents, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(draw.id.as_uuid())
        .bind(draw.min_number)
        .bind(draw.max_number)
        .bind(draw.total_series)
        .bind(draw.ticket_price.cents())
        .bind(draw.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return InventoryError::DrawAlreadyConfigured(draw.id);
            }
            InventoryError::Database(e)
        })?;

        let cells = config.generate_cells();
        let ids: Vec<Uuid> = cells.iter().map(|c| c.id.as_uuid()).collect();
        let numbers: Vec<i32> = cells.iter().map(|c| c.number).collect();
        let series: Vec<i32> = cells.iter().map(|c| c.series).collect();

        sqlx::query(
            r#"
            INSERT INTO number_cells (id, draw_id, number, series, status, version)
            SELECT t.id, $2, t.number, t.series, 'Available', 0
            FROM UNNEST($1::uuid[], $3::int4[], $4::int4[]) AS t(id, number, series)
            "#,
        )
        .bind(ids)
        .bind(draw.id.as_uuid())
        .bind(numbers)
        .bind(series)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(draw_id = %draw.id, cells = cells.len(), "draw configured");
        Ok(draw)
    }

    async fn get_draw(&self, draw_id: DrawId) -> Result<Option<Draw>> {
        let row = sqlx::query(
            r#"
            SELECT id, min_number, max_number, total_series, ticket_price_cents, created_at
            FROM draws
            WHERE id = $1
            "#,
        )
        .bind(draw_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_draw).transpose()
    }

    async fn get_cells(&self, cell_ids: &[CellId]) -> Result<Vec<NumberCell>> {
        let ids: Vec<Uuid> = cell_ids.iter().map(CellId::as_uuid).collect();
        let rows = sqlx::query(&format!(
            "SELECT {CELL_COLUMNS} FROM number_cells WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_cell).collect()
    }

    async fn availability(&self, draw_id: DrawId) -> Result<Vec<NumberAvailability>> {
        let rows = sqlx::query(
            r#"
            SELECT number,
                   COUNT(*) FILTER (WHERE status = 'Available') AS available_series,
                   COUNT(*) AS total_series
            FROM number_cells
            WHERE draw_id = $1
            GROUP BY number
            ORDER BY number ASC
            "#,
        )
        .bind(draw_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<NumberAvailability> {
                Ok(NumberAvailability {
                    number: row.try_get("number")?,
                    available_series: row.try_get::<i64, _>("available_series")? as usize,
                    total_series: row.try_get::<i64, _>("total_series")? as usize,
                })
            })
            .collect()
    }

    async fn next_available_series(
        &self,
        draw_id: DrawId,
        number: i32,
        quantity: usize,
    ) -> Result<Vec<NumberCell>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {CELL_COLUMNS} FROM number_cells
            WHERE draw_id = $1 AND number = $2 AND status = 'Available'
            ORDER BY series ASC
            LIMIT $3
            "#
        ))
        .bind(draw_id.as_uuid())
        .bind(number)
        .bind(quantity as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_cell).collect()
    }

    async fn reserve_cells(
        &self,
        cell_ids: &[CellId],
        order_id: OrderId,
    ) -> Result<Vec<NumberCell>> {
        validate_cell_ids(cell_ids)?;
        let expires_at = Utc::now() + self.reservation_ttl;
        let mut tx = self.pool.begin().await?;

        let current = Self::load_cells(&mut tx, cell_ids).await?;
        if current.len() != cell_ids.len() {
            return Err(InventoryError::not_available(
                "One or more requested cells do not exist",
            ));
        }
        if let Some(taken) = current.iter().find(|c| !c.status.can_reserve()) {
            metrics::counter!("reservation_failures_total").increment(1);
            tracing::warn!(
                %order_id,
                number = taken.number,
                series = taken.series,
                status = %taken.status,
                "reservation rejected, cell not available"
            );
            return Err(number_unavailable(taken.number, Some(taken.series)));
        }

        let mut reserved = Vec::with_capacity(current.len());
        for cell in &current {
            match Self::reserve_row(&mut tx, cell, order_id, expires_at).await? {
                Some(updated) => reserved.push(updated),
                None => {
                    // Lost a race for this row; dropping `tx` rolls back the rest.
                    metrics::counter!("reservation_failures_total").increment(1);
                    tracing::warn!(%order_id, cell_id = %cell.id, "reservation lost version race");
                    return Err(number_unavailable(cell.number, Some(cell.series)));
                }
            }
        }

        tx.commit().await?;
        metrics::counter!("cells_reserved_total").increment(reserved.len() as u64);
        tracing::info!(%order_id, count = reserved.len(), %expires_at, "cells reserved");
        Ok(reserved)
    }

    async fn reserve_single_by_value(
        &self,
        draw_id: DrawId,
        number: i32,
        series: Option<i32>,
        order_id: OrderId,
    ) -> Result<NumberCell> {
        if self.get_draw(draw_id).await?.is_none() {
            return Err(InventoryError::DrawNotFound(draw_id));
        }

        for _ in 0..SINGLE_RESERVE_ATTEMPTS {
            let expires_at = Utc::now() + self.reservation_ttl;
            let mut tx = self.pool.begin().await?;

            let row = sqlx::query(&format!(
                r#"
                SELECT {CELL_COLUMNS} FROM number_cells
                WHERE draw_id = $1 AND number = $2 AND status = 'Available'
                  AND ($3::int4 IS NULL OR series = $3)
                ORDER BY series ASC
                LIMIT 1
                "#
            ))
            .bind(draw_id.as_uuid())
            .bind(number)
            .bind(series)
            .fetch_optional(&mut *tx)
            .await?;

            let Some(row) = row else {
                break;
            };
            let candidate = Self::row_to_cell(&row)?;

            if let Some(cell) = Self::reserve_row(&mut tx, &candidate, order_id, expires_at).await? {
                tx.commit().await?;
                metrics::counter!("cells_reserved_total").increment(1);
                tracing::info!(%order_id, number, series = cell.series, "cell reserved");
                return Ok(cell);
            }
            tracing::debug!(%draw_id, number, "candidate series taken concurrently, retrying");
        }

        metrics::counter!("reservation_failures_total").increment(1);
        tracing::warn!(%draw_id, number, ?series, "no available series");
        Err(number_unavailable(number, series))
    }

    async fn attach_to_order(
        &self,
        cell_ids: &[CellId],
        order_id: OrderId,
        reserved_under: Option<OrderId>,
        expires_at: DateTime<Utc>,
    ) -> Result<Vec<NumberCell>> {
        validate_cell_ids(cell_ids)?;
        let mut tx = self.pool.begin().await?;

        let current = Self::load_cells(&mut tx, cell_ids).await?;
        if let Some(missing) = cell_ids
            .iter()
            .find(|id| !current.iter().any(|c| c.id == **id))
        {
            return Err(InventoryError::CellNotFound(*missing));
        }
        ensure_attachable(&current, order_id, reserved_under)?;

        let mut attached = Vec::with_capacity(current.len());
        for cell in &current {
            let updated = Self::reserve_row(&mut tx, cell, order_id, expires_at)
                .await?
                .ok_or(InventoryError::ConcurrencyConflict { cell_id: cell.id })?;
            attached.push(updated);
        }

        tx.commit().await?;
        Ok(attached)
    }

    async fn confirm_sold(
        &self,
        cell_ids: &[CellId],
        order_id: OrderId,
        ticket_id: TicketId,
    ) -> Result<Vec<NumberCell>> {
        validate_cell_ids(cell_ids)?;
        let mut tx = self.pool.begin().await?;

        let current = Self::load_cells(&mut tx, cell_ids).await?;
        if let Some(missing) = cell_ids
            .iter()
            .find(|id| !current.iter().any(|c| c.id == **id))
        {
            return Err(InventoryError::CellNotFound(*missing));
        }

        if current
            .iter()
            .all(|c| c.status.is_terminal() && c.sold_ticket_id == Some(ticket_id))
        {
            tracing::info!(%ticket_id, "cells already sold for ticket, skipping");
            return Ok(Vec::new());
        }

        ensure_sellable(&current, order_id, ticket_id)?;

        let mut sold = Vec::with_capacity(current.len());
        for cell in &current {
            let updated = Self::sell_row(&mut tx, cell, ticket_id)
                .await?
                .ok_or(InventoryError::ConcurrencyConflict { cell_id: cell.id })?;
            sold.push(updated);
        }

        tx.commit().await?;
        metrics::counter!("cells_sold_total").increment(sold.len() as u64);
        tracing::info!(%ticket_id, count = sold.len(), "cells sold");
        Ok(sold)
    }

    async fn release_by_order(&self, order_id: OrderId) -> Result<Vec<NumberCell>> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {CELL_COLUMNS} FROM number_cells
            WHERE reserving_order_id = $1 AND status = 'Reserved'
            "#
        ))
        .bind(order_id.as_uuid())
        .fetch_all(&mut *tx)
        .await?;
        let current = rows
            .iter()
            .map(Self::row_to_cell)
            .collect::<Result<Vec<_>>>()?;

        if current.is_empty() {
            tracing::info!(%order_id, "no reserved cells to release");
            return Ok(Vec::new());
        }

        let mut released = Vec::with_capacity(current.len());
        for cell in &current {
            let updated = Self::release_row(&mut tx, cell)
                .await?
                .ok_or(InventoryError::ConcurrencyConflict { cell_id: cell.id })?;
            released.push(updated);
        }

        tx.commit().await?;
        metrics::counter!("cells_released_total").increment(released.len() as u64);
        tracing::info!(%order_id, count = released.len(), "cells released");
        Ok(released)
    }

    async fn lapsed_reservations(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<NumberCell>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {CELL_COLUMNS} FROM number_cells
            WHERE status = 'Reserved' AND reservation_expires_at < $1
            ORDER BY reservation_expires_at ASC
            LIMIT $2
            "#
        ))
        .bind(cutoff)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_cell).collect()
    }
}
