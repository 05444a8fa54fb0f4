use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::{
    CellId, CellStatus, Draw, DrawConfig, DrawId, InventoryError, NumberAvailability, NumberCell,
    OrderId, Result, TicketId, Version,
    cell::summarize,
    store::{
        DEFAULT_RESERVATION_TTL_SECS, NumberInventory, ensure_attachable, ensure_sellable,
        number_unavailable, validate_cell_ids,
    },
};

/// In-memory inventory used by tests and single-process deployments.
///
/// Mutations run under one write lock, and each still goes through the same
/// read-verify-write-with-version sequence as the PostgreSQL implementation.
#[derive(Clone)]
pub struct InMemoryNumberInventory {
    draws: Arc<RwLock<HashMap<DrawId, Draw>>>,
    cells: Arc<RwLock<HashMap<CellId, NumberCell>>>,
    reservation_ttl: Duration,
}

impl Default for InMemoryNumberInventory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryNumberInventory {
    pub fn new() -> Self {
        Self::with_reservation_ttl(Duration::seconds(DEFAULT_RESERVATION_TTL_SECS))
    }

    pub fn with_reservation_ttl(reservation_ttl: Duration) -> Self {
        Self {
            draws: Arc::new(RwLock::new(HashMap::new())),
            cells: Arc::new(RwLock::new(HashMap::new())),
            reservation_ttl,
        }
    }

    /// Looks up the cell for `(draw, number, series)`.
    pub async fn find_cell(&self, draw_id: DrawId, number: i32, series: i32) -> Option<NumberCell> {
        self.cells
            .read()
            .await
            .values()
            .find(|c| c.draw_id == draw_id && c.number == number && c.series == series)
            .cloned()
    }

    pub async fn cell_count(&self) -> usize {
        self.cells.read().await.len()
    }
}

/// Writes to every cell in `expected`, provided none changed version since
/// it was read. Either all cells are written or none.
fn apply_versioned(
    cells: &mut HashMap<CellId, NumberCell>,
    expected: &[(CellId, Version)],
    mut mutate: impl FnMut(&mut NumberCell),
) -> Result<Vec<NumberCell>> {
    for (id, version) in expected {
        match cells.get(id) {
            Some(cell) if cell.version == *version => {}
            _ => return Err(InventoryError::ConcurrencyConflict { cell_id: *id }),
        }
    }

    let mut written = Vec::with_capacity(expected.len());
    for (id, _) in expected {
        if let Some(cell) = cells.get_mut(id) {
            mutate(cell);
            written.push(cell.clone());
        }
    }
    Ok(written)
}

#[async_trait]
impl NumberInventory for InMemoryNumberInventory {
    async fn configure_draw(&self, config: DrawConfig) -> Result<Draw> {
        config.validate()?;

        let mut draws = self.draws.write().await;
        if draws.contains_key(&config.draw_id) {
            return Err(InventoryError::DrawAlreadyConfigured(config.draw_id));
        }

        let generated = config.generate_cells();
        let count = generated.len();
        let mut cells = self.cells.write().await;
        cells.extend(generated.into_iter().map(|c| (c.id, c)));

        let draw = Draw::from(config);
        draws.insert(draw.id, draw.clone());

        tracing::info!(draw_id = %draw.id, cells = count, "draw configured");
        Ok(draw)
    }

    async fn get_draw(&self, draw_id: DrawId) -> Result<Option<Draw>> {
        Ok(self.draws.read().await.get(&draw_id).cloned())
    }

    async fn get_cells(&self, cell_ids: &[CellId]) -> Result<Vec<NumberCell>> {
        let cells = self.cells.read().await;
        Ok(cell_ids
            .iter()
            .filter_map(|id| cells.get(id).cloned())
            .collect())
    }

    async fn availability(&self, draw_id: DrawId) -> Result<Vec<NumberAvailability>> {
        let cells = self.cells.read().await;
        Ok(summarize(cells.values().filter(|c| c.draw_id == draw_id)))
    }

    async fn next_available_series(
        &self,
        draw_id: DrawId,
        number: i32,
        quantity: usize,
    ) -> Result<Vec<NumberCell>> {
        let cells = self.cells.read().await;
        let mut free: Vec<NumberCell> = cells
            .values()
            .filter(|c| c.draw_id == draw_id && c.number == number && c.status.can_reserve())
            .cloned()
            .collect();
        free.sort_by_key(|c| c.series);
        free.truncate(quantity);
        Ok(free)
    }

    async fn reserve_cells(
        &self,
        cell_ids: &[CellId],
        order_id: OrderId,
    ) -> Result<Vec<NumberCell>> {
        validate_cell_ids(cell_ids)?;
        let expires_at = Utc::now() + self.reservation_ttl;

        let mut cells = self.cells.write().await;
        let mut expected = Vec::with_capacity(cell_ids.len());
        for id in cell_ids {
            let Some(cell) = cells.get(id) else {
                return Err(InventoryError::not_available(format!(
                    "Cell {id} does not exist"
                )));
            };
            if !cell.status.can_reserve() {
                metrics::counter!("reservation_failures_total").increment(1);
                tracing::warn!(
                    %order_id,
                    number = cell.number,
                    series = cell.series,
                    status = %cell.status,
                    "reservation rejected, cell not available"
                );
                return Err(number_unavailable(cell.number, Some(cell.series)));
            }
            expected.push((cell.id, cell.version));
        }

        let reserved = apply_versioned(&mut cells, &expected, |cell| {
            cell.reserve(order_id, expires_at)
        })?;

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
        if !self.draws.read().await.contains_key(&draw_id) {
            return Err(InventoryError::DrawNotFound(draw_id));
        }
        let expires_at = Utc::now() + self.reservation_ttl;

        let mut cells = self.cells.write().await;
        let candidate = cells
            .values()
            .filter(|c| {
                c.draw_id == draw_id
                    && c.number == number
                    && c.status.can_reserve()
                    && series.is_none_or(|s| c.series == s)
            })
            .min_by_key(|c| c.series)
            .map(|c| (c.id, c.version));

        let Some(expected) = candidate else {
            metrics::counter!("reservation_failures_total").increment(1);
            tracing::warn!(%draw_id, number, ?series, "no available series");
            return Err(number_unavailable(number, series));
        };

        let mut reserved = apply_versioned(&mut cells, &[expected], |cell| {
            cell.reserve(order_id, expires_at)
        })?;
        let cell = reserved
            .pop()
            .ok_or(InventoryError::CellNotFound(expected.0))?;

        metrics::counter!("cells_reserved_total").increment(1);
        tracing::info!(%order_id, number, series = cell.series, "cell reserved");
        Ok(cell)
    }

    async fn attach_to_order(
        &self,
        cell_ids: &[CellId],
        order_id: OrderId,
        reserved_under: Option<OrderId>,
        expires_at: DateTime<Utc>,
    ) -> Result<Vec<NumberCell>> {
        validate_cell_ids(cell_ids)?;

        let mut cells = self.cells.write().await;
        let mut targets = Vec::with_capacity(cell_ids.len());
        for id in cell_ids {
            targets.push(cells.get(id).cloned().ok_or(InventoryError::CellNotFound(*id))?);
        }
        ensure_attachable(&targets, order_id, reserved_under)?;

        let expected: Vec<_> = targets.iter().map(|c| (c.id, c.version)).collect();
        apply_versioned(&mut cells, &expected, |cell| {
            cell.reserve(order_id, expires_at)
        })
    }

    async fn confirm_sold(
        &self,
        cell_ids: &[CellId],
        order_id: OrderId,
        ticket_id: TicketId,
    ) -> Result<Vec<NumberCell>> {
        validate_cell_ids(cell_ids)?;

        let mut cells = self.cells.write().await;
        let mut targets = Vec::with_capacity(cell_ids.len());
        for id in cell_ids {
            targets.push(cells.get(id).cloned().ok_or(InventoryError::CellNotFound(*id))?);
        }

        if targets
            .iter()
            .all(|c| c.status.is_terminal() && c.sold_ticket_id == Some(ticket_id))
        {
            tracing::info!(%ticket_id, "cells already sold for ticket, skipping");
            return Ok(Vec::new());
        }
        ensure_sellable(&targets, order_id, ticket_id)?;

        let expected: Vec<_> = targets.iter().map(|c| (c.id, c.version)).collect();
        let sold = apply_versioned(&mut cells, &expected, |cell| cell.sell(ticket_id))?;

        metrics::counter!("cells_sold_total").increment(sold.len() as u64);
        tracing::info!(%ticket_id, count = sold.len(), "cells sold");
        Ok(sold)
    }

    async fn release_by_order(&self, order_id: OrderId) -> Result<Vec<NumberCell>> {
        let mut cells = self.cells.write().await;
        let expected: Vec<_> = cells
            .values()
            .filter(|c| c.status.can_release() && c.reserving_order_id == Some(order_id))
            .map(|c| (c.id, c.version))
            .collect();

        if expected.is_empty() {
            tracing::info!(%order_id, "no reserved cells to release");
            return Ok(Vec::new());
        }

        let released = apply_versioned(&mut cells, &expected, NumberCell::release)?;

        metrics::counter!("cells_released_total").increment(released.len() as u64);
        tracing::info!(%order_id, count = released.len(), "cells released");
        Ok(released)
    }

    async fn lapsed_reservations(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<NumberCell>> {
        let cells = self.cells.read().await;
        let mut lapsed: Vec<NumberCell> = cells
            .values()
            .filter(|c| {
                c.status == CellStatus::Reserved
                    && c.reservation_expires_at.is_some_and(|at| at < cutoff)
            })
            .cloned()
            .collect();
        lapsed.sort_by_key(|c| c.reservation_expires_at);
        lapsed.truncate(limit);
        Ok(lapsed)
    }
}
