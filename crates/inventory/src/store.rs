use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    CellId, CellStatus, Draw, DrawConfig, DrawId, InventoryError, NumberAvailability, NumberCell,
    OrderId, Result, TicketId,
};

/// How long a reservation holds its cells before the order lapses.
pub const DEFAULT_RESERVATION_TTL_SECS: i64 = 5 * 60;

/// Maximum number of series one cart line may reserve.
pub const MAX_QUANTITY_PER_REQUEST: usize = 10;

/// The per-draw pool of cells and its state machine.
///
/// Every mutation checks the cell's current status and version before
/// writing. A failed precondition is returned as a typed error and leaves
/// every targeted cell unchanged.
#[async_trait]
pub trait NumberInventory: Send + Sync {
    /// Creates the draw and one Available cell per `number × series`.
    async fn configure_draw(&self, config: DrawConfig) -> Result<Draw>;

    async fn get_draw(&self, draw_id: DrawId) -> Result<Option<Draw>>;

    /// Returns the cells that exist among `cell_ids`, in no particular order.
    async fn get_cells(&self, cell_ids: &[CellId]) -> Result<Vec<NumberCell>>;

    /// Per-number availability for a draw, sorted by number.
    async fn availability(&self, draw_id: DrawId) -> Result<Vec<NumberAvailability>>;

    /// Up to `quantity` Available cells for `number`, lowest series first.
    /// Reads only; nothing is locked.
    async fn next_available_series(
        &self,
        draw_id: DrawId,
        number: i32,
        quantity: usize,
    ) -> Result<Vec<NumberCell>>;

    /// Reserves every cell for `order_id`, or none of them.
    ///
    /// Fails with `NotAvailable` if any cell is missing or not Available.
    async fn reserve_cells(&self, cell_ids: &[CellId], order_id: OrderId)
    -> Result<Vec<NumberCell>>;

    /// Reserves one cell by value. Without `series`, the lowest Available
    /// series of `number` is taken.
    async fn reserve_single_by_value(
        &self,
        draw_id: DrawId,
        number: i32,
        series: Option<i32>,
        order_id: OrderId,
    ) -> Result<NumberCell>;

    /// Ties Reserved cells to `order_id` and aligns their expiry with the
    /// order's. All-or-nothing; safe to repeat.
    ///
    /// Each cell must already be held by `order_id`, or by `reserved_under`
    /// when cells are handed over to an order they were added to. A cell
    /// held by anyone else, or no longer Reserved, fails with `NotAvailable`.
    async fn attach_to_order(
        &self,
        cell_ids: &[CellId],
        order_id: OrderId,
        reserved_under: Option<OrderId>,
        expires_at: DateTime<Utc>,
    ) -> Result<Vec<NumberCell>>;

    /// Marks every cell Sold under `ticket_id`.
    ///
    /// Succeeds only if all cells are Reserved by `order_id`, otherwise fails
    /// with `SagaInconsistency` and changes nothing. Cells already sold under
    /// the same ticket make the call a no-op that returns no cells.
    async fn confirm_sold(
        &self,
        cell_ids: &[CellId],
        order_id: OrderId,
        ticket_id: TicketId,
    ) -> Result<Vec<NumberCell>>;

    /// Returns every Reserved cell owned by `order_id` to Available.
    ///
    /// Returns the released cells. An empty result is not an error, so the
    /// call can be repeated.
    async fn release_by_order(&self, order_id: OrderId) -> Result<Vec<NumberCell>>;

    /// Reserved cells whose reservation ran out before `cutoff`, oldest
    /// first, at most `limit`.
    async fn lapsed_reservations(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<NumberCell>>;
}

/// Convenience methods available on every inventory.
#[async_trait]
pub trait NumberInventoryExt: NumberInventory {
    /// Total Available cells across the draw.
    async fn available_count(&self, draw_id: DrawId) -> Result<usize> {
        Ok(self
            .availability(draw_id)
            .await?
            .iter()
            .map(|n| n.available_series)
            .sum())
    }

    /// Loads a draw or fails with `DrawNotFound`.
    async fn require_draw(&self, draw_id: DrawId) -> Result<Draw> {
        self.get_draw(draw_id)
            .await?
            .ok_or(InventoryError::DrawNotFound(draw_id))
    }
}

impl<T: NumberInventory + ?Sized> NumberInventoryExt for T {}

/// Rejects empty and duplicated cell lists before any write.
pub(crate) fn validate_cell_ids(cell_ids: &[CellId]) -> Result<()> {
    if cell_ids.is_empty() {
        return Err(InventoryError::not_available("No cells requested"));
    }
    let mut seen = std::collections::HashSet::with_capacity(cell_ids.len());
    if !cell_ids.iter().all(|id| seen.insert(*id)) {
        return Err(InventoryError::not_available(
            "The same cell was requested twice",
        ));
    }
    Ok(())
}

/// User-facing message when a number has no free series.
pub(crate) fn number_unavailable(number: i32, series: Option<i32>) -> InventoryError {
    match series {
        Some(series) => {
            InventoryError::not_available(format!("Number {number} series {series} is not available"))
        }
        None => {
            InventoryError::not_available(format!("Number {number} is not available in any series"))
        }
    }
}

/// Rejects an attach unless every cell is Reserved by the order itself or by
/// the reservation it is taking over.
pub(crate) fn ensure_attachable(
    cells: &[NumberCell],
    order_id: OrderId,
    reserved_under: Option<OrderId>,
) -> Result<()> {
    for cell in cells {
        if cell.status != CellStatus::Reserved {
            return Err(InventoryError::not_available(format!(
                "Number {} series {} is {}, cannot attach to order {order_id}",
                cell.number, cell.series, cell.status
            )));
        }
        let owner = cell.reserving_order_id;
        if owner != Some(order_id) && (reserved_under.is_none() || owner != reserved_under) {
            return Err(InventoryError::not_available(format!(
                "Number {} series {} is held by another order, cannot attach to order {order_id}",
                cell.number, cell.series
            )));
        }
    }
    Ok(())
}

/// Rejects a sale unless every cell is Reserved by `order_id`.
pub(crate) fn ensure_sellable(
    cells: &[NumberCell],
    order_id: OrderId,
    ticket_id: TicketId,
) -> Result<()> {
    let Some(bad) = cells
        .iter()
        .find(|c| !c.status.can_sell() || c.reserving_order_id != Some(order_id))
    else {
        return Ok(());
    };

    tracing::error!(
        %order_id,
        %ticket_id,
        cell_id = %bad.id,
        status = %bad.status,
        reserved_by = ?bad.reserving_order_id,
        "saga inconsistency: confirming sale of a cell not reserved by the order"
    );
    Err(InventoryError::SagaInconsistency {
        cell_id: bad.id,
        order_id,
        status: bad.status,
        reserved_by: bad.reserving_order_id,
    })
}
