//! Draw and cell model.

use chrono::{DateTime, Utc};
use common::Money;
use serde::{Deserialize, Serialize};

use crate::{CellId, DrawId, InventoryError, OrderId, TicketId, Version};

/// Status of a single cell.
///
/// State transitions:
/// ```text
/// Available ──► Reserved ──► Sold
///     ▲             │
///     └─────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CellStatus {
    #[default]
    Available,

    /// Held for an order, awaiting payment.
    Reserved,

    /// Bought (terminal state).
    Sold,
}

impl CellStatus {
    pub fn can_reserve(&self) -> bool {
        matches!(self, CellStatus::Available)
    }

    pub fn can_sell(&self) -> bool {
        matches!(self, CellStatus::Reserved)
    }

    pub fn can_release(&self) -> bool {
        matches!(self, CellStatus::Reserved)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CellStatus::Sold)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CellStatus::Available => "Available",
            CellStatus::Reserved => "Reserved",
            CellStatus::Sold => "Sold",
        }
    }
}

impl std::fmt::Display for CellStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CellStatus {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Available" => Ok(CellStatus::Available),
            "Reserved" => Ok(CellStatus::Reserved),
            "Sold" => Ok(CellStatus::Sold),
            other => Err(InventoryError::CorruptRow(format!(
                "unknown cell status '{other}'"
            ))),
        }
    }
}

/// One addressable `(number, series)` unit of a draw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberCell {
    pub id: CellId,
    pub draw_id: DrawId,
    pub number: i32,
    pub series: i32,
    pub status: CellStatus,
    pub reserving_order_id: Option<OrderId>,
    pub sold_ticket_id: Option<TicketId>,
    pub reservation_expires_at: Option<DateTime<Utc>>,
    pub version: Version,
}

impl NumberCell {
    /// Creates an Available cell.
    pub fn new(draw_id: DrawId, number: i32, series: i32) -> Self {
        Self {
            id: CellId::new(),
            draw_id,
            number,
            series,
            status: CellStatus::Available,
            reserving_order_id: None,
            sold_ticket_id: None,
            reservation_expires_at: None,
            version: Version::initial(),
        }
    }

    pub(crate) fn reserve(&mut self, order_id: OrderId, expires_at: DateTime<Utc>) {
        self.status = CellStatus::Reserved;
        self.reserving_order_id = Some(order_id);
        self.reservation_expires_at = Some(expires_at);
        self.version = self.version.next();
    }

    pub(crate) fn sell(&mut self, ticket_id: TicketId) {
        self.status = CellStatus::Sold;
        self.sold_ticket_id = Some(ticket_id);
        self.reserving_order_id = None;
        self.reservation_expires_at = None;
        self.version = self.version.next();
    }

    pub(crate) fn release(&mut self) {
        self.status = CellStatus::Available;
        self.reserving_order_id = None;
        self.reservation_expires_at = None;
        self.version = self.version.next();
    }
}

/// Parameters for configuring a draw's inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawConfig {
    pub draw_id: DrawId,
    pub min_number: i32,
    pub max_number: i32,
    pub total_series: i32,
    pub ticket_price: Money,
}

impl DrawConfig {
    pub fn validate(&self) -> Result<(), InventoryError> {
        if self.min_number > self.max_number {
            return Err(InventoryError::InvalidDraw(format!(
                "min_number {} is greater than max_number {}",
                self.min_number, self.max_number
            )));
        }
        if self.total_series < 1 {
            return Err(InventoryError::InvalidDraw(
                "total_series must be at least 1".to_string(),
            ));
        }
        if !self.ticket_price.is_positive() {
            return Err(InventoryError::InvalidDraw(
                "ticket_price must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Generates one Available cell per series and number, series-major.
    pub fn generate_cells(&self) -> Vec<NumberCell> {
        (1..=self.total_series)
            .flat_map(|series| {
                (self.min_number..=self.max_number)
                    .map(move |number| NumberCell::new(self.draw_id, number, series))
            })
            .collect()
    }

    pub fn cell_count(&self) -> usize {
        let numbers = (self.max_number - self.min_number + 1).max(0) as usize;
        numbers * self.total_series.max(0) as usize
    }
}

/// A configured draw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draw {
    pub id: DrawId,
    pub min_number: i32,
    pub max_number: i32,
    pub total_series: i32,
    pub ticket_price: Money,
    pub created_at: DateTime<Utc>,
}

impl Draw {
    pub fn contains_number(&self, number: i32) -> bool {
        (self.min_number..=self.max_number).contains(&number)
    }
}

impl From<DrawConfig> for Draw {
    fn from(config: DrawConfig) -> Self {
        Self {
            id: config.draw_id,
            min_number: config.min_number,
            max_number: config.max_number,
            total_series: config.total_series,
            ticket_price: config.ticket_price,
            created_at: Utc::now(),
        }
    }
}

/// Available vs total series for one number of a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberAvailability {
    pub number: i32,
    pub available_series: usize,
    pub total_series: usize,
}

/// Groups cells by number, sorted ascending.
pub(crate) fn summarize<'a>(cells: impl Iterator<Item = &'a NumberCell>) -> Vec<NumberAvailability> {
    let mut by_number: std::collections::BTreeMap<i32, NumberAvailability> =
        std::collections::BTreeMap::new();
    for cell in cells {
        let entry = by_number
            .entry(cell.number)
            .or_insert(NumberAvailability {
                number: cell.number,
                available_series: 0,
                total_series: 0,
            });
        entry.total_series += 1;
        if cell.status == CellStatus::Available {
            entry.available_series += 1;
        }
    }
    by_number.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(min: i32, max: i32, series: i32) -> DrawConfig {
        DrawConfig {
            draw_id: DrawId::new(),
            min_number: min,
            max_number: max,
            total_series: series,
            ticket_price: Money::from_cents(500),
        }
    }

    #[test]
    fn status_transitions() {
        assert!(CellStatus::Available.can_reserve());
        assert!(!CellStatus::Reserved.can_reserve());
        assert!(!CellStatus::Sold.can_reserve());

        assert!(CellStatus::Reserved.can_sell());
        assert!(!CellStatus::Available.can_sell());
        assert!(!CellStatus::Sold.can_sell());

        assert!(CellStatus::Reserved.can_release());
        assert!(!CellStatus::Sold.can_release());

        assert!(CellStatus::Sold.is_terminal());
        assert!(!CellStatus::Reserved.is_terminal());
    }

    #[test]
    fn status_parses_its_own_name() {
        for status in [CellStatus::Available, CellStatus::Reserved, CellStatus::Sold] {
            assert_eq!(status.as_str().parse::<CellStatus>().unwrap(), status);
        }
        assert!("Gone".parse::<CellStatus>().is_err());
    }

    #[test]
    fn generates_one_cell_per_number_and_series() {
        let config = config(0, 9, 3);
        let cells = config.generate_cells();

        assert_eq!(cells.len(), 30);
        assert_eq!(config.cell_count(), 30);
        assert!(cells.iter().all(|c| c.status == CellStatus::Available));

        let mut keys: Vec<_> = cells.iter().map(|c| (c.number, c.series)).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 30);
    }

    #[test]
    fn rejects_invalid_configs() {
        assert!(config(5, 1, 1).validate().is_err());
        assert!(config(0, 9, 0).validate().is_err());

        let mut free = config(0, 9, 1);
        free.ticket_price = Money::zero();
        assert!(free.validate().is_err());

        assert!(config(0, 9, 1).validate().is_ok());
    }

    #[test]
    fn transitions_bump_version_and_clear_owner() {
        let mut cell = NumberCell::new(DrawId::new(), 5, 1);
        let order_id = OrderId::new();

        cell.reserve(order_id, Utc::now());
        assert_eq!(cell.reserving_order_id, Some(order_id));
        assert_eq!(cell.version, Version::new(1));

        cell.release();
        assert_eq!(cell.status, CellStatus::Available);
        assert!(cell.reserving_order_id.is_none());
        assert!(cell.reservation_expires_at.is_none());
        assert_eq!(cell.version, Version::new(2));
    }

    #[test]
    fn summarize_counts_available_series() {
        let config = config(1, 2, 2);
        let mut cells = config.generate_cells();
        cells[0].reserve(OrderId::new(), Utc::now());

        let summary = summarize(cells.iter());
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].number, 1);
        assert_eq!(summary[0].available_series, 1);
        assert_eq!(summary[0].total_series, 2);
        assert_eq!(summary[1].available_series, 2);
    }
}
