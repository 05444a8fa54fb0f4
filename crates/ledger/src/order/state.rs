//! Order state machine.

use serde::{Deserialize, Serialize};

use super::OrderError;

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
///          ┌──► Completed
/// Pending ─┼──► Expired
///          └──► Cancelled
/// ```
/// Every status except Pending is terminal. The first terminal write to
/// commit wins; later attempts observe a terminal status and do nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    /// Cells are held, awaiting payment. Lines can still be added.
    #[default]
    Pending,

    /// Paid, tickets issued (terminal state).
    Completed,

    /// Payment window lapsed (terminal state).
    Expired,

    /// Cancelled by the buyer or an operator (terminal state).
    Cancelled,
}

impl OrderStatus {
    /// Returns true if lines can be added in this status.
    pub fn can_extend(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    pub fn can_complete(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    pub fn can_expire(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if this is a terminal status (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Completed => "Completed",
            OrderStatus::Expired => "Expired",
            OrderStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(OrderStatus::Pending),
            "Completed" => Ok(OrderStatus::Completed),
            "Expired" => Ok(OrderStatus::Expired),
            "Cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(OrderError::UnknownStatus(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_is_pending() {
        assert_eq!(OrderStatus::default(), OrderStatus::Pending);
    }

    #[test]
    fn test_only_pending_can_transition() {
        for status in [
            OrderStatus::Completed,
            OrderStatus::Expired,
            OrderStatus::Cancelled,
        ] {
            assert!(!status.can_extend());
            assert!(!status.can_complete());
            assert!(!status.can_expire());
            assert!(!status.can_cancel());
            assert!(status.is_terminal());
        }

        let pending = OrderStatus::Pending;
        assert!(pending.can_extend());
        assert!(pending.can_complete());
        assert!(pending.can_expire());
        assert!(pending.can_cancel());
        assert!(!pending.is_terminal());
    }

    #[test]
    fn test_parse_round_trip() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Completed,
            OrderStatus::Expired,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("Shipped".parse::<OrderStatus>().is_err());
    }
}
