//! Account snapshot consumed by the risk gate.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Point-in-time view of the brokerage account.
///
/// Refreshed on a fixed interval by the engine; the risk gate refuses
/// to make decisions against a snapshot older than its refresh window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// Broker-computed collateral available for new positions.
    pub buying_power: Decimal,

    /// Net liquidating value (the account principal used for sizing).
    pub net_liquidating_value: Decimal,

    /// Settled cash.
    pub cash_balance: Decimal,

    /// Number of open position legs the broker reports.
    pub open_position_count: usize,

    /// When this snapshot was taken.
    pub as_of: DateTime<Utc>,
}

impl AccountSnapshot {
    /// Returns true if the snapshot is older than `max_age`.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now - self.as_of > max_age
    }
}
