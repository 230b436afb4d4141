//! Types for position reconstruction.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use thetapilot_core::{OptionRight, StrategyTag};

/// One broker-reported option leg, normalized from the positions endpoint.
///
/// `quantity` is signed: negative for short legs, positive for long.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionLeg {
    /// Canonical OCC-style instrument identifier.
    pub symbol: String,

    /// Underlying equity symbol.
    pub underlying: String,

    /// Signed contract count (short < 0 < long).
    pub quantity: Decimal,

    pub strike: Decimal,

    pub right: OptionRight,

    /// Average per-share open price.
    pub open_price: Decimal,

    /// Current per-share mark.
    pub mark_price: Decimal,

    /// Contract multiplier (100 for standard US equity options).
    pub multiplier: Decimal,

    pub expires_at: NaiveDate,

    pub created_at: DateTime<Utc>,
}

impl PositionLeg {
    /// Returns true for short legs.
    #[must_use]
    pub fn is_short(&self) -> bool {
        self.quantity < Decimal::ZERO
    }

    /// Unsigned contract count.
    #[must_use]
    pub fn abs_quantity(&self) -> Decimal {
        self.quantity.abs()
    }
}

/// Shape of a reconstructed structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpreadKind {
    /// Short put above a protective long put.
    PutCreditSpread,
    /// Short call below a protective long call.
    BearCallSpread,
    NakedShortPut,
    NakedLongPut,
    NakedShortCall,
    NakedLongCall,
}

impl SpreadKind {
    /// Returns true for single-leg structures.
    #[must_use]
    pub const fn is_naked(self) -> bool {
        !matches!(self, Self::PutCreditSpread | Self::BearCallSpread)
    }

    /// Strategy family this structure counts against for concurrency caps.
    #[must_use]
    pub fn strategy_tag(self) -> StrategyTag {
        match self {
            Self::PutCreditSpread => StrategyTag::PutCredit,
            Self::BearCallSpread => StrategyTag::BearCall,
            Self::NakedShortPut => StrategyTag::CashSecuredPut,
            Self::NakedLongPut | Self::NakedShortCall | Self::NakedLongCall => {
                StrategyTag::Other(format!("{self:?}").to_ascii_uppercase())
            }
        }
    }
}

/// Open/closed marker. Reconstruction only ever emits open structures;
/// closed ones simply stop appearing in the broker's position list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructureStatus {
    Open,
    Closed,
}

/// A reconstructed logical structure: a matched spread or a naked leg-out.
///
/// `entry_value` and `current_value` are totals (per-share net × multiplier
/// × quantity), netted long-minus-short and signed so that a negative value
/// denotes a net credit. `unrealized_pnl == current_value - entry_value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    pub kind: SpreadKind,

    pub underlying: String,

    /// Strike of the short leg, if any.
    pub short_strike: Option<Decimal>,

    /// Strike of the long leg, if any.
    pub long_strike: Option<Decimal>,

    /// OCC symbols of the member legs (short first for spreads).
    pub symbols: Vec<String>,

    pub expiry: NaiveDate,

    /// Unsigned structure quantity in contracts.
    pub quantity: Decimal,

    /// Net entry value; negative = structure was opened for a credit.
    pub entry_value: Decimal,

    /// Net value at current marks, same sign convention.
    pub current_value: Decimal,

    pub unrealized_pnl: Decimal,

    pub status: StructureStatus,

    /// Earliest leg open time.
    pub opened_at: DateTime<Utc>,
}

impl Structure {
    /// Returns true if this structure was opened for a net credit.
    #[must_use]
    pub fn is_credit(&self) -> bool {
        self.entry_value < Decimal::ZERO
    }

    /// Strategy family for concurrency counting.
    #[must_use]
    pub fn strategy_tag(&self) -> StrategyTag {
        self.kind.strategy_tag()
    }
}
