//! Risk profile presets.
//!
//! A [`RiskProfile`] bounds what the risk gate may approve for one
//! strategy at one risk level. Profiles are immutable presets selected
//! by the user; the engine never mutates them.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::signal::StrategyTag;

/// User-selected risk appetite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Fraction of account principal risked per trade.
    #[must_use]
    pub fn risk_pct(self) -> Decimal {
        match self {
            Self::Low => dec!(0.05),
            Self::Medium => dec!(0.075),
            Self::High => dec!(0.10),
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Per-strategy, per-level limits consulted by the risk gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskProfile {
    /// Minimum generator confidence (0-100) to consider the signal.
    pub min_confidence: u8,

    /// Maximum capital committed to a single trade.
    pub max_capital: Decimal,

    /// Hard cap on contracts per order.
    pub max_contracts: u32,

    /// Maximum concurrently open structures of this strategy.
    pub max_concurrent: usize,

    /// Close at this percentage of maximum profit.
    pub profit_take_pct: Decimal,

    /// Defensive exit when the structure's loss reaches this multiple
    /// of the credit received.
    pub stop_loss_multiple: Decimal,

    /// Defend or roll when this many days to expiration remain.
    pub defense_dte: i64,
}

impl RiskProfile {
    /// Preset for the given strategy and risk level.
    #[must_use]
    pub fn preset(strategy: &StrategyTag, level: RiskLevel) -> Self {
        match strategy {
            StrategyTag::CashSecuredPut => Self::cash_secured_put(level),
            StrategyTag::BearCall => Self::bear_call(level),
            StrategyTag::Diagonal | StrategyTag::BackRatio => Self::diagonal(level),
            // Credit spreads are the default family; unknown tags get the
            // most conservative spread preset.
            StrategyTag::PutCredit | StrategyTag::Other(_) => Self::put_credit(level),
        }
    }

    /// Put credit spread preset.
    #[must_use]
    pub fn put_credit(level: RiskLevel) -> Self {
        Self {
            min_confidence: match level {
                RiskLevel::Low => 80,
                RiskLevel::Medium => 70,
                RiskLevel::High => 60,
            },
            max_capital: match level {
                RiskLevel::Low => dec!(1000),
                RiskLevel::Medium => dec!(2000),
                RiskLevel::High => dec!(5000),
            },
            max_contracts: 10,
            max_concurrent: match level {
                RiskLevel::Low => 2,
                RiskLevel::Medium => 3,
                RiskLevel::High => 5,
            },
            profit_take_pct: dec!(50),
            stop_loss_multiple: dec!(2),
            defense_dte: 21,
        }
    }

    /// Bear call spread preset. Same shape as put credit but tighter
    /// concurrency: call-side assignment risk is harder to defend.
    #[must_use]
    pub fn bear_call(level: RiskLevel) -> Self {
        Self {
            max_concurrent: match level {
                RiskLevel::Low => 1,
                RiskLevel::Medium => 2,
                RiskLevel::High => 3,
            },
            ..Self::put_credit(level)
        }
    }

    /// Cash-secured put preset. Larger capital ceiling since collateral
    /// is the full strike value.
    #[must_use]
    pub fn cash_secured_put(level: RiskLevel) -> Self {
        Self {
            min_confidence: match level {
                RiskLevel::Low => 85,
                RiskLevel::Medium => 75,
                RiskLevel::High => 65,
            },
            max_capital: match level {
                RiskLevel::Low => dec!(5000),
                RiskLevel::Medium => dec!(10000),
                RiskLevel::High => dec!(20000),
            },
            max_contracts: 5,
            max_concurrent: match level {
                RiskLevel::Low => 1,
                RiskLevel::Medium => 2,
                RiskLevel::High => 3,
            },
            profit_take_pct: dec!(50),
            stop_loss_multiple: dec!(3),
            defense_dte: 14,
        }
    }

    /// Calendar/diagonal preset, also used for back ratios.
    #[must_use]
    pub fn diagonal(level: RiskLevel) -> Self {
        Self {
            min_confidence: match level {
                RiskLevel::Low => 80,
                RiskLevel::Medium => 70,
                RiskLevel::High => 60,
            },
            max_capital: match level {
                RiskLevel::Low => dec!(1500),
                RiskLevel::Medium => dec!(3000),
                RiskLevel::High => dec!(6000),
            },
            max_contracts: 10,
            max_concurrent: 2,
            profit_take_pct: dec!(25),
            stop_loss_multiple: dec!(1),
            defense_dte: 7,
        }
    }
}
