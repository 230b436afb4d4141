//! Trade signal types and the signal status state machine.
//!
//! A [`Signal`] is a proposed trade delivered by an upstream strategy
//! generator. The engine owns its lifecycle: ingest assigns identity,
//! the risk gate sizes it, and execution drives it to a terminal status.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Directional bias carried by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Expect the underlying to go up.
    Bullish,
    /// Expect the underlying to go down.
    Bearish,
    /// No directional bias.
    Neutral,
}

impl Direction {
    /// Returns the opposite direction.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Bullish => Self::Bearish,
            Self::Bearish => Self::Bullish,
            Self::Neutral => Self::Neutral,
        }
    }
}

/// Option contract right (call or put).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionRight {
    Call,
    Put,
}

impl std::fmt::Display for OptionRight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "C"),
            Self::Put => write!(f, "P"),
        }
    }
}

/// Strategy family a signal belongs to.
///
/// Upstream generators name strategies loosely; [`StrategyTag::from_wire`]
/// accepts the known aliases and preserves anything unrecognized so the
/// order builder can fall back with a warning instead of failing hard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StrategyTag {
    /// Short put secured by cash collateral.
    CashSecuredPut,
    /// Two-leg put credit spread (short strike above long).
    PutCredit,
    /// Two-leg bear call spread (short strike below long).
    BearCall,
    /// Calendar/diagonal: short front expiry, long back expiry.
    Diagonal,
    /// Back ratio: one short leg, two long legs further out.
    BackRatio,
    /// Unrecognized tag, preserved verbatim.
    Other(String),
}

impl StrategyTag {
    /// Parses a wire-format strategy name, tolerating upstream aliases.
    #[must_use]
    pub fn from_wire(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "CSP" | "CASH_SECURED_PUT" => Self::CashSecuredPut,
            "PUT_CREDIT" | "PUT_CREDIT_SPREAD" | "CREDIT_SPREAD" => Self::PutCredit,
            "BEAR_CALL" | "BEAR_CALL_SPREAD" | "CALL_CREDIT" => Self::BearCall,
            "DIAGONAL" | "CALENDAR" => Self::Diagonal,
            "BACK_RATIO" | "BACKRATIO" => Self::BackRatio,
            _ => Self::Other(raw.trim().to_string()),
        }
    }

    /// Wire-format name for this tag.
    #[must_use]
    pub fn as_wire(&self) -> &str {
        match self {
            Self::CashSecuredPut => "CSP",
            Self::PutCredit => "PUT_CREDIT",
            Self::BearCall => "BEAR_CALL",
            Self::Diagonal => "DIAGONAL",
            Self::BackRatio => "BACK_RATIO",
            Self::Other(raw) => raw,
        }
    }

    /// Returns true if this tag was not recognized at ingest.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Other(_))
    }
}

impl From<String> for StrategyTag {
    fn from(raw: String) -> Self {
        Self::from_wire(&raw)
    }
}

impl From<StrategyTag> for String {
    fn from(tag: StrategyTag) -> Self {
        tag.as_wire().to_string()
    }
}

impl std::fmt::Display for StrategyTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Lifecycle status of a signal.
///
/// Transitions: `Pending → {Approved, Tracked, Rejected, Expired}`,
/// `Approved → Executing → {Executed, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    /// Awaiting risk evaluation.
    Pending,
    /// Risk gate approved; execution not yet started.
    Approved,
    /// Order submission in flight. Not cancellable.
    Executing,
    /// Order accepted by the broker.
    Executed,
    /// Denied by the risk gate; kept visible for manual override.
    Tracked,
    /// Rejected by user action.
    Rejected,
    /// Passed market close without a decision.
    Expired,
    /// Order submission failed.
    Failed,
}

impl SignalStatus {
    /// Returns true if no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Executed | Self::Tracked | Self::Rejected | Self::Expired | Self::Failed
        )
    }

    /// Returns true if the expiry sweep may transition this signal.
    ///
    /// Approved and executing signals are exempt: a decision has been made.
    #[must_use]
    pub const fn is_expirable(self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// A proposed trade delivered by a strategy generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    /// Globally unique identity, assigned at ingest if absent.
    #[serde(default)]
    pub id: String,

    /// Underlying symbol (e.g., "TQQQ").
    pub symbol: String,

    /// Strategy family.
    pub strategy: StrategyTag,

    /// Directional bias, if the generator supplied one.
    #[serde(default)]
    pub direction: Option<Direction>,

    /// Strike of the short leg (or the only leg).
    #[serde(default)]
    pub short_strike: Option<Decimal>,

    /// Strike of the long leg, for two-leg structures.
    #[serde(default)]
    pub long_strike: Option<Decimal>,

    /// Front (or only) expiry.
    pub front_expiry: NaiveDate,

    /// Back expiry for calendar/diagonal structures.
    #[serde(default)]
    pub back_expiry: Option<NaiveDate>,

    /// Generator's estimated per-share cost (debit) or credit.
    #[serde(default)]
    pub est_price: Option<Decimal>,

    /// Per-share maximum loss for one contract of the structure.
    #[serde(default)]
    pub max_loss: Option<Decimal>,

    /// Generator confidence score, 0-100.
    pub confidence: u8,

    /// Capital the account must hold to carry one unit of this trade.
    pub capital_required: Decimal,

    /// Lifecycle status.
    #[serde(default = "default_status")]
    pub status: SignalStatus,

    /// Contracts sized by the risk gate on approval.
    #[serde(default)]
    pub quantity: Option<u32>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub executed_at: Option<DateTime<Utc>>,

    /// Broker order id once submission succeeds.
    #[serde(default)]
    pub order_id: Option<String>,

    /// Human-readable reason for a terminal status.
    #[serde(default)]
    pub reason: Option<String>,
}

const fn default_status() -> SignalStatus {
    SignalStatus::Pending
}

impl Signal {
    /// Assigns a fresh identity if the generator did not supply one.
    pub fn ensure_id(&mut self) {
        if self.id.is_empty() {
            self.id = uuid::Uuid::new_v4().to_string();
        }
    }

    /// Merges late-arriving fields from a duplicate delivery of the same
    /// signal. Status and decision fields are never overwritten; only
    /// holes are filled.
    pub fn merge_from(&mut self, other: &Signal) {
        debug_assert_eq!(self.id, other.id);
        if self.direction.is_none() {
            self.direction = other.direction;
        }
        if self.short_strike.is_none() {
            self.short_strike = other.short_strike;
        }
        if self.long_strike.is_none() {
            self.long_strike = other.long_strike;
        }
        if self.back_expiry.is_none() {
            self.back_expiry = other.back_expiry;
        }
        if self.est_price.is_none() {
            self.est_price = other.est_price;
        }
        if self.max_loss.is_none() {
            self.max_loss = other.max_loss;
        }
    }

    /// Returns true if this is a two-leg structure.
    #[must_use]
    pub fn is_two_leg(&self) -> bool {
        self.long_strike.is_some() || self.back_expiry.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_signal() -> Signal {
        Signal {
            id: "sig-1".to_string(),
            symbol: "TQQQ".to_string(),
            strategy: StrategyTag::PutCredit,
            direction: Some(Direction::Bullish),
            short_strike: Some(dec!(72)),
            long_strike: Some(dec!(68)),
            front_expiry: NaiveDate::from_ymd_opt(2026, 9, 18).unwrap(),
            back_expiry: None,
            est_price: Some(dec!(0.85)),
            max_loss: Some(dec!(4.15)),
            confidence: 82,
            capital_required: dec!(415),
            status: SignalStatus::Pending,
            quantity: None,
            created_at: Utc::now(),
            approved_at: None,
            executed_at: None,
            order_id: None,
            reason: None,
        }
    }

    // ==================== StrategyTag Tests ====================

    #[test]
    fn test_strategy_tag_aliases() {
        assert_eq!(StrategyTag::from_wire("PUT_CREDIT"), StrategyTag::PutCredit);
        assert_eq!(
            StrategyTag::from_wire("put_credit_spread"),
            StrategyTag::PutCredit
        );
        assert_eq!(StrategyTag::from_wire("CSP"), StrategyTag::CashSecuredPut);
        assert_eq!(StrategyTag::from_wire("calendar"), StrategyTag::Diagonal);
        assert_eq!(StrategyTag::from_wire("BACK_RATIO"), StrategyTag::BackRatio);
    }

    #[test]
    fn test_strategy_tag_unknown_preserved() {
        let tag = StrategyTag::from_wire("IRON_CONDOR");
        assert!(tag.is_unknown());
        assert_eq!(tag.as_wire(), "IRON_CONDOR");
    }

    #[test]
    fn test_strategy_tag_serde_round_trip() {
        let json = serde_json::to_string(&StrategyTag::PutCredit).unwrap();
        assert_eq!(json, "\"PUT_CREDIT\"");
        let back: StrategyTag = serde_json::from_str("\"PUT_CREDIT\"").unwrap();
        assert_eq!(back, StrategyTag::PutCredit);
    }

    // ==================== Status Tests ====================

    #[test]
    fn test_terminal_statuses() {
        assert!(SignalStatus::Executed.is_terminal());
        assert!(SignalStatus::Failed.is_terminal());
        assert!(SignalStatus::Rejected.is_terminal());
        assert!(SignalStatus::Expired.is_terminal());
        assert!(SignalStatus::Tracked.is_terminal());
        assert!(!SignalStatus::Pending.is_terminal());
        assert!(!SignalStatus::Approved.is_terminal());
        assert!(!SignalStatus::Executing.is_terminal());
    }

    #[test]
    fn test_only_pending_is_expirable() {
        assert!(SignalStatus::Pending.is_expirable());
        assert!(!SignalStatus::Approved.is_expirable());
        assert!(!SignalStatus::Executing.is_expirable());
        assert!(!SignalStatus::Executed.is_expirable());
    }

    // ==================== Signal Tests ====================

    #[test]
    fn test_ensure_id_assigns_when_missing() {
        let mut signal = sample_signal();
        signal.id = String::new();
        signal.ensure_id();
        assert!(!signal.id.is_empty());

        let mut signal = sample_signal();
        signal.ensure_id();
        assert_eq!(signal.id, "sig-1");
    }

    #[test]
    fn test_merge_fills_holes_only() {
        let mut first = sample_signal();
        first.est_price = None;
        first.max_loss = None;

        let mut dup = sample_signal();
        dup.est_price = Some(dec!(0.90));
        dup.max_loss = Some(dec!(4.15));
        dup.short_strike = Some(dec!(99)); // must not overwrite

        first.merge_from(&dup);
        assert_eq!(first.est_price, Some(dec!(0.90)));
        assert_eq!(first.max_loss, Some(dec!(4.15)));
        assert_eq!(first.short_strike, Some(dec!(72)));
    }

    #[test]
    fn test_signal_deserializes_wire_payload() {
        let json = r#"{
            "symbol": "TQQQ",
            "strategy": "PUT_CREDIT",
            "shortStrike": "72",
            "longStrike": "68",
            "frontExpiry": "2026-09-18",
            "maxLoss": "4.15",
            "confidence": 82,
            "capitalRequired": "415"
        }"#;
        let mut signal: Signal = serde_json::from_str(json).unwrap();
        signal.ensure_id();

        assert_eq!(signal.strategy, StrategyTag::PutCredit);
        assert_eq!(signal.short_strike, Some(dec!(72)));
        assert_eq!(signal.status, SignalStatus::Pending);
        assert!(!signal.id.is_empty());
    }
}
