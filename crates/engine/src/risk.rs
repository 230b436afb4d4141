//! The risk gate: approve/deny plus position sizing.
//!
//! Evaluation is fully synchronous. The concurrency reservation is taken
//! inside the same lock scope as the concurrency check, so two signals
//! evaluated in the same batch can never both pass the cap against the
//! same stale position count. The gate fails closed: missing or stale
//! account data is always a denial, never an approval.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use thetapilot_core::{AccountSnapshot, RiskLevel, RiskProfile, Signal, StrategyTag};
use thetapilot_portfolio::Structure;

/// Standard US equity option multiplier.
const CONTRACT_MULTIPLIER: i64 = 100;

/// Hard clamp on contracts per approval, regardless of profile.
const MAX_CONTRACTS: u32 = 10;

/// Context injected into each evaluation: the account snapshot and the
/// open-structure counts derived from position reconstruction. Built by
/// the engine's refresh task; never read from ambient globals.
#[derive(Debug, Clone)]
pub struct RiskContext {
    pub snapshot: AccountSnapshot,
    pub open_structures: HashMap<StrategyTag, usize>,
}

impl RiskContext {
    /// Builds a context from a fresh snapshot and reconstructed structures.
    #[must_use]
    pub fn from_parts(snapshot: AccountSnapshot, structures: &[Structure]) -> Self {
        let mut open_structures: HashMap<StrategyTag, usize> = HashMap::new();
        for structure in structures {
            *open_structures.entry(structure.strategy_tag()).or_default() += 1;
        }
        Self {
            snapshot,
            open_structures,
        }
    }

    /// Open structures of one strategy family.
    #[must_use]
    pub fn open_count(&self, tag: &StrategyTag) -> usize {
        self.open_structures.get(tag).copied().unwrap_or(0)
    }
}

/// Outcome of one evaluation.
#[derive(Debug, Clone)]
pub struct RiskDecision {
    pub approve: bool,
    pub quantity: u32,
    pub reason: String,
}

impl RiskDecision {
    fn deny(reason: impl Into<String>) -> Self {
        Self {
            approve: false,
            quantity: 0,
            reason: reason.into(),
        }
    }

    fn approve(quantity: u32, reason: impl Into<String>) -> Self {
        Self {
            approve: true,
            quantity,
            reason: reason.into(),
        }
    }
}

/// Evaluates pending signals against a risk profile and live account
/// state, reserving concurrency slots synchronously on approval.
pub struct RiskGate {
    level: RiskLevel,
    /// A snapshot older than this is refused (fail closed).
    max_snapshot_age: Duration,
    /// Approved-but-not-yet-visible structures per strategy. Cleared
    /// whenever a fresh position reconstruction supersedes it.
    reservations: Mutex<HashMap<StrategyTag, usize>>,
}

impl RiskGate {
    /// Creates a gate for the given risk level.
    #[must_use]
    pub fn new(level: RiskLevel, max_snapshot_age: Duration) -> Self {
        Self {
            level,
            max_snapshot_age,
            reservations: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the configured risk level.
    #[must_use]
    pub fn level(&self) -> RiskLevel {
        self.level
    }

    /// Decides approve/deny and a sized quantity for one pending signal.
    ///
    /// Denials carry a specific reason; they are terminal for the signal
    /// and never retried automatically.
    pub fn evaluate(
        &self,
        signal: &Signal,
        profile: &RiskProfile,
        ctx: Option<&RiskContext>,
        now: DateTime<Utc>,
    ) -> RiskDecision {
        let Some(ctx) = ctx else {
            return RiskDecision::deny("account data unavailable, failing closed");
        };
        if ctx.snapshot.is_stale(now, self.max_snapshot_age) {
            return RiskDecision::deny("account snapshot is stale, failing closed");
        }

        if signal.confidence < profile.min_confidence {
            return RiskDecision::deny(format!(
                "confidence {} below minimum {}",
                signal.confidence, profile.min_confidence
            ));
        }

        if signal.capital_required > profile.max_capital {
            return RiskDecision::deny(format!(
                "capital required {} exceeds per-trade maximum {}",
                signal.capital_required, profile.max_capital
            ));
        }

        if signal.capital_required > ctx.snapshot.buying_power {
            return RiskDecision::deny(format!(
                "capital required {} exceeds buying power {}",
                signal.capital_required, ctx.snapshot.buying_power
            ));
        }

        let Some(per_contract_loss) = per_contract_max_loss(signal) else {
            return RiskDecision::deny("cannot determine per-contract max loss");
        };
        if per_contract_loss <= Decimal::ZERO {
            return RiskDecision::deny("per-contract max loss is not positive");
        }

        let risk_budget = ctx.snapshot.net_liquidating_value * self.level.risk_pct();
        let raw_quantity = (risk_budget / per_contract_loss)
            .floor()
            .to_u32()
            .unwrap_or(0);
        if raw_quantity == 0 {
            return RiskDecision::deny(format!(
                "risk budget {risk_budget} does not cover one contract at {per_contract_loss}"
            ));
        }
        let quantity = raw_quantity.min(MAX_CONTRACTS).min(profile.max_contracts);

        // Concurrency check and reservation share one lock scope: no
        // suspension between check and reserve.
        {
            let mut reservations = self.reservations.lock();
            let reserved = reservations
                .get(&signal.strategy)
                .copied()
                .unwrap_or(0);
            let open = ctx.open_count(&signal.strategy) + reserved;
            if open >= profile.max_concurrent {
                return RiskDecision::deny(format!(
                    "concurrency cap reached: {open} open structures of {} (max {})",
                    signal.strategy, profile.max_concurrent
                ));
            }
            *reservations.entry(signal.strategy.clone()).or_default() += 1;
        }

        RiskDecision::approve(
            quantity,
            format!("sized {quantity} contracts against budget {risk_budget}"),
        )
    }

    /// Releases one reserved slot after a failed or abandoned execution.
    pub fn release(&self, tag: &StrategyTag) {
        let mut reservations = self.reservations.lock();
        if let Some(count) = reservations.get_mut(tag) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                reservations.remove(tag);
            }
        }
    }

    /// Drops all reservations. Called when a fresh position
    /// reconstruction supersedes the in-memory counts.
    pub fn clear_reservations(&self) {
        self.reservations.lock().clear();
    }

    /// Currently reserved slots for one strategy.
    #[must_use]
    pub fn reserved(&self, tag: &StrategyTag) -> usize {
        self.reservations.lock().get(tag).copied().unwrap_or(0)
    }
}

/// Dollar max loss of one contract. Prefers the signal's own figure,
/// falling back to strike width for two-strike structures and to the
/// full short strike for cash-secured puts.
fn per_contract_max_loss(signal: &Signal) -> Option<Decimal> {
    let multiplier = Decimal::from(CONTRACT_MULTIPLIER);
    if let Some(max_loss) = signal.max_loss {
        return Some(max_loss * multiplier);
    }
    match (signal.short_strike, signal.long_strike) {
        (Some(short), Some(long)) => Some((short - long).abs() * multiplier),
        (Some(short), None) => Some(short * multiplier),
        _ => None,
    }
}
