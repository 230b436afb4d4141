//! Multi-leg order construction and submission.
//!
//! A strategy tag maps to a pure leg-builder through a fixed registry;
//! unknown tags fall back to the diagonal builder with a logged warning
//! so upstream naming drift degrades instead of failing hard. Opening
//! orders are always priced limits (the broker rejects market orders on
//! these instruments); closing an existing structure deliberately goes
//! out as a market order, trading fill price for certainty.

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use thetapilot_core::{Direction, OptionRight, Signal, StrategyTag};
use thetapilot_portfolio::Structure;

use crate::client::TastyClient;
use crate::error::{OrderRejection, Result, TastyError};
use crate::quotes::{credit_limit_price, net_limit_price, OptionQuote};
use crate::symbol;

// =============================================================================
// Wire Types
// =============================================================================

/// Order duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    Day,
    #[serde(rename = "GTC")]
    Gtc,
}

/// Order pricing type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
}

/// Whether the order's net price is paid or collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceEffect {
    Debit,
    Credit,
}

/// Per-leg action, in the broker's wire spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderAction {
    #[serde(rename = "Buy to Open")]
    BuyToOpen,
    #[serde(rename = "Sell to Open")]
    SellToOpen,
    #[serde(rename = "Buy to Close")]
    BuyToClose,
    #[serde(rename = "Sell to Close")]
    SellToClose,
}

impl OrderAction {
    /// The mirror-image action that closes a leg opened with `self`.
    #[must_use]
    pub const fn closing(self) -> Self {
        match self {
            Self::BuyToOpen => Self::SellToClose,
            Self::SellToOpen => Self::BuyToClose,
            Self::BuyToClose => Self::SellToOpen,
            Self::SellToClose => Self::BuyToOpen,
        }
    }

    /// Returns true for sell-side actions.
    #[must_use]
    pub const fn is_sell(self) -> bool {
        matches!(self, Self::SellToOpen | Self::SellToClose)
    }
}

/// One leg of a wire-level order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OrderLeg {
    /// Always "Equity Option" for this adapter.
    pub instrument_type: String,
    /// Canonical OCC symbol; whitespace-exact.
    pub symbol: String,
    pub quantity: u32,
    pub action: OrderAction,
}

/// Wire-level order request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OrderRequest {
    pub time_in_force: TimeInForce,
    pub order_type: OrderType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_effect: Option<PriceEffect>,
    pub legs: Vec<OrderLeg>,
}

/// Broker acknowledgement of a submitted order.
#[derive(Debug, Clone)]
pub struct OrderReceipt {
    pub id: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    data: OrderResponseData,
}

#[derive(Debug, Deserialize)]
struct OrderResponseData {
    order: RawOrder,
}

#[derive(Debug, Deserialize)]
struct RawOrder {
    id: IdValue,
    status: Option<String>,
}

/// The broker returns numeric ids on live and string ids on cert.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IdValue {
    Num(i64),
    Str(String),
}

impl IdValue {
    fn into_string(self) -> String {
        match self {
            Self::Num(n) => n.to_string(),
            Self::Str(s) => s,
        }
    }
}

// =============================================================================
// Leg Builders
// =============================================================================

/// One leg of a structure before instrument encoding and pricing.
#[derive(Debug, Clone, PartialEq)]
pub struct LegSpec {
    pub right: OptionRight,
    pub strike: Decimal,
    pub expiry: NaiveDate,
    pub action: OrderAction,
    /// Contracts per structure unit (2 for the long side of a back ratio).
    pub ratio: u32,
}

type LegBuilder = fn(&Signal) -> Result<Vec<LegSpec>>;

/// Registry of pure builders keyed by strategy tag. Unknown tags fall
/// back to the diagonal builder; the caller logs the drift.
fn builder_for(tag: &StrategyTag) -> LegBuilder {
    match tag {
        StrategyTag::CashSecuredPut => build_cash_secured_put,
        StrategyTag::PutCredit => build_put_credit,
        StrategyTag::BearCall => build_bear_call,
        StrategyTag::Diagonal | StrategyTag::Other(_) => build_diagonal,
        StrategyTag::BackRatio => build_back_ratio,
    }
}

/// Builds the leg set for a signal's strategy.
///
/// # Errors
/// Returns [`TastyError::InvalidOrder`] if the signal lacks a required
/// strike or the strikes violate the structure's ordering.
pub fn build_legs(signal: &Signal) -> Result<Vec<LegSpec>> {
    if signal.strategy.is_unknown() {
        tracing::warn!(
            strategy = %signal.strategy,
            signal_id = %signal.id,
            "Unknown strategy tag, using diagonal builder"
        );
    }
    (builder_for(&signal.strategy))(signal)
}

fn require_strike(strike: Option<Decimal>, which: &str, signal: &Signal) -> Result<Decimal> {
    strike.ok_or_else(|| {
        TastyError::InvalidOrder(format!(
            "signal {} is missing its {which} strike",
            signal.id
        ))
    })
}

fn build_cash_secured_put(signal: &Signal) -> Result<Vec<LegSpec>> {
    let strike = require_strike(signal.short_strike, "short", signal)?;
    Ok(vec![LegSpec {
        right: OptionRight::Put,
        strike,
        expiry: signal.front_expiry,
        action: OrderAction::SellToOpen,
        ratio: 1,
    }])
}

fn build_put_credit(signal: &Signal) -> Result<Vec<LegSpec>> {
    let short = require_strike(signal.short_strike, "short", signal)?;
    let long = require_strike(signal.long_strike, "long", signal)?;
    if long >= short {
        return Err(TastyError::InvalidOrder(format!(
            "put credit spread needs the long strike below the short: {long} >= {short}"
        )));
    }
    Ok(vec![
        LegSpec {
            right: OptionRight::Put,
            strike: short,
            expiry: signal.front_expiry,
            action: OrderAction::SellToOpen,
            ratio: 1,
        },
        LegSpec {
            right: OptionRight::Put,
            strike: long,
            expiry: signal.front_expiry,
            action: OrderAction::BuyToOpen,
            ratio: 1,
        },
    ])
}

fn build_bear_call(signal: &Signal) -> Result<Vec<LegSpec>> {
    let short = require_strike(signal.short_strike, "short", signal)?;
    let long = require_strike(signal.long_strike, "long", signal)?;
    if long <= short {
        return Err(TastyError::InvalidOrder(format!(
            "bear call spread needs the long strike above the short: {long} <= {short}"
        )));
    }
    Ok(vec![
        LegSpec {
            right: OptionRight::Call,
            strike: short,
            expiry: signal.front_expiry,
            action: OrderAction::SellToOpen,
            ratio: 1,
        },
        LegSpec {
            right: OptionRight::Call,
            strike: long,
            expiry: signal.front_expiry,
            action: OrderAction::BuyToOpen,
            ratio: 1,
        },
    ])
}

/// Default builder: short front-month leg against a long back-month leg
/// at the same or a different strike. Tolerates sparse signals, which is
/// why it doubles as the unknown-tag fallback.
fn build_diagonal(signal: &Signal) -> Result<Vec<LegSpec>> {
    let short = require_strike(signal.short_strike, "short", signal)?;
    let long = signal.long_strike.unwrap_or(short);
    let back = signal.back_expiry.unwrap_or(signal.front_expiry);
    let right = match signal.direction {
        Some(Direction::Bearish) => OptionRight::Call,
        _ => OptionRight::Put,
    };
    Ok(vec![
        LegSpec {
            right,
            strike: short,
            expiry: signal.front_expiry,
            action: OrderAction::SellToOpen,
            ratio: 1,
        },
        LegSpec {
            right,
            strike: long,
            expiry: back,
            action: OrderAction::BuyToOpen,
            ratio: 1,
        },
    ])
}

fn build_back_ratio(signal: &Signal) -> Result<Vec<LegSpec>> {
    let short = require_strike(signal.short_strike, "short", signal)?;
    let long = require_strike(signal.long_strike, "long", signal)?;
    let right = match signal.direction {
        Some(Direction::Bullish) => OptionRight::Call,
        _ => OptionRight::Put,
    };
    Ok(vec![
        LegSpec {
            right,
            strike: short,
            expiry: signal.front_expiry,
            action: OrderAction::SellToOpen,
            ratio: 1,
        },
        LegSpec {
            right,
            strike: long,
            expiry: signal.back_expiry.unwrap_or(signal.front_expiry),
            action: OrderAction::BuyToOpen,
            ratio: 2,
        },
    ])
}

// =============================================================================
// Order Construction
// =============================================================================

/// Builds a priced opening order for an approved signal.
///
/// Pricing uses live quotes when available, falls back to the signal's
/// carried estimate, and otherwise fails with [`TastyError::NoPrice`]
/// rather than submitting a market order.
///
/// # Errors
/// Returns error if legs cannot be built, instruments cannot be encoded,
/// or no price can be established.
pub async fn build_open_order(
    client: &TastyClient,
    signal: &Signal,
    quantity: u32,
) -> Result<OrderRequest> {
    if quantity == 0 {
        return Err(TastyError::InvalidOrder(format!(
            "signal {} was sized to zero contracts",
            signal.id
        )));
    }

    let specs = build_legs(signal)?;
    let symbols: Vec<String> = specs
        .iter()
        .map(|s| symbol::encode(&signal.symbol, s.expiry, s.right, s.strike))
        .collect::<Result<_>>()?;

    // Best-effort quote fetch, no retry: absence degrades to the
    // signal's estimate.
    let quotes = match client.get_quotes(&symbols).await {
        Ok(quotes) => quotes,
        Err(e) => {
            tracing::warn!(error = %e, signal_id = %signal.id, "Quote fetch failed, using estimate");
            Default::default()
        }
    };

    let (price, effect) = price_order(signal, &specs, &symbols, &quotes)?;

    let legs = specs
        .iter()
        .zip(&symbols)
        .map(|(spec, sym)| OrderLeg {
            instrument_type: "Equity Option".to_string(),
            symbol: sym.clone(),
            quantity: quantity * spec.ratio,
            action: spec.action,
        })
        .collect();

    Ok(OrderRequest {
        time_in_force: TimeInForce::Day,
        order_type: OrderType::Limit,
        price: Some(price),
        price_effect: Some(effect),
        legs,
    })
}

/// Derives the limit price and price effect for a leg set.
fn price_order(
    signal: &Signal,
    specs: &[LegSpec],
    symbols: &[String],
    quotes: &std::collections::HashMap<String, OptionQuote>,
) -> Result<(Decimal, PriceEffect)> {
    match specs {
        // Single short leg: sell at a concession below the live bid.
        [only] if only.action.is_sell() => {
            if let Some(bid) = quotes.get(&symbols[0]).and_then(|q| q.bid) {
                return Ok((credit_limit_price(bid), PriceEffect::Credit));
            }
            estimate_price(signal, symbols)
        }
        // Short leg plus long leg: net of long ask minus short bid.
        [short, long] if short.action.is_sell() && !long.action.is_sell() => {
            let short_bid = quotes.get(&symbols[0]).and_then(|q| q.bid);
            let long_ask = quotes.get(&symbols[1]).and_then(|q| q.ask);
            if let (Some(bid), Some(ask)) = (short_bid, long_ask) {
                let net = net_limit_price(ask, bid);
                let effect = if net < Decimal::ZERO {
                    PriceEffect::Credit
                } else {
                    PriceEffect::Debit
                };
                return Ok((net.abs(), effect));
            }
            estimate_price(signal, symbols)
        }
        _ => estimate_price(signal, symbols),
    }
}

/// Falls back to the signal's carried estimate, or fails with an
/// explicit no-price error.
fn estimate_price(signal: &Signal, symbols: &[String]) -> Result<(Decimal, PriceEffect)> {
    let est = signal.est_price.ok_or_else(|| TastyError::NoPrice {
        symbol: symbols.first().cloned().unwrap_or_default(),
    })?;

    let effect = match signal.strategy {
        StrategyTag::CashSecuredPut | StrategyTag::PutCredit | StrategyTag::BearCall => {
            PriceEffect::Credit
        }
        _ if est < Decimal::ZERO => PriceEffect::Credit,
        _ => PriceEffect::Debit,
    };

    tracing::info!(
        signal_id = %signal.id,
        price = %est.abs(),
        "Pricing order from carried estimate"
    );
    Ok((est.abs().round_dp(2), effect))
}

/// Builds the mirror-image order that closes an existing structure.
///
/// Always a market-equivalent order: manual closes prioritize certainty
/// of fill over price.
///
/// # Errors
/// Returns error if the structure's quantity cannot be expressed as a
/// contract count.
pub fn build_close_order(structure: &Structure) -> Result<OrderRequest> {
    let quantity = structure
        .quantity
        .to_u32()
        .filter(|q| *q > 0)
        .ok_or_else(|| {
            TastyError::InvalidOrder(format!(
                "structure quantity {} is not a positive contract count",
                structure.quantity
            ))
        })?;

    let mut legs = Vec::with_capacity(structure.symbols.len());
    for (idx, sym) in structure.symbols.iter().enumerate() {
        // Symbols are ordered short-first for spreads; a naked leg's
        // direction comes from which strike slot is populated.
        let opened_with = if idx == 0 && structure.short_strike.is_some() {
            OrderAction::SellToOpen
        } else {
            OrderAction::BuyToOpen
        };
        legs.push(OrderLeg {
            instrument_type: "Equity Option".to_string(),
            symbol: sym.clone(),
            quantity,
            action: opened_with.closing(),
        });
    }

    Ok(OrderRequest {
        time_in_force: TimeInForce::Day,
        order_type: OrderType::Market,
        price: None,
        price_effect: None,
        legs,
    })
}

// =============================================================================
// Submission
// =============================================================================

/// Submits an order. Never retried: after an ambiguous network failure a
/// resubmission risks a duplicate live order, so failures surface to the
/// caller for manual confirmation.
///
/// # Errors
/// Returns [`TastyError::OrderRejected`] with the friendly taxonomy when
/// the broker refuses the order, or the underlying transport error.
pub async fn submit_order(
    client: &TastyClient,
    account: &str,
    order: &OrderRequest,
) -> Result<OrderReceipt> {
    let path = format!("/accounts/{account}/orders");

    match client.post::<OrderResponse, _>(&path, order).await {
        Ok(response) => {
            let receipt = OrderReceipt {
                id: response.data.order.id.into_string(),
                status: response.data.order.status.unwrap_or_default(),
            };
            tracing::info!(order_id = %receipt.id, status = %receipt.status, "Order routed");
            Ok(receipt)
        }
        Err(TastyError::Api {
            status,
            code: Some(code),
            message,
        }) => {
            let rejection = OrderRejection::from_code(&code);
            tracing::warn!(
                status,
                code = %code,
                message = %message,
                "Order rejected by broker"
            );
            Err(TastyError::OrderRejected(rejection))
        }
        Err(e) => Err(e),
    }
}
