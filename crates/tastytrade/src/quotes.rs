//! Live quotes and limit-price computation.
//!
//! Limit prices are derived from live bid/ask rather than trusting the
//! signal's estimate: a short leg is offered at a 5% concession below
//! the bid to improve fill probability, and a two-leg net price is the
//! long ask minus the short bid. Quote fetches are best-effort with no
//! retry; absence degrades to the signal's carried estimate, and with
//! neither available the order fails rather than going out at market.

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use crate::client::TastyClient;
use crate::error::Result;

/// Live market quote for one option instrument.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OptionQuote {
    pub symbol: String,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub mark: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct QuotesResponse {
    data: QuoteItems,
}

#[derive(Debug, Deserialize)]
struct QuoteItems {
    items: Vec<OptionQuote>,
}

impl TastyClient {
    /// Fetches live quotes for the given OCC symbols, keyed by symbol.
    ///
    /// Symbols with no quote are simply absent from the result.
    ///
    /// # Errors
    /// Returns error if the API call fails.
    pub async fn get_quotes(&self, symbols: &[String]) -> Result<HashMap<String, OptionQuote>> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }

        // OCC symbols carry embedded padding; encode it for the query.
        let joined = symbols.join(",").replace(' ', "%20");
        let path = format!("/market-data/by-type?equity-option={joined}");
        let response: QuotesResponse = self.get(&path).await?;

        Ok(response
            .data
            .items
            .into_iter()
            .map(|q| (q.symbol.clone(), q))
            .collect())
    }
}

/// Limit price for selling a single leg: 5% below the bid, to the cent.
#[must_use]
pub fn credit_limit_price(bid: Decimal) -> Decimal {
    (bid * dec!(0.95)).round_dp(2)
}

/// Net limit price for a two-leg structure: cost to establish, to the
/// cent. Negative means the structure nets a credit.
#[must_use]
pub fn net_limit_price(long_ask: Decimal, short_bid: Decimal) -> Decimal {
    (long_ask - short_bid).round_dp(2)
}
