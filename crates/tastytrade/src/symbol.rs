//! OCC-style option symbol encoding.
//!
//! The broker's matching engine is whitespace-sensitive: the canonical
//! identifier is the underlying padded to 6 characters, the expiry as
//! YYMMDD, a one-character right flag, and the strike scaled by 1000 and
//! zero-padded to 8 digits. `TQQQ 72P expiring 2026-09-18` encodes as
//! `"TQQQ  260918P00072000"` and must round-trip byte-for-byte.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thetapilot_core::OptionRight;

use crate::error::{Result, TastyError};

/// Width the underlying is padded to.
const ROOT_WIDTH: usize = 6;

/// Strike scale factor (three implied decimal places).
const STRIKE_SCALE: i64 = 1000;

/// Encodes an option contract into its canonical wire identifier.
///
/// # Errors
/// Returns [`TastyError::InvalidOrder`] if the underlying exceeds six
/// characters or the strike cannot be represented in eight digits.
pub fn encode(
    underlying: &str,
    expiry: NaiveDate,
    right: OptionRight,
    strike: Decimal,
) -> Result<String> {
    let root = underlying.trim().to_ascii_uppercase();
    if root.is_empty() || root.len() > ROOT_WIDTH {
        return Err(TastyError::InvalidOrder(format!(
            "underlying must be 1-{ROOT_WIDTH} characters: {underlying:?}"
        )));
    }

    let scaled = (strike * Decimal::from(STRIKE_SCALE)).normalize();
    if scaled.fract() != Decimal::ZERO {
        return Err(TastyError::InvalidOrder(format!(
            "strike has sub-tenth-of-a-cent precision: {strike}"
        )));
    }
    let scaled = i64::try_from(scaled.mantissa())
        .map_err(|_| TastyError::InvalidOrder(format!("strike out of range: {strike}")))?;
    if !(0..100_000_000).contains(&scaled) {
        return Err(TastyError::InvalidOrder(format!(
            "strike out of range: {strike}"
        )));
    }

    Ok(format!(
        "{root:<ROOT_WIDTH$}{}{right}{scaled:08}",
        expiry.format("%y%m%d")
    ))
}

/// Decodes a canonical wire identifier back into its components.
///
/// # Errors
/// Returns [`TastyError::InvalidOrder`] if the identifier does not match
/// the fixed-width format.
pub fn decode(symbol: &str) -> Result<(String, NaiveDate, OptionRight, Decimal)> {
    if symbol.len() != ROOT_WIDTH + 6 + 1 + 8 {
        return Err(TastyError::InvalidOrder(format!(
            "option symbol has wrong length: {symbol:?}"
        )));
    }

    let root = symbol[..ROOT_WIDTH].trim_end().to_string();
    if root.is_empty() {
        return Err(TastyError::InvalidOrder(format!(
            "option symbol has empty root: {symbol:?}"
        )));
    }

    let expiry = NaiveDate::parse_from_str(&symbol[ROOT_WIDTH..ROOT_WIDTH + 6], "%y%m%d")
        .map_err(|e| TastyError::InvalidOrder(format!("bad expiry in {symbol:?}: {e}")))?;

    let right = match &symbol[ROOT_WIDTH + 6..ROOT_WIDTH + 7] {
        "C" => OptionRight::Call,
        "P" => OptionRight::Put,
        other => {
            return Err(TastyError::InvalidOrder(format!(
                "bad right flag {other:?} in {symbol:?}"
            )))
        }
    };

    let scaled: i64 = symbol[ROOT_WIDTH + 7..]
        .parse()
        .map_err(|e| TastyError::InvalidOrder(format!("bad strike in {symbol:?}: {e}")))?;
    let strike = Decimal::new(scaled, 3).normalize();

    Ok((root, expiry, right, strike))
}
