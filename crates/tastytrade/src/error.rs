//! Error types for the tastytrade adapter.
//!
//! Broker error codes are mapped to a small user-facing taxonomy
//! ([`OrderRejection`]) instead of surfacing raw broker text. Transport
//! errors (non-JSON bodies, missing client identification) are a distinct
//! category: they indicate infrastructure misconfiguration, not a trading
//! condition.

use thiserror::Error;

/// Errors that can occur when talking to tastytrade.
#[derive(Debug, Error)]
pub enum TastyError {
    /// Access credential rejected or could not be obtained.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Refresh credential revoked or invalid; the user must relink the
    /// account. Never retried automatically.
    #[error("broker connection lost, account must be relinked: {0}")]
    ReconnectRequired(String),

    /// API request failed with an HTTP error.
    #[error("API error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Broker error code, when the payload carried one.
        code: Option<String>,
        /// Error message from the broker.
        message: String,
    },

    /// Order refused by the broker, mapped to the friendly taxonomy.
    #[error("order rejected: {0}")]
    OrderRejected(OrderRejection),

    /// No live quote and no carried estimate for a leg; the order is
    /// abandoned rather than submitted at market.
    #[error("no price available for {symbol}")]
    NoPrice {
        /// Instrument that could not be priced.
        symbol: String,
    },

    /// Malformed or unexpected response shape (e.g., HTML instead of
    /// JSON). A configuration defect, not a retryable trading fault.
    #[error("transport error: {0}")]
    Transport(String),

    /// Network error.
    #[error("network error: {0}")]
    Network(String),

    /// Request timeout.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Invalid order shape before submission (missing leg, bad strike).
    #[error("invalid order: {0}")]
    InvalidOrder(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl TastyError {
    /// Creates an API error from status code and message.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            code: None,
            message: message.into(),
        }
    }

    /// Creates an API error carrying the broker's error code.
    pub fn api_with_code(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Returns true if the failure is plausibly transient (network-level).
    ///
    /// Order submission is never retried even for transient failures; this
    /// classification only drives the single token-refresh retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns true if the account must be relinked by the user before
    /// any further execution.
    #[must_use]
    pub fn requires_relink(&self) -> bool {
        matches!(self, Self::ReconnectRequired(_))
    }
}

impl From<reqwest::Error> for TastyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Network(format!("connection failed: {err}"))
        } else if err.is_decode() {
            Self::Transport(format!("undecodable response body: {err}"))
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for TastyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for tastytrade operations.
pub type Result<T> = std::result::Result<T, TastyError>;

// =============================================================================
// Order Rejection Taxonomy
// =============================================================================

/// User-facing classification of broker order rejections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderRejection {
    InsufficientBuyingPower,
    WrongPriceDirection,
    InstrumentNotTradeable,
    AccountNotPermissioned,
    InvalidStrikeOrExpiry,
    /// Anything unrecognized; carries the broker's code for logs.
    Unknown(String),
}

impl OrderRejection {
    /// Maps a broker error code to the friendly taxonomy.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code {
            "margin_check_failed" | "insufficient_funds" | "buying_power_exceeded" => {
                Self::InsufficientBuyingPower
            }
            "invalid_price_effect" | "price_effect_mismatch" | "wrong_price_direction" => {
                Self::WrongPriceDirection
            }
            "instrument_not_tradeable" | "symbol_not_tradeable" | "market_closed_for_instrument" => {
                Self::InstrumentNotTradeable
            }
            "account_not_permitted" | "insufficient_permissions" | "option_level_too_low" => {
                Self::AccountNotPermissioned
            }
            "unknown_symbol" | "invalid_strike" | "invalid_expiration" | "contract_not_found" => {
                Self::InvalidStrikeOrExpiry
            }
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl std::fmt::Display for OrderRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientBuyingPower => write!(f, "insufficient buying power"),
            Self::WrongPriceDirection => write!(f, "limit price is on the wrong side"),
            Self::InstrumentNotTradeable => write!(f, "instrument is not tradeable"),
            Self::AccountNotPermissioned => {
                write!(f, "account is not permissioned for this trade")
            }
            Self::InvalidStrikeOrExpiry => write!(f, "invalid strike or expiration"),
            Self::Unknown(code) => write!(f, "order was rejected by the broker ({code})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Classification Tests ====================

    #[test]
    fn test_network_errors_are_transient() {
        assert!(TastyError::Network("connection refused".to_string()).is_transient());
        assert!(TastyError::Timeout("deadline".to_string()).is_transient());
        assert!(TastyError::api(503, "unavailable").is_transient());
    }

    #[test]
    fn test_client_errors_are_not_transient() {
        assert!(!TastyError::api(400, "bad request").is_transient());
        assert!(!TastyError::Authentication("expired".to_string()).is_transient());
        assert!(!TastyError::Transport("html body".to_string()).is_transient());
    }

    #[test]
    fn test_reconnect_required_flags_relink() {
        let err = TastyError::ReconnectRequired("invalid_grant".to_string());
        assert!(err.requires_relink());
        assert!(!err.is_transient());
    }

    // ==================== Rejection Mapping Tests ====================

    #[test]
    fn test_rejection_mapping_buying_power() {
        assert_eq!(
            OrderRejection::from_code("margin_check_failed"),
            OrderRejection::InsufficientBuyingPower
        );
        assert_eq!(
            OrderRejection::from_code("insufficient_funds"),
            OrderRejection::InsufficientBuyingPower
        );
    }

    #[test]
    fn test_rejection_mapping_price_direction() {
        assert_eq!(
            OrderRejection::from_code("invalid_price_effect"),
            OrderRejection::WrongPriceDirection
        );
    }

    #[test]
    fn test_rejection_mapping_unknown_preserves_code() {
        let rejection = OrderRejection::from_code("mystery_code");
        assert_eq!(rejection, OrderRejection::Unknown("mystery_code".to_string()));
        assert!(rejection.to_string().contains("mystery_code"));
    }

    #[test]
    fn test_rejection_display_is_friendly() {
        let err = TastyError::OrderRejected(OrderRejection::InsufficientBuyingPower);
        assert!(err.to_string().contains("insufficient buying power"));
        // Raw broker text never leaks through the taxonomy variants.
        assert!(!err.to_string().contains("margin_check_failed"));
    }
}
