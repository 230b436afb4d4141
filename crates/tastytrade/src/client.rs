//! tastytrade REST client with rate limiting.
//!
//! Every request carries the fixed client-identification header and a
//! bearer credential obtained from the [`SessionManager`]; a 401 on a
//! credential we believed valid triggers one transparent refresh-and-
//! replay. Responses that are not JSON (an HTML error page from a
//! misrouted request, say) are loudly classified as transport errors:
//! they mean infrastructure misconfiguration, not a trading condition.

use std::num::NonZeroU32;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use thetapilot_core::OptionRight;
use thetapilot_portfolio::PositionLeg;

use crate::error::{Result, TastyError};
use crate::session::{SessionManager, CLIENT_PRODUCT};

// =============================================================================
// Constants
// =============================================================================

/// tastytrade production API base URL.
pub const TASTY_PROD_URL: &str = "https://api.tastyworks.com";

/// tastytrade certification (sandbox) API base URL.
pub const TASTY_CERT_URL: &str = "https://api.cert.tastyworks.com";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the REST client.
#[derive(Debug, Clone)]
pub struct TastyClientConfig {
    /// Base URL for the API.
    pub base_url: String,

    /// Requests per minute limit.
    pub requests_per_minute: NonZeroU32,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for TastyClientConfig {
    fn default() -> Self {
        Self {
            base_url: TASTY_PROD_URL.to_string(),
            requests_per_minute: nonzero!(120u32),
            timeout_secs: 30,
        }
    }
}

impl TastyClientConfig {
    /// Creates a configuration for the certification sandbox.
    #[must_use]
    pub fn cert() -> Self {
        Self {
            base_url: TASTY_CERT_URL.to_string(),
            ..Default::default()
        }
    }

    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

// =============================================================================
// API Response Types
// =============================================================================

/// Broker error payload: `{"error": {"code", "message"}}` or, for
/// preflight validation, `{"error": {"errors": [{"code", "message"}]}}`.
#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: Option<String>,
    message: Option<String>,
    errors: Option<Vec<ApiErrorItem>>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorItem {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PositionsResponse {
    data: PositionsItems,
}

#[derive(Debug, Deserialize)]
struct PositionsItems {
    items: Vec<RawPositionItem>,
}

/// Raw position row from the broker. Field names are dash-cased on the
/// wire.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawPositionItem {
    symbol: String,
    underlying_symbol: String,
    quantity: Decimal,
    strike_price: Option<Decimal>,
    call_or_put: Option<String>,
    average_open_price: Option<Decimal>,
    mark_price: Option<Decimal>,
    multiplier: Option<Decimal>,
    expires_at: Option<String>,
    created_at: Option<String>,
}

impl RawPositionItem {
    /// Normalizes into a [`PositionLeg`], or `None` for rows that are
    /// not option legs (equity positions have no strike or right).
    fn into_leg(self) -> Option<PositionLeg> {
        let right = match self.call_or_put.as_deref() {
            Some("C" | "Call" | "CALL") => OptionRight::Call,
            Some("P" | "Put" | "PUT") => OptionRight::Put,
            _ => return None,
        };
        let strike = self.strike_price?;
        let expires_at = parse_expiry(self.expires_at.as_deref()?)?;

        Some(PositionLeg {
            symbol: self.symbol,
            underlying: self.underlying_symbol,
            quantity: self.quantity,
            strike,
            right,
            open_price: self.average_open_price.unwrap_or_default(),
            mark_price: self.mark_price.unwrap_or_default(),
            multiplier: self.multiplier.unwrap_or_else(|| Decimal::from(100)),
            expires_at,
            created_at: self
                .created_at
                .as_deref()
                .and_then(parse_timestamp)
                .unwrap_or_else(Utc::now),
        })
    }
}

fn parse_expiry(raw: &str) -> Option<NaiveDate> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.date_naive())
        .ok()
        .or_else(|| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .ok()
}

/// Account balance figures.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Balances {
    pub buying_power: Decimal,
    pub net_liquidating_value: Decimal,
    pub cash_balance: Decimal,
}

#[derive(Debug, Deserialize)]
struct BalancesResponse {
    data: Balances,
}

// =============================================================================
// TastyClient
// =============================================================================

/// tastytrade REST API client.
pub struct TastyClient {
    config: TastyClientConfig,
    http: reqwest::Client,
    rate_limiter: Arc<
        RateLimiter<
            governor::state::NotKeyed,
            governor::state::InMemoryState,
            governor::clock::DefaultClock,
        >,
    >,
    session: Arc<SessionManager>,
}

impl std::fmt::Debug for TastyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TastyClient")
            .field("base_url", &self.config.base_url)
            .field("requests_per_minute", &self.config.requests_per_minute)
            .finish_non_exhaustive()
    }
}

impl TastyClient {
    /// Creates a new client sharing the given session.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: TastyClientConfig, session: Arc<SessionManager>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(CLIENT_PRODUCT)
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TastyError::Configuration(format!("failed to build HTTP client: {e}")))?;

        let quota = Quota::per_minute(config.requests_per_minute);

        Ok(Self {
            config,
            http,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            session,
        })
    }

    /// Returns the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Returns the shared session manager.
    #[must_use]
    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Waits for the rate limiter and makes an authenticated GET request.
    pub(crate) async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.config.base_url, path);
        let token = self.session.access_token().await?;

        tracing::debug!("GET {}", url);

        let response = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .header("Accept", "application/json")
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            // The broker saw the credential as expired before we did;
            // refresh once and replay.
            self.session.invalidate();
            let token = self.session.access_token().await?;
            let response = self
                .http
                .get(&url)
                .bearer_auth(&token)
                .header("Accept", "application/json")
                .send()
                .await?;
            return self.handle_response(response).await;
        }

        self.handle_response(response).await
    }

    /// Waits for the rate limiter and makes an authenticated POST request.
    pub(crate) async fn post<T: serde::de::DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.config.base_url, path);
        let body_json = serde_json::to_string(body)?;
        let token = self.session.access_token().await?;

        tracing::debug!("POST {} body_len={}", url, body_json.len());

        let response = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .header("Accept", "application/json")
            .header("Content-Type", "application/json")
            .body(body_json.clone())
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            self.session.invalidate();
            let token = self.session.access_token().await?;
            let response = self
                .http
                .post(&url)
                .bearer_auth(&token)
                .header("Accept", "application/json")
                .header("Content-Type", "application/json")
                .body(body_json)
                .send()
                .await?;
            return self.handle_response(response).await;
        }

        self.handle_response(response).await
    }

    /// Handles an API response, classifying failures.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            return serde_json::from_str(&text).map_err(|e| {
                tracing::error!(
                    status = status.as_u16(),
                    body = %text.chars().take(200).collect::<String>(),
                    "Broker returned an unexpected body; check routing and client headers"
                );
                TastyError::Transport(format!("unexpected response shape: {e}"))
            });
        }

        if status == StatusCode::UNAUTHORIZED {
            return Err(TastyError::Authentication(
                "broker rejected the access credential".to_string(),
            ));
        }

        if let Ok(envelope) = serde_json::from_str::<ApiErrorEnvelope>(&text) {
            // Preflight validation failures nest the real code one level
            // down; surface the first one.
            let (code, message) = match envelope.error.errors.and_then(|mut v| {
                if v.is_empty() {
                    None
                } else {
                    Some(v.remove(0))
                }
            }) {
                Some(item) => (item.code, item.message),
                None => (envelope.error.code, envelope.error.message),
            };

            let message = message.unwrap_or_else(|| "no message".to_string());
            return Err(match code {
                Some(code) => TastyError::api_with_code(status.as_u16(), code, message),
                None => TastyError::api(status.as_u16(), message),
            });
        }

        if text.trim_start().starts_with('<') {
            tracing::error!(
                status = status.as_u16(),
                "Broker edge returned HTML; request was likely rejected before the API"
            );
            return Err(TastyError::Transport(format!(
                "non-JSON error body with status {status}"
            )));
        }

        Err(TastyError::api(status.as_u16(), text))
    }

    // =========================================================================
    // Account Endpoints
    // =========================================================================

    /// Fetches the flat option-leg position list for an account.
    ///
    /// Equity rows are skipped; only option legs are returned.
    ///
    /// # Errors
    /// Returns error if the API call fails.
    pub async fn get_positions(&self, account: &str) -> Result<Vec<PositionLeg>> {
        let path = format!("/accounts/{account}/positions");
        let response: PositionsResponse = self.get(&path).await?;

        Ok(response
            .data
            .items
            .into_iter()
            .filter_map(RawPositionItem::into_leg)
            .collect())
    }

    /// Fetches account balance figures.
    ///
    /// # Errors
    /// Returns error if the API call fails.
    pub async fn get_balances(&self, account: &str) -> Result<Balances> {
        let path = format!("/accounts/{account}/balances");
        let response: BalancesResponse = self.get(&path).await?;
        Ok(response.data)
    }
}
