//! OAuth session management for one brokerage account.
//!
//! The session manager owns the account's credential pair and exposes
//! [`SessionManager::access_token`], which never returns an expired
//! credential. Refreshes are coalesced: concurrent callers queue on a
//! single refresh gate, and whoever wins re-checks state so only one
//! token exchange is ever in flight. A second refresh call using an
//! already-rotated token would be rejected by the broker, so this is a
//! correctness rule, not an optimization.
//!
//! A revoked refresh credential (`invalid_grant`) is terminal: the
//! manager surfaces [`TastyError::ReconnectRequired`] and halts further
//! refresh attempts until the user relinks the account.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::{Result, TastyError};

/// Fixed client-identification value sent with every outbound broker
/// call. The broker's edge proxy rejects requests without it at the
/// transport level, before any application handling.
pub const CLIENT_PRODUCT: &str = "thetapilot/0.1";

/// OAuth token endpoint path, relative to the API base URL.
const TOKEN_PATH: &str = "/oauth/token";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the session manager.
#[derive(Clone)]
pub struct SessionConfig {
    /// API base URL (e.g., `https://api.tastyworks.com`).
    pub base_url: String,

    /// OAuth client id.
    pub client_id: String,

    /// OAuth client secret. Never logged.
    pub client_secret: SecretString,

    /// Linked account number.
    pub account_number: String,

    /// Seconds before nominal expiry at which the access credential is
    /// already treated as expiring.
    pub expiry_margin_secs: i64,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("account_number", &self.account_number)
            .finish_non_exhaustive()
    }
}

impl SessionConfig {
    /// Creates a configuration with default margins and timeouts.
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: SecretString,
        account_number: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            client_id: client_id.into(),
            client_secret,
            account_number: account_number.into(),
            expiry_margin_secs: 60,
            timeout_secs: 30,
        }
    }
}

// =============================================================================
// Wire Types
// =============================================================================

/// Token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenGrant {
    access_token: String,
    /// Present when the broker rotates the refresh credential.
    refresh_token: Option<String>,
    expires_in: i64,
}

/// Token endpoint error payload.
#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    error: String,
    error_description: Option<String>,
}

// =============================================================================
// SessionManager
// =============================================================================

#[derive(Debug)]
struct SessionState {
    access_token: Option<String>,
    refresh_token: String,
    expires_at: DateTime<Utc>,
    /// Set when the broker reports the refresh credential revoked.
    relink_required: bool,
}

/// Owns the OAuth credential pair for one brokerage account.
pub struct SessionManager {
    config: SessionConfig,
    http: reqwest::Client,
    state: RwLock<SessionState>,
    /// Serializes the refresh path only; reads of a still-valid
    /// credential never touch this gate.
    refresh_gate: Mutex<()>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("base_url", &self.config.base_url)
            .field("account_number", &self.config.account_number)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Creates a session manager seeded with a stored refresh credential.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: SessionConfig, refresh_token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(CLIENT_PRODUCT)
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TastyError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            http,
            state: RwLock::new(SessionState {
                access_token: None,
                refresh_token: refresh_token.into(),
                expires_at: Utc::now(),
                relink_required: false,
            }),
            refresh_gate: Mutex::new(()),
        })
    }

    /// Returns the linked account number.
    #[must_use]
    pub fn account_number(&self) -> &str {
        &self.config.account_number
    }

    /// Returns the current refresh credential (for persistence).
    #[must_use]
    pub fn refresh_token(&self) -> String {
        self.state.read().refresh_token.clone()
    }

    /// Returns a valid access credential, refreshing if necessary.
    ///
    /// At most one refresh exchange is in flight at a time; concurrent
    /// callers wait on the gate and pick up the refreshed credential.
    ///
    /// # Errors
    /// Returns [`TastyError::ReconnectRequired`] if the refresh
    /// credential was revoked, or a network error if the exchange fails.
    pub async fn access_token(&self) -> Result<String> {
        if let Some(token) = self.cached_token()? {
            return Ok(token);
        }

        let _gate = self.refresh_gate.lock().await;

        // Another caller may have finished the refresh while we waited.
        if let Some(token) = self.cached_token()? {
            return Ok(token);
        }

        self.refresh().await
    }

    /// Marks the access credential expired so the next call refreshes.
    ///
    /// Called by the REST client when the broker answers 401 for a
    /// credential we believed valid.
    pub fn invalidate(&self) {
        let mut state = self.state.write();
        state.access_token = None;
        tracing::debug!("Access credential invalidated by unauthorized response");
    }

    /// Exchanges an authorization code for an initial credential pair,
    /// linking (or relinking) the account.
    ///
    /// # Errors
    /// Returns error if the exchange fails.
    pub async fn link_with_authorization_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<()> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", &self.config.client_id),
            ("client_secret", self.config.client_secret.expose_secret()),
        ];

        let grant = self.post_token(&params).await?;
        let mut state = self.state.write();
        state.expires_at = Utc::now() + Duration::seconds(grant.expires_in);
        state.access_token = Some(grant.access_token);
        if let Some(rotated) = grant.refresh_token {
            state.refresh_token = rotated;
        }
        state.relink_required = false;
        tracing::info!(account = %self.config.account_number, "Broker account linked");
        Ok(())
    }

    /// Returns the cached credential when it is still valid.
    fn cached_token(&self) -> Result<Option<String>> {
        let state = self.state.read();
        if state.relink_required {
            return Err(TastyError::ReconnectRequired(
                "refresh credential was revoked".to_string(),
            ));
        }

        let margin = Duration::seconds(self.config.expiry_margin_secs);
        match &state.access_token {
            Some(token) if Utc::now() + margin < state.expires_at => Ok(Some(token.clone())),
            _ => Ok(None),
        }
    }

    /// Performs the refresh exchange, retrying once on a transient
    /// network failure. `invalid_grant` is terminal and never retried.
    async fn refresh(&self) -> Result<String> {
        let refresh_token = self.state.read().refresh_token.clone();

        match self.exchange_refresh(&refresh_token).await {
            Ok(token) => Ok(token),
            Err(e) if e.is_transient() => {
                tracing::warn!(error = %e, "Token refresh failed, retrying once");
                self.exchange_refresh(&refresh_token).await
            }
            Err(e) => Err(e),
        }
    }

    async fn exchange_refresh(&self, refresh_token: &str) -> Result<String> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.config.client_id),
            ("client_secret", self.config.client_secret.expose_secret()),
        ];

        let grant = self.post_token(&params).await?;

        let mut state = self.state.write();
        state.expires_at = Utc::now() + Duration::seconds(grant.expires_in);
        state.access_token = Some(grant.access_token.clone());
        // The broker may rotate the refresh credential; the old one is
        // only replaced, never dropped without a successor.
        if let Some(rotated) = grant.refresh_token {
            state.refresh_token = rotated;
        }

        tracing::info!(
            account = %self.config.account_number,
            expires_at = %state.expires_at,
            "Access credential refreshed"
        );
        Ok(grant.access_token)
    }

    async fn post_token(&self, params: &[(&str, &str)]) -> Result<TokenGrant> {
        let url = format!("{}{}", self.config.base_url, TOKEN_PATH);
        let response = self.http.post(&url).form(params).send().await?;
        let status = response.status();

        if status.is_success() {
            let text = response.text().await?;
            return serde_json::from_str(&text).map_err(|e| {
                TastyError::Transport(format!("token endpoint returned non-token body: {e}"))
            });
        }

        let text = response.text().await.unwrap_or_default();
        if let Ok(body) = serde_json::from_str::<TokenErrorBody>(&text) {
            if body.error == "invalid_grant" {
                self.state.write().relink_required = true;
                let detail = body
                    .error_description
                    .unwrap_or_else(|| "refresh credential rejected".to_string());
                tracing::error!(
                    account = %self.config.account_number,
                    "Refresh credential revoked; user must relink"
                );
                return Err(TastyError::ReconnectRequired(detail));
            }
            return Err(TastyError::api_with_code(status.as_u16(), body.error, text));
        }

        Err(TastyError::api(status.as_u16(), text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str) -> SessionConfig {
        SessionConfig::new(
            base_url,
            "client-id",
            SecretString::from("client-secret"),
            "5WT00001",
        )
    }

    fn grant_body(access: &str, refresh: Option<&str>) -> serde_json::Value {
        match refresh {
            Some(r) => serde_json::json!({
                "access_token": access,
                "refresh_token": r,
                "expires_in": 900
            }),
            None => serde_json::json!({
                "access_token": access,
                "expires_in": 900
            }),
        }
    }

    // ==================== Refresh Tests ====================

    #[tokio::test]
    async fn test_access_token_refreshes_then_caches() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(grant_body("tok-1", None)))
            .expect(1)
            .mount(&server)
            .await;

        let session = SessionManager::new(config(&server.uri()), "refresh-1").unwrap();

        let first = session.access_token().await.unwrap();
        let second = session.access_token().await.unwrap();
        assert_eq!(first, "tok-1");
        assert_eq!(second, "tok-1");
    }

    #[tokio::test]
    async fn test_concurrent_callers_coalesce_to_one_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(grant_body("tok-1", None))
                    .set_delay(std::time::Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let session = SessionManager::new(config(&server.uri()), "refresh-1").unwrap();

        let (a, b) = tokio::join!(session.access_token(), session.access_token());
        assert_eq!(a.unwrap(), "tok-1");
        assert_eq!(b.unwrap(), "tok-1");
    }

    #[tokio::test]
    async fn test_rotated_refresh_token_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(grant_body("tok-1", Some("refresh-2"))),
            )
            .mount(&server)
            .await;

        let session = SessionManager::new(config(&server.uri()), "refresh-1").unwrap();
        session.access_token().await.unwrap();
        assert_eq!(session.refresh_token(), "refresh-2");
    }

    #[tokio::test]
    async fn test_missing_rotation_keeps_old_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(grant_body("tok-1", None)))
            .mount(&server)
            .await;

        let session = SessionManager::new(config(&server.uri()), "refresh-1").unwrap();
        session.access_token().await.unwrap();
        assert_eq!(session.refresh_token(), "refresh-1");
    }

    // ==================== Failure Tests ====================

    #[tokio::test]
    async fn test_invalid_grant_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Token has been revoked"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = SessionManager::new(config(&server.uri()), "revoked").unwrap();

        let err = session.access_token().await.unwrap_err();
        assert!(err.requires_relink());

        // No further refresh attempts: still one request total.
        let err = session.access_token().await.unwrap_err();
        assert!(err.requires_relink());
    }

    #[tokio::test]
    async fn test_transient_failure_retried_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(grant_body("tok-2", None)))
            .mount(&server)
            .await;

        let session = SessionManager::new(config(&server.uri()), "refresh-1").unwrap();
        assert_eq!(session.access_token().await.unwrap(), "tok-2");
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(grant_body("tok-1", None)))
            .expect(2)
            .mount(&server)
            .await;

        let session = SessionManager::new(config(&server.uri()), "refresh-1").unwrap();
        session.access_token().await.unwrap();
        session.invalidate();
        session.access_token().await.unwrap();
    }

    #[tokio::test]
    async fn test_non_json_token_body_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy error</html>"))
            .mount(&server)
            .await;

        let session = SessionManager::new(config(&server.uri()), "refresh-1").unwrap();
        let err = session.access_token().await.unwrap_err();
        assert!(matches!(err, TastyError::Transport(_)));
    }
}
