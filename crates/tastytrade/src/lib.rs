//! tastytrade brokerage adapter for the options autopilot.
//!
//! This crate provides:
//! - OAuth session management with coalesced, transparent token refresh
//! - Canonical OCC option symbol encoding/decoding
//! - REST client with rate limiting and typed error classification
//! - Live quote fetch and defensible limit-price computation
//! - Multi-leg order construction and submission with a friendly
//!   rejection taxonomy
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use secrecy::SecretString;
//! use thetapilot_tastytrade::{
//!     orders, SessionConfig, SessionManager, TastyClient, TastyClientConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let session = Arc::new(SessionManager::new(
//!         SessionConfig::new(
//!             "https://api.tastyworks.com",
//!             "client-id",
//!             SecretString::from(std::env::var("TASTY_CLIENT_SECRET")?),
//!             "5WT00001",
//!         ),
//!         std::env::var("TASTY_REFRESH_TOKEN")?,
//!     )?);
//!
//!     let client = TastyClient::new(TastyClientConfig::default(), session)?;
//!     let legs = client.get_positions("5WT00001").await?;
//!     println!("{} option legs", legs.len());
//!     Ok(())
//! }
//! ```
//!
//! # Authentication
//!
//! The broker uses OAuth refresh tokens. The session manager never
//! returns an expired access credential and coalesces concurrent
//! refreshes into one token exchange. A revoked refresh credential
//! surfaces as [`TastyError::ReconnectRequired`] and halts execution
//! until the user relinks the account.

pub mod client;
pub mod error;
pub mod orders;
pub mod quotes;
pub mod session;
pub mod symbol;

pub use client::{Balances, TastyClient, TastyClientConfig, TASTY_CERT_URL, TASTY_PROD_URL};
pub use error::{OrderRejection, Result, TastyError};
pub use orders::{
    build_close_order, build_open_order, submit_order, OrderAction, OrderLeg, OrderReceipt,
    OrderRequest, OrderType, PriceEffect, TimeInForce,
};
pub use quotes::{credit_limit_price, net_limit_price, OptionQuote};
pub use session::{SessionConfig, SessionManager, CLIENT_PRODUCT};
