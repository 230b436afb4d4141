//! Core types for the options autopilot.
//!
//! Shared domain vocabulary: signals and their lifecycle, risk profiles,
//! account snapshots, and configuration loading. Everything money-valued
//! uses `rust_decimal::Decimal`.

pub mod account;
pub mod config;
pub mod config_loader;
pub mod risk;
pub mod signal;

pub use account::AccountSnapshot;
pub use config::{AppConfig, BrokerConfig, EngineConfig, TransportConfig};
pub use config_loader::ConfigLoader;
pub use risk::{RiskLevel, RiskProfile};
pub use signal::{Direction, OptionRight, Signal, SignalStatus, StrategyTag};
