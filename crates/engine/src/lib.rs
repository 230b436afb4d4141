//! Decision engine for the options autopilot.
//!
//! Owns the signal lifecycle (identity, de-duplication, expiry), the
//! risk gate (approve/deny plus sizing with synchronous concurrency
//! reservation), the execution driver, the signal transports, and the
//! durable journal. One decision-making process; correctness under task
//! interleaving rather than shared-memory parallelism.

pub mod engine;
pub mod executor;
pub mod journal;
pub mod lifecycle;
pub mod risk;
pub mod transport;

pub use engine::Engine;
pub use journal::Journal;
pub use lifecycle::{market_close_utc, IngestOutcome, SignalBook};
pub use risk::{RiskContext, RiskDecision, RiskGate};
pub use transport::{PushTransport, RestPoller, SignalEnvelope};
