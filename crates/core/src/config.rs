use serde::{Deserialize, Serialize};

use crate::risk::RiskLevel;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub broker: BrokerConfig,
    pub transport: TransportConfig,
    pub engine: EngineConfig,
}

/// Brokerage OAuth and account settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub account_number: String,
}

/// Signal transport endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// WebSocket push endpoint.
    pub ws_url: String,
    /// REST pull endpoint returning `{"signals": [...]}`.
    pub pull_url: Option<String>,
    pub pull_interval_secs: u64,
}

/// Scheduler and lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub risk_level: RiskLevel,
    pub account_refresh_secs: u64,
    pub expiry_sweep_secs: u64,
    /// Hours a terminal signal stays in the active set before eviction.
    pub retention_hours: i64,
    /// Append-only JSONL journal of signal transitions.
    pub journal_path: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig {
                base_url: "https://api.tastyworks.com".to_string(),
                client_id: String::new(),
                client_secret: String::new(),
                refresh_token: String::new(),
                account_number: String::new(),
            },
            transport: TransportConfig {
                ws_url: "wss://signals.thetapilot.io/stream".to_string(),
                pull_url: None,
                pull_interval_secs: 60,
            },
            engine: EngineConfig {
                risk_level: RiskLevel::Medium,
                account_refresh_secs: 30,
                expiry_sweep_secs: 60,
                retention_hours: 24,
                journal_path: "data/signals.jsonl".to_string(),
            },
        }
    }
}
