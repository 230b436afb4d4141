//! Signal delivery: supervised websocket push plus periodic REST pull.
//!
//! The push consumer is a supervised task that reconnects with
//! exponential backoff and re-subscribes; delivered events go onto a
//! bounded channel consumed by the engine, decoupling delivery cadence
//! from processing. Duplicate delivery of the same identity over either
//! path is a normal condition, reconciled by the signal book's
//! de-duplication set.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use thetapilot_core::{Signal, StrategyTag};

/// Wire envelope delivered by the push transport.
#[derive(Debug, Deserialize)]
pub struct SignalEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    /// Strategy-family hint only; the payload's own tag wins when known.
    #[serde(default)]
    pub channel: Option<String>,
    pub data: Signal,
}

impl SignalEnvelope {
    /// Extracts the signal, adopting the channel as a strategy hint when
    /// the payload's own tag was not recognized.
    #[must_use]
    pub fn into_signal(self) -> Signal {
        let mut signal = self.data;
        if signal.strategy.is_unknown() {
            if let Some(channel) = &self.channel {
                let hint = StrategyTag::from_wire(channel);
                if !hint.is_unknown() {
                    tracing::debug!(
                        channel = %channel,
                        "Adopted channel as strategy hint for unknown tag"
                    );
                    signal.strategy = hint;
                }
            }
        }
        signal
    }
}

// =============================================================================
// Push Transport
// =============================================================================

/// Supervised websocket consumer for pushed signal events.
pub struct PushTransport {
    url: String,
    tx: mpsc::Sender<Signal>,
    base_backoff: Duration,
    max_backoff: Duration,
}

impl PushTransport {
    /// Creates a push transport feeding the given ingest channel.
    #[must_use]
    pub fn new(url: impl Into<String>, tx: mpsc::Sender<Signal>) -> Self {
        Self {
            url: url.into(),
            tx,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }

    /// Sets reconnection backoff bounds.
    #[must_use]
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_backoff = base;
        self.max_backoff = max;
        self
    }

    /// Runs forever, reconnecting with exponential backoff. Returns only
    /// if the ingest channel closes.
    pub async fn run(self) {
        let mut backoff = self.base_backoff;

        loop {
            let connected_at = tokio::time::Instant::now();
            match self.consume_stream().await {
                Ok(()) => {
                    tracing::info!(url = %self.url, "Signal stream closed, reconnecting");
                }
                Err(e) => {
                    if self.tx.is_closed() {
                        tracing::info!("Ingest channel closed, stopping push transport");
                        return;
                    }
                    tracing::warn!(url = %self.url, error = %e, "Signal stream error");
                }
            }

            // A connection that lived a while earns a fresh backoff.
            if connected_at.elapsed() > Duration::from_secs(60) {
                backoff = self.base_backoff;
            }

            tracing::info!(delay_secs = backoff.as_secs(), "Reconnecting to signal stream");
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.max_backoff);
        }
    }

    async fn consume_stream(&self) -> Result<()> {
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .with_context(|| format!("connecting to {}", self.url))?;
        tracing::info!(url = %self.url, "Connected to signal stream");

        let (mut write, mut read) = stream.split();

        while let Some(message) = read.next().await {
            match message? {
                Message::Text(text) => self.handle_text(&text).await?,
                Message::Ping(payload) => write.send(Message::Pong(payload)).await?,
                Message::Close(_) => return Ok(()),
                _ => {}
            }
        }

        Ok(())
    }

    async fn handle_text(&self, text: &str) -> Result<()> {
        let envelope: SignalEnvelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring non-signal frame");
                return Ok(());
            }
        };
        if envelope.kind != "signal" {
            return Ok(());
        }

        self.tx
            .send(envelope.into_signal())
            .await
            .map_err(|_| anyhow!("ingest channel closed"))
    }
}

// =============================================================================
// REST Pull
// =============================================================================

#[derive(Debug, Deserialize)]
struct SignalsPage {
    signals: Vec<Signal>,
}

/// Periodic REST pull of `{"signals": [...]}`, reconciled against the
/// same de-duplication set as the push path.
pub struct RestPoller {
    url: String,
    interval: Duration,
    tx: mpsc::Sender<Signal>,
    http: reqwest::Client,
}

impl RestPoller {
    /// Creates a poller feeding the given ingest channel.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, interval: Duration, tx: mpsc::Sender<Signal>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("building signal poll client")?;
        Ok(Self {
            url: url.into(),
            interval,
            tx,
            http,
        })
    }

    /// Runs forever; pull errors are logged and the next tick retries.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.poll_once().await {
                if self.tx.is_closed() {
                    tracing::info!("Ingest channel closed, stopping signal poller");
                    return;
                }
                tracing::warn!(url = %self.url, error = %e, "Signal poll failed");
            }
        }
    }

    /// One pull of the query endpoint.
    ///
    /// # Errors
    /// Returns error if the request fails or the payload is malformed.
    pub async fn poll_once(&self) -> Result<()> {
        let page: SignalsPage = self
            .http
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let count = page.signals.len();
        for signal in page.signals {
            self.tx
                .send(signal)
                .await
                .map_err(|_| anyhow!("ingest channel closed"))?;
        }
        tracing::debug!(count, "Pulled signals from query endpoint");
        Ok(())
    }
}
