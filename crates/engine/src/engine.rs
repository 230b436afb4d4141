//! Engine wiring: periodic tasks plus the ingest loop.
//!
//! One decision-making process, a handful of independent periodic tasks
//! (expiry sweep, account/position refresh) and asynchronously arriving
//! push events. The refresh task owns the [`RiskContext`] and injects it
//! into evaluations; nothing reads account state from ambient globals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use secrecy::SecretString;
use tokio::sync::mpsc;

use thetapilot_core::{AccountSnapshot, AppConfig, SignalStatus};
use thetapilot_portfolio::reconstruct;
use thetapilot_tastytrade::{SessionConfig, SessionManager, TastyClient, TastyClientConfig};

use crate::executor;
use crate::journal::Journal;
use crate::lifecycle::SignalBook;
use crate::risk::{RiskContext, RiskGate};
use crate::transport::{PushTransport, RestPoller};

/// Bound on the ingest channel between transports and the engine.
const INGEST_QUEUE: usize = 256;

/// The autopilot engine: owns the signal book, risk gate, broker client,
/// and the scheduler tasks around them.
pub struct Engine {
    config: AppConfig,
    book: Arc<Mutex<SignalBook>>,
    gate: Arc<RiskGate>,
    client: Arc<TastyClient>,
    ctx: Arc<RwLock<Option<RiskContext>>>,
    halted: Arc<AtomicBool>,
}

impl Engine {
    /// Builds an engine from configuration, restoring the signal book
    /// from its journal.
    ///
    /// # Errors
    /// Returns error if the broker client or journal cannot be set up.
    pub fn new(config: AppConfig) -> Result<Self> {
        let session = SessionManager::new(
            SessionConfig::new(
                config.broker.base_url.clone(),
                config.broker.client_id.clone(),
                SecretString::from(config.broker.client_secret.clone()),
                config.broker.account_number.clone(),
            ),
            config.broker.refresh_token.clone(),
        )
        .context("building broker session")?;

        let client = TastyClient::new(
            TastyClientConfig::default().with_base_url(config.broker.base_url.clone()),
            Arc::new(session),
        )
        .context("building broker client")?;

        let journal =
            Journal::open(&config.engine.journal_path).context("opening signal journal")?;
        let book = SignalBook::restore(journal).context("restoring signal book")?;

        // A snapshot that survived several refresh intervals is stale;
        // the gate then fails closed rather than deciding on old data.
        let max_snapshot_age =
            chrono::Duration::seconds((config.engine.account_refresh_secs * 4) as i64);
        let gate = RiskGate::new(config.engine.risk_level, max_snapshot_age);

        Ok(Self {
            book: Arc::new(Mutex::new(book)),
            gate: Arc::new(gate),
            client: Arc::new(client),
            ctx: Arc::new(RwLock::new(None)),
            halted: Arc::new(AtomicBool::new(false)),
            config,
        })
    }

    /// Runs the engine until every signal source closes.
    ///
    /// # Errors
    /// Returns error if a transport cannot be constructed.
    pub async fn run(self) -> Result<()> {
        tracing::info!(
            account = %self.config.broker.account_number,
            risk_level = %self.config.engine.risk_level,
            "Engine starting"
        );

        let (tx, mut rx) = mpsc::channel(INGEST_QUEUE);

        if !self.config.transport.ws_url.is_empty() {
            let push = PushTransport::new(self.config.transport.ws_url.clone(), tx.clone());
            tokio::spawn(push.run());
        }
        if let Some(pull_url) = &self.config.transport.pull_url {
            let poller = RestPoller::new(
                pull_url.clone(),
                Duration::from_secs(self.config.transport.pull_interval_secs),
                tx.clone(),
            )
            .context("building signal poller")?;
            tokio::spawn(poller.run());
        }
        drop(tx);

        self.spawn_refresh_task();
        self.spawn_sweep_task();

        while let Some(signal) = rx.recv().await {
            self.dispatch(signal);
        }

        tracing::info!("All signal sources closed, engine stopping");
        Ok(())
    }

    /// Ingests one signal and, if its identity is fresh, dispatches the
    /// evaluation task. The de-duplication claim happens under the book
    /// lock, before any suspension point.
    fn dispatch(&self, signal: thetapilot_core::Signal) {
        let claimed = {
            let mut book = self.book.lock();
            let (id, _) = book.submit(signal);
            if book.begin_evaluation(&id) {
                book.get(&id)
            } else {
                None
            }
        };

        let Some(signal) = claimed else {
            return;
        };

        if self.halted.load(Ordering::SeqCst) {
            tracing::warn!(signal_id = %signal.id, "Execution halted, tracking signal only");
            self.book.lock().mark_status(
                &signal.id,
                SignalStatus::Tracked,
                Some("execution halted: broker reconnect required".to_string()),
            );
            return;
        }

        let ctx = self.ctx.read().clone();
        tokio::spawn(executor::run_signal(
            Arc::clone(&self.book),
            Arc::clone(&self.gate),
            Arc::clone(&self.client),
            ctx,
            Arc::clone(&self.halted),
            signal,
        ));
    }

    /// Account/position refresh: rebuilds the injected [`RiskContext`]
    /// on a fixed interval. A fresh reconstruction supersedes the gate's
    /// in-memory reservations.
    fn spawn_refresh_task(&self) {
        let client = Arc::clone(&self.client);
        let ctx = Arc::clone(&self.ctx);
        let gate = Arc::clone(&self.gate);
        let account = self.config.broker.account_number.clone();
        let period = Duration::from_secs(self.config.engine.account_refresh_secs);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                match refresh_context(&client, &account).await {
                    Ok(fresh) => {
                        *ctx.write() = Some(fresh);
                        gate.clear_reservations();
                    }
                    Err(e) => {
                        // The old snapshot goes stale on its own and the
                        // gate fails closed; nothing to unwind here.
                        tracing::error!(error = %e, "Account refresh failed");
                    }
                }
            }
        });
    }

    /// Expiry sweep and retention eviction.
    fn spawn_sweep_task(&self) {
        let book = Arc::clone(&self.book);
        let period = Duration::from_secs(self.config.engine.expiry_sweep_secs);
        let retention = chrono::Duration::hours(self.config.engine.retention_hours);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let now = Utc::now();
                let (expired, evicted) = {
                    let mut book = book.lock();
                    (book.sweep_expired(now), book.evict_terminal(now, retention))
                };
                if expired > 0 || evicted > 0 {
                    tracing::debug!(expired, evicted, "Sweep pass complete");
                }
            }
        });
    }
}

/// Fetches balances and positions and folds them into a fresh context.
pub(crate) async fn refresh_context(
    client: &TastyClient,
    account: &str,
) -> thetapilot_tastytrade::Result<RiskContext> {
    let legs = client.get_positions(account).await?;
    let balances = client.get_balances(account).await?;
    let structures = reconstruct(&legs);

    tracing::debug!(
        legs = legs.len(),
        structures = structures.len(),
        buying_power = %balances.buying_power,
        "Refreshed account context"
    );

    let snapshot = AccountSnapshot {
        buying_power: balances.buying_power,
        net_liquidating_value: balances.net_liquidating_value,
        cash_balance: balances.cash_balance,
        open_position_count: legs.len(),
        as_of: Utc::now(),
    };
    Ok(RiskContext::from_parts(snapshot, &structures))
}
