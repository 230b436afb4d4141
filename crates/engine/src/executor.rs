//! Drives one signal from risk evaluation through order submission.
//!
//! The two-phase `Approved -> Executing` transition is deliberate: a
//! crash between intent and flight leaves recoverable state, and a user
//! rejection that lands in that window still wins. Once `Executing`, the
//! submission cannot be aborted and its outcome is always reconciled
//! into the signal. No lock is ever held across an await.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use thetapilot_core::{RiskProfile, Signal};
use thetapilot_tastytrade::{orders, TastyClient};

use crate::lifecycle::SignalBook;
use crate::risk::{RiskContext, RiskGate};

/// Evaluates and, on approval, executes one signal. Dispatched exactly
/// once per identity by the engine (guarded by the de-duplication set).
///
/// Sets `halted` when the broker session requires a relink; the engine
/// stops dispatching until the user reconnects.
pub async fn run_signal(
    book: Arc<Mutex<SignalBook>>,
    gate: Arc<RiskGate>,
    client: Arc<TastyClient>,
    ctx: Option<RiskContext>,
    halted: Arc<AtomicBool>,
    signal: Signal,
) {
    let id = signal.id.clone();
    let tag = signal.strategy.clone();

    let profile = RiskProfile::preset(&signal.strategy, gate.level());
    let decision = gate.evaluate(&signal, &profile, ctx.as_ref(), Utc::now());

    if !decision.approve {
        tracing::info!(
            signal_id = %id,
            strategy = %tag,
            reason = %decision.reason,
            "Risk gate denied signal"
        );
        book.lock()
            .mark_status(&id, thetapilot_core::SignalStatus::Tracked, Some(decision.reason));
        return;
    }

    tracing::info!(
        signal_id = %id,
        strategy = %tag,
        quantity = decision.quantity,
        "Risk gate approved signal"
    );
    book.lock().approve(&id, decision.quantity);

    // The user may have rejected between approval and here; once this
    // returns true the submission is committed.
    if !book.lock().begin_execution(&id) {
        tracing::info!(signal_id = %id, "Signal no longer approved, skipping execution");
        gate.release(&tag);
        return;
    }

    let account = client.session().account_number().to_string();
    let result = match orders::build_open_order(&client, &signal, decision.quantity).await {
        Ok(order) => orders::submit_order(&client, &account, &order).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(receipt) => {
            tracing::info!(signal_id = %id, order_id = %receipt.id, "Signal executed");
            book.lock().complete_execution(&id, receipt.id);
        }
        Err(e) => {
            if e.requires_relink() {
                tracing::error!(
                    signal_id = %id,
                    "Broker session requires relink; halting execution for this account"
                );
                halted.store(true, Ordering::SeqCst);
            }
            tracing::warn!(signal_id = %id, error = %e, "Order submission failed");
            book.lock().fail_execution(&id, e.to_string());
            gate.release(&tag);
        }
    }
}

/// Convenience wrapper used by tests and manual tooling: submits a
/// signal through the book and runs it if its identity is fresh.
pub async fn ingest_and_run(
    book: Arc<Mutex<SignalBook>>,
    gate: Arc<RiskGate>,
    client: Arc<TastyClient>,
    ctx: Option<RiskContext>,
    halted: Arc<AtomicBool>,
    signal: Signal,
) {
    let (id, _) = book.lock().submit(signal);
    let claimed = book.lock().begin_evaluation(&id);
    if !claimed {
        return;
    }
    if halted.load(Ordering::SeqCst) {
        book.lock().mark_status(
            &id,
            thetapilot_core::SignalStatus::Tracked,
            Some("execution halted: broker reconnect required".to_string()),
        );
        return;
    }
    let Some(current) = book.lock().get(&id) else {
        return;
    };
    run_signal(book, gate, client, ctx, halted, current).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use rust_decimal_macros::dec;
    use secrecy::SecretString;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use thetapilot_core::{AccountSnapshot, RiskLevel, SignalStatus, StrategyTag};
    use thetapilot_tastytrade::{SessionConfig, SessionManager, TastyClientConfig};

    fn signal(id: &str) -> Signal {
        Signal {
            id: id.to_string(),
            symbol: "TQQQ".to_string(),
            strategy: StrategyTag::PutCredit,
            direction: None,
            short_strike: Some(dec!(72)),
            long_strike: Some(dec!(68)),
            front_expiry: NaiveDate::from_ymd_opt(2026, 9, 18).unwrap(),
            back_expiry: None,
            est_price: Some(dec!(0.85)),
            max_loss: Some(dec!(4.15)),
            confidence: 82,
            capital_required: dec!(415),
            status: SignalStatus::Pending,
            quantity: None,
            created_at: Utc::now(),
            approved_at: None,
            executed_at: None,
            order_id: None,
            reason: None,
        }
    }

    fn context() -> RiskContext {
        RiskContext {
            snapshot: AccountSnapshot {
                buying_power: dec!(5000),
                net_liquidating_value: dec!(10000),
                cash_balance: dec!(4000),
                open_position_count: 0,
                as_of: Utc::now(),
            },
            open_structures: Default::default(),
        }
    }

    async fn client_for(server: &MockServer) -> Arc<TastyClient> {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok-1",
                "expires_in": 900
            })))
            .mount(server)
            .await;

        let session = SessionManager::new(
            SessionConfig::new(
                server.uri(),
                "client-id",
                SecretString::from("secret"),
                "5WT00001",
            ),
            "refresh-1",
        )
        .unwrap();

        Arc::new(
            TastyClient::new(
                TastyClientConfig::default().with_base_url(server.uri()),
                Arc::new(session),
            )
            .unwrap(),
        )
    }

    async fn mount_quotes(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/market-data/by-type"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "items": [
                    { "symbol": "TQQQ  260918P00072000", "bid": "1.20", "ask": "1.30" },
                    { "symbol": "TQQQ  260918P00068000", "bid": "0.35", "ask": "0.40" }
                ]}
            })))
            .mount(server)
            .await;
    }

    fn parts() -> (Arc<Mutex<SignalBook>>, Arc<RiskGate>, Arc<AtomicBool>) {
        (
            Arc::new(Mutex::new(SignalBook::new(None))),
            Arc::new(RiskGate::new(RiskLevel::Medium, Duration::seconds(120))),
            Arc::new(AtomicBool::new(false)),
        )
    }

    // ==================== No Double Execution ====================

    #[tokio::test]
    async fn test_duplicate_delivery_submits_one_order() {
        let server = MockServer::start().await;
        let client = client_for(&server).await;
        mount_quotes(&server).await;

        Mock::given(method("POST"))
            .and(path("/accounts/5WT00001/orders"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "data": { "order": { "id": 4211, "status": "Routed" } }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (book, gate, halted) = parts();

        // The same identity delivered twice, as a reconnect replay would.
        ingest_and_run(
            book.clone(),
            gate.clone(),
            client.clone(),
            Some(context()),
            halted.clone(),
            signal("dup"),
        )
        .await;
        ingest_and_run(
            book.clone(),
            gate.clone(),
            client.clone(),
            Some(context()),
            halted.clone(),
            signal("dup"),
        )
        .await;

        let book = book.lock();
        assert_eq!(book.status_of("dup"), Some(SignalStatus::Executed));
        assert_eq!(book.get("dup").unwrap().order_id.as_deref(), Some("4211"));
    }

    // ==================== Denial Path ====================

    #[tokio::test]
    async fn test_denied_signal_is_tracked_with_reason() {
        let server = MockServer::start().await;
        let client = client_for(&server).await;
        let (book, gate, halted) = parts();

        let mut low = signal("low");
        low.confidence = 10;
        ingest_and_run(book.clone(), gate, client, Some(context()), halted, low).await;

        let book = book.lock();
        assert_eq!(book.status_of("low"), Some(SignalStatus::Tracked));
        assert!(book.get("low").unwrap().reason.unwrap().contains("confidence"));
    }

    #[tokio::test]
    async fn test_missing_context_fails_closed() {
        let server = MockServer::start().await;
        let client = client_for(&server).await;
        let (book, gate, halted) = parts();

        ingest_and_run(book.clone(), gate, client, None, halted, signal("nc")).await;
        assert_eq!(book.lock().status_of("nc"), Some(SignalStatus::Tracked));
    }

    // ==================== Failure Path ====================

    #[tokio::test]
    async fn test_rejected_order_marks_failed_and_releases_slot() {
        let server = MockServer::start().await;
        let client = client_for(&server).await;
        mount_quotes(&server).await;

        Mock::given(method("POST"))
            .and(path("/accounts/5WT00001/orders"))
            .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
                "error": { "code": "margin_check_failed", "message": "not enough" }
            })))
            .mount(&server)
            .await;

        let (book, gate, halted) = parts();
        ingest_and_run(
            book.clone(),
            gate.clone(),
            client,
            Some(context()),
            halted,
            signal("rej"),
        )
        .await;

        let snapshot = book.lock().get("rej").unwrap();
        assert_eq!(snapshot.status, SignalStatus::Failed);
        assert!(snapshot.reason.unwrap().contains("insufficient buying power"));
        assert_eq!(gate.reserved(&StrategyTag::PutCredit), 0);
    }

    #[tokio::test]
    async fn test_halted_engine_tracks_instead_of_executing() {
        let server = MockServer::start().await;
        let client = client_for(&server).await;
        let (book, gate, halted) = parts();
        halted.store(true, Ordering::SeqCst);

        ingest_and_run(book.clone(), gate, client, Some(context()), halted, signal("h")).await;

        let snapshot = book.lock().get("h").unwrap();
        assert_eq!(snapshot.status, SignalStatus::Tracked);
        assert!(snapshot.reason.unwrap().contains("reconnect required"));
    }
}
