//! Signal lifecycle management.
//!
//! The [`SignalBook`] owns signal identity, status transitions, expiry,
//! and de-duplication. All of its methods are synchronous: the ingest
//! path must never block on network calls, and the de-duplication check
//! has to complete before any suspension point.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::America::New_York;

use thetapilot_core::{Signal, SignalStatus};

use crate::journal::Journal;

/// Hour (exchange-local) at which undecided signals expire.
const MARKET_CLOSE_HOUR: u32 = 16;

/// Outcome of an ingest call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// First sighting of this identity.
    Inserted,
    /// Duplicate delivery; late-arriving fields were merged.
    Merged,
}

/// The active signal set plus the processed-identity guard.
pub struct SignalBook {
    active: HashMap<String, Signal>,
    /// Identities that have entered the auto-approval path. Checked and
    /// updated before any side effect; this is what makes duplicate
    /// delivery (network retry, reconnect replay) a normal condition.
    processed: HashSet<String>,
    journal: Option<Journal>,
}

impl SignalBook {
    /// Creates an empty book, optionally journaling transitions.
    #[must_use]
    pub fn new(journal: Option<Journal>) -> Self {
        Self {
            active: HashMap::new(),
            processed: HashSet::new(),
            journal,
        }
    }

    /// Restores a book from its journal. Every journaled identity joins
    /// the processed set, so a restart can never re-execute a signal;
    /// non-terminal signals return to the active set for visibility.
    ///
    /// # Errors
    /// Returns error if the journal cannot be read.
    pub fn restore(journal: Journal) -> anyhow::Result<Self> {
        let replayed = journal.replay()?;
        let mut book = Self::new(Some(journal));

        for signal in replayed {
            book.processed.insert(signal.id.clone());
            if !signal.status.is_terminal() {
                book.active.insert(signal.id.clone(), signal);
            }
        }

        tracing::info!(
            active = book.active.len(),
            processed = book.processed.len(),
            "Signal book restored from journal"
        );
        Ok(book)
    }

    /// Idempotent upsert into the active set. A duplicate delivery
    /// merges late-arriving fields instead of duplicating the signal.
    ///
    /// Returns the (possibly freshly assigned) identity and the outcome.
    pub fn submit(&mut self, mut signal: Signal) -> (String, IngestOutcome) {
        signal.ensure_id();
        let id = signal.id.clone();

        if let Some(existing) = self.active.get_mut(&id) {
            existing.merge_from(&signal);
            self.journal_snapshot(&id);
            return (id, IngestOutcome::Merged);
        }

        self.journal_append(&signal);
        self.active.insert(id.clone(), signal);
        (id, IngestOutcome::Inserted)
    }

    /// Claims an identity for the auto-approval path. Returns true only
    /// the first time an identity is claimed; callers must not start
    /// evaluation when this returns false.
    pub fn begin_evaluation(&mut self, id: &str) -> bool {
        if self.processed.contains(id) {
            tracing::debug!(signal_id = %id, "Duplicate delivery ignored by de-duplication set");
            return false;
        }
        if !self.active.contains_key(id) {
            return false;
        }
        self.processed.insert(id.to_string());
        true
    }

    /// Pure status transition. Silently a no-op for unknown identities
    /// (late and duplicate events are expected), for signals already in
    /// a terminal state, and for attempts to cancel an in-flight
    /// execution.
    pub fn mark_status(&mut self, id: &str, status: SignalStatus, reason: Option<String>) {
        let Some(signal) = self.active.get_mut(id) else {
            return;
        };
        if signal.status.is_terminal() {
            return;
        }
        // An in-flight broker submission cannot be aborted; a late
        // rejection lands after the order is reconciled or not at all.
        if signal.status == SignalStatus::Executing
            && !matches!(status, SignalStatus::Executed | SignalStatus::Failed)
        {
            tracing::debug!(signal_id = %id, ?status, "Ignoring transition for in-flight signal");
            return;
        }

        signal.status = status;
        match status {
            SignalStatus::Approved => signal.approved_at = Some(Utc::now()),
            SignalStatus::Executed => signal.executed_at = Some(Utc::now()),
            _ => {}
        }
        if reason.is_some() {
            signal.reason = reason;
        }
        self.journal_snapshot(id);
    }

    /// Records the sized quantity and approval in one step.
    pub fn approve(&mut self, id: &str, quantity: u32) {
        if let Some(signal) = self.active.get_mut(id) {
            signal.quantity = Some(quantity);
        }
        self.mark_status(id, SignalStatus::Approved, None);
    }

    /// Transitions an approved signal to executing. Returns false if the
    /// signal is no longer approved (e.g., the user rejected it while
    /// evaluation was finishing), in which case execution must not start.
    pub fn begin_execution(&mut self, id: &str) -> bool {
        match self.active.get(id) {
            Some(signal) if signal.status == SignalStatus::Approved => {
                self.mark_status(id, SignalStatus::Executing, None);
                true
            }
            _ => false,
        }
    }

    /// Records a successful submission.
    pub fn complete_execution(&mut self, id: &str, order_id: String) {
        if let Some(signal) = self.active.get_mut(id) {
            signal.order_id = Some(order_id);
        }
        self.mark_status(id, SignalStatus::Executed, None);
    }

    /// Records a failed submission with its user-facing reason.
    pub fn fail_execution(&mut self, id: &str, reason: String) {
        self.mark_status(id, SignalStatus::Failed, Some(reason));
    }

    /// Returns a copy of a signal.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Signal> {
        self.active.get(id).cloned()
    }

    /// Returns the current status of a signal.
    #[must_use]
    pub fn status_of(&self, id: &str) -> Option<SignalStatus> {
        self.active.get(id).map(|s| s.status)
    }

    /// Number of signals in the active set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Returns true if the active set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Expires pending signals past their creation day's market close.
    /// Returns the number of signals transitioned.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<String> = self
            .active
            .values()
            .filter(|s| s.status.is_expirable() && now >= market_close_utc(s.created_at))
            .map(|s| s.id.clone())
            .collect();

        for id in &expired {
            tracing::info!(signal_id = %id, "Signal expired at market close");
            self.mark_status(
                id,
                SignalStatus::Expired,
                Some("expired undecided at market close".to_string()),
            );
        }
        expired.len()
    }

    /// Evicts terminal signals older than the retention window from
    /// active memory. The journal keeps them forever.
    pub fn evict_terminal(&mut self, now: DateTime<Utc>, retention: Duration) -> usize {
        let before = self.active.len();
        self.active
            .retain(|_, s| !(s.status.is_terminal() && now - s.created_at > retention));
        before - self.active.len()
    }

    fn journal_append(&self, signal: &Signal) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append(signal) {
                tracing::error!(error = %e, signal_id = %signal.id, "Journal append failed");
            }
        }
    }

    fn journal_snapshot(&self, id: &str) {
        if let Some(signal) = self.active.get(id) {
            self.journal_append(signal);
        }
    }
}

/// The market-close instant (16:00 exchange-local) of the calendar day a
/// signal was created, in UTC.
#[must_use]
pub fn market_close_utc(created_at: DateTime<Utc>) -> DateTime<Utc> {
    let local = created_at.with_timezone(&New_York);
    let close = local
        .date_naive()
        .and_hms_opt(MARKET_CLOSE_HOUR, 0, 0)
        .unwrap_or_else(|| local.naive_local());

    // 16:00 never falls inside a DST transition, so `single` resolves.
    match New_York.from_local_datetime(&close).single() {
        Some(instant) => instant.with_timezone(&Utc),
        None => created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use thetapilot_core::StrategyTag;

    fn signal(id: &str) -> Signal {
        Signal {
            id: id.to_string(),
            symbol: "TQQQ".to_string(),
            strategy: StrategyTag::PutCredit,
            direction: None,
            short_strike: Some(Decimal::from(72)),
            long_strike: Some(Decimal::from(68)),
            front_expiry: NaiveDate::from_ymd_opt(2026, 9, 18).unwrap(),
            back_expiry: None,
            est_price: None,
            max_loss: None,
            confidence: 82,
            capital_required: Decimal::from(415),
            status: SignalStatus::Pending,
            quantity: None,
            created_at: Utc::now(),
            approved_at: None,
            executed_at: None,
            order_id: None,
            reason: None,
        }
    }

    // ==================== De-duplication Tests ====================

    #[test]
    fn test_duplicate_delivery_claims_evaluation_once() {
        let mut book = SignalBook::new(None);

        let (id, outcome) = book.submit(signal("dup"));
        assert_eq!(outcome, IngestOutcome::Inserted);
        assert!(book.begin_evaluation(&id));

        // Second delivery of the same identity.
        let (id2, outcome) = book.submit(signal("dup"));
        assert_eq!(id2, id);
        assert_eq!(outcome, IngestOutcome::Merged);
        assert!(!book.begin_evaluation(&id));

        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_merge_fills_late_fields() {
        let mut book = SignalBook::new(None);
        let mut first = signal("m");
        first.est_price = None;
        book.submit(first);

        let mut late = signal("m");
        late.est_price = Some(Decimal::new(85, 2));
        book.submit(late);

        assert_eq!(book.get("m").unwrap().est_price, Some(Decimal::new(85, 2)));
    }

    #[test]
    fn test_ingest_assigns_identity_when_missing() {
        let mut book = SignalBook::new(None);
        let mut anonymous = signal("");
        anonymous.id = String::new();
        let (id, _) = book.submit(anonymous);
        assert!(!id.is_empty());
        assert!(book.get(&id).is_some());
    }

    // ==================== Transition Tests ====================

    #[test]
    fn test_mark_status_unknown_id_is_noop() {
        let mut book = SignalBook::new(None);
        book.mark_status("ghost", SignalStatus::Executed, None);
        assert!(book.is_empty());
    }

    #[test]
    fn test_late_rejection_of_in_flight_signal_is_noop() {
        let mut book = SignalBook::new(None);
        let (id, _) = book.submit(signal("x"));
        book.approve(&id, 1);
        assert!(book.begin_execution(&id));

        // User rejects while the submission is in flight.
        book.mark_status(&id, SignalStatus::Rejected, Some("user".to_string()));
        assert_eq!(book.status_of(&id), Some(SignalStatus::Executing));

        // The resulting order still reconciles into status.
        book.complete_execution(&id, "4211".to_string());
        assert_eq!(book.status_of(&id), Some(SignalStatus::Executed));
        assert_eq!(book.get(&id).unwrap().order_id.as_deref(), Some("4211"));
    }

    #[test]
    fn test_rejection_before_execution_blocks_it() {
        let mut book = SignalBook::new(None);
        let (id, _) = book.submit(signal("y"));
        book.approve(&id, 1);
        book.mark_status(&id, SignalStatus::Rejected, Some("user".to_string()));

        assert!(!book.begin_execution(&id));
        assert_eq!(book.status_of(&id), Some(SignalStatus::Rejected));
    }

    #[test]
    fn test_terminal_status_is_sticky() {
        let mut book = SignalBook::new(None);
        let (id, _) = book.submit(signal("t"));
        book.mark_status(&id, SignalStatus::Expired, None);
        book.mark_status(&id, SignalStatus::Approved, None);
        assert_eq!(book.status_of(&id), Some(SignalStatus::Expired));
    }

    // ==================== Expiry Tests ====================

    #[test]
    fn test_pending_signal_expires_exactly_at_close() {
        let mut book = SignalBook::new(None);

        // Created 15:59 exchange-local.
        let created = New_York
            .with_ymd_and_hms(2026, 8, 3, 15, 59, 0)
            .unwrap()
            .with_timezone(&Utc);
        let mut sig = signal("e");
        sig.created_at = created;
        book.submit(sig);

        let close = New_York
            .with_ymd_and_hms(2026, 8, 3, 16, 0, 0)
            .unwrap()
            .with_timezone(&Utc);

        // One second before close: still pending.
        assert_eq!(book.sweep_expired(close - Duration::seconds(1)), 0);
        assert_eq!(book.status_of("e"), Some(SignalStatus::Pending));

        // Exactly at close: boundary is inclusive.
        assert_eq!(book.sweep_expired(close), 1);
        assert_eq!(book.status_of("e"), Some(SignalStatus::Expired));
    }

    #[test]
    fn test_approved_signals_exempt_from_expiry() {
        let mut book = SignalBook::new(None);
        let created = New_York
            .with_ymd_and_hms(2026, 8, 3, 10, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let mut sig = signal("a");
        sig.created_at = created;
        book.submit(sig);
        book.approve("a", 1);

        let after_close = New_York
            .with_ymd_and_hms(2026, 8, 3, 17, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(book.sweep_expired(after_close), 0);
        assert_eq!(book.status_of("a"), Some(SignalStatus::Approved));
    }

    // ==================== Retention Tests ====================

    #[test]
    fn test_terminal_signals_evicted_after_retention() {
        let mut book = SignalBook::new(None);
        let mut old = signal("old");
        old.created_at = Utc::now() - Duration::hours(48);
        let (id, _) = book.submit(old);
        book.mark_status(&id, SignalStatus::Expired, None);

        book.submit(signal("fresh"));

        let evicted = book.evict_terminal(Utc::now(), Duration::hours(24));
        assert_eq!(evicted, 1);
        assert!(book.get("old").is_none());
        assert!(book.get("fresh").is_some());
    }

    // ==================== Restore Tests ====================

    #[test]
    fn test_restore_blocks_re_execution() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signals.jsonl");

        {
            let journal = crate::journal::Journal::open(&path).unwrap();
            let mut book = SignalBook::new(Some(journal));
            let (id, _) = book.submit(signal("r"));
            assert!(book.begin_evaluation(&id));
            book.approve(&id, 1);
        }

        let journal = crate::journal::Journal::open(&path).unwrap();
        let mut restored = SignalBook::restore(journal).unwrap();
        assert!(restored.get("r").is_some());
        // The identity was already claimed before the restart.
        assert!(!restored.begin_evaluation("r"));
    }
}
