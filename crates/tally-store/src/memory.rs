//! In-memory storage implementation.
//!
//! The default backend. One mutex guards all tables, which makes every
//! compound operation (ledger posting, coupon redemption, trial consumption)
//! atomic by construction: the balance read, the transaction insert, and the
//! balance write all happen under the same lock acquisition.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};

use tally_core::{
    BillingEvent, Coupon, CreditBalance, CreditTransaction, FraudAlert, LedgerError,
    PaymentAttempt, PaymentStats, Related, Subscription, SubscriptionId, TransactionId,
    TransactionType, Trial, TrialStatus, UserId,
};

use crate::error::{Result, StoreError};
use crate::Store;

#[derive(Default)]
struct Inner {
    events: HashMap<String, BillingEvent>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
    balances: HashMap<UserId, CreditBalance>,
    transactions: HashMap<TransactionId, CreditTransaction>,
    user_transactions: HashMap<UserId, Vec<TransactionId>>,
    postings: HashSet<String>,
    trials: HashMap<UserId, Trial>,
    coupons: HashMap<String, Coupon>,
    attempts: HashMap<UserId, Vec<PaymentAttempt>>,
    alerts: Vec<FraudAlert>,
}

/// In-memory store backed by a single mutex.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means another thread panicked mid-operation;
        // the tables themselves are still structurally valid.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_amount(amount: i64) -> Result<()> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(format!(
                "amount must be positive, got {amount}"
            ))
            .into());
        }
        Ok(())
    }

    fn check_dedup(inner: &Inner, user_id: &UserId, related: Option<&Related>) -> Result<()> {
        if let Some(related) = related {
            if inner.postings.contains(&related.dedup_key(user_id)) {
                return Err(LedgerError::DuplicatePosting {
                    related_type: related.related_type.clone(),
                    related_id: related.related_id.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn insert_transaction(inner: &mut Inner, tx: &CreditTransaction) {
        let balance = inner
            .balances
            .entry(tx.user_id)
            .or_insert_with(|| CreditBalance::zero(tx.user_id));
        balance.current_balance = tx.balance_after;
        if tx.amount >= 0 {
            balance.total_earned += tx.amount;
        } else {
            balance.total_spent += -tx.amount;
        }
        balance.updated_at = tx.created_at;

        if let Some(key) = tx.dedup_key() {
            inner.postings.insert(key);
        }
        inner.transactions.insert(tx.id, tx.clone());
        inner
            .user_transactions
            .entry(tx.user_id)
            .or_default()
            .push(tx.id);
    }
}

impl Store for MemoryStore {
    // =========================================================================
    // Billing Event Operations
    // =========================================================================

    fn put_event(&self, event: &BillingEvent) -> Result<()> {
        self.locked().events.insert(event.id.clone(), event.clone());
        Ok(())
    }

    fn get_event(&self, event_id: &str) -> Result<Option<BillingEvent>> {
        Ok(self.locked().events.get(event_id).cloned())
    }

    fn mark_event_processed(&self, event_id: &str) -> Result<()> {
        let mut inner = self.locked();
        let event = inner.events.get_mut(event_id).ok_or(StoreError::NotFound {
            entity: "billing event",
            id: event_id.to_string(),
        })?;
        event.processed = true;
        event.error = None;
        Ok(())
    }

    fn record_event_error(&self, event_id: &str, error: &str) -> Result<()> {
        let mut inner = self.locked();
        let event = inner.events.get_mut(event_id).ok_or(StoreError::NotFound {
            entity: "billing event",
            id: event_id.to_string(),
        })?;
        event.processed = false;
        event.error = Some(error.to_string());
        Ok(())
    }

    // =========================================================================
    // Subscription Operations
    // =========================================================================

    fn upsert_subscription(&self, subscription: &Subscription) -> Result<()> {
        self.locked()
            .subscriptions
            .insert(subscription.id.clone(), subscription.clone());
        Ok(())
    }

    fn get_subscription(&self, id: &SubscriptionId) -> Result<Option<Subscription>> {
        Ok(self.locked().subscriptions.get(id).cloned())
    }

    // =========================================================================
    // Credit Ledger Operations
    // =========================================================================

    fn get_balance(&self, user_id: &UserId) -> Result<CreditBalance> {
        Ok(self
            .locked()
            .balances
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| CreditBalance::zero(*user_id)))
    }

    fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        let inner = self.locked();
        let Some(ids) = inner.user_transactions.get(user_id) else {
            return Ok(Vec::new());
        };

        // Insertion order is chronological; newest first for the API.
        Ok(ids
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .filter_map(|id| inner.transactions.get(id).cloned())
            .collect())
    }

    fn credit(
        &self,
        user_id: &UserId,
        amount: i64,
        tx_type: TransactionType,
        related: Option<Related>,
        description: &str,
    ) -> Result<CreditTransaction> {
        Self::check_amount(amount)?;

        let mut inner = self.locked();
        Self::check_dedup(&inner, user_id, related.as_ref())?;

        let balance_before = inner
            .balances
            .get(user_id)
            .map_or(0, |b| b.current_balance);
        let tx = CreditTransaction::credit(
            *user_id,
            tx_type,
            amount,
            balance_before,
            related,
            description,
        );
        Self::insert_transaction(&mut inner, &tx);
        Ok(tx)
    }

    fn debit(
        &self,
        user_id: &UserId,
        amount: i64,
        tx_type: TransactionType,
        related: Option<Related>,
        description: &str,
    ) -> Result<CreditTransaction> {
        Self::check_amount(amount)?;

        let mut inner = self.locked();
        Self::check_dedup(&inner, user_id, related.as_ref())?;

        let balance_before = inner
            .balances
            .get(user_id)
            .map_or(0, |b| b.current_balance);
        if balance_before < amount {
            return Err(LedgerError::InsufficientBalance {
                balance: balance_before,
                required: amount,
            }
            .into());
        }

        let tx = CreditTransaction::debit(
            *user_id,
            tx_type,
            amount,
            balance_before,
            related,
            description,
        );
        Self::insert_transaction(&mut inner, &tx);
        Ok(tx)
    }

    // =========================================================================
    // Trial Operations
    // =========================================================================

    fn create_trial(&self, trial: &Trial) -> Result<()> {
        let mut inner = self.locked();
        if inner.trials.contains_key(&trial.user_id) {
            return Err(LedgerError::TrialAlreadyExists {
                user_id: trial.user_id.to_string(),
            }
            .into());
        }
        inner.trials.insert(trial.user_id, trial.clone());
        Ok(())
    }

    fn get_trial(&self, user_id: &UserId) -> Result<Option<Trial>> {
        Ok(self.locked().trials.get(user_id).cloned())
    }

    fn update_trial(&self, trial: &Trial) -> Result<()> {
        let mut inner = self.locked();
        if !inner.trials.contains_key(&trial.user_id) {
            return Err(StoreError::NotFound {
                entity: "trial",
                id: trial.user_id.to_string(),
            });
        }
        inner.trials.insert(trial.user_id, trial.clone());
        Ok(())
    }

    fn consume_trial_credits(&self, user_id: &UserId, amount: i64) -> Result<Trial> {
        Self::check_amount(amount)?;

        let mut inner = self.locked();
        let trial = inner
            .trials
            .get_mut(user_id)
            .ok_or(LedgerError::TrialNotFound {
                user_id: user_id.to_string(),
            })
            .map_err(StoreError::from)?;

        if !trial.can_consume(amount) {
            return Err(LedgerError::TrialCreditsExceeded {
                used: trial.credits_used,
                limit: trial.credits_limit,
                requested: amount,
            }
            .into());
        }
        trial.credits_used += amount;
        Ok(trial.clone())
    }

    fn release_trial_credits(&self, user_id: &UserId, amount: i64) -> Result<Trial> {
        Self::check_amount(amount)?;

        let mut inner = self.locked();
        let trial = inner
            .trials
            .get_mut(user_id)
            .ok_or(LedgerError::TrialNotFound {
                user_id: user_id.to_string(),
            })
            .map_err(StoreError::from)?;

        trial.credits_used = (trial.credits_used - amount).max(0);
        Ok(trial.clone())
    }

    fn expire_trials(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.locked();
        let mut expired = 0;
        for trial in inner.trials.values_mut() {
            if trial.status == TrialStatus::Active && trial.end_date < now {
                trial.status = TrialStatus::Expired;
                expired += 1;
            }
        }
        Ok(expired)
    }

    // =========================================================================
    // Coupon Operations
    // =========================================================================

    fn put_coupon(&self, coupon: &Coupon) -> Result<()> {
        self.locked()
            .coupons
            .insert(coupon.code.clone(), coupon.clone());
        Ok(())
    }

    fn get_coupon(&self, code: &str) -> Result<Option<Coupon>> {
        Ok(self.locked().coupons.get(code).cloned())
    }

    fn redeem_coupon(&self, code: &str, user_id: &UserId) -> Result<Coupon> {
        let mut inner = self.locked();
        let coupon = inner.coupons.get_mut(code).ok_or(StoreError::NotFound {
            entity: "coupon",
            id: code.to_string(),
        })?;

        // Checked and applied under the same lock: the atomic conditional
        // update that prevents two concurrent redemptions of a
        // near-exhausted coupon from both succeeding.
        if coupon.is_exhausted() {
            return Err(LedgerError::CouponExhausted.into());
        }
        if coupon.used_by.contains(user_id) {
            return Err(LedgerError::CouponAlreadyUsed.into());
        }
        coupon.current_uses += 1;
        coupon.used_by.insert(*user_id);
        Ok(coupon.clone())
    }

    // =========================================================================
    // Fraud Operations
    // =========================================================================

    fn record_payment_attempt(&self, attempt: &PaymentAttempt) -> Result<()> {
        self.locked()
            .attempts
            .entry(attempt.user_id)
            .or_default()
            .push(attempt.clone());
        Ok(())
    }

    fn payment_stats(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<PaymentStats> {
        let inner = self.locked();
        let Some(attempts) = inner.attempts.get(user_id) else {
            return Ok(PaymentStats::default());
        };

        let window_start = now - Duration::hours(24);
        let mut stats = PaymentStats::default();
        let mut succeeded_total = 0i64;
        let mut succeeded_count = 0i64;

        for attempt in attempts {
            if attempt.succeeded {
                succeeded_total += attempt.amount;
                succeeded_count += 1;
                if attempt.at >= window_start {
                    stats.succeeded_24h += 1;
                }
            } else if attempt.at >= window_start {
                stats.failed_24h += 1;
            }
        }
        if succeeded_count > 0 {
            stats.average_amount = Some(succeeded_total / succeeded_count);
        }
        Ok(stats)
    }

    fn put_alert(&self, alert: &FraudAlert) -> Result<()> {
        self.locked().alerts.push(alert.clone());
        Ok(())
    }

    fn list_pending_alerts(&self) -> Result<Vec<FraudAlert>> {
        Ok(self
            .locked()
            .alerts
            .iter()
            .filter(|a| a.status == tally_core::AlertStatus::Pending)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tally_core::EventType;

    #[test]
    fn event_lifecycle() {
        let store = MemoryStore::new();
        let event = BillingEvent::received(
            "evt_1",
            EventType::SubscriptionCreated,
            serde_json::json!({"id": "sub_1"}),
        );
        store.put_event(&event).unwrap();

        let stored = store.get_event("evt_1").unwrap().unwrap();
        assert!(!stored.processed);

        store.record_event_error("evt_1", "handler exploded").unwrap();
        let stored = store.get_event("evt_1").unwrap().unwrap();
        assert_eq!(stored.error.as_deref(), Some("handler exploded"));

        store.mark_event_processed("evt_1").unwrap();
        let stored = store.get_event("evt_1").unwrap().unwrap();
        assert!(stored.processed);
        assert!(stored.error.is_none());
    }

    #[test]
    fn credit_then_debit_keeps_running_sum() {
        let store = MemoryStore::new();
        let user = UserId::generate();

        let tx = store
            .credit(
                &user,
                100,
                TransactionType::TrialCredit,
                Some(Related::new("trial", "trial-1")),
                "Trial grant",
            )
            .unwrap();
        assert_eq!(tx.balance_after, 100);

        let tx = store
            .debit(&user, 30, TransactionType::UsageDebit, None, "Feature use")
            .unwrap();
        assert_eq!(tx.amount, -30);
        assert_eq!(tx.balance_before, 100);
        assert_eq!(tx.balance_after, 70);

        let balance = store.get_balance(&user).unwrap();
        assert_eq!(balance.current_balance, 70);
        assert_eq!(balance.total_earned, 100);
        assert_eq!(balance.total_spent, 30);

        // Replay of the same credit with the same dedup key must not post.
        let err = store
            .credit(
                &user,
                100,
                TransactionType::TrialCredit,
                Some(Related::new("trial", "trial-1")),
                "Trial grant",
            )
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Ledger(LedgerError::DuplicatePosting { .. })
        ));
        assert_eq!(store.get_balance(&user).unwrap().current_balance, 70);
    }

    #[test]
    fn debit_fails_closed_on_insufficient_balance() {
        let store = MemoryStore::new();
        let user = UserId::generate();
        store
            .credit(&user, 20, TransactionType::Bonus, None, "Welcome bonus")
            .unwrap();

        let err = store
            .debit(&user, 21, TransactionType::UsageDebit, None, "Too much")
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Ledger(LedgerError::InsufficientBalance {
                balance: 20,
                required: 21
            })
        ));
        // No partial state.
        assert_eq!(store.get_balance(&user).unwrap().current_balance, 20);
        assert_eq!(store.list_transactions(&user, 10, 0).unwrap().len(), 1);
    }

    #[test]
    fn rejects_non_positive_amounts() {
        let store = MemoryStore::new();
        let user = UserId::generate();
        for amount in [0, -5] {
            assert!(store
                .credit(&user, amount, TransactionType::Bonus, None, "nope")
                .is_err());
            assert!(store
                .debit(&user, amount, TransactionType::UsageDebit, None, "nope")
                .is_err());
        }
    }

    #[test]
    fn list_transactions_newest_first_with_pagination() {
        let store = MemoryStore::new();
        let user = UserId::generate();
        for i in 1..=3 {
            store
                .credit(&user, i * 10, TransactionType::Bonus, None, &format!("grant {i}"))
                .unwrap();
        }

        let all = store.list_transactions(&user, 10, 0).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].description, "grant 3");
        assert_eq!(all[2].description, "grant 1");

        let page = store.list_transactions(&user, 1, 1).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].description, "grant 2");
    }

    #[test]
    fn concurrent_postings_preserve_sum_invariant() {
        let store = Arc::new(MemoryStore::new());
        let user = UserId::generate();
        store
            .credit(&user, 1_000, TransactionType::Purchase, None, "Seed")
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for _ in 0..20 {
                    if i % 2 == 0 {
                        let _ = store.credit(&user, 7, TransactionType::Bonus, None, "c");
                    } else {
                        let _ = store.debit(&user, 5, TransactionType::UsageDebit, None, "d");
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let balance = store.get_balance(&user).unwrap();
        let sum: i64 = store
            .list_transactions(&user, usize::MAX, 0)
            .unwrap()
            .iter()
            .map(|tx| tx.amount)
            .sum();
        assert_eq!(balance.current_balance, sum);
        assert_eq!(
            balance.current_balance,
            balance.total_earned - balance.total_spent
        );
    }

    #[test]
    fn concurrent_debits_never_go_negative() {
        let store = Arc::new(MemoryStore::new());
        let user = UserId::generate();
        store
            .credit(&user, 100, TransactionType::Purchase, None, "Seed")
            .unwrap();

        // 40 concurrent debits of 10 against a balance of 100: exactly 10
        // can win.
        let mut handles = Vec::new();
        for _ in 0..40 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                store
                    .debit(&user, 10, TransactionType::UsageDebit, None, "race")
                    .is_ok()
            }));
        }
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(wins, 10);

        let balance = store.get_balance(&user).unwrap();
        assert_eq!(balance.current_balance, 0);
        assert_eq!(balance.total_spent, 100);
    }

    #[test]
    fn trial_singleton_and_consumption() {
        let store = MemoryStore::new();
        let user = UserId::generate();
        let trial = Trial::start(user, "pro", 14, 100);
        store.create_trial(&trial).unwrap();

        let err = store.create_trial(&Trial::start(user, "pro", 14, 999)).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Ledger(LedgerError::TrialAlreadyExists { .. })
        ));
        // The original row is untouched.
        let stored = store.get_trial(&user).unwrap().unwrap();
        assert_eq!(stored.credits_limit, 100);
        assert_eq!(stored.credits_used, 0);

        let updated = store.consume_trial_credits(&user, 60).unwrap();
        assert_eq!(updated.credits_used, 60);
        let err = store.consume_trial_credits(&user, 41).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Ledger(LedgerError::TrialCreditsExceeded { .. })
        ));
        assert_eq!(store.get_trial(&user).unwrap().unwrap().credits_used, 60);
    }

    #[test]
    fn release_returns_consumed_trial_credits() {
        let store = MemoryStore::new();
        let user = UserId::generate();
        store.create_trial(&Trial::start(user, "pro", 14, 100)).unwrap();
        store.consume_trial_credits(&user, 60).unwrap();

        let trial = store.release_trial_credits(&user, 20).unwrap();
        assert_eq!(trial.credits_used, 40);

        // Over-release clamps at zero instead of going negative.
        let trial = store.release_trial_credits(&user, 500).unwrap();
        assert_eq!(trial.credits_used, 0);

        assert!(matches!(
            store.release_trial_credits(&UserId::generate(), 10),
            Err(StoreError::Ledger(LedgerError::TrialNotFound { .. }))
        ));
        assert!(store.release_trial_credits(&user, 0).is_err());
    }

    #[test]
    fn expire_trials_is_idempotent() {
        let store = MemoryStore::new();
        let user = UserId::generate();
        let mut trial = Trial::start(user, "pro", 14, 100);
        trial.end_date = Utc::now() - Duration::days(1);
        store.create_trial(&trial).unwrap();

        assert_eq!(store.expire_trials(Utc::now()).unwrap(), 1);
        assert_eq!(store.expire_trials(Utc::now()).unwrap(), 0);
        assert_eq!(
            store.get_trial(&user).unwrap().unwrap().status,
            TrialStatus::Expired
        );
    }

    #[test]
    fn coupon_exhaustion_under_concurrency() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store
            .put_coupon(&Coupon {
                code: "ONCE".into(),
                coupon_type: tally_core::CouponType::FixedAmount,
                value: 500,
                valid_from: now - Duration::days(1),
                valid_to: now + Duration::days(1),
                max_uses: Some(1),
                current_uses: 0,
                used_by: std::collections::HashSet::new(),
                min_purchase_amount: None,
                is_active: true,
            })
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..2 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                let user = UserId::generate();
                store.redeem_coupon("ONCE", &user).is_ok()
            }));
        }
        let outcomes: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);

        let coupon = store.get_coupon("ONCE").unwrap().unwrap();
        assert_eq!(coupon.current_uses, 1);
        assert_eq!(coupon.used_by.len(), 1);
    }

    #[test]
    fn payment_stats_window() {
        let store = MemoryStore::new();
        let user = UserId::generate();
        let now = Utc::now();

        for (amount, succeeded, hours_ago) in
            [(100, true, 1), (200, true, 2), (50, false, 3), (300, true, 48)]
        {
            store
                .record_payment_attempt(&PaymentAttempt {
                    user_id: user,
                    amount,
                    succeeded,
                    at: now - Duration::hours(hours_ago),
                })
                .unwrap();
        }

        let stats = store.payment_stats(&user, now).unwrap();
        assert_eq!(stats.succeeded_24h, 2);
        assert_eq!(stats.failed_24h, 1);
        // Average over all successful history: (100 + 200 + 300) / 3.
        assert_eq!(stats.average_amount, Some(200));
    }
}
