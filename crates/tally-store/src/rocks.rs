//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.
//! Compound writes go through `WriteBatch` so a crash can never leave a
//! transaction row without its balance update. Read-modify-write cycles
//! (ledger postings, coupon redemption, trial consumption) are serialized by
//! a per-key lock map, since `RocksDB` itself only gives atomic writes, not
//! atomic read-check-write.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode, Options,
    WriteBatch,
};
use ulid::Ulid;

use tally_core::{
    BillingEvent, Coupon, CreditBalance, CreditTransaction, FraudAlert, LedgerError,
    PaymentAttempt, PaymentStats, Related, Subscription, SubscriptionId, TransactionType, Trial,
    TrialStatus, UserId,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::Store;

/// Per-key lock map serializing read-modify-write cycles.
///
/// Lock entries are never removed; the key space (active users, coupon codes)
/// is small relative to the data they guard.
#[derive(Default)]
struct KeyedLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    fn acquire(&self, key: &str) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(map.entry(key.to_string()).or_default())
    }
}

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<rocksdb::MultiThreaded>>,
    locks: KeyedLocks,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            locks: KeyedLocks::default(),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get_value<T: serde::de::DeserializeOwned>(
        &self,
        cf_name: &str,
        key: &[u8],
    ) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn put_value<T: serde::Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        let data = Self::serialize(value)?;
        self.db
            .put_cf(&cf, key, data)
            .map_err(|e| StoreError::Database(e.to_string()))
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

    fn posting_exists(&self, user_id: &UserId, related: &Related) -> Result<bool> {
        let cf = self.cf(cf::POSTINGS)?;
        let key = keys::posting_key(&related.dedup_key(user_id));
        Ok(self
            .db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some())
    }

    fn check_dedup(&self, user_id: &UserId, related: Option<&Related>) -> Result<()> {
        if let Some(related) = related {
            if self.posting_exists(user_id, related)? {
                return Err(LedgerError::DuplicatePosting {
                    related_type: related.related_type.clone(),
                    related_id: related.related_id.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Write the updated balance, the transaction, its user index entry, and
    /// the posting marker as one batch.
    fn write_posting(&self, balance: &CreditBalance, tx: &CreditTransaction) -> Result<()> {
        let cf_balances = self.cf(cf::BALANCES)?;
        let cf_tx = self.cf(cf::TRANSACTIONS)?;
        let cf_tx_by_user = self.cf(cf::TRANSACTIONS_BY_USER)?;

        let balance_value = Self::serialize(balance)?;
        let tx_value = Self::serialize(tx)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_balances, keys::balance_key(&tx.user_id), &balance_value);
        batch.put_cf(&cf_tx, keys::transaction_key(&tx.id), &tx_value);
        batch.put_cf(
            &cf_tx_by_user,
            keys::user_transaction_key(&tx.user_id, &tx.id),
            [],
        );
        if let Some(dedup) = tx.dedup_key() {
            let cf_postings = self.cf(cf::POSTINGS)?;
            batch.put_cf(&cf_postings, keys::posting_key(&dedup), []);
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn apply_to_balance(balance: &mut CreditBalance, tx: &CreditTransaction) {
        balance.current_balance = tx.balance_after;
        if tx.amount >= 0 {
            balance.total_earned += tx.amount;
        } else {
            balance.total_spent += -tx.amount;
        }
        balance.updated_at = tx.created_at;
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Billing Event Operations
    // =========================================================================

    fn put_event(&self, event: &BillingEvent) -> Result<()> {
        self.put_value(cf::EVENTS, &keys::event_key(&event.id), event)
    }

    fn get_event(&self, event_id: &str) -> Result<Option<BillingEvent>> {
        self.get_value(cf::EVENTS, &keys::event_key(event_id))
    }

    fn mark_event_processed(&self, event_id: &str) -> Result<()> {
        let mut event: BillingEvent =
            self.get_event(event_id)?.ok_or(StoreError::NotFound {
                entity: "billing event",
                id: event_id.to_string(),
            })?;
        event.processed = true;
        event.error = None;
        self.put_event(&event)
    }

    fn record_event_error(&self, event_id: &str, error: &str) -> Result<()> {
        let mut event: BillingEvent =
            self.get_event(event_id)?.ok_or(StoreError::NotFound {
                entity: "billing event",
                id: event_id.to_string(),
            })?;
        event.processed = false;
        event.error = Some(error.to_string());
        self.put_event(&event)
    }

    // =========================================================================
    // Subscription Operations
    // =========================================================================

    fn upsert_subscription(&self, subscription: &Subscription) -> Result<()> {
        self.put_value(
            cf::SUBSCRIPTIONS,
            &keys::subscription_key(&subscription.id),
            subscription,
        )
    }

    fn get_subscription(&self, id: &SubscriptionId) -> Result<Option<Subscription>> {
        self.get_value(cf::SUBSCRIPTIONS, &keys::subscription_key(id))
    }

    // =========================================================================
    // Credit Ledger Operations
    // =========================================================================

    fn get_balance(&self, user_id: &UserId) -> Result<CreditBalance> {
        Ok(self
            .get_value(cf::BALANCES, &keys::balance_key(user_id))?
            .unwrap_or_else(|| CreditBalance::zero(*user_id)))
    }

    fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        let cf_by_user = self.cf(cf::TRANSACTIONS_BY_USER)?;
        let prefix = keys::user_transactions_prefix(user_id);

        // ULIDs are time-ordered, so the index iterates oldest first.
        let iter = self
            .db
            .iterator_cf(&cf_by_user, IteratorMode::From(&prefix, Direction::Forward));

        let mut all_keys: Vec<Vec<u8>> = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            all_keys.push(key.to_vec());
        }

        // Newest first for the API.
        all_keys.reverse();

        let mut transactions = Vec::new();
        for key in all_keys.into_iter().skip(offset) {
            if transactions.len() >= limit {
                break;
            }
            let tx_id = keys::extract_transaction_id_from_user_key(&key);
            if let Some(tx) =
                self.get_value::<CreditTransaction>(cf::TRANSACTIONS, &keys::transaction_key(&tx_id))?
            {
                transactions.push(tx);
            }
        }

        Ok(transactions)
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

        let lock = self.locks.acquire(&format!("ledger:{user_id}"));
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        self.check_dedup(user_id, related.as_ref())?;

        let mut balance = self.get_balance(user_id)?;
        let tx = CreditTransaction::credit(
            *user_id,
            tx_type,
            amount,
            balance.current_balance,
            related,
            description,
        );
        Self::apply_to_balance(&mut balance, &tx);
        self.write_posting(&balance, &tx)?;
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

        let lock = self.locks.acquire(&format!("ledger:{user_id}"));
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        self.check_dedup(user_id, related.as_ref())?;

        let mut balance = self.get_balance(user_id)?;
        if !balance.covers(amount) {
            return Err(LedgerError::InsufficientBalance {
                balance: balance.current_balance,
                required: amount,
            }
            .into());
        }

        let tx = CreditTransaction::debit(
            *user_id,
            tx_type,
            amount,
            balance.current_balance,
            related,
            description,
        );
        Self::apply_to_balance(&mut balance, &tx);
        self.write_posting(&balance, &tx)?;
        Ok(tx)
    }

    // =========================================================================
    // Trial Operations
    // =========================================================================

    fn create_trial(&self, trial: &Trial) -> Result<()> {
        let lock = self.locks.acquire(&format!("trial:{}", trial.user_id));
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        if self.get_trial(&trial.user_id)?.is_some() {
            return Err(LedgerError::TrialAlreadyExists {
                user_id: trial.user_id.to_string(),
            }
            .into());
        }
        self.put_value(cf::TRIALS, &keys::trial_key(&trial.user_id), trial)
    }

    fn get_trial(&self, user_id: &UserId) -> Result<Option<Trial>> {
        self.get_value(cf::TRIALS, &keys::trial_key(user_id))
    }

    fn update_trial(&self, trial: &Trial) -> Result<()> {
        let lock = self.locks.acquire(&format!("trial:{}", trial.user_id));
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        if self.get_trial(&trial.user_id)?.is_none() {
            return Err(StoreError::NotFound {
                entity: "trial",
                id: trial.user_id.to_string(),
            });
        }
        self.put_value(cf::TRIALS, &keys::trial_key(&trial.user_id), trial)
    }

    fn consume_trial_credits(&self, user_id: &UserId, amount: i64) -> Result<Trial> {
        Self::check_amount(amount)?;

        let lock = self.locks.acquire(&format!("trial:{user_id}"));
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut trial = self
            .get_trial(user_id)?
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
        self.put_value(cf::TRIALS, &keys::trial_key(user_id), &trial)?;
        Ok(trial)
    }

    fn release_trial_credits(&self, user_id: &UserId, amount: i64) -> Result<Trial> {
        Self::check_amount(amount)?;

        let lock = self.locks.acquire(&format!("trial:{user_id}"));
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut trial = self
            .get_trial(user_id)?
            .ok_or(LedgerError::TrialNotFound {
                user_id: user_id.to_string(),
            })
            .map_err(StoreError::from)?;

        trial.credits_used = (trial.credits_used - amount).max(0);
        self.put_value(cf::TRIALS, &keys::trial_key(user_id), &trial)?;
        Ok(trial)
    }

    fn expire_trials(&self, now: DateTime<Utc>) -> Result<usize> {
        let cf_trials = self.cf(cf::TRIALS)?;
        let iter = self.db.iterator_cf(&cf_trials, IteratorMode::Start);

        let mut batch = WriteBatch::default();
        let mut expired = 0;
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let mut trial: Trial = Self::deserialize(&value)?;
            if trial.status == TrialStatus::Active && trial.end_date < now {
                trial.status = TrialStatus::Expired;
                batch.put_cf(&cf_trials, key, Self::serialize(&trial)?);
                expired += 1;
            }
        }

        if expired > 0 {
            self.db
                .write(batch)
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }
        Ok(expired)
    }

    // =========================================================================
    // Coupon Operations
    // =========================================================================

    fn put_coupon(&self, coupon: &Coupon) -> Result<()> {
        self.put_value(cf::COUPONS, &keys::coupon_key(&coupon.code), coupon)
    }

    fn get_coupon(&self, code: &str) -> Result<Option<Coupon>> {
        self.get_value(cf::COUPONS, &keys::coupon_key(code))
    }

    fn redeem_coupon(&self, code: &str, user_id: &UserId) -> Result<Coupon> {
        let lock = self.locks.acquire(&format!("coupon:{code}"));
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut coupon = self.get_coupon(code)?.ok_or(StoreError::NotFound {
            entity: "coupon",
            id: code.to_string(),
        })?;

        if coupon.is_exhausted() {
            return Err(LedgerError::CouponExhausted.into());
        }
        if coupon.used_by.contains(user_id) {
            return Err(LedgerError::CouponAlreadyUsed.into());
        }
        coupon.current_uses += 1;
        coupon.used_by.insert(*user_id);
        self.put_value(cf::COUPONS, &keys::coupon_key(code), &coupon)?;
        Ok(coupon)
    }

    // =========================================================================
    // Fraud Operations
    // =========================================================================

    fn record_payment_attempt(&self, attempt: &PaymentAttempt) -> Result<()> {
        let key = keys::payment_attempt_key(&attempt.user_id, Ulid::new());
        self.put_value(cf::PAYMENT_ATTEMPTS, &key, attempt)
    }

    fn payment_stats(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<PaymentStats> {
        let cf_attempts = self.cf(cf::PAYMENT_ATTEMPTS)?;
        let prefix = keys::payment_attempts_prefix(user_id);
        let iter = self
            .db
            .iterator_cf(&cf_attempts, IteratorMode::From(&prefix, Direction::Forward));

        let window_start = now - Duration::hours(24);
        let mut stats = PaymentStats::default();
        let mut succeeded_total = 0i64;
        let mut succeeded_count = 0i64;

        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            let attempt: PaymentAttempt = Self::deserialize(&value)?;
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
        self.put_value(cf::FRAUD_ALERTS, &keys::alert_key(&alert.id), alert)
    }

    fn list_pending_alerts(&self) -> Result<Vec<FraudAlert>> {
        let cf_alerts = self.cf(cf::FRAUD_ALERTS)?;
        let iter = self.db.iterator_cf(&cf_alerts, IteratorMode::Start);

        let mut alerts = Vec::new();
        for item in iter {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let alert: FraudAlert = Self::deserialize(&value)?;
            if alert.status == tally_core::AlertStatus::Pending {
                alerts.push(alert);
            }
        }
        Ok(alerts)
    }
}
