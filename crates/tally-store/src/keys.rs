//! Key encoding utilities for `RocksDB`.
//!
//! This module provides functions for encoding and decoding keys used in column families.

use tally_core::{AlertId, SubscriptionId, TransactionId, UserId};
use ulid::Ulid;

/// Create an event key from a provider event id.
#[must_use]
pub fn event_key(event_id: &str) -> Vec<u8> {
    event_id.as_bytes().to_vec()
}

/// Create a subscription key from a provider subscription id.
#[must_use]
pub fn subscription_key(id: &SubscriptionId) -> Vec<u8> {
    id.as_str().as_bytes().to_vec()
}

/// Create a balance key from a user ID.
#[must_use]
pub fn balance_key(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Create a transaction key from a transaction ID.
#[must_use]
pub fn transaction_key(transaction_id: &TransactionId) -> Vec<u8> {
    transaction_id.to_bytes().to_vec()
}

/// Create a user-transaction index key.
///
/// Format: `user_id (16 bytes) || transaction_id (16 bytes)`
///
/// Since ULIDs are time-ordered, transactions for a user will be sorted by time.
#[must_use]
pub fn user_transaction_key(user_id: &UserId, transaction_id: &TransactionId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(user_id.as_bytes());
    key.extend_from_slice(&transaction_id.to_bytes());
    key
}

/// Create a prefix for iterating all transactions for a user.
#[must_use]
pub fn user_transactions_prefix(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Extract the transaction ID from a user-transaction index key.
///
/// # Panics
///
/// Panics if the key is not at least 32 bytes.
#[must_use]
pub fn extract_transaction_id_from_user_key(key: &[u8]) -> TransactionId {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&key[16..32]);
    TransactionId::from_bytes(bytes)
}

/// Create a posting dedup key.
#[must_use]
pub fn posting_key(dedup_key: &str) -> Vec<u8> {
    dedup_key.as_bytes().to_vec()
}

/// Create a trial key from a user ID.
#[must_use]
pub fn trial_key(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Create a coupon key from a code.
#[must_use]
pub fn coupon_key(code: &str) -> Vec<u8> {
    code.as_bytes().to_vec()
}

/// Create a payment attempt key.
///
/// Format: `user_id (16 bytes) || ulid (16 bytes)`. The ULID is minted at
/// write time so attempts for a user iterate in arrival order.
#[must_use]
pub fn payment_attempt_key(user_id: &UserId, seq: Ulid) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(user_id.as_bytes());
    key.extend_from_slice(&seq.to_bytes());
    key
}

/// Create a prefix for iterating all payment attempts for a user.
#[must_use]
pub fn payment_attempts_prefix(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Create a fraud alert key from an alert ID.
#[must_use]
pub fn alert_key(alert_id: &AlertId) -> Vec<u8> {
    alert_id.as_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balance_key_length() {
        let user_id = UserId::generate();
        let key = balance_key(&user_id);
        assert_eq!(key.len(), 16);
    }

    #[test]
    fn user_transaction_key_format() {
        let user_id = UserId::generate();
        let tx_id = TransactionId::generate();
        let key = user_transaction_key(&user_id, &tx_id);

        assert_eq!(key.len(), 32);
        assert_eq!(&key[..16], user_id.as_bytes());
        assert_eq!(&key[16..], tx_id.to_bytes());
    }

    #[test]
    fn extract_transaction_id_roundtrip() {
        let user_id = UserId::generate();
        let tx_id = TransactionId::generate();
        let key = user_transaction_key(&user_id, &tx_id);

        let extracted = extract_transaction_id_from_user_key(&key);
        assert_eq!(extracted, tx_id);
    }

    #[test]
    fn payment_attempt_keys_sort_by_time() {
        let user_id = UserId::generate();
        let a = payment_attempt_key(&user_id, Ulid::new());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = payment_attempt_key(&user_id, Ulid::new());
        assert!(a < b);
    }
}
