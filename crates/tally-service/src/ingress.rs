//! Webhook ingress and idempotency guard.
//!
//! The provider delivers events at-least-once: any non-success response leads
//! to redelivery of the same event id. Ingress therefore persists every new
//! event (`processed = false`) **before** dispatch, so a crash mid-processing
//! leaves a durable, retryable record, and short-circuits events the durable
//! table already shows as processed.
//!
//! The in-process recent-id cache in front of the table is a latency hint
//! only. It resets on restart, so it must never be the sole dedup mechanism.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};

use tally_core::{BillingEvent, EventType};

use crate::crypto::verify_signature;
use crate::dispatch;
use crate::error::ApiError;
use crate::state::AppState;

/// Bounded set of recently processed event ids.
pub struct RecentEventCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

struct CacheInner {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl RecentEventCache {
    /// Create a cache holding at most `capacity` ids.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                order: VecDeque::with_capacity(capacity),
                seen: HashSet::with_capacity(capacity),
            }),
            capacity: capacity.max(1),
        }
    }

    /// Whether the id was recently marked processed.
    #[must_use]
    pub fn contains(&self, event_id: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .seen
            .contains(event_id)
    }

    /// Record a processed id, evicting the oldest entry when full.
    pub fn insert(&self, event_id: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.seen.contains(event_id) {
            return;
        }
        if inner.order.len() >= self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.seen.remove(&evicted);
            }
        }
        inner.order.push_back(event_id.to_string());
        inner.seen.insert(event_id.to_string());
    }
}

/// Outcome of one webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressOutcome {
    /// New event, dispatched and marked processed.
    Accepted,

    /// Already processed; no side effects.
    Duplicate,
}

/// Verify, deduplicate, persist, and dispatch one webhook delivery.
///
/// # Errors
///
/// - `ApiError::BadRequest` on signature failure or an unparseable envelope;
///   nothing is stored.
/// - `ApiError::WebhookFailed` when dispatch fails; the error is recorded on
///   the event row and the row stays retryable.
pub async fn receive(
    state: &AppState,
    body: &str,
    signature: Option<&str>,
) -> Result<IngressOutcome, ApiError> {
    if let Some(secret) = &state.config.webhook_secret {
        let signature = signature
            .ok_or_else(|| ApiError::BadRequest("Missing provider signature".into()))?;
        verify_signature(body, signature, secret).map_err(|e| {
            tracing::warn!(error = %e, "Invalid webhook signature");
            ApiError::BadRequest("Invalid webhook signature".into())
        })?;
    } else {
        // No secret configured - skip verification (development mode)
        tracing::warn!("Webhook secret not configured - skipping signature verification");
    }

    let payload: serde_json::Value =
        serde_json::from_str(body).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let event_id = payload
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ApiError::BadRequest("Missing event id".into()))?
        .to_string();
    let event_type = payload
        .get("type")
        .and_then(|v| v.as_str())
        .map(EventType::from)
        .ok_or_else(|| ApiError::BadRequest("Missing event type".into()))?;

    if state.recent_events.contains(&event_id) {
        tracing::debug!(event_id = %event_id, "Duplicate event (cache hit)");
        return Ok(IngressOutcome::Duplicate);
    }

    // The durable table is the primary idempotency guarantee. An existing
    // unprocessed row means a previous attempt failed mid-dispatch; fall
    // through and reprocess it, which is safe because every handler is
    // idempotent.
    let event = match state.store.get_event(&event_id)? {
        Some(existing) if existing.processed => {
            state.recent_events.insert(&event_id);
            tracing::debug!(event_id = %event_id, "Duplicate event (already processed)");
            return Ok(IngressOutcome::Duplicate);
        }
        Some(existing) => {
            tracing::info!(event_id = %event_id, "Retrying previously failed event");
            existing
        }
        None => {
            let event = BillingEvent::received(event_id.clone(), event_type, payload);
            state.store.put_event(&event)?;
            event
        }
    };

    tracing::info!(
        event_id = %event.id,
        event_type = %event.event_type.as_str(),
        "Dispatching billing event"
    );

    match dispatch::dispatch(state, &event).await {
        Ok(()) => {
            state.store.mark_event_processed(&event.id)?;
            state.recent_events.insert(&event.id);
            Ok(IngressOutcome::Accepted)
        }
        Err(err) => {
            let message = err.to_string();
            state.store.record_event_error(&event.id, &message)?;
            Err(ApiError::WebhookFailed {
                event_id: event.id,
                message,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_evicts_oldest() {
        let cache = RecentEventCache::new(2);
        cache.insert("a");
        cache.insert("b");
        cache.insert("c");

        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
    }

    #[test]
    fn cache_insert_is_idempotent() {
        let cache = RecentEventCache::new(2);
        cache.insert("a");
        cache.insert("a");
        cache.insert("b");

        assert!(cache.contains("a"));
        assert!(cache.contains("b"));
    }
}
