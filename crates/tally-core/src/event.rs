//! Billing event types.
//!
//! A [`BillingEvent`] is the durable record of one webhook delivery from the
//! payment provider. Rows are created at ingress (before dispatch) and mutated
//! exactly once afterwards: either `processed` flips to true, or the dispatch
//! error is recorded and the row stays retryable. Rows are never deleted; the
//! event table doubles as the audit trail and the durable idempotency store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The type of a provider billing event.
///
/// Unknown variants are preserved verbatim so that new provider event types
/// flow through ingress without breaking processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    /// A subscription was created (usually `status=trialing` or `incomplete`).
    SubscriptionCreated,

    /// A subscription changed (status, plan, or billing period).
    SubscriptionUpdated,

    /// A subscription was deleted/cancelled at the provider.
    SubscriptionDeleted,

    /// A trial is about to end (provider reminder event).
    TrialWillEnd,

    /// An invoice was paid.
    InvoicePaymentSucceeded,

    /// An invoice payment attempt failed.
    InvoicePaymentFailed,

    /// A checkout session completed.
    CheckoutCompleted,

    /// A checkout session expired without payment.
    CheckoutExpired,

    /// Any event type this engine does not handle.
    Unknown(String),
}

impl EventType {
    /// Return the provider wire name for this event type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::SubscriptionCreated => "subscription_created",
            Self::SubscriptionUpdated => "subscription_updated",
            Self::SubscriptionDeleted => "subscription_deleted",
            Self::TrialWillEnd => "trial_will_end",
            Self::InvoicePaymentSucceeded => "invoice_payment_succeeded",
            Self::InvoicePaymentFailed => "invoice_payment_failed",
            Self::CheckoutCompleted => "checkout_completed",
            Self::CheckoutExpired => "checkout_expired",
            Self::Unknown(name) => name,
        }
    }
}

impl From<String> for EventType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "subscription_created" => Self::SubscriptionCreated,
            "subscription_updated" => Self::SubscriptionUpdated,
            "subscription_deleted" => Self::SubscriptionDeleted,
            "trial_will_end" => Self::TrialWillEnd,
            "invoice_payment_succeeded" => Self::InvoicePaymentSucceeded,
            "invoice_payment_failed" => Self::InvoicePaymentFailed,
            "checkout_completed" => Self::CheckoutCompleted,
            "checkout_expired" => Self::CheckoutExpired,
            _ => Self::Unknown(value),
        }
    }
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        value.as_str().to_string()
    }
}

/// A durable record of one provider webhook delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingEvent {
    /// Provider-assigned event id (globally unique).
    pub id: String,

    /// The event type.
    pub event_type: EventType,

    /// The raw event payload as delivered.
    pub payload: serde_json::Value,

    /// Whether dispatch completed successfully.
    pub processed: bool,

    /// The dispatch error, if the last attempt failed.
    pub error: Option<String>,

    /// When the event was first received.
    pub received_at: DateTime<Utc>,
}

impl BillingEvent {
    /// Create a freshly received, not-yet-processed event record.
    #[must_use]
    pub fn received(id: impl Into<String>, event_type: EventType, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            event_type,
            payload,
            processed: false,
            error: None,
            received_at: Utc::now(),
        }
    }
}
