//! Outbound notifications.
//!
//! Email delivery is an external collaborator. The service only decides when
//! a notification is due and hands it to a [`Notifier`]; delivery always
//! happens off the webhook critical path (see [`crate::state::AppState::notify`]).

use tally_core::UserId;

/// A templated notification to a user.
#[derive(Debug, Clone)]
pub enum Notification {
    /// Subscription activated for the first time.
    Welcome {
        /// The new subscriber.
        user_id: UserId,
        /// The plan they subscribed to.
        plan_id: String,
    },

    /// Subscription was cancelled.
    SubscriptionCancelled {
        /// The cancelling user.
        user_id: UserId,
    },

    /// A renewal payment failed; the provider is retrying.
    PaymentFailed {
        /// The affected user.
        user_id: UserId,
        /// The failed amount, when the event carried one.
        amount: Option<i64>,
    },

    /// The provider says the trial ends soon.
    TrialEndingSoon {
        /// The user on trial.
        user_id: UserId,
    },
}

/// Delivery seam for notifications.
pub trait Notifier: Send + Sync {
    /// Deliver one notification. Must not panic; failures are the
    /// implementation's to retry or drop.
    fn deliver(&self, notification: &Notification);
}

/// Default notifier that records deliveries in the log stream.
#[derive(Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn deliver(&self, notification: &Notification) {
        match notification {
            Notification::Welcome { user_id, plan_id } => {
                tracing::info!(user_id = %user_id, plan_id = %plan_id, "notify: welcome");
            }
            Notification::SubscriptionCancelled { user_id } => {
                tracing::info!(user_id = %user_id, "notify: subscription cancelled");
            }
            Notification::PaymentFailed { user_id, amount } => {
                tracing::info!(user_id = %user_id, amount = ?amount, "notify: payment failed");
            }
            Notification::TrialEndingSoon { user_id } => {
                tracing::info!(user_id = %user_id, "notify: trial ending soon");
            }
        }
    }
}
