//! Application state.

use std::sync::Arc;

use tally_core::RiskEvaluator;
use tally_store::Store;

use crate::config::ServiceConfig;
use crate::directory::{StaticDirectory, UserDirectory};
use crate::ingress::RecentEventCache;
use crate::notify::{LogNotifier, Notification, Notifier};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Directory for customer resolution and cohort moves.
    pub directory: Arc<dyn UserDirectory>,

    /// Outbound notification seam.
    pub notifier: Arc<dyn Notifier>,

    /// The fraud rule-scoring gate.
    pub evaluator: Arc<RiskEvaluator>,

    /// Recent event id cache (latency hint, not the dedup mechanism).
    pub recent_events: Arc<RecentEventCache>,
}

impl AppState {
    /// Create application state with the default directory, notifier, and
    /// rule set.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        let recent_events = Arc::new(RecentEventCache::new(config.recent_event_cache_size));
        Self {
            store,
            config,
            directory: Arc::new(StaticDirectory::new()),
            notifier: Arc::new(LogNotifier),
            evaluator: Arc::new(RiskEvaluator::with_default_rules()),
            recent_events,
        }
    }

    /// Fire a notification off the critical path.
    ///
    /// Delivery runs on its own task; a slow or failing notifier can never
    /// delay or fail the calling handler.
    pub fn notify(&self, notification: Notification) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            notifier.deliver(&notification);
        });
    }
}
