//! Background jobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::state::AppState;

/// Spawn the periodic trial-expiry sweep.
///
/// Each tick flips every active trial whose window has closed to expired.
/// The flip is a pure status transition; granted credits stay on the ledger.
/// The sweep is idempotent, so overlapping runs or restarts are harmless.
pub fn spawn_trial_expiry(state: Arc<AppState>) -> JoinHandle<()> {
    let period = Duration::from_secs(state.config.trial_expiry_interval_seconds.max(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match state.store.expire_trials(Utc::now()) {
                Ok(0) => {}
                Ok(count) => {
                    tracing::info!(expired = %count, "Trial expiry sweep completed");
                }
                Err(err) => {
                    tracing::error!(error = %err, "Trial expiry sweep failed");
                }
            }
        }
    })
}
