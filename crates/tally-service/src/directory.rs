//! User directory: provider customer resolution and cohort bookkeeping.
//!
//! The account system owning users is an external collaborator. The service
//! only needs two things from it: mapping a provider customer id to a local
//! user, and moving users between the paying and free cohorts when their
//! subscription activates or lapses. Users in a locked cohort (program
//! participants and the like) are never moved.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use tally_core::UserId;

/// Access-tier cohort a user belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cohort {
    /// Users with an active paid subscription.
    Paying,

    /// Everyone else.
    Free,
}

/// The directory seam to the external account system.
pub trait UserDirectory: Send + Sync {
    /// Resolve a provider customer id to a local user, if one exists.
    fn resolve(&self, customer_id: &str) -> Option<UserId>;

    /// Record a provider customer id for a local user.
    fn register(&self, customer_id: &str, user_id: UserId);

    /// Move a user into a cohort. No-op for locked users.
    fn assign_cohort(&self, user_id: &UserId, cohort: Cohort);

    /// The cohort a user is currently in.
    fn cohort_of(&self, user_id: &UserId) -> Cohort;

    /// Exempt a user from cohort moves (or lift the exemption).
    fn set_cohort_locked(&self, user_id: &UserId, locked: bool);

    /// Whether the user is exempt from cohort moves.
    fn is_cohort_locked(&self, user_id: &UserId) -> bool;
}

#[derive(Default)]
struct DirectoryInner {
    customers: HashMap<String, UserId>,
    cohorts: HashMap<UserId, Cohort>,
    locked: HashSet<UserId>,
}

/// In-process directory implementation.
#[derive(Default)]
pub struct StaticDirectory {
    inner: Mutex<DirectoryInner>,
}

impl StaticDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, DirectoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl UserDirectory for StaticDirectory {
    fn resolve(&self, customer_id: &str) -> Option<UserId> {
        let inner = self.locked();
        if let Some(user_id) = inner.customers.get(customer_id) {
            return Some(*user_id);
        }
        drop(inner);
        // Providers sometimes carry the local user id directly.
        customer_id.parse().ok()
    }

    fn register(&self, customer_id: &str, user_id: UserId) {
        self.locked().customers.insert(customer_id.to_string(), user_id);
    }

    fn assign_cohort(&self, user_id: &UserId, cohort: Cohort) {
        let mut inner = self.locked();
        if inner.locked.contains(user_id) {
            tracing::debug!(user_id = %user_id, "Cohort locked, leaving user in place");
            return;
        }
        inner.cohorts.insert(*user_id, cohort);
    }

    fn cohort_of(&self, user_id: &UserId) -> Cohort {
        self.locked()
            .cohorts
            .get(user_id)
            .copied()
            .unwrap_or(Cohort::Free)
    }

    fn set_cohort_locked(&self, user_id: &UserId, locked: bool) {
        let mut inner = self.locked();
        if locked {
            inner.locked.insert(*user_id);
        } else {
            inner.locked.remove(user_id);
        }
    }

    fn is_cohort_locked(&self, user_id: &UserId) -> bool {
        self.locked().locked.contains(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_registered_customers() {
        let dir = StaticDirectory::new();
        let user = UserId::generate();
        dir.register("cus_123", user);

        assert_eq!(dir.resolve("cus_123"), Some(user));
        assert_eq!(dir.resolve("cus_missing"), None);
    }

    #[test]
    fn resolves_raw_user_ids() {
        let dir = StaticDirectory::new();
        let user = UserId::generate();
        assert_eq!(dir.resolve(&user.to_string()), Some(user));
    }

    #[test]
    fn cohort_moves_respect_lock() {
        let dir = StaticDirectory::new();
        let user = UserId::generate();
        assert_eq!(dir.cohort_of(&user), Cohort::Free);

        dir.assign_cohort(&user, Cohort::Paying);
        assert_eq!(dir.cohort_of(&user), Cohort::Paying);

        dir.set_cohort_locked(&user, true);
        dir.assign_cohort(&user, Cohort::Free);
        assert_eq!(dir.cohort_of(&user), Cohort::Paying);

        dir.set_cohort_locked(&user, false);
        dir.assign_cohort(&user, Cohort::Free);
        assert_eq!(dir.cohort_of(&user), Cohort::Free);
    }
}
