//! Subscriptions deciding which classes a client syncs.

use crate::error::{SyncError, SyncResult};
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Synchronization state of a subscription set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionSetState {
    /// Changed locally; the server has not delivered matching data yet.
    Pending,
    /// Data for the current subscriptions has been downloaded.
    Complete,
    /// The server rejected the subscriptions.
    Error,
}

#[derive(Debug)]
struct Subscriptions {
    /// `None` syncs every class.
    classes: Option<BTreeSet<String>>,
    state: SubscriptionSetState,
}

/// The classes a client syncs, shared between a session and the code that
/// edits it.
///
/// Clones share state. Reset handling only ever reads it.
#[derive(Debug, Clone)]
pub struct SubscriptionSet {
    inner: Arc<(Mutex<Subscriptions>, Condvar)>,
}

impl SubscriptionSet {
    /// Subscribes to every class.
    #[must_use]
    pub fn all() -> Self {
        Self::with_classes(None)
    }

    /// Subscribes to the given classes only.
    #[must_use]
    pub fn of<I, S>(classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_classes(Some(classes.into_iter().map(Into::into).collect()))
    }

    fn with_classes(classes: Option<BTreeSet<String>>) -> Self {
        Self {
            inner: Arc::new((
                Mutex::new(Subscriptions {
                    classes,
                    state: SubscriptionSetState::Pending,
                }),
                Condvar::new(),
            )),
        }
    }

    /// Subscribed classes, `None` when every class is synced.
    #[must_use]
    pub fn classes(&self) -> Option<Vec<String>> {
        let subscriptions = self.inner.0.lock();
        subscriptions
            .classes
            .as_ref()
            .map(|classes| classes.iter().cloned().collect())
    }

    /// Returns true if `class` is synced.
    #[must_use]
    pub fn contains(&self, class: &str) -> bool {
        let subscriptions = self.inner.0.lock();
        subscriptions
            .classes
            .as_ref()
            .map_or(true, |classes| classes.contains(class))
    }

    /// Adds a class. The set becomes pending until the next download.
    pub fn add(&self, class: impl Into<String>) {
        let mut subscriptions = self.inner.0.lock();
        if let Some(classes) = subscriptions.classes.as_mut() {
            classes.insert(class.into());
            subscriptions.state = SubscriptionSetState::Pending;
        }
    }

    /// Removes a class. The set becomes pending until the next download.
    pub fn remove(&self, class: &str) {
        let mut subscriptions = self.inner.0.lock();
        let removed = match subscriptions.classes.as_mut() {
            Some(classes) => classes.remove(class),
            None => false,
        };
        if removed {
            subscriptions.state = SubscriptionSetState::Pending;
        }
    }

    /// Current synchronization state.
    #[must_use]
    pub fn state(&self) -> SubscriptionSetState {
        self.inner.0.lock().state
    }

    pub(crate) fn set_state(&self, state: SubscriptionSetState) {
        let (lock, changed) = &*self.inner;
        lock.lock().state = state;
        changed.notify_all();
    }

    /// Blocks until the set is `Complete`, up to `timeout`.
    ///
    /// Returns `Ok(false)` on timeout.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a zero timeout and `IllegalState` if
    /// the server rejected the subscriptions.
    pub fn wait_for_synchronization(&self, timeout: Duration) -> SyncResult<bool> {
        if timeout.is_zero() {
            return Err(SyncError::InvalidArgument(
                "timeout must be greater than zero".into(),
            ));
        }

        let deadline = Instant::now() + timeout;
        let (lock, changed) = &*self.inner;
        let mut subscriptions = lock.lock();
        loop {
            match subscriptions.state {
                SubscriptionSetState::Complete => return Ok(true),
                SubscriptionSetState::Error => {
                    return Err(SyncError::IllegalState(
                        "subscriptions were rejected by the server".into(),
                    ))
                }
                SubscriptionSetState::Pending => {}
            }
            if changed.wait_until(&mut subscriptions, deadline).timed_out() {
                return Ok(subscriptions.state == SubscriptionSetState::Complete);
            }
        }
    }
}

impl Default for SubscriptionSet {
    fn default() -> Self {
        Self::all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn all_contains_everything() {
        let set = SubscriptionSet::all();
        assert!(set.contains("Anything"));
        assert!(set.classes().is_none());
    }

    #[test]
    fn edits_mark_pending() {
        let set = SubscriptionSet::of(["Dog"]);
        set.set_state(SubscriptionSetState::Complete);

        set.add("Cat");
        assert_eq!(set.state(), SubscriptionSetState::Pending);
        assert_eq!(set.classes(), Some(vec!["Cat".to_string(), "Dog".to_string()]));

        set.set_state(SubscriptionSetState::Complete);
        set.remove("Bird");
        assert_eq!(set.state(), SubscriptionSetState::Complete);
    }

    #[test]
    fn wait_times_out() {
        let set = SubscriptionSet::all();
        assert!(!set.wait_for_synchronization(Duration::from_millis(20)).unwrap());
    }

    #[test]
    fn zero_timeout_rejected() {
        let set = SubscriptionSet::all();
        assert!(matches!(
            set.wait_for_synchronization(Duration::ZERO),
            Err(SyncError::InvalidArgument(_))
        ));
    }

    #[test]
    fn wait_wakes_on_completion() {
        let set = SubscriptionSet::all();
        let other = set.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            other.set_state(SubscriptionSetState::Complete);
        });

        assert!(set.wait_for_synchronization(Duration::from_secs(5)).unwrap());
        handle.join().unwrap();
    }
}
