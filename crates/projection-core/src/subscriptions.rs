//! Pub/sub subscription syncing for the active screen.
//!
//! The session owns the topic set the active screen declared; on every
//! screen change or params update the desired set is re-declared and only
//! the delta is pushed through the host-provided hook. Hook faults are
//! swallowed after logging and the membership set is updated regardless, so
//! the next sync still computes a correct delta.

use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Direction of a subscription change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionAction {
    Subscribe,
    Unsubscribe,
}

impl SubscriptionAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// Host-provided side-effect hook. The core never inspects a return value.
pub type SubscriptionHook = Arc<dyn Fn(SubscriptionAction, &str) + Send + Sync>;

/// A hook that does nothing (tests, subscription-free hosts).
#[must_use]
pub fn noop_hook() -> SubscriptionHook {
    Arc::new(|_, _| {})
}

/// Current topic membership plus the hook to effect changes.
pub struct SubscriptionSet {
    current: BTreeSet<String>,
    hook: SubscriptionHook,
}

impl SubscriptionSet {
    #[must_use]
    pub fn new(hook: SubscriptionHook) -> Self {
        Self {
            current: BTreeSet::new(),
            hook,
        }
    }

    /// Topics currently subscribed.
    #[must_use]
    pub fn current(&self) -> &BTreeSet<String> {
        &self.current
    }

    /// Reconcile membership with `desired`, invoking the hook once per
    /// topic entering or leaving the set.
    pub fn sync(&mut self, desired: BTreeSet<String>) {
        for topic in self.current.difference(&desired) {
            invoke(&self.hook, SubscriptionAction::Unsubscribe, topic);
        }
        for topic in desired.difference(&self.current) {
            invoke(&self.hook, SubscriptionAction::Subscribe, topic);
        }
        self.current = desired;
    }

    /// Unsubscribe from everything (session teardown).
    pub fn teardown(&mut self) {
        self.sync(BTreeSet::new());
    }
}

impl std::fmt::Debug for SubscriptionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionSet")
            .field("current", &self.current)
            .finish()
    }
}

fn invoke(hook: &SubscriptionHook, action: SubscriptionAction, topic: &str) {
    if catch_unwind(AssertUnwindSafe(|| hook(action, topic))).is_err() {
        tracing::warn!(
            action = action.as_str(),
            topic,
            "subscription hook fault; membership updated anyway"
        );
    }
}
