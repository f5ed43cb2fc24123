//! Screen state container and the screen controller contract.
//!
//! A screen is an application-provided controller owning one screen's
//! state. Its public surface is declared by `schema()` (field → default
//! value); lifecycle hooks are optional and default to no-ops, except
//! `handle_params`, whose absence (the `None` default) tells the session to
//! fall back to a full re-mount.

use std::collections::{BTreeMap, BTreeSet};

use projection_error::Result;
use serde_json::{Map, Value};

/// Per-screen assigns with change tracking.
///
/// `assign` is identity-guarded: storing a value structurally equal to the
/// current one neither mutates the container nor marks the field changed.
/// Seeding via [`ScreenState::new`] does not count as a change either.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScreenState {
    assigns: BTreeMap<String, Value>,
    changed: BTreeSet<String>,
}

impl ScreenState {
    /// Seed the container; initial values are not considered changes.
    #[must_use]
    pub fn new(initial_assigns: BTreeMap<String, Value>) -> Self {
        Self {
            assigns: initial_assigns,
            changed: BTreeSet::new(),
        }
    }

    /// Identity-guarded upsert.
    pub fn assign(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if self.assigns.get(&key) == Some(&value) {
            return;
        }
        self.assigns.insert(key.clone(), value);
        self.changed.insert(key);
    }

    /// `assign(key, f(old))`, where `old` is the current value if present.
    pub fn update(&mut self, key: impl Into<String>, f: impl FnOnce(Option<&Value>) -> Value) {
        let key = key.into();
        let next = f(self.assigns.get(&key));
        self.assign(key, next);
    }

    /// Current value of one field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.assigns.get(key)
    }

    /// All assigns, keyed by field name.
    #[must_use]
    pub fn assigns(&self) -> &BTreeMap<String, Value> {
        &self.assigns
    }

    /// Fields changed since the last [`ScreenState::clear_changed`], sorted.
    #[must_use]
    pub fn changed_fields(&self) -> Vec<String> {
        self.changed.iter().cloned().collect()
    }

    /// Whether any field changed since the last clear.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty()
    }

    /// Forget the change-set (after each outbound patch cycle).
    pub fn clear_changed(&mut self) {
        self.changed.clear();
    }
}

/// Outcome of probing a screen's `handle_params` capability.
#[derive(Debug)]
pub enum ParamsHook {
    /// The screen handled the params update.
    Handled(Result<ScreenState>),
    /// The screen does not implement the hook; re-mount instead.
    Absent,
}

/// The screen controller capability set.
///
/// `schema()` is required; every other hook has a documented default. Hooks
/// run on the session actor thread and must not block.
pub trait Screen: Send + Sync {
    /// Public VM surface: field name → default value.
    fn schema(&self) -> BTreeMap<String, Value>;

    /// Prepare state for a (re)mounted screen. Failure aborts the mount.
    fn mount(&self, params: &Value, screen_session: &str, state: ScreenState) -> Result<ScreenState> {
        let _ = (params, screen_session);
        Ok(state)
    }

    /// React to a screen-level intent. Default: state unchanged.
    fn handle_event(&self, name: &str, payload: &Value, state: ScreenState) -> Result<ScreenState> {
        let _ = (name, payload);
        Ok(state)
    }

    /// React to a params patch without re-mounting. Default: hook absent.
    fn handle_params(&self, params: &Value, state: ScreenState) -> ParamsHook {
        let _ = (params, state);
        ParamsHook::Absent
    }

    /// React to a timer or host message. Default: state unchanged.
    fn handle_info(&self, message: &Value, state: ScreenState) -> Result<ScreenState> {
        let _ = message;
        Ok(state)
    }

    /// Pub/sub topics this screen wants while active. Default: none.
    fn subscriptions(&self, params: &Value, screen_session: &str) -> Vec<String> {
        let _ = (params, screen_session);
        Vec::new()
    }

    /// Project assigns into the screen's VM subtree.
    ///
    /// Default: assigns projected onto the schema keys, falling back to the
    /// schema default for unassigned fields.
    fn render(&self, assigns: &BTreeMap<String, Value>) -> Result<Map<String, Value>> {
        Ok(self
            .schema()
            .into_iter()
            .map(|(field, default)| {
                let value = assigns.get(&field).cloned().unwrap_or(default);
                (field, value)
            })
            .collect())
    }
}
