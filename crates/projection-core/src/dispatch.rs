//! Screen registry and fault-isolating dispatcher.
//!
//! Screens register under the stable ids route definitions reference. Every
//! hook call is fenced: an `Err` return or a panic in event/params/info
//! keeps the prior state and logs a warning, so a misbehaving screen can
//! never take the session down. Mount is the exception (a hard error), and
//! render faults surface to the session, which swaps in the error VM.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use projection_error::{ProjectionError, Result};
use serde_json::{Map, Value};

use crate::screen::{ParamsHook, Screen, ScreenState};

/// Screens keyed by stable identifier.
#[derive(Default, Clone)]
pub struct ScreenRegistry {
    screens: HashMap<String, Arc<dyn Screen>>,
}

impl ScreenRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a screen under `id`, replacing any previous registration.
    pub fn register(&mut self, id: impl Into<String>, screen: Arc<dyn Screen>) {
        self.screens.insert(id.into(), screen);
    }

    /// Look up a screen by id.
    pub fn get(&self, id: &str) -> Result<Arc<dyn Screen>> {
        self.screens
            .get(id)
            .cloned()
            .ok_or_else(|| ProjectionError::ScreenNotRegistered {
                screen: id.to_owned(),
            })
    }
}

impl std::fmt::Debug for ScreenRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&str> = self.screens.keys().map(String::as_str).collect();
        ids.sort_unstable();
        f.debug_struct("ScreenRegistry").field("ids", &ids).finish()
    }
}

fn describe_panic(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "screen hook panicked".to_owned()
    }
}

fn fenced<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(panic) => Err(ProjectionError::screen_fault(describe_panic(panic))),
    }
}

/// Seed state from the schema and run the mount hook. Hard error on fault.
pub fn mount_screen(
    screen: &dyn Screen,
    screen_id: &str,
    params: &Value,
    screen_session: &str,
) -> Result<ScreenState> {
    let seeded = ScreenState::new(screen.schema());
    fenced(|| screen.mount(params, screen_session, seeded)).map_err(|err| {
        ProjectionError::MountFailed {
            screen: screen_id.to_owned(),
            detail: err.to_string(),
        }
    })
}

/// Run `handle_event`; on fault, keep the prior state.
#[must_use]
pub fn dispatch_event(
    screen: &dyn Screen,
    screen_id: &str,
    name: &str,
    payload: &Value,
    state: ScreenState,
) -> ScreenState {
    let prior = state.clone();
    match fenced(|| screen.handle_event(name, payload, state)) {
        Ok(next) => next,
        Err(fault) => {
            tracing::warn!(screen = screen_id, intent = name, %fault, "handle_event fault; state preserved");
            prior
        }
    }
}

/// Outcome of a params dispatch.
#[derive(Debug)]
pub enum ParamsDispatch {
    /// The screen consumed the params (possibly keeping prior state on fault).
    Updated(ScreenState),
    /// Hook absent; the caller re-mounts with the new params.
    HookAbsent,
}

/// Run `handle_params`; on fault, keep the prior state; absent hook is
/// reported so the session can re-mount.
#[must_use]
pub fn dispatch_params(
    screen: &dyn Screen,
    screen_id: &str,
    params: &Value,
    state: ScreenState,
) -> ParamsDispatch {
    let prior = state.clone();
    match catch_unwind(AssertUnwindSafe(|| screen.handle_params(params, state))) {
        Ok(ParamsHook::Absent) => ParamsDispatch::HookAbsent,
        Ok(ParamsHook::Handled(Ok(next))) => ParamsDispatch::Updated(next),
        Ok(ParamsHook::Handled(Err(fault))) => {
            tracing::warn!(screen = screen_id, %fault, "handle_params fault; state preserved");
            ParamsDispatch::Updated(prior)
        }
        Err(panic) => {
            let fault = describe_panic(panic);
            tracing::warn!(screen = screen_id, %fault, "handle_params panic; state preserved");
            ParamsDispatch::Updated(prior)
        }
    }
}

/// Run `handle_info`; on fault, keep the prior state.
#[must_use]
pub fn dispatch_info(
    screen: &dyn Screen,
    screen_id: &str,
    message: &Value,
    state: ScreenState,
) -> ScreenState {
    let prior = state.clone();
    match fenced(|| screen.handle_info(message, state)) {
        Ok(next) => next,
        Err(fault) => {
            tracing::warn!(screen = screen_id, %fault, "handle_info fault; state preserved");
            prior
        }
    }
}

/// Run `render`. Faults (including panics) surface to the caller, which
/// switches to the error VM for this cycle.
pub fn render_screen(screen: &dyn Screen, state: &ScreenState) -> Result<Map<String, Value>> {
    fenced(|| screen.render(state.assigns()))
}

/// Run `subscriptions`; a faulting hook yields no topics.
#[must_use]
pub fn screen_subscriptions(
    screen: &dyn Screen,
    screen_id: &str,
    params: &Value,
    screen_session: &str,
) -> Vec<String> {
    match catch_unwind(AssertUnwindSafe(|| {
        screen.subscriptions(params, screen_session)
    })) {
        Ok(topics) => topics,
        Err(panic) => {
            let fault = describe_panic(panic);
            tracing::warn!(screen = screen_id, %fault, "subscriptions panic; treating as empty");
            Vec::new()
        }
    }
}
