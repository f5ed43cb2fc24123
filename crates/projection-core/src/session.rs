//! Per-session state machine.
//!
//! The session owns sid/rev, routes inbound intents (route-level vs
//! screen-level), drives the active screen through the dispatcher, and runs
//! the render → diff → batch → dispatch pipeline after every state-mutating
//! hook. It is a plain synchronous actor: all side effects (outbound
//! envelopes, timers) flow through the [`SessionHost`] capability the
//! caller provides, so the machine is fully deterministic under test.
//!
//! Revision discipline: `rev` advances by exactly one for every outbound
//! `render` or `patch`, and `sid`, once adopted from the first `ready`,
//! never changes for the session's lifetime.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use projection_error::{ProjectionError, Result};
use projection_observability as telemetry;
use projection_observability::RenderStatus;
use projection_types::{
    normalize_ack, normalize_payload, InboundEnvelope, OutboundEnvelope, RouteDef,
};
use serde_json::{json, Map, Value};

use crate::batcher::{BatcherConfig, FlushDisposition, PatchBatcher};
use crate::diff::{diff, diff_at_paths, resolve};
use crate::dispatch::{
    self, dispatch_event, dispatch_info, dispatch_params, mount_screen, render_screen,
    ParamsDispatch, ScreenRegistry,
};
use crate::router::{NavState, Router};
use crate::screen::{Screen, ScreenState};
use crate::subscriptions::{SubscriptionHook, SubscriptionSet};

/// Reserved route-level intent names (router mode only).
pub const INTENT_NAVIGATE: &str = "ui.route.navigate";
pub const INTENT_ROUTE_PATCH: &str = "ui.route.patch";
pub const INTENT_BACK: &str = "ui.back";

/// One-shot timers the session asks its host to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Patch batch window elapsed.
    Flush,
    /// Periodic screen tick.
    Tick,
}

/// Capabilities the actor host provides to the session.
///
/// `send` hands an envelope to the transport bridge; `schedule` arms a
/// one-shot timer of the given kind, replacing any pending one of the same
/// kind; `cancel` disarms it. All three are fire-and-forget.
pub trait SessionHost {
    fn send(&mut self, envelope: OutboundEnvelope);
    fn schedule(&mut self, kind: TimerKind, after: Duration);
    fn cancel(&mut self, kind: TimerKind);
}

/// Session tunables.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Title surfaced at `/app/title` in router mode.
    pub app_title: String,
    /// Patch batch window; zero flushes every update immediately.
    pub batch_window: Duration,
    /// Op-count ceiling forcing an immediate flush.
    pub max_pending_ops: usize,
    /// Periodic `tick` delivery to the screen's `handle_info`, if any.
    pub tick_period: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            app_title: "Projection".to_owned(),
            batch_window: Duration::from_millis(120),
            max_pending_ops: 64,
            tick_period: None,
        }
    }
}

/// How to seed the session: a routed app or a single fixed screen.
pub enum SessionSpec {
    /// Router mode: nav stack + framed `{app, nav, screen}` VM.
    Router {
        router: Router,
        /// Route to start on; defaults to the router's first route.
        initial_route: Option<String>,
        initial_params: Value,
    },
    /// Single-screen mode: the screen's render output is the root VM.
    Screen {
        screen: String,
        params: Value,
        screen_session: String,
    },
}

enum Mode {
    Router { router: Router, nav: NavState },
    Single,
}

enum RenderOutcome {
    Ok,
    Faulted,
}

/// The per-connection session actor state.
pub struct Session {
    config: SessionConfig,
    registry: Arc<ScreenRegistry>,
    mode: Mode,

    sid: Option<String>,
    rev: u64,
    vm: Value,

    screen: Arc<dyn Screen>,
    screen_id: String,
    screen_params: Value,
    screen_session: String,
    state: ScreenState,

    subscriptions: SubscriptionSet,
    batcher: PatchBatcher,
    tick_armed: bool,
}

impl Session {
    /// Create a session and mount its initial screen.
    ///
    /// A mount fault here is a hard error: the session never starts.
    pub fn start(
        config: SessionConfig,
        spec: SessionSpec,
        registry: Arc<ScreenRegistry>,
        subscription_hook: SubscriptionHook,
    ) -> Result<Self> {
        let (mode, route, params) = match spec {
            SessionSpec::Router {
                router,
                initial_route,
                initial_params,
            } => {
                let name = initial_route.unwrap_or_else(|| router.default_route_name().to_owned());
                let nav = router.initial_nav(&name, initial_params.clone())?;
                let route = router.current_route(&nav)?.clone();
                (Mode::Router { router, nav }, route, initial_params)
            }
            SessionSpec::Screen {
                screen,
                params,
                screen_session,
            } => {
                let route = RouteDef::new(screen.clone(), "/", screen.clone(), screen, screen_session);
                (Mode::Single, route, params)
            }
        };

        let screen = registry.get(&route.screen)?;
        let state = mount_screen(screen.as_ref(), &route.screen, &params, &route.screen_session)?;

        let batcher = PatchBatcher::new(
            BatcherConfig {
                batch_window: config.batch_window,
                max_pending_ops: config.max_pending_ops,
            }
            .validated(),
        );

        let mut session = Self {
            config,
            registry,
            mode,
            sid: None,
            rev: 0,
            vm: Value::Object(Map::new()),
            screen,
            screen_id: route.screen.clone(),
            screen_params: params,
            screen_session: route.screen_session.clone(),
            state,
            subscriptions: SubscriptionSet::new(subscription_hook),
            batcher,
            tick_armed: false,
        };
        session.sync_subscriptions();
        session.state.clear_changed();
        let (vm, _) = session.render_current();
        session.vm = vm;
        Ok(session)
    }

    /// Current session id, once adopted.
    #[must_use]
    pub fn sid(&self) -> Option<&str> {
        self.sid.as_deref()
    }

    /// Revision of the most recently emitted envelope.
    #[must_use]
    pub fn rev(&self) -> u64 {
        self.rev
    }

    /// The most recent rendered snapshot.
    #[must_use]
    pub fn vm(&self) -> &Value {
        &self.vm
    }

    /// Registry id of the active screen.
    #[must_use]
    pub fn screen_id(&self) -> &str {
        &self.screen_id
    }

    /// Topics the session currently holds.
    #[must_use]
    pub fn subscribed_topics(&self) -> &BTreeSet<String> {
        self.subscriptions.current()
    }

    /// Nav stack VM, in router mode.
    #[must_use]
    pub fn nav_vm(&self) -> Option<Value> {
        match &self.mode {
            Mode::Router { nav, .. } => Some(nav.to_vm()),
            Mode::Single => None,
        }
    }

    /// Feed one decoded inbound envelope through the state machine.
    pub fn handle_envelope(&mut self, host: &mut dyn SessionHost, envelope: InboundEnvelope) {
        match envelope {
            InboundEnvelope::Ready { sid, capabilities } => {
                self.handle_ready(host, sid, capabilities);
            }
            InboundEnvelope::Intent {
                name, id, payload, ..
            } => self.handle_intent(host, &name, id, payload),
        }
    }

    /// Process a `ready`: clear the batch, adopt the sid if unset, and emit
    /// a full `render` at the next revision.
    pub fn handle_ready(
        &mut self,
        host: &mut dyn SessionHost,
        incoming_sid: String,
        capabilities: Option<Value>,
    ) {
        let dropped = self.batcher.clear();
        host.cancel(TimerKind::Flush);
        if dropped > 0 {
            tracing::debug!(dropped, "ready superseded a pending patch batch");
        }

        if self.sid.is_none() {
            if !incoming_sid.is_empty() {
                tracing::debug!(sid = %incoming_sid, ?capabilities, "adopted session id");
                self.sid = Some(incoming_sid);
            }
        } else if self.sid.as_deref() != Some(incoming_sid.as_str()) {
            tracing::debug!(incoming = %incoming_sid, "ignoring sid change on ready");
        }

        let Some(sid) = self.sid.clone() else {
            tracing::warn!("ready carried an empty sid; render withheld");
            return;
        };

        let rev = self.advance_rev();
        host.send(OutboundEnvelope::Render {
            sid,
            rev,
            vm: self.vm.clone(),
            ack: None,
        });

        if let Some(period) = self.config.tick_period {
            if !self.tick_armed {
                self.tick_armed = true;
                host.schedule(TimerKind::Tick, period);
            }
        }
    }

    /// Process an `intent`: route-level names go to the router, everything
    /// else to the active screen's `handle_event`.
    pub fn handle_intent(
        &mut self,
        host: &mut dyn SessionHost,
        name: &str,
        id: Option<Value>,
        payload: Option<Value>,
    ) {
        let ack = normalize_ack(id.as_ref());
        let payload = normalize_payload(payload);
        telemetry::record_intent_received(self.sid.as_deref(), self.rev, &self.screen_id, name, ack);

        let routed = matches!(self.mode, Mode::Router { .. });
        match name {
            INTENT_NAVIGATE if routed => self.handle_navigate(host, &payload, ack),
            INTENT_ROUTE_PATCH if routed => self.handle_route_patch(host, &payload, ack),
            INTENT_BACK if routed => self.handle_back(host, ack),
            _ => {
                self.state = dispatch_event(
                    self.screen.as_ref(),
                    &self.screen_id,
                    name,
                    &payload,
                    std::mem::take(&mut self.state),
                );
                self.apply_update(host, ack);
            }
        }
    }

    /// Fire a host timer.
    pub fn handle_timer(&mut self, host: &mut dyn SessionHost, kind: TimerKind) {
        match kind {
            TimerKind::Flush => self.flush(host),
            TimerKind::Tick => {
                self.tick_armed = false;
                self.state = dispatch_info(
                    self.screen.as_ref(),
                    &self.screen_id,
                    &Value::String("tick".to_owned()),
                    std::mem::take(&mut self.state),
                );
                self.apply_update(host, None);
                if let Some(period) = self.config.tick_period {
                    self.tick_armed = true;
                    host.schedule(TimerKind::Tick, period);
                }
            }
        }
    }

    /// Tear the session down: cancel timers, discard the pending batch, and
    /// unsubscribe from every held topic.
    pub fn shutdown(&mut self, host: &mut dyn SessionHost) {
        host.cancel(TimerKind::Flush);
        host.cancel(TimerKind::Tick);
        self.tick_armed = false;
        self.batcher.clear();
        self.subscriptions.teardown();
    }

    // --- route intents ---------------------------------------------------

    fn handle_navigate(&mut self, host: &mut dyn SessionHost, payload: &Value, ack: Option<u64>) {
        let Some(target) = payload.get("to").or_else(|| payload.get("arg")) else {
            tracing::trace!("navigate without a target; ignored");
            return;
        };
        let Some(to_name) = target.as_str() else {
            tracing::warn!(?target, "navigate target is not a string; ignored");
            return;
        };
        let params = normalize_payload(payload.get("params").cloned());

        let (route, nav_backup) = {
            let Mode::Router { router, nav } = &mut self.mode else {
                return;
            };
            let backup = nav.clone();
            match router.navigate(nav, to_name, params.clone()) {
                Ok(route) => (route.clone(), backup),
                Err(err @ ProjectionError::BoundaryViolation { .. }) => {
                    tracing::warn!(to = to_name, %err, "navigation blocked");
                    return;
                }
                Err(err) => {
                    tracing::warn!(to = to_name, %err, "navigation rejected");
                    return;
                }
            }
        };

        if let Err(err) = self.activate_route(&route, params) {
            tracing::warn!(to = to_name, %err, "mount during navigation failed; navigation rolled back");
            telemetry::record_error("mount_failed", &err.to_string(), &route.screen);
            if let Mode::Router { nav, .. } = &mut self.mode {
                *nav = nav_backup;
            }
            return;
        }
        self.apply_update(host, ack);
    }

    fn handle_route_patch(&mut self, host: &mut dyn SessionHost, payload: &Value, ack: Option<u64>) {
        let Some(params_patch) = payload.get("params").filter(|p| p.is_object()) else {
            tracing::trace!("route patch without a params object; ignored");
            return;
        };

        let merged = {
            let Mode::Router { router, nav } = &mut self.mode else {
                return;
            };
            router.patch(nav, params_patch);
            nav.current().params.clone()
        };
        self.screen_params = merged.clone();

        match dispatch_params(
            self.screen.as_ref(),
            &self.screen_id,
            &merged,
            std::mem::take(&mut self.state),
        ) {
            ParamsDispatch::Updated(next) => {
                self.state = next;
                self.sync_subscriptions();
            }
            ParamsDispatch::HookAbsent => {
                // No incremental hook: re-mount the same route with the
                // merged params.
                let route = match self.current_route_def() {
                    Ok(route) => route,
                    Err(err) => {
                        tracing::warn!(%err, "route patch lost its route; ignored");
                        return;
                    }
                };
                if let Err(err) = self.activate_route(&route, merged) {
                    tracing::warn!(%err, "re-mount on route patch failed; prior screen kept");
                    telemetry::record_error("mount_failed", &err.to_string(), &route.screen);
                    return;
                }
            }
        }
        self.apply_update(host, ack);
    }

    fn handle_back(&mut self, host: &mut dyn SessionHost, ack: Option<u64>) {
        let (route, params, nav_backup) = {
            let Mode::Router { router, nav } = &mut self.mode else {
                return;
            };
            let backup = nav.clone();
            match router.back(nav) {
                Ok(route) => (route.clone(), nav.current().params.clone(), backup),
                Err(err) => {
                    tracing::warn!(%err, "back ignored");
                    return;
                }
            }
        };

        if let Err(err) = self.activate_route(&route, params) {
            tracing::warn!(%err, "re-mount on back failed; navigation rolled back");
            telemetry::record_error("mount_failed", &err.to_string(), &route.screen);
            if let Mode::Router { nav, .. } = &mut self.mode {
                *nav = nav_backup;
            }
            return;
        }
        self.apply_update(host, ack);
    }

    fn current_route_def(&self) -> Result<RouteDef> {
        match &self.mode {
            Mode::Router { router, nav } => router.current_route(nav).cloned(),
            Mode::Single => Err(ProjectionError::internal(
                "single-screen session has no routes",
            )),
        }
    }

    /// Swap the active screen for `route`, mounting fresh state. Mutates
    /// the session only after the mount succeeded.
    fn activate_route(&mut self, route: &RouteDef, params: Value) -> Result<()> {
        let screen = self.registry.get(&route.screen)?;
        let state = mount_screen(screen.as_ref(), &route.screen, &params, &route.screen_session)?;

        self.screen = screen;
        self.screen_id = route.screen.clone();
        self.screen_params = params;
        self.screen_session = route.screen_session.clone();
        self.state = state;
        self.sync_subscriptions();
        Ok(())
    }

    fn sync_subscriptions(&mut self) {
        let desired: BTreeSet<String> = dispatch::screen_subscriptions(
            self.screen.as_ref(),
            &self.screen_id,
            &self.screen_params,
            &self.screen_session,
        )
        .into_iter()
        .collect();
        self.subscriptions.sync(desired);
    }

    // --- render → diff → batch → dispatch --------------------------------

    /// Run the update pipeline after any hook that may have touched state.
    fn apply_update(&mut self, host: &mut dyn SessionHost, ack: Option<u64>) {
        let changed = self.state.changed_fields();
        self.state.clear_changed();

        let (next_vm, outcome) = self.render_current();
        let ops = match outcome {
            RenderOutcome::Ok => {
                let scope = self.scoped_paths(&changed, &next_vm);
                diff_at_paths(&self.vm, &next_vm, &scope)
            }
            // The error VM may differ in structure anywhere.
            RenderOutcome::Faulted => diff(&self.vm, &next_vm),
        };
        self.vm = next_vm;

        if ops.is_empty() {
            return;
        }
        if self.sid.is_none() {
            // Renderer not connected; the next ready-triggered render
            // carries the full state.
            tracing::trace!(dropped = ops.len(), "no renderer bound; ops dropped");
            return;
        }

        match self.batcher.enqueue(ops, ack) {
            FlushDisposition::Drained => host.cancel(TimerKind::Flush),
            FlushDisposition::FlushNow => self.flush(host),
            FlushDisposition::ArmTimer(window) => host.schedule(TimerKind::Flush, window),
            FlushDisposition::TimerAlreadyArmed => {}
        }
    }

    /// Emit the pending batch as one `patch` envelope.
    fn flush(&mut self, host: &mut dyn SessionHost) {
        if self.sid.is_none() || self.batcher.is_empty() {
            self.batcher.clear();
            host.cancel(TimerKind::Flush);
            return;
        }
        let (ops, ack) = self.batcher.take();
        let sid = self.sid.clone().unwrap_or_default();
        let rev = self.advance_rev();
        telemetry::record_patch_sent(ops.len(), ack);
        host.send(OutboundEnvelope::Patch { sid, rev, ops, ack });
        host.cancel(TimerKind::Flush);
    }

    fn render_current(&mut self) -> (Value, RenderOutcome) {
        let started = Instant::now();
        match render_screen(self.screen.as_ref(), &self.state) {
            Ok(screen_vm) => {
                telemetry::record_render_complete(started.elapsed(), RenderStatus::Ok);
                (self.compose_vm(screen_vm), RenderOutcome::Ok)
            }
            Err(fault) => {
                let message = fault.to_string();
                telemetry::record_render_complete(started.elapsed(), RenderStatus::Error);
                telemetry::record_error("render_exception", &message, &self.screen_id);
                (self.error_vm(&message), RenderOutcome::Faulted)
            }
        }
    }

    fn compose_vm(&self, screen_vm: Map<String, Value>) -> Value {
        match &self.mode {
            Mode::Single => Value::Object(screen_vm),
            Mode::Router { nav, .. } => {
                let current = nav.current();
                json!({
                    "app": {"title": self.config.app_title},
                    "nav": nav.to_vm(),
                    "screen": {
                        "name": current.name,
                        "action": current.action.clone().map_or(Value::Null, Value::String),
                        "vm": Value::Object(screen_vm),
                    },
                })
            }
        }
    }

    fn error_vm(&self, message: &str) -> Value {
        let screen_error = json!({
            "title": "Rendering Error",
            "message": message,
            "screen_module": self.screen_id,
        });
        match &self.mode {
            Mode::Single => screen_error,
            Mode::Router { nav, .. } => json!({
                "app": {"title": self.config.app_title},
                "nav": nav.to_vm(),
                "screen": {
                    "name": "error",
                    "action": "render_error",
                    "vm": screen_error,
                },
            }),
        }
    }

    /// Scope for the structural diff after a successful render.
    fn scoped_paths(&self, changed: &[String], next_vm: &Value) -> Vec<Vec<String>> {
        match &self.mode {
            Mode::Single => changed.iter().map(|field| vec![field.clone()]).collect(),
            Mode::Router { .. } => {
                let mut paths = vec![
                    vec!["app".to_owned()],
                    vec!["nav".to_owned()],
                    vec!["screen".to_owned(), "name".to_owned()],
                    vec!["screen".to_owned(), "action".to_owned()],
                ];
                if self.screen_identity_changed(next_vm) {
                    // Old and new field sets are not comparable; diff the
                    // whole screen subtree.
                    paths.push(vec!["screen".to_owned(), "vm".to_owned()]);
                } else {
                    for field in changed {
                        paths.push(vec![
                            "screen".to_owned(),
                            "vm".to_owned(),
                            field.clone(),
                        ]);
                    }
                }
                paths
            }
        }
    }

    fn screen_identity_changed(&self, next_vm: &Value) -> bool {
        let name = ["screen".to_owned(), "name".to_owned()];
        let action = ["screen".to_owned(), "action".to_owned()];
        resolve(&self.vm, &name) != resolve(next_vm, &name)
            || resolve(&self.vm, &action) != resolve(next_vm, &action)
    }

    fn advance_rev(&mut self) -> u64 {
        self.rev += 1;
        self.rev
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("sid", &self.sid)
            .field("rev", &self.rev)
            .field("screen", &self.screen_id)
            .field("pending_ops", &self.batcher.pending_len())
            .finish()
    }
}
