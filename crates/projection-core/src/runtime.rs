//! Single-threaded actor host for a [`Session`].
//!
//! One thread per session drains an inbox of inbound envelopes, injected
//! timer fires, and shutdown requests. Timer scheduling is realized as at
//! most one pending deadline per [`TimerKind`], with `recv_timeout` used to
//! sleep until the nearest one. Messages run to completion; no two hooks of
//! the same session ever overlap.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use projection_error::Result;
use projection_types::{InboundEnvelope, OutboundEnvelope};

use crate::session::{Session, SessionHost, TimerKind};

/// Inbox message for the session actor.
#[derive(Debug)]
pub enum SessionMsg {
    /// A decoded envelope from the transport bridge.
    Inbound(InboundEnvelope),
    /// Manually injected timer fire (tests, external schedulers).
    Timer(TimerKind),
    /// Tear the session down and exit the loop.
    Shutdown,
}

#[derive(Default)]
struct Deadlines {
    flush: Option<Instant>,
    tick: Option<Instant>,
}

impl Deadlines {
    fn slot(&mut self, kind: TimerKind) -> &mut Option<Instant> {
        match kind {
            TimerKind::Flush => &mut self.flush,
            TimerKind::Tick => &mut self.tick,
        }
    }

    fn next(&self) -> Option<Instant> {
        match (self.flush, self.tick) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Pop every deadline that is due at `now`.
    fn take_due(&mut self, now: Instant) -> Vec<TimerKind> {
        let mut due = Vec::new();
        for kind in [TimerKind::Flush, TimerKind::Tick] {
            let slot = self.slot(kind);
            if slot.is_some_and(|deadline| deadline <= now) {
                *slot = None;
                due.push(kind);
            }
        }
        due
    }
}

struct LoopHost<'a, F: FnMut(OutboundEnvelope)> {
    outbound: &'a mut F,
    deadlines: &'a mut Deadlines,
}

impl<F: FnMut(OutboundEnvelope)> SessionHost for LoopHost<'_, F> {
    fn send(&mut self, envelope: OutboundEnvelope) {
        (self.outbound)(envelope);
    }

    fn schedule(&mut self, kind: TimerKind, after: Duration) {
        *self.deadlines.slot(kind) = Some(Instant::now() + after);
    }

    fn cancel(&mut self, kind: TimerKind) {
        *self.deadlines.slot(kind) = None;
    }
}

/// Handle to a session actor thread.
///
/// Dropping the handle requests shutdown and joins the thread.
pub struct SessionRuntime {
    inbox: Sender<SessionMsg>,
    handle: Option<JoinHandle<()>>,
}

impl SessionRuntime {
    /// Spawn the actor thread. `outbound` receives every envelope the
    /// session emits, on the actor thread.
    pub fn spawn<F>(session: Session, outbound: F) -> Result<Self>
    where
        F: FnMut(OutboundEnvelope) + Send + 'static,
    {
        let (inbox, rx) = mpsc::channel();
        let handle = std::thread::Builder::new()
            .name("projection-session".to_owned())
            .spawn(move || run_loop(session, &rx, outbound))?;
        Ok(Self {
            inbox,
            handle: Some(handle),
        })
    }

    /// A cloneable sender feeding the actor's inbox.
    #[must_use]
    pub fn sender(&self) -> Sender<SessionMsg> {
        self.inbox.clone()
    }

    /// Enqueue one inbound envelope.
    pub fn submit(&self, envelope: InboundEnvelope) {
        if self.inbox.send(SessionMsg::Inbound(envelope)).is_err() {
            tracing::warn!("session actor is gone; inbound envelope dropped");
        }
    }

    /// Request shutdown and wait for the actor to exit.
    pub fn shutdown(self) {
        // Drop does the work.
    }
}

impl Drop for SessionRuntime {
    fn drop(&mut self) {
        let _ = self.inbox.send(SessionMsg::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_loop<F>(mut session: Session, rx: &Receiver<SessionMsg>, mut outbound: F)
where
    F: FnMut(OutboundEnvelope),
{
    let mut deadlines = Deadlines::default();
    loop {
        for kind in deadlines.take_due(Instant::now()) {
            let mut host = LoopHost {
                outbound: &mut outbound,
                deadlines: &mut deadlines,
            };
            session.handle_timer(&mut host, kind);
        }

        let received = match deadlines.next() {
            Some(deadline) => {
                let timeout = deadline.saturating_duration_since(Instant::now());
                match rx.recv_timeout(timeout) {
                    Ok(msg) => Some(msg),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(msg) => Some(msg),
                Err(_) => break,
            },
        };

        let Some(msg) = received else {
            continue;
        };
        let mut host = LoopHost {
            outbound: &mut outbound,
            deadlines: &mut deadlines,
        };
        match msg {
            SessionMsg::Inbound(envelope) => session.handle_envelope(&mut host, envelope),
            SessionMsg::Timer(kind) => session.handle_timer(&mut host, kind),
            SessionMsg::Shutdown => {
                session.shutdown(&mut host);
                return;
            }
        }
    }

    // Inbox disconnected: tear down without a shutdown message.
    let mut host = LoopHost {
        outbound: &mut outbound,
        deadlines: &mut deadlines,
    };
    session.shutdown(&mut host);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ScreenRegistry;
    use crate::screen::{Screen, ScreenState};
    use crate::session::{SessionConfig, SessionSpec};
    use crate::subscriptions::noop_hook;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    struct Counter;

    impl Screen for Counter {
        fn schema(&self) -> BTreeMap<String, Value> {
            BTreeMap::from([("count".to_owned(), json!(0))])
        }

        fn handle_event(
            &self,
            name: &str,
            _payload: &Value,
            mut state: ScreenState,
        ) -> projection_error::Result<ScreenState> {
            if name == "bump" {
                state.update("count", |old| {
                    json!(old.and_then(Value::as_i64).unwrap_or(0) + 1)
                });
            }
            Ok(state)
        }

        fn handle_info(
            &self,
            message: &Value,
            mut state: ScreenState,
        ) -> projection_error::Result<ScreenState> {
            if message == "tick" {
                state.update("count", |old| {
                    json!(old.and_then(Value::as_i64).unwrap_or(0) + 10)
                });
            }
            Ok(state)
        }
    }

    fn start_session(config: SessionConfig) -> Session {
        let mut registry = ScreenRegistry::new();
        registry.register("counter", Arc::new(Counter));
        Session::start(
            config,
            SessionSpec::Screen {
                screen: "counter".to_owned(),
                params: json!({}),
                screen_session: "main".to_owned(),
            },
            Arc::new(registry),
            noop_hook(),
        )
        .expect("session starts")
    }

    fn recv(outbound: &Receiver<OutboundEnvelope>) -> OutboundEnvelope {
        outbound
            .recv_timeout(Duration::from_secs(2))
            .expect("outbound envelope within deadline")
    }

    #[test]
    fn ready_then_intent_round_trip() {
        let session = start_session(SessionConfig {
            batch_window: Duration::ZERO,
            ..SessionConfig::default()
        });
        let (tx, outbound) = mpsc::channel();
        let runtime = SessionRuntime::spawn(session, move |envelope| {
            let _ = tx.send(envelope);
        })
        .expect("spawn runtime");

        runtime.submit(InboundEnvelope::Ready {
            sid: "S1".to_owned(),
            capabilities: None,
        });
        match recv(&outbound) {
            OutboundEnvelope::Render { sid, rev, vm, .. } => {
                assert_eq!(sid, "S1");
                assert_eq!(rev, 1);
                assert_eq!(vm["count"], 0);
            }
            other => panic!("expected render, got {other:?}"),
        }

        runtime.submit(InboundEnvelope::Intent {
            sid: Some("S1".to_owned()),
            name: "bump".to_owned(),
            id: Some(json!(1)),
            payload: None,
        });
        match recv(&outbound) {
            OutboundEnvelope::Patch { rev, ops, ack, .. } => {
                assert_eq!(rev, 2);
                assert_eq!(ack, Some(1));
                assert_eq!(ops.len(), 1);
                assert_eq!(ops[0].path(), "/count");
            }
            other => panic!("expected patch, got {other:?}"),
        }

        runtime.shutdown();
    }

    #[test]
    fn flush_timer_fires_without_manual_injection() {
        let session = start_session(SessionConfig {
            batch_window: Duration::from_millis(25),
            ..SessionConfig::default()
        });
        let (tx, outbound) = mpsc::channel();
        let runtime = SessionRuntime::spawn(session, move |envelope| {
            let _ = tx.send(envelope);
        })
        .expect("spawn runtime");

        runtime.submit(InboundEnvelope::Ready {
            sid: "S1".to_owned(),
            capabilities: None,
        });
        assert!(matches!(recv(&outbound), OutboundEnvelope::Render { .. }));

        runtime.submit(InboundEnvelope::Intent {
            sid: Some("S1".to_owned()),
            name: "bump".to_owned(),
            id: Some(json!(7)),
            payload: None,
        });
        match recv(&outbound) {
            OutboundEnvelope::Patch { rev, ack, .. } => {
                assert_eq!(rev, 2);
                assert_eq!(ack, Some(7));
            }
            other => panic!("expected patch, got {other:?}"),
        }

        runtime.shutdown();
    }

    #[test]
    fn tick_timer_rearms_and_patches() {
        let session = start_session(SessionConfig {
            batch_window: Duration::ZERO,
            tick_period: Some(Duration::from_millis(15)),
            ..SessionConfig::default()
        });
        let (tx, outbound) = mpsc::channel();
        let runtime = SessionRuntime::spawn(session, move |envelope| {
            let _ = tx.send(envelope);
        })
        .expect("spawn runtime");

        runtime.submit(InboundEnvelope::Ready {
            sid: "S1".to_owned(),
            capabilities: None,
        });
        assert!(matches!(recv(&outbound), OutboundEnvelope::Render { .. }));

        // Two consecutive tick-driven patches prove the timer re-arms.
        match recv(&outbound) {
            OutboundEnvelope::Patch { rev, ack, .. } => {
                assert_eq!(rev, 2);
                assert_eq!(ack, None);
            }
            other => panic!("expected first tick patch, got {other:?}"),
        }
        match recv(&outbound) {
            OutboundEnvelope::Patch { rev, .. } => assert_eq!(rev, 3),
            other => panic!("expected second tick patch, got {other:?}"),
        }

        runtime.shutdown();
    }
}
