//! Projection session core.
//!
//! Authoritative UI state lives here, server-side: the session receives
//! `ready`/`intent` envelopes from a stateless renderer, drives a pluggable
//! screen-controller stack through a router with navigation-stack
//! semantics, re-renders a structured view-model, computes minimal RFC 6902
//! patches against the previous snapshot, and coalesces them into batched
//! envelopes with monotonic revisions and acknowledgement tracking.
//!
//! Component layering, leaves first: [`pointer`] and [`codec`] at the wire
//! edge, [`diff`] over the view-model, [`screen`]/[`dispatch`] for the
//! controller contract, [`router`] for navigation, [`subscriptions`] and
//! [`batcher`] as session collaborators, [`session`] orchestrating the
//! pipeline, and [`runtime`] hosting it as a single-threaded actor.

pub mod batcher;
pub mod codec;
pub mod diff;
pub mod dispatch;
pub mod pointer;
pub mod router;
pub mod runtime;
pub mod screen;
pub mod session;
pub mod subscriptions;

pub use batcher::{BatcherConfig, FlushDisposition, PatchBatcher};
pub use dispatch::{ScreenRegistry, ParamsDispatch};
pub use router::{NavEntry, NavState, Router};
pub use runtime::{SessionMsg, SessionRuntime};
pub use screen::{ParamsHook, Screen, ScreenState};
pub use session::{
    Session, SessionConfig, SessionHost, SessionSpec, TimerKind, INTENT_BACK, INTENT_NAVIGATE,
    INTENT_ROUTE_PATCH,
};
pub use subscriptions::{noop_hook, SubscriptionAction, SubscriptionHook, SubscriptionSet};
