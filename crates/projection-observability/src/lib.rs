//! Session telemetry for Projection.
//!
//! Four emission points, mirrored as global counters plus structured
//! `tracing` events: `intent.received`, `render.complete`, `patch.sent`,
//! and `error`. Counters are process-wide atomics so multi-session
//! deployments aggregate for free; the snapshot is serializable for
//! diagnostic dumps. Measurements and metadata are opaque to the transport
//! layer — nothing here feeds back into session behavior.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

static INTENTS_RECEIVED_TOTAL: AtomicU64 = AtomicU64::new(0);
static RENDERS_OK_TOTAL: AtomicU64 = AtomicU64::new(0);
static RENDERS_ERROR_TOTAL: AtomicU64 = AtomicU64::new(0);
static RENDER_DURATION_US_TOTAL: AtomicU64 = AtomicU64::new(0);
static PATCHES_SENT_TOTAL: AtomicU64 = AtomicU64::new(0);
static PATCH_OPS_SENT_TOTAL: AtomicU64 = AtomicU64::new(0);
static ERRORS_TOTAL: AtomicU64 = AtomicU64::new(0);

/// Render outcome attached to `render.complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    Ok,
    Error,
}

impl RenderStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

/// Record an inbound intent delivery.
pub fn record_intent_received(
    sid: Option<&str>,
    rev: u64,
    screen: &str,
    intent: &str,
    ack: Option<u64>,
) {
    INTENTS_RECEIVED_TOTAL.fetch_add(1, Ordering::Relaxed);
    tracing::debug!(
        target: "projection.intent_received",
        sid,
        rev,
        screen,
        intent,
        ack,
        "intent received"
    );
}

/// Record a completed render pass and its duration.
pub fn record_render_complete(duration: Duration, status: RenderStatus) {
    let duration_us = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
    RENDER_DURATION_US_TOTAL.fetch_add(duration_us, Ordering::Relaxed);
    match status {
        RenderStatus::Ok => RENDERS_OK_TOTAL.fetch_add(1, Ordering::Relaxed),
        RenderStatus::Error => RENDERS_ERROR_TOTAL.fetch_add(1, Ordering::Relaxed),
    };
    tracing::debug!(
        target: "projection.render_complete",
        duration_us,
        status = status.as_str(),
        "render complete"
    );
}

/// Record an outbound patch emission.
pub fn record_patch_sent(op_count: usize, ack: Option<u64>) {
    PATCHES_SENT_TOTAL.fetch_add(1, Ordering::Relaxed);
    PATCH_OPS_SENT_TOTAL.fetch_add(op_count as u64, Ordering::Relaxed);
    tracing::debug!(
        target: "projection.patch_sent",
        op_count,
        ack,
        "patch sent"
    );
}

/// Record a session-level fault (e.g. `render_exception`).
pub fn record_error(kind: &str, message: &str, screen: &str) {
    ERRORS_TOTAL.fetch_add(1, Ordering::Relaxed);
    tracing::error!(
        target: "projection.error",
        kind,
        message,
        screen,
        "session error"
    );
}

/// Point-in-time view of the telemetry counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TelemetrySnapshot {
    pub intents_received_total: u64,
    pub renders_ok_total: u64,
    pub renders_error_total: u64,
    pub render_duration_us_total: u64,
    pub patches_sent_total: u64,
    pub patch_ops_sent_total: u64,
    pub errors_total: u64,
}

impl TelemetrySnapshot {
    /// Mean render duration in microseconds across both outcomes.
    #[must_use]
    pub fn avg_render_duration_us(&self) -> u64 {
        let renders = self.renders_ok_total + self.renders_error_total;
        if renders == 0 {
            return 0;
        }
        self.render_duration_us_total / renders
    }
}

/// Read a point-in-time snapshot of all counters.
#[must_use]
pub fn snapshot() -> TelemetrySnapshot {
    TelemetrySnapshot {
        intents_received_total: INTENTS_RECEIVED_TOTAL.load(Ordering::Relaxed),
        renders_ok_total: RENDERS_OK_TOTAL.load(Ordering::Relaxed),
        renders_error_total: RENDERS_ERROR_TOTAL.load(Ordering::Relaxed),
        render_duration_us_total: RENDER_DURATION_US_TOTAL.load(Ordering::Relaxed),
        patches_sent_total: PATCHES_SENT_TOTAL.load(Ordering::Relaxed),
        patch_ops_sent_total: PATCH_OPS_SENT_TOTAL.load(Ordering::Relaxed),
        errors_total: ERRORS_TOTAL.load(Ordering::Relaxed),
    }
}

/// Reset all counters to zero (tests/diagnostics).
pub fn reset() {
    INTENTS_RECEIVED_TOTAL.store(0, Ordering::Relaxed);
    RENDERS_OK_TOTAL.store(0, Ordering::Relaxed);
    RENDERS_ERROR_TOTAL.store(0, Ordering::Relaxed);
    RENDER_DURATION_US_TOTAL.store(0, Ordering::Relaxed);
    PATCHES_SENT_TOTAL.store(0, Ordering::Relaxed);
    PATCH_OPS_SENT_TOTAL.store(0, Ordering::Relaxed);
    ERRORS_TOTAL.store(0, Ordering::Relaxed);
}
