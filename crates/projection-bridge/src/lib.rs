//! Framed transport bridge to the renderer child process.
//!
//! The bridge owns the renderer's process lifecycle: it spawns the child,
//! frames stdio in both directions, and restarts the child with bounded
//! exponential backoff when the pipe breaks. The session core stays
//! oblivious: decoded inbound envelopes flow through a callback, outbound
//! envelopes through a channel sender.
//!
//! Decode-side failures never reach the session. The bridge answers them on
//! the wire with a protocol `error` envelope and, for resync-forcing codes,
//! synthesizes a local `ready` so the session re-renders even if the
//! renderer's own `ready` got lost with the bad frame.

pub mod frame;

use std::io::Read;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use projection_core::codec;
use projection_error::{Direction, ProjectionError, Result};
use projection_types::{
    InboundEnvelope, OutboundEnvelope, INBOUND_FRAME_CAP, OUTBOUND_FRAME_CAP,
};

/// Child process and reconnect tunables.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Renderer executable.
    pub command: String,
    /// Arguments passed to the renderer.
    pub args: Vec<String>,
    /// First reconnect delay; doubles per consecutive failure.
    pub initial_backoff: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
    /// Consecutive reconnect attempts before the bridge gives up.
    pub max_attempts: u32,
}

impl BridgeConfig {
    /// Config with the default reconnect policy (250ms doubling, 8s cap,
    /// 8 attempts).
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(8),
            max_attempts: 8,
        }
    }

    /// Clamp nonsensical values.
    #[must_use]
    pub fn validated(mut self) -> Self {
        if self.initial_backoff.is_zero() {
            self.initial_backoff = Duration::from_millis(1);
        }
        if self.max_backoff < self.initial_backoff {
            self.max_backoff = self.initial_backoff;
        }
        if self.max_attempts == 0 {
            self.max_attempts = 1;
        }
        self
    }
}

/// Delay before reconnect attempt `attempt` (1-based): doubling from the
/// initial backoff, capped.
#[must_use]
pub fn backoff_delay(config: &BridgeConfig, attempt: u32) -> Duration {
    let doublings = attempt.saturating_sub(1).min(16);
    let delay = config
        .initial_backoff
        .saturating_mul(1_u32 << doublings);
    delay.min(config.max_backoff)
}

/// Handle to a running bridge.
///
/// Dropping the handle stops the supervisor, kills the child, and joins the
/// pump threads.
pub struct RendererBridge {
    outbound_tx: Sender<OutboundEnvelope>,
    stop: Arc<AtomicBool>,
    child_slot: Arc<Mutex<Option<Child>>>,
    supervisor: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl RendererBridge {
    /// Spawn the renderer child process and the stdio pump threads.
    ///
    /// `on_inbound` runs on the bridge's reader thread for every decoded
    /// envelope; forward into the session runtime's inbox from there.
    pub fn spawn<F>(config: BridgeConfig, on_inbound: F) -> Result<Self>
    where
        F: FnMut(InboundEnvelope) + Send + 'static,
    {
        let config = config.validated();
        let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundEnvelope>();
        let stop = Arc::new(AtomicBool::new(false));
        let child_slot: Arc<Mutex<Option<Child>>> = Arc::new(Mutex::new(None));
        let sink: Arc<Mutex<Option<ChildStdin>>> = Arc::new(Mutex::new(None));

        let writer = std::thread::Builder::new()
            .name("projection-bridge-writer".to_owned())
            .spawn({
                let sink = sink.clone();
                let stop = stop.clone();
                move || writer_loop(&outbound_rx, &sink, &stop)
            })?;

        let supervisor = std::thread::Builder::new()
            .name("projection-bridge-supervisor".to_owned())
            .spawn({
                let stop = stop.clone();
                let child_slot = child_slot.clone();
                let error_tx = outbound_tx.clone();
                move || supervisor_loop(&config, &stop, &child_slot, &sink, &error_tx, on_inbound)
            })?;

        Ok(Self {
            outbound_tx,
            stop,
            child_slot,
            supervisor: Some(supervisor),
            writer: Some(writer),
        })
    }

    /// Cloneable sender for outbound envelopes.
    #[must_use]
    pub fn sender(&self) -> Sender<OutboundEnvelope> {
        self.outbound_tx.clone()
    }

    /// Queue one outbound envelope.
    pub fn send(&self, envelope: OutboundEnvelope) {
        if self.outbound_tx.send(envelope).is_err() {
            tracing::warn!("bridge writer is gone; outbound envelope dropped");
        }
    }

    /// Stop the bridge and wait for its threads.
    pub fn shutdown(self) {
        // Drop does the work.
    }
}

impl Drop for RendererBridge {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Ok(mut slot) = self.child_slot.lock() {
            if let Some(child) = slot.as_mut() {
                let _ = child.kill();
            }
        }
        if let Some(handle) = self.supervisor.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.writer.take() {
            let _ = handle.join();
        }
    }
}

fn writer_loop(
    outbound_rx: &Receiver<OutboundEnvelope>,
    sink: &Mutex<Option<ChildStdin>>,
    stop: &AtomicBool,
) {
    loop {
        let envelope = match outbound_rx.recv_timeout(Duration::from_millis(200)) {
            Ok(envelope) => envelope,
            Err(RecvTimeoutError::Timeout) => {
                if stop.load(Ordering::Acquire) {
                    return;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => return,
        };
        if stop.load(Ordering::Acquire) {
            return;
        }
        let bytes = match codec::encode_outbound(&envelope) {
            Ok(bytes) => bytes,
            Err(err) => {
                // Encode failures drop the envelope; the next resync-driven
                // render carries the missed state.
                tracing::warn!(%err, "outbound envelope dropped");
                continue;
            }
        };
        let Ok(mut guard) = sink.lock() else {
            tracing::warn!("bridge sink poisoned; outbound envelope dropped");
            continue;
        };
        let Some(stdin) = guard.as_mut() else {
            tracing::debug!("renderer not running; outbound envelope dropped");
            continue;
        };
        if let Err(err) = frame::write_frame(stdin, &bytes, Direction::Outbound, OUTBOUND_FRAME_CAP)
        {
            tracing::warn!(%err, "frame write failed; waiting for reconnect");
            *guard = None;
        }
    }
}

fn supervisor_loop<F>(
    config: &BridgeConfig,
    stop: &AtomicBool,
    child_slot: &Mutex<Option<Child>>,
    sink: &Mutex<Option<ChildStdin>>,
    error_tx: &Sender<OutboundEnvelope>,
    mut on_inbound: F,
) where
    F: FnMut(InboundEnvelope),
{
    let mut attempt: u32 = 0;
    let mut last_sid: Option<String> = None;

    while !stop.load(Ordering::Acquire) {
        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        match command.spawn() {
            Ok(mut child) => {
                let stdin = child.stdin.take();
                let stdout = child.stdout.take();
                if let Ok(mut guard) = sink.lock() {
                    *guard = stdin;
                }
                if let Ok(mut slot) = child_slot.lock() {
                    *slot = Some(child);
                }
                tracing::info!(command = %config.command, "renderer child started");

                if let Some(stdout) = stdout {
                    read_until_closed(stdout, error_tx, &mut last_sid, &mut attempt, &mut on_inbound);
                }

                if let Ok(mut guard) = sink.lock() {
                    *guard = None;
                }
                if let Ok(mut slot) = child_slot.lock() {
                    if let Some(mut child) = slot.take() {
                        let _ = child.kill();
                        let _ = child.wait();
                    }
                }
            }
            Err(err) => {
                tracing::warn!(command = %config.command, %err, "renderer spawn failed");
            }
        }

        if stop.load(Ordering::Acquire) {
            return;
        }
        attempt += 1;
        if attempt >= config.max_attempts {
            tracing::error!(attempts = attempt, "reconnect budget exhausted; bridge giving up");
            return;
        }
        let delay = backoff_delay(config, attempt);
        tracing::info!(attempt, ?delay, "renderer connection lost; reconnecting");
        interruptible_sleep(delay, stop);
    }
}

fn interruptible_sleep(duration: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + duration;
    loop {
        if stop.load(Ordering::Acquire) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(50)));
    }
}

fn read_until_closed<F>(
    mut stdout: impl Read,
    error_tx: &Sender<OutboundEnvelope>,
    last_sid: &mut Option<String>,
    attempt: &mut u32,
    on_inbound: &mut F,
) where
    F: FnMut(InboundEnvelope),
{
    loop {
        let payload = match frame::read_frame(&mut stdout, Direction::Inbound, INBOUND_FRAME_CAP) {
            Ok(payload) => payload,
            Err(err @ ProjectionError::FrameTooLarge { .. }) => {
                // Past an oversized header the stream offset is garbage;
                // report the frame and let the reconnect resync.
                tracing::warn!(%err, "inbound frame rejected; dropping the connection");
                let _ = error_tx.send(OutboundEnvelope::Error {
                    sid: last_sid.clone().unwrap_or_default(),
                    rev: None,
                    code: err.wire_code().to_owned(),
                    message: err.to_string(),
                });
                return;
            }
            Err(err) => {
                tracing::debug!(%err, "renderer stream closed");
                return;
            }
        };
        match codec::decode_inbound(&payload) {
            Ok(envelope) => {
                if let InboundEnvelope::Ready { sid, .. } = &envelope {
                    *last_sid = Some(sid.clone());
                }
                // A healthy frame resets the reconnect budget.
                *attempt = 0;
                on_inbound(envelope);
            }
            Err(err) => {
                tracing::warn!(%err, "inbound frame rejected");
                let _ = error_tx.send(OutboundEnvelope::Error {
                    sid: last_sid.clone().unwrap_or_default(),
                    rev: None,
                    code: err.wire_code().to_owned(),
                    message: err.to_string(),
                });
                if err.forces_resync() {
                    if let Some(sid) = last_sid.clone() {
                        on_inbound(InboundEnvelope::Ready {
                            sid,
                            capabilities: None,
                        });
                    }
                }
            }
        }
    }
}
