//! Bridge tests against real child processes (POSIX `sh`).

#![cfg(unix)]

use std::io::Write;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use projection_bridge::{frame, BridgeConfig, RendererBridge};
use projection_error::Direction;
use projection_types::{InboundEnvelope, OutboundEnvelope, INBOUND_FRAME_CAP};
use serde_json::json;

fn one_shot_config(script: &str) -> BridgeConfig {
    let mut config = BridgeConfig::new("sh");
    config.args = vec!["-c".to_owned(), script.to_owned()];
    // One connection only; no respawn churn inside tests.
    config.max_attempts = 1;
    config.initial_backoff = Duration::from_millis(10);
    config
}

fn frame_file(payload: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("create frame file");
    let mut bytes = Vec::new();
    frame::write_frame(&mut bytes, payload, Direction::Inbound, INBOUND_FRAME_CAP)
        .expect("frame payload");
    file.write_all(&bytes).expect("write frame file");
    file.flush().expect("flush frame file");
    file
}

#[test]
fn inbound_frames_reach_the_callback() {
    let file = frame_file(br#"{"t":"ready","sid":"S1"}"#);
    let script = format!("cat {}; sleep 0.3", file.path().display());

    let (tx, rx) = mpsc::channel();
    let bridge = RendererBridge::spawn(one_shot_config(&script), move |envelope| {
        let _ = tx.send(envelope);
    })
    .expect("spawn bridge");

    let envelope = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("inbound envelope");
    match envelope {
        InboundEnvelope::Ready { sid, .. } => assert_eq!(sid, "S1"),
        other => panic!("expected ready, got {other:?}"),
    }

    bridge.shutdown();
}

#[test]
fn undecodable_frame_is_answered_and_forces_resync() {
    let ready = frame_file(br#"{"t":"ready","sid":"S1"}"#);
    let junk = frame_file(b"{not json");
    let script = format!(
        "cat {} {}; sleep 0.3",
        ready.path().display(),
        junk.path().display()
    );

    let (tx, rx) = mpsc::channel();
    let bridge = RendererBridge::spawn(one_shot_config(&script), move |envelope| {
        let _ = tx.send(envelope);
    })
    .expect("spawn bridge");

    // First the renderer's own ready, then the synthetic one triggered by
    // the junk frame.
    for expected in ["real", "synthetic"] {
        let envelope = rx
            .recv_timeout(Duration::from_secs(5))
            .unwrap_or_else(|err| panic!("missing {expected} ready: {err}"));
        match envelope {
            InboundEnvelope::Ready { sid, .. } => assert_eq!(sid, "S1"),
            other => panic!("expected {expected} ready, got {other:?}"),
        }
    }

    bridge.shutdown();
}

#[test]
fn outbound_envelopes_are_framed_to_the_child() {
    let out = tempfile::NamedTempFile::new().expect("create sink file");
    let script = format!("cat > {}", out.path().display());

    let bridge = RendererBridge::spawn(one_shot_config(&script), |_| {}).expect("spawn bridge");
    // Envelopes sent before the child is up are dropped by design; give the
    // supervisor a moment to wire the child's stdin.
    std::thread::sleep(Duration::from_millis(250));
    bridge.send(OutboundEnvelope::Render {
        sid: "S1".to_owned(),
        rev: 1,
        vm: json!({"clock_label": "12:00"}),
        ack: None,
    });

    // Poll the sink until the frame lands (writer thread + cat are async).
    let deadline = Instant::now() + Duration::from_secs(5);
    let written = loop {
        let written = std::fs::read(out.path()).expect("read sink file");
        if written.len() > 4 {
            break written;
        }
        assert!(Instant::now() < deadline, "frame never reached the child");
        std::thread::sleep(Duration::from_millis(20));
    };

    let len = u32::from_be_bytes(written[0..4].try_into().expect("length header")) as usize;
    assert_eq!(written.len(), 4 + len);
    let value: serde_json::Value = serde_json::from_slice(&written[4..]).expect("payload json");
    assert_eq!(value["t"], "render");
    assert_eq!(value["rev"], 1);

    bridge.shutdown();
}
