//! Coalescing patch batcher.
//!
//! Bursts of patch ops are amortized into one outbound envelope per flush
//! window, the same way a write-ahead log groups commits: flush when the
//! batch is full or when the window elapses, whichever comes first. Within
//! a batch the latest op per path wins, keeping the position of the path's
//! first occurrence, and the acknowledgement token is the newest one seen.
//!
//! The batcher never owns a timer; it reports a [`FlushDisposition`] and
//! the session translates that into host effects.

use std::collections::HashMap;
use std::time::Duration;

use projection_types::PatchOp;

/// Batching knobs.
#[derive(Debug, Clone, Copy)]
pub struct BatcherConfig {
    /// Time window to wait for more ops before flushing. Zero disables
    /// batching entirely (every enqueue flushes).
    pub batch_window: Duration,
    /// Op-count ceiling that forces an immediate flush.
    pub max_pending_ops: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch_window: Duration::from_millis(120),
            max_pending_ops: 64,
        }
    }
}

impl BatcherConfig {
    /// Clamp nonsensical values.
    #[must_use]
    pub fn validated(mut self) -> Self {
        if self.max_pending_ops == 0 {
            self.max_pending_ops = 1;
        }
        self
    }
}

/// What the caller should do after an [`PatchBatcher::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushDisposition {
    /// Nothing pending; cancel any scheduled flush.
    Drained,
    /// Flush immediately (window is zero or the batch is full).
    FlushNow,
    /// Schedule a one-shot flush after the window.
    ArmTimer(Duration),
    /// A flush is already scheduled; keep it.
    TimerAlreadyArmed,
}

/// Pending coalesced ops plus the newest ack token.
#[derive(Debug)]
pub struct PatchBatcher {
    config: BatcherConfig,
    pending: Vec<PatchOp>,
    by_path: HashMap<String, usize>,
    pending_ack: Option<u64>,
    timer_armed: bool,
}

impl PatchBatcher {
    #[must_use]
    pub fn new(config: BatcherConfig) -> Self {
        Self {
            config: config.validated(),
            pending: Vec::new(),
            by_path: HashMap::new(),
            pending_ack: None,
            timer_armed: false,
        }
    }

    /// Number of distinct pending paths.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    #[must_use]
    pub fn pending_ack(&self) -> Option<u64> {
        self.pending_ack
    }

    /// Append ops, coalesce by path, merge the ack, and decide the flush
    /// disposition.
    pub fn enqueue(&mut self, ops: Vec<PatchOp>, ack: Option<u64>) -> FlushDisposition {
        for op in ops {
            match self.by_path.get(op.path()) {
                Some(&pos) => self.pending[pos] = op,
                None => {
                    self.by_path.insert(op.path().to_owned(), self.pending.len());
                    self.pending.push(op);
                }
            }
        }
        self.pending_ack = merge_ack(self.pending_ack, ack);

        if self.pending.is_empty() {
            self.pending_ack = None;
            self.timer_armed = false;
            return FlushDisposition::Drained;
        }
        if self.config.batch_window.is_zero() || self.pending.len() >= self.config.max_pending_ops {
            return FlushDisposition::FlushNow;
        }
        if self.timer_armed {
            return FlushDisposition::TimerAlreadyArmed;
        }
        self.timer_armed = true;
        FlushDisposition::ArmTimer(self.config.batch_window)
    }

    /// Drain the batch for emission.
    pub fn take(&mut self) -> (Vec<PatchOp>, Option<u64>) {
        self.by_path.clear();
        self.timer_armed = false;
        (std::mem::take(&mut self.pending), self.pending_ack.take())
    }

    /// Discard everything without emission (e.g. on `ready`). Returns how
    /// many ops were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        self.by_path.clear();
        self.pending_ack = None;
        self.timer_armed = false;
        dropped
    }
}

/// Newest-wins ack merge: max of both when both are present.
fn merge_ack(old: Option<u64>, new: Option<u64>) -> Option<u64> {
    match (old, new) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn replace(path: &str, value: serde_json::Value) -> PatchOp {
        PatchOp::Replace {
            path: path.to_owned(),
            value,
        }
    }

    #[test]
    fn coalesces_latest_value_at_first_position() {
        let mut batcher = PatchBatcher::new(BatcherConfig::default());
        batcher.enqueue(
            vec![replace("/a", json!(1)), replace("/b", json!(1))],
            Some(1),
        );
        batcher.enqueue(
            vec![replace("/a", json!(2)), replace("/c", json!(1))],
            Some(2),
        );

        let (ops, ack) = batcher.take();
        assert_eq!(
            ops,
            vec![
                replace("/a", json!(2)),
                replace("/b", json!(1)),
                replace("/c", json!(1)),
            ]
        );
        assert_eq!(ack, Some(2));
    }

    #[test]
    fn ack_merge_keeps_the_newest() {
        assert_eq!(merge_ack(None, None), None);
        assert_eq!(merge_ack(Some(3), None), Some(3));
        assert_eq!(merge_ack(None, Some(4)), Some(4));
        assert_eq!(merge_ack(Some(9), Some(4)), Some(9));
    }

    #[test]
    fn zero_window_flushes_immediately() {
        let mut batcher = PatchBatcher::new(BatcherConfig {
            batch_window: Duration::ZERO,
            max_pending_ops: 64,
        });
        let disposition = batcher.enqueue(vec![replace("/a", json!(1))], None);
        assert_eq!(disposition, FlushDisposition::FlushNow);
    }

    #[test]
    fn full_batch_flushes_immediately() {
        let mut batcher = PatchBatcher::new(BatcherConfig {
            batch_window: Duration::from_millis(120),
            max_pending_ops: 2,
        });
        assert_eq!(
            batcher.enqueue(vec![replace("/a", json!(1))], None),
            FlushDisposition::ArmTimer(Duration::from_millis(120))
        );
        assert_eq!(
            batcher.enqueue(vec![replace("/b", json!(1))], None),
            FlushDisposition::FlushNow
        );
    }

    #[test]
    fn second_enqueue_keeps_the_existing_timer() {
        let mut batcher = PatchBatcher::new(BatcherConfig::default());
        assert!(matches!(
            batcher.enqueue(vec![replace("/a", json!(1))], None),
            FlushDisposition::ArmTimer(_)
        ));
        assert_eq!(
            batcher.enqueue(vec![replace("/a", json!(2))], None),
            FlushDisposition::TimerAlreadyArmed
        );
    }

    #[test]
    fn empty_enqueue_on_empty_batch_drains() {
        let mut batcher = PatchBatcher::new(BatcherConfig::default());
        assert_eq!(batcher.enqueue(Vec::new(), Some(5)), FlushDisposition::Drained);
        assert_eq!(batcher.pending_ack(), None);
    }

    #[test]
    fn clear_discards_ops_and_ack() {
        let mut batcher = PatchBatcher::new(BatcherConfig::default());
        batcher.enqueue(vec![replace("/a", json!(1))], Some(7));
        assert_eq!(batcher.clear(), 1);
        assert!(batcher.is_empty());
        assert_eq!(batcher.pending_ack(), None);
        // Timer flag was reset, so the next enqueue arms a fresh one.
        assert!(matches!(
            batcher.enqueue(vec![replace("/a", json!(1))], None),
            FlushDisposition::ArmTimer(_)
        ));
    }

    #[test]
    fn take_resets_for_the_next_batch() {
        let mut batcher = PatchBatcher::new(BatcherConfig::default());
        batcher.enqueue(vec![replace("/a", json!(1))], Some(1));
        let (ops, ack) = batcher.take();
        assert_eq!(ops.len(), 1);
        assert_eq!(ack, Some(1));
        assert!(batcher.is_empty());
        assert_eq!(batcher.pending_ack(), None);
        assert!(matches!(
            batcher.enqueue(vec![replace("/a", json!(2))], None),
            FlushDisposition::ArmTimer(_)
        ));
    }

    proptest! {
        #[test]
        fn no_two_pending_ops_share_a_path(
            paths in proptest::collection::vec("/[a-c]", 0..24),
        ) {
            let mut batcher = PatchBatcher::new(BatcherConfig::default());
            for (i, path) in paths.iter().enumerate() {
                batcher.enqueue(vec![replace(path, json!(i))], None);
            }
            let (ops, _) = batcher.take();
            let mut seen = std::collections::HashSet::new();
            for op in &ops {
                prop_assert!(seen.insert(op.path().to_owned()));
            }
        }
    }
}
