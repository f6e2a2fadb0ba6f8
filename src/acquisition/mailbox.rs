use crate::frame::Frame;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Single-slot, latest-wins hand-off of published frames.
///
/// Publishing never blocks on readers: a new frame replaces whatever is in
/// the slot, so a slow reader only ever sees the most recent one.
#[derive(Debug, Default)]
pub struct FrameMailbox {
    slot: Mutex<Option<Arc<Frame>>>,
    published: Condvar,
}

impl FrameMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frame: Arc<Frame>) {
        *self.slot.lock() = Some(frame);
        self.published.notify_all();
    }

    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.slot.lock().clone()
    }

    /// The latest frame if it is newer than `after_seq`.
    pub fn newer_than(&self, after_seq: u64) -> Option<Arc<Frame>> {
        self.slot
            .lock()
            .as_ref()
            .filter(|f| f.seq > after_seq)
            .cloned()
    }

    /// Block until a frame newer than `after_seq` is published or `timeout`
    /// elapses.
    pub fn wait_newer(&self, after_seq: u64, timeout: Duration) -> Option<Arc<Frame>> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        loop {
            if let Some(frame) = slot.as_ref().filter(|f| f.seq > after_seq) {
                return Some(Arc::clone(frame));
            }
            if self.published.wait_until(&mut slot, deadline).timed_out() {
                return slot.as_ref().filter(|f| f.seq > after_seq).cloned();
            }
        }
    }
}
