//! Latest-frame buffer
//!
//! Single-slot hand-off between one producer and any number of readers.
//! The producer overwrites the slot on every publish and never waits for
//! readers; a reader that fell behind jumps straight to the newest frame.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

use super::frame::Frame;

#[derive(Default)]
struct Slot {
    frame: Option<Frame>,
    version: u64,
}

/// Holds at most one frame plus a monotonically increasing version
#[derive(Default)]
pub struct LatestFrameBuffer {
    slot: Mutex<Slot>,
    notify: Notify,
}

impl LatestFrameBuffer {
    /// Create an empty buffer (version 0, no frame)
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored frame and wake every waiting reader.
    ///
    /// Returns the version assigned to the frame. Safe to call from any
    /// thread, inside or outside a tokio runtime.
    pub fn publish(&self, mut frame: Frame) -> u64 {
        let version = {
            let mut slot = self.slot.lock();
            slot.version += 1;
            frame.version = slot.version;
            slot.frame = Some(frame);
            slot.version
        };
        self.notify.notify_waiters();
        version
    }

    /// Current frame, if anything has been published
    pub fn latest(&self) -> Option<Frame> {
        self.slot.lock().frame.clone()
    }

    /// Current version (0 before the first publish)
    pub fn version(&self) -> u64 {
        self.slot.lock().version
    }

    fn newer_than(&self, last_version: u64) -> Option<Frame> {
        let slot = self.slot.lock();
        if slot.version > last_version {
            slot.frame.clone()
        } else {
            None
        }
    }

    /// Wait until a frame newer than `last_version` exists.
    ///
    /// Returns the frame current at wake-up (its `version` is strictly
    /// greater than `last_version`), or `None` once `timeout` elapses.
    pub async fn wait_next(&self, last_version: u64, timeout: Duration) -> Option<Frame> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before looking at the slot so a publish
            // landing between the check and the await still wakes us.
            notified.as_mut().enable();

            if let Some(frame) = self.newer_than(last_version) {
                return Some(frame);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }
}
