//! Single-slot frame hand-off between the capture side and the recorder.
//!
//! The slot holds at most the latest published frame: a publish overwrites an
//! unread predecessor (at-most-latest delivery, not at-least-once). The condvar
//! doubles as the recorder's wake-up point, so control-plane changes can nudge a
//! pending wait without publishing anything.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::frame::FrameBuffer;

#[derive(Default)]
struct Slot {
    frame: Option<FrameBuffer>,
    nudged: bool,
}

pub struct FrameMailbox {
    slot: Mutex<Slot>,
    available: Condvar,
}

impl FrameMailbox {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        // A panicked peer must not take the recorder down with it.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publishes a frame, displacing any unread one. Returns `true` when an
    /// unread frame was overwritten.
    pub fn publish(&self, frame: FrameBuffer) -> bool {
        let mut slot = self.lock();
        let displaced = slot.frame.replace(frame).is_some();
        self.available.notify_all();
        displaced
    }

    /// Removes and returns the pending frame, if any.
    pub fn take(&self) -> Option<FrameBuffer> {
        self.lock().frame.take()
    }

    pub fn ready(&self) -> bool {
        self.lock().frame.is_some()
    }

    /// Nudges any waiter without publishing a frame. The recorder's command
    /// side calls this so state changes are observed promptly.
    pub fn wake(&self) {
        self.lock().nudged = true;
        self.available.notify_all();
    }

    /// Blocks until a frame is pending, a [`wake`](Self::wake) nudge arrives, or
    /// the timeout elapses. Returns whether a frame is pending on return; the
    /// frame itself stays in the slot.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();
        loop {
            if slot.frame.is_some() {
                return true;
            }
            if slot.nudged {
                slot.nudged = false;
                return false;
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            let (guard, _) = self
                .available
                .wait_timeout(slot, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            slot = guard;
        }
    }

    /// Blocks until a [`wake`](Self::wake) nudge arrives or the timeout
    /// elapses, regardless of whether a frame is pending. The recorder uses
    /// this to sleep out a pacing interval while a frame already waits.
    pub fn wait_wake(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();
        loop {
            if slot.nudged {
                slot.nudged = false;
                return;
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return;
            };
            let (guard, _) = self
                .available
                .wait_timeout(slot, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            slot = guard;
        }
    }
}

impl Default for FrameMailbox {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn frame(tag: i64) -> FrameBuffer {
        FrameBuffer::blank(2, 2, tag).unwrap()
    }

    #[test]
    fn publish_then_take_round_trips() {
        let mb = FrameMailbox::new();
        assert!(!mb.publish(frame(1)));
        assert!(mb.ready());
        assert_eq!(mb.take().unwrap().timestamp_ms, 1);
        assert!(mb.take().is_none());
    }

    #[test]
    fn publish_overwrites_unread_frame() {
        let mb = FrameMailbox::new();
        assert!(!mb.publish(frame(1)));
        assert!(mb.publish(frame(2)));
        assert_eq!(mb.take().unwrap().timestamp_ms, 2);
    }

    #[test]
    fn wait_ready_times_out_on_empty_slot() {
        let mb = FrameMailbox::new();
        let t0 = Instant::now();
        assert!(!mb.wait_ready(Duration::from_millis(30)));
        assert!(t0.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn wait_ready_sees_frame_published_from_another_thread() {
        let mb = Arc::new(FrameMailbox::new());
        let publisher = {
            let mb = Arc::clone(&mb);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                mb.publish(frame(7));
            })
        };
        assert!(mb.wait_ready(Duration::from_secs(2)));
        assert_eq!(mb.take().unwrap().timestamp_ms, 7);
        publisher.join().unwrap();
    }

    #[test]
    fn wait_wake_ignores_pending_frames_but_honors_nudges() {
        let mb = Arc::new(FrameMailbox::new());
        mb.publish(frame(1));
        let t0 = Instant::now();
        mb.wait_wake(Duration::from_millis(30));
        // The pending frame must not cut the pacing sleep short.
        assert!(t0.elapsed() >= Duration::from_millis(25));

        let waker = {
            let mb = Arc::clone(&mb);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                mb.wake();
            })
        };
        let t0 = Instant::now();
        mb.wait_wake(Duration::from_secs(5));
        assert!(t0.elapsed() < Duration::from_secs(2));
        waker.join().unwrap();
    }

    #[test]
    fn wake_interrupts_wait_without_a_frame() {
        let mb = Arc::new(FrameMailbox::new());
        let waker = {
            let mb = Arc::clone(&mb);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                mb.wake();
            })
        };
        let t0 = Instant::now();
        assert!(!mb.wait_ready(Duration::from_secs(5)));
        assert!(t0.elapsed() < Duration::from_secs(2));
        waker.join().unwrap();
    }
}
