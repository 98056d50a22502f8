//! Render-loop side of the pipeline: two-phase asynchronous readback.
//!
//! The scheduler is driven by `tick()` calls from whatever loop owns the GPU
//! context. A tick either issues a copy request or attempts to map the one in
//! flight; it never blocks, so a slow readback costs the render loop nothing
//! beyond the tick itself. Mapped frames land in the [`FrameMailbox`] for the
//! recorder thread to consume.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::LivecapResult;
use crate::frame::FrameBuffer;
use crate::mailbox::FrameMailbox;

/// Boundary to the actual GPU readback machinery (PBO, wgpu buffer, ...).
///
/// Implementations must not block in either method: `issue_copy` enqueues the
/// GPU-to-buffer copy of the latest rendered frame, and `try_map` polls for its
/// completion, returning `Ok(None)` while the copy is still in flight.
pub trait ReadbackSource {
    fn issue_copy(&mut self) -> LivecapResult<()>;
    fn try_map(&mut self) -> LivecapResult<Option<FrameBuffer>>;
}

/// Cloneable arm flag for the scheduler. The recorder pulses this when it wants
/// the next frame; the scheduler consumes it at most once per capture.
#[derive(Clone, Default)]
pub struct CaptureTrigger(Arc<AtomicBool>);

impl CaptureTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the next capture. Idempotent until consumed.
    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_armed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn consume(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// Outcome of a single scheduling tick, mostly for telemetry and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureTick {
    /// Nothing armed and nothing in flight.
    Idle,
    /// A copy request went out this tick; the map attempt comes next tick.
    Issued,
    /// The attempt did not complete; another one is scheduled for next tick.
    Pending,
    /// A mapped frame was published into the mailbox.
    Published,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    AwaitingMap,
}

pub struct CaptureScheduler {
    trigger: CaptureTrigger,
    mailbox: Arc<FrameMailbox>,
    phase: Phase,
}

impl CaptureScheduler {
    pub fn new(trigger: CaptureTrigger, mailbox: Arc<FrameMailbox>) -> Self {
        Self {
            trigger,
            mailbox,
            phase: Phase::Idle,
        }
    }

    /// Handle for arming captures from other threads.
    pub fn trigger(&self) -> CaptureTrigger {
        self.trigger.clone()
    }

    pub fn in_flight(&self) -> bool {
        self.phase == Phase::AwaitingMap
    }

    /// Advances the readback state machine by one render-loop iteration.
    ///
    /// Failures never propagate to the caller: a failed copy request re-arms
    /// the trigger, and a failed or not-yet-ready map stays in the awaiting
    /// phase. Both retry on the next tick.
    pub fn tick(&mut self, source: &mut dyn ReadbackSource) -> CaptureTick {
        match self.phase {
            Phase::Idle => {
                if !self.trigger.consume() {
                    return CaptureTick::Idle;
                }
                match source.issue_copy() {
                    Ok(()) => {
                        self.phase = Phase::AwaitingMap;
                        CaptureTick::Issued
                    }
                    Err(err) => {
                        debug!(error = %err, "readback copy request failed, retrying next tick");
                        self.trigger.request();
                        CaptureTick::Pending
                    }
                }
            }
            Phase::AwaitingMap => match source.try_map() {
                Ok(Some(frame)) if !frame.is_empty() => {
                    self.phase = Phase::Idle;
                    if self.mailbox.publish(frame) {
                        debug!("capture displaced an unread frame");
                    }
                    CaptureTick::Published
                }
                Ok(_) => CaptureTick::Pending,
                Err(err) => {
                    debug!(error = %err, "buffer map failed, rescheduling");
                    CaptureTick::Pending
                }
            },
        }
    }
}
