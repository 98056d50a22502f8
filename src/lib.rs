#![forbid(unsafe_code)]

pub mod capture;
pub mod encode;
pub mod error;
pub mod frame;
pub mod mailbox;
pub mod overlay;
pub mod recorder;

pub use capture::{CaptureScheduler, CaptureTick, CaptureTrigger, ReadbackSource};
pub use encode::{EncoderSession, FrameSink, StreamConfig};
pub use error::{LivecapError, LivecapResult};
pub use frame::FrameBuffer;
pub use mailbox::FrameMailbox;
pub use recorder::{RecorderHandle, RecorderState};
