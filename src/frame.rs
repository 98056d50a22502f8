use crate::error::{LivecapError, LivecapResult};

/// One captured framebuffer snapshot: tightly packed RGBA8 plus the capture
/// timestamp reported by the producer.
///
/// A `FrameBuffer` is immutable once published: the capture side hands a fresh
/// instance into the [`FrameMailbox`](crate::FrameMailbox) per capture instead of
/// mutating a shared one. The recorder paces against its own clock, so
/// `timestamp_ms` is informational.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameBuffer {
    pub width: u32,
    pub height: u32,
    /// RGBA8 rows, no padding: `width * height * 4` bytes.
    pub data: Vec<u8>,
    pub timestamp_ms: i64,
}

impl FrameBuffer {
    pub fn new(width: u32, height: u32, data: Vec<u8>, timestamp_ms: i64) -> LivecapResult<Self> {
        if width == 0 || height == 0 {
            return Err(LivecapError::validation(
                "FrameBuffer width/height must be > 0",
            ));
        }
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(LivecapError::validation(format!(
                "FrameBuffer data length {} does not match {}x{} RGBA8 ({expected} bytes)",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            data,
            timestamp_ms,
        })
    }

    /// All-zero (transparent black) frame of the given size.
    pub fn blank(width: u32, height: u32, timestamp_ms: i64) -> LivecapResult<Self> {
        let len = width as usize * height as usize * 4;
        Self::new(width, height, vec![0u8; len], timestamp_ms)
    }

    /// True when the buffer carries no usable pixels. A mapped-but-empty image
    /// is rescheduled by the capture side rather than published.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }

    pub fn len_bytes(&self) -> usize {
        self.data.len()
    }
}
