//! In-process media encoding session.
//!
//! One [`EncoderSession`] owns one output container with a single video stream.
//! Frames arrive as RGBA captures with a wall-clock duration; the session
//! converts them to the codec's pixel format and duplicates them so elapsed
//! real time is approximated at the configured constant frame rate. Lifecycle
//! is an explicit open/close pair; nothing outside the session touches the
//! container or codec state.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use ffmpeg_next as ffmpeg;

use ffmpeg::{
    Packet, Rational, codec, encoder,
    format::{self, Pixel},
    frame::Video as VideoFrame,
    media,
    software::scaling,
};
use tracing::{debug, warn};

use crate::{
    error::{LivecapError, LivecapResult},
    frame::FrameBuffer,
};

/// Fixed parameters of the single video stream. Immutable once a session is
/// open; only the bit rate may change between recordings.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StreamConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bit_rate: usize,
    /// Encoder name as known to FFmpeg (e.g. "mpeg4", "libx264"). `None`
    /// selects the container's default video codec.
    #[serde(default)]
    pub codec: Option<String>,
    /// Native pixel format frames are converted into before encoding.
    #[serde(skip, default = "default_pixel_format")]
    pub pixel_format: Pixel,
}

fn default_pixel_format() -> Pixel {
    Pixel::YUV420P
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: 352,
            height: 288,
            fps: 25,
            bit_rate: 400_000,
            codec: None,
            pixel_format: default_pixel_format(),
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> LivecapResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(LivecapError::validation(
                "stream width/height must be non-zero",
            ));
        }
        if self.pixel_format == Pixel::YUV420P
            && (!self.width.is_multiple_of(2) || !self.height.is_multiple_of(2))
        {
            return Err(LivecapError::validation(
                "stream width/height must be even for yuv420p output",
            ));
        }
        if self.fps == 0 || self.fps > 1000 {
            // Pacing math works in whole milliseconds per frame.
            return Err(LivecapError::validation("fps must be in 1..=1000"));
        }
        if self.bit_rate == 0 {
            return Err(LivecapError::validation("bit_rate must be > 0"));
        }
        Ok(())
    }

    /// Output frame spacing at the configured rate.
    pub fn frame_delay(&self) -> Duration {
        Duration::from_millis(u64::from(1000 / self.fps.max(1)))
    }
}

/// Destination for paced frames. The recorder drives this; [`EncoderSession`]
/// is the production implementation, tests substitute counting fakes.
///
/// Implementations are constructed on the thread that drives them and are not
/// required to be `Send`; the conversion context underneath the production
/// sink is single-thread only.
pub trait FrameSink {
    fn open(&mut self) -> LivecapResult<()>;
    /// Encodes `frame` as `duration_ms` of wall-clock time. Returns how many
    /// output frames were pushed.
    fn write_frame(&mut self, frame: &FrameBuffer, duration_ms: i64) -> LivecapResult<u64>;
    fn close(&mut self) -> LivecapResult<()>;
    fn is_open(&self) -> bool;
    /// Constant output rate the recorder paces against.
    fn fps(&self) -> u32;
    fn bit_rate(&self) -> usize;
    /// Stores a bit rate for the next open; rejected while open or for zero.
    fn set_bit_rate(&mut self, bit_rate: usize) -> bool;
}

/// Live container/codec state. Exists only between open() and close(); owning
/// the handles here keeps every teardown path single and ordered.
struct OpenSession {
    encoder: encoder::video::Encoder,
    encoder_tb: Rational,
    stream_tb: Rational,
    native: VideoFrame,
    staging: VideoFrame,
    scaler: scaling::Context,
    octx: format::context::Output,
    out_path: PathBuf,
    next_pts: i64,
}

impl OpenSession {
    /// The staging frame always matches the incoming capture size; the scaler
    /// always bridges staging to the native frame. Both are rebuilt together
    /// when the capture size changes.
    fn rebuild_staging(&mut self, width: u32, height: u32) -> LivecapResult<()> {
        let native_format = self.native.format();
        self.scaler = scaling::Context::get(
            Pixel::RGBA,
            width,
            height,
            native_format,
            self.native.width(),
            self.native.height(),
            scaling::Flags::BICUBIC,
        )
        .map_err(|e| {
            LivecapError::conversion(format!(
                "building {width}x{height} rgba -> {native_format:?} conversion context: {e}"
            ))
        })?;
        self.staging = VideoFrame::new(Pixel::RGBA, width, height);
        Ok(())
    }

    fn fill_staging(&mut self, frame: &FrameBuffer) {
        let row = frame.width as usize * 4;
        let stride = self.staging.stride(0);
        let data = self.staging.data_mut(0);
        for y in 0..frame.height as usize {
            data[y * stride..y * stride + row].copy_from_slice(&frame.data[y * row..(y + 1) * row]);
        }
    }

    /// Sends the native frame once and multiplexes whatever packets the
    /// encoder yields. Packets may lag frames by several calls; the remainder
    /// comes out in [`drain_packets`](Self::drain_packets) at end of stream.
    fn push_native(&mut self) -> LivecapResult<()> {
        self.native.set_pts(Some(self.next_pts));
        self.next_pts += 1;
        self.encoder
            .send_frame(&self.native)
            .map_err(|e| LivecapError::encode(format!("sending frame to encoder: {e}")))?;
        self.drain_packets()
    }

    fn drain_packets(&mut self) -> LivecapResult<()> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.rescale_ts(self.encoder_tb, self.stream_tb);
            packet.set_stream(0);
            packet.set_duration(1);
            if packet.dts().is_none()
                && let Some(pts) = packet.pts()
            {
                packet.set_dts(Some(pts));
            }
            packet.write_interleaved(&mut self.octx).map_err(|e| {
                LivecapError::file_io(format!(
                    "writing packet to '{}': {e}",
                    self.out_path.display()
                ))
            })?;
        }
        Ok(())
    }
}

/// One capture-to-file encoding session with an explicit open/close lifecycle.
///
/// `new()` never touches FFmpeg; all validation and allocation happens in
/// [`open`](Self::open), and any open failure leaves no partial session
/// behind.
pub struct EncoderSession {
    requested_path: PathBuf,
    config: StreamConfig,
    effective_path: Option<PathBuf>,
    frames_pushed: u64,
    open: Option<OpenSession>,
}

impl EncoderSession {
    pub fn new(path: impl Into<PathBuf>, config: StreamConfig) -> Self {
        Self {
            requested_path: path.into(),
            config,
            effective_path: None,
            frames_pushed: 0,
            open: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn fps(&self) -> u32 {
        self.config.fps
    }

    pub fn bit_rate(&self) -> usize {
        self.config.bit_rate
    }

    /// Stores a bit rate for the next open. Rejected while a session is open
    /// or for a zero rate.
    pub fn set_bit_rate(&mut self, bit_rate: usize) -> bool {
        if self.is_open() || bit_rate == 0 {
            return false;
        }
        self.config.bit_rate = bit_rate;
        true
    }

    /// Path actually written, once known. Differs from the requested path when
    /// the container fallback appended ".avi".
    pub fn out_path(&self) -> Option<&Path> {
        self.effective_path.as_deref()
    }

    /// Total output frames pushed across all writes of this session.
    pub fn frames_pushed(&self) -> u64 {
        self.frames_pushed
    }

    /// Opens the container, codec and conversion state.
    ///
    /// The container is deduced from the path's extension; when that fails the
    /// session retries with ".avi" appended, matching the recorder's default
    /// extensionless output path. Fails if already open.
    #[tracing::instrument(skip(self))]
    pub fn open(&mut self) -> LivecapResult<()> {
        if self.is_open() {
            return Err(LivecapError::validation(
                "encoder session is already open; close() it first",
            ));
        }
        self.config.validate()?;
        ffmpeg::init().map_err(|e| anyhow::anyhow!("initializing ffmpeg: {e}"))?;

        ensure_parent_dir(&self.requested_path)?;
        let requested = self.requested_path.clone();
        let (mut octx, out_path) = match format::output(&requested) {
            Ok(octx) => (octx, requested),
            Err(err) => {
                debug!(
                    path = %requested.display(),
                    error = %err,
                    "no container for extension, falling back to avi"
                );
                let mut with_avi = requested.into_os_string();
                with_avi.push(".avi");
                let with_avi = PathBuf::from(with_avi);
                let octx = format::output_as(&with_avi, "avi").map_err(|e| {
                    LivecapError::container_resolution(format!(
                        "cannot open an avi container at '{}': {e}",
                        with_avi.display()
                    ))
                })?;
                (octx, with_avi)
            }
        };

        let codec = match &self.config.codec {
            Some(name) => encoder::find_by_name(name).ok_or_else(|| {
                LivecapError::codec_unavailable(format!("no encoder named '{name}'"))
            })?,
            None => {
                let id = octx.format().codec(&out_path, media::Type::Video);
                if id == codec::Id::None {
                    return Err(LivecapError::codec_unavailable(format!(
                        "container '{}' has no default video codec",
                        octx.format().name()
                    )));
                }
                encoder::find(id).ok_or_else(|| {
                    LivecapError::codec_unavailable(format!("no encoder for codec {id:?}"))
                })?
            }
        };

        let global_header = octx
            .format()
            .flags()
            .contains(format::Flags::GLOBAL_HEADER);

        let mut video = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| LivecapError::codec_open(format!("creating encoder context: {e}")))?;
        let fps = self.config.fps as i32;
        video.set_width(self.config.width);
        video.set_height(self.config.height);
        video.set_format(self.config.pixel_format);
        video.set_frame_rate(Some(Rational::new(fps, 1)));
        video.set_time_base(Rational::new(1, fps));
        video.set_bit_rate(self.config.bit_rate);
        // At most one intra frame every twelve output frames.
        video.set_gop(12);
        if global_header {
            video.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let opened = video
            .open()
            .map_err(|e| LivecapError::codec_open(format!("opening video codec: {e}")))?;
        let encoder_tb = opened.time_base();

        {
            let mut stream = octx.add_stream(codec).map_err(|e| {
                LivecapError::container_resolution(format!("adding video stream: {e}"))
            })?;
            stream.set_parameters(&opened);
            stream.set_time_base(encoder_tb);
        }
        octx.write_header().map_err(|e| {
            LivecapError::file_io(format!(
                "writing header to '{}': {e}",
                out_path.display()
            ))
        })?;
        // The muxer may adjust the stream time base while writing the header.
        let stream_tb = octx.stream(0).map_or(encoder_tb, |s| s.time_base());

        let native = VideoFrame::new(self.config.pixel_format, self.config.width, self.config.height);
        let staging = VideoFrame::new(Pixel::RGBA, self.config.width, self.config.height);
        let scaler = scaling::Context::get(
            Pixel::RGBA,
            self.config.width,
            self.config.height,
            self.config.pixel_format,
            self.config.width,
            self.config.height,
            scaling::Flags::BICUBIC,
        )
        .map_err(|e| {
            LivecapError::conversion(format!("building initial conversion context: {e}"))
        })?;

        debug!(
            path = %out_path.display(),
            codec = codec.name(),
            width = self.config.width,
            height = self.config.height,
            fps = self.config.fps,
            bit_rate = self.config.bit_rate,
            "encoder session opened"
        );
        self.effective_path = Some(out_path.clone());
        self.frames_pushed = 0;
        self.open = Some(OpenSession {
            encoder: opened,
            encoder_tb,
            stream_tb,
            native,
            staging,
            scaler,
            octx,
            out_path,
            next_pts: 0,
        });
        Ok(())
    }

    /// Encodes `frame` as `duration_ms` of wall-clock time.
    ///
    /// The frame is duplicated `duration_ms * fps / 1000` times (integer
    /// truncation, no remainder carried to later calls); the return value is
    /// that count. A failure leaves the session open and writable.
    pub fn write_frame(&mut self, frame: &FrameBuffer, duration_ms: i64) -> LivecapResult<u64> {
        let open = self
            .open
            .as_mut()
            .ok_or_else(|| LivecapError::encode("write_frame on a closed session"))?;
        if frame.is_empty() || frame.data.len() != frame.width as usize * frame.height as usize * 4
        {
            return Err(LivecapError::validation(
                "frame data does not match width*height*4",
            ));
        }

        if open.staging.width() != frame.width || open.staging.height() != frame.height {
            open.rebuild_staging(frame.width, frame.height)?;
        }
        open.fill_staging(frame);
        open.scaler
            .run(&open.staging, &mut open.native)
            .map_err(|e| LivecapError::conversion(format!("pixel format conversion: {e}")))?;

        let repeat = duration_ms * i64::from(self.config.fps) / 1000;
        for _ in 0..repeat {
            open.push_native()?;
        }
        let pushed = repeat.max(0) as u64;
        self.frames_pushed += pushed;
        Ok(pushed)
    }

    /// Flushes delayed packets and finalizes the file. A second close is a
    /// no-op.
    pub fn close(&mut self) -> LivecapResult<()> {
        let Some(mut open) = self.open.take() else {
            return Ok(());
        };
        // Delayed packets must come out before the trailer or the file tail
        // is truncated; the trailer must go out while codec state is alive.
        if let Err(err) = open.encoder.send_eof() {
            warn!(error = %err, "end-of-stream signal failed");
        }
        if let Err(err) = open.drain_packets() {
            warn!(error = %err, "draining delayed packets failed");
        }
        open.octx.write_trailer().map_err(|e| {
            LivecapError::file_io(format!(
                "writing trailer to '{}': {e}",
                open.out_path.display()
            ))
        })?;
        debug!(path = %open.out_path.display(), frames = self.frames_pushed, "encoder session closed");
        Ok(())
    }
}

impl Drop for EncoderSession {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "closing encoder session on drop failed");
        }
    }
}

impl FrameSink for EncoderSession {
    fn open(&mut self) -> LivecapResult<()> {
        EncoderSession::open(self)
    }

    fn write_frame(&mut self, frame: &FrameBuffer, duration_ms: i64) -> LivecapResult<u64> {
        EncoderSession::write_frame(self, frame, duration_ms)
    }

    fn close(&mut self) -> LivecapResult<()> {
        EncoderSession::close(self)
    }

    fn is_open(&self) -> bool {
        EncoderSession::is_open(self)
    }

    fn fps(&self) -> u32 {
        EncoderSession::fps(self)
    }

    fn bit_rate(&self) -> usize {
        EncoderSession::bit_rate(self)
    }

    fn set_bit_rate(&mut self, bit_rate: usize) -> bool {
        EncoderSession::set_bit_rate(self, bit_rate)
    }
}

fn ensure_parent_dir(path: &Path) -> LivecapResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        use anyhow::Context as _;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_validation_catches_bad_values() {
        assert!(
            StreamConfig {
                width: 0,
                ..StreamConfig::default()
            }
            .validate()
            .is_err()
        );
        assert!(
            StreamConfig {
                width: 353,
                ..StreamConfig::default()
            }
            .validate()
            .is_err()
        );
        assert!(
            StreamConfig {
                fps: 0,
                ..StreamConfig::default()
            }
            .validate()
            .is_err()
        );
        assert!(
            StreamConfig {
                bit_rate: 0,
                ..StreamConfig::default()
            }
            .validate()
            .is_err()
        );
        assert!(StreamConfig::default().validate().is_ok());
    }

    #[test]
    fn odd_dimensions_are_fine_outside_yuv420p() {
        let cfg = StreamConfig {
            width: 353,
            height: 289,
            pixel_format: Pixel::RGB24,
            ..StreamConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn default_matches_the_writer_defaults() {
        let cfg = StreamConfig::default();
        assert_eq!((cfg.width, cfg.height), (352, 288));
        assert_eq!(cfg.fps, 25);
        assert_eq!(cfg.bit_rate, 400_000);
        assert!(cfg.codec.is_none());
        assert_eq!(cfg.pixel_format, Pixel::YUV420P);
        assert_eq!(cfg.frame_delay(), Duration::from_millis(40));
    }

    #[test]
    fn config_round_trips_through_json_without_pixel_format() {
        let cfg = StreamConfig {
            codec: Some("mpeg4".to_string()),
            ..StreamConfig::default()
        };
        let s = serde_json::to_string(&cfg).unwrap();
        assert!(!s.contains("pixel_format"));
        let de: StreamConfig = serde_json::from_str(&s).unwrap();
        assert_eq!(de, cfg);
    }

    #[test]
    fn config_accepts_json_without_codec() {
        let de: StreamConfig =
            serde_json::from_str(r#"{"width":640,"height":360,"fps":30,"bit_rate":1000000}"#)
                .unwrap();
        assert!(de.codec.is_none());
        assert_eq!(de.pixel_format, Pixel::YUV420P);
    }

    #[test]
    fn bit_rate_updates_only_while_closed_and_positive() {
        let mut session = EncoderSession::new("out.avi", StreamConfig::default());
        assert!(!session.set_bit_rate(0));
        assert_eq!(session.bit_rate(), 400_000);
        assert!(session.set_bit_rate(5_000_000));
        assert_eq!(session.bit_rate(), 5_000_000);
    }

    #[test]
    fn closed_session_rejects_writes_and_tolerates_close() {
        let mut session = EncoderSession::new("out.avi", StreamConfig::default());
        assert!(!session.is_open());
        let frame = FrameBuffer::blank(4, 4, 0).unwrap();
        assert!(session.write_frame(&frame, 40).is_err());
        assert!(session.close().is_ok());
        assert!(session.close().is_ok());
        assert!(session.out_path().is_none());
    }
}
