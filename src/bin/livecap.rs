use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use ffmpeg_next as ffmpeg;

use livecap::{
    CaptureScheduler, CaptureTrigger, EncoderSession, FrameBuffer, FrameMailbox, ReadbackSource,
    RecorderHandle, StreamConfig, overlay,
};

/// The two bit-rate presets exposed by the quality switch.
const HIGH_BIT_RATE: usize = 5_000_000;
const LOW_BIT_RATE: usize = 400_000;

/// Stand-in for the render loop cadence driving capture ticks.
const TICK_INTERVAL: Duration = Duration::from_millis(4);

#[derive(Parser, Debug)]
#[command(name = "livecap", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record a synthetic test pattern through the full capture pipeline.
    Record(RecordArgs),
    /// Render a single synthetic frame as a PNG.
    Frame(FrameArgs),
    /// Report which video encoders the linked FFmpeg provides.
    Probe(ProbeArgs),
}

#[derive(Parser, Debug)]
struct RecordArgs {
    /// Output video path. Without a recognizable extension the container
    /// falls back to AVI and ".avi" is appended.
    #[arg(long, default_value = "video")]
    out: PathBuf,

    /// Stream width in pixels (default 1920).
    #[arg(long)]
    width: Option<u32>,

    /// Stream height in pixels (default 1080).
    #[arg(long)]
    height: Option<u32>,

    /// Constant output frame rate (default 25).
    #[arg(long)]
    fps: Option<u32>,

    /// Bit-rate preset: high = 5000000 bps, low = 400000 bps.
    #[arg(long, value_enum)]
    quality: Option<QualityChoice>,

    /// Explicit bit rate in bits per second; overrides --quality.
    #[arg(long)]
    bitrate: Option<usize>,

    /// Encoder name as known to FFmpeg (e.g. "mpeg4"); defaults to the
    /// container's default video codec.
    #[arg(long)]
    codec: Option<String>,

    /// How long to record for.
    #[arg(long, default_value_t = 5)]
    duration_secs: u64,

    /// Stream configuration JSON; explicit flags override its fields.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct FrameArgs {
    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    /// Frame width in pixels.
    #[arg(long, default_value_t = 1920)]
    width: u32,

    /// Frame height in pixels.
    #[arg(long, default_value_t = 1080)]
    height: u32,
}

#[derive(Parser, Debug)]
struct ProbeArgs {
    /// Additional encoder names to check beyond the built-in list.
    #[arg(long = "codec")]
    codecs: Vec<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum QualityChoice {
    High,
    Low,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Record(args) => cmd_record(args),
        Command::Frame(args) => cmd_frame(args),
        Command::Probe(args) => cmd_probe(args),
    }
}

fn read_stream_json(path: &Path) -> anyhow::Result<StreamConfig> {
    let f = File::open(path).with_context(|| format!("open config '{}'", path.display()))?;
    let r = BufReader::new(f);
    let cfg: StreamConfig = serde_json::from_reader(r).with_context(|| "parse config JSON")?;
    Ok(cfg)
}

fn resolve_config(args: &RecordArgs) -> anyhow::Result<StreamConfig> {
    let mut cfg = match &args.config {
        Some(path) => read_stream_json(path)?,
        None => StreamConfig {
            width: 1920,
            height: 1080,
            fps: 25,
            bit_rate: HIGH_BIT_RATE,
            ..StreamConfig::default()
        },
    };

    if let Some(width) = args.width {
        cfg.width = width;
    }
    if let Some(height) = args.height {
        cfg.height = height;
    }
    if let Some(fps) = args.fps {
        cfg.fps = fps;
    }
    if let Some(codec) = &args.codec {
        cfg.codec = Some(codec.clone());
    }
    cfg.bit_rate = match (args.bitrate, args.quality) {
        (Some(bit_rate), _) => bit_rate,
        (None, Some(QualityChoice::High)) => HIGH_BIT_RATE,
        (None, Some(QualityChoice::Low)) => LOW_BIT_RATE,
        (None, None) => cfg.bit_rate,
    };

    cfg.validate()?;
    Ok(cfg)
}

/// Synthetic frame producer: a scrolling gradient with the capture timestamp.
/// Stands in for an actual GPU readback path.
struct PatternSource {
    width: u32,
    height: u32,
    started: Instant,
    pending: Option<FrameBuffer>,
}

impl PatternSource {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            started: Instant::now(),
            pending: None,
        }
    }
}

impl ReadbackSource for PatternSource {
    fn issue_copy(&mut self) -> livecap::LivecapResult<()> {
        let t_ms = self.started.elapsed().as_millis() as i64;
        self.pending = Some(render_pattern(self.width, self.height, t_ms));
        Ok(())
    }

    fn try_map(&mut self) -> livecap::LivecapResult<Option<FrameBuffer>> {
        Ok(self.pending.take())
    }
}

fn render_pattern(width: u32, height: u32, t_ms: i64) -> FrameBuffer {
    let mut data = vec![0u8; (width as usize) * (height as usize) * 4];
    let phase = ((t_ms / 4).rem_euclid(256)) as u32;
    for y in 0..height {
        for x in 0..width {
            let i = ((y * width + x) * 4) as usize;
            data[i] = (x * 255 / width.max(1)) as u8;
            data[i + 1] = (y * 255 / height.max(1)) as u8;
            data[i + 2] = ((x + y + phase) % 256) as u8;
            data[i + 3] = 255;
        }
    }
    FrameBuffer {
        width,
        height,
        data,
        timestamp_ms: t_ms,
    }
}

fn cmd_record(args: RecordArgs) -> anyhow::Result<()> {
    let cfg = resolve_config(&args)?;

    let mailbox = Arc::new(FrameMailbox::new());
    let trigger = CaptureTrigger::new();
    let mut scheduler = CaptureScheduler::new(trigger.clone(), Arc::clone(&mailbox));
    let mut source = PatternSource::new(cfg.width, cfg.height);

    let out_path = args.out.clone();
    let session_cfg = cfg.clone();
    let mut recorder = RecorderHandle::spawn(mailbox, trigger, move || {
        Box::new(EncoderSession::new(out_path, session_cfg))
    })?;

    eprintln!(
        "recording {}x{} @ {} fps, {} bps, for {}s",
        cfg.width, cfg.height, cfg.fps, cfg.bit_rate, args.duration_secs
    );
    recorder.start_record();

    let run_for = Duration::from_secs(args.duration_secs);
    let started = Instant::now();
    let mut last_status = Instant::now();
    while started.elapsed() < run_for {
        scheduler.tick(&mut source);
        if last_status.elapsed() >= Duration::from_secs(1) {
            last_status = Instant::now();
            eprintln!(
                "  {}  {:>2} fps",
                overlay::format_timecode(recorder.video_length_ms()),
                recorder.fps()
            );
        }
        std::thread::sleep(TICK_INTERVAL);
    }

    recorder.stop_record();
    // Joining guarantees the file is finalized before we report it.
    recorder.terminate();
    let recorded_ms = recorder.video_length_ms();

    // Mirror the session's fallback for the final message.
    let shown = if args.out.extension().is_some() {
        args.out.clone()
    } else {
        PathBuf::from(format!("{}.avi", args.out.display()))
    };
    eprintln!(
        "wrote {} ({} of video)",
        shown.display(),
        overlay::format_timecode(recorded_ms)
    );
    Ok(())
}

fn cmd_frame(args: FrameArgs) -> anyhow::Result<()> {
    let mut frame = render_pattern(args.width, args.height, 0);
    overlay::stamp_timecode(&mut frame, 0);

    if let Some(parent) = args.out.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }

    image::save_buffer_with_format(
        &args.out,
        &frame.data,
        frame.width,
        frame.height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("write png '{}'", args.out.display()))?;

    eprintln!("wrote {}", args.out.display());
    Ok(())
}

fn cmd_probe(args: ProbeArgs) -> anyhow::Result<()> {
    ffmpeg::init().context("initialize ffmpeg")?;

    let builtin = [
        "mpeg4", "libx264", "libx265", "libvpx", "libvpx-vp9", "mjpeg", "ffv1",
    ];
    let mut names: Vec<&str> = builtin.to_vec();
    for name in &args.codecs {
        if !names.contains(&name.as_str()) {
            names.push(name);
        }
    }

    for name in names {
        let status = if ffmpeg::encoder::find_by_name(name).is_some() {
            "available"
        } else {
            "missing"
        };
        println!("{name}: {status}");
    }
    Ok(())
}
