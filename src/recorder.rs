//! Worker-thread state machine pacing captured frames into a [`FrameSink`].
//!
//! The worker owns everything that moves: the sink, the timing state and all
//! state transitions. Callers hold a [`RecorderHandle`] that enqueues commands
//! and reads telemetry atomics; the worker drains the queue at the top of each
//! pass, so the state machine has exactly one writer. Instead of spinning, the
//! worker sleeps on the mailbox condition variable and is nudged whenever a
//! frame or a command arrives, which preserves the same pacing decisions a
//! busy poll would make.

use std::{
    sync::{
        Arc,
        atomic::{AtomicI64, AtomicU32, AtomicU8, AtomicUsize, Ordering},
        mpsc::{self, Receiver, Sender, TryRecvError},
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use tracing::{debug, warn};

use crate::{
    capture::CaptureTrigger, encode::FrameSink, error::LivecapResult, mailbox::FrameMailbox,
    overlay,
};

/// How long idle passes sleep between command checks. Nudges cut this short.
const IDLE_WAIT: Duration = Duration::from_millis(250);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecorderState {
    Stopped,
    Paused,
    Recording,
    Terminated,
}

impl RecorderState {
    fn as_u8(self) -> u8 {
        match self {
            Self::Stopped => 0,
            Self::Paused => 1,
            Self::Recording => 2,
            Self::Terminated => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Paused,
            2 => Self::Recording,
            3 => Self::Terminated,
            _ => Self::Stopped,
        }
    }
}

#[derive(Debug)]
enum Command {
    Start,
    Pause,
    Stop,
    Terminate,
    SetBitRate(usize),
}

/// Pacing and length bookkeeping, mutated only on the worker thread.
///
/// All times are milliseconds on the recording clock, which restarts when a
/// recording starts from [`RecorderState::Stopped`].
#[derive(Debug, Default)]
struct TimingState {
    last_frame_time: i64,
    last_fps_time: i64,
    pause_time: i64,
    video_length: i64,
    window_frames: u32,
    fps: u32,
}

impl TimingState {
    fn new() -> Self {
        Self::default()
    }

    /// Fresh recording: everything back to zero.
    fn reset(&mut self) {
        *self = Self::default();
    }

    /// Resume after a pause: both reference times shift forward by the pause
    /// duration, so the gap never enters the video length and the next frame
    /// neither jumps nor spikes.
    fn resume(&mut self, now_ms: i64) {
        let shift = now_ms - self.pause_time;
        self.last_frame_time += shift;
        self.last_fps_time += shift;
        self.window_frames = 0;
    }

    fn pause(&mut self, now_ms: i64) {
        self.pause_time = now_ms;
        self.fps = 0;
    }

    fn clear_fps(&mut self) {
        self.fps = 0;
    }

    /// The first frame of a recording is written regardless of pacing; after
    /// that, writes wait out the output frame interval.
    fn should_write(&self, now_ms: i64, frame_delay_ms: i64) -> bool {
        now_ms >= self.last_frame_time + frame_delay_ms || self.video_length == 0
    }

    /// Books `now` as the written frame's arrival and returns its wall-clock
    /// length, falling back to one frame interval when the clock ran
    /// backwards.
    fn advance(&mut self, now_ms: i64, frame_delay_ms: i64) -> i64 {
        let mut frame_length = now_ms - self.last_frame_time;
        if frame_length < 0 {
            frame_length = frame_delay_ms;
        }
        self.video_length += frame_length;
        self.last_frame_time = now_ms;
        frame_length
    }

    /// Rolling one-second write counter. A write landing on a window boundary
    /// publishes the previous window's count and is itself not counted.
    fn count_write(&mut self, now_ms: i64) {
        if now_ms >= self.last_fps_time + 1000 {
            self.fps = self.window_frames;
            self.window_frames = 0;
            self.last_fps_time = now_ms;
        } else {
            self.window_frames += 1;
        }
    }

    /// Time remaining until the next write is due, clamped to at least one
    /// millisecond and at most one frame interval.
    fn until_due(&self, now_ms: i64, frame_delay_ms: i64) -> Duration {
        let due_at = self.last_frame_time + frame_delay_ms;
        let wait = due_at.saturating_sub(now_ms).clamp(1, frame_delay_ms.max(1));
        Duration::from_millis(wait as u64)
    }
}

struct Shared {
    state: AtomicU8,
    fps: AtomicU32,
    video_length_ms: AtomicI64,
    bit_rate: AtomicUsize,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(RecorderState::Stopped.as_u8()),
            fps: AtomicU32::new(0),
            video_length_ms: AtomicI64::new(0),
            bit_rate: AtomicUsize::new(0),
        }
    }
}

struct Worker {
    shared: Arc<Shared>,
    commands: Receiver<Command>,
    mailbox: Arc<FrameMailbox>,
    trigger: CaptureTrigger,
    sink: Box<dyn FrameSink>,
    timing: TimingState,
    clock: Instant,
    state: RecorderState,
    frame_delay_ms: i64,
}

impl Worker {
    fn run(mut self) {
        while self.state != RecorderState::Terminated {
            self.apply_commands();
            match self.state {
                RecorderState::Recording => self.record_pass(),
                RecorderState::Stopped => {
                    self.close_sink();
                    self.discard_pending();
                    self.mailbox.wait_ready(IDLE_WAIT);
                }
                RecorderState::Paused => {
                    self.discard_pending();
                    self.mailbox.wait_ready(IDLE_WAIT);
                }
                RecorderState::Terminated => {}
            }
        }
        self.close_sink();
        debug!("recorder worker exited");
    }

    fn now_ms(&self) -> i64 {
        self.clock.elapsed().as_millis() as i64
    }

    fn set_state(&mut self, next: RecorderState) {
        debug!(from = ?self.state, to = ?next, "recorder state change");
        self.state = next;
        self.shared.state.store(next.as_u8(), Ordering::Relaxed);
    }

    fn apply_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(cmd) => self.apply(cmd),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    // A vanished handle can never stop this thread again.
                    self.set_state(RecorderState::Terminated);
                    break;
                }
            }
        }
    }

    fn apply(&mut self, cmd: Command) {
        match (cmd, self.state) {
            (Command::Start, RecorderState::Stopped) => {
                self.clock = Instant::now();
                self.timing.reset();
                self.shared.video_length_ms.store(0, Ordering::Relaxed);
                self.shared.fps.store(0, Ordering::Relaxed);
                self.mailbox.take();
                self.trigger.request();
                self.set_state(RecorderState::Recording);
            }
            (Command::Start, RecorderState::Paused) => {
                let now = self.now_ms();
                self.timing.resume(now);
                self.mailbox.take();
                self.trigger.request();
                self.set_state(RecorderState::Recording);
            }
            (Command::Pause, RecorderState::Recording) => {
                let now = self.now_ms();
                self.timing.pause(now);
                self.shared.fps.store(0, Ordering::Relaxed);
                self.set_state(RecorderState::Paused);
            }
            (Command::Stop, RecorderState::Recording | RecorderState::Paused) => {
                self.timing.clear_fps();
                self.shared.fps.store(0, Ordering::Relaxed);
                // The session itself is closed by the next Stopped pass.
                self.set_state(RecorderState::Stopped);
            }
            (Command::Terminate, _) => {
                self.set_state(RecorderState::Terminated);
            }
            (Command::SetBitRate(bit_rate), _) => {
                // A queued stop may not have closed the session yet; settle
                // that first so the ordering guarantee of the queue holds.
                if self.state == RecorderState::Stopped {
                    self.close_sink();
                }
                if self.sink.set_bit_rate(bit_rate) {
                    self.shared.bit_rate.store(bit_rate, Ordering::Relaxed);
                } else {
                    debug!(bit_rate, "bit rate change rejected by the sink");
                }
            }
            (cmd, state) => {
                debug!(?cmd, ?state, "ignoring invalid transition");
            }
        }
    }

    fn record_pass(&mut self) {
        if !self.sink.is_open() {
            match self.sink.open() {
                Ok(()) => {
                    self.frame_delay_ms = i64::from(1000 / self.sink.fps().max(1));
                    debug!(frame_delay_ms = self.frame_delay_ms, "encoder session open");
                }
                Err(err) => {
                    warn!(error = %err, "opening the encoder failed, retrying");
                    // A pending frame is unwritable here, so only a nudge or
                    // the timeout should end this wait.
                    self.mailbox.wait_wake(IDLE_WAIT);
                    return;
                }
            }
        }

        let now = self.now_ms();
        if self.mailbox.ready() && self.timing.should_write(now, self.frame_delay_ms) {
            if let Some(mut frame) = self.mailbox.take() {
                self.trigger.request();
                let frame_length = self.timing.advance(now, self.frame_delay_ms);
                overlay::stamp_timecode(&mut frame, self.timing.video_length);
                match self.sink.write_frame(&frame, frame_length) {
                    Ok(_) => self.timing.count_write(now),
                    Err(err) => warn!(error = %err, "frame write failed, stream continues"),
                }
                self.shared
                    .video_length_ms
                    .store(self.timing.video_length, Ordering::Relaxed);
                self.shared.fps.store(self.timing.fps, Ordering::Relaxed);
            }
            return;
        }

        if self.mailbox.ready() {
            // Frame waiting but not yet due: sleep out the pacing interval.
            self.mailbox
                .wait_wake(self.timing.until_due(now, self.frame_delay_ms));
        } else {
            self.mailbox
                .wait_ready(Duration::from_millis(self.frame_delay_ms.max(1) as u64));
        }
    }

    fn discard_pending(&mut self) {
        if self.mailbox.take().is_some() {
            debug!(state = ?self.state, "discarding a frame captured while not recording");
        }
    }

    fn close_sink(&mut self) {
        if self.sink.is_open()
            && let Err(err) = self.sink.close()
        {
            warn!(error = %err, "closing the encoder session failed");
        }
    }
}

/// Owning handle to the recorder thread.
///
/// Commands are applied asynchronously by the worker; the telemetry getters
/// ([`fps`](Self::fps), [`video_length_ms`](Self::video_length_ms),
/// [`state`](Self::state)) are eventually-consistent snapshots meant for
/// pollers and never suitable for cross-thread control decisions. Dropping the
/// handle terminates and joins the worker.
pub struct RecorderHandle {
    shared: Arc<Shared>,
    commands: Sender<Command>,
    mailbox: Arc<FrameMailbox>,
    worker: Option<JoinHandle<()>>,
}

impl RecorderHandle {
    /// Spawns the recorder thread. `make_sink` runs on the new thread so the
    /// sink, including any single-thread conversion state inside it, never
    /// crosses threads.
    #[tracing::instrument(skip_all)]
    pub fn spawn<F>(
        mailbox: Arc<FrameMailbox>,
        trigger: CaptureTrigger,
        make_sink: F,
    ) -> LivecapResult<Self>
    where
        F: FnOnce() -> Box<dyn FrameSink> + Send + 'static,
    {
        use anyhow::Context as _;

        let shared = Arc::new(Shared::new());
        let (commands, rx) = mpsc::channel();
        let worker = {
            let shared = Arc::clone(&shared);
            let mailbox = Arc::clone(&mailbox);
            std::thread::Builder::new()
                .name("livecap-recorder".to_string())
                .spawn(move || {
                    let sink = make_sink();
                    shared.bit_rate.store(sink.bit_rate(), Ordering::Relaxed);
                    Worker {
                        frame_delay_ms: i64::from(1000 / sink.fps().max(1)),
                        sink,
                        shared,
                        commands: rx,
                        mailbox,
                        trigger,
                        timing: TimingState::new(),
                        clock: Instant::now(),
                        state: RecorderState::Stopped,
                    }
                    .run();
                })
                .context("failed to spawn the recorder thread")?
        };

        Ok(Self {
            shared,
            commands,
            mailbox,
            worker: Some(worker),
        })
    }

    fn send(&self, cmd: Command) {
        if self.commands.send(cmd).is_ok() {
            self.mailbox.wake();
        }
    }

    /// Starts a new recording from Stopped, or resumes from Paused.
    pub fn start_record(&self) {
        self.send(Command::Start);
    }

    pub fn pause_record(&self) {
        self.send(Command::Pause);
    }

    /// Ends the current recording segment and closes its file. The thread
    /// stays alive for a future [`start_record`](Self::start_record).
    pub fn stop_record(&self) {
        self.send(Command::Stop);
    }

    /// Ends the worker loop permanently and joins the thread. The open
    /// session, if any, is closed on the way out.
    pub fn terminate(&mut self) {
        self.send(Command::Terminate);
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("recorder worker panicked");
        }
    }

    pub fn state(&self) -> RecorderState {
        RecorderState::from_u8(self.shared.state.load(Ordering::Relaxed))
    }

    pub fn is_recording(&self) -> bool {
        self.state() == RecorderState::Recording
    }

    /// Writes counted in the most recently completed one-second window.
    pub fn fps(&self) -> u32 {
        self.shared.fps.load(Ordering::Relaxed)
    }

    /// Accumulated recorded time in milliseconds, excluding pauses.
    pub fn video_length_ms(&self) -> i64 {
        self.shared.video_length_ms.load(Ordering::Relaxed)
    }

    pub fn bit_rate(&self) -> usize {
        self.shared.bit_rate.load(Ordering::Relaxed)
    }

    /// Requests a bit rate for the next recording. Rejected while a session
    /// may be open (Recording or Paused) or for a zero rate.
    pub fn set_bit_rate(&self, bit_rate: usize) -> bool {
        if bit_rate == 0 {
            return false;
        }
        if matches!(
            self.state(),
            RecorderState::Recording | RecorderState::Paused
        ) {
            return false;
        }
        self.send(Command::SetBitRate(bit_rate));
        true
    }
}

impl Drop for RecorderHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}
