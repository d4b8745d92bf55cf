//! Stream Health State Machine
//!
//! Per-stream liveness tracking for the preview UI: four independent latches
//! (`playing` / `stopped` / `frame_dropped` / `timed_out`) driven by one
//! serialized event stream, plus two rearmable timers. A stream with no new
//! frame for a couple of frame periods latches `frame_dropped`; a stream
//! silent for the freeze timeout latches `timed_out`. The next frame clears
//! both.
//!
//! Timers never mutate flags directly. They post ordinary events into the
//! same channel as the router, so the machine task stays the single writer
//! and the observable state is race free even when timer firings and frame
//! arrivals interleave.

use evs_service::{StreamEvent, StreamKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Frame rate we expect from all cameras.
pub const EXPECTED_FPS: u32 = 30;

/// Time from last frame until the dropped-frame indicator latches.
pub const FRAME_DROPPED_TIMEOUT: Duration = Duration::from_millis(2 * 1000 / EXPECTED_FPS as u64);

/// Time from last frame until the stream counts as visually frozen.
pub const STREAM_FREEZE_TIMEOUT: Duration = Duration::from_secs(2);

/// The four health latches shown to the user.
///
/// All flags start raised: before the first real event the stream state is
/// unknown and reads as fully flagged until `StreamStarted` normalizes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamHealth {
    pub playing: bool,
    pub stopped: bool,
    pub frame_dropped: bool,
    pub timed_out: bool,
}

impl Default for StreamHealth {
    fn default() -> Self {
        Self {
            playing: true,
            stopped: true,
            frame_dropped: true,
            timed_out: true,
        }
    }
}

/// Timer durations for one stream.
#[derive(Debug, Clone, Copy)]
pub struct HealthTimeouts {
    /// A single missed frame: a couple of frame periods.
    pub frame_dropped: Duration,
    /// The stream looks frozen: much longer than a frame period.
    pub stream_freeze: Duration,
}

impl HealthTimeouts {
    /// Derive both timeouts from an expected frame rate.
    pub fn from_fps(fps: u32) -> Self {
        Self {
            frame_dropped: Duration::from_millis(2 * 1000 / fps as u64),
            stream_freeze: STREAM_FREEZE_TIMEOUT,
        }
    }
}

impl Default for HealthTimeouts {
    fn default() -> Self {
        Self::from_fps(EXPECTED_FPS)
    }
}

/// Events consumed by the machine, in arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HealthEvent {
    StreamStarted,
    StreamStopped,
    /// Dropped timer fired (or the service reported a drop).
    FrameDropped,
    /// Freeze timer fired (or the service reported a stall).
    TimedOut,
    /// A frame was delivered; evidence of liveness.
    NewFrame,
}

/// Handle to one stream's health machine.
///
/// Events are accepted from any thread and serialized through one channel;
/// the spawned task is the only writer of the flags. The machine lives for
/// the lifetime of the owning stream and is discarded, not reset, on
/// teardown.
pub struct StreamHealthMachine {
    events: mpsc::UnboundedSender<HealthEvent>,
    flags: watch::Receiver<StreamHealth>,
    task: JoinHandle<()>,
}

impl StreamHealthMachine {
    /// Spawn the machine task. Requires a running tokio runtime.
    pub fn spawn(kind: StreamKind, timeouts: HealthTimeouts) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (flags_tx, flags_rx) = watch::channel(StreamHealth::default());
        let task = MachineTask {
            kind,
            timeouts,
            events_tx: events_tx.clone(),
            flags: StreamHealth::default(),
            flags_tx,
            dropped_timer: None,
            freeze_timer: None,
        };
        let handle = tokio::spawn(task.run(events_rx));
        Self {
            events: events_tx,
            flags: flags_rx,
            task: handle,
        }
    }

    /// Forward a stream lifecycle event from the camera service.
    pub fn on_stream_event(&self, event: StreamEvent) {
        let event = match event {
            StreamEvent::Started => HealthEvent::StreamStarted,
            StreamEvent::Stopped => HealthEvent::StreamStopped,
            StreamEvent::FrameDropped => HealthEvent::FrameDropped,
            StreamEvent::TimedOut => HealthEvent::TimedOut,
        };
        self.send(event);
    }

    /// A frame arrived, regardless of whether the queue admitted it.
    pub fn on_new_frame(&self) {
        self.send(HealthEvent::NewFrame);
    }

    /// Read-only observer for the UI layer.
    pub fn watch(&self) -> watch::Receiver<StreamHealth> {
        self.flags.clone()
    }

    /// Current flags snapshot.
    pub fn current(&self) -> StreamHealth {
        *self.flags.borrow()
    }

    fn send(&self, event: HealthEvent) {
        if self.events.send(event).is_err() {
            warn!("health machine task is gone, event discarded");
        }
    }
}

impl Drop for StreamHealthMachine {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct MachineTask {
    kind: StreamKind,
    timeouts: HealthTimeouts,
    /// Clone handed to timer tasks so firings join the ordinary event order.
    events_tx: mpsc::UnboundedSender<HealthEvent>,
    flags: StreamHealth,
    flags_tx: watch::Sender<StreamHealth>,
    dropped_timer: Option<JoinHandle<()>>,
    freeze_timer: Option<JoinHandle<()>>,
}

impl MachineTask {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<HealthEvent>) {
        while let Some(event) = events.recv().await {
            self.apply(event);
        }
        self.cancel_timers();
    }

    fn apply(&mut self, event: HealthEvent) {
        debug!(stream = self.kind.label(), ?event, "health event");
        match event {
            HealthEvent::StreamStarted => {
                self.flags = StreamHealth {
                    playing: true,
                    stopped: false,
                    frame_dropped: false,
                    timed_out: false,
                };
                self.rearm_timers();
            }
            HealthEvent::StreamStopped => {
                // Fault latches stay as they were; a stopped stream is not
                // evidence the faults went away.
                self.flags.playing = false;
                self.flags.stopped = true;
                self.cancel_timers();
            }
            HealthEvent::FrameDropped => {
                self.flags.frame_dropped = true;
            }
            HealthEvent::TimedOut => {
                self.flags.timed_out = true;
            }
            HealthEvent::NewFrame => {
                // Normal recovery path, including after a latched timeout.
                self.flags.frame_dropped = false;
                self.flags.timed_out = false;
                self.rearm_timers();
            }
        }
        // Publish after every event so observers see a serialized history.
        let _ = self.flags_tx.send(self.flags);
    }

    fn rearm_timers(&mut self) {
        self.cancel_timers();
        self.dropped_timer = Some(Self::arm(
            self.events_tx.clone(),
            self.timeouts.frame_dropped,
            HealthEvent::FrameDropped,
        ));
        self.freeze_timer = Some(Self::arm(
            self.events_tx.clone(),
            self.timeouts.stream_freeze,
            HealthEvent::TimedOut,
        ));
    }

    fn cancel_timers(&mut self) {
        if let Some(timer) = self.dropped_timer.take() {
            timer.abort();
        }
        if let Some(timer) = self.freeze_timer.take() {
            timer.abort();
        }
    }

    fn arm(
        events: mpsc::UnboundedSender<HealthEvent>,
        after: Duration,
        event: HealthEvent,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = events.send(event);
        })
    }
}

impl Drop for MachineTask {
    fn drop(&mut self) {
        self.cancel_timers();
    }
}
