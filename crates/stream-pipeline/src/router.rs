//! Frame router
//!
//! Stateless glue between the camera service callback and the rest of one
//! stream's pipeline. Runs on the service's callback thread and never blocks
//! waiting on the renderer.

use crate::redraw::RedrawSignal;
use evs_service::{CameraService, FrameDescriptor, StreamCallback, StreamEvent};
use frame_queue::{Admission, FrameQueue};
use preview_render::FrameReturn;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use stream_health::StreamHealthMachine;
use tracing::debug;

/// Routes frames and stream events for one camera stream.
pub struct FrameRouter {
    frames: Arc<FrameQueue>,
    health: Arc<StreamHealthMachine>,
    service: Arc<dyn CameraService>,
    redraw: Arc<RedrawSignal>,
    dropped: AtomicU64,
}

impl FrameRouter {
    pub fn new(
        frames: Arc<FrameQueue>,
        health: Arc<StreamHealthMachine>,
        service: Arc<dyn CameraService>,
        redraw: Arc<RedrawSignal>,
    ) -> Self {
        Self {
            frames,
            health,
            service,
            redraw,
            dropped: AtomicU64::new(0),
        }
    }

    /// Frames dropped at admission since the stream was created.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl StreamCallback for FrameRouter {
    fn on_new_frame(&self, frame: FrameDescriptor) {
        // Liveness first: arrival counts regardless of the buffering outcome.
        self.health.on_new_frame();

        match self.frames.try_enqueue(frame) {
            Admission::Admitted => {}
            Admission::Dropped(frame) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                self.service.return_frame(frame);
            }
        }

        // Even after a drop: the renderer may free capacity by catching up.
        self.redraw.request();
    }

    fn on_stream_event(&self, event: StreamEvent) {
        debug!(?event, "stream event");
        self.health.on_stream_event(event);

        if event == StreamEvent::Stopped {
            // No buffered frame outlives the stream. A frame already pulled
            // by the renderer is finished and released by the draw in
            // flight, not by this drain.
            self.frames
                .drain_and_release(|frame| self.service.return_frame(frame));
        }
    }
}

impl FrameReturn for FrameRouter {
    fn on_display_frame_returned(&self, frame: FrameDescriptor) {
        self.service.return_frame(frame);
    }
}
