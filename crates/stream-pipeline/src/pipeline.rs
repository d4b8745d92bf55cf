//! Per-stream pipeline assembly and stream orchestration
//!
//! One `StreamPipeline` per physical camera; front and rear are two
//! instances of this type with fully separate state.

use crate::config::PipelineConfig;
use crate::redraw::RedrawSignal;
use crate::router::FrameRouter;
use crate::PipelineError;
use evs_service::{CameraConnection, CameraService, EvsError, ServiceState, StreamKind};
use frame_queue::FrameQueue;
use preview_render::PreviewRenderer;
use std::sync::{Arc, Mutex};
use stream_health::StreamHealthMachine;
use tokio::sync::watch;
use tracing::{info, warn};

/// How a stream start request resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The service accepted the request; frames will be pushed.
    Streaming,
    /// The service refused synchronously (unavailable/busy); the caller
    /// should render the placeholder still instead of live frames.
    Placeholder,
    /// The service reports this stream kind as unavailable; nothing to do.
    Unavailable,
}

/// All per-stream moving parts, wired together.
pub struct StreamPipeline {
    kind: StreamKind,
    connection: Mutex<CameraConnection>,
    frames: Arc<FrameQueue>,
    health: Arc<StreamHealthMachine>,
    router: Arc<FrameRouter>,
    redraw: Arc<RedrawSignal>,
}

impl StreamPipeline {
    /// Build the pipeline for one stream, bound to a connected camera
    /// service. Requires a running tokio runtime (the health machine spawns
    /// its event task).
    pub fn new(
        kind: StreamKind,
        config: &PipelineConfig,
        service: Arc<dyn CameraService>,
    ) -> Self {
        let frames = Arc::new(FrameQueue::with_capacity(config.max_frame_lag));
        let health = Arc::new(StreamHealthMachine::spawn(kind, config.timeouts()));
        let redraw = Arc::new(RedrawSignal::new());
        let router = Arc::new(FrameRouter::new(
            frames.clone(),
            health.clone(),
            service.clone(),
            redraw.clone(),
        ));

        let mut connection = CameraConnection::new(kind);
        connection.on_connected(service);

        Self {
            kind,
            connection: Mutex::new(connection),
            frames,
            health,
            router,
            redraw,
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn frames(&self) -> Arc<FrameQueue> {
        self.frames.clone()
    }

    pub fn router(&self) -> Arc<FrameRouter> {
        self.router.clone()
    }

    pub fn redraw(&self) -> Arc<RedrawSignal> {
        self.redraw.clone()
    }

    /// Read-only health observer for the UI indicators.
    pub fn health_watch(&self) -> watch::Receiver<stream_health::StreamHealth> {
        self.health.watch()
    }

    pub fn service_state(&self) -> ServiceState {
        self.connection.lock().unwrap().state()
    }

    /// Status notification from the camera service.
    pub fn on_service_status(&self, state: ServiceState) {
        self.connection.lock().unwrap().on_status(state);
    }

    /// Build the render stage for this stream. The caller owns it on the
    /// render context; the pipeline keeps no reference.
    pub fn renderer(&self) -> PreviewRenderer {
        PreviewRenderer::new(self.frames.clone(), self.router.clone())
    }

    /// Request the video stream.
    ///
    /// A synchronous unavailable/busy refusal is not a failure: the caller
    /// falls back to [`placeholder_image`]. A missing service connection is
    /// a hard failure.
    pub fn start(&self) -> Result<StartOutcome, PipelineError> {
        let (service, state) = {
            let connection = self.connection.lock().unwrap();
            (connection.service(), connection.state())
        };
        let service = service.ok_or(PipelineError::NotConnected)?;

        if state == ServiceState::Unavailable {
            warn!(stream = self.kind.label(), "service type is unavailable");
            return Ok(StartOutcome::Unavailable);
        }

        match service.start_stream(self.kind, self.router.clone()) {
            Ok(()) => {
                info!(stream = self.kind.label(), "video stream requested");
                self.connection
                    .lock()
                    .unwrap()
                    .on_status(ServiceState::Requested);
                Ok(StartOutcome::Streaming)
            }
            Err(EvsError::ServiceUnavailable) | Err(EvsError::ServiceBusy) => {
                warn!(
                    stream = self.kind.label(),
                    "service refused the stream, showing placeholder"
                );
                Ok(StartOutcome::Placeholder)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Stop the stream and drop the service connection. Queued frames are
    /// drained by the stop event; a frame in the middle of a draw finishes
    /// its draw-wait-release cycle independently.
    pub fn shutdown(&self) {
        let service = self.connection.lock().unwrap().service();
        if let Some(service) = service {
            service.stop_stream(self.kind);
        }
        self.connection.lock().unwrap().on_disconnected();
    }
}

/// The "camera unavailable" still shown when the service refuses a stream:
/// dark background with a light diagonal slash.
pub fn placeholder_image() -> image::RgbaImage {
    const SIZE: u32 = 64;
    image::RgbaImage::from_fn(SIZE, SIZE, |x, y| {
        let on_slash = x.abs_diff(y) <= 2;
        if on_slash {
            image::Rgba([0xc0, 0xc0, 0xc0, 0xff])
        } else {
            image::Rgba([0x20, 0x20, 0x20, 0xff])
        }
    })
}
