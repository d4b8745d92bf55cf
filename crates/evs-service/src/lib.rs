//! EVS Camera Service Abstraction
//!
//! Defines the boundary between the preview pipeline and the vehicle's
//! extended-view-system (EVS) camera service:
//! - Frame descriptors with enforced single-release ownership
//! - Stream lifecycle events pushed by the service
//! - Per-stream connection state
//! - A deterministic in-process service implementation for tests and the
//!   headless simulator

pub mod connection;
pub mod frame;
pub mod simulated;

pub use connection::{CameraConnection, ServiceState};
pub use frame::{FrameDescriptor, HardwareImage, ReturnToken};
pub use simulated::SimulatedEvsService;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Camera service error types
#[derive(Error, Debug)]
pub enum EvsError {
    #[error("camera service is unavailable")]
    ServiceUnavailable,

    #[error("camera service is busy")]
    ServiceBusy,

    #[error("stream {0:?} is already active")]
    AlreadyStreaming(StreamKind),

    #[error("not connected to the camera service")]
    NotConnected,
}

/// Physical camera selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    /// Front-facing exterior camera
    Front,
    /// Rear-facing exterior camera
    Rear,
}

impl StreamKind {
    /// Short label used in log output
    pub fn label(&self) -> &'static str {
        match self {
            StreamKind::Front => "front",
            StreamKind::Rear => "rear",
        }
    }
}

/// Stream lifecycle events pushed by the camera service to the registered
/// callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    /// The video stream has started delivering frames
    Started,
    /// The video stream has stopped
    Stopped,
    /// The service itself noticed a dropped frame
    FrameDropped,
    /// The service itself noticed a stalled source
    TimedOut,
}

/// Receiver for asynchronously pushed frames and stream events.
///
/// Both methods are invoked from the service's callback thread and must not
/// block waiting on the renderer.
pub trait StreamCallback: Send + Sync {
    /// A new frame has been delivered. Ownership of the descriptor transfers
    /// to the callee, which must release it back to the service exactly once.
    fn on_new_frame(&self, frame: FrameDescriptor);

    /// A stream lifecycle event occurred.
    fn on_stream_event(&self, event: StreamEvent);
}

/// The camera service surface consumed by the preview pipeline.
pub trait CameraService: Send + Sync {
    /// Request a video stream of the given kind. Frames and events are pushed
    /// to `callback`. Fails synchronously when the service cannot serve the
    /// request; the caller is expected to fall back to a placeholder image.
    fn start_stream(
        &self,
        kind: StreamKind,
        callback: Arc<dyn StreamCallback>,
    ) -> Result<(), EvsError>;

    /// Return a frame the pipeline is done with. Consumes the descriptor,
    /// handing its buffer slot back to the service.
    fn return_frame(&self, frame: FrameDescriptor);

    /// Stop the video stream of the given kind.
    fn stop_stream(&self, kind: StreamKind);
}
