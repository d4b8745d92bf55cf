//! Per-stream connection state to the camera service
//!
//! Tracks the service lifecycle for one camera stream: created when the host
//! binds to the service, updated by status notifications, reset to
//! `Unavailable` with no handle on disconnect.

use crate::{CameraService, StreamKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Service-reported state of one camera stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    /// The service cannot serve this stream
    Unavailable,
    /// Connected, no stream running
    Inactive,
    /// A stream has been requested but is not yet delivering
    Requested,
    /// The stream is delivering frames
    Active,
}

/// Connection bookkeeping for one camera stream.
pub struct CameraConnection {
    kind: StreamKind,
    state: ServiceState,
    handle: Option<Arc<dyn CameraService>>,
}

impl CameraConnection {
    pub fn new(kind: StreamKind) -> Self {
        Self {
            kind,
            state: ServiceState::Unavailable,
            handle: None,
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    /// The service handle, if connected.
    pub fn service(&self) -> Option<Arc<dyn CameraService>> {
        self.handle.clone()
    }

    /// The host app has bound to the camera service.
    pub fn on_connected(&mut self, service: Arc<dyn CameraService>) {
        info!(stream = self.kind.label(), "connected to camera service");
        self.handle = Some(service);
        self.state = ServiceState::Inactive;
    }

    /// The service connection was lost. Drops the handle and resets state.
    pub fn on_disconnected(&mut self) {
        info!(stream = self.kind.label(), "disconnected from camera service");
        self.handle = None;
        self.state = ServiceState::Unavailable;
    }

    /// Status notification from the service.
    pub fn on_status(&mut self, state: ServiceState) {
        debug!(
            stream = self.kind.label(),
            ?state,
            "camera service status changed"
        );
        self.state = state;
    }
}
