//! Deterministic in-process camera service
//!
//! Stands in for the vehicle's EVS daemon in tests and the headless
//! simulator. Frames come from a fixed per-stream buffer pool, so a leaked
//! descriptor permanently shrinks the pool the same way it would starve a
//! real service.

use crate::frame::{FrameDescriptor, HardwareImage, ReturnToken};
use crate::{CameraService, EvsError, StreamCallback, StreamEvent, StreamKind};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

struct StreamSlot {
    callback: Option<Arc<dyn StreamCallback>>,
    free_slots: Vec<usize>,
    outstanding: usize,
}

impl StreamSlot {
    fn new(pool_size: usize) -> Self {
        Self {
            callback: None,
            free_slots: (0..pool_size).collect(),
            outstanding: 0,
        }
    }
}

struct Inner {
    streams: HashMap<StreamKind, StreamSlot>,
    unavailable: bool,
    busy: bool,
}

/// In-process [`CameraService`] with a fixed buffer pool per stream.
pub struct SimulatedEvsService {
    inner: Mutex<Inner>,
}

impl SimulatedEvsService {
    /// Create a service with `pool_size` buffer slots per stream.
    pub fn new(pool_size: usize) -> Self {
        let mut streams = HashMap::new();
        streams.insert(StreamKind::Front, StreamSlot::new(pool_size));
        streams.insert(StreamKind::Rear, StreamSlot::new(pool_size));
        Self {
            inner: Mutex::new(Inner {
                streams,
                unavailable: false,
                busy: false,
            }),
        }
    }

    /// Make subsequent `start_stream` calls fail with `ServiceUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unwrap().unavailable = unavailable;
    }

    /// Make subsequent `start_stream` calls fail with `ServiceBusy`.
    pub fn set_busy(&self, busy: bool) {
        self.inner.lock().unwrap().busy = busy;
    }

    /// Buffer slots currently available for `kind`. Shrinks while frames are
    /// lent out; a leak never gives the slot back.
    pub fn free_slots(&self, kind: StreamKind) -> usize {
        self.inner.lock().unwrap().streams[&kind].free_slots.len()
    }

    /// Frames currently lent out for `kind`.
    pub fn outstanding(&self, kind: StreamKind) -> usize {
        self.inner.lock().unwrap().streams[&kind].outstanding
    }

    /// Deliver a frame to the registered callback, drawing a buffer slot from
    /// the pool. Returns false when no stream is running or the pool is
    /// exhausted.
    pub fn push_frame(&self, kind: StreamKind, image: HardwareImage) -> bool {
        let (callback, slot) = {
            let mut inner = self.inner.lock().unwrap();
            let stream = inner.streams.get_mut(&kind).expect("known stream kind");
            let Some(callback) = stream.callback.clone() else {
                debug!(stream = kind.label(), "push_frame with no active stream");
                return false;
            };
            let Some(slot) = stream.free_slots.pop() else {
                warn!(stream = kind.label(), "buffer pool exhausted");
                return false;
            };
            stream.outstanding += 1;
            (callback, slot)
        };
        // Callback runs outside the lock; it may re-enter return_frame.
        callback.on_new_frame(FrameDescriptor::new(image, ReturnToken::new(kind, slot)));
        true
    }

    /// Deliver a stream lifecycle event to the registered callback.
    pub fn push_event(&self, kind: StreamKind, event: StreamEvent) {
        let callback = {
            let inner = self.inner.lock().unwrap();
            inner.streams[&kind].callback.clone()
        };
        if let Some(callback) = callback {
            callback.on_stream_event(event);
        }
    }
}

impl CameraService for SimulatedEvsService {
    fn start_stream(
        &self,
        kind: StreamKind,
        callback: Arc<dyn StreamCallback>,
    ) -> Result<(), EvsError> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.unavailable {
                return Err(EvsError::ServiceUnavailable);
            }
            if inner.busy {
                return Err(EvsError::ServiceBusy);
            }
            let stream = inner.streams.get_mut(&kind).expect("known stream kind");
            if stream.callback.is_some() {
                return Err(EvsError::AlreadyStreaming(kind));
            }
            stream.callback = Some(callback.clone());
        }
        debug!(stream = kind.label(), "stream started");
        callback.on_stream_event(StreamEvent::Started);
        Ok(())
    }

    fn return_frame(&self, frame: FrameDescriptor) {
        let token = frame.release();
        let mut inner = self.inner.lock().unwrap();
        let stream = inner
            .streams
            .get_mut(&token.stream())
            .expect("known stream kind");
        stream.free_slots.push(token.slot());
        stream.outstanding -= 1;
    }

    fn stop_stream(&self, kind: StreamKind) {
        let callback = {
            let mut inner = self.inner.lock().unwrap();
            let stream = inner.streams.get_mut(&kind).expect("known stream kind");
            stream.callback.take()
        };
        if let Some(callback) = callback {
            debug!(stream = kind.label(), "stream stopped");
            callback.on_stream_event(StreamEvent::Stopped);
        }
    }
}

/// Synthetic RGBA test pattern used by the simulator and integration tests.
pub fn synthetic_image(width: u32, height: u32, sequence: u64) -> HardwareImage {
    let stride = width * 4;
    let mut pixels = vec![0u8; (stride * height) as usize];
    for y in 0..height {
        for x in 0..width {
            let i = ((y * stride) + x * 4) as usize;
            pixels[i] = (x + sequence as u32) as u8;
            pixels[i + 1] = (y + sequence as u32) as u8;
            pixels[i + 2] = sequence as u8;
            pixels[i + 3] = 0xff;
        }
    }
    HardwareImage::new(width, height, stride, pixels.into())
}
