//! Bounded Frame Hand-Off Queue
//!
//! FIFO mailbox of pending frame descriptors between the camera callback
//! thread (enqueue) and the render thread (dequeue). Capacity is
//! [`MAX_FRAME_LAG`]; insertion beyond capacity is rejected, never silently
//! overwritten, and the rejected frame travels back to the caller so it can
//! be released to the camera service.

use evs_service::FrameDescriptor;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Maximum number of frames buffered between camera and renderer.
///
/// Frames beyond this lag would only add latency to the preview, so they are
/// dropped at admission.
pub const MAX_FRAME_LAG: usize = 3;

/// Outcome of an enqueue attempt.
#[derive(Debug)]
pub enum Admission {
    /// The frame was appended to the tail.
    Admitted,
    /// The queue was full. The frame comes back to the caller, which must
    /// release it to the camera service immediately.
    Dropped(FrameDescriptor),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// Bounded FIFO of pending frames, one per camera stream.
///
/// Every operation takes the single internal mutex, so enqueue, dequeue and
/// drain are linearizable across the camera callback thread and the render
/// thread. The lock is held only for the O(1) queue mutation, never across
/// GPU work or a service call.
pub struct FrameQueue {
    frames: Mutex<VecDeque<FrameDescriptor>>,
    capacity: usize,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self::with_capacity(MAX_FRAME_LAG)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append a frame to the tail, or reject it when the queue is at
    /// capacity.
    pub fn try_enqueue(&self, frame: FrameDescriptor) -> Admission {
        let mut frames = self.frames.lock().unwrap();
        if frames.len() >= self.capacity {
            warn!(
                stream = frame.stream().label(),
                lag = frames.len(),
                "frame queue full, dropping frame"
            );
            return Admission::Dropped(frame);
        }
        frames.push_back(frame);
        Admission::Admitted
    }

    /// Remove and return the oldest frame without blocking.
    ///
    /// Ownership transfers to the caller, which must release the frame after
    /// rendering. The queue does not release it.
    pub fn try_dequeue_head(&self) -> Option<FrameDescriptor> {
        self.frames.lock().unwrap().pop_front()
    }

    /// True when at least one frame remains queued. Used after a dequeue to
    /// decide whether to request another render pass right away instead of
    /// waiting for the next frame event.
    pub fn peek_has_more(&self) -> bool {
        !self.frames.lock().unwrap().is_empty()
    }

    /// Atomically empty the queue, invoking `release_fn` once per drained
    /// frame. Called on stream stop so no descriptor outlives the stream.
    pub fn drain_and_release<F>(&self, mut release_fn: F)
    where
        F: FnMut(FrameDescriptor),
    {
        let drained: Vec<FrameDescriptor> = {
            let mut frames = self.frames.lock().unwrap();
            frames.drain(..).collect()
        };
        if !drained.is_empty() {
            debug!(count = drained.len(), "draining queued frames");
        }
        for frame in drained {
            release_fn(frame);
        }
    }

    pub fn len(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evs_service::{FrameDescriptor, HardwareImage, ReturnToken, StreamKind};
    use proptest::prelude::*;

    fn frame(slot: usize) -> FrameDescriptor {
        let pixels: std::sync::Arc<[u8]> = vec![0u8; 4 * 4 * 4].into();
        FrameDescriptor::new(
            HardwareImage::new(4, 4, 16, pixels),
            ReturnToken::new(StreamKind::Rear, slot),
        )
    }

    fn discard(frame: FrameDescriptor) {
        frame.release();
    }

    #[test]
    fn test_fifo_order() {
        let queue = FrameQueue::new();
        for slot in 0..3 {
            assert!(queue.try_enqueue(frame(slot)).is_admitted());
        }
        for slot in 0..3 {
            let head = queue.try_dequeue_head().unwrap();
            assert_eq!(head.release().slot(), slot);
        }
        assert!(queue.try_dequeue_head().is_none());
    }

    #[test]
    fn test_fourth_enqueue_is_dropped() {
        let queue = FrameQueue::new();
        for slot in 0..3 {
            assert!(queue.try_enqueue(frame(slot)).is_admitted());
        }
        match queue.try_enqueue(frame(3)) {
            Admission::Dropped(rejected) => {
                // The dropped frame is the incoming one, not a queued one
                assert_eq!(rejected.release().slot(), 3);
            }
            Admission::Admitted => panic!("enqueue beyond capacity must drop"),
        }
        assert_eq!(queue.len(), 3);
        // Head is still the first admitted frame
        assert_eq!(queue.try_dequeue_head().unwrap().release().slot(), 0);
        queue.drain_and_release(discard);
    }

    #[test]
    fn test_peek_has_more() {
        let queue = FrameQueue::new();
        assert!(!queue.peek_has_more());
        queue.try_enqueue(frame(0));
        queue.try_enqueue(frame(1));
        discard(queue.try_dequeue_head().unwrap());
        assert!(queue.peek_has_more());
        discard(queue.try_dequeue_head().unwrap());
        assert!(!queue.peek_has_more());
    }

    #[test]
    fn test_drain_releases_each_frame_once() {
        let queue = FrameQueue::new();
        queue.try_enqueue(frame(0));
        queue.try_enqueue(frame(1));
        let mut released = Vec::new();
        queue.drain_and_release(|f| released.push(f.release().slot()));
        assert_eq!(released, vec![0, 1]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_on_empty_queue_is_noop() {
        let queue = FrameQueue::new();
        let mut calls = 0;
        queue.drain_and_release(|f| {
            calls += 1;
            discard(f);
        });
        assert_eq!(calls, 0);
    }

    proptest! {
        // The size bound holds for every interleaving of enqueues and
        // dequeues, and every frame handed in comes back out exactly once.
        #[test]
        fn prop_size_never_exceeds_capacity(ops in prop::collection::vec(any::<bool>(), 0..64)) {
            let queue = FrameQueue::new();
            let mut slot = 0usize;
            for is_enqueue in ops {
                if is_enqueue {
                    match queue.try_enqueue(frame(slot)) {
                        Admission::Admitted => prop_assert!(queue.len() <= MAX_FRAME_LAG),
                        Admission::Dropped(rejected) => {
                            prop_assert_eq!(queue.len(), MAX_FRAME_LAG);
                            discard(rejected);
                        }
                    }
                    slot += 1;
                } else if let Some(head) = queue.try_dequeue_head() {
                    discard(head);
                }
                prop_assert!(queue.len() <= MAX_FRAME_LAG);
            }
            queue.drain_and_release(discard);
        }
    }
}
