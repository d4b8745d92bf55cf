//! Frame descriptors and the single-release ownership contract
//!
//! The camera service lends each delivered frame to the pipeline for exactly
//! one draw. [`FrameDescriptor::release`] consumes the descriptor by value,
//! so a released frame cannot be touched again; a descriptor dropped without
//! release is flagged (and asserted on in debug builds).

use crate::StreamKind;
use std::sync::Arc;
use tracing::error;

/// Opaque GPU-importable image lent by the camera service.
///
/// Backed by tightly packed or row-padded RGBA8 data. Only the texture
/// importer looks inside; everything else treats it as an opaque handle.
#[derive(Debug, Clone)]
pub struct HardwareImage {
    width: u32,
    height: u32,
    /// Row stride in bytes, >= 4 * width when the layout is valid
    stride: u32,
    pixels: Arc<[u8]>,
}

impl HardwareImage {
    pub fn new(width: u32, height: u32, stride: u32, pixels: Arc<[u8]>) -> Self {
        Self {
            width,
            height,
            stride,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Whether dimensions and backing storage are consistent. A frame that
    /// fails this check cannot be imported into a texture.
    pub fn layout_valid(&self) -> bool {
        // Widened arithmetic: absurd dimensions must read as invalid, not
        // overflow the check itself.
        self.width > 0
            && self.height > 0
            && self.stride as u64 >= self.width as u64 * 4
            && self.pixels.len() as u64 >= self.stride as u64 * self.height as u64
    }
}

/// Token identifying a service-owned buffer slot. Understood only by the
/// camera service that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnToken {
    stream: StreamKind,
    slot: usize,
}

impl ReturnToken {
    pub fn new(stream: StreamKind, slot: usize) -> Self {
        Self { stream, slot }
    }

    pub fn stream(&self) -> StreamKind {
        self.stream
    }

    pub fn slot(&self) -> usize {
        self.slot
    }
}

/// A frame lent to the pipeline: the importable image plus the return token.
///
/// Single-owner resource. Exactly one of render-and-return or
/// discard-and-return must happen for every admitted descriptor, exactly
/// once; both paths end in [`FrameDescriptor::release`].
#[derive(Debug)]
pub struct FrameDescriptor {
    image: HardwareImage,
    token: ReturnToken,
    released: bool,
}

impl FrameDescriptor {
    pub fn new(image: HardwareImage, token: ReturnToken) -> Self {
        Self {
            image,
            token,
            released: false,
        }
    }

    pub fn image(&self) -> &HardwareImage {
        &self.image
    }

    pub fn stream(&self) -> StreamKind {
        self.token.stream()
    }

    /// Consume the descriptor, yielding the return token.
    ///
    /// Only camera service implementations call this, from their
    /// `return_frame` path.
    pub fn release(mut self) -> ReturnToken {
        self.released = true;
        self.token
    }
}

impl Drop for FrameDescriptor {
    fn drop(&mut self) {
        if !self.released && !std::thread::panicking() {
            // A leaked descriptor permanently starves the service's buffer
            // pool. Loud in debug builds, logged in release.
            error!(
                stream = self.token.stream().label(),
                slot = self.token.slot(),
                "frame descriptor dropped without release"
            );
            debug_assert!(false, "frame descriptor dropped without release");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> HardwareImage {
        let pixels: Arc<[u8]> = vec![0u8; 16 * 8 * 4].into();
        HardwareImage::new(16, 8, 64, pixels)
    }

    #[test]
    fn test_layout_valid() {
        assert!(image().layout_valid());
    }

    #[test]
    fn test_layout_rejects_short_storage() {
        let pixels: Arc<[u8]> = vec![0u8; 10].into();
        let image = HardwareImage::new(16, 8, 64, pixels);
        assert!(!image.layout_valid());
    }

    #[test]
    fn test_layout_rejects_oversized_dimensions() {
        let pixels: Arc<[u8]> = vec![0u8; 64].into();
        // width * 4 exceeds u32; the check must fail cleanly, not wrap
        let image = HardwareImage::new(u32::MAX, 2, 4, pixels.clone());
        assert!(!image.layout_valid());
        let image = HardwareImage::new(4, u32::MAX, u32::MAX, pixels);
        assert!(!image.layout_valid());
    }

    #[test]
    fn test_layout_rejects_zero_dimensions() {
        let pixels: Arc<[u8]> = vec![0u8; 64].into();
        assert!(!HardwareImage::new(0, 8, 64, pixels.clone()).layout_valid());
        assert!(!HardwareImage::new(16, 0, 64, pixels).layout_valid());
    }

    #[test]
    fn test_release_yields_token() {
        let token = ReturnToken::new(StreamKind::Rear, 2);
        let frame = FrameDescriptor::new(image(), token);
        assert_eq!(frame.release(), token);
    }

    #[test]
    #[should_panic(expected = "dropped without release")]
    fn test_drop_without_release_asserts() {
        let frame = FrameDescriptor::new(image(), ReturnToken::new(StreamKind::Front, 0));
        drop(frame);
    }
}
