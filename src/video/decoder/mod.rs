//! Frame decoders
//!
//! The viewer turns each received payload into a displayable image through
//! a [`FrameDecoder`]. The default implementation is turbojpeg to RGB24.

pub mod mjpeg_turbo;

pub use mjpeg_turbo::MjpegTurboDecoder;

use crate::error::Result;

/// A decoded frame ready for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGB24 pixels, `width * height * 3` bytes
    pub pixels: Vec<u8>,
}

/// Turns a compressed payload into a [`DecodedImage`]
///
/// A decode error is never fatal to the stream: the viewer logs it and
/// moves on to the next frame.
pub trait FrameDecoder: Send + 'static {
    fn decode(&mut self, data: &[u8]) -> Result<DecodedImage>;
}
