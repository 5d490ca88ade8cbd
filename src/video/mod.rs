//! Frames and where they come from
//!
//! - `frame` - the opaque compressed frame passed around the pipeline
//! - `buffer` - single-slot latest-frame hand-off between producer and viewers
//! - `source` - frame producers (test pattern, directory replay)
//! - `decoder` - JPEG decoding for the viewer

pub mod buffer;
pub mod decoder;
pub mod frame;
pub mod source;

pub use buffer::LatestFrameBuffer;
pub use decoder::{DecodedImage, FrameDecoder, MjpegTurboDecoder};
pub use frame::Frame;
pub use source::{
    create_source, encode_test_pattern, DirectorySource, FrameSink, FrameSource,
    TestPatternSource,
};
