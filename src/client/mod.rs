//! MJPEG viewer side
//!
//! - `endpoint` - `http://host:port/path` parsing
//! - `multipart` - incremental multipart response decoder
//! - `viewer` - reconnecting stream client
//! - `render` - where decoded frames go
//! - `snapshot` - one-shot `/snapshot` fetch

pub mod endpoint;
pub mod multipart;
pub mod render;
pub mod snapshot;
pub mod viewer;

pub use endpoint::StreamEndpoint;
pub use multipart::{MultipartDecoder, ResponseHead, StreamEvent};
pub use render::{write_ppm, LogRenderer, Renderer};
pub use snapshot::fetch_snapshot;
pub use viewer::{ClientEvent, ClientStats, ConnectionState, StreamClient};
