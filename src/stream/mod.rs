//! MJPEG-over-HTTP server
//!
//! - `http` - request routing and response framing
//! - `server` - accept loop and per-connection sessions

pub mod http;
pub mod server;

pub use http::{Request, Route, BOUNDARY};
pub use server::{ServerStats, StreamServer};
