//! glass-stream - live MJPEG over HTTP
//!
//! A producer publishes JPEG frames into a single-slot buffer; an HTTP
//! server fans them out to any number of viewers as
//! `multipart/x-mixed-replace`, and a reconnecting client decodes and
//! renders such a stream.

pub mod client;
pub mod config;
pub mod error;
pub mod stream;
pub mod utils;
pub mod video;

pub use error::{AppError, Result};
