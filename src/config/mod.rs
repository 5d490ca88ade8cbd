//! Configuration
//!
//! Serde-backed settings for the server, frame source and viewer client,
//! loaded from a JSON file.

mod schema;
mod store;

pub use schema::{AppConfig, ClientConfig, ServerConfig, SourceConfig, SourceKind};
pub use store::ConfigStore;
