//! Utility modules
//!
//! Common helpers shared by the server, the viewer client and the CLI.

pub mod fps;
pub mod net;
pub mod throttle;

pub use fps::{FpsCalculator, FpsWindow};
pub use net::{bind_tcp_listener, resolve_bind_addr};
pub use throttle::LogThrottler;
