//! HTTP and WebSocket surface over the session registry.
//!
//! Sessions are created, inspected and ended over plain JSON routes; caller
//! audio flows over a per-session WebSocket carrying binary PCM frames.

pub mod audio;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod server;
pub mod state;

pub use server::{router, start_gateway};
pub use state::GatewayState;
