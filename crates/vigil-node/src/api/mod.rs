//! HTTP and WebSocket handlers.

pub mod error;
pub mod health;
pub mod plan;
pub mod runs;
pub mod ws;
