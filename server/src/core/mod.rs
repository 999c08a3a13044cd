//! Core subsystem. App state, configuration and HTTP/WebSocket plumbing.

pub mod app;
pub mod middleware;
pub mod rate_limit;
pub mod websocket;

pub use crate::core::middleware::RequestId;
pub use crate::core::rate_limit::RateLimitManager;

// vim: ts=4
