#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

//! mdshare - real-time collaborative Markdown/HTML sharing server.
//!
//! External clients (a browser editor and an Obsidian plugin) create shared
//! documents over the HTTP share API and exchange live edits through a
//! per-document WebSocket channel carrying the Yjs sync protocol. Storage
//! and the coordination cache are pluggable adapters; see the adapter crates
//! for the SQLite, Redis and in-memory implementations.

pub mod cache_adapter;
pub mod core;
pub mod crdt;
pub mod error;
pub mod note;
pub mod prelude;
pub mod routes;
pub mod sanitize;
pub mod store_adapter;
pub mod types;

pub use crate::core::app::{App, AppBuilder, AppState};

// vim: ts=4
