//! Collaboration hub. Real-time CRDT editing over WebSocket using the Yjs
//! protocol: per-document actors, awareness, cross-instance fan-out and
//! debounced persistence.

pub mod hub;
pub mod live_doc;
pub mod protocol;
pub mod websocket;

pub use hub::{Hub, HubConfig, HubStats, MarkdownRefresh};
pub use live_doc::{AttachRejected, PeerClose, PeerSession};
pub use websocket::handle_note_connection;

// vim: ts=4
