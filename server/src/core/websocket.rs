//! WebSocket upgrade handler
//!
//! Admission happens before the upgrade completes: the origin allow-list and
//! the document id pattern are checked here, everything else (row lookup or
//! creation, live-document acquisition) inside the hub.

use axum::{
	extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
	extract::{Path, State},
	http::{header, HeaderMap},
	response::Response,
};
use futures::SinkExt;

use crate::crdt;
use crate::crdt::protocol::CLOSE_POLICY;
use crate::note::validate_share_id;
use crate::prelude::*;

/// Helper to close a just-upgraded socket with an error code
async fn close_with_error(mut socket: WebSocket, code: u16, reason: &'static str) {
	let _ = socket.send(Message::Close(Some(CloseFrame { code, reason: reason.into() }))).await;
	let _ = socket.close().await;
}

/// An empty allow-list permits any origin; so does a missing Origin header
/// (non-browser clients such as the Obsidian plugin).
fn origin_allowed(allow_list: &[Box<str>], origin: Option<&str>) -> bool {
	if allow_list.is_empty() {
		return true;
	}
	match origin {
		None => true,
		Some(origin) => allow_list
			.iter()
			.any(|allowed| &**allowed == "*" || allowed.eq_ignore_ascii_case(origin)),
	}
}

/// WebSocket upgrade handler for collaborative documents
///
/// Route: `/ws/{doc_id}`
pub async fn get_ws_note(
	ws: WebSocketUpgrade,
	Path(doc_id): Path<String>,
	headers: HeaderMap,
	State(app): State<App>,
) -> Response {
	let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
	if !origin_allowed(&app.opts.origin_allow_list, origin) {
		warn!("websocket rejected, origin {:?} not allowed", origin);
		return ws.on_upgrade(|socket| close_with_error(socket, CLOSE_POLICY, "origin not allowed"));
	}
	if validate_share_id(&doc_id).is_err() {
		warn!("websocket rejected, invalid document id");
		return ws
			.on_upgrade(|socket| close_with_error(socket, CLOSE_POLICY, "invalid document id"));
	}

	debug!("websocket upgrade for document {}", doc_id);
	ws.on_upgrade(move |socket| crdt::handle_note_connection(socket, doc_id, app))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_origin_allow_list() {
		let open: [Box<str>; 0] = [];
		assert!(origin_allowed(&open, Some("https://evil.example")));
		assert!(origin_allowed(&open, None));

		let list: [Box<str>; 2] = ["https://app.example".into(), "https://other.example".into()];
		assert!(origin_allowed(&list, Some("https://app.example")));
		assert!(origin_allowed(&list, Some("HTTPS://APP.EXAMPLE")));
		assert!(!origin_allowed(&list, Some("https://evil.example")));
		assert!(origin_allowed(&list, None));

		let wildcard: [Box<str>; 1] = ["*".into()];
		assert!(origin_allowed(&wildcard, Some("https://anything.example")));
	}
}

// vim: ts=4
