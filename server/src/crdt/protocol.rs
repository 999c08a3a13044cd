//! Yjs wire protocol helpers
//!
//! The WebSocket channel carries length-prefixed tagged frames in the lib0
//! v1 encoding, modeled by `yrs::sync::Message`:
//! sync step 1 (state vector), sync step 2 / update (missing ops), awareness
//! diffs, awareness query and an auth frame for server-side rejections.
//!
//! Everything here is a thin, allocation-light layer over yrs so the
//! live-document actor deals in decoded messages only.

use yrs::sync::{AwarenessUpdate, Message, SyncMessage};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, ReadTxn, StateVector, Transact};

// WebSocket close codes used by the hub.
pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_POLICY: u16 = 1008;
pub const CLOSE_SERVER_ERROR: u16 = 1011;
pub const CLOSE_PROTOCOL_ERROR: u16 = 4000;
pub const CLOSE_OVERLOADED: u16 = 4001;

/// Decode a client frame. `None` marks a malformed frame; the caller closes
/// the connection with `CLOSE_PROTOCOL_ERROR`.
pub fn decode_frame(data: &[u8]) -> Option<Message> {
	Message::decode_v1(data).ok()
}

/// First half of the sync handshake: our state vector.
pub fn sync_step1(doc: &Doc) -> Vec<u8> {
	let sv = doc.transact().state_vector();
	Message::Sync(SyncMessage::SyncStep1(sv)).encode_v1()
}

/// Second half: everything the remote state vector is missing.
pub fn sync_step2(doc: &Doc, remote: &StateVector) -> Vec<u8> {
	let diff = doc.transact().encode_state_as_update_v1(remote);
	Message::Sync(SyncMessage::SyncStep2(diff)).encode_v1()
}

/// A live incremental update frame.
pub fn update_frame(update: Vec<u8>) -> Vec<u8> {
	Message::Sync(SyncMessage::Update(update)).encode_v1()
}

/// An awareness diff frame.
pub fn awareness_frame(update: &AwarenessUpdate) -> Vec<u8> {
	Message::Awareness(update.clone()).encode_v1()
}

/// Server-side rejection carried in-band before a close.
pub fn auth_deny(reason: &str) -> Vec<u8> {
	Message::Auth(Some(reason.to_string())).encode_v1()
}

/// True when the frame is a sync-family message (step 1/2 or update); these
/// are the frames subject to the per-connection inbound rate limit.
pub fn is_sync_frame(data: &[u8]) -> bool {
	data.first() == Some(&0)
}

#[cfg(test)]
mod tests {
	use super::*;
	use yrs::GetString;

	#[test]
	fn test_step1_roundtrip() {
		let doc = Doc::new();
		let frame = sync_step1(&doc);
		match decode_frame(&frame) {
			Some(Message::Sync(SyncMessage::SyncStep1(sv))) => {
				assert_eq!(sv, doc.transact().state_vector());
			}
			other => panic!("unexpected frame: {:?}", other),
		}
	}

	#[test]
	fn test_step2_carries_missing_ops() {
		let doc = Doc::new();
		let text = doc.get_or_insert_text("content");
		{
			let mut txn = doc.transact_mut();
			yrs::Text::push(&text, &mut txn, "hello");
		}

		let frame = sync_step2(&doc, &StateVector::default());
		let Some(Message::Sync(SyncMessage::SyncStep2(diff))) = decode_frame(&frame) else {
			panic!("expected sync step 2");
		};

		let replica = Doc::new();
		let replica_text = replica.get_or_insert_text("content");
		{
			let mut txn = replica.transact_mut();
			let update = yrs::Update::decode_v1(&diff).unwrap();
			txn.apply_update(update).unwrap();
		}
		assert_eq!(replica_text.get_string(&replica.transact()), "hello");
	}

	#[test]
	fn test_auth_deny_roundtrip() {
		let frame = auth_deny("overloaded, retry in 5s");
		match decode_frame(&frame) {
			Some(Message::Auth(Some(reason))) => assert!(reason.contains("overloaded")),
			other => panic!("unexpected frame: {:?}", other),
		}
	}

	#[test]
	fn test_malformed_frame_rejected() {
		// empty frame
		assert!(decode_frame(&[]).is_none());
		// sync step 1 whose payload length overruns the buffer
		assert!(decode_frame(&[0, 0, 5]).is_none());
	}

	#[test]
	fn test_sync_frame_detection() {
		let doc = Doc::new();
		assert!(is_sync_frame(&sync_step1(&doc)));
		assert!(is_sync_frame(&update_frame(vec![0, 0])));
		assert!(!is_sync_frame(&auth_deny("no")));
		assert!(!is_sync_frame(&[]));
	}
}

// vim: ts=4
