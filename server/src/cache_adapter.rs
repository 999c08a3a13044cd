//! Coordination Cache Adapter
//!
//! Trait and types for the keyed shared cache that accelerates live-document
//! loads and fans CRDT updates and awareness out to peer instances.
//!
//! Two logical channels per document id:
//! - state hot cache: latest known CRDT snapshot plus a version marker, an
//!   accelerator only - eviction never loses data, the store is authoritative
//! - pub/sub fan-out: per-id topic carrying update and awareness messages
//!   tagged with the publishing instance id for echo suppression
//!
//! Publish is best-effort: subscribers may miss messages under partition, and
//! the hub reconciles through a full CRDT sync exchange afterwards. Delivery
//! is per-publisher FIFO per id; no global order is needed because CRDT
//! updates commute and awareness is last-write-wins per client clock.

use async_trait::async_trait;
use futures_core::Stream;
use std::fmt::Debug;
use std::pin::Pin;

use crate::prelude::*;

/// Fan-out message kinds, tagged on the wire with a single byte.
const KIND_UPDATE: u8 = 0;
const KIND_AWARENESS: u8 = 1;

/// A message on a document's fan-out topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FanoutMessage {
	/// Incremental CRDT update bytes (Yjs v1 encoding)
	Update { payload: Vec<u8>, origin: Box<str> },
	/// Awareness diff bytes (Yjs awareness encoding)
	Awareness { payload: Vec<u8>, origin: Box<str> },
}

impl FanoutMessage {
	pub fn origin(&self) -> &str {
		match self {
			Self::Update { origin, .. } | Self::Awareness { origin, .. } => origin,
		}
	}

	/// Encode as `[kind u8][origin_len u8][origin][payload]`.
	pub fn encode(&self) -> Vec<u8> {
		let (kind, origin, payload) = match self {
			Self::Update { payload, origin } => (KIND_UPDATE, origin, payload),
			Self::Awareness { payload, origin } => (KIND_AWARENESS, origin, payload),
		};
		let origin = origin.as_bytes();
		let origin_len = origin.len().min(u8::MAX as usize);
		let mut buf = Vec::with_capacity(2 + origin_len + payload.len());
		buf.push(kind);
		buf.push(origin_len as u8);
		buf.extend_from_slice(&origin[..origin_len]);
		buf.extend_from_slice(payload);
		buf
	}

	/// Decode a fan-out envelope. Returns None for malformed frames, which
	/// subscribers drop with a warning.
	pub fn decode(data: &[u8]) -> Option<Self> {
		let (&kind, rest) = data.split_first()?;
		let (&origin_len, rest) = rest.split_first()?;
		if rest.len() < origin_len as usize {
			return None;
		}
		let (origin, payload) = rest.split_at(origin_len as usize);
		let origin: Box<str> = std::str::from_utf8(origin).ok()?.into();
		let payload = payload.to_vec();
		match kind {
			KIND_UPDATE => Some(Self::Update { payload, origin }),
			KIND_AWARENESS => Some(Self::Awareness { payload, origin }),
			_ => None,
		}
	}
}

/// A hot-cached CRDT snapshot with its version marker.
#[derive(Debug, Clone)]
pub struct CachedState {
	pub state: Vec<u8>,
	/// Monotonic per-instance flush counter; diagnostic only, the snapshot
	/// bytes themselves carry the CRDT ordering
	pub version: u64,
}

/// Stream of fan-out messages for one document id.
pub type FanoutStream = Pin<Box<dyn Stream<Item = FanoutMessage> + Send>>;

/// Coordination Cache Adapter trait.
///
/// Implementations must be safe for concurrent use; the hub shares one
/// instance across all live documents. Transient failures map to
/// `Error::ServiceUnavailable` and never carry data-loss semantics.
#[async_trait]
pub trait CacheAdapter: Debug + Send + Sync {
	/// Read the hot-cached snapshot for a document, if any.
	async fn get_state(&self, id: &str) -> ClResult<Option<CachedState>>;

	/// Store the latest snapshot in the hot cache.
	async fn put_state(&self, id: &str, state: &[u8], version: u64) -> ClResult<()>;

	/// Drop the hot-cache entry. Used as the delete tombstone and after
	/// share API writes so the next load reads fresh state from the store.
	async fn invalidate(&self, id: &str) -> ClResult<()>;

	/// Publish on the document's fan-out topic. Non-blocking best-effort.
	async fn publish(&self, id: &str, msg: FanoutMessage) -> ClResult<()>;

	/// Subscribe to the document's fan-out topic.
	async fn subscribe(&self, id: &str) -> ClResult<FanoutStream>;

	/// Cheap liveness probe for the health endpoint.
	async fn health(&self) -> ClResult<()>;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_envelope_roundtrip() {
		let msg = FanoutMessage::Update {
			payload: vec![1, 2, 3, 255],
			origin: "instance-a".into(),
		};
		let decoded = FanoutMessage::decode(&msg.encode()).unwrap();
		assert_eq!(decoded, msg);

		let msg = FanoutMessage::Awareness { payload: vec![], origin: "b".into() };
		let decoded = FanoutMessage::decode(&msg.encode()).unwrap();
		assert_eq!(decoded, msg);
	}

	#[test]
	fn test_envelope_rejects_malformed() {
		assert_eq!(FanoutMessage::decode(&[]), None);
		assert_eq!(FanoutMessage::decode(&[0]), None);
		// kind 7 is unknown
		assert_eq!(FanoutMessage::decode(&[7, 1, b'x', 1]), None);
		// origin length exceeds the buffer
		assert_eq!(FanoutMessage::decode(&[0, 200, b'x']), None);
		// origin is not UTF-8
		assert_eq!(FanoutMessage::decode(&[0, 1, 0xFF, 1]), None);
	}

	#[test]
	fn test_origin_accessor() {
		let msg = FanoutMessage::Awareness { payload: vec![9], origin: "self".into() };
		assert_eq!(msg.origin(), "self");
	}
}

// vim: ts=4
