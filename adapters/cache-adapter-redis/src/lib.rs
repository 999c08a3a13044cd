//! Redis-backed coordination cache adapter for mdshare.
//!
//! Keys follow the `doc:<id>:state` / `doc:<id>:updates` layout: the state
//! key holds the latest CRDT snapshot (version-prefixed, with a TTL), the
//! updates key is a pub/sub channel fanning edits and awareness out to hub
//! instances. Commands run over a shared `ConnectionManager` which
//! reconnects on its own; each subscription gets its own pub/sub connection,
//! as redis requires.
//!
//! Every failure maps to `ServiceUnavailable`: the hub treats the cache as
//! an accelerator plus best-effort transport, never as durable state.

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use mdshare::cache_adapter::{CacheAdapter, CachedState, FanoutMessage, FanoutStream};
use mdshare::prelude::*;

/// Hot-cache entries expire on their own; the store is authoritative.
const STATE_TTL_SECS: u64 = 3600;

/// Buffered fan-out messages per subscription before the reader lags.
const SUBSCRIBE_BUFFER: usize = 64;

fn cache_err(err: &redis::RedisError) -> Error {
	warn!("cache: {}", err);
	Error::ServiceUnavailable("cache unavailable".into())
}

fn state_key(id: &str) -> String {
	format!("doc:{}:state", id)
}

fn updates_channel(id: &str) -> String {
	format!("doc:{}:updates", id)
}

/// Version-prefixed snapshot value: `[version u64 BE][state bytes]`.
fn encode_state(state: &[u8], version: u64) -> Vec<u8> {
	let mut buf = Vec::with_capacity(8 + state.len());
	buf.extend_from_slice(&version.to_be_bytes());
	buf.extend_from_slice(state);
	buf
}

fn decode_state(raw: &[u8]) -> Option<CachedState> {
	if raw.len() < 8 {
		return None;
	}
	let (version, state) = raw.split_at(8);
	let version = u64::from_be_bytes(version.try_into().ok()?);
	Some(CachedState { state: state.to_vec(), version })
}

pub struct CacheAdapterRedis {
	client: redis::Client,
	conn: redis::aio::ConnectionManager,
}

impl std::fmt::Debug for CacheAdapterRedis {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CacheAdapterRedis").finish_non_exhaustive()
	}
}

impl CacheAdapterRedis {
	/// Connect to `url` (e.g. `redis://127.0.0.1:6379`).
	pub async fn new(url: &str) -> ClResult<Self> {
		let client = redis::Client::open(url).map_err(|err| cache_err(&err))?;
		let conn = client.get_connection_manager().await.map_err(|err| cache_err(&err))?;
		Ok(Self { client, conn })
	}
}

#[async_trait]
impl CacheAdapter for CacheAdapterRedis {
	async fn get_state(&self, id: &str) -> ClResult<Option<CachedState>> {
		let mut conn = self.conn.clone();
		let raw: Option<Vec<u8>> =
			conn.get(state_key(id)).await.map_err(|err| cache_err(&err))?;
		Ok(raw.as_deref().and_then(decode_state))
	}

	async fn put_state(&self, id: &str, state: &[u8], version: u64) -> ClResult<()> {
		let mut conn = self.conn.clone();
		let _: () = conn
			.set_ex(state_key(id), encode_state(state, version), STATE_TTL_SECS)
			.await
			.map_err(|err| cache_err(&err))?;
		Ok(())
	}

	async fn invalidate(&self, id: &str) -> ClResult<()> {
		let mut conn = self.conn.clone();
		let _: i64 = conn.del(state_key(id)).await.map_err(|err| cache_err(&err))?;
		Ok(())
	}

	async fn publish(&self, id: &str, msg: FanoutMessage) -> ClResult<()> {
		let mut conn = self.conn.clone();
		let _: i64 = conn
			.publish(updates_channel(id), msg.encode())
			.await
			.map_err(|err| cache_err(&err))?;
		Ok(())
	}

	async fn subscribe(&self, id: &str) -> ClResult<FanoutStream> {
		let channel = updates_channel(id);
		let mut pubsub =
			self.client.get_async_pubsub().await.map_err(|err| cache_err(&err))?;
		pubsub.subscribe(&channel).await.map_err(|err| cache_err(&err))?;

		let (tx, rx) = mpsc::channel(SUBSCRIBE_BUFFER);
		tokio::spawn(async move {
			let mut messages = pubsub.into_on_message();
			while let Some(msg) = messages.next().await {
				let payload: Vec<u8> = match msg.get_payload() {
					Ok(payload) => payload,
					Err(err) => {
						warn!("fan-out payload unreadable: {}", err);
						continue;
					}
				};
				match FanoutMessage::decode(&payload) {
					Some(decoded) => {
						if tx.send(decoded).await.is_err() {
							// subscriber gone, drop the pub/sub connection
							break;
						}
					}
					None => warn!("malformed fan-out message dropped"),
				}
			}
		});

		Ok(Box::pin(ReceiverStream::new(rx)))
	}

	async fn health(&self) -> ClResult<()> {
		let mut conn = self.conn.clone();
		let _: String = redis::cmd("PING")
			.query_async(&mut conn)
			.await
			.map_err(|err| cache_err(&err))?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_state_value_roundtrip() {
		let encoded = encode_state(&[7, 8, 9], 42);
		let decoded = decode_state(&encoded).unwrap();
		assert_eq!(decoded.version, 42);
		assert_eq!(decoded.state, vec![7, 8, 9]);
	}

	#[test]
	fn test_state_value_rejects_short_input() {
		assert!(decode_state(&[1, 2, 3]).is_none());
	}

	#[test]
	fn test_key_layout() {
		assert_eq!(state_key("abc"), "doc:abc:state");
		assert_eq!(updates_channel("abc"), "doc:abc:updates");
	}
}

// vim: ts=4
