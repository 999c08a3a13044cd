//! In-process coordination cache adapter for mdshare.
//!
//! Single-instance stand-in for the Redis adapter: an LRU hot cache for CRDT
//! snapshots and per-document tokio broadcast channels for the fan-out
//! topics. Fan-out only reaches subscribers in the same process, which is
//! exactly the semantics a single-instance deployment needs; the hub's echo
//! suppression still applies.

use async_trait::async_trait;
use futures::StreamExt;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use mdshare::cache_adapter::{CacheAdapter, CachedState, FanoutMessage, FanoutStream};
use mdshare::prelude::*;

const DEFAULT_CAPACITY: usize = 1024;
const TOPIC_BUFFER: usize = 128;

pub struct CacheAdapterMemory {
	states: Mutex<LruCache<Box<str>, CachedState>>,
	topics: RwLock<HashMap<Box<str>, broadcast::Sender<FanoutMessage>>>,
}

impl std::fmt::Debug for CacheAdapterMemory {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CacheAdapterMemory")
			.field("states", &self.states.lock().len())
			.field("topics", &self.topics.read().len())
			.finish()
	}
}

impl CacheAdapterMemory {
	pub fn new(capacity: usize) -> Self {
		let capacity = NonZeroUsize::new(capacity)
			.or(NonZeroUsize::new(DEFAULT_CAPACITY))
			.unwrap_or(NonZeroUsize::MIN);
		Self {
			states: Mutex::new(LruCache::new(capacity)),
			topics: RwLock::new(HashMap::new()),
		}
	}

	/// Drop topics nobody listens to anymore.
	fn cleanup_topics(&self) {
		self.topics.write().retain(|_, tx| tx.receiver_count() > 0);
	}
}

impl Default for CacheAdapterMemory {
	fn default() -> Self {
		Self::new(DEFAULT_CAPACITY)
	}
}

#[async_trait]
impl CacheAdapter for CacheAdapterMemory {
	async fn get_state(&self, id: &str) -> ClResult<Option<CachedState>> {
		Ok(self.states.lock().get(id).cloned())
	}

	async fn put_state(&self, id: &str, state: &[u8], version: u64) -> ClResult<()> {
		self.states
			.lock()
			.put(id.into(), CachedState { state: state.to_vec(), version });
		Ok(())
	}

	async fn invalidate(&self, id: &str) -> ClResult<()> {
		self.states.lock().pop(id);
		self.cleanup_topics();
		Ok(())
	}

	async fn publish(&self, id: &str, msg: FanoutMessage) -> ClResult<()> {
		let topics = self.topics.read();
		if let Some(tx) = topics.get(id) {
			// no receivers is fine, publish is best-effort
			let _ = tx.send(msg);
		}
		Ok(())
	}

	async fn subscribe(&self, id: &str) -> ClResult<FanoutStream> {
		let rx = {
			let mut topics = self.topics.write();
			topics
				.entry(id.into())
				.or_insert_with(|| broadcast::channel(TOPIC_BUFFER).0)
				.subscribe()
		};
		// lagged receivers skip lost messages; the CRDT sync protocol
		// reconciles after any gap
		Ok(Box::pin(BroadcastStream::new(rx).filter_map(|res| async move { res.ok() })))
	}

	async fn health(&self) -> ClResult<()> {
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_state_cache_roundtrip() {
		let cache = CacheAdapterMemory::default();
		assert!(cache.get_state("a").await.unwrap().is_none());

		cache.put_state("a", &[1, 2], 1).await.unwrap();
		let cached = cache.get_state("a").await.unwrap().unwrap();
		assert_eq!(cached.state, vec![1, 2]);
		assert_eq!(cached.version, 1);

		cache.invalidate("a").await.unwrap();
		assert!(cache.get_state("a").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_eviction_is_not_an_error() {
		let cache = CacheAdapterMemory::new(1);
		cache.put_state("a", &[1], 1).await.unwrap();
		cache.put_state("b", &[2], 1).await.unwrap();
		// "a" was evicted; the caller falls back to the store
		assert!(cache.get_state("a").await.unwrap().is_none());
		assert!(cache.get_state("b").await.unwrap().is_some());
	}

	#[tokio::test]
	async fn test_fanout_pubsub() {
		let cache = CacheAdapterMemory::default();
		let mut sub_a = cache.subscribe("doc").await.unwrap();
		let mut sub_b = cache.subscribe("doc").await.unwrap();

		let msg = FanoutMessage::Update { payload: vec![1, 2, 3], origin: "i1".into() };
		cache.publish("doc", msg.clone()).await.unwrap();

		assert_eq!(sub_a.next().await, Some(msg.clone()));
		assert_eq!(sub_b.next().await, Some(msg));
	}

	#[tokio::test]
	async fn test_publish_without_subscribers_is_ok() {
		let cache = CacheAdapterMemory::default();
		let msg = FanoutMessage::Awareness { payload: vec![], origin: "i1".into() };
		cache.publish("nobody", msg).await.unwrap();
	}

	#[tokio::test]
	async fn test_topics_are_isolated_per_document() {
		let cache = CacheAdapterMemory::default();
		let mut sub = cache.subscribe("doc-a").await.unwrap();

		cache
			.publish("doc-b", FanoutMessage::Update { payload: vec![9], origin: "i".into() })
			.await
			.unwrap();
		cache
			.publish("doc-a", FanoutMessage::Update { payload: vec![1], origin: "i".into() })
			.await
			.unwrap();

		let received = sub.next().await.unwrap();
		assert_eq!(received, FanoutMessage::Update { payload: vec![1], origin: "i".into() });
	}
}

// vim: ts=4
