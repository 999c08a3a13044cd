//! Live-document registry
//!
//! Process-wide table of live documents, keyed by share id. Peers never hold
//! direct references to a live document: they go through the registry to
//! obtain a mailbox-backed session, and the actor removes its own entry on
//! teardown - so the document/peer reference cycle never materializes.
//!
//! Insertion is serialized per id: the handle is registered before the actor
//! finishes loading, and attaches issued meanwhile queue in its mailbox.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};

use crate::cache_adapter::CacheAdapter;
use crate::crdt::live_doc::{self, AttachRejected, DocHandle, DocMsg, PeerSession};
use crate::prelude::*;
use crate::store_adapter::StoreAdapter;

/// When the stored markdown snapshot is refreshed from the replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkdownRefresh {
	/// Refresh on the drain-time flush only (default)
	OnDrain,
	/// Refresh on every debounced flush
	EveryFlush,
	/// Never refresh; the share-time snapshot stays as-is
	Never,
}

/// Hub tuning, derived from the app options at startup.
#[derive(Debug, Clone)]
pub struct HubConfig {
	/// This instance's id, tagged onto fan-out messages for echo suppression
	pub instance_id: Box<str>,
	pub persistence_debounce: Duration,
	pub drain_grace: Duration,
	pub awareness_timeout: Duration,
	pub max_live_documents: usize,
	/// Replica memory ceiling; beyond it new edits are refused
	pub max_replica_bytes: usize,
	/// Outbound frames buffered per peer before it counts as a slow consumer
	pub peer_queue_len: usize,
	/// Reject creation of missing rows on attach
	pub read_only: bool,
	pub markdown_refresh: MarkdownRefresh,
}

impl Default for HubConfig {
	fn default() -> Self {
		Self {
			instance_id: uuid::Uuid::new_v4().to_string().into(),
			persistence_debounce: Duration::from_millis(2000),
			drain_grace: Duration::from_millis(10_000),
			awareness_timeout: Duration::from_millis(30_000),
			max_live_documents: 1024,
			max_replica_bytes: 50 * 1024 * 1024,
			peer_queue_len: 256,
			read_only: false,
			markdown_refresh: MarkdownRefresh::OnDrain,
		}
	}
}

/// Snapshot of hub load, reported through the health endpoint.
#[derive(Debug, Clone, Copy)]
pub struct HubStats {
	pub live_documents: usize,
	pub peers: usize,
}

pub(crate) struct HubInner {
	pub(crate) store: Arc<dyn StoreAdapter>,
	pub(crate) cache: Arc<dyn CacheAdapter>,
	pub(crate) config: HubConfig,
	pub(crate) docs: Mutex<HashMap<Box<str>, DocHandle>>,
	pub(crate) live_documents: AtomicUsize,
	pub(crate) peers: AtomicUsize,
	pub(crate) next_generation: AtomicU64,
}

/// The collaboration hub. Cheap to clone; all state lives behind one Arc.
#[derive(Clone)]
pub struct Hub {
	inner: Arc<HubInner>,
}

impl std::fmt::Debug for Hub {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let stats = self.stats();
		f.debug_struct("Hub")
			.field("live_documents", &stats.live_documents)
			.field("peers", &stats.peers)
			.finish()
	}
}

impl Hub {
	pub fn new(
		store: Arc<dyn StoreAdapter>,
		cache: Arc<dyn CacheAdapter>,
		config: HubConfig,
	) -> Self {
		Self {
			inner: Arc::new(HubInner {
				store,
				cache,
				config,
				docs: Mutex::new(HashMap::new()),
				live_documents: AtomicUsize::new(0),
				peers: AtomicUsize::new(0),
				next_generation: AtomicU64::new(1),
			}),
		}
	}

	/// Attach to the live document for `doc_id`, instantiating it if needed.
	///
	/// Retries transparently when it races a draining actor's teardown: the
	/// stale registry entry is replaced and a fresh actor loads the state the
	/// old one just flushed.
	pub async fn attach(&self, doc_id: &str) -> Result<PeerSession, AttachRejected> {
		for _ in 0..3 {
			let handle = self.get_or_spawn(doc_id).await?;
			match handle.attach().await {
				Ok(session) => return Ok(session),
				Err(AttachRejected::Gone) => {
					self.remove_if(doc_id, handle.generation).await;
					continue;
				}
				Err(other) => return Err(other),
			}
		}
		warn!("attach to {} kept racing teardown", doc_id);
		Err(AttachRejected::Overloaded)
	}

	async fn get_or_spawn(&self, doc_id: &str) -> Result<DocHandle, AttachRejected> {
		let mut docs = self.inner.docs.lock().await;
		if let Some(handle) = docs.get(doc_id) {
			return Ok(handle.clone());
		}
		if self.inner.live_documents.load(Ordering::Relaxed) >= self.inner.config.max_live_documents
		{
			warn!("live document limit reached, rejecting attach for {}", doc_id);
			return Err(AttachRejected::Overloaded);
		}
		let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
		let handle = live_doc::spawn(self.inner.clone(), doc_id.into(), generation);
		docs.insert(doc_id.into(), handle.clone());
		Ok(handle)
	}

	/// Remove a registry entry, but only the given generation - a newer actor
	/// under the same id stays untouched.
	pub(crate) async fn remove_if(&self, doc_id: &str, generation: u64) {
		let mut docs = self.inner.docs.lock().await;
		if docs.get(doc_id).is_some_and(|h| h.generation == generation) {
			docs.remove(doc_id);
		}
	}

	pub fn stats(&self) -> HubStats {
		HubStats {
			live_documents: self.inner.live_documents.load(Ordering::Relaxed),
			peers: self.inner.peers.load(Ordering::Relaxed),
		}
	}

	/// Flush and tear down every live document within the grace window.
	pub async fn shutdown(&self, grace: Duration) {
		let handles: Vec<DocHandle> = {
			let docs = self.inner.docs.lock().await;
			docs.values().cloned().collect()
		};
		if handles.is_empty() {
			return;
		}
		info!("shutting down {} live documents", handles.len());

		let mut waits = Vec::with_capacity(handles.len());
		for handle in handles {
			let (done_tx, done_rx) = oneshot::channel();
			if handle.tx.send(DocMsg::Shutdown { done: Some(done_tx) }).await.is_ok() {
				waits.push(done_rx);
			}
		}
		let drain_all = async {
			for wait in waits {
				let _ = wait.await;
			}
		};
		if tokio::time::timeout(grace, drain_all).await.is_err() {
			error!("shutdown grace expired with live documents still flushing");
		}
	}
}

// vim: ts=4
