//! In-memory adapter doubles for integration tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;

use mdshare::cache_adapter::{CacheAdapter, CachedState, FanoutMessage, FanoutStream};
use mdshare::error::{ClResult, Error};
use mdshare::store_adapter::{
	Document, DocumentCreate, DocumentPatch, DocumentSummary, ListDocumentOptions, StoreAdapter,
};
use mdshare::types::{Patch, Timestamp};

#[derive(Debug, Default)]
pub struct MemoryStore {
	docs: Mutex<HashMap<Box<str>, Document>>,
	/// When set, every storage call fails with a transient error
	pub fail: AtomicBool,
}

impl MemoryStore {
	pub fn snapshot(&self, id: &str) -> Option<Document> {
		self.docs.lock().unwrap().get(id).cloned()
	}

	fn check(&self) -> ClResult<()> {
		if self.fail.load(Ordering::Relaxed) {
			Err(Error::ServiceUnavailable("injected failure".into()))
		} else {
			Ok(())
		}
	}
}

#[async_trait]
impl StoreAdapter for MemoryStore {
	async fn create(&self, doc: DocumentCreate) -> ClResult<Document> {
		self.check()?;
		let mut docs = self.docs.lock().unwrap();
		if docs.contains_key(&doc.id) {
			return Err(Error::Conflict(format!("share id '{}' already exists", doc.id)));
		}
		let now = Timestamp::now();
		let document = Document {
			id: doc.id.clone(),
			title: doc.title,
			markdown: doc.markdown,
			html: doc.html,
			render_mode: doc.render_mode,
			crdt_state: None,
			created_at: now,
			updated_at: now,
			metadata: doc.metadata,
		};
		docs.insert(doc.id, document.clone());
		Ok(document)
	}

	async fn get(&self, id: &str) -> ClResult<Document> {
		self.check()?;
		self.docs.lock().unwrap().get(id).cloned().ok_or(Error::NotFound)
	}

	async fn list(&self, opts: &ListDocumentOptions) -> ClResult<(Vec<DocumentSummary>, usize)> {
		self.check()?;
		let docs = self.docs.lock().unwrap();
		let mut matching: Vec<&Document> = docs
			.values()
			.filter(|doc| match &opts.source {
				Some(source) => {
					doc.metadata.get("source").and_then(|v| v.as_str()) == Some(&**source)
				}
				None => true,
			})
			.collect();
		matching.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
		let total = matching.len();
		let limit = if opts.limit == 0 { 50 } else { opts.limit };
		let page = matching
			.into_iter()
			.skip(opts.offset)
			.take(limit)
			.map(|doc| DocumentSummary {
				share_id: doc.id.clone(),
				title: doc.title.clone(),
				render_mode: doc.render_mode,
				created_at: doc.created_at,
				updated_at: doc.updated_at,
			})
			.collect();
		Ok((page, total))
	}

	async fn update(&self, id: &str, patch: &DocumentPatch) -> ClResult<Document> {
		self.check()?;
		let mut docs = self.docs.lock().unwrap();
		let doc = docs.get_mut(id).ok_or(Error::NotFound)?;
		if let Patch::Value(title) = &patch.title {
			doc.title = title.clone();
		}
		if let Patch::Value(markdown) = &patch.markdown {
			doc.markdown = markdown.clone();
		}
		match &patch.html {
			Patch::Value(html) => doc.html = Some(html.clone()),
			Patch::Null => doc.html = None,
			Patch::Undefined => {}
		}
		if let Patch::Value(mode) = &patch.render_mode {
			doc.render_mode = *mode;
		}
		match &patch.metadata {
			Patch::Value(metadata) => doc.metadata = metadata.clone(),
			Patch::Null => doc.metadata = serde_json::Value::Object(serde_json::Map::new()),
			Patch::Undefined => {}
		}
		doc.updated_at = Timestamp::now();
		Ok(doc.clone())
	}

	async fn delete(&self, id: &str) -> ClResult<()> {
		self.check()?;
		self.docs.lock().unwrap().remove(id).map(|_| ()).ok_or(Error::NotFound)
	}

	async fn load_crdt(&self, id: &str) -> ClResult<Option<Vec<u8>>> {
		self.check()?;
		let docs = self.docs.lock().unwrap();
		let doc = docs.get(id).ok_or(Error::NotFound)?;
		Ok(doc.crdt_state.clone().filter(|bytes| !bytes.is_empty()))
	}

	async fn save_crdt(
		&self,
		id: &str,
		state: &[u8],
		markdown_refresh: Option<&str>,
		updated_at: Timestamp,
	) -> ClResult<()> {
		self.check()?;
		let mut docs = self.docs.lock().unwrap();
		let doc = docs.get_mut(id).ok_or(Error::NotFound)?;
		doc.crdt_state = Some(state.to_vec());
		if let Some(markdown) = markdown_refresh {
			doc.markdown = markdown.to_string();
		}
		doc.updated_at = updated_at;
		Ok(())
	}

	async fn health(&self) -> ClResult<()> {
		self.check()
	}
}

#[derive(Debug, Default)]
pub struct MemoryCache {
	states: Mutex<HashMap<Box<str>, CachedState>>,
	topics: Mutex<HashMap<Box<str>, broadcast::Sender<FanoutMessage>>>,
}

#[async_trait]
impl CacheAdapter for MemoryCache {
	async fn get_state(&self, id: &str) -> ClResult<Option<CachedState>> {
		Ok(self.states.lock().unwrap().get(id).cloned())
	}

	async fn put_state(&self, id: &str, state: &[u8], version: u64) -> ClResult<()> {
		self.states
			.lock()
			.unwrap()
			.insert(id.into(), CachedState { state: state.to_vec(), version });
		Ok(())
	}

	async fn invalidate(&self, id: &str) -> ClResult<()> {
		self.states.lock().unwrap().remove(id);
		Ok(())
	}

	async fn publish(&self, id: &str, msg: FanoutMessage) -> ClResult<()> {
		if let Some(tx) = self.topics.lock().unwrap().get(id) {
			let _ = tx.send(msg);
		}
		Ok(())
	}

	async fn subscribe(&self, id: &str) -> ClResult<FanoutStream> {
		let rx = self
			.topics
			.lock()
			.unwrap()
			.entry(id.into())
			.or_insert_with(|| broadcast::channel(64).0)
			.subscribe();
		Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
			loop {
				match rx.recv().await {
					Ok(msg) => return Some((msg, rx)),
					Err(broadcast::error::RecvError::Lagged(_)) => continue,
					Err(broadcast::error::RecvError::Closed) => return None,
				}
			}
		})))
	}

	async fn health(&self) -> ClResult<()> {
		Ok(())
	}
}

// vim: ts=4
