//! Collaboration hub integration tests
//!
//! Drive the live-document actor through real peer sessions (no sockets):
//! sync handshake, two-client convergence, debounced persistence, drain and
//! reconnect semantics, awareness lifecycle, delete-while-live behavior.

mod support;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, GetString, ReadTxn, StateVector, Transact, Update};
use yrs::sync::awareness::AwarenessUpdateEntry;
use yrs::sync::{AwarenessUpdate, Message, SyncMessage};

use mdshare::crdt::{Hub, HubConfig, MarkdownRefresh, PeerSession};
use support::{MemoryCache, MemoryStore};

const CONTENT: &str = "content";

fn fast_config() -> HubConfig {
	HubConfig {
		persistence_debounce: Duration::from_millis(50),
		drain_grace: Duration::from_millis(100),
		markdown_refresh: MarkdownRefresh::OnDrain,
		..HubConfig::default()
	}
}

fn make_hub(store: &Arc<MemoryStore>, cache: &Arc<MemoryCache>, config: HubConfig) -> Hub {
	Hub::new(store.clone(), cache.clone(), config)
}

/// Apply a local insertion and encode it as an incremental Yjs update.
fn insert(doc: &Doc, index: u32, chunk: &str) -> Vec<u8> {
	let before = doc.transact().state_vector();
	let text = doc.get_or_insert_text(CONTENT);
	{
		let mut txn = doc.transact_mut();
		yrs::Text::insert(&text, &mut txn, index, chunk);
	}
	doc.transact().encode_state_as_update_v1(&before)
}

fn text_of(doc: &Doc) -> String {
	doc.get_or_insert_text(CONTENT).get_string(&doc.transact())
}

fn update_message(update: Vec<u8>) -> Vec<u8> {
	Message::Sync(SyncMessage::Update(update)).encode_v1()
}

fn step1_message() -> Vec<u8> {
	Message::Sync(SyncMessage::SyncStep1(StateVector::default())).encode_v1()
}

async fn next_message(session: &mut PeerSession) -> Message {
	let frame = timeout(Duration::from_secs(2), session.frames.recv())
		.await
		.expect("timed out waiting for a frame")
		.expect("peer channel closed");
	Message::decode_v1(&frame).expect("server sent an undecodable frame")
}

/// Complete the handshake: read the server's step 1, request the full state,
/// apply the returned step 2 to `doc`.
async fn sync(session: &mut PeerSession, doc: &Doc) {
	match next_message(session).await {
		Message::Sync(SyncMessage::SyncStep1(_)) => {}
		other => panic!("expected sync step 1, got {:?}", other),
	}
	session.link.frame(step1_message()).await;
	loop {
		match next_message(session).await {
			Message::Sync(SyncMessage::SyncStep2(update)) => {
				let mut txn = doc.transact_mut();
				txn.apply_update(Update::decode_v1(&update).expect("bad step 2")).expect("apply");
				return;
			}
			// awareness seed may arrive between the two sync steps
			Message::Awareness(_) => {}
			other => panic!("expected sync step 2, got {:?}", other),
		}
	}
}

/// Pull frames until an incremental update arrives, applying it to `doc`.
async fn recv_update(session: &mut PeerSession, doc: &Doc) {
	loop {
		match next_message(session).await {
			Message::Sync(SyncMessage::Update(update) | SyncMessage::SyncStep2(update)) => {
				let mut txn = doc.transact_mut();
				txn.apply_update(Update::decode_v1(&update).expect("bad update")).expect("apply");
				return;
			}
			_ => {}
		}
	}
}

#[tokio::test]
async fn test_attach_creates_blank_row() {
	let store = Arc::new(MemoryStore::default());
	let cache = Arc::new(MemoryCache::default());
	let hub = make_hub(&store, &cache, fast_config());

	let _session = hub.attach("fresh-doc").await.expect("attach");
	// admission created the missing row
	let row = store.snapshot("fresh-doc").expect("row created on attach");
	assert_eq!(row.markdown, "");
	assert_eq!(hub.stats().live_documents, 1);
	assert_eq!(hub.stats().peers, 1);
}

#[tokio::test]
async fn test_two_client_convergence_and_persistence() {
	let store = Arc::new(MemoryStore::default());
	let cache = Arc::new(MemoryCache::default());
	let hub = make_hub(&store, &cache, fast_config());

	let mut a = hub.attach("doc1").await.expect("attach a");
	let mut b = hub.attach("doc1").await.expect("attach b");

	let doc_a = Doc::new();
	let doc_b = Doc::new();
	sync(&mut a, &doc_a).await;
	sync(&mut b, &doc_b).await;

	// concurrent inserts at the same position
	let update_a = insert(&doc_a, 0, "Hello ");
	let update_b = insert(&doc_b, 0, "World");
	a.link.frame(update_message(update_a)).await;
	b.link.frame(update_message(update_b)).await;

	// each peer receives the other's edit
	recv_update(&mut a, &doc_a).await;
	recv_update(&mut b, &doc_b).await;

	assert_eq!(text_of(&doc_a), text_of(&doc_b), "replicas must converge");
	assert!(text_of(&doc_a).contains("Hello "));
	assert!(text_of(&doc_a).contains("World"));

	// after the debounce the store holds a snapshot with the same text
	sleep(Duration::from_millis(400)).await;
	let row = store.snapshot("doc1").expect("row exists");
	let persisted = row.crdt_state.expect("debounced snapshot written");
	let replay = Doc::new();
	{
		let mut txn = replay.transact_mut();
		txn.apply_update(Update::decode_v1(&persisted).expect("decode")).expect("apply");
	}
	assert_eq!(text_of(&replay), text_of(&doc_a));
}

#[tokio::test]
async fn test_reconnect_within_grace_sees_same_state() {
	let store = Arc::new(MemoryStore::default());
	let cache = Arc::new(MemoryCache::default());
	let hub = make_hub(&store, &cache, fast_config());

	let mut first = hub.attach("doc2").await.expect("attach");
	let doc = Doc::new();
	sync(&mut first, &doc).await;
	let update = insert(&doc, 0, "survives reconnect");
	first.link.frame(update_message(update)).await;
	first.link.detach().await;
	drop(first);

	// reattach well inside the drain grace: same actor, same replica
	sleep(Duration::from_millis(20)).await;
	assert_eq!(hub.stats().live_documents, 1, "actor must still be draining");
	let mut second = hub.attach("doc2").await.expect("reattach");
	let doc2 = Doc::new();
	sync(&mut second, &doc2).await;
	assert_eq!(text_of(&doc2), "survives reconnect");
}

#[tokio::test]
async fn test_reconnect_after_teardown_loads_from_store() {
	let store = Arc::new(MemoryStore::default());
	let cache = Arc::new(MemoryCache::default());
	let hub = make_hub(&store, &cache, fast_config());

	{
		let mut session = hub.attach("doc3").await.expect("attach");
		let doc = Doc::new();
		sync(&mut session, &doc).await;
		session.link.frame(update_message(insert(&doc, 0, "persisted"))).await;
		session.link.detach().await;
	}

	// wait out the drain grace plus the teardown flush
	sleep(Duration::from_millis(600)).await;
	assert_eq!(hub.stats().live_documents, 0, "actor must be gone");
	assert!(store.snapshot("doc3").expect("row").crdt_state.is_some(), "flushed on drain");

	let mut session = hub.attach("doc3").await.expect("fresh attach");
	let doc = Doc::new();
	sync(&mut session, &doc).await;
	assert_eq!(text_of(&doc), "persisted");
}

#[tokio::test]
async fn test_drain_flush_refreshes_markdown_snapshot() {
	let store = Arc::new(MemoryStore::default());
	let cache = Arc::new(MemoryCache::default());
	let hub = make_hub(&store, &cache, fast_config());

	let mut session = hub.attach("doc4").await.expect("attach");
	let doc = Doc::new();
	sync(&mut session, &doc).await;
	session.link.frame(update_message(insert(&doc, 0, "# Title\n\nBody"))).await;
	session.link.detach().await;
	drop(session);

	sleep(Duration::from_millis(600)).await;
	let row = store.snapshot("doc4").expect("row");
	assert_eq!(row.markdown, "# Title\n\nBody", "markdown refreshed on drain");
}

#[tokio::test]
async fn test_delete_while_live_discards_drain_save() {
	let store = Arc::new(MemoryStore::default());
	let cache = Arc::new(MemoryCache::default());
	let hub = make_hub(&store, &cache, fast_config());

	let mut session = hub.attach("doc5").await.expect("attach");
	let doc = Doc::new();
	sync(&mut session, &doc).await;
	session.link.frame(update_message(insert(&doc, 0, "doomed"))).await;

	// the share is deleted out from under the live session
	sleep(Duration::from_millis(10)).await;
	use mdshare::store_adapter::StoreAdapter;
	store.delete("doc5").await.expect("delete");

	// the session keeps working for attached peers
	session.link.frame(update_message(insert(&doc, 6, "!"))).await;
	session.link.detach().await;
	drop(session);

	sleep(Duration::from_millis(600)).await;
	assert!(store.snapshot("doc5").is_none(), "drain save must not re-create the row");
	assert_eq!(hub.stats().live_documents, 0);
}

#[tokio::test]
async fn test_awareness_roster_and_removal() {
	let store = Arc::new(MemoryStore::default());
	let cache = Arc::new(MemoryCache::default());
	let hub = make_hub(&store, &cache, fast_config());

	let mut a = hub.attach("doc6").await.expect("attach a");
	let mut b = hub.attach("doc6").await.expect("attach b");
	let doc_a = Doc::new();
	let doc_b = Doc::new();
	sync(&mut a, &doc_a).await;
	sync(&mut b, &doc_b).await;

	// peer A announces presence for its client id 7
	let mut clients = HashMap::new();
	clients.insert(
		7u64,
		AwarenessUpdateEntry { clock: 1, json: r##"{"user":"alice","color":"#f00"}"##.into() },
	);
	let presence = AwarenessUpdate { clients };
	a.link.frame(Message::Awareness(presence).encode_v1()).await;

	// B sees the diff
	loop {
		if let Message::Awareness(update) = next_message(&mut b).await {
			assert!(update.clients.contains_key(&7));
			break;
		}
	}

	// a late roster query also contains it
	b.link.frame(Message::AwarenessQuery.encode_v1()).await;
	loop {
		if let Message::Awareness(update) = next_message(&mut b).await {
			assert!(update.clients.contains_key(&7), "roster must include client 7");
			break;
		}
	}

	// A disconnects; B receives the retraction (clock bumped, null state)
	a.link.detach().await;
	drop(a);
	loop {
		if let Message::Awareness(update) = next_message(&mut b).await {
			if let Some(entry) = update.clients.get(&7) {
				assert!(entry.clock > 1);
				assert_eq!(entry.json.trim(), "null");
				break;
			}
		}
	}
}

#[tokio::test]
async fn test_storage_outage_never_drops_dirty_state() {
	let store = Arc::new(MemoryStore::default());
	let cache = Arc::new(MemoryCache::default());
	let hub = make_hub(&store, &cache, fast_config());

	let mut session = hub.attach("doc7").await.expect("attach");
	let doc = Doc::new();
	sync(&mut session, &doc).await;

	// storage goes down before the debounce fires
	store.fail.store(true, std::sync::atomic::Ordering::Relaxed);
	session.link.frame(update_message(insert(&doc, 0, "must survive"))).await;
	sleep(Duration::from_millis(300)).await;
	assert!(store.snapshot("doc7").expect("row").crdt_state.is_none(), "write kept failing");

	// edits stay in the live replica; recovery persists them
	store.fail.store(false, std::sync::atomic::Ordering::Relaxed);
	session.link.detach().await;
	drop(session);
	sleep(Duration::from_millis(2500)).await;

	let persisted = store.snapshot("doc7").expect("row").crdt_state.expect("flushed after recovery");
	let replay = Doc::new();
	{
		let mut txn = replay.transact_mut();
		txn.apply_update(Update::decode_v1(&persisted).expect("decode")).expect("apply");
	}
	assert_eq!(text_of(&replay), "must survive");
}

#[tokio::test]
async fn test_live_document_limit() {
	let store = Arc::new(MemoryStore::default());
	let cache = Arc::new(MemoryCache::default());
	let config = HubConfig { max_live_documents: 1, ..fast_config() };
	let hub = make_hub(&store, &cache, config);

	let _first = hub.attach("only").await.expect("attach");
	let second = hub.attach("another").await;
	assert!(matches!(second, Err(mdshare::crdt::AttachRejected::Overloaded)));

	// a second peer on the existing document is fine
	let _third = hub.attach("only").await.expect("same doc attach");
}

#[tokio::test]
async fn test_malformed_frame_closes_only_that_peer() {
	let store = Arc::new(MemoryStore::default());
	let cache = Arc::new(MemoryCache::default());
	let hub = make_hub(&store, &cache, fast_config());

	let mut bad = hub.attach("doc8").await.expect("attach bad");
	let mut good = hub.attach("doc8").await.expect("attach good");
	let doc_bad = Doc::new();
	let doc_good = Doc::new();
	sync(&mut bad, &doc_bad).await;
	sync(&mut good, &doc_good).await;

	bad.link.frame(vec![0, 0, 99]).await;
	let close = timeout(Duration::from_secs(2), &mut bad.closed)
		.await
		.expect("timed out")
		.expect("close signal");
	assert_eq!(close.code, 4000);

	// the surviving peer still edits normally
	good.link.frame(update_message(insert(&doc_good, 0, "still alive"))).await;
	sleep(Duration::from_millis(400)).await;
	assert!(store.snapshot("doc8").expect("row").crdt_state.is_some());
	assert_eq!(hub.stats().peers, 1);
}

// vim: ts=4
