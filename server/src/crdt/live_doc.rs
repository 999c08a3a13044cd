//! Live document actor
//!
//! Each actively-edited document is one long-running task owning the yrs
//! replica outright; every mutation funnels through its mailbox, so the
//! replica needs no locks. The message set mirrors the document lifecycle:
//! attach/detach, client frames, fan-out from peer instances, and shutdown.
//!
//! Lifecycle: the actor spawns in a loading state (attaches queue in the
//! mailbox), loads the CRDT snapshot from the hot cache or the store, then
//! serves until the last peer detaches and the drain grace elapses. The
//! drain-time flush must succeed before the actor unregisters itself -
//! dirty state is never discarded short of the bounded retry budget.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};
use yrs::sync::awareness::AwarenessUpdateEntry;
use yrs::sync::{Awareness, AwarenessUpdate, Message, SyncMessage};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, ReadTxn, StateVector, Transact, Update};

use crate::cache_adapter::FanoutMessage;
use crate::crdt::hub::{HubInner, MarkdownRefresh};
use crate::crdt::protocol::{self, CLOSE_NORMAL, CLOSE_OVERLOADED, CLOSE_PROTOCOL_ERROR};
use crate::note::consistency;
use crate::prelude::*;
use crate::store_adapter::{DocumentCreate, RenderMode};

/// Mailbox capacity; senders suspend when the actor falls behind, which is
/// the backpressure the concurrency model calls for.
const MAILBOX_LEN: usize = 256;

/// Bounded retries for the initial storage read.
const LOAD_RETRIES: u32 = 3;
const LOAD_BACKOFF: Duration = Duration::from_millis(500);

/// Flush retry backoff bounds.
const RETRY_INITIAL: Duration = Duration::from_secs(1);
const RETRY_CAP: Duration = Duration::from_secs(30);

/// Drain-time flush attempts before dirty state is abandoned with an alert.
const DRAIN_RETRIES: u32 = 5;

/// Constant editing keeps re-arming the debounce; cap the coalescing window
/// at this many debounce periods so a busy document still hits storage.
const MAX_COALESCE_PERIODS: u32 = 5;

/// Why an attach was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachRejected {
	/// Instance at its live-document limit or a teardown race persisted
	Overloaded,
	/// The document row is missing and this instance must not create it
	ReadOnly,
	/// Storage kept failing while loading the document
	Storage,
	/// The actor tore down mid-attach; the hub retries with a fresh one
	Gone,
}

/// Server-initiated close for one peer connection.
#[derive(Debug)]
pub struct PeerClose {
	pub code: u16,
	pub reason: Box<str>,
}

/// A peer's view of a live document: outbound frames, a close signal, and a
/// link for inbound traffic. Holds no direct reference to the actor; fields
/// are owned values so the connection handler can split them across its
/// reader and writer halves.
pub struct PeerSession {
	pub peer_id: u64,
	pub doc_id: Box<str>,
	/// Encoded frames to forward to the WebSocket
	pub frames: mpsc::Receiver<Vec<u8>>,
	/// Fires when the actor drops this peer (slow consumer, protocol error)
	pub closed: oneshot::Receiver<PeerClose>,
	pub link: PeerLink,
}

/// Inbound routing for one attached peer.
#[derive(Clone)]
pub struct PeerLink {
	tx: mpsc::Sender<DocMsg>,
	peer_id: u64,
}

impl PeerLink {
	/// Forward one inbound frame to the actor. Suspends under mailbox
	/// backpressure, preserving per-client arrival order.
	pub async fn frame(&self, data: Vec<u8>) {
		let _ = self.tx.send(DocMsg::Frame { peer_id: self.peer_id, data }).await;
	}

	/// Announce disconnect. The actor tolerates duplicates.
	pub async fn detach(&self) {
		let _ = self.tx.send(DocMsg::Detach { peer_id: self.peer_id }).await;
	}
}

pub(crate) enum DocMsg {
	Attach { reply: oneshot::Sender<Result<PeerSession, AttachRejected>> },
	Detach { peer_id: u64 },
	Frame { peer_id: u64, data: Vec<u8> },
	Fanout(FanoutMessage),
	Shutdown { done: Option<oneshot::Sender<()>> },
}

/// Cheap registry entry routing to one actor incarnation.
#[derive(Clone)]
pub(crate) struct DocHandle {
	pub(crate) tx: mpsc::Sender<DocMsg>,
	pub(crate) generation: u64,
}

impl DocHandle {
	pub(crate) async fn attach(&self) -> Result<PeerSession, AttachRejected> {
		let (reply_tx, reply_rx) = oneshot::channel();
		self.tx
			.send(DocMsg::Attach { reply: reply_tx })
			.await
			.map_err(|_| AttachRejected::Gone)?;
		reply_rx.await.map_err(|_| AttachRejected::Gone)?
	}
}

/// Spawn the actor for `id` and hand back its registry entry. The actor
/// counts itself against the instance's live-document limit immediately.
pub(crate) fn spawn(inner: Arc<HubInner>, id: Box<str>, generation: u64) -> DocHandle {
	let (tx, rx) = mpsc::channel(MAILBOX_LEN);
	inner.live_documents.fetch_add(1, Ordering::Relaxed);

	let doc = Doc::new();
	let actor = DocActor {
		awareness: Awareness::new(doc.clone()),
		doc,
		inner,
		id,
		generation,
		self_tx: tx.clone(),
		rx,
		peers: HashMap::new(),
		next_peer_id: 1,
		awareness_meta: HashMap::new(),
		dirty: false,
		dirty_since: Instant::now(),
		frozen: false,
		replica_bytes: 0,
		flush_seq: 0,
		flush_at: None,
		drain_at: None,
		drain_retries: 0,
		retry_backoff: RETRY_INITIAL,
		unknown_frames: 0,
		fanout_task: None,
		fanout_live: false,
		doomed: Vec::new(),
	};
	tokio::spawn(actor.run());

	DocHandle { tx, generation }
}

struct Peer {
	frames: mpsc::Sender<Vec<u8>>,
	close: Option<oneshot::Sender<PeerClose>>,
	/// Sync handshake completed; live updates flow only after this
	synced: bool,
}

/// Bookkeeping per awareness client id (the Yjs client id chosen by the
/// editing document, not our peer id).
struct ClientMeta {
	clock: u32,
	last_seen: std::time::Instant,
	/// Local peer owning this client, None for entries learned via fan-out
	peer: Option<u64>,
}

struct DocActor {
	inner: Arc<HubInner>,
	id: Box<str>,
	generation: u64,
	self_tx: mpsc::Sender<DocMsg>,
	rx: mpsc::Receiver<DocMsg>,

	doc: Doc,
	awareness: Awareness,
	peers: HashMap<u64, Peer>,
	next_peer_id: u64,
	awareness_meta: HashMap<u64, ClientMeta>,

	dirty: bool,
	dirty_since: Instant,
	frozen: bool,
	/// Last snapshot size plus bytes applied since; drives the memory ceiling
	replica_bytes: usize,
	flush_seq: u64,
	flush_at: Option<Instant>,
	drain_at: Option<Instant>,
	drain_retries: u32,
	retry_backoff: Duration,
	unknown_frames: u64,

	fanout_task: Option<tokio::task::JoinHandle<()>>,
	fanout_live: bool,

	/// Peers whose outbound queue overflowed, awaiting removal at the top of
	/// the actor loop (removal mid-broadcast would recurse).
	doomed: Vec<u64>,
}

/// What woke the actor loop up.
enum Tick {
	Msg(Option<DocMsg>),
	Flush,
	Drain,
	Sweep,
}

impl DocActor {
	async fn run(mut self) {
		match self.load().await {
			Ok(()) => {
				debug!("live document {} ready", self.id);
			}
			Err(rejection) => {
				warn!("live document {} failed to load: {:?}", self.id, rejection);
				self.reject_pending(rejection);
				self.unregister().await;
				return;
			}
		}

		let sweep_period = (self.inner.config.awareness_timeout / 2).max(Duration::from_secs(1));
		let mut sweep = time::interval(sweep_period);
		sweep.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

		let far = Duration::from_secs(3600 * 24);
		loop {
			let flush_at = self.flush_at.unwrap_or_else(|| Instant::now() + far);
			let drain_at = self.drain_at.unwrap_or_else(|| Instant::now() + far);
			let flush_armed = self.flush_at.is_some();
			let drain_armed = self.drain_at.is_some();
			let tick = tokio::select! {
				biased;
				msg = self.rx.recv() => Tick::Msg(msg),
				_ = time::sleep_until(flush_at), if flush_armed => Tick::Flush,
				_ = time::sleep_until(drain_at), if drain_armed => Tick::Drain,
				_ = sweep.tick() => Tick::Sweep,
			};
			match tick {
				Tick::Msg(Some(msg)) => {
					if self.handle_msg(msg).await {
						break;
					}
				}
				Tick::Msg(None) => break,
				Tick::Flush => self.flush(false).await,
				Tick::Drain => {
					if self.drain().await {
						break;
					}
				}
				Tick::Sweep => self.sweep_awareness().await,
			}
			self.reap_doomed().await;
		}

		self.unregister().await;
	}

	/// Remove peers condemned during broadcasts. Runs at the loop top so a
	/// removal (and its awareness retraction) never nests inside another
	/// broadcast.
	async fn reap_doomed(&mut self) {
		while let Some(peer_id) = self.doomed.pop() {
			warn!("{}: peer {} cannot keep up, dropping", self.id, peer_id);
			self.remove_peer(peer_id, Some((CLOSE_OVERLOADED, "slow consumer"))).await;
		}
	}

	/// Admission and state load. Creates a blank row for unknown ids unless
	/// the instance runs read-only; reads the hot cache before the store.
	async fn load(&mut self) -> Result<(), AttachRejected> {
		let row = {
			let mut attempt = 0;
			loop {
				match self.inner.store.get(&self.id).await {
					Ok(row) => break row,
					Err(Error::NotFound) => {
						if self.inner.config.read_only {
							return Err(AttachRejected::ReadOnly);
						}
						match self.inner.store.create(blank_document(&self.id)).await {
							Ok(row) => break row,
							// lost a race against the share API; the row exists now
							Err(Error::Conflict(_)) => continue,
							Err(err) => {
								warn!("creating blank row for {} failed: {}", self.id, err);
								return Err(AttachRejected::Storage);
							}
						}
					}
					Err(err) => {
						attempt += 1;
						if attempt >= LOAD_RETRIES {
							warn!("loading {} failed after {} attempts: {}", self.id, attempt, err);
							return Err(AttachRejected::Storage);
						}
						time::sleep(LOAD_BACKOFF * attempt).await;
					}
				}
			}
		};

		let mut state = match self.inner.cache.get_state(&self.id).await {
			Ok(Some(cached)) => {
				debug!("hot cache hit for {}", self.id);
				Some(cached.state)
			}
			Ok(None) => None,
			Err(err) => {
				warn!("hot cache read failed for {}: {}", self.id, err);
				None
			}
		};
		if state.is_none() {
			let mut attempt = 0;
			state = loop {
				match self.inner.store.load_crdt(&self.id).await {
					Ok(bytes) => break bytes,
					Err(Error::NotFound) => break None,
					Err(err) => {
						attempt += 1;
						if attempt >= LOAD_RETRIES {
							warn!("loading CRDT for {} failed: {}", self.id, err);
							return Err(AttachRejected::Storage);
						}
						time::sleep(LOAD_BACKOFF * attempt).await;
					}
				}
			};
		}

		match state.filter(|bytes| !bytes.is_empty()) {
			Some(bytes) => {
				let applied = Update::decode_v1(&bytes).ok().and_then(|update| {
					let mut txn = self.doc.transact_mut();
					txn.apply_update(update).ok()
				});
				if applied.is_some() {
					self.replica_bytes = bytes.len();
				} else {
					// corrupt snapshot: fall back to the markdown snapshot
					// rather than poisoning the replica
					error!("stored CRDT state for {} is undecodable, reseeding", self.id);
					consistency::seed_from_markdown(&self.doc, &row.markdown);
				}
			}
			None => consistency::seed_from_markdown(&self.doc, &row.markdown),
		}

		self.resubscribe().await;
		Ok(())
	}

	/// Returns true when the actor should exit.
	async fn handle_msg(&mut self, msg: DocMsg) -> bool {
		match msg {
			DocMsg::Attach { reply } => {
				let session = self.attach_peer();
				let _ = reply.send(Ok(session));
				false
			}
			DocMsg::Detach { peer_id } => {
				self.remove_peer(peer_id, None).await;
				false
			}
			DocMsg::Frame { peer_id, data } => {
				self.handle_frame(peer_id, data).await;
				false
			}
			DocMsg::Fanout(msg) => {
				self.handle_fanout(msg).await;
				false
			}
			DocMsg::Shutdown { done } => {
				if self.dirty {
					self.flush(true).await;
					if self.dirty {
						error!("shutdown flush failed for {}, dirty state lost", self.id);
					}
				}
				self.close_all_peers(CLOSE_NORMAL, "server shutting down");
				if let Some(done) = done {
					let _ = done.send(());
				}
				true
			}
		}
	}

	fn attach_peer(&mut self) -> PeerSession {
		// a returning client cancels teardown
		if self.drain_at.take().is_some() {
			debug!("{}: reattach during drain, teardown cancelled", self.id);
		}
		self.drain_retries = 0;

		let peer_id = self.next_peer_id;
		self.next_peer_id += 1;
		let (frames_tx, frames_rx) = mpsc::channel(self.inner.config.peer_queue_len);
		let (close_tx, close_rx) = oneshot::channel();
		self.peers.insert(
			peer_id,
			Peer { frames: frames_tx, close: Some(close_tx), synced: false },
		);
		self.inner.peers.fetch_add(1, Ordering::Relaxed);

		// handshake: our state vector first, then the awareness roster
		self.send_to(peer_id, protocol::sync_step1(&self.doc));
		if let Ok(roster) = self.awareness.update() {
			if !roster.clients.is_empty() {
				self.send_to(peer_id, protocol::awareness_frame(&roster));
			}
		}
		if self.frozen {
			self.send_to(peer_id, protocol::auth_deny("document size limit reached"));
		}

		debug!("{}: peer {} attached ({} total)", self.id, peer_id, self.peers.len());
		PeerSession {
			peer_id,
			doc_id: self.id.clone(),
			frames: frames_rx,
			closed: close_rx,
			link: PeerLink { tx: self.self_tx.clone(), peer_id },
		}
	}

	async fn handle_frame(&mut self, peer_id: u64, data: Vec<u8>) {
		if !self.peers.contains_key(&peer_id) {
			return;
		}
		let Some(msg) = protocol::decode_frame(&data) else {
			warn!("{}: malformed frame from peer {}", self.id, peer_id);
			self.remove_peer(peer_id, Some((CLOSE_PROTOCOL_ERROR, "malformed frame"))).await;
			return;
		};

		match msg {
			Message::Sync(SyncMessage::SyncStep1(remote)) => {
				self.send_to(peer_id, protocol::sync_step2(&self.doc, &remote));
				// the client now has everything it was missing; live updates
				// from here on are appliable
				if let Some(peer) = self.peers.get_mut(&peer_id) {
					peer.synced = true;
				}
			}
			Message::Sync(SyncMessage::SyncStep2(update) | SyncMessage::Update(update)) => {
				self.apply_client_update(peer_id, update).await;
			}
			Message::Awareness(update) => {
				self.apply_awareness(update, Some(peer_id), true).await;
			}
			Message::AwarenessQuery => {
				if let Ok(roster) = self.awareness.update() {
					self.send_to(peer_id, protocol::awareness_frame(&roster));
				}
			}
			Message::Auth(_) => {}
			Message::Custom(tag, _) => {
				self.unknown_frames += 1;
				if self.unknown_frames <= 3 {
					warn!("{}: unknown frame tag {} from peer {}", self.id, tag, peer_id);
				}
			}
		}
	}

	async fn apply_client_update(&mut self, peer_id: u64, update: Vec<u8>) {
		if self.frozen {
			self.send_to(peer_id, protocol::auth_deny("document size limit reached"));
			return;
		}
		let decoded = match Update::decode_v1(&update) {
			Ok(decoded) => decoded,
			Err(err) => {
				warn!("{}: undecodable update from peer {}: {}", self.id, peer_id, err);
				self.remove_peer(peer_id, Some((CLOSE_PROTOCOL_ERROR, "invalid update"))).await;
				return;
			}
		};
		let applied = {
			let mut txn = self.doc.transact_mut();
			txn.apply_update(decoded)
		};
		if let Err(err) = applied {
			warn!("{}: update from peer {} failed to apply: {}", self.id, peer_id, err);
			self.remove_peer(peer_id, Some((CLOSE_PROTOCOL_ERROR, "invalid update"))).await;
			return;
		}

		self.replica_bytes += update.len();
		if self.replica_bytes > self.inner.config.max_replica_bytes {
			self.frozen = true;
			error!(
				"{}: replica exceeded {} bytes, refusing further edits",
				self.id, self.inner.config.max_replica_bytes
			);
			let deny = protocol::auth_deny("document size limit reached");
			let targets: Vec<u64> = self.peers.keys().copied().collect();
			for target in targets {
				self.send_to(target, deny.clone());
			}
		}

		self.broadcast(&protocol::update_frame(update.clone()), Some(peer_id), true);
		self.publish(FanoutMessage::Update {
			payload: update,
			origin: self.inner.config.instance_id.clone(),
		})
		.await;
		self.mark_dirty();
	}

	async fn handle_fanout(&mut self, msg: FanoutMessage) {
		if msg.origin() == &*self.inner.config.instance_id {
			return;
		}
		match msg {
			FanoutMessage::Update { payload, .. } => {
				let Ok(decoded) = Update::decode_v1(&payload) else {
					warn!("{}: undecodable fan-out update dropped", self.id);
					return;
				};
				let applied = {
					let mut txn = self.doc.transact_mut();
					txn.apply_update(decoded)
				};
				if let Err(err) = applied {
					warn!("{}: fan-out update failed to apply: {}", self.id, err);
					return;
				}
				self.replica_bytes += payload.len();
				// the origin instance persists this update; we only serve it
				self.broadcast(&protocol::update_frame(payload), None, true);
			}
			FanoutMessage::Awareness { payload, .. } => {
				match AwarenessUpdate::decode_v1(&payload) {
					Ok(update) => self.apply_awareness(update, None, false).await,
					Err(err) => warn!("{}: undecodable fan-out awareness: {}", self.id, err),
				}
			}
		}
	}

	/// Merge an awareness diff: clock-gated bookkeeping, local roster, local
	/// broadcast, and (for locally-originated diffs) fan-out publish.
	async fn apply_awareness(
		&mut self,
		update: AwarenessUpdate,
		from_peer: Option<u64>,
		publish: bool,
	) {
		let now = std::time::Instant::now();
		for (client, entry) in &update.clients {
			if entry.json.trim() == "null" {
				self.awareness_meta.remove(client);
				continue;
			}
			match self.awareness_meta.entry(*client) {
				Entry::Occupied(mut occupied) => {
					let meta = occupied.get_mut();
					if entry.clock >= meta.clock {
						meta.clock = entry.clock;
						meta.last_seen = now;
						if from_peer.is_some() {
							meta.peer = from_peer;
						}
					}
				}
				Entry::Vacant(vacant) => {
					vacant.insert(ClientMeta { clock: entry.clock, last_seen: now, peer: from_peer });
				}
			}
		}

		if let Err(err) = self.awareness.apply_update(update.clone()) {
			debug!("{}: awareness update rejected: {}", self.id, err);
		}

		self.broadcast(&protocol::awareness_frame(&update), from_peer, false);
		if publish {
			self.publish(FanoutMessage::Awareness {
				payload: update.encode_v1(),
				origin: self.inner.config.instance_id.clone(),
			})
			.await;
		}
	}

	/// Queue a frame for one peer; a full queue condemns the slow consumer.
	fn send_to(&mut self, peer_id: u64, frame: Vec<u8>) {
		let Some(peer) = self.peers.get(&peer_id) else { return };
		if peer.frames.try_send(frame).is_err() && !self.doomed.contains(&peer_id) {
			self.doomed.push(peer_id);
		}
	}

	/// Fan a frame out to local peers, skipping the origin. Slow consumers
	/// are condemned for later reaping; the replica and the remaining peers
	/// are unaffected.
	fn broadcast(&mut self, frame: &[u8], exclude: Option<u64>, synced_only: bool) {
		let mut dropped: Vec<u64> = Vec::new();
		for (&peer_id, peer) in &self.peers {
			if Some(peer_id) == exclude || (synced_only && !peer.synced) {
				continue;
			}
			if peer.frames.try_send(frame.to_vec()).is_err() {
				dropped.push(peer_id);
			}
		}
		for peer_id in dropped {
			if !self.doomed.contains(&peer_id) {
				self.doomed.push(peer_id);
			}
		}
	}

	async fn remove_peer(&mut self, peer_id: u64, close: Option<(u16, &str)>) {
		let Some(mut peer) = self.peers.remove(&peer_id) else { return };
		if let Some((code, reason)) = close {
			if let Some(close_tx) = peer.close.take() {
				let _ = close_tx.send(PeerClose { code, reason: reason.into() });
			}
		}
		self.inner.peers.fetch_sub(1, Ordering::Relaxed);
		debug!("{}: peer {} detached ({} left)", self.id, peer_id, self.peers.len());

		// retract the awareness entries this connection owned
		let owned: Vec<(u64, u32)> = self
			.awareness_meta
			.iter()
			.filter(|(_, meta)| meta.peer == Some(peer_id))
			.map(|(&client, meta)| (client, meta.clock))
			.collect();
		if !owned.is_empty() {
			self.apply_awareness(removal_update(&owned), None, true).await;
		}

		if self.peers.is_empty() {
			self.arm_drain();
		}
	}

	fn close_all_peers(&mut self, code: u16, reason: &str) {
		for (_, mut peer) in self.peers.drain() {
			if let Some(close_tx) = peer.close.take() {
				let _ = close_tx.send(PeerClose { code, reason: reason.into() });
			}
			self.inner.peers.fetch_sub(1, Ordering::Relaxed);
		}
	}

	fn arm_drain(&mut self) {
		debug!("{}: no peers attached, draining in {:?}", self.id, self.inner.config.drain_grace);
		self.drain_at = Some(Instant::now() + self.inner.config.drain_grace);
	}

	/// Drop remote awareness entries whose heartbeat lapsed. Entries owned
	/// by locally attached peers are exempt; their removal rides on detach.
	async fn sweep_awareness(&mut self) {
		let timeout = self.inner.config.awareness_timeout;
		let stale: Vec<(u64, u32)> = self
			.awareness_meta
			.iter()
			.filter(|(_, meta)| meta.peer.is_none() && meta.last_seen.elapsed() > timeout)
			.map(|(&client, meta)| (client, meta.clock))
			.collect();
		if stale.is_empty() {
			return;
		}
		debug!("{}: sweeping {} stale awareness entries", self.id, stale.len());
		// local cleanup only; the owning instance runs its own sweep
		self.apply_awareness(removal_update(&stale), None, false).await;
	}

	fn mark_dirty(&mut self) {
		let now = Instant::now();
		if !self.dirty {
			self.dirty = true;
			self.dirty_since = now;
		}
		let deadline =
			self.dirty_since + self.inner.config.persistence_debounce * MAX_COALESCE_PERIODS;
		self.flush_at = Some((now + self.inner.config.persistence_debounce).min(deadline));
	}

	/// Snapshot the replica and write it through the store, refreshing the
	/// hot cache on success. Failure keeps the dirty flag and backs off.
	async fn flush(&mut self, drain: bool) {
		self.flush_at = None;
		if !self.dirty {
			return;
		}

		let snapshot = {
			let txn = self.doc.transact();
			txn.encode_state_as_update_v1(&StateVector::default())
		};
		let markdown = match self.inner.config.markdown_refresh {
			MarkdownRefresh::EveryFlush => Some(consistency::extract_markdown(&self.doc)),
			MarkdownRefresh::OnDrain if drain => Some(consistency::extract_markdown(&self.doc)),
			_ => None,
		};

		let saved = self
			.inner
			.store
			.save_crdt(&self.id, &snapshot, markdown.as_deref(), Timestamp::now())
			.await;
		match saved {
			Ok(()) => {
				self.dirty = false;
				self.flush_seq += 1;
				self.replica_bytes = snapshot.len();
				self.retry_backoff = RETRY_INITIAL;
				debug!("{}: persisted {} bytes (seq {})", self.id, snapshot.len(), self.flush_seq);
				if let Err(err) =
					self.inner.cache.put_state(&self.id, &snapshot, self.flush_seq).await
				{
					warn!("{}: hot cache write failed: {}", self.id, err);
				}
				if !self.fanout_live {
					// cache is reachable again; restore cross-instance fan-out
					self.resubscribe().await;
				}
			}
			Err(Error::NotFound) => {
				// the share was deleted; discard rather than re-create
				info!("{}: row gone, discarding {} dirty bytes", self.id, snapshot.len());
				self.dirty = false;
			}
			Err(err) => {
				warn!("{}: persist failed, retrying in {:?}: {}", self.id, self.retry_backoff, err);
				self.flush_at = Some(Instant::now() + self.retry_backoff);
				self.retry_backoff = (self.retry_backoff * 2).min(RETRY_CAP);
			}
		}
	}

	/// Drain-grace expiry. Returns true when the actor may exit.
	async fn drain(&mut self) -> bool {
		self.drain_at = None;
		if !self.peers.is_empty() {
			return false;
		}
		if self.dirty {
			self.flush(true).await;
			if self.dirty {
				self.drain_retries += 1;
				if self.drain_retries < DRAIN_RETRIES {
					// stay resident with no peers; never drop dirty state early
					self.flush_at = None;
					self.drain_at = Some(Instant::now() + self.retry_backoff);
					return false;
				}
				error!(
					"{}: abandoning {} bytes of dirty state after {} drain attempts",
					self.id, self.replica_bytes, self.drain_retries
				);
			}
		}
		debug!("{}: torn down", self.id);
		true
	}

	async fn publish(&mut self, msg: FanoutMessage) {
		if let Err(err) = self.inner.cache.publish(&self.id, msg).await {
			// local peers keep working; cross-instance delivery resumes with
			// a sync exchange once the cache is back
			warn!("{}: fan-out publish failed: {}", self.id, err);
			self.fanout_live = false;
		}
	}

	async fn resubscribe(&mut self) {
		if let Some(task) = self.fanout_task.take() {
			task.abort();
		}
		match self.inner.cache.subscribe(&self.id).await {
			Ok(mut stream) => {
				let tx = self.self_tx.clone();
				self.fanout_task = Some(tokio::spawn(async move {
					while let Some(msg) = stream.next().await {
						if tx.send(DocMsg::Fanout(msg)).await.is_err() {
							break;
						}
					}
				}));
				self.fanout_live = true;
			}
			Err(err) => {
				warn!("{}: fan-out unavailable: {}", self.id, err);
				self.fanout_live = false;
			}
		}
	}

	/// Reply to attaches queued behind a failed load.
	fn reject_pending(&mut self, rejection: AttachRejected) {
		self.rx.close();
		while let Ok(msg) = self.rx.try_recv() {
			if let DocMsg::Attach { reply } = msg {
				let _ = reply.send(Err(rejection));
			}
		}
	}

	/// Remove this incarnation from the registry and release its slot.
	async fn unregister(&mut self) {
		if let Some(task) = self.fanout_task.take() {
			task.abort();
		}
		{
			let mut docs = self.inner.docs.lock().await;
			if docs.get(&self.id).is_some_and(|h| h.generation == self.generation) {
				docs.remove(&self.id);
			}
		}
		self.inner.live_documents.fetch_sub(1, Ordering::Relaxed);
	}
}

/// Removal diff for a set of awareness clients: clock bumped past the last
/// seen value with a null state, which every Yjs client treats as deletion.
fn removal_update(clients: &[(u64, u32)]) -> AwarenessUpdate {
	let clients = clients
		.iter()
		.map(|&(client, clock)| {
			(client, AwarenessUpdateEntry { clock: clock + 1, json: "null".into() })
		})
		.collect();
	AwarenessUpdate { clients }
}

fn blank_document(id: &str) -> DocumentCreate {
	DocumentCreate {
		id: id.into(),
		title: "Untitled".into(),
		markdown: String::new(),
		html: None,
		render_mode: RenderMode::Markdown,
		metadata: serde_json::Value::Object(serde_json::Map::new()),
	}
}

// vim: ts=4
