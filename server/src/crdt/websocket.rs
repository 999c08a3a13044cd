//! WebSocket session glue for collaborative documents
//!
//! Bridges one upgraded connection to the live-document actor: a writer task
//! drains the peer's outbound queue and keeps the ping/pong liveness going,
//! while the reader loop rate-limits inbound sync frames and forwards them
//! through the peer link. Either side ending tears the session down; the
//! replica and the other peers are never affected by one connection's fate.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{interval, timeout, MissedTickBehavior};

use crate::crdt::live_doc::{AttachRejected, PeerClose, PeerSession};
use crate::crdt::protocol::{
	self, CLOSE_NORMAL, CLOSE_OVERLOADED, CLOSE_POLICY, CLOSE_PROTOCOL_ERROR, CLOSE_SERVER_ERROR,
};
use crate::prelude::*;

/// Rate-limit violations tolerated (with throttling) before disconnect.
const RATE_VIOLATION_LIMIT: u32 = 200;

/// Handle an upgraded collaborative-editing connection.
pub async fn handle_note_connection(socket: WebSocket, doc_id: String, app: App) {
	match app.hub.attach(&doc_id).await {
		Ok(session) => {
			info!("collab session open: {} (peer {})", doc_id, session.peer_id);
			run_session(socket, session, &app).await;
			info!("collab session closed: {}", doc_id);
		}
		Err(AttachRejected::Overloaded) => {
			close_with_error(socket, CLOSE_OVERLOADED, "overloaded, retry in 5s", true).await;
		}
		Err(AttachRejected::ReadOnly) => {
			close_with_error(socket, CLOSE_POLICY, "document creation disabled", false).await;
		}
		Err(AttachRejected::Storage | AttachRejected::Gone) => {
			close_with_error(socket, CLOSE_SERVER_ERROR, "storage unavailable", false).await;
		}
	}
}

/// Close the socket with a code, optionally preceded by an in-band auth
/// frame carrying the retry hint.
async fn close_with_error(mut socket: WebSocket, code: u16, reason: &'static str, auth: bool) {
	if auth {
		let _ = socket.send(Message::Binary(protocol::auth_deny(reason).into())).await;
	}
	let _ = socket.send(Message::Close(Some(CloseFrame { code, reason: reason.into() }))).await;
	let _ = socket.close().await;
}

async fn run_session(socket: WebSocket, session: PeerSession, app: &App) {
	let PeerSession { peer_id, doc_id, mut frames, closed, link } = session;
	let (mut sink, mut stream) = socket.split();

	let ping_period = Duration::from_millis(app.opts.ping_interval_ms);
	// two missed pongs (or total silence) end the session
	let idle_timeout = ping_period * 2 + Duration::from_secs(5);

	// reader-initiated close, routed through the writer which owns the sink
	let (local_close_tx, local_close_rx) = oneshot::channel::<PeerClose>();

	let mut writer = tokio::spawn(async move {
		let mut ping = interval(ping_period);
		ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
		let mut closed = closed;
		let mut local_close = local_close_rx;
		loop {
			tokio::select! {
				// close signals win races against queued frames so the peer
				// sees the real close code
				biased;
				res = &mut closed => {
					// a dropped sender means a plain detach, not an error
					let close = res.unwrap_or(PeerClose {
						code: CLOSE_NORMAL,
						reason: "session ended".into(),
					});
					let _ = sink
						.send(Message::Close(Some(CloseFrame {
							code: close.code,
							reason: close.reason.to_string().into(),
						})))
						.await;
					break;
				}
				res = &mut local_close => {
					if let Ok(close) = res {
						let _ = sink
							.send(Message::Close(Some(CloseFrame {
								code: close.code,
								reason: close.reason.to_string().into(),
							})))
							.await;
					}
					break;
				}
				frame = frames.recv() => match frame {
					Some(data) => {
						if sink.send(Message::Binary(data.into())).await.is_err() {
							break;
						}
					}
					None => {
						let _ = sink
							.send(Message::Close(Some(CloseFrame {
								code: CLOSE_NORMAL,
								reason: "session ended".into(),
							})))
							.await;
						break;
					}
				},
				_ = ping.tick() => {
					if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
						break;
					}
				}
			}
		}
	});

	let rate = NonZeroU32::new(app.opts.per_connection_update_rate).unwrap_or(NonZeroU32::MIN);
	let burst = rate.saturating_add(rate.get());
	let limiter = RateLimiter::direct(Quota::per_second(rate).allow_burst(burst));
	let mut violations: u32 = 0;
	let mut local_close_tx = Some(local_close_tx);

	loop {
		let msg = match timeout(idle_timeout, stream.next()).await {
			Err(_) => {
				debug!("{}: peer {} idle, closing", doc_id, peer_id);
				break;
			}
			Ok(None) => break,
			Ok(Some(Err(err))) => {
				debug!("{}: peer {} connection error: {}", doc_id, peer_id, err);
				break;
			}
			Ok(Some(Ok(msg))) => msg,
		};

		match msg {
			Message::Binary(data) => {
				if protocol::is_sync_frame(&data) && limiter.check().is_err() {
					violations += 1;
					if violations > RATE_VIOLATION_LIMIT {
						warn!("{}: peer {} flooding, disconnecting", doc_id, peer_id);
						if let Some(tx) = local_close_tx.take() {
							let _ = tx.send(PeerClose {
								code: CLOSE_POLICY,
								reason: "update rate exceeded".into(),
							});
						}
						break;
					}
					// throttle instead of dropping the edit
					limiter.until_ready().await;
				}
				link.frame(data.to_vec()).await;
			}
			// the protocol is binary-only
			Message::Text(_) => {
				if let Some(tx) = local_close_tx.take() {
					let _ = tx.send(PeerClose {
						code: CLOSE_PROTOCOL_ERROR,
						reason: "binary frames only".into(),
					});
				}
				break;
			}
			Message::Close(_) => break,
			// pings are answered by the library; any traffic refreshes the
			// idle deadline above
			Message::Ping(_) | Message::Pong(_) => {}
		}
	}

	link.detach().await;
	// detach closes the outbound queue, letting the writer flush its close
	// frame before we give up on it
	if timeout(Duration::from_secs(5), &mut writer).await.is_err() {
		writer.abort();
	}
}

// vim: ts=4
