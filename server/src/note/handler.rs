//! Share API handlers
//!
//! HTTP surface for document CRUD. Create and update run publisher HTML
//! through the sanitizer and recompute the render mode; the CRDT state is
//! never touched here - it changes only through the collaboration hub.

use axum::{
	extract::{Path, Query, State},
	http::{HeaderMap, StatusCode},
	Json,
};
use serde_json::Value;

use crate::core::rate_limit::client_addr;
use crate::note::{
	collaborative_url, consistency, generate_share_id, validate_html, validate_markdown,
	validate_share_id, validate_title, view_url, CreateShareRequest, HealthResponse,
	HealthServices, ListNotesQuery, NoteListResponse, NoteResponse, ShareCreatedResponse,
	UpdateShareRequest, UpdateShareResponse,
};
use crate::prelude::*;
use crate::sanitize::sanitize_html;
use crate::store_adapter::{Document, DocumentCreate, DocumentPatch, ListDocumentOptions};
use crate::types::PaginationInfo;

/// Invalidate the hot cache after a share API write; a failure here only
/// delays freshness, the store stays authoritative.
async fn invalidate_cache(app: &App, id: &str) {
	if let Err(err) = app.cache.invalidate(id).await {
		warn!("cache invalidation failed for {}: {}", id, err);
	}
}

fn note_response(app: &App, doc: Document) -> NoteResponse {
	let base = &app.opts.base_url;
	NoteResponse {
		view_url: view_url(base, &doc.id),
		collaborative_url: collaborative_url(base, &doc.id),
		share_id: doc.id,
		title: doc.title,
		content: doc.markdown,
		html_content: doc.html,
		render_mode: doc.render_mode,
		created_at: doc.created_at,
		updated_at: doc.updated_at,
		permissions: "edit",
	}
}

/// POST /api/notes/share - create a shared document
pub async fn post_share(
	State(app): State<App>,
	headers: HeaderMap,
	Json(req): Json<CreateShareRequest>,
) -> ClResult<(StatusCode, Json<ShareCreatedResponse>)> {
	app.rate_limiter.check_share(client_addr(&headers))?;

	validate_title(&req.title)?;
	if req.content.is_empty() {
		return Err(Error::ValidationError("content must not be empty".into()));
	}
	validate_markdown(&req.content, app.opts.max_markdown_bytes)?;

	let id: Box<str> = match req.share_id {
		Some(id) => {
			validate_share_id(&id)?;
			id.into()
		}
		None => generate_share_id(),
	};

	let html = match req.html_content.as_deref() {
		Some(raw) => {
			validate_html(raw, app.opts.max_html_bytes)?;
			let safe = sanitize_html(raw);
			// trim-empty matches render_mode_for, so whitespace residue left
			// after stripping dangerous subtrees counts as "no HTML"
			if safe.trim().is_empty() { None } else { Some(safe) }
		}
		None => None,
	};
	let render_mode = consistency::render_mode_for(html.as_deref());

	let metadata = match req.metadata {
		Some(Value::Object(map)) => Value::Object(map),
		Some(_) => return Err(Error::ValidationError("metadata must be an object".into())),
		None => Value::Object(serde_json::Map::new()),
	};

	let doc = app
		.store
		.create(DocumentCreate {
			id,
			title: req.title.into(),
			markdown: req.content,
			html,
			render_mode,
			metadata,
		})
		.await?;
	invalidate_cache(&app, &doc.id).await;

	info!("share created: {} ({:?})", doc.id, doc.render_mode);

	let base = &app.opts.base_url;
	let response = ShareCreatedResponse {
		collaborative_url: collaborative_url(base, &doc.id),
		view_url: view_url(base, &doc.id),
		share_id: doc.id,
		title: doc.title,
	};
	Ok((StatusCode::CREATED, Json(response)))
}

/// GET /api/notes/:id - fetch a shared document
pub async fn get_note(
	State(app): State<App>,
	Path(id): Path<String>,
) -> ClResult<Json<NoteResponse>> {
	let doc = app.store.get(&id).await?;
	Ok(Json(note_response(&app, doc)))
}

/// PUT /api/notes/:id - partial update
///
/// Only supplied fields change. The title changes only when explicitly
/// present; supplied HTML is re-sanitized and the render mode recomputed.
pub async fn put_note(
	State(app): State<App>,
	Path(id): Path<String>,
	Json(req): Json<UpdateShareRequest>,
) -> ClResult<Json<UpdateShareResponse>> {
	let mut patch = DocumentPatch::default();

	match req.title {
		Patch::Undefined => {}
		Patch::Null => return Err(Error::ValidationError("title cannot be cleared".into())),
		Patch::Value(title) => {
			validate_title(&title)?;
			patch.title = Patch::Value(title.into());
		}
	}

	match req.content {
		Patch::Undefined => {}
		Patch::Null => return Err(Error::ValidationError("content cannot be cleared".into())),
		Patch::Value(content) => {
			validate_markdown(&content, app.opts.max_markdown_bytes)?;
			patch.markdown = Patch::Value(content);
		}
	}

	match req.html_content {
		Patch::Undefined => {}
		Patch::Null => {
			patch.html = Patch::Null;
			patch.render_mode = Patch::Value(consistency::render_mode_for(None));
		}
		Patch::Value(raw) => {
			validate_html(&raw, app.opts.max_html_bytes)?;
			let safe = sanitize_html(&raw);
			// same trim-empty gate as on create: stored html and render mode
			// must agree on what counts as present
			let html = if safe.trim().is_empty() { None } else { Some(safe) };
			patch.render_mode = Patch::Value(consistency::render_mode_for(html.as_deref()));
			patch.html = match html {
				Some(safe) => Patch::Value(safe),
				None => Patch::Null,
			};
		}
	}

	match req.metadata {
		Patch::Undefined => {}
		Patch::Null => patch.metadata = Patch::Null,
		Patch::Value(Value::Object(map)) => patch.metadata = Patch::Value(Value::Object(map)),
		Patch::Value(_) => {
			return Err(Error::ValidationError("metadata must be an object".into()))
		}
	}

	let doc = app.store.update(&id, &patch).await?;
	invalidate_cache(&app, &id).await;

	Ok(Json(UpdateShareResponse { success: true, updated_at: doc.updated_at }))
}

/// DELETE /api/notes/:id - remove a share
///
/// Purges the row and tombstones the cache entry. Live collaboration
/// sessions keep serving attached peers until they disconnect; the drain
/// save then finds the row gone and is discarded.
pub async fn delete_note(State(app): State<App>, Path(id): Path<String>) -> ClResult<StatusCode> {
	app.store.delete(&id).await?;
	invalidate_cache(&app, &id).await;
	info!("share deleted: {}", id);
	Ok(StatusCode::NO_CONTENT)
}

/// GET /api/notes - paginated listing of summaries
pub async fn list_notes(
	State(app): State<App>,
	Query(query): Query<ListNotesQuery>,
) -> ClResult<Json<NoteListResponse>> {
	let limit = query.limit.unwrap_or(50).clamp(1, 200);
	let offset = query.offset.unwrap_or(0);
	let opts = ListDocumentOptions {
		source: query.source.map(Into::into),
		offset,
		limit,
	};
	let (notes, total) = app.store.list(&opts).await?;
	Ok(Json(NoteListResponse {
		notes,
		pagination: PaginationInfo { offset, limit, total },
	}))
}

/// GET /api/health - liveness plus dependency status
pub async fn get_health(State(app): State<App>) -> Json<HealthResponse> {
	let database = match app.store.health().await {
		Ok(()) => "connected",
		Err(err) => {
			warn!("health: store probe failed: {}", err);
			"unavailable"
		}
	};
	let cache = match app.cache.health().await {
		Ok(()) => "connected",
		Err(err) => {
			warn!("health: cache probe failed: {}", err);
			"unavailable"
		}
	};
	let stats = app.hub.stats();
	let status = if database == "connected" && cache == "connected" { "ok" } else { "degraded" };

	Json(HealthResponse {
		status,
		services: HealthServices {
			database,
			cache,
			hub: format!("ok ({} live documents, {} peers)", stats.live_documents, stats.peers),
		},
		version: crate::core::app::VERSION,
		uptime: app.started_at.elapsed().as_secs(),
	})
}

// vim: ts=4
