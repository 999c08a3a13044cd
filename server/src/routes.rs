//! API routes

use axum::{
	http::{header, HeaderValue},
	middleware,
	routing::{any, delete, get, post, put},
	Router,
};
use tower_http::{
	cors::CorsLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer,
};

use crate::core::middleware::request_id_middleware;
use crate::core::websocket;
use crate::note;
use crate::prelude::*;

async fn api_not_found() -> Error {
	Error::NotFound
}

// ============================================================================
// SHARE API - document CRUD plus health
// ============================================================================
fn init_api_routes() -> Router<App> {
	Router::new()
		.route("/api/notes/share", post(note::handler::post_share))
		.route("/api/notes", get(note::handler::list_notes))
		.route("/api/notes/{share_id}", get(note::handler::get_note))
		.route("/api/notes/{share_id}", put(note::handler::put_note))
		.route("/api/notes/{share_id}", delete(note::handler::delete_note))
		.route("/api/health", get(note::handler::get_health))
		.layer(SetResponseHeaderLayer::if_not_present(
			header::CACHE_CONTROL,
			HeaderValue::from_static("no-store, no-cache"),
		))
		.layer(SetResponseHeaderLayer::if_not_present(
			header::EXPIRES,
			HeaderValue::from_static("0"),
		))
}

// ============================================================================
// COLLABORATION HUB - per-document WebSocket endpoint
// ============================================================================
fn init_ws_routes() -> Router<App> {
	Router::new().route("/ws/{doc_id}", any(websocket::get_ws_note))
}

pub fn init(app: App) -> Router {
	let cors_layer = CorsLayer::very_permissive();

	init_api_routes()
		.merge(init_ws_routes())
		.fallback(api_not_found)
		.layer(cors_layer)
		.layer(middleware::from_fn(request_id_middleware))
		.layer(TraceLayer::new_for_http())
		.with_state(app)
}

// vim: ts=4
