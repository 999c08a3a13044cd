//! Document Store Adapter
//!
//! Trait and types for pluggable document backends that persist share
//! metadata, the Markdown/HTML snapshot and the binary CRDT state.
//!
//! The adapter handles:
//! - Document CRUD (create, read, list, update, delete)
//! - Binary CRDT snapshot persistence (full state, last-writer-wins)
//! - Optional markdown snapshot refresh alongside a CRDT write
//!
//! Each adapter implementation provides its own constructor handling
//! backend-specific initialization (database path, connection settings, etc.).
//!
//! Storage I/O failures surface as `Error::DbError`; callers in the HTTP
//! layer fail fast, while the collaboration hub wraps its persistence calls
//! in retry/backoff.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;

use crate::prelude::*;

/// How the read-only view endpoint renders a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
	Markdown,
	Html,
}

impl RenderMode {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Markdown => "markdown",
			Self::Html => "html",
		}
	}
}

/// A persisted shared document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
	/// Opaque share id, unique across the store
	pub id: Box<str>,

	/// Display title. Never derived from content after creation.
	pub title: Box<str>,

	/// Markdown body, the authoritative human-readable snapshot
	pub markdown: String,

	/// Sanitized HTML rendering supplied by publishers, if any
	pub html: Option<String>,

	/// `Html` iff `html` was non-empty at write time
	pub render_mode: RenderMode,

	/// Full CRDT snapshot; None until the first collaborative edit
	#[serde(skip_serializing_if = "Option::is_none")]
	pub crdt_state: Option<Vec<u8>>,

	pub created_at: Timestamp,
	pub updated_at: Timestamp,

	/// Free-form metadata mapping. Recognized keys: `source`, `tags`,
	/// `createdVia`. Unknown keys are stored, not interpreted.
	pub metadata: Value,
}

/// Listing entry: metadata only, no bodies, no CRDT state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
	pub share_id: Box<str>,
	pub title: Box<str>,
	pub render_mode: RenderMode,
	pub created_at: Timestamp,
	pub updated_at: Timestamp,
}

/// Parameters for creating a document.
#[derive(Debug, Clone)]
pub struct DocumentCreate {
	pub id: Box<str>,
	pub title: Box<str>,
	pub markdown: String,
	pub html: Option<String>,
	pub render_mode: RenderMode,
	pub metadata: Value,
}

/// Partial update of a document. Unspecified fields are preserved.
///
/// `title` changes only when explicitly present - there is no code path
/// that derives it from content.
#[derive(Debug, Clone, Default)]
pub struct DocumentPatch {
	pub title: Patch<Box<str>>,
	pub markdown: Patch<String>,
	pub html: Patch<String>,
	pub render_mode: Patch<RenderMode>,
	pub metadata: Patch<Value>,
}

impl DocumentPatch {
	/// True if the patch would not modify anything
	pub fn is_empty(&self) -> bool {
		self.title.is_undefined()
			&& self.markdown.is_undefined()
			&& self.html.is_undefined()
			&& self.render_mode.is_undefined()
			&& self.metadata.is_undefined()
	}
}

/// Filters and pagination for document listing.
#[derive(Debug, Clone, Default)]
pub struct ListDocumentOptions {
	/// Match on the `source` metadata key
	pub source: Option<Box<str>>,
	pub offset: usize,
	/// 0 means the adapter default page size
	pub limit: usize,
}

/// Document Store Adapter trait.
///
/// Unified interface for document persistence backends. All operations are
/// row-atomic; `save_crdt` is last-writer-wins with full snapshots, relying
/// on the hub's per-id write serialization for ordering.
#[async_trait]
pub trait StoreAdapter: Debug + Send + Sync {
	/// Create a new document row.
	///
	/// Supplying an id that already exists returns `Error::Conflict` and
	/// leaves the existing row untouched. Callers mutate through `update`.
	async fn create(&self, doc: DocumentCreate) -> ClResult<Document>;

	/// Read a full document. Missing id returns `Error::NotFound`.
	async fn get(&self, id: &str) -> ClResult<Document>;

	/// List document summaries with pagination. Returns the page and the
	/// total number of matching rows.
	async fn list(&self, opts: &ListDocumentOptions) -> ClResult<(Vec<DocumentSummary>, usize)>;

	/// Apply a partial patch. Unspecified fields are preserved; `updated_at`
	/// is bumped when anything changed. Missing id returns `Error::NotFound`.
	async fn update(&self, id: &str, patch: &DocumentPatch) -> ClResult<Document>;

	/// Remove a row. Missing id returns `Error::NotFound`.
	async fn delete(&self, id: &str) -> ClResult<()>;

	/// Load the binary CRDT snapshot. `Ok(None)` for rows that were never
	/// collaboratively edited; missing id returns `Error::NotFound`.
	async fn load_crdt(&self, id: &str) -> ClResult<Option<Vec<u8>>>;

	/// Store a full CRDT snapshot, optionally refreshing the markdown
	/// snapshot column in the same write. Missing id returns
	/// `Error::NotFound` - the hub discards the write in that case rather
	/// than re-creating a deleted share.
	async fn save_crdt(
		&self,
		id: &str,
		state: &[u8],
		markdown_refresh: Option<&str>,
		updated_at: Timestamp,
	) -> ClResult<()>;

	/// Cheap liveness probe for the health endpoint.
	async fn health(&self) -> ClResult<()>;
}

// vim: ts=4
