//! Note subsystem. Share API types, validation and consistency rules.

pub mod consistency;
pub mod handler;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::prelude::*;
use crate::store_adapter::{DocumentSummary, RenderMode};
use crate::types::PaginationInfo;

// Limits //
//********//

pub const MAX_SHARE_ID_LEN: usize = 64;
pub const MAX_TITLE_BYTES: usize = 512;

/// Length of server-generated share ids
const GENERATED_ID_LEN: usize = 16;

// Request / response types //
//**************************//

/// POST /api/notes/share request body
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateShareRequest {
	pub title: String,
	/// Markdown body
	pub content: String,
	#[serde(default)]
	pub html_content: Option<String>,
	#[serde(default)]
	pub share_id: Option<String>,
	#[serde(default)]
	pub metadata: Option<Value>,
}

/// POST /api/notes/share response body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareCreatedResponse {
	pub share_id: Box<str>,
	pub collaborative_url: String,
	pub view_url: String,
	pub title: Box<str>,
}

/// GET /api/notes/:id response body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteResponse {
	pub share_id: Box<str>,
	pub title: Box<str>,
	pub content: String,
	pub html_content: Option<String>,
	pub render_mode: RenderMode,
	pub view_url: String,
	pub collaborative_url: String,
	pub created_at: Timestamp,
	pub updated_at: Timestamp,
	pub permissions: &'static str,
}

/// PUT /api/notes/:id request body. Absent fields leave the stored value
/// untouched; an explicit null clears nullable fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateShareRequest {
	#[serde(default)]
	pub title: Patch<String>,
	#[serde(default)]
	pub content: Patch<String>,
	#[serde(default)]
	pub html_content: Patch<String>,
	#[serde(default)]
	pub metadata: Patch<Value>,
}

/// PUT /api/notes/:id response body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateShareResponse {
	pub success: bool,
	pub updated_at: Timestamp,
}

/// GET /api/notes query parameters
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListNotesQuery {
	pub offset: Option<usize>,
	pub limit: Option<usize>,
	/// Filter on the `source` metadata key
	pub source: Option<String>,
}

/// GET /api/notes response body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteListResponse {
	pub notes: Vec<DocumentSummary>,
	pub pagination: PaginationInfo,
}

/// GET /api/health response body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
	pub status: &'static str,
	pub services: HealthServices,
	pub version: &'static str,
	/// Seconds since startup
	pub uptime: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthServices {
	pub database: &'static str,
	pub cache: &'static str,
	pub hub: String,
}

// Validation //
//************//

/// Share ids are conservative: alphanumeric plus `-` and `_`, bounded length.
pub fn validate_share_id(id: &str) -> ClResult<()> {
	if id.is_empty() || id.len() > MAX_SHARE_ID_LEN {
		return Err(Error::ValidationError("share id length out of range".into()));
	}
	if !id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_') {
		return Err(Error::ValidationError("share id contains invalid characters".into()));
	}
	Ok(())
}

pub fn validate_title(title: &str) -> ClResult<()> {
	if title.trim().is_empty() {
		return Err(Error::ValidationError("title must not be empty".into()));
	}
	if title.len() > MAX_TITLE_BYTES {
		return Err(Error::ValidationError("title too long".into()));
	}
	Ok(())
}

pub fn validate_markdown(markdown: &str, max_bytes: usize) -> ClResult<()> {
	if markdown.len() > max_bytes {
		return Err(Error::PayloadTooLarge(format!("markdown exceeds {} bytes", max_bytes)));
	}
	Ok(())
}

pub fn validate_html(html: &str, max_bytes: usize) -> ClResult<()> {
	if html.len() > max_bytes {
		return Err(Error::PayloadTooLarge(format!("html exceeds {} bytes", max_bytes)));
	}
	Ok(())
}

// Helpers //
//*********//

/// Generate a fresh share id
pub fn generate_share_id() -> Box<str> {
	use rand::RngExt;
	let id: String = rand::rng()
		.sample_iter(rand::distr::Alphanumeric)
		.take(GENERATED_ID_LEN)
		.map(char::from)
		.collect();
	id.into()
}

/// Read-only view URL for a share
pub fn view_url(base_url: &str, id: &str) -> String {
	format!("{}/view/{}", base_url.trim_end_matches('/'), id)
}

/// Collaborative editor URL for a share
pub fn collaborative_url(base_url: &str, id: &str) -> String {
	format!("{}/editor/{}", base_url.trim_end_matches('/'), id)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_share_id_validation() {
		assert!(validate_share_id("abc-DEF_123").is_ok());
		assert!(validate_share_id("").is_err());
		assert!(validate_share_id("has space").is_err());
		assert!(validate_share_id("semi;colon").is_err());
		assert!(validate_share_id(&"x".repeat(MAX_SHARE_ID_LEN + 1)).is_err());
	}

	#[test]
	fn test_generated_ids_are_valid_and_distinct() {
		let a = generate_share_id();
		let b = generate_share_id();
		assert!(validate_share_id(&a).is_ok());
		assert_ne!(a, b);
	}

	#[test]
	fn test_urls() {
		assert_eq!(view_url("http://x/", "id1"), "http://x/view/id1");
		assert_eq!(collaborative_url("http://x", "id1"), "http://x/editor/id1");
	}

	#[test]
	fn test_markdown_size_boundary() {
		let md = "a".repeat(64);
		assert!(validate_markdown(&md, 64).is_ok());
		assert!(validate_markdown(&md, 63).is_err());
	}

	#[test]
	fn test_update_request_patch_semantics() {
		let req: UpdateShareRequest =
			serde_json::from_str(r#"{"content":"new","htmlContent":null}"#).unwrap();
		assert!(req.title.is_undefined());
		assert_eq!(req.content, Patch::Value("new".to_string()));
		assert!(req.html_content.is_null());
		assert!(req.metadata.is_undefined());
	}
}

// vim: ts=4
