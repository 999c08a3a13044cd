//! Content-consistency rules
//!
//! The rules that keep the markdown body, the sanitized HTML snapshot and
//! the CRDT state in agreement across create/update/reconnect paths.
//!
//! Title discipline: the title is an independent field and is never derived
//! from a leading heading. A publisher sharing a note whose markdown starts
//! with a single `# H1` strips exactly that heading before sending and uses
//! the filename as title; `strip_shared_heading` is that canonical rule, so
//! integration tests can enforce the contract end-to-end. The server itself
//! never calls it on incoming content.

use yrs::{Doc, GetString, Transact};

use crate::store_adapter::RenderMode;

/// Name of the shared text root inside every collaborative document.
pub const CONTENT_ROOT: &str = "content";

/// Compute the render mode from the sanitized HTML about to be written.
/// `Html` iff the snapshot is non-empty.
pub fn render_mode_for(html: Option<&str>) -> RenderMode {
	match html {
		Some(h) if !h.trim().is_empty() => RenderMode::Html,
		_ => RenderMode::Markdown,
	}
}

/// Publisher-side heading strip: remove exactly one leading `# H1` line,
/// looking past an optional YAML frontmatter block and surrounding blank
/// lines. Frontmatter and the rest of the body are preserved verbatim.
pub fn strip_shared_heading(markdown: &str) -> String {
	let (front, body) = split_frontmatter(markdown);

	// find the first non-blank line of the body
	let mut offset = 0;
	for line in body.split_inclusive('\n') {
		if !line.trim().is_empty() {
			break;
		}
		offset += line.len();
	}
	let rest = &body[offset..];

	let first_line = rest.lines().next().unwrap_or("");
	let is_h1 = first_line.starts_with("# ") || first_line.trim_end() == "#";
	if !is_h1 {
		return markdown.to_string();
	}

	// drop the heading line and the blank lines right after it
	let mut after = &rest[first_line.len()..];
	if let Some(stripped) = after.strip_prefix('\n') {
		after = stripped;
	}
	let mut trail = 0;
	for line in after.split_inclusive('\n') {
		if !line.trim().is_empty() {
			break;
		}
		trail += line.len();
	}

	format!("{}{}{}", front, &body[..offset], &after[trail..])
}

/// Split an optional leading YAML frontmatter block from the body. Returns
/// `(frontmatter_including_fences, body)`; the frontmatter part is empty when
/// there is none.
fn split_frontmatter(markdown: &str) -> (&str, &str) {
	let Some(rest) = markdown.strip_prefix("---\n") else {
		return ("", markdown);
	};
	let mut pos = 4;
	for line in rest.split_inclusive('\n') {
		let end = pos + line.len();
		if line.trim_end() == "---" {
			return (&markdown[..end], &markdown[end..]);
		}
		pos = end;
	}
	("", markdown)
}

/// Extract the markdown snapshot from a live replica's text root. Used by
/// the hub when refreshing the stored markdown column from the CRDT.
pub fn extract_markdown(doc: &Doc) -> String {
	let text = doc.get_or_insert_text(CONTENT_ROOT);
	let txn = doc.transact();
	text.get_string(&txn)
}

/// Seed a fresh replica from the stored markdown snapshot. Only valid for
/// documents that have never been collaboratively edited.
pub fn seed_from_markdown(doc: &Doc, markdown: &str) {
	if markdown.is_empty() {
		return;
	}
	let text = doc.get_or_insert_text(CONTENT_ROOT);
	let mut txn = doc.transact_mut();
	if yrs::Text::len(&text, &txn) == 0 {
		yrs::Text::push(&text, &mut txn, markdown);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_render_mode_follows_html_presence() {
		assert_eq!(render_mode_for(None), RenderMode::Markdown);
		assert_eq!(render_mode_for(Some("")), RenderMode::Markdown);
		assert_eq!(render_mode_for(Some("  \n")), RenderMode::Markdown);
		assert_eq!(render_mode_for(Some("<h1>x</h1>")), RenderMode::Html);
	}

	#[test]
	fn test_strip_plain_heading() {
		let md = "# My Note\n\nHello world\n";
		assert_eq!(strip_shared_heading(md), "Hello world\n");
	}

	#[test]
	fn test_strip_keeps_frontmatter() {
		let md = "---\ntags: [a]\n---\n\n# Title\n\nBody\n";
		assert_eq!(strip_shared_heading(md), "---\ntags: [a]\n---\n\nBody\n");
	}

	#[test]
	fn test_strip_only_first_h1() {
		let md = "# One\n\n# Two\n\nBody\n";
		assert_eq!(strip_shared_heading(md), "# Two\n\nBody\n");
	}

	#[test]
	fn test_no_strip_without_leading_h1() {
		let md = "Intro\n\n# Later heading\n";
		assert_eq!(strip_shared_heading(md), md);
		let md = "## Subheading first\n\nBody\n";
		assert_eq!(strip_shared_heading(md), md);
	}

	#[test]
	fn test_seed_and_extract_roundtrip() {
		let doc = Doc::new();
		seed_from_markdown(&doc, "# Heading\n\nBody");
		assert_eq!(extract_markdown(&doc), "# Heading\n\nBody");
	}

	#[test]
	fn test_seed_skips_nonempty_replica() {
		let doc = Doc::new();
		seed_from_markdown(&doc, "first");
		seed_from_markdown(&doc, "second");
		assert_eq!(extract_markdown(&doc), "first");
	}
}

// vim: ts=4
