//! HTML sanitizer
//!
//! Pure, deterministic reduction of untrusted HTML to a conservative safe
//! subset. Publishers send pre-rendered HTML alongside markdown; everything
//! that could execute is removed before the snapshot is persisted.
//!
//! The filter runs over a `quick_xml` event stream with an explicit element
//! stack, so it needs no browser DOM and produces well-formed output:
//! - tags outside the allow-list are unwrapped (children kept)
//! - dangerous containers (`script`, `style`, `iframe`, `object`, `embed`,
//!   `form`, `input`) are dropped together with their entire subtree
//! - `on*` event handlers and inline `style` attributes are always removed
//! - URL attributes are scheme-filtered after entity decoding, so encoded
//!   `javascript:` payloads do not survive
//! - comments, CDATA, processing instructions and doctypes are dropped
//!
//! On parser failure the sanitizer returns the empty string; the share API
//! treats empty HTML as "markdown-only". The output is a fixpoint:
//! `sanitize(sanitize(x)) == sanitize(x)`.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// Tags preserved verbatim (lowercase).
const ALLOWED_TAGS: &[&str] = &[
	"h1", "h2", "h3", "h4", "h5", "h6",
	"p", "div", "span", "br", "hr",
	"strong", "b", "em", "i", "u", "s", "del", "sub", "sup",
	"ul", "ol", "li",
	"blockquote", "q",
	"code", "pre",
	"a", "img",
	"table", "thead", "tbody", "tr", "th", "td",
];

/// Tags whose entire subtree is discarded.
const DROPPED_TAGS: &[&str] = &["script", "style", "iframe", "object", "embed", "form", "input"];

/// HTML void elements: no end tag, never any subtree. The allowed subset
/// among these (`br`, `hr`, `img`) is serialized self-closing.
const VOID_TAGS: &[&str] = &[
	"area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
	"source", "track", "wbr",
];

/// Attributes allowed on any element.
const GLOBAL_ATTRS: &[&str] = &["class", "id"];

fn is_allowed(tag: &str) -> bool {
	ALLOWED_TAGS.contains(&tag)
}

fn is_dropped(tag: &str) -> bool {
	DROPPED_TAGS.contains(&tag)
}

fn is_void(tag: &str) -> bool {
	VOID_TAGS.contains(&tag)
}

/// Per-tag attribute policy beyond the global set. URL-valued attributes get
/// scheme filtering on top.
fn attr_allowed(tag: &str, attr: &str) -> bool {
	if GLOBAL_ATTRS.contains(&attr) {
		return true;
	}
	match tag {
		"a" => matches!(attr, "href" | "target" | "rel"),
		"img" => matches!(attr, "src" | "alt" | "width" | "height"),
		"td" | "th" => matches!(attr, "colspan" | "rowspan"),
		_ => false,
	}
}

/// True when the attribute value is interpreted as a URL.
fn attr_is_url(tag: &str, attr: &str) -> bool {
	matches!((tag, attr), ("a", "href") | ("img", "src"))
}

/// Scheme filter applied to decoded URL values. Control characters and
/// whitespace are stripped first - browsers ignore them when resolving a
/// scheme, so the filter must too.
fn url_is_safe(value: &str, tag: &str) -> bool {
	let cleaned: String = value
		.chars()
		.filter(|c| !c.is_ascii_control() && !c.is_whitespace())
		.collect::<String>()
		.to_ascii_lowercase();
	let Some(colon) = cleaned.find(':') else {
		// relative URL
		return true;
	};
	// A colon after a path/query/fragment separator is not a scheme
	if cleaned[..colon].contains(['/', '?', '#']) {
		return true;
	}
	match &cleaned[..colon] {
		"http" | "https" | "mailto" => true,
		// inline raster images are inert; every other data: MIME is not
		"data" => tag == "img" && cleaned.starts_with("data:image/"),
		_ => false,
	}
}

fn escape_into(out: &mut String, value: &str) {
	for c in value.chars() {
		match c {
			'&' => out.push_str("&amp;"),
			'<' => out.push_str("&lt;"),
			'>' => out.push_str("&gt;"),
			'"' => out.push_str("&quot;"),
			_ => out.push(c),
		}
	}
}

/// Serialize an allowed opening tag with its filtered attributes.
fn write_open(out: &mut String, tag: &str, e: &BytesStart) {
	out.push('<');
	out.push_str(tag);

	let mut seen: Vec<Box<str>> = Vec::new();
	for attr in e.attributes().with_checks(false).flatten() {
		let name = String::from_utf8_lossy(attr.key.as_ref()).to_ascii_lowercase();
		// event handlers and inline CSS never pass, regardless of tag
		if name.starts_with("on") || name == "style" {
			continue;
		}
		if !attr_allowed(tag, &name) || seen.iter().any(|s| **s == *name) {
			continue;
		}
		// entity-decode before any inspection; undecodable values are dropped
		let Ok(value) = attr.unescape_value() else { continue };
		if attr_is_url(tag, &name) && !url_is_safe(&value, tag) {
			continue;
		}
		seen.push(name.clone().into());
		out.push(' ');
		out.push_str(&name);
		out.push_str("=\"");
		escape_into(out, &value);
		out.push('"');
	}

	if is_void(tag) {
		out.push_str(" />");
	} else {
		out.push('>');
	}
}

/// Sanitize untrusted HTML into the safe subset.
///
/// Returns the empty string on parser failure rather than propagating an
/// error; callers treat empty HTML as "no HTML rendering".
pub fn sanitize_html(input: &str) -> String {
	if input.trim().is_empty() {
		return String::new();
	}

	let mut reader = Reader::from_str(input);
	reader.config_mut().check_end_names = false;

	let mut out = String::with_capacity(input.len());
	// open allowed elements awaiting their end tag
	let mut stack: Vec<Box<str>> = Vec::new();
	// >0 while inside a dropped subtree; counts nesting of any tag
	let mut drop_depth: usize = 0;

	loop {
		match reader.read_event() {
			Err(_) => return String::new(),
			Ok(Event::Eof) => break,
			Ok(Event::Start(e)) => {
				let tag = String::from_utf8_lossy(e.name().as_ref()).to_ascii_lowercase();
				// void elements never open a subtree, so they must not touch
				// the drop counter even when written without a slash
				let void = is_void(&tag);
				if drop_depth > 0 {
					if !void {
						drop_depth += 1;
					}
				} else if is_dropped(&tag) {
					if !void {
						drop_depth = 1;
					}
				} else if is_allowed(&tag) {
					write_open(&mut out, &tag, &e);
					if !void {
						stack.push(tag.into());
					}
				}
				// unknown harmless tag: unwrapped, children continue
			}
			Ok(Event::Empty(e)) => {
				let tag = String::from_utf8_lossy(e.name().as_ref()).to_ascii_lowercase();
				if drop_depth == 0 && is_allowed(&tag) {
					write_open(&mut out, &tag, &e);
					if !is_void(&tag) {
						out.push_str("</");
						out.push_str(&tag);
						out.push('>');
					}
				}
			}
			Ok(Event::End(e)) => {
				let tag = String::from_utf8_lossy(e.name().as_ref()).to_ascii_lowercase();
				if drop_depth > 0 {
					if !is_void(&tag) {
						drop_depth -= 1;
					}
					continue;
				}
				if let Some(pos) = stack.iter().rposition(|t| **t == *tag) {
					// close implicitly-open children first to stay well-formed
					while stack.len() > pos {
						if let Some(open) = stack.pop() {
							out.push_str("</");
							out.push_str(&open);
							out.push('>');
						}
					}
				}
				// stray or unknown end tags are ignored
			}
			Ok(Event::Text(t)) => {
				if drop_depth == 0 {
					// raw passthrough: text events carry no `<`, and keeping
					// the source entities byte-for-byte makes the filter a
					// fixpoint
					out.push_str(&String::from_utf8_lossy(&t));
				}
			}
			Ok(Event::GeneralRef(r)) => {
				if drop_depth == 0 {
					out.push('&');
					out.push_str(&String::from_utf8_lossy(&r));
					out.push(';');
				}
			}
			// comments, CDATA, declarations, PIs, doctypes carry nothing safe
			Ok(Event::Comment(_) | Event::CData(_) | Event::Decl(_) | Event::PI(_)
				| Event::DocType(_)) => {}
		}
	}

	// close anything the input left open
	while let Some(open) = stack.pop() {
		out.push_str("</");
		out.push_str(&open);
		out.push('>');
	}

	out
}


// vim: ts=4
