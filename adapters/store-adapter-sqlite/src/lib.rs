//! SQLite-backed document store adapter for mdshare.
//!
//! One `documents` table holds share metadata, the markdown/HTML snapshot
//! and the opaque CRDT blob. Partial updates are assembled with a query
//! builder driven by the three-state `Patch` type, so absent fields never
//! touch the stored values.

use async_trait::async_trait;
use sqlx::{
	sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqlitePool, SqliteRow},
	QueryBuilder, Row,
};
use std::path::Path;

use mdshare::prelude::*;
use mdshare::store_adapter::{
	Document, DocumentCreate, DocumentPatch, DocumentSummary, ListDocumentOptions, RenderMode,
	StoreAdapter,
};

mod schema;

const DEFAULT_PAGE_SIZE: usize = 50;

/// Append one `field=value` fragment per present patch field.
macro_rules! push_patch {
	($query:expr, $has_updates:expr, $field:literal, $patch:expr) => {{
		match $patch {
			Patch::Undefined => $has_updates,
			Patch::Null => {
				if $has_updates {
					$query.push(", ");
				}
				$query.push(concat!($field, "=NULL"));
				true
			}
			Patch::Value(v) => {
				if $has_updates {
					$query.push(", ");
				}
				$query.push(concat!($field, "=")).push_bind(v);
				true
			}
		}
	}};
}

fn db_err(err: sqlx::Error) -> Error {
	warn!("DB: {:#?}", err);
	Error::DbError
}

fn render_mode_from(s: &str) -> RenderMode {
	match s {
		"html" => RenderMode::Html,
		_ => RenderMode::Markdown,
	}
}

fn row_to_document(row: &SqliteRow) -> Result<Document, sqlx::Error> {
	let metadata: Option<String> = row.try_get("metadata")?;
	let metadata = metadata
		.and_then(|raw| serde_json::from_str(&raw).ok())
		.unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));
	// empty blobs mean "never collaboratively edited"
	let crdt_state: Option<Vec<u8>> = row.try_get("crdt_state")?;
	let render_mode: String = row.try_get("render_mode")?;

	Ok(Document {
		id: row.try_get::<String, _>("share_id")?.into(),
		title: row.try_get::<String, _>("title")?.into(),
		markdown: row.try_get("markdown")?,
		html: row.try_get("html")?,
		render_mode: render_mode_from(&render_mode),
		crdt_state: crdt_state.filter(|state| !state.is_empty()),
		created_at: Timestamp(row.try_get("created_at")?),
		updated_at: Timestamp(row.try_get("updated_at")?),
		metadata,
	})
}

fn row_to_summary(row: &SqliteRow) -> Result<DocumentSummary, sqlx::Error> {
	let render_mode: String = row.try_get("render_mode")?;
	Ok(DocumentSummary {
		share_id: row.try_get::<String, _>("share_id")?.into(),
		title: row.try_get::<String, _>("title")?.into(),
		render_mode: render_mode_from(&render_mode),
		created_at: Timestamp(row.try_get("created_at")?),
		updated_at: Timestamp(row.try_get("updated_at")?),
	})
}

#[derive(Debug)]
pub struct StoreAdapterSqlite {
	db: SqlitePool,
}

impl StoreAdapterSqlite {
	/// Open (or create) the database at `db_path` and run the schema setup.
	pub async fn new(db_path: impl AsRef<Path>) -> ClResult<Self> {
		let opts = SqliteConnectOptions::new()
			.filename(db_path)
			.create_if_missing(true)
			.journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
		let db = SqlitePoolOptions::new()
			.max_connections(8)
			.connect_with(opts)
			.await
			.map_err(db_err)?;
		schema::init_db(&db).await.map_err(db_err)?;
		Ok(Self { db })
	}
}

#[async_trait]
impl StoreAdapter for StoreAdapterSqlite {
	async fn create(&self, doc: DocumentCreate) -> ClResult<Document> {
		let metadata = doc.metadata.to_string();
		sqlx::query(
			"INSERT INTO documents (share_id, title, markdown, html, render_mode, metadata)
				VALUES (?, ?, ?, ?, ?, ?)",
		)
		.bind(&*doc.id)
		.bind(&*doc.title)
		.bind(&doc.markdown)
		.bind(&doc.html)
		.bind(doc.render_mode.as_str())
		.bind(metadata)
		.execute(&self.db)
		.await
		.map_err(|err| match &err {
			sqlx::Error::Database(db) if db.is_unique_violation() => {
				Error::Conflict(format!("share id '{}' already exists", doc.id))
			}
			_ => db_err(err),
		})?;

		self.get(&doc.id).await
	}

	async fn get(&self, id: &str) -> ClResult<Document> {
		let row = sqlx::query("SELECT * FROM documents WHERE share_id = ?")
			.bind(id)
			.fetch_optional(&self.db)
			.await
			.map_err(db_err)?
			.ok_or(Error::NotFound)?;
		row_to_document(&row).map_err(db_err)
	}

	async fn list(&self, opts: &ListDocumentOptions) -> ClResult<(Vec<DocumentSummary>, usize)> {
		let limit = if opts.limit == 0 { DEFAULT_PAGE_SIZE } else { opts.limit };

		let mut count_query = QueryBuilder::new("SELECT COUNT(*) AS cnt FROM documents");
		if let Some(source) = &opts.source {
			count_query
				.push(" WHERE json_extract(metadata, '$.source') = ")
				.push_bind(&**source);
		}
		let total: i64 = count_query
			.build()
			.fetch_one(&self.db)
			.await
			.map_err(db_err)?
			.try_get("cnt")
			.map_err(db_err)?;

		let mut query = QueryBuilder::new(
			"SELECT share_id, title, render_mode, created_at, updated_at FROM documents",
		);
		if let Some(source) = &opts.source {
			query.push(" WHERE json_extract(metadata, '$.source') = ").push_bind(&**source);
		}
		query
			.push(" ORDER BY updated_at DESC, share_id LIMIT ")
			.push_bind(limit as i64)
			.push(" OFFSET ")
			.push_bind(opts.offset as i64);

		let rows = query.build().fetch_all(&self.db).await.map_err(db_err)?;
		let mut summaries = Vec::with_capacity(rows.len());
		for row in &rows {
			summaries.push(row_to_summary(row).map_err(db_err)?);
		}
		Ok((summaries, total as usize))
	}

	async fn update(&self, id: &str, patch: &DocumentPatch) -> ClResult<Document> {
		if patch.is_empty() {
			return self.get(id).await;
		}

		let mut query = QueryBuilder::new("UPDATE documents SET ");
		let mut has_updates = false;
		has_updates =
			push_patch!(query, has_updates, "title", patch.title.clone().map(String::from));
		has_updates = push_patch!(query, has_updates, "markdown", patch.markdown.clone());
		has_updates = push_patch!(query, has_updates, "html", patch.html.clone());
		has_updates = push_patch!(
			query,
			has_updates,
			"render_mode",
			patch.render_mode.clone().map(|mode| mode.as_str())
		);
		has_updates = push_patch!(
			query,
			has_updates,
			"metadata",
			patch.metadata.clone().map(|value| value.to_string())
		);
		if has_updates {
			query.push(", ");
		}
		query.push("updated_at=unixepoch() WHERE share_id=").push_bind(id);

		let result = query.build().execute(&self.db).await.map_err(db_err)?;
		if result.rows_affected() == 0 {
			return Err(Error::NotFound);
		}
		self.get(id).await
	}

	async fn delete(&self, id: &str) -> ClResult<()> {
		let result = sqlx::query("DELETE FROM documents WHERE share_id = ?")
			.bind(id)
			.execute(&self.db)
			.await
			.map_err(db_err)?;
		if result.rows_affected() == 0 {
			return Err(Error::NotFound);
		}
		Ok(())
	}

	async fn load_crdt(&self, id: &str) -> ClResult<Option<Vec<u8>>> {
		let row = sqlx::query("SELECT crdt_state FROM documents WHERE share_id = ?")
			.bind(id)
			.fetch_optional(&self.db)
			.await
			.map_err(db_err)?
			.ok_or(Error::NotFound)?;
		let state: Option<Vec<u8>> = row.try_get("crdt_state").map_err(db_err)?;
		Ok(state.filter(|bytes| !bytes.is_empty()))
	}

	async fn save_crdt(
		&self,
		id: &str,
		state: &[u8],
		markdown_refresh: Option<&str>,
		updated_at: Timestamp,
	) -> ClResult<()> {
		let result = match markdown_refresh {
			Some(markdown) => {
				sqlx::query(
					"UPDATE documents SET crdt_state=?, markdown=?, updated_at=?
						WHERE share_id=?",
				)
				.bind(state)
				.bind(markdown)
				.bind(updated_at.0)
				.bind(id)
				.execute(&self.db)
				.await
			}
			None => {
				sqlx::query("UPDATE documents SET crdt_state=?, updated_at=? WHERE share_id=?")
					.bind(state)
					.bind(updated_at.0)
					.bind(id)
					.execute(&self.db)
					.await
			}
		}
		.map_err(db_err)?;

		// row deleted under us: the hub discards the write
		if result.rows_affected() == 0 {
			return Err(Error::NotFound);
		}
		Ok(())
	}

	async fn health(&self) -> ClResult<()> {
		sqlx::query("SELECT 1").execute(&self.db).await.map_err(db_err)?;
		Ok(())
	}
}

// vim: ts=4
