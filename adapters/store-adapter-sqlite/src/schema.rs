//! Database schema initialization
//!
//! Creates the documents table and its indexes. Timestamps are unix epoch
//! integers; metadata is a JSON column queried through json_extract.

use sqlx::SqlitePool;

/// Initialize the database schema with all required tables and indexes
pub(crate) async fn init_db(db: &SqlitePool) -> Result<(), sqlx::Error> {
	let mut tx = db.begin().await?;

	// Documents
	//***********
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS documents (
		share_id text NOT NULL,
		title text NOT NULL,
		markdown text NOT NULL,
		html text,
		render_mode text NOT NULL DEFAULT 'markdown',
		crdt_state blob,
		metadata json,
		created_at datetime DEFAULT (unixepoch()),
		updated_at datetime DEFAULT (unixepoch()),
		PRIMARY KEY(share_id)
	)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_updated ON documents(updated_at)")
		.execute(&mut *tx)
		.await?;
	sqlx::query(
		"CREATE INDEX IF NOT EXISTS idx_documents_source
			ON documents(json_extract(metadata, '$.source'))",
	)
	.execute(&mut *tx)
	.await?;

	tx.commit().await?;
	Ok(())
}

// vim: ts=4
