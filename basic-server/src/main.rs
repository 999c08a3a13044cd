use std::{env, path, sync::Arc};

use mdshare::cache_adapter::CacheAdapter;
use mdshare::crdt::MarkdownRefresh;
use mdshare::error::ClResult;
use mdshare::AppBuilder;
use mdshare_cache_adapter_memory::CacheAdapterMemory;
use mdshare_cache_adapter_redis::CacheAdapterRedis;
use mdshare_store_adapter_sqlite::StoreAdapterSqlite;

fn env_flag(name: &str) -> bool {
	env::var(name).map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

async fn run() -> ClResult<()> {
	let db_path =
		path::PathBuf::from(env::var("MDSHARE_DB").unwrap_or("./data/mdshare.db".to_string()));
	if let Some(dir) = db_path.parent() {
		tokio::fs::create_dir_all(dir).await?;
	}

	let store = Arc::new(StoreAdapterSqlite::new(&db_path).await?);

	// REDIS_URL selects the clustered cache; without it a single instance
	// runs on the in-process adapter
	let cache: Arc<dyn CacheAdapter> = match env::var("REDIS_URL") {
		Ok(url) => Arc::new(CacheAdapterRedis::new(&url).await?),
		Err(_) => Arc::new(CacheAdapterMemory::default()),
	};

	let mut builder = AppBuilder::new();
	builder.store_adapter(store).cache_adapter(cache);

	if let Ok(listen) = env::var("MDSHARE_LISTEN") {
		builder.listen(listen);
	}
	if let Ok(base_url) = env::var("MDSHARE_BASE_URL") {
		builder.base_url(base_url);
	}
	if let Ok(origins) = env::var("MDSHARE_ORIGINS") {
		builder.origin_allow_list(origins.split(',').map(|origin| origin.trim().to_string()));
	}
	if let Ok(ms) = env::var("MDSHARE_DEBOUNCE_MS") {
		builder.persistence_debounce_ms(ms.parse()?);
	}
	if let Ok(ms) = env::var("MDSHARE_DRAIN_GRACE_MS") {
		builder.drain_grace_ms(ms.parse()?);
	}
	if let Ok(ms) = env::var("MDSHARE_AWARENESS_TIMEOUT_MS") {
		builder.awareness_timeout_ms(ms.parse()?);
	}
	if let Ok(mode) = env::var("MDSHARE_MARKDOWN_REFRESH") {
		builder.markdown_refresh(match mode.as_str() {
			"every_flush" => MarkdownRefresh::EveryFlush,
			"never" => MarkdownRefresh::Never,
			_ => MarkdownRefresh::OnDrain,
		});
	}
	if env_flag("MDSHARE_READ_ONLY") {
		builder.read_only(true);
	}

	builder.run().await
}

#[tokio::main]
async fn main() {
	if let Err(err) = run().await {
		eprintln!("fatal: {}", err);
		std::process::exit(1);
	}
}

// vim: ts=4
