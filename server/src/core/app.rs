//! App state type

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache_adapter::CacheAdapter;
use crate::core::rate_limit::RateLimitManager;
use crate::crdt::{Hub, HubConfig, MarkdownRefresh};
use crate::prelude::*;
use crate::routes;
use crate::store_adapter::StoreAdapter;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct AppState {
	pub opts: AppBuilderOpts,
	pub store: Arc<dyn StoreAdapter>,
	pub cache: Arc<dyn CacheAdapter>,
	pub hub: Hub,
	pub rate_limiter: Arc<RateLimitManager>,
	/// Uuid tagged onto fan-out messages; unique per process
	pub instance_id: Box<str>,
	pub started_at: Instant,
}

pub type App = Arc<AppState>;

pub struct Adapters {
	pub store: Option<Arc<dyn StoreAdapter>>,
	pub cache: Option<Arc<dyn CacheAdapter>>,
}

#[derive(Debug)]
pub struct AppBuilderOpts {
	pub listen: Box<str>,
	/// Public base URL used in view/editor links
	pub base_url: Box<str>,
	/// Empty list permits any origin
	pub origin_allow_list: Box<[Box<str>]>,
	pub max_markdown_bytes: usize,
	pub max_html_bytes: usize,
	pub persistence_debounce_ms: u64,
	pub awareness_timeout_ms: u64,
	pub drain_grace_ms: u64,
	/// Inbound sync frames per second per connection
	pub per_connection_update_rate: u32,
	pub max_live_documents: usize,
	pub max_replica_bytes: usize,
	pub ping_interval_ms: u64,
	pub shutdown_grace_ms: u64,
	pub share_rate_per_minute: u32,
	pub markdown_refresh: MarkdownRefresh,
	/// Reject creation of missing documents on WebSocket attach
	pub read_only: bool,
}

impl Default for AppBuilderOpts {
	fn default() -> Self {
		Self {
			listen: "127.0.0.1:8787".into(),
			base_url: "http://localhost:8787".into(),
			origin_allow_list: Box::new([]),
			max_markdown_bytes: 1024 * 1024,
			max_html_bytes: 5 * 1024 * 1024,
			persistence_debounce_ms: 2000,
			awareness_timeout_ms: 30_000,
			drain_grace_ms: 10_000,
			per_connection_update_rate: 64,
			max_live_documents: 1024,
			max_replica_bytes: 50 * 1024 * 1024,
			ping_interval_ms: 30_000,
			shutdown_grace_ms: 10_000,
			share_rate_per_minute: 30,
			markdown_refresh: MarkdownRefresh::OnDrain,
			read_only: false,
		}
	}
}

pub struct AppBuilder {
	opts: AppBuilderOpts,
	adapters: Adapters,
}

impl AppBuilder {
	pub fn new() -> Self {
		tracing_subscriber::fmt()
			.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
			.with_target(false)
			.init();
		AppBuilder {
			opts: AppBuilderOpts::default(),
			adapters: Adapters { store: None, cache: None },
		}
	}

	// Opts
	pub fn listen(&mut self, listen: impl Into<Box<str>>) -> &mut Self {
		self.opts.listen = listen.into();
		self
	}
	pub fn base_url(&mut self, base_url: impl Into<Box<str>>) -> &mut Self {
		self.opts.base_url = base_url.into();
		self
	}
	pub fn origin_allow_list(
		&mut self,
		origins: impl IntoIterator<Item = impl Into<Box<str>>>,
	) -> &mut Self {
		self.opts.origin_allow_list = origins.into_iter().map(|origin| origin.into()).collect();
		self
	}
	pub fn max_markdown_bytes(&mut self, max: usize) -> &mut Self {
		self.opts.max_markdown_bytes = max;
		self
	}
	pub fn max_html_bytes(&mut self, max: usize) -> &mut Self {
		self.opts.max_html_bytes = max;
		self
	}
	pub fn persistence_debounce_ms(&mut self, ms: u64) -> &mut Self {
		self.opts.persistence_debounce_ms = ms;
		self
	}
	pub fn awareness_timeout_ms(&mut self, ms: u64) -> &mut Self {
		self.opts.awareness_timeout_ms = ms;
		self
	}
	pub fn drain_grace_ms(&mut self, ms: u64) -> &mut Self {
		self.opts.drain_grace_ms = ms;
		self
	}
	pub fn per_connection_update_rate(&mut self, rate: u32) -> &mut Self {
		self.opts.per_connection_update_rate = rate;
		self
	}
	pub fn max_live_documents(&mut self, max: usize) -> &mut Self {
		self.opts.max_live_documents = max;
		self
	}
	pub fn max_replica_bytes(&mut self, max: usize) -> &mut Self {
		self.opts.max_replica_bytes = max;
		self
	}
	pub fn ping_interval_ms(&mut self, ms: u64) -> &mut Self {
		self.opts.ping_interval_ms = ms;
		self
	}
	pub fn shutdown_grace_ms(&mut self, ms: u64) -> &mut Self {
		self.opts.shutdown_grace_ms = ms;
		self
	}
	pub fn share_rate_per_minute(&mut self, rate: u32) -> &mut Self {
		self.opts.share_rate_per_minute = rate;
		self
	}
	pub fn markdown_refresh(&mut self, mode: MarkdownRefresh) -> &mut Self {
		self.opts.markdown_refresh = mode;
		self
	}
	pub fn read_only(&mut self, read_only: bool) -> &mut Self {
		self.opts.read_only = read_only;
		self
	}

	// Adapters
	pub fn store_adapter(&mut self, store: Arc<dyn StoreAdapter>) -> &mut Self {
		self.adapters.store = Some(store);
		self
	}
	pub fn cache_adapter(&mut self, cache: Arc<dyn CacheAdapter>) -> &mut Self {
		self.adapters.cache = Some(cache);
		self
	}

	/// Assemble the application state without binding a listener.
	pub fn build(self) -> ClResult<App> {
		let Some(store) = self.adapters.store else {
			error!("FATAL: No store adapter configured");
			return Err(Error::Internal("No store adapter configured".to_string()));
		};
		let Some(cache) = self.adapters.cache else {
			error!("FATAL: No cache adapter configured");
			return Err(Error::Internal("No cache adapter configured".to_string()));
		};

		let instance_id: Box<str> = uuid::Uuid::new_v4().to_string().into();
		let hub = Hub::new(
			store.clone(),
			cache.clone(),
			HubConfig {
				instance_id: instance_id.clone(),
				persistence_debounce: Duration::from_millis(self.opts.persistence_debounce_ms),
				drain_grace: Duration::from_millis(self.opts.drain_grace_ms),
				awareness_timeout: Duration::from_millis(self.opts.awareness_timeout_ms),
				max_live_documents: self.opts.max_live_documents,
				max_replica_bytes: self.opts.max_replica_bytes,
				peer_queue_len: 256,
				read_only: self.opts.read_only,
				markdown_refresh: self.opts.markdown_refresh,
			},
		);
		let rate_limiter = Arc::new(RateLimitManager::new(self.opts.share_rate_per_minute));

		Ok(Arc::new(AppState {
			opts: self.opts,
			store,
			cache,
			hub,
			rate_limiter,
			instance_id,
			started_at: Instant::now(),
		}))
	}

	pub async fn run(self) -> ClResult<()> {
		info!("mdshare v{}", VERSION);

		let app = self.build()?;
		info!("instance id {}", app.instance_id);

		let router = routes::init(app.clone());
		let listener = tokio::net::TcpListener::bind(app.opts.listen.as_ref()).await?;
		info!("Listening on {}", app.opts.listen);

		axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

		info!("draining live documents");
		app.hub.shutdown(Duration::from_millis(app.opts.shutdown_grace_ms)).await;
		Ok(())
	}
}

impl Default for AppBuilder {
	fn default() -> Self {
		Self::new()
	}
}

async fn shutdown_signal() {
	let _ = tokio::signal::ctrl_c().await;
	info!("shutdown signal received");
}

// vim: ts=4
