//! Plugin loader and constructor cache
//!
//! The cache holds compiled constructors (`PluginFactory`), never
//! instances: configuration differs per call, so every resolve builds a
//! fresh instance and initializes it. Entries are keyed by plugin id plus
//! resolved location, so a version bump is a different entry.

use async_trait::async_trait;
use conveyor_core::domain::plugin::{PluginKind, PluginMetadata};
use conveyor_core::{Error, Result};
use conveyor_lua::{LuaPlugin, Plugin, PluginFactory, SourcePlugin};
use moka::future::Cache;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::fetcher::PluginFetcher;
use super::registry::PluginRegistry;
use super::PluginProvider;
use crate::retry::with_backoff;

const DEFAULT_CACHE_CAPACITY: u64 = 50;
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30 * 60);
const INIT_RETRIES: u32 = 2;
const INIT_BACKOFF: Duration = Duration::from_millis(100);

pub struct PluginLoader {
    registry: PluginRegistry,
    fetcher: Arc<dyn PluginFetcher>,
    cache: Cache<String, Arc<PluginFactory>>,
    http: reqwest::Client,
    init_retries: u32,
    init_backoff: Duration,
}

impl PluginLoader {
    pub fn new(registry: PluginRegistry, fetcher: Arc<dyn PluginFetcher>) -> Self {
        Self {
            registry,
            fetcher,
            cache: build_cache(DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL),
            http: reqwest::Client::new(),
            init_retries: INIT_RETRIES,
            init_backoff: INIT_BACKOFF,
        }
    }

    pub fn with_cache(mut self, capacity: u64, ttl: Duration) -> Self {
        self.cache = build_cache(capacity, ttl);
        self
    }

    pub fn with_init_retry(mut self, retries: u32, base: Duration) -> Self {
        self.init_retries = retries;
        self.init_backoff = base;
        self
    }

    /// HTTP client handed to the `http` host module of every instance
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Compiled constructor for a plugin, from cache or freshly loaded
    ///
    /// Concurrent misses on the same key share one load. Unregistered ids
    /// fail before anything is fetched.
    pub async fn factory(&self, plugin_id: &str, version: Option<&str>) -> Result<Arc<PluginFactory>> {
        let meta = self.registry.require(plugin_id)?;
        let location = meta.resolve_location(plugin_id, version);
        let key = format!("{}@{}", plugin_id, location);

        self.cache
            .try_get_with(key, self.load(plugin_id, meta, &location))
            .await
            .map_err(Arc::unwrap_or_clone)
    }

    async fn load(
        &self,
        plugin_id: &str,
        meta: &PluginMetadata,
        location: &str,
    ) -> Result<Arc<PluginFactory>> {
        debug!(plugin = plugin_id, location, "Plugin not cached, loading");

        self.fetcher.probe(plugin_id, location).await?;
        let source = self.fetcher.fetch(plugin_id, location).await?;
        let factory =
            PluginFactory::compile(plugin_id, &meta.export, &source)?.with_http_client(self.http.clone());

        info!(plugin = plugin_id, location, export = %meta.export, "Plugin loaded");
        Ok(Arc::new(factory))
    }

    async fn instantiate(
        &self,
        plugin_id: &str,
        version: Option<&str>,
        config: &Value,
    ) -> Result<LuaPlugin> {
        let factory = self.factory(plugin_id, version).await?;
        let plugin = factory.instantiate()?;

        if plugin.id() != plugin_id {
            return Err(Error::register(
                plugin_id,
                format!("instance declares itself as '{}'", plugin.id()),
            ));
        }

        with_backoff(
            self.init_retries,
            self.init_backoff,
            || plugin.initialize(config),
            Error::is_retryable,
        )
        .await?;

        Ok(plugin)
    }
}

fn build_cache(capacity: u64, ttl: Duration) -> Cache<String, Arc<PluginFactory>> {
    Cache::builder()
        .max_capacity(capacity)
        .time_to_live(ttl)
        .build()
}

#[async_trait]
impl PluginProvider for PluginLoader {
    fn metadata(&self, plugin_id: &str) -> Result<&PluginMetadata> {
        self.registry.require(plugin_id)
    }

    async fn resolve(
        &self,
        plugin_id: &str,
        version: Option<&str>,
        config: &Value,
    ) -> Result<Box<dyn Plugin>> {
        let plugin = self.instantiate(plugin_id, version, config).await?;
        Ok(Box::new(plugin))
    }

    async fn resolve_source(
        &self,
        plugin_id: &str,
        version: Option<&str>,
        config: &Value,
    ) -> Result<Box<dyn SourcePlugin>> {
        if self.registry.require(plugin_id)?.kind != PluginKind::Source {
            return Err(Error::Configuration(format!(
                "plugin '{}' is not registered as a source",
                plugin_id
            )));
        }
        let plugin = self.instantiate(plugin_id, version, config).await?;
        Ok(Box::new(plugin))
    }
}
