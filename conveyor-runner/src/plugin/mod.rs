//! Plugin resolution: registry, source fetching and the constructor cache

mod fetcher;
mod loader;
mod registry;

pub use fetcher::{HttpFetcher, MemoryFetcher, PluginFetcher};
pub use loader::PluginLoader;
pub use registry::PluginRegistry;

use async_trait::async_trait;
use conveyor_core::Result;
use conveyor_core::domain::plugin::PluginMetadata;
use conveyor_lua::{Plugin, SourcePlugin};
use serde_json::Value;

/// Resolves plugin ids to initialized instances
#[async_trait]
pub trait PluginProvider: Send + Sync {
    /// Registry entry of a plugin; unregistered ids are load errors
    fn metadata(&self, plugin_id: &str) -> Result<&PluginMetadata>;

    /// A fresh instance, already initialized with `config`
    async fn resolve(
        &self,
        plugin_id: &str,
        version: Option<&str>,
        config: &Value,
    ) -> Result<Box<dyn Plugin>>;

    /// Like `resolve`, for plugins registered as sources
    async fn resolve_source(
        &self,
        plugin_id: &str,
        version: Option<&str>,
        config: &Value,
    ) -> Result<Box<dyn SourcePlugin>>;
}
