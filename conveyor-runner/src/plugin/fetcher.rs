//! Fetching plugin sources from their locations

use async_trait::async_trait;
use conveyor_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Where plugin sources come from
#[async_trait]
pub trait PluginFetcher: Send + Sync {
    /// Lightweight existence check; a missing plugin is a load error
    async fn probe(&self, plugin_id: &str, location: &str) -> Result<()>;

    /// Downloads the plugin source
    async fn fetch(&self, plugin_id: &str, location: &str) -> Result<String>;
}

/// Fetches `http(s)://` locations with reqwest and reads `file://` ones from disk
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PluginFetcher for HttpFetcher {
    async fn probe(&self, plugin_id: &str, location: &str) -> Result<()> {
        if let Some(path) = location.strip_prefix("file://") {
            return match tokio::fs::metadata(path).await {
                Ok(meta) if meta.is_file() => Ok(()),
                Ok(_) => Err(Error::load(plugin_id, format!("{} is not a file", location))),
                Err(e) => Err(Error::load(plugin_id, format!("{}: {}", location, e))),
            };
        }

        debug!(plugin = plugin_id, location, "Probing plugin location");
        let response = self
            .client
            .head(location)
            .send()
            .await
            .map_err(|e| Error::load(plugin_id, format!("probe of {} failed: {}", location, e)))?;

        if !response.status().is_success() {
            return Err(Error::load(
                plugin_id,
                format!("{} answered {}", location, response.status()),
            ));
        }
        Ok(())
    }

    async fn fetch(&self, plugin_id: &str, location: &str) -> Result<String> {
        if let Some(path) = location.strip_prefix("file://") {
            return tokio::fs::read_to_string(path)
                .await
                .map_err(|e| Error::load(plugin_id, format!("{}: {}", location, e)));
        }

        debug!(plugin = plugin_id, location, "Fetching plugin source");
        let response = self
            .client
            .get(location)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::load(plugin_id, format!("fetch of {} failed: {}", location, e)))?;

        response
            .text()
            .await
            .map_err(|e| Error::load(plugin_id, format!("cannot read {}: {}", location, e)))
    }
}

/// Serves sources from memory and counts calls
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    sources: Mutex<HashMap<String, String>>,
    probes: AtomicUsize,
    fetches: AtomicUsize,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(self, location: &str, source: &str) -> Self {
        self.insert(location, source);
        self
    }

    pub fn insert(&self, location: &str, source: &str) {
        if let Ok(mut sources) = self.sources.lock() {
            sources.insert(location.to_string(), source.to_string());
        }
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn lookup(&self, plugin_id: &str, location: &str) -> Result<String> {
        self.sources
            .lock()
            .map_err(|e| Error::load(plugin_id, e))?
            .get(location)
            .cloned()
            .ok_or_else(|| Error::load(plugin_id, format!("nothing at {}", location)))
    }
}

#[async_trait]
impl PluginFetcher for MemoryFetcher {
    async fn probe(&self, plugin_id: &str, location: &str) -> Result<()> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.lookup(plugin_id, location).map(|_| ())
    }

    async fn fetch(&self, plugin_id: &str, location: &str) -> Result<String> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.lookup(plugin_id, location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_location() {
        let path = std::env::temp_dir().join(format!("conveyor-fetch-{}.lua", std::process::id()));
        std::fs::write(&path, "return {}").unwrap();
        let location = format!("file://{}", path.display());

        let fetcher = HttpFetcher::default();
        fetcher.probe("p", &location).await.unwrap();
        assert_eq!(fetcher.fetch("p", &location).await.unwrap(), "return {}");

        std::fs::remove_file(&path).unwrap();
        assert!(matches!(
            fetcher.probe("p", &location).await,
            Err(Error::Load { .. })
        ));
    }

    #[tokio::test]
    async fn test_memory_fetcher_counts_calls() {
        let fetcher = MemoryFetcher::new().with_source("mem://a", "return {}");

        fetcher.probe("a", "mem://a").await.unwrap();
        assert!(fetcher.probe("b", "mem://b").await.is_err());
        fetcher.fetch("a", "mem://a").await.unwrap();

        assert_eq!(fetcher.probes(), 2);
        assert_eq!(fetcher.fetches(), 1);
    }
}
