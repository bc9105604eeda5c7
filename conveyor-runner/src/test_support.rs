//! Shared fixtures: a small plugin registry served from memory, plus a
//! provider that swaps selected ids for native plugins

use async_trait::async_trait;
use conveyor_core::Result;
use conveyor_core::domain::plugin::PluginMetadata;
use conveyor_lua::{Plugin, SourcePlugin};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::plugin::{MemoryFetcher, PluginLoader, PluginProvider, PluginRegistry};

pub const UPPERCASE: &str = r#"
    local Plugin = {}
    Plugin.__index = Plugin

    function Plugin:initialize(config)
        if config.prefix == nil then
            return nil, "prefix is required", false
        end
        if config.prefix == "boom" then
            error("cannot use boom")
        end
        self.prefix = config.prefix
    end

    function Plugin:execute(input)
        return { text = self.prefix .. string.upper(input.text) }
    end

    return { Plugin = function() return setmetatable({ id = "uppercase" }, Plugin) end }
"#;

pub const SUFFIX: &str = r#"
    local Plugin = {}
    Plugin.__index = Plugin

    function Plugin:initialize(config)
        self.suffix = config.suffix or ""
        self.token = config.secrets and config.secrets.token
    end

    function Plugin:execute(input)
        return { text = input.text .. self.suffix, token = self.token }
    end

    return { Plugin = function() return setmetatable({ id = "suffix" }, Plugin) end }
"#;

pub const WARMING: &str = r#"
    local Plugin = {}
    Plugin.__index = Plugin

    function Plugin:initialize(config)
        self.calls = (self.calls or 0) + 1
        if self.calls < config.after then
            return nil, "warming up", true
        end
    end

    function Plugin:execute(input)
        return { calls = self.calls }
    end

    return { Plugin = function() return setmetatable({ id = "warming" }, Plugin) end }
"#;

pub const FAILING: &str = r#"
    local Plugin = {}
    Plugin.__index = Plugin

    function Plugin:execute(input)
        error("kaput")
    end

    return { Plugin = function() return setmetatable({ id = "failing" }, Plugin) end }
"#;

pub const SILENT: &str = r#"
    local Plugin = {}
    Plugin.__index = Plugin

    function Plugin:execute(input)
        return nil
    end

    return { Plugin = function() return setmetatable({ id = "silent" }, Plugin) end }
"#;

/// Source whose first external job yields a full page and every later one
/// an empty page; job ids encode the cursor they were submitted with
pub const FEED: &str = r#"
    local Source = {}
    Source.__index = Source

    function Source:submit(request)
        if type(request.search) == "table" and request.search.q == "down" then
            error("search backend down")
        end
        return "job-" .. (request.cursor or "start")
    end

    function Source:status(job_id)
        if job_id == "job-slow" then
            return "running"
        end
        if job_id == "job-broken" then
            return { status = "failed", message = "quota exceeded" }
        end
        return "done"
    end

    function Source:results(job_id)
        if job_id == "job-start" then
            return {
                items = {
                    { external_id = "a", payload = { text = "alpha" } },
                    { external_id = "b", payload = { text = "beta" } },
                },
                page_size = 2,
                cursor = "c1",
            }
        end
        return { page_size = 2 }
    end

    function Source:execute(input) return input end

    return { Feed = function() return setmetatable({ id = "feed" }, Source) end }
"#;

const REGISTRY: &str = r#"{
    "plugins": {
        "uppercase": {
            "location": "mem://uppercase/{version}.lua",
            "version": "1.0.0",
            "config_schema": {
                "type": "object",
                "properties": { "prefix": { "type": "string" } }
            },
            "input_schema": {
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            },
            "output_schema": {
                "type": "object",
                "required": ["text"]
            }
        },
        "suffix": {
            "location": "mem://suffix.lua",
            "version": "1.0.0",
            "config_schema": {
                "type": "object",
                "properties": {
                    "secrets": {
                        "type": "object",
                        "properties": { "token": { "type": "string", "minLength": 5 } }
                    }
                }
            }
        },
        "impostor": { "location": "mem://uppercase/1.0.0.lua", "version": "1.0.0" },
        "warming": { "location": "mem://warming.lua", "version": "1.0.0" },
        "failing": { "location": "mem://failing.lua", "version": "1.0.0" },
        "silent": { "location": "mem://silent.lua", "version": "1.0.0" },
        "feed": {
            "location": "mem://feed.lua",
            "version": "1.0.0",
            "kind": "source",
            "export": "Feed"
        },
        "native": { "location": "native://step", "version": "1.0.0" },
        "native-source": {
            "location": "native://source",
            "version": "1.0.0",
            "kind": "source"
        }
    }
}"#;

pub fn registry() -> PluginRegistry {
    PluginRegistry::from_json(REGISTRY).expect("fixture registry parses")
}

pub fn fetcher() -> MemoryFetcher {
    MemoryFetcher::new()
        .with_source("mem://uppercase/1.0.0.lua", UPPERCASE)
        .with_source("mem://uppercase/2.0.0.lua", UPPERCASE)
        .with_source("mem://suffix.lua", SUFFIX)
        .with_source("mem://warming.lua", WARMING)
        .with_source("mem://failing.lua", FAILING)
        .with_source("mem://silent.lua", SILENT)
        .with_source("mem://feed.lua", FEED)
}

type StepFactory = Box<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;
type SourceFactory = Box<dyn Fn() -> Box<dyn SourcePlugin> + Send + Sync>;

/// Serves the Lua fixtures, except for ids bound to a native factory
pub struct NativePlugins {
    loader: PluginLoader,
    steps: HashMap<String, StepFactory>,
    sources: HashMap<String, SourceFactory>,
}

impl NativePlugins {
    pub fn new() -> Self {
        Self {
            loader: PluginLoader::new(registry(), Arc::new(fetcher())),
            steps: HashMap::new(),
            sources: HashMap::new(),
        }
    }

    pub fn with_step(
        mut self,
        id: &str,
        factory: impl Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    ) -> Self {
        self.steps.insert(id.to_string(), Box::new(factory));
        self
    }

    pub fn with_source(
        mut self,
        id: &str,
        factory: impl Fn() -> Box<dyn SourcePlugin> + Send + Sync + 'static,
    ) -> Self {
        self.sources.insert(id.to_string(), Box::new(factory));
        self
    }
}

#[async_trait]
impl PluginProvider for NativePlugins {
    fn metadata(&self, plugin_id: &str) -> Result<&PluginMetadata> {
        self.loader.metadata(plugin_id)
    }

    async fn resolve(
        &self,
        plugin_id: &str,
        version: Option<&str>,
        config: &Value,
    ) -> Result<Box<dyn Plugin>> {
        match self.steps.get(plugin_id) {
            Some(factory) => {
                let plugin = factory();
                plugin.initialize(config).await?;
                Ok(plugin)
            }
            None => self.loader.resolve(plugin_id, version, config).await,
        }
    }

    async fn resolve_source(
        &self,
        plugin_id: &str,
        version: Option<&str>,
        config: &Value,
    ) -> Result<Box<dyn SourcePlugin>> {
        match self.sources.get(plugin_id) {
            Some(factory) => {
                let plugin = factory();
                plugin.initialize(config).await?;
                Ok(plugin)
            }
            None => self.loader.resolve_source(plugin_id, version, config).await,
        }
    }
}
