//! Compiles plugin scripts once and instantiates them per call
//!
//! A factory is what the runner caches: stripped bytecode of the script
//! plus the name of the constructor export, validated at compile time.
//! Every `instantiate` gets its own sandbox, so instances never share
//! Lua state.

use crate::module::ModuleRegistry;
use crate::modules::{HttpModule, JsonModule, LogModule, TracingLogSink};
use crate::plugin::LuaPlugin;
use crate::sandbox::create_sandbox;
use conveyor_core::{Error, Result};
use mlua::{ChunkMode, Function, Lua, Table, Value as LuaValue};

/// Loadable constructor for one plugin
#[derive(Clone)]
pub struct PluginFactory {
    plugin_id: String,
    export: String,
    bytecode: Vec<u8>,
    http: reqwest::Client,
}

impl std::fmt::Debug for PluginFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginFactory")
            .field("plugin_id", &self.plugin_id)
            .field("export", &self.export)
            .field("bytecode_len", &self.bytecode.len())
            .finish()
    }
}

impl PluginFactory {
    /// Compiles `source` and checks that it exports a constructor named `export`
    ///
    /// # Errors
    /// `Error::Register` when the script does not compile, fails while
    /// evaluating its top level, or does not export a function under `export`.
    pub fn compile(plugin_id: &str, export: &str, source: &str) -> Result<Self> {
        let http = reqwest::Client::new();
        let lua = plugin_sandbox(plugin_id, &http).map_err(|e| Error::register(plugin_id, e))?;

        let chunk = lua
            .load(source)
            .set_name(format!("={}", plugin_id))
            .into_function()
            .map_err(|e| Error::register(plugin_id, e))?;
        let bytecode = chunk.dump(true);

        let exports = evaluate_exports(plugin_id, &chunk)?;
        constructor(plugin_id, &exports, export)?;

        Ok(Self {
            plugin_id: plugin_id.to_string(),
            export: export.to_string(),
            bytecode,
            http,
        })
    }

    /// Shares an HTTP client with the `http` host module of every instance
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn export(&self) -> &str {
        &self.export
    }

    /// Creates a fresh instance in its own sandbox
    ///
    /// The instance's declared `id` is returned as-is; checking it against
    /// the id the plugin was requested under is up to the caller.
    pub fn instantiate(&self) -> Result<LuaPlugin> {
        let id = self.plugin_id.as_str();
        let lua = plugin_sandbox(id, &self.http).map_err(|e| Error::register(id, e))?;

        let chunk = lua
            .load(self.bytecode.as_slice())
            .set_name(format!("={}", id))
            .set_mode(ChunkMode::Binary)
            .into_function()
            .map_err(|e| Error::register(id, e))?;
        let exports = evaluate_exports(id, &chunk)?;
        let ctor = constructor(id, &exports, &self.export)?;

        let instance: Table = ctor.call(()).map_err(|e| {
            Error::register(id, format!("constructor '{}' failed: {}", self.export, e))
        })?;
        let declared: Option<String> = instance
            .get("id")
            .map_err(|e| Error::register(id, format!("instance 'id' is not a string: {}", e)))?;
        let declared =
            declared.ok_or_else(|| Error::register(id, "instance has no 'id' field"))?;

        Ok(LuaPlugin::new(declared, lua, instance))
    }
}

/// Sandbox with the host modules every plugin sees
fn plugin_sandbox(plugin_id: &str, http: &reqwest::Client) -> mlua::Result<Lua> {
    let lua = create_sandbox()?;

    let mut modules = ModuleRegistry::new();
    modules.register(LogModule::new(TracingLogSink::new(plugin_id)));
    modules.register(JsonModule);
    modules.register(HttpModule::new(http.clone()));
    modules.register_all(&lua)?;

    Ok(lua)
}

fn evaluate_exports(plugin_id: &str, chunk: &Function) -> Result<Table> {
    match chunk.call::<LuaValue>(()) {
        Ok(LuaValue::Table(exports)) => Ok(exports),
        Ok(other) => Err(Error::register(
            plugin_id,
            format!("script returned a {}, expected a table of exports", other.type_name()),
        )),
        Err(e) => Err(Error::register(plugin_id, e)),
    }
}

fn constructor(plugin_id: &str, exports: &Table, export: &str) -> Result<Function> {
    match exports.get::<LuaValue>(export) {
        Ok(LuaValue::Function(f)) => Ok(f),
        Ok(LuaValue::Nil) => Err(Error::register(
            plugin_id,
            format!("script does not export '{}'", export),
        )),
        Ok(other) => Err(Error::register(
            plugin_id,
            format!(
                "export '{}' is a {}, expected a constructor function",
                export,
                other.type_name()
            ),
        )),
        Err(e) => Err(Error::register(plugin_id, e)),
    }
}
