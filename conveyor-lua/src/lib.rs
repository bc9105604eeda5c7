//! Conveyor Lua plugin runtime
//!
//! Plugins are Lua 5.4 scripts. This crate provides:
//! - A restricted sandbox every plugin instance runs in
//! - Host modules (`log`, `json`, `http`) exposed to plugin code
//! - The `Plugin` / `SourcePlugin` seams the runner drives
//! - A factory that compiles a script once and instantiates it per call

pub mod factory;
pub mod module;
pub mod modules;
pub mod plugin;
pub mod sandbox;

pub use factory::PluginFactory;
pub use module::{HostModule, ModuleRegistry};
pub use modules::{HttpModule, JsonModule, LogLevel, LogModule, LogSink, TracingLogSink};
pub use plugin::{LuaPlugin, Plugin, SourcePlugin, SourceStatus};
pub use sandbox::create_sandbox;
