//! Plugin seams and their Lua implementation
//!
//! The runner only ever sees `Plugin` / `SourcePlugin` trait objects. The
//! Lua implementation holds one sandboxed state plus the instance table the
//! script's constructor returned, and calls methods on it with the instance
//! as `self`.

use async_trait::async_trait;
use conveyor_core::domain::source::{AsyncSourceJobStatus, SourcePage, SourceRequest};
use conveyor_core::{Error, Result};
use mlua::{Function, Lua, LuaSerdeExt, MultiValue, SerializeOptions, Table, Value as LuaValue};
use serde_json::Value;

/// A loaded plugin instance
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Identity the plugin declares for itself
    fn id(&self) -> &str;

    /// Prepares the instance with its (hydrated) configuration
    ///
    /// Fails with `Error::Initialize` when the plugin reports a failure and
    /// with `Error::Configuration` when it raises.
    async fn initialize(&self, config: &Value) -> Result<()>;

    /// Processes one input; `None` means the plugin produced nothing
    async fn execute(&self, input: &Value) -> Result<Option<Value>>;

    /// Releases whatever `initialize` acquired
    async fn shutdown(&self) -> Result<()>;
}

/// Status of an external job as reported by a source
#[derive(Debug, Clone, PartialEq)]
pub struct SourceStatus {
    pub status: AsyncSourceJobStatus,
    pub message: Option<String>,
}

/// A plugin that fronts an external system running asynchronous searches
#[async_trait]
pub trait SourcePlugin: Plugin {
    /// Submits a search and returns the external job id
    async fn submit(&self, request: &SourceRequest) -> Result<String>;

    async fn status(&self, external_job_id: &str) -> Result<SourceStatus>;

    /// Fetches the result page of a finished external job
    async fn results(&self, external_job_id: &str) -> Result<SourcePage>;
}

/// Plugin backed by a Lua instance table
pub struct LuaPlugin {
    id: String,
    lua: Lua,
    instance: Table,
}

impl std::fmt::Debug for LuaPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LuaPlugin")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl LuaPlugin {
    pub(crate) fn new(id: String, lua: Lua, instance: Table) -> Self {
        Self { id, lua, instance }
    }

    /// Whether the instance carries a method with this name
    pub fn has_method(&self, name: &str) -> bool {
        matches!(self.method(name), Ok(Some(_)))
    }

    fn method(&self, name: &str) -> Result<Option<Function>> {
        match self.instance.get::<LuaValue>(name) {
            Ok(LuaValue::Function(f)) => Ok(Some(f)),
            Ok(LuaValue::Nil) => Ok(None),
            Ok(other) => Err(Error::Execution(format!(
                "plugin '{}': '{}' is a {}, expected a function",
                self.id,
                name,
                other.type_name()
            ))),
            Err(e) => Err(Error::Execution(format!(
                "plugin '{}': cannot read '{}': {}",
                self.id, name, e
            ))),
        }
    }

    fn required_method(&self, name: &str) -> Result<Function> {
        self.method(name)?.ok_or_else(|| {
            Error::Execution(format!(
                "plugin '{}' does not implement '{}'",
                self.id, name
            ))
        })
    }

    fn to_lua(&self, value: &Value) -> Result<LuaValue> {
        self.lua.to_value(value).map_err(|e| {
            Error::Execution(format!(
                "plugin '{}': cannot convert value to Lua: {}",
                self.id, e
            ))
        })
    }

    /// Converts a Lua return value to JSON; nil and `json.null` become `None`
    fn from_lua(&self, value: LuaValue) -> Result<Option<Value>> {
        if is_nothing(&value) {
            return Ok(None);
        }
        self.lua.from_value::<Value>(value).map(Some).map_err(|e| {
            Error::Execution(format!(
                "plugin '{}' returned a value that is not JSON: {}",
                self.id, e
            ))
        })
    }

    /// Calls `method(self, arg)` on the instance
    async fn call(&self, name: &str, arg: LuaValue) -> Result<LuaValue> {
        let func = self.required_method(name)?;
        func.call_async::<LuaValue>((self.instance.clone(), arg))
            .await
            .map_err(|e| Error::Execution(format!("plugin '{}' {} failed: {}", self.id, name, e)))
    }
}

fn is_nothing(value: &LuaValue) -> bool {
    match value {
        LuaValue::Nil => true,
        LuaValue::LightUserData(ud) => ud.0.is_null(),
        _ => false,
    }
}

fn describe(value: &LuaValue) -> String {
    match value {
        LuaValue::String(s) => s.to_string_lossy().to_string(),
        LuaValue::Nil => "unknown error".to_string(),
        other => format!("{:?}", other),
    }
}

#[async_trait]
impl Plugin for LuaPlugin {
    fn id(&self) -> &str {
        &self.id
    }

    async fn initialize(&self, config: &Value) -> Result<()> {
        let Some(func) = self.method("initialize")? else {
            return Ok(());
        };
        let config = self.to_lua(config)?;

        let returned: MultiValue = func
            .call_async((self.instance.clone(), config))
            .await
            .map_err(|e| {
                Error::Configuration(format!(
                    "plugin '{}' rejected its configuration: {}",
                    self.id, e
                ))
            })?;

        // `return nil, "message", retryable` reports a failure
        let mut values = returned.into_iter();
        let first = values.next().unwrap_or(LuaValue::Nil);
        let message = values.next().unwrap_or(LuaValue::Nil);
        let failed = matches!(first, LuaValue::Nil | LuaValue::Boolean(false))
            && !matches!(message, LuaValue::Nil);
        if failed {
            let retryable = matches!(values.next(), Some(LuaValue::Boolean(true)));
            return Err(Error::Initialize {
                plugin: self.id.clone(),
                reason: describe(&message),
                retryable,
            });
        }
        Ok(())
    }

    async fn execute(&self, input: &Value) -> Result<Option<Value>> {
        let input = self.to_lua(input)?;
        let output = self.call("execute", input).await?;
        self.from_lua(output)
    }

    async fn shutdown(&self) -> Result<()> {
        let Some(func) = self.method("shutdown")? else {
            return Ok(());
        };
        func.call_async::<()>(self.instance.clone())
            .await
            .map_err(|e| Error::Execution(format!("plugin '{}' shutdown failed: {}", self.id, e)))
    }
}

#[async_trait]
impl SourcePlugin for LuaPlugin {
    async fn submit(&self, request: &SourceRequest) -> Result<String> {
        // An absent cursor must read as nil, not as `json.null`
        let options = SerializeOptions::new().serialize_none_to_null(false);
        let request = self.lua.to_value_with(request, options).map_err(|e| {
            Error::Execution(format!("plugin '{}': cannot convert request: {}", self.id, e))
        })?;
        match self.call("submit", request).await? {
            LuaValue::String(s) => Ok(s.to_string_lossy().to_string()),
            LuaValue::Integer(n) => Ok(n.to_string()),
            other => Err(Error::Execution(format!(
                "plugin '{}' submit returned a {}, expected an external job id",
                self.id,
                other.type_name()
            ))),
        }
    }

    async fn status(&self, external_job_id: &str) -> Result<SourceStatus> {
        let arg = LuaValue::String(self.lua.create_string(external_job_id).map_err(|e| {
            Error::Execution(format!("plugin '{}': {}", self.id, e))
        })?);
        match self.call("status", arg).await? {
            LuaValue::String(s) => Ok(SourceStatus {
                status: AsyncSourceJobStatus::from_external(&s.to_string_lossy().to_string()),
                message: None,
            }),
            LuaValue::Table(t) => {
                let read = |e: mlua::Error| {
                    Error::Execution(format!("plugin '{}' status: {}", self.id, e))
                };
                let status: String = t.get("status").map_err(read)?;
                let message: Option<String> = t.get("message").map_err(read)?;
                Ok(SourceStatus {
                    status: AsyncSourceJobStatus::from_external(&status),
                    message,
                })
            }
            other => Err(Error::Execution(format!(
                "plugin '{}' status returned a {}, expected a string",
                self.id,
                other.type_name()
            ))),
        }
    }

    async fn results(&self, external_job_id: &str) -> Result<SourcePage> {
        let arg = LuaValue::String(self.lua.create_string(external_job_id).map_err(|e| {
            Error::Execution(format!("plugin '{}': {}", self.id, e))
        })?);
        let page = self.call("results", arg).await?;
        if is_nothing(&page) {
            return Err(Error::Execution(format!(
                "plugin '{}' results returned nothing",
                self.id
            )));
        }
        self.lua.from_value::<SourcePage>(page).map_err(|e| {
            Error::Execution(format!(
                "plugin '{}' results returned a malformed page: {}",
                self.id, e
            ))
        })
    }
}
