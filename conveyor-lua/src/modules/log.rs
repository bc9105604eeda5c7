//! Logging module for plugin code
//!
//! Plugins write through `log.debug/info/warning/error`. Where the lines end
//! up is decided by the `LogSink` the module is built with: the runner
//! forwards them to `tracing`, tests collect them in memory.

use crate::module::HostModule;
use mlua::prelude::*;
use std::sync::{Arc, Mutex};

/// Severity of a plugin log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    const ALL: [LogLevel; 4] = [
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warning,
        LogLevel::Error,
    ];

    fn function_name(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

/// Destination for plugin log lines
///
/// # Thread Safety
/// Implementations must be Send to work with Lua's threading model.
pub trait LogSink: Send + Sync {
    fn write(&mut self, level: LogLevel, message: &str);
}

/// Sink that emits plugin log lines as `tracing` events tagged with the plugin id
pub struct TracingLogSink {
    plugin_id: String,
}

impl TracingLogSink {
    pub fn new(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
        }
    }
}

impl LogSink for TracingLogSink {
    fn write(&mut self, level: LogLevel, message: &str) {
        let plugin = self.plugin_id.as_str();
        match level {
            LogLevel::Debug => tracing::debug!(plugin, "{}", message),
            LogLevel::Info => tracing::info!(plugin, "{}", message),
            LogLevel::Warning => tracing::warn!(plugin, "{}", message),
            LogLevel::Error => tracing::error!(plugin, "{}", message),
        }
    }
}

/// `log` host module, generic over where the lines go
pub struct LogModule<S: LogSink> {
    sink: Arc<Mutex<S>>,
}

impl<S: LogSink> LogModule<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
        }
    }
}

impl<S: LogSink + 'static> HostModule for LogModule<S> {
    fn id(&self) -> &'static str {
        "log"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let log_table = lua.create_table()?;

        for level in LogLevel::ALL {
            let sink = self.sink.clone();
            log_table.set(
                level.function_name(),
                lua.create_function(move |_, msg: String| {
                    sink.lock()
                        .map_err(|e| LuaError::RuntimeError(format!("Failed to lock sink: {}", e)))?
                        .write(level, &msg);
                    Ok(())
                })?,
            )?;
        }

        lua.globals().set(self.id(), log_table)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestLogSink {
        messages: Arc<Mutex<Vec<(LogLevel, String)>>>,
    }

    impl TestLogSink {
        fn new() -> (Self, Arc<Mutex<Vec<(LogLevel, String)>>>) {
            let messages = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    messages: messages.clone(),
                },
                messages,
            )
        }
    }

    impl LogSink for TestLogSink {
        fn write(&mut self, level: LogLevel, message: &str) {
            self.messages
                .lock()
                .unwrap()
                .push((level, message.to_string()));
        }
    }

    #[test]
    fn test_log_module_registration() {
        let (sink, _messages) = TestLogSink::new();
        let lua = Lua::new();
        let module = LogModule::new(sink);

        assert_eq!(module.id(), "log");
        assert!(module.register(&lua).is_ok());

        let result: LuaResult<bool> = lua.load("return type(log.warning) == 'function'").eval();
        assert!(result.unwrap());
    }

    #[test]
    fn test_log_all_levels() {
        let (sink, messages) = TestLogSink::new();
        let lua = Lua::new();
        LogModule::new(sink).register(&lua).unwrap();

        lua.load(
            r#"
            log.debug("debug")
            log.info("info")
            log.warning("warning")
            log.error("error")
        "#,
        )
        .exec()
        .unwrap();

        let logs = messages.lock().unwrap();
        assert_eq!(logs.len(), 4);
        assert_eq!(logs[0], (LogLevel::Debug, "debug".to_string()));
        assert_eq!(logs[1].0, LogLevel::Info);
        assert_eq!(logs[2].0, LogLevel::Warning);
        assert_eq!(logs[3], (LogLevel::Error, "error".to_string()));
    }

    #[test]
    fn test_log_rejects_non_string() {
        let (sink, messages) = TestLogSink::new();
        let lua = Lua::new();
        LogModule::new(sink).register(&lua).unwrap();

        let result = lua.load(r#"log.info({})"#).exec();
        assert!(result.is_err());
        assert!(messages.lock().unwrap().is_empty());
    }
}
