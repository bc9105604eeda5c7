//! Host modules available to plugin code
//!
//! - `log`: forwards plugin log lines to a `LogSink` (tracing in production)
//! - `json`: encode/decode helpers and the `json.null` sentinel
//! - `http`: outbound HTTP requests, for sources talking to external APIs

pub mod http;
pub mod json;
pub mod log;

pub use http::HttpModule;
pub use json::JsonModule;
pub use log::{LogLevel, LogModule, LogSink, TracingLogSink};
