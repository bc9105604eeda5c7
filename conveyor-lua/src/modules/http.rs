//! HTTP module for plugin code
//!
//! `http.request(options)` performs one outbound request and yields until
//! the response arrives, so it is only usable from code driven through
//! `call_async` (every plugin method is).
//!
//! Options: `url` (required), `method` (default `"GET"`), `headers`
//! (table of strings), `body` (string sent as-is) or `json` (any value,
//! sent as `application/json`). The result is `{ status, body, headers }`.

use crate::module::HostModule;
use mlua::prelude::*;
use reqwest::Method;
use std::collections::HashMap;
use tracing::debug;

pub struct HttpModule {
    client: reqwest::Client,
}

impl HttpModule {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// Request parsed out of the Lua options table before any await point
struct RequestSpec {
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
    body: Option<String>,
    json: Option<serde_json::Value>,
}

impl RequestSpec {
    fn from_table(lua: &Lua, options: LuaTable) -> LuaResult<Self> {
        let url: String = options.get("url").map_err(|_| {
            LuaError::RuntimeError("http.request requires 'url' field".to_string())
        })?;

        let method: String = options
            .get::<Option<String>>("method")?
            .unwrap_or_else(|| "GET".to_string());
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|e| LuaError::RuntimeError(format!("invalid HTTP method: {}", e)))?;

        let mut headers = Vec::new();
        if let Some(table) = options.get::<Option<LuaTable>>("headers")? {
            for pair in table.pairs::<String, String>() {
                headers.push(pair?);
            }
        }

        let body: Option<String> = options.get("body")?;
        let json = match options.get::<LuaValue>("json")? {
            LuaValue::Nil => None,
            value => Some(lua.from_value::<serde_json::Value>(value)?),
        };

        Ok(Self {
            method,
            url,
            headers,
            body,
            json,
        })
    }
}

impl HostModule for HttpModule {
    fn id(&self) -> &'static str {
        "http"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let http_table = lua.create_table()?;

        let client = self.client.clone();
        http_table.set(
            "request",
            lua.create_async_function(move |lua, options: LuaTable| {
                let client = client.clone();
                let spec = RequestSpec::from_table(&lua, options);
                async move {
                    let spec = spec?;
                    debug!("Plugin HTTP request: {} {}", spec.method, spec.url);

                    let mut request = client.request(spec.method, &spec.url);
                    for (name, value) in &spec.headers {
                        request = request.header(name, value);
                    }
                    if let Some(json) = &spec.json {
                        request = request.json(json);
                    } else if let Some(body) = spec.body {
                        request = request.body(body);
                    }

                    let response = request.send().await.map_err(|e| {
                        LuaError::RuntimeError(format!("HTTP request failed: {}", e))
                    })?;

                    let status = response.status().as_u16();
                    let headers: HashMap<String, String> = response
                        .headers()
                        .iter()
                        .filter_map(|(name, value)| {
                            value
                                .to_str()
                                .ok()
                                .map(|v| (name.as_str().to_string(), v.to_string()))
                        })
                        .collect();
                    let body = response.text().await.map_err(|e| {
                        LuaError::RuntimeError(format!("Failed to read HTTP response: {}", e))
                    })?;

                    let result = lua.create_table()?;
                    result.set("status", status)?;
                    result.set("body", body)?;
                    result.set("headers", headers)?;
                    Ok(result)
                }
            })?,
        )?;

        lua.globals().set(self.id(), http_table)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lua_with_http() -> Lua {
        let lua = Lua::new();
        HttpModule::new(reqwest::Client::new())
            .register(&lua)
            .unwrap();
        lua
    }

    #[test]
    fn test_http_module_registration() {
        let lua = lua_with_http();
        let is_fn: bool = lua
            .load("return type(http.request) == 'function'")
            .eval()
            .unwrap();
        assert!(is_fn);
    }

    #[tokio::test]
    async fn test_request_requires_url() {
        let lua = lua_with_http();
        let request: LuaFunction = lua.load("return http.request").eval().unwrap();
        let options = lua.create_table().unwrap();

        let result = request.call_async::<LuaTable>(options).await;
        let err = result.unwrap_err().to_string();
        assert!(err.contains("requires 'url'"), "{}", err);
    }

    #[tokio::test]
    async fn test_request_rejects_bad_url() {
        let lua = lua_with_http();
        let request: LuaFunction = lua.load("return http.request").eval().unwrap();
        let options = lua.create_table().unwrap();
        options.set("url", "not a url").unwrap();

        let result = request.call_async::<LuaTable>(options).await;
        assert!(result.is_err());
    }
}
