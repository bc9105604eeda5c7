//! Lua sandbox creation
//!
//! Plugin code runs with tables, strings, math and coroutines only. There is
//! no filesystem, process or network access, and no way to pull in further
//! code. Host modules are registered by the caller after creation.

use mlua::{Lua, LuaOptions, Result as LuaResult, StdLib};

/// Create a restricted Lua sandbox
///
/// # Security
/// This sandbox prevents:
/// - Network access
/// - File system access
/// - Process execution
/// - Loading external modules via require()
///
/// # Example
/// ```no_run
/// use conveyor_lua::sandbox::create_sandbox;
///
/// let lua = create_sandbox()?;
/// let exports: mlua::Table = lua.load(r#"return { Plugin = function() return { id = "x" } end }"#).eval()?;
/// # Ok::<(), mlua::Error>(())
/// ```
pub fn create_sandbox() -> LuaResult<Lua> {
    // Binary chunks are rejected by safe-mode states. The only bytecode
    // ever loaded is what `PluginFactory` compiled from source itself.
    let lua = unsafe {
        Lua::unsafe_new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::COROUTINE,
            LuaOptions::default(),
        )
    };

    lua.globals().set("require", mlua::Nil)?;
    lua.globals().set("dofile", mlua::Nil)?;
    lua.globals().set("loadfile", mlua::Nil)?;
    lua.globals().set("load", mlua::Nil)?;
    lua.globals().set("collectgarbage", mlua::Nil)?;

    Ok(lua)
}
