use mlua::prelude::*;

/// A host module exposed to plugin code.
///
/// Each module installs a global table into the sandbox. The identifier
/// returned by `id()` is the global name, so a module with id `"log"` is
/// reachable from Lua as `log.info(...)`.
pub trait HostModule: Send + Sync {
    /// Global name of the module; must be a valid Lua identifier
    fn id(&self) -> &'static str;

    /// Installs the module's functions into the Lua state
    fn register(&self, lua: &Lua) -> LuaResult<()>;
}

/// Ordered set of host modules installed into every plugin sandbox
pub struct ModuleRegistry {
    modules: Vec<Box<dyn HostModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    /// Registers a module
    ///
    /// # Panics
    /// Panics if a module with the same ID is already registered
    pub fn register<M: HostModule + 'static>(&mut self, module: M) {
        let id = module.id();
        if self.modules.iter().any(|m| m.id() == id) {
            panic!("Module with id '{}' is already registered", id);
        }
        self.modules.push(Box::new(module));
    }

    pub fn get(&self, id: &str) -> Option<&dyn HostModule> {
        self.modules
            .iter()
            .find(|m| m.id() == id)
            .map(|m| m.as_ref())
    }

    /// Installs all modules into a Lua state, stopping at the first failure
    pub fn register_all(&self, lua: &Lua) -> LuaResult<()> {
        for module in &self.modules {
            module.register(lua)?;
        }
        Ok(())
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestModule;

    impl HostModule for TestModule {
        fn id(&self) -> &'static str {
            "test"
        }

        fn register(&self, lua: &Lua) -> LuaResult<()> {
            let table = lua.create_table()?;
            table.set("value", 42)?;
            lua.globals().set(self.id(), table)?;
            Ok(())
        }
    }

    #[test]
    fn test_module_registration() {
        let mut registry = ModuleRegistry::new();
        registry.register(TestModule);

        assert!(registry.get("test").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn test_duplicate_registration() {
        let mut registry = ModuleRegistry::new();
        registry.register(TestModule);
        registry.register(TestModule);
    }

    #[test]
    fn test_register_all_installs_globals() {
        let mut registry = ModuleRegistry::new();
        registry.register(TestModule);

        let lua = Lua::new();
        registry.register_all(&lua).unwrap();

        let value: i32 = lua.load("return test.value").eval().unwrap();
        assert_eq!(value, 42);
    }
}
