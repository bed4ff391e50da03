use mlua::RegistryKey;

/// Per-entity script behavior.
///
/// The component starts in one of two states and makes exactly one
/// transition:
///
/// - declared natively with a module name, class name, and deferred
///   constructor arguments, and no object yet — the manager materializes it
///   when the component-added notification fires;
/// - created around an existing script object (an entity constructed from
///   script code), in which case it is born materialized.
///
/// Once `object` is set the constructor metadata is inert and never reused.
/// Dropping the component releases the registry slot; reclaiming the script
/// object itself is the interpreter's business.
pub struct LuaScript {
    pub(crate) object: Option<RegistryKey>,
    pub(crate) module: String,
    pub(crate) class: String,
    pub(crate) args: Vec<serde_json::Value>,
}

impl LuaScript {
    /// Declare a script component to be constructed from `module`.`class`.
    pub fn new(module: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            object: None,
            module: module.into(),
            class: class.into(),
            args: Vec::new(),
        }
    }

    /// Append a deferred constructor argument, passed positionally to the
    /// class factory after the entity id.
    pub fn arg(mut self, value: impl Into<serde_json::Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Wrap an already-live script object.
    pub fn from_object(key: RegistryKey) -> Self {
        Self {
            object: Some(key),
            module: String::new(),
            class: String::new(),
            args: Vec::new(),
        }
    }

    pub fn is_materialized(&self) -> bool {
        self.object.is_some()
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn args(&self) -> &[serde_json::Value] {
        &self.args
    }
}
