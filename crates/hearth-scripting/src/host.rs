use std::sync::OnceLock;

use mlua::{Lua, Table, Value};

use crate::bridge::{self, LuaEntityId};
use crate::component::LuaScript;
use crate::lua_err;
use crate::runtime::RuntimeShared;

/// The script-side entity layer, preloaded as the `hearth` module.
const PRELUDE: &str = include_str!("../lua/hearth.lua");

static LUA: OnceLock<Lua> = OnceLock::new();

/// Handle to the process-wide interpreter.
///
/// The first call creates the instance and registers the `hearth` and
/// `hearth.native` module loaders; every later call — from this or any other
/// manager — observes the already-initialized singleton and registers
/// nothing. There is deliberately no teardown path: the embedded runtime
/// does not support safe finalization and restart within a process.
pub fn lua() -> anyhow::Result<&'static Lua> {
    if let Some(lua) = LUA.get() {
        return Ok(lua);
    }
    let lua = Lua::new();
    register_modules(&lua)?;
    Ok(LUA.get_or_init(|| lua))
}

/// Raw pointer to the live manager state, stored in Lua app data.
///
/// Safety: set by `ScriptRuntime::configure`, cleared by its `Drop`. Only
/// dereferenced on the driving thread during a synchronous script call while
/// the owning manager is alive.
pub(crate) struct ScriptContext {
    pub(crate) shared: *const RuntimeShared,
}

unsafe impl Send for ScriptContext {}
unsafe impl Sync for ScriptContext {}

/// Run `f` against the manager state exposed to the interpreter.
pub(crate) fn with_shared<R>(
    lua: &Lua,
    f: impl FnOnce(&RuntimeShared) -> mlua::Result<R>,
) -> mlua::Result<R> {
    let cx = lua
        .app_data_ref::<ScriptContext>()
        .ok_or_else(|| mlua::Error::runtime("hearth runtime is not configured"))?;
    let shared = unsafe { &*cx.shared };
    f(shared)
}

fn register_modules(lua: &Lua) -> anyhow::Result<()> {
    let preload: Table = lua
        .globals()
        .get::<Table>("package")
        .map_err(lua_err)?
        .get("preload")
        .map_err(lua_err)?;

    let native = lua
        .create_function(|lua, _name: String| native_module(lua))
        .map_err(lua_err)?;
    preload.set("hearth.native", native).map_err(lua_err)?;

    let prelude = lua
        .load(PRELUDE)
        .set_name("@hearth/hearth.lua")
        .into_function()
        .map_err(lua_err)?;
    preload.set("hearth", prelude).map_err(lua_err)?;

    Ok(())
}

/// Build the `hearth.native` table: the native services exposed to scripts.
fn native_module(lua: &Lua) -> mlua::Result<Table> {
    let native = lua.create_table()?;

    // native.spawn(object) -> id
    // Create a native entity, attach a component wrapping `object`, and
    // return its identifier.
    native.set(
        "spawn",
        lua.create_function(|lua, object: Table| {
            let key = lua.create_registry_value(&object)?;
            with_shared(lua, move |shared| {
                let entity = shared.store.create();
                shared
                    .store
                    .attach(entity, LuaScript::from_object(key))
                    .map_err(mlua::Error::external)?;
                Ok(LuaEntityId(shared.store.id_of(entity)))
            })
        })?,
    )?;

    // native.attach(id, object)
    // Attach a component wrapping `object` to an existing entity.
    native.set(
        "attach",
        lua.create_function(|lua, (target, object): (Value, Table)| {
            let entity = bridge::entity_from_value(&target).map_err(mlua::Error::external)?;
            let key = lua.create_registry_value(&object)?;
            with_shared(lua, move |shared| {
                shared
                    .store
                    .attach(entity, LuaScript::from_object(key))
                    .map_err(mlua::Error::external)
            })
        })?,
    )?;

    // native.destroy(id_or_entity)
    native.set(
        "destroy",
        lua.create_function(|lua, target: Value| {
            let entity = bridge::entity_from_value(&target).map_err(mlua::Error::external)?;
            with_shared(lua, |shared| {
                shared.store.destroy(entity).map_err(mlua::Error::external)
            })
        })?,
    )?;

    // native.emit(name, payload)
    // Forward to the native event bus through the registered constructor.
    native.set(
        "emit",
        lua.create_function(|lua, (name, payload): (String, Value)| {
            with_shared(lua, |shared| {
                let emitter = shared.emitters.borrow().get(&name).cloned();
                let Some(emitter) = emitter else {
                    return Err(mlua::Error::runtime(format!(
                        "no event named `{name}` is registered for script emission"
                    )));
                };
                let bus = shared
                    .bus
                    .borrow()
                    .clone()
                    .ok_or_else(|| mlua::Error::runtime("hearth runtime is not configured"))?;
                emitter(lua, payload, &bus).map_err(mlua::Error::external)
            })
        })?,
    )?;

    Ok(native)
}
