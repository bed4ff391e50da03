use anyhow::bail;
use hearth_ecs::{EntityId, EntityStore};
use hecs::Entity;
use mlua::{Lua, MetaMethod, Table, UserData, UserDataFields, UserDataMethods, Value};

use crate::component::LuaScript;
use crate::lua_err;

/// Script-facing entity identifier userdata.
///
/// Read-only `id`, `index`, and `version` fields; prints as
/// `<Entity::Id INDEX.VERSION>`.
#[derive(Clone, Copy)]
pub struct LuaEntityId(pub EntityId);

impl UserData for LuaEntityId {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("id", |_, this| Ok(this.0.id()));
        fields.add_field_method_get("index", |_, this| Ok(this.0.index()));
        fields.add_field_method_get("version", |_, this| Ok(this.0.version()));
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| Ok(this.0.to_string()));
        methods.add_meta_method(MetaMethod::Eq, |_, this, other: mlua::AnyUserData| {
            Ok(matches!(other.borrow::<LuaEntityId>(), Ok(id) if id.0 == this.0))
        });
    }
}

/// Interpret a script value as a native entity handle.
///
/// Any value carrying the native-backed-entity capability is accepted: an
/// `EntityId` userdata, or a table whose `_id` field is one — which is what
/// every script-side `Entity` instance looks like. This is the script→native
/// half of the identity bridge.
pub fn entity_from_value(value: &Value) -> anyhow::Result<Entity> {
    match value {
        Value::UserData(ud) => match ud.borrow::<LuaEntityId>() {
            Ok(id) => Ok(id.0.entity()),
            Err(_) => bail!("userdata is not an entity id"),
        },
        Value::Table(table) => {
            let id: Value = table.get("_id").map_err(lua_err)?;
            match id {
                Value::UserData(ud) => match ud.borrow::<LuaEntityId>() {
                    Ok(id) => Ok(id.0.entity()),
                    Err(_) => bail!("entity `_id` field is not an entity id"),
                },
                _ => bail!("table does not carry a native entity id"),
            }
        }
        other => bail!(
            "expected an entity or entity id, got {}",
            other.type_name()
        ),
    }
}

/// Resolve the live script object for `entity`.
///
/// This is the native→script half of the identity bridge: the returned
/// object is the one whose `_id` round-trips to `entity`.
///
/// # Panics
///
/// Panics if the entity has no materialized script component. Converting a
/// handle before materialization is a bridge usage error, not a recoverable
/// runtime condition.
pub fn script_object(lua: &Lua, store: &EntityStore, entity: Entity) -> anyhow::Result<Table> {
    match try_script_object(lua, store, entity)? {
        Some(object) => Ok(object),
        None => panic!("entity {entity:?} has no materialized script component"),
    }
}

/// Non-panicking lookup for dispatch paths that tolerate absence.
pub fn try_script_object(
    lua: &Lua,
    store: &EntityStore,
    entity: Entity,
) -> anyhow::Result<Option<Table>> {
    let world = store.world();
    let Ok(script) = world.get::<&LuaScript>(entity) else {
        return Ok(None);
    };
    let Some(key) = script.object.as_ref() else {
        return Ok(None);
    };
    let object: Table = lua.registry_value(key).map_err(lua_err)?;
    Ok(Some(object))
}
