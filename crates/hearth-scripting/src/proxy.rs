use std::cell::RefCell;
use std::marker::PhantomData;

use hearth_ecs::EntityStore;
use hecs::Entity;
use mlua::{Function, Lua, LuaSerdeExt, Table, Value};
use serde::Serialize;

use crate::bridge;
use crate::lua_err;

/// Everything a proxy needs to reach script objects during delivery.
pub struct DispatchContext<'a> {
    pub lua: &'a Lua,
    pub store: &'a EntityStore,
}

/// Ordered entity back-references held by a proxy.
///
/// Pure dispatch list: entries are plain handles, never owning anything, so
/// removal is deregistration and nothing more. The manager enforces the call
/// discipline (one add per admitted entity, one delete on destruction); no
/// de-duplication happens here.
#[derive(Default)]
pub struct Receivers {
    entities: RefCell<Vec<Entity>>,
}

impl Receivers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, entity: Entity) {
        self.entities.borrow_mut().push(entity);
    }

    /// Remove the first structurally equal entry; no-op if absent.
    pub fn remove(&self, entity: Entity) {
        let mut entities = self.entities.borrow_mut();
        if let Some(position) = entities.iter().position(|e| *e == entity) {
            entities.remove(position);
        }
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.entities.borrow().contains(&entity)
    }

    /// Copy of the current list, stable across mid-dispatch mutation.
    pub fn snapshot(&self) -> Vec<Entity> {
        self.entities.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.entities.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.borrow().is_empty()
    }
}

/// Decides which entities may receive a given native event type.
///
/// Admission is capability-based: the default predicate asks only whether
/// the script object exposes an attribute named after the handler, wherever
/// in its class chain that attribute lives. No type-based filtering happens
/// here.
pub trait EventProxy {
    fn handler_name(&self) -> &str;

    fn receivers(&self) -> &Receivers;

    /// Can this event be sent to the provided script object?
    fn can_receive(&self, object: &Table) -> bool {
        matches!(object.get::<Value>(self.handler_name()), Ok(value) if !value.is_nil())
    }
}

/// Typed delivery half of a proxy.
pub trait ProxyReceive<E>: EventProxy {
    fn receive(&self, cx: &DispatchContext<'_>, event: &E) -> anyhow::Result<()>;
}

/// Delivers events of type `E` to every registered entity, unconditionally.
pub struct BroadcastEventProxy<E> {
    handler_name: String,
    receivers: Receivers,
    _marker: PhantomData<fn(E)>,
}

impl<E> BroadcastEventProxy<E> {
    pub fn new(handler_name: impl Into<String>) -> Self {
        Self {
            handler_name: handler_name.into(),
            receivers: Receivers::new(),
            _marker: PhantomData,
        }
    }
}

impl<E> EventProxy for BroadcastEventProxy<E> {
    fn handler_name(&self) -> &str {
        &self.handler_name
    }

    fn receivers(&self) -> &Receivers {
        &self.receivers
    }
}

impl<E: Serialize + 'static> ProxyReceive<E> for BroadcastEventProxy<E> {
    fn receive(&self, cx: &DispatchContext<'_>, event: &E) -> anyhow::Result<()> {
        let payload = cx.lua.to_value(event).map_err(lua_err)?;
        for entity in self.receivers.snapshot() {
            // An earlier handler in this dispatch may have destroyed the
            // entity; skip it rather than deliver to a stale object.
            let Some(object) = bridge::try_script_object(cx.lua, cx.store, entity)? else {
                continue;
            };
            let handler: Function = object.get(self.handler_name()).map_err(lua_err)?;
            handler
                .call::<()>((object, payload.clone()))
                .map_err(lua_err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entities(n: usize) -> Vec<Entity> {
        let mut world = hecs::World::new();
        (0..n).map(|_| world.spawn(())).collect()
    }

    #[test]
    fn test_receivers_remove_first_match_only() {
        let receivers = Receivers::new();
        let e = entities(2);
        receivers.add(e[0]);
        receivers.add(e[1]);
        receivers.add(e[0]);

        receivers.remove(e[0]);
        assert_eq!(receivers.snapshot(), vec![e[1], e[0]]);

        receivers.remove(e[0]);
        assert_eq!(receivers.snapshot(), vec![e[1]]);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let receivers = Receivers::new();
        let e = entities(2);
        receivers.add(e[0]);
        receivers.remove(e[1]);
        assert_eq!(receivers.len(), 1);
        assert!(receivers.contains(e[0]));
    }
}
