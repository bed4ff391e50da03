use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{bail, Context as _};
use hearth_ecs::{ComponentAdded, EntityDestroyed, EntityId, EntityStore};
use hearth_events::EventBus;
use hecs::Entity;
use mlua::{Function, Lua, LuaSerdeExt, Table, Value, Variadic};
use serde::Serialize;
use tracing::{debug, error};

use crate::bridge::{self, LuaEntityId};
use crate::component::LuaScript;
use crate::host::{self, ScriptContext};
use crate::lua_err;
use crate::proxy::{BroadcastEventProxy, DispatchContext, EventProxy, ProxyReceive};
use crate::redirect::{self, InstalledStreams, LogSink};

type EmitterFn = Rc<dyn Fn(&Lua, Value, &EventBus) -> anyhow::Result<()>>;

/// State shared between the manager, its bus subscriptions, and the native
/// bindings reached through the interpreter's app-data context.
pub(crate) struct RuntimeShared {
    pub(crate) store: Rc<EntityStore>,
    pub(crate) bus: RefCell<Option<Rc<EventBus>>>,
    pub(crate) proxies: RefCell<Vec<Rc<dyn EventProxy>>>,
    pub(crate) emitters: RefCell<HashMap<String, EmitterFn>>,
    stdout_sink: RefCell<LogSink>,
    stderr_sink: RefCell<LogSink>,
}

impl RuntimeShared {
    /// Print a failure through the diagnostic channel before it propagates.
    fn report(&self, err: anyhow::Error) -> anyhow::Error {
        let sink = self.stderr_sink.borrow().clone();
        for line in format!("{err:#}").lines() {
            sink(line);
        }
        err
    }
}

/// Bridges the native entity store and event bus to behavior implemented in
/// embedded Lua.
///
/// The manager owns no interpreter of its own: every instance attaches to
/// the one process-wide runtime (see [`crate::host`]). What it does own is
/// the per-instance configuration — search paths, log sinks, event proxies,
/// script-emittable event constructors — plus the bus subscriptions that
/// drive lazy materialization and receiver purging.
pub struct ScriptRuntime {
    lua: &'static Lua,
    shared: Rc<RuntimeShared>,
    paths: Vec<PathBuf>,
    streams: Option<InstalledStreams>,
}

impl ScriptRuntime {
    /// Attach to the process-wide interpreter, initializing it (and
    /// registering the native modules) if this is the first manager in the
    /// process.
    pub fn new(store: Rc<EntityStore>) -> anyhow::Result<Self> {
        let lua = host::lua()?;
        Ok(Self {
            lua,
            shared: Rc::new(RuntimeShared {
                store,
                bus: RefCell::new(None),
                proxies: RefCell::new(Vec::new()),
                emitters: RefCell::new(HashMap::new()),
                stdout_sink: RefCell::new(redirect::stdout_sink()),
                stderr_sink: RefCell::new(redirect::stderr_sink()),
            }),
            paths: Vec::new(),
            streams: None,
        })
    }

    /// Access the underlying interpreter.
    pub fn lua(&self) -> &Lua {
        self.lua
    }

    /// Queue a module search path. Takes effect at [`ScriptRuntime::configure`].
    pub fn add_path(&mut self, path: impl Into<PathBuf>) {
        self.paths.push(path.into());
    }

    /// Queue a sequence of module search paths.
    pub fn add_paths<I, P>(&mut self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        for path in paths {
            self.add_path(path);
        }
    }

    /// Queue the crate's bundled script directory.
    pub fn add_default_path(&mut self) {
        self.add_path(concat!(env!("CARGO_MANIFEST_DIR"), "/lua"));
    }

    /// The search paths the manager is configured with.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Replace the line sinks used when the redirectors are next installed.
    pub fn log_to(&self, stdout: LogSink, stderr: LogSink) {
        *self.shared.stdout_sink.borrow_mut() = stdout;
        *self.shared.stderr_sink.borrow_mut() = stderr;
    }

    /// Wire the manager into the event bus and the interpreter: subscribe to
    /// the entity-destroyed and component-added notifications, install the
    /// output redirectors, front-insert the queued search paths, and expose
    /// the store and bus to native bindings.
    pub fn configure(&mut self, bus: &Rc<EventBus>) -> anyhow::Result<()> {
        self.shared.bus.replace(Some(bus.clone()));

        // Entity destruction purges the entity from every proxy.
        let weak = Rc::downgrade(&self.shared);
        bus.subscribe::<EntityDestroyed>(move |event| {
            if let Some(shared) = weak.upgrade() {
                for proxy in shared.proxies.borrow().iter() {
                    proxy.receivers().remove(event.entity);
                }
            }
            Ok(())
        });

        // Component attachment triggers lazy materialization and proxy
        // admission.
        let weak = Rc::downgrade(&self.shared);
        bus.subscribe::<ComponentAdded<LuaScript>>(move |event| {
            let Some(shared) = weak.upgrade() else {
                return Ok(());
            };
            materialize(&shared, event.entity).map_err(|err| shared.report(err))
        });

        self.configure_interpreter()
            .map_err(|err| self.shared.report(err))
    }

    fn configure_interpreter(&mut self) -> anyhow::Result<()> {
        let stdout = self.shared.stdout_sink.borrow().clone();
        let stderr = self.shared.stderr_sink.borrow().clone();
        self.streams = Some(redirect::install(self.lua, stdout, stderr)?);

        // Front-insert the queued paths; the most recently added ends up
        // first in the search order.
        let package: Table = self.lua.globals().get("package").map_err(lua_err)?;
        let mut search: String = package.get("path").map_err(lua_err)?;
        for path in &self.paths {
            let dir = path.display();
            search = format!("{dir}/?.lua;{dir}/?/init.lua;{search}");
        }
        package.set("path", search).map_err(lua_err)?;

        // Make the store and bus reachable from the native bindings.
        self.lua.set_app_data(ScriptContext {
            shared: Rc::as_ptr(&self.shared),
        });
        debug!(paths = self.paths.len(), "script runtime configured");
        Ok(())
    }

    /// Invoke `update(dt)` on every scripted entity's object.
    ///
    /// The first failing script aborts the remainder of the pass; its
    /// diagnostics reach the stderr sink before the error propagates.
    pub fn update(&self, dt: f64) -> anyhow::Result<()> {
        // Snapshot the scripted entities so scripts may create or destroy
        // entities mid-pass.
        let scripted: Vec<Entity> = {
            let world = self.shared.store.world();
            let mut query = world.query::<&LuaScript>();
            query
                .iter()
                .map(|(entity, _)| entity)
                .collect()
        };

        for entity in scripted {
            let Some(object) = bridge::try_script_object(self.lua, &self.shared.store, entity)?
            else {
                continue; // destroyed earlier in this pass, or never materialized
            };
            let called = object
                .get::<Function>("update")
                .and_then(|update| update.call::<()>((object.clone(), dt)));
            if let Err(err) = called {
                return Err(self.shared.report(
                    lua_err(err).context(format!("update failed for entity {entity:?}")),
                ));
            }
        }
        Ok(())
    }

    /// Proxy events of type `E` to any scripted entity exposing a
    /// `handler_name` attribute.
    pub fn add_event_proxy<E>(&self, bus: &Rc<EventBus>, handler_name: &str)
    where
        E: Serialize + 'static,
    {
        self.add_event_proxy_with(bus, Rc::new(BroadcastEventProxy::<E>::new(handler_name)));
    }

    /// Proxy events of type `E` through the given proxy implementation.
    pub fn add_event_proxy_with<E, P>(&self, bus: &Rc<EventBus>, proxy: Rc<P>)
    where
        E: 'static,
        P: ProxyReceive<E> + 'static,
    {
        self.shared.proxies.borrow_mut().push(proxy.clone());

        let weak = Rc::downgrade(&self.shared);
        bus.subscribe::<E>(move |event| {
            let Some(shared) = weak.upgrade() else {
                return Ok(());
            };
            let lua = host::lua()?;
            let cx = DispatchContext {
                lua,
                store: &shared.store,
            };
            proxy.receive(&cx, event).map_err(|err| shared.report(err))
        });
    }

    /// Name an event type so scripts can emit it through
    /// `hearth.emit(name, payload)`.
    pub fn register_event_constructor<E, F>(&self, name: impl Into<String>, ctor: F)
    where
        E: 'static,
        F: Fn(&Lua, Value) -> mlua::Result<E> + 'static,
    {
        let emitter: EmitterFn = Rc::new(move |lua, payload, bus| {
            let event = ctor(lua, payload).map_err(lua_err)?;
            bus.emit(&event)
        });
        self.shared.emitters.borrow_mut().insert(name.into(), emitter);
    }
}

impl Drop for ScriptRuntime {
    fn drop(&mut self) {
        // Remove our interpreter-visible bindings, leaving any newer
        // manager's context in place.
        let ours = match self.lua.app_data_ref::<ScriptContext>() {
            Some(cx) => std::ptr::eq(cx.shared, Rc::as_ptr(&self.shared)),
            None => false,
        };
        if ours {
            self.lua.remove_app_data::<ScriptContext>();
        }

        if let Some(streams) = self.streams.take() {
            if let Err(err) = redirect::restore(self.lua, streams) {
                error!("failed to restore script streams: {err:#}");
            }
        }

        // The shared interpreter is never finalized; just ask its collector
        // to reclaim what this manager's entities left behind.
        if let Err(err) = self.lua.gc_collect() {
            error!("lua gc pass failed: {}", err);
        }
    }
}

/// Drive a component through its one unmaterialized → materialized
/// transition, then register the entity with every proxy that admits it.
fn materialize(shared: &Rc<RuntimeShared>, entity: Entity) -> anyhow::Result<()> {
    let lua = host::lua()?;

    // Pending constructor metadata, present only for natively declared
    // components.
    let pending = {
        let world = shared.store.world();
        let script = world
            .get::<&LuaScript>(entity)
            .map_err(|_| anyhow::anyhow!("component-added fired for entity {entity:?} without a script component"))?;
        if script.is_materialized() {
            None
        } else {
            Some((
                script.module().to_owned(),
                script.class().to_owned(),
                script.args().to_vec(),
            ))
        }
    };

    let object = match pending {
        None => match bridge::try_script_object(lua, &shared.store, entity)? {
            Some(object) => object,
            None => bail!("script component for entity {entity:?} vanished during materialization"),
        },
        Some((module, class, args)) => {
            let object = construct(lua, entity, &module, &class, &args)
                .with_context(|| format!("materializing {module}.{class}"))?;
            let key = lua.create_registry_value(&object).map_err(lua_err)?;
            let world = shared.store.world();
            let mut script = world.get::<&mut LuaScript>(entity).map_err(|_| {
                anyhow::anyhow!("script component for entity {entity:?} vanished during materialization")
            })?;
            script.object = Some(key);
            drop(script);
            drop(world);
            object
        }
    };

    // Admission: the capability test is the sole filter.
    for proxy in shared.proxies.borrow().iter() {
        if proxy.can_receive(&object) {
            proxy.receivers().add(entity);
        }
    }
    Ok(())
}

/// Resolve `module`.`class` and invoke its `from_raw_entity` factory with
/// the entity's id and the deferred constructor arguments.
fn construct(
    lua: &Lua,
    entity: Entity,
    module: &str,
    class: &str,
    args: &[serde_json::Value],
) -> anyhow::Result<Table> {
    let require: Function = lua.globals().get("require").map_err(lua_err)?;
    let module_table: Table = require.call(module).map_err(lua_err)?;

    let class_value: Value = module_table.get(class).map_err(lua_err)?;
    let Value::Table(class_table) = class_value else {
        bail!("module `{module}` has no class `{class}`");
    };

    let factory_value: Value = class_table.get("from_raw_entity").map_err(lua_err)?;
    let Value::Function(factory) = factory_value else {
        bail!("class `{module}.{class}` has no `from_raw_entity` factory");
    };

    let mut deferred = Vec::with_capacity(args.len());
    for arg in args {
        deferred.push(lua.to_value(arg).map_err(lua_err)?);
    }
    let id = LuaEntityId(EntityId::from(entity));
    factory
        .call::<Table>((class_table.clone(), id, Variadic::from_iter(deferred)))
        .map_err(lua_err)
}
