pub mod bridge;
pub mod component;
pub mod host;
pub mod proxy;
pub mod redirect;
pub mod runtime;

pub use component::LuaScript;
pub use proxy::{BroadcastEventProxy, DispatchContext, EventProxy, ProxyReceive, Receivers};
pub use redirect::{LogSink, OutputRedirector};
pub use runtime::ScriptRuntime;

/// Convert mlua::Error to anyhow::Error by stringifying it.
pub(crate) fn lua_err(e: mlua::Error) -> anyhow::Error {
    anyhow::anyhow!("{}", e)
}
