mod config;

use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use config::HostConfig;
use hearth_ecs::EntityStore;
use hearth_events::EventBus;
use hearth_scripting::{LuaScript, ScriptRuntime};
use tracing::info;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting hearth host...");

    let config = HostConfig::load(Path::new("hearth.toml"))?;
    info!(
        "Config loaded: module={}, class={}, tick_rate={}",
        config.module, config.class, config.tick_rate
    );

    let bus = Rc::new(EventBus::new());
    let store = Rc::new(EntityStore::new(bus.clone()));

    let mut runtime = ScriptRuntime::new(store.clone())?;
    if config.script_paths.is_empty() {
        runtime.add_path(concat!(env!("CARGO_MANIFEST_DIR"), "/scripts"));
    } else {
        runtime.add_paths(config.script_paths.iter().map(String::as_str));
    }
    runtime.configure(&bus)?;

    let entity = store.create();
    store.attach(entity, LuaScript::new(&config.module, &config.class))?;
    info!("Scripted entity {} ready", store.id_of(entity));

    let dt = 1.0 / config.tick_rate;
    for _ in 0..config.ticks {
        runtime.update(dt)?;
        std::thread::sleep(Duration::from_secs_f64(dt));
    }

    info!("Shutting down after {} ticks", config.ticks);
    Ok(())
}
