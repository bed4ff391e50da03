use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct HostConfig {
    /// Module search paths, most significant last.
    #[serde(default)]
    pub script_paths: Vec<String>,
    #[serde(default = "default_module")]
    pub module: String,
    #[serde(default = "default_class")]
    pub class: String,
    #[serde(default = "default_tick_rate")]
    pub tick_rate: f64,
    #[serde(default = "default_ticks")]
    pub ticks: u32,
}

fn default_module() -> String {
    "demo".into()
}

fn default_class() -> String {
    "Demo".into()
}

fn default_tick_rate() -> f64 {
    20.0
}

fn default_ticks() -> u32 {
    100
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            script_paths: Vec::new(),
            module: default_module(),
            class: default_class(),
            tick_rate: default_tick_rate(),
            ticks: default_ticks(),
        }
    }
}

impl HostConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: HostConfig = toml::from_str(&contents)?;
            Ok(config)
        } else {
            tracing::info!("No config file found at {}, using defaults", path.display());
            Ok(HostConfig::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: HostConfig = toml::from_str("module = \"game\"").unwrap();
        assert_eq!(config.module, "game");
        assert_eq!(config.class, "Demo");
        assert_eq!(config.tick_rate, 20.0);
        assert!(config.script_paths.is_empty());
    }
}
