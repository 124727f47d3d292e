use std::path::PathBuf;

use log::warn;

use crate::appengine::{AppEngineFactory, SupportedDevServerVersion};
use crate::config::{ConfigSource, PluginConfig, load_plugin_config, resolve_config_path};
use crate::core::listener::LogProgressListener;
use crate::core::process::Interrupt;
use crate::Result;

pub fn config_source(config_override: Option<&PathBuf>) -> ConfigSource {
    match config_override {
        Some(path) => ConfigSource::Explicit(path.clone()),
        None => ConfigSource::Discover,
    }
}

/// Loads the configuration and reports its warnings once.
pub fn load_config(config_override: Option<&PathBuf>) -> Result<PluginConfig> {
    let path = resolve_config_path(&config_source(config_override), None)?;
    let config = load_plugin_config(&path)?;
    for warning in &config.warnings {
        warn!("{}: {warning}", path.display());
    }
    Ok(config)
}

/// Resolves the SDK for this invocation, downloading it when needed.
pub fn build_factory(config: &PluginConfig, interrupt: &Interrupt) -> Result<AppEngineFactory> {
    let mut progress = LogProgressListener::default();
    AppEngineFactory::new(config, Some(interrupt.clone()), &mut progress)
}

/// Parses `run.devserver_version` before any SDK work happens.
pub fn devserver_version(config: &PluginConfig) -> Result<SupportedDevServerVersion> {
    SupportedDevServerVersion::parse(&config.run.devserver_version)
}
