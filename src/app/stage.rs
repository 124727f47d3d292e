use std::path::PathBuf;

use log::info;

use crate::Result;
use crate::core::process::Interrupt;

use super::common::{build_factory, load_config};

pub fn handle_stage(config_override: Option<&PathBuf>, interrupt: &Interrupt) -> Result<()> {
    let config = load_config(config_override)?;
    let factory = build_factory(&config, interrupt)?;
    factory.standard_staging().stage(&config.stage)?;
    if let Some(dir) = &config.stage.staging_directory {
        info!("Staged application into {}", dir.display());
    }
    Ok(())
}
