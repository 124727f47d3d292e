use std::path::PathBuf;

use crate::Result;
use crate::core::process::Interrupt;

use super::common::{build_factory, load_config};

pub fn handle_gen_repo_info(config_override: Option<&PathBuf>, interrupt: &Interrupt) -> Result<()> {
    let config = load_config(config_override)?;
    let factory = build_factory(&config, interrupt)?;
    factory.gen_repo_info_file().generate(&config.repo_info)
}
