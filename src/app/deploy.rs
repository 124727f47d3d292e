use std::path::PathBuf;

use crate::Result;
use crate::cli::DeployArgs;
use crate::core::process::Interrupt;

use super::common::{build_factory, load_config};

pub fn handle_deploy(
    args: DeployArgs,
    config_override: Option<&PathBuf>,
    interrupt: &Interrupt,
) -> Result<()> {
    let config = load_config(config_override)?;
    let factory = build_factory(&config, interrupt)?;
    let deployment = factory.deployment();
    match args.config_file {
        Some(kind) => deployment.deploy_config(kind, &config.deploy),
        None => deployment.deploy(&config.deploy),
    }
}
