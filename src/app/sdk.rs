use std::path::PathBuf;

use log::info;

use crate::Result;
use crate::cli::InstallComponentArgs;
use crate::core::listener::LogProgressListener;
use crate::core::process::Interrupt;

use super::common::{build_factory, load_config};

pub fn handle_sdk_home(config_override: Option<&PathBuf>, interrupt: &Interrupt) -> Result<()> {
    let config = load_config(config_override)?;
    let factory = build_factory(&config, interrupt)?;
    println!("{}", factory.cloud_sdk().installation().home().display());
    Ok(())
}

pub fn handle_install_component(
    args: InstallComponentArgs,
    config_override: Option<&PathBuf>,
    interrupt: &Interrupt,
) -> Result<()> {
    let config = load_config(config_override)?;
    let factory = build_factory(&config, interrupt)?;
    let mut progress = LogProgressListener::default();
    factory
        .component_installer()
        .install_component(args.component, &mut progress, factory.console())?;
    info!("Component {} is installed.", args.component);
    Ok(())
}
