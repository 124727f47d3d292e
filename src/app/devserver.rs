use std::path::PathBuf;

use crate::Result;
use crate::appengine::DevServerRun;
use crate::cli::StartArgs;
use crate::core::process::Interrupt;

use super::common::{build_factory, devserver_version, load_config};

pub fn handle_run(config_override: Option<&PathBuf>, interrupt: &Interrupt) -> Result<()> {
    let config = load_config(config_override)?;
    let version = devserver_version(&config)?;
    let factory = build_factory(&config, interrupt)?;
    factory.dev_server_run_sync(version).run(&config.run)?;
    Ok(())
}

pub fn handle_start(
    args: StartArgs,
    config_override: Option<&PathBuf>,
    interrupt: &Interrupt,
) -> Result<()> {
    let config = load_config(config_override)?;
    let version = devserver_version(&config)?;
    let timeout = args.timeout.unwrap_or(config.run.start_success_timeout);
    let factory = build_factory(&config, interrupt)?;
    if let DevServerRun::Started { pid } = factory
        .dev_server_run_async(timeout, version)
        .run(&config.run)?
    {
        println!("Dev App Server {version} running in the background (pid {pid}).");
    }
    Ok(())
}

pub fn handle_stop(config_override: Option<&PathBuf>, interrupt: &Interrupt) -> Result<()> {
    let config = load_config(config_override)?;
    let version = devserver_version(&config)?;
    let factory = build_factory(&config, interrupt)?;
    factory.dev_server_stop(version).stop(&config.run)
}
