use std::process::{self, ExitCode};

use clap::{CommandFactory, Parser, error::ErrorKind};
use log::warn;

use cloudsdk::app::{self, error::exit_code, logger};
use cloudsdk::cli::{Cli, Commands};
use cloudsdk::core::process::Interrupt;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(64),
            };
        }
    };

    let Cli {
        config,
        verbose,
        command,
    } = cli;
    logger::init(verbose);

    let command = match command {
        Some(cmd) => cmd,
        None => {
            let mut command = Cli::command();
            let _ = command.print_help();
            println!();
            return ExitCode::from(64);
        }
    };

    let interrupt = Interrupt::new();
    let handler_flag = interrupt.clone();
    let handled = ctrlc::set_handler(move || {
        if handler_flag.is_raised() {
            process::exit(130);
        }
        warn!("Interrupt received; stopping. Press Ctrl-C again to exit immediately.");
        handler_flag.raise();
    });
    if let Err(err) = handled {
        warn!("Ctrl-C will not stop running SDK commands: {err}");
    }

    let config = config.as_ref();
    let exit = match command {
        Commands::SdkHome => app::handle_sdk_home(config, &interrupt),
        Commands::InstallComponent(args) => app::handle_install_component(args, config, &interrupt),
        Commands::Stage => app::handle_stage(config, &interrupt),
        Commands::Deploy(args) => app::handle_deploy(args, config, &interrupt),
        Commands::Run => app::handle_run(config, &interrupt),
        Commands::Start(args) => app::handle_start(args, config, &interrupt),
        Commands::Stop => app::handle_stop(config, &interrupt),
        Commands::GenRepoInfo => app::handle_gen_repo_info(config, &interrupt),
    };

    match exit {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            eprintln!("       ({})", err.kind().describe());
            exit_code(&err)
        }
    }
}
