use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::appengine::ConfigKind;
use crate::managed::SdkComponent;

const VERSION: &str = env!("CLOUDSDK_VERSION");

/// Top-level CLI definition for the `cloudsdk` tool.
#[derive(Debug, Parser)]
#[command(
    name = "cloudsdk",
    version = VERSION,
    about = "Stage, deploy and run App Engine apps through a managed Cloud SDK.",
    long_about = "Reads appengine.toml, locates (or downloads) the Cloud SDK and drives gcloud \
                  and the App Engine tooling, streaming their output with a GCLOUD: prefix."
)]
pub struct Cli {
    /// Path to an explicit configuration file. Defaults to searching for `appengine.toml`.
    #[arg(
        global = true,
        short,
        long = "config",
        value_name = "PATH",
        help = "Load configuration from PATH instead of searching upward for appengine.toml."
    )]
    pub config: Option<PathBuf>,

    /// Log spawned commands and other debug detail.
    #[arg(global = true, short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print the resolved Cloud SDK root, downloading it first if needed.
    SdkHome,
    /// Install an optional Cloud SDK component.
    InstallComponent(InstallComponentArgs),
    /// Stage an exploded WAR for App Engine standard.
    Stage,
    /// Deploy the configured deployables, or one project-level config file.
    Deploy(DeployArgs),
    /// Run the dev server in the foreground.
    Run,
    /// Start the dev server in the background and wait until it is ready.
    Start(StartArgs),
    /// Ask a running dev server to shut down.
    Stop,
    /// Generate source-context files for the debugger.
    GenRepoInfo,
}

#[derive(Debug, Args)]
pub struct InstallComponentArgs {
    /// Component id, e.g. `app-engine-java`.
    #[arg(value_name = "COMPONENT", value_parser = parse_component)]
    pub component: SdkComponent,
}

#[derive(Debug, Args)]
pub struct DeployArgs {
    /// Deploy `<kind>.yaml` from `deploy.app_engine_directory` instead of the deployables.
    #[arg(long = "config-file", value_name = "KIND", value_parser = parse_config_kind)]
    pub config_file: Option<ConfigKind>,
}

#[derive(Debug, Args)]
pub struct StartArgs {
    /// Seconds to wait for readiness. Overrides `run.start_success_timeout`.
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,
}

fn parse_component(value: &str) -> Result<SdkComponent, String> {
    value.parse()
}

fn parse_config_kind(value: &str) -> Result<ConfigKind, String> {
    value.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_apply_after_subcommand() {
        let cli = Cli::try_parse_from([
            "cloudsdk",
            "deploy",
            "--config-file",
            "cron",
            "--config",
            "/tmp/appengine.toml",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/appengine.toml")));
        match cli.command {
            Some(Commands::Deploy(args)) => assert_eq!(args.config_file, Some(ConfigKind::Cron)),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn unknown_component_is_rejected() {
        let err = Cli::try_parse_from(["cloudsdk", "install-component", "nope"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn start_timeout_must_be_positive() {
        assert!(Cli::try_parse_from(["cloudsdk", "start", "--timeout", "0"]).is_err());
        let cli = Cli::try_parse_from(["cloudsdk", "start", "--timeout", "5"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Start(StartArgs { timeout: Some(5) }))
        ));
    }
}
