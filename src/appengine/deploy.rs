use std::fmt;
use std::str::FromStr;

use crate::config::DeployConfig;
use crate::error::{Error, Result};

use super::CloudSdk;
use super::args::Args;

/// Project-level configuration files that deploy on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKind {
    Cron,
    Dispatch,
    Dos,
    Index,
    Queue,
}

impl ConfigKind {
    pub fn file_name(self) -> &'static str {
        match self {
            ConfigKind::Cron => "cron.yaml",
            ConfigKind::Dispatch => "dispatch.yaml",
            ConfigKind::Dos => "dos.yaml",
            ConfigKind::Index => "index.yaml",
            ConfigKind::Queue => "queue.yaml",
        }
    }

    fn name(self) -> &'static str {
        match self {
            ConfigKind::Cron => "cron",
            ConfigKind::Dispatch => "dispatch",
            ConfigKind::Dos => "dos",
            ConfigKind::Index => "index",
            ConfigKind::Queue => "queue",
        }
    }
}

impl fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ConfigKind {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        [
            ConfigKind::Cron,
            ConfigKind::Dispatch,
            ConfigKind::Dos,
            ConfigKind::Index,
            ConfigKind::Queue,
        ]
        .into_iter()
        .find(|kind| kind.name() == value)
        .ok_or_else(|| {
            format!("unknown config kind `{value}` (expected cron, dispatch, dos, index or queue)")
        })
    }
}

/// `gcloud app deploy`.
#[derive(Debug, Clone)]
pub struct Deployment {
    sdk: CloudSdk,
}

impl Deployment {
    pub(crate) fn new(sdk: CloudSdk) -> Self {
        Self { sdk }
    }

    pub fn deploy(&self, config: &DeployConfig) -> Result<()> {
        if config.deployables.is_empty() {
            return Err(Error::MissingArgument {
                name: "deploy.deployables",
            });
        }
        let mut args = Args::new();
        for deployable in &config.deployables {
            args.positional_path(deployable);
        }
        self.run(args, config)
    }

    /// Deploys one project-level file (`cron.yaml`, `queue.yaml`, ...) from
    /// the App Engine directory.
    pub fn deploy_config(&self, kind: ConfigKind, config: &DeployConfig) -> Result<()> {
        let dir = config
            .app_engine_directory
            .as_deref()
            .ok_or(Error::MissingArgument {
                name: "deploy.app_engine_directory",
            })?;
        let file = dir.join(kind.file_name());
        if !file.is_file() {
            return Err(Error::MissingFile { path: file });
        }
        let mut args = Args::new();
        args.positional_path(&file);
        self.run(args, config)
    }

    fn run(&self, mut args: Args, config: &DeployConfig) -> Result<()> {
        args.value("bucket", config.bucket.as_deref());
        args.value("image-url", config.image_url.as_deref());
        args.toggle("promote", config.promote);
        args.value("server", config.server.as_deref());
        args.toggle("stop-previous-version", config.stop_previous_version);
        args.value("version", config.version.as_deref());
        args.value("project", config.project.as_deref());
        args.positional("--quiet");

        let mut argv = vec!["deploy".to_string()];
        argv.extend(args.into_vec());
        self.sdk.run(&self.sdk.app_invocation(argv))
    }
}
