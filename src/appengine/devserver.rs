use std::time::Duration;

use log::{debug, info, warn};

use crate::config::RunConfig;
use crate::core::process::CommandInvocation;
use crate::error::{Error, Result};
use crate::managed::InstalledSdkChecker;

use super::args::Args;
use super::{CloudSdk, SupportedDevServerVersion, layered_environment};

/// Line both dev server generations print once they accept requests.
pub const DEV_SERVER_READY_MARKER: &str = "Dev App Server is now running";

const DEV_APP_SERVER_MAIN: &str = "com.google.appengine.tools.development.DevAppServerMain";
const DEFAULT_HOST: &str = "localhost";
const DEFAULT_V1_PORT: u16 = 8080;
const DEFAULT_ADMIN_PORT: u16 = 8000;
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of [`DevServer::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevServerRun {
    /// Synchronous run; the server exited cleanly.
    Exited,
    /// Asynchronous start; the server is running detached.
    Started { pid: u32 },
}

/// Local development server for one protocol generation.
#[derive(Debug, Clone)]
pub struct DevServer {
    sdk: CloudSdk,
    version: SupportedDevServerVersion,
    start_timeout: Option<Duration>,
}

impl DevServer {
    pub(crate) fn new(
        sdk: CloudSdk,
        version: SupportedDevServerVersion,
        start_timeout: Option<Duration>,
    ) -> Self {
        Self {
            sdk,
            version,
            start_timeout,
        }
    }

    pub fn version(&self) -> SupportedDevServerVersion {
        self.version
    }

    /// Runs in the foreground, or returns once the readiness line appears
    /// when built for asynchronous start.
    pub fn run(&self, config: &RunConfig) -> Result<DevServerRun> {
        let invocation = match self.version {
            SupportedDevServerVersion::V1 => self.v1_invocation(config)?,
            SupportedDevServerVersion::V2Alpha => self.v2_invocation(config)?,
        };
        match self.start_timeout {
            None => {
                self.sdk.run(&invocation)?;
                Ok(DevServerRun::Exited)
            }
            Some(timeout) => {
                let pid = self
                    .sdk
                    .run_until_ready(&invocation, DEV_SERVER_READY_MARKER, timeout)?;
                info!("Dev App Server started in the background (pid {pid})");
                Ok(DevServerRun::Started { pid })
            }
        }
    }

    /// Asks a running server to shut down.
    pub fn stop(&self, config: &RunConfig) -> Result<()> {
        let url = stop_url(self.version, config);
        debug!("sending stop request to {url}");
        let agent = ureq::AgentBuilder::new().timeout(STOP_TIMEOUT).build();
        match agent.post(&url).call() {
            Ok(_) => {
                info!("Dev App Server stop requested at {url}");
                Ok(())
            }
            Err(ureq::Error::Status(code, _)) => Err(Error::StopRequest {
                url,
                message: format!("server answered HTTP {code}"),
            }),
            Err(err) => Err(Error::StopRequest {
                message: err.to_string(),
                url,
            }),
        }
    }

    fn v1_invocation(&self, config: &RunConfig) -> Result<CommandInvocation> {
        require_services(config)?;
        let installation = self.sdk.installation();
        InstalledSdkChecker::new().check_app_engine_java(installation)?;
        warn_unsupported_v1_settings(config);

        let mut args = Args::new();
        args.positional(self.sdk.java());
        if config.automatic_restart == Some(true) {
            args.positional("-Dappengine.fullscan.seconds=1");
        }
        args.extend(config.jvm_flags.iter().cloned());
        args.positional(format!(
            "-Dappengine.sdk.root={}",
            installation.app_engine_java_root().display()
        ));
        args.positional("-cp");
        args.positional_path(&installation.tools_jar());
        args.positional(DEV_APP_SERVER_MAIN);
        args.value("address", config.host.as_deref());
        args.value("port", config.port);
        args.value("default_gcs_bucket", config.default_gcs_bucket_name.as_deref());
        args.positional("--allow_remote_shutdown");
        args.flag("disable_update_check", config.skip_sdk_update_check);
        args.extend(config.additional_arguments.iter().cloned());
        for service in &config.services {
            args.positional_path(service);
        }

        Ok(CommandInvocation::new(args.into_vec())
            .with_env(layered_environment(&config.environment)))
    }

    fn v2_invocation(&self, config: &RunConfig) -> Result<CommandInvocation> {
        require_services(config)?;

        let mut args = Args::new();
        args.positional(self.sdk.python());
        args.positional_path(&self.sdk.installation().dev_appserver_py());
        for service in &config.services {
            args.positional_path(service);
        }
        args.value("host", config.host.as_deref());
        args.value("port", config.port);
        args.value("admin_host", config.admin_host.as_deref());
        args.value("admin_port", config.admin_port);
        args.value("auth_domain", config.auth_domain.as_deref());
        args.path("storage_path", config.storage_path.as_deref());
        args.path("datastore_path", config.datastore_path.as_deref());
        args.value("log_level", config.log_level.as_deref());
        args.value("max_module_instances", config.max_module_instances);
        args.value("use_mtime_file_watcher", config.use_mtime_file_watcher);
        args.value("threadsafe_override", config.threadsafe_override.as_deref());
        args.value("python_startup_script", config.python_startup_script.as_deref());
        args.value("python_startup_args", config.python_startup_args.as_deref());
        args.repeated("jvm_flag", &config.jvm_flags);
        args.value("custom_entrypoint", config.custom_entrypoint.as_deref());
        args.value("runtime", config.runtime.as_deref());
        args.value("allow_skipped_files", config.allow_skipped_files);
        args.value("api_port", config.api_port);
        args.value("automatic_restart", config.automatic_restart);
        args.value("dev_appserver_log_level", config.dev_appserver_log_level.as_deref());
        args.value("skip_sdk_update_check", config.skip_sdk_update_check);
        args.value("default_gcs_bucket_name", config.default_gcs_bucket_name.as_deref());
        args.value("clear_datastore", config.clear_datastore);
        args.repeated(
            "env_var",
            config
                .environment
                .iter()
                .map(|(key, value)| format!("{key}={value}")),
        );
        args.extend(config.additional_arguments.iter().cloned());

        Ok(CommandInvocation::new(args.into_vec()))
    }
}

fn require_services(config: &RunConfig) -> Result<()> {
    if config.services.is_empty() {
        Err(Error::MissingArgument {
            name: "run.services",
        })
    } else {
        Ok(())
    }
}

fn warn_unsupported_v1_settings(config: &RunConfig) {
    let ignored = [
        ("admin_host", config.admin_host.is_some()),
        ("admin_port", config.admin_port.is_some()),
        ("auth_domain", config.auth_domain.is_some()),
        ("storage_path", config.storage_path.is_some()),
        ("datastore_path", config.datastore_path.is_some()),
        ("log_level", config.log_level.is_some()),
        ("max_module_instances", config.max_module_instances.is_some()),
        ("use_mtime_file_watcher", config.use_mtime_file_watcher.is_some()),
        ("threadsafe_override", config.threadsafe_override.is_some()),
        ("python_startup_script", config.python_startup_script.is_some()),
        ("python_startup_args", config.python_startup_args.is_some()),
        ("custom_entrypoint", config.custom_entrypoint.is_some()),
        ("runtime", config.runtime.is_some()),
        ("allow_skipped_files", config.allow_skipped_files.is_some()),
        ("api_port", config.api_port.is_some()),
        ("dev_appserver_log_level", config.dev_appserver_log_level.is_some()),
        ("clear_datastore", config.clear_datastore.is_some()),
    ];
    for (name, set) in ignored {
        if set {
            warn!("`run.{name}` is not supported by dev server version 1 and will be ignored.");
        }
    }
}

fn stop_url(version: SupportedDevServerVersion, config: &RunConfig) -> String {
    match version {
        SupportedDevServerVersion::V1 => format!(
            "http://{}:{}/_ah/admin/quit",
            config.host.as_deref().unwrap_or(DEFAULT_HOST),
            config.port.unwrap_or(DEFAULT_V1_PORT)
        ),
        SupportedDevServerVersion::V2Alpha => format!(
            "http://{}:{}/quit",
            config.admin_host.as_deref().unwrap_or(DEFAULT_HOST),
            config.admin_port.unwrap_or(DEFAULT_ADMIN_PORT)
        ),
    }
}
