//! App Engine operations driven through the Cloud SDK.
//!
//! [`AppEngineFactory`] resolves the SDK once and hands out operation objects
//! that share a single [`CloudSdk`] execution context.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::warn;

use crate::config::PluginConfig;
use crate::core::listener::{ConsoleListener, LogConsoleListener, ProgressListener};
use crate::core::process::{
    CommandInvocation, CommandRunner, Interrupt, ProcessCommandRunner, ambient_environment,
};
use crate::error::{Error, Result};
use crate::managed::{
    BundledPythonCopier, GcloudBundledPythonCopier, InstalledSdkChecker, ManagedSdkDownloader,
    SdkChecker, SdkComponentInstaller, SdkDownloader, SdkInstallation, resolve_installation,
};

mod args;
mod deploy;
mod devserver;
mod repo_info;
mod staging;

pub use deploy::{ConfigKind, Deployment};
pub use devserver::{DEV_SERVER_READY_MARKER, DevServer, DevServerRun};
pub use repo_info::GenRepoInfoFile;
pub use staging::StandardStaging;

const METRICS_ENVIRONMENT: &str = "CLOUDSDK_METRICS_ENVIRONMENT";
const METRICS_ENVIRONMENT_VERSION: &str = "CLOUDSDK_METRICS_ENVIRONMENT_VERSION";

/// Dev server generations. They take different flags and stop differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportedDevServerVersion {
    V1,
    V2Alpha,
}

impl SupportedDevServerVersion {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim() {
            "1" => Ok(SupportedDevServerVersion::V1),
            "2-alpha" => Ok(SupportedDevServerVersion::V2Alpha),
            other => Err(Error::UnsupportedDevServerVersion {
                value: other.to_string(),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SupportedDevServerVersion::V1 => "1",
            SupportedDevServerVersion::V2Alpha => "2-alpha",
        }
    }
}

impl fmt::Display for SupportedDevServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything an operation needs to run SDK commands: the resolved
/// installation, the runner, the console sink and per-build environment.
#[derive(Clone)]
pub struct CloudSdk {
    installation: SdkInstallation,
    runner: Arc<dyn CommandRunner>,
    console: Arc<dyn ConsoleListener>,
    metrics: Option<(String, Option<String>)>,
    java: PathBuf,
    python: String,
}

impl CloudSdk {
    pub fn new(
        installation: SdkInstallation,
        runner: Arc<dyn CommandRunner>,
        console: Arc<dyn ConsoleListener>,
    ) -> Self {
        let java = std::env::var_os("JAVA_HOME")
            .filter(|home| !home.is_empty())
            .map(|home| PathBuf::from(home).join("bin").join("java"))
            .unwrap_or_else(|| PathBuf::from("java"));
        let python = std::env::var("CLOUDSDK_PYTHON")
            .ok()
            .filter(|python| !python.is_empty())
            .unwrap_or_else(|| "python".to_string());
        Self {
            installation,
            runner,
            console,
            metrics: None,
            java,
            python,
        }
    }

    /// Tags `gcloud app` commands with the calling project's identity.
    pub fn with_metrics(mut self, environment: impl Into<String>, version: Option<String>) -> Self {
        self.metrics = Some((environment.into(), version));
        self
    }

    pub fn with_java(mut self, java: impl Into<PathBuf>) -> Self {
        self.java = java.into();
        self
    }

    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    pub fn installation(&self) -> &SdkInstallation {
        &self.installation
    }

    pub(crate) fn java(&self) -> String {
        self.java.to_string_lossy().into_owned()
    }

    pub(crate) fn python(&self) -> &str {
        &self.python
    }

    /// `gcloud <args>` with the ambient environment.
    pub(crate) fn gcloud_invocation(&self, args: Vec<String>) -> CommandInvocation {
        let mut argv = vec![self.installation.gcloud().to_string_lossy().into_owned()];
        argv.extend(args);
        CommandInvocation::new(argv)
    }

    /// `gcloud app <args>`, carrying the metrics environment when configured.
    pub(crate) fn app_invocation(&self, args: Vec<String>) -> CommandInvocation {
        let mut argv = vec!["app".to_string()];
        argv.extend(args);
        let env = self.metrics.as_ref().map(|(environment, version)| {
            let mut env = ambient_environment();
            env.insert(METRICS_ENVIRONMENT.to_string(), environment.clone());
            if let Some(version) = version {
                env.insert(METRICS_ENVIRONMENT_VERSION.to_string(), version.clone());
            }
            env
        });
        self.gcloud_invocation(argv).with_env(env)
    }

    pub(crate) fn run(&self, invocation: &CommandInvocation) -> Result<()> {
        self.runner.run(invocation, self.console.as_ref())
    }

    pub(crate) fn run_until_ready(
        &self,
        invocation: &CommandInvocation,
        ready: &str,
        timeout: Duration,
    ) -> Result<u32> {
        self.runner
            .run_until_ready(invocation, Arc::clone(&self.console), ready, timeout)
    }
}

impl fmt::Debug for CloudSdk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudSdk")
            .field("installation", &self.installation)
            .field("metrics", &self.metrics)
            .field("java", &self.java)
            .field("python", &self.python)
            .finish_non_exhaustive()
    }
}

/// Pieces the factory would otherwise build itself.
pub struct Collaborators {
    pub runner: Arc<dyn CommandRunner>,
    pub console: Arc<dyn ConsoleListener>,
    pub downloader: Box<dyn SdkDownloader>,
    pub checker: Box<dyn SdkChecker>,
    /// Handed to helpers the factory builds later (the bundled-Python copier).
    pub interrupt: Option<Interrupt>,
}

impl Collaborators {
    /// Real processes, the strict exit policy, `GCLOUD: `-prefixed logging and
    /// a managed downloader built from `config`.
    pub fn for_config(config: &PluginConfig, interrupt: Option<Interrupt>) -> Self {
        let mut runner = ProcessCommandRunner::new();
        if let Some(interrupt) = &interrupt {
            runner = runner.with_interrupt(interrupt.clone());
        }
        let runner: Arc<dyn CommandRunner> = Arc::new(runner);
        let mut downloader = ManagedSdkDownloader::from_settings(&config.sdk, Arc::clone(&runner));
        if let Some(interrupt) = &interrupt {
            downloader = downloader.with_interrupt(interrupt.clone());
        }
        Self {
            downloader: Box::new(downloader),
            runner,
            console: Arc::new(LogConsoleListener::default()),
            checker: Box::new(InstalledSdkChecker::new()),
            interrupt,
        }
    }
}

/// Builds App Engine operations against one resolved SDK installation.
#[derive(Debug, Clone)]
pub struct AppEngineFactory {
    sdk: CloudSdk,
    interrupt: Option<Interrupt>,
}

impl AppEngineFactory {
    pub fn new(
        config: &PluginConfig,
        interrupt: Option<Interrupt>,
        progress: &mut dyn ProgressListener,
    ) -> Result<Self> {
        Self::with_collaborators(config, Collaborators::for_config(config, interrupt), progress)
    }

    /// Resolves the installation (downloading or version-checking as
    /// needed) before returning.
    pub fn with_collaborators(
        config: &PluginConfig,
        collaborators: Collaborators,
        progress: &mut dyn ProgressListener,
    ) -> Result<Self> {
        let mut settings = config.sdk.clone();
        if let Some(warning) = settings.handle_path_deprecation() {
            warn!("{warning}");
        }

        let Collaborators {
            runner,
            console,
            downloader,
            checker,
            interrupt,
        } = collaborators;
        let installation = resolve_installation(
            &settings,
            downloader.as_ref(),
            checker.as_ref(),
            progress,
            console.as_ref(),
        )?;

        let mut sdk = CloudSdk::new(installation, runner, console);
        if let Some(name) = &config.project.name {
            sdk = sdk.with_metrics(name.clone(), config.project.version.clone());
        }
        Ok(Self { sdk, interrupt })
    }

    pub fn from_cloud_sdk(sdk: CloudSdk) -> Self {
        Self {
            sdk,
            interrupt: None,
        }
    }

    pub fn cloud_sdk(&self) -> &CloudSdk {
        &self.sdk
    }

    pub fn standard_staging(&self) -> StandardStaging {
        StandardStaging::new(self.sdk.clone())
    }

    pub fn deployment(&self) -> Deployment {
        Deployment::new(self.sdk.clone())
    }

    pub fn dev_server_run_sync(&self, version: SupportedDevServerVersion) -> DevServer {
        DevServer::new(self.sdk.clone(), version, None)
    }

    pub fn dev_server_run_async(
        &self,
        start_success_timeout_secs: u64,
        version: SupportedDevServerVersion,
    ) -> DevServer {
        DevServer::new(
            self.sdk.clone(),
            version,
            Some(Duration::from_secs(start_success_timeout_secs)),
        )
    }

    pub fn dev_server_stop(&self, version: SupportedDevServerVersion) -> DevServer {
        DevServer::new(self.sdk.clone(), version, None)
    }

    pub fn gen_repo_info_file(&self) -> GenRepoInfoFile {
        GenRepoInfoFile::new(self.sdk.clone())
    }

    /// Installer for the resolved SDK. Windows installs go through the
    /// bundled interpreter.
    pub fn component_installer(&self) -> SdkComponentInstaller {
        let gcloud = self.sdk.installation().gcloud();
        let copier: Option<Arc<dyn BundledPythonCopier>> = if cfg!(windows) {
            let mut copier = GcloudBundledPythonCopier::new(&gcloud);
            if let Some(interrupt) = &self.interrupt {
                copier = copier.with_interrupt(interrupt.clone());
            }
            Some(Arc::new(copier))
        } else {
            None
        };
        SdkComponentInstaller::new(gcloud, Arc::clone(&self.sdk.runner), copier)
    }

    pub fn console(&self) -> &dyn ConsoleListener {
        self.sdk.console.as_ref()
    }
}

/// Ambient environment plus `extra`, or no overlay when `extra` is empty.
pub(crate) fn layered_environment<'a>(
    extra: impl IntoIterator<Item = (&'a String, &'a String)>,
) -> Option<HashMap<String, String>> {
    let mut extra = extra.into_iter().peekable();
    extra.peek()?;
    let mut env = ambient_environment();
    env.extend(extra.map(|(key, value)| (key.clone(), value.clone())));
    Some(env)
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::config::SdkSettings;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn dev_server_versions_parse_strictly() {
        assert_eq!(
            SupportedDevServerVersion::parse("1").unwrap(),
            SupportedDevServerVersion::V1
        );
        assert_eq!(
            SupportedDevServerVersion::parse("2-alpha").unwrap(),
            SupportedDevServerVersion::V2Alpha
        );
        let err = SupportedDevServerVersion::parse("2").unwrap_err();
        assert!(matches!(err, Error::UnsupportedDevServerVersion { ref value } if value == "2"));
        assert_eq!(err.kind(), crate::error::FaultKind::Configuration);
    }

    #[test]
    fn app_commands_carry_metrics_environment() {
        let runner = Arc::new(RecordingRunner::default());
        let sdk = sdk_at(Path::new("/sdk"), runner).with_metrics("my-app", Some("1.0".into()));
        let invocation = sdk.app_invocation(vec!["deploy".into()]);

        let env = invocation.env().expect("metrics overlay");
        assert_eq!(env.get(METRICS_ENVIRONMENT).map(String::as_str), Some("my-app"));
        assert_eq!(
            env.get(METRICS_ENVIRONMENT_VERSION).map(String::as_str),
            Some("1.0")
        );
        assert_eq!(invocation.args()[1..], ["app", "deploy"]);
    }

    #[test]
    fn app_commands_without_metrics_inherit_environment() {
        let runner = Arc::new(RecordingRunner::default());
        let invocation = sdk_at(Path::new("/sdk"), runner).app_invocation(vec!["deploy".into()]);
        assert!(invocation.env().is_none());
    }

    #[test]
    fn layered_environment_is_absent_when_nothing_to_add() {
        let empty: Vec<(&String, &String)> = Vec::new();
        assert!(layered_environment(empty).is_none());

        let key = "APP_MODE".to_string();
        let value = "local".to_string();
        let env = layered_environment([(&key, &value)]).unwrap();
        assert_eq!(env.get("APP_MODE").map(String::as_str), Some("local"));
    }

    struct OnceDownloader {
        calls: Arc<AtomicUsize>,
        home: PathBuf,
    }

    impl SdkDownloader for OnceDownloader {
        fn download(
            &self,
            _progress: &mut dyn ProgressListener,
            _console: &dyn ConsoleListener,
        ) -> Result<PathBuf> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.home.clone())
        }
    }

    struct NeverChecker;

    impl SdkChecker for NeverChecker {
        fn check(&self, _home: &Path, _version: &str) -> Result<()> {
            panic!("no version is pinned")
        }
    }

    #[test]
    fn factory_downloads_once_and_reuses_the_path() {
        let runner = Arc::new(RecordingRunner::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let config = PluginConfig {
            sdk: SdkSettings::default(),
            ..PluginConfig::default()
        };
        let factory = AppEngineFactory::with_collaborators(
            &config,
            Collaborators {
                runner: runner.clone(),
                console: Arc::new(()),
                downloader: Box::new(OnceDownloader {
                    calls: Arc::clone(&calls),
                    home: PathBuf::from("/managed/google-cloud-sdk"),
                }),
                checker: Box::new(NeverChecker),
                interrupt: None,
            },
            &mut (),
        )
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(runner.invocations.lock().unwrap().is_empty());
        assert_eq!(
            factory.cloud_sdk().installation().home(),
            Path::new("/managed/google-cloud-sdk")
        );
        let gcloud = factory.cloud_sdk().installation().gcloud();
        assert!(gcloud.starts_with("/managed/google-cloud-sdk"));
    }
}
