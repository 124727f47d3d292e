use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use log::debug;
use serde::Deserialize;

use crate::core::listener::{ConsoleListener, ProgressListener};
use crate::core::process::{
    CommandCaller, CommandInvocation, CommandRunner, Interrupt, ambient_environment,
};
use crate::error::{Error, Result};

/// Optional add-ons that `gcloud components install` understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdkComponent {
    AppEngineJava,
    AppEnginePython,
    AppEngineGo,
    Beta,
    Alpha,
    Bq,
    Core,
    Gsutil,
    Kubectl,
    CloudDatastoreEmulator,
    PubsubEmulator,
    DockerCredentialGcr,
    Cbt,
    Bigtable,
}

impl SdkComponent {
    pub const ALL: [SdkComponent; 14] = [
        SdkComponent::AppEngineJava,
        SdkComponent::AppEnginePython,
        SdkComponent::AppEngineGo,
        SdkComponent::Beta,
        SdkComponent::Alpha,
        SdkComponent::Bq,
        SdkComponent::Core,
        SdkComponent::Gsutil,
        SdkComponent::Kubectl,
        SdkComponent::CloudDatastoreEmulator,
        SdkComponent::PubsubEmulator,
        SdkComponent::DockerCredentialGcr,
        SdkComponent::Cbt,
        SdkComponent::Bigtable,
    ];

    /// Canonical name, passed verbatim on the command line.
    pub fn name(self) -> &'static str {
        match self {
            SdkComponent::AppEngineJava => "app-engine-java",
            SdkComponent::AppEnginePython => "app-engine-python",
            SdkComponent::AppEngineGo => "app-engine-go",
            SdkComponent::Beta => "beta",
            SdkComponent::Alpha => "alpha",
            SdkComponent::Bq => "bq",
            SdkComponent::Core => "core",
            SdkComponent::Gsutil => "gsutil",
            SdkComponent::Kubectl => "kubectl",
            SdkComponent::CloudDatastoreEmulator => "cloud-datastore-emulator",
            SdkComponent::PubsubEmulator => "pubsub-emulator",
            SdkComponent::DockerCredentialGcr => "docker-credential-gcr",
            SdkComponent::Cbt => "cbt",
            SdkComponent::Bigtable => "bigtable",
        }
    }
}

impl fmt::Display for SdkComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SdkComponent {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        SdkComponent::ALL
            .into_iter()
            .find(|component| component.name() == value)
            .ok_or_else(|| format!("unknown Cloud SDK component `{value}`"))
    }
}

/// Produces the environment a Windows SDK needs to find its bundled
/// interpreter. The result replaces the child environment wholesale.
pub trait BundledPythonCopier: Send + Sync {
    fn copy_python(&self) -> Result<HashMap<String, String>>;
}

/// Asks `gcloud` to copy its bundled Python out of the install tree so
/// component operations can replace the original.
#[derive(Debug, Clone)]
pub struct GcloudBundledPythonCopier {
    gcloud: PathBuf,
    caller: CommandCaller,
}

impl GcloudBundledPythonCopier {
    pub fn new(gcloud: impl Into<PathBuf>) -> Self {
        Self {
            gcloud: gcloud.into(),
            caller: CommandCaller::new(),
        }
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.caller = self.caller.with_interrupt(interrupt);
        self
    }
}

impl BundledPythonCopier for GcloudBundledPythonCopier {
    fn copy_python(&self) -> Result<HashMap<String, String>> {
        let gcloud = self.gcloud.to_string_lossy().into_owned();
        let invocation = CommandInvocation::new([
            gcloud.as_str(),
            "components",
            "copy-bundled-python",
        ]);
        let output = self.caller.call(&invocation)?;
        let python = output
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
            .ok_or_else(|| Error::UnexpectedOutput {
                program: gcloud.clone(),
                message: "copy-bundled-python printed no interpreter path".to_string(),
            })?;
        debug!("bundled python copied to {python}");

        let mut env = ambient_environment();
        env.insert("CLOUDSDK_PYTHON".to_string(), python.to_string());
        Ok(env)
    }
}

/// Installs SDK components through `gcloud components install`.
#[derive(Clone)]
pub struct SdkComponentInstaller {
    gcloud: PathBuf,
    runner: Arc<dyn CommandRunner>,
    python_copier: Option<Arc<dyn BundledPythonCopier>>,
}

impl SdkComponentInstaller {
    pub fn new(
        gcloud: impl Into<PathBuf>,
        runner: Arc<dyn CommandRunner>,
        python_copier: Option<Arc<dyn BundledPythonCopier>>,
    ) -> Self {
        Self {
            gcloud: gcloud.into(),
            runner,
            python_copier,
        }
    }

    /// Installs `component`, bracketing the work with one progress span.
    ///
    /// Installing an already present component is a no-op on the SDK side and
    /// reported as success.
    pub fn install_component(
        &self,
        component: SdkComponent,
        progress: &mut dyn ProgressListener,
        console: &dyn ConsoleListener,
    ) -> Result<()> {
        progress.start(&format!("Installing {component}"), None);
        let result = self.run_install(component, console);
        progress.done();
        result
    }

    fn run_install(&self, component: SdkComponent, console: &dyn ConsoleListener) -> Result<()> {
        let env = match &self.python_copier {
            Some(copier) => Some(copier.copy_python()?),
            None => None,
        };
        let gcloud = self.gcloud.to_string_lossy();
        let invocation = CommandInvocation::new([
            &*gcloud,
            "components",
            "install",
            component.name(),
            "--quiet",
        ])
        .with_env(env);
        self.runner.run(&invocation, console)
    }
}

impl fmt::Debug for SdkComponentInstaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdkComponentInstaller")
            .field("gcloud", &self.gcloud)
            .field("python_copier", &self.python_copier.is_some())
            .finish_non_exhaustive()
    }
}

/// Installation state as reported by `gcloud components list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Installed,
    NotInstalled,
    UpdateAvailable,
    Other(String),
}

impl ComponentState {
    fn from_label(label: &str) -> Self {
        match label {
            "Installed" => ComponentState::Installed,
            "Not Installed" => ComponentState::NotInstalled,
            "Update Available" => ComponentState::UpdateAvailable,
            other => ComponentState::Other(other.to_string()),
        }
    }

    pub fn is_installed(&self) -> bool {
        matches!(
            self,
            ComponentState::Installed | ComponentState::UpdateAvailable
        )
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ComponentListing {
    pub(crate) id: String,
    pub(crate) state: ComponentStateLabel,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ComponentStateLabel {
    pub(crate) name: String,
}

impl ComponentListing {
    pub(crate) fn state(&self) -> ComponentState {
        ComponentState::from_label(&self.state.name)
    }
}

pub(crate) fn parse_listing(program: &str, output: &str) -> Result<Vec<ComponentListing>> {
    serde_json::from_str(output).map_err(|err| Error::UnexpectedOutput {
        program: program.to_string(),
        message: format!("component listing is not valid JSON: {err}"),
    })
}

/// Ask the SDK at `gcloud` for the state of one component.
pub fn query_component(
    caller: &CommandCaller,
    gcloud: &Path,
    component: SdkComponent,
    env: Option<HashMap<String, String>>,
) -> Result<ComponentState> {
    let program = gcloud.to_string_lossy().into_owned();
    let filter = format!("--filter=id:{component}");
    let invocation = CommandInvocation::new([
        program.as_str(),
        "components",
        "list",
        "--format=json",
        filter.as_str(),
    ])
    .with_env(env);
    let output = caller.call(&invocation)?;
    let state = parse_listing(&program, &output)?
        .into_iter()
        .find(|listing| listing.id == component.name())
        .map(|listing| listing.state())
        .unwrap_or(ComponentState::NotInstalled);
    Ok(state)
}
