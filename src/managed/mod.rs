//! Locating, verifying and installing the Cloud SDK.

use std::path::{Path, PathBuf};

use log::info;

use crate::config::SdkSettings;
use crate::core::listener::{ConsoleListener, ProgressListener};
use crate::error::Result;

mod checker;
mod components;
mod download;

pub use checker::{InstalledSdkChecker, SdkChecker, parse_sdk_version};
pub use components::{
    BundledPythonCopier, ComponentState, GcloudBundledPythonCopier, SdkComponent,
    SdkComponentInstaller, query_component,
};
pub use download::{
    ArchiveKind, DEFAULT_DOWNLOAD_URL, ManagedSdkDownloader, Platform, SdkDownloader,
    default_managed_root,
};

/// A resolved SDK root plus the version it was pinned to, if any.
///
/// Resolved once per build and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkInstallation {
    home: PathBuf,
    pinned_version: Option<String>,
}

impl SdkInstallation {
    pub fn new(home: impl Into<PathBuf>, pinned_version: Option<String>) -> Self {
        Self {
            home: home.into(),
            pinned_version,
        }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn pinned_version(&self) -> Option<&str> {
        self.pinned_version.as_deref()
    }

    pub fn gcloud(&self) -> PathBuf {
        gcloud_path(&self.home)
    }

    pub fn app_engine_java_root(&self) -> PathBuf {
        self.home
            .join("platform")
            .join("google_appengine")
            .join("google")
            .join("appengine")
            .join("tools")
            .join("java")
    }

    pub fn tools_jar(&self) -> PathBuf {
        self.app_engine_java_root()
            .join("lib")
            .join("appengine-tools-api.jar")
    }

    pub fn dev_appserver_py(&self) -> PathBuf {
        self.home.join("bin").join("dev_appserver.py")
    }
}

/// Path of the `gcloud` launcher inside an SDK root.
pub fn gcloud_path(home: &Path) -> PathBuf {
    let launcher = if cfg!(windows) { "gcloud.cmd" } else { "gcloud" };
    home.join("bin").join(launcher)
}

/// Resolve the SDK installation for one build.
///
/// No home: download (blocking). Home and pinned version: verify before
/// anything runs. Home without a pin: trusted as-is.
pub fn resolve_installation(
    settings: &SdkSettings,
    downloader: &dyn SdkDownloader,
    checker: &dyn SdkChecker,
    progress: &mut dyn ProgressListener,
    console: &dyn ConsoleListener,
) -> Result<SdkInstallation> {
    match (&settings.home, &settings.version) {
        (None, version) => {
            let home = downloader.download(progress, console)?;
            info!("Using managed Cloud SDK at {}", home.display());
            Ok(SdkInstallation::new(home, version.clone()))
        }
        (Some(home), Some(version)) => {
            checker.check(home, version)?;
            Ok(SdkInstallation::new(home.clone(), Some(version.clone())))
        }
        (Some(home), None) => Ok(SdkInstallation::new(home.clone(), None)),
    }
}
