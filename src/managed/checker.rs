use std::fs;
use std::path::Path;

use semver::Version;

use crate::error::{Error, Result};

use super::{SdkComponent, SdkInstallation, gcloud_path};

/// Verifies that a configured SDK satisfies a pinned version.
pub trait SdkChecker {
    fn check(&self, home: &Path, version: &str) -> Result<()>;
}

/// Checks an SDK root on disk using its `VERSION` file.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstalledSdkChecker;

impl InstalledSdkChecker {
    pub fn new() -> Self {
        Self
    }

    pub fn installed_version(&self, home: &Path) -> Result<Version> {
        if !gcloud_path(home).is_file() {
            return Err(Error::SdkNotFound {
                path: home.to_path_buf(),
            });
        }
        let version_file = home.join("VERSION");
        let contents =
            fs::read_to_string(&version_file).map_err(|source| Error::SdkVersionUnreadable {
                path: version_file.clone(),
                source,
            })?;
        parse_sdk_version(&contents)
    }

    /// The App Engine Java tooling must be present before staging or running
    /// the Java dev server.
    pub fn check_app_engine_java(&self, installation: &SdkInstallation) -> Result<()> {
        let jar = installation.tools_jar();
        if jar.is_file() {
            Ok(())
        } else {
            Err(Error::MissingComponent {
                component: SdkComponent::AppEngineJava.to_string(),
                path: jar,
            })
        }
    }
}

impl SdkChecker for InstalledSdkChecker {
    fn check(&self, home: &Path, version: &str) -> Result<()> {
        let expected = parse_sdk_version(version)?;
        let installed = self.installed_version(home)?;
        if installed == expected {
            Ok(())
        } else {
            Err(Error::SdkVersionMismatch {
                expected: expected.to_string(),
                installed: installed.to_string(),
            })
        }
    }
}

/// Parse an SDK version, padding missing minor/patch components
/// (`"174"` and `"174.0"` both read as `174.0.0`).
pub fn parse_sdk_version(value: &str) -> Result<Version> {
    let trimmed = value.trim();
    let (core, suffix) = match trimmed.find(['-', '+']) {
        Some(idx) => trimmed.split_at(idx),
        None => (trimmed, ""),
    };
    let mut normalized = core.to_string();
    for _ in core.split('.').count()..3 {
        normalized.push_str(".0");
    }
    normalized.push_str(suffix);

    Version::parse(&normalized).map_err(|source| Error::InvalidSdkVersion {
        value: trimmed.to_string(),
        source,
    })
}
