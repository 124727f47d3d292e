use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use flate2::read::GzDecoder;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use ureq::Agent;

use crate::config::{SdkSettings, user_home_dir};
use crate::core::listener::{ConsoleListener, ProgressListener};
use crate::core::process::{
    CommandCaller, CommandInvocation, CommandRunner, Interrupt, ambient_environment,
};
use crate::error::{Error, Result};

use super::components::{
    BundledPythonCopier, ComponentState, GcloudBundledPythonCopier, SdkComponent,
    SdkComponentInstaller, parse_listing, query_component,
};
use super::gcloud_path;

pub const DEFAULT_DOWNLOAD_URL: &str = "https://dl.google.com/dl/cloudsdk/channels/rapid";

const SDK_DIR_NAME: &str = "google-cloud-sdk";
const MANIFEST_FILE: &str = "manifest.json";
const LATEST_LABEL: &str = "LATEST";
const REQUIRED_COMPONENTS: [SdkComponent; 1] = [SdkComponent::AppEngineJava];

/// Produces an SDK root when none is configured.
pub trait SdkDownloader {
    fn download(
        &self,
        progress: &mut dyn ProgressListener,
        console: &dyn ConsoleListener,
    ) -> Result<PathBuf>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    Zip,
}

impl ArchiveKind {
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveKind::TarGz => "tar.gz",
            ArchiveKind::Zip => "zip",
        }
    }
}

/// Naming used by the published SDK archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub os: &'static str,
    pub arch: &'static str,
    pub archive: ArchiveKind,
}

impl Platform {
    pub fn current() -> Self {
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            "windows" => "windows",
            _ => "linux",
        };
        let arch = match std::env::consts::ARCH {
            "aarch64" | "arm" => "arm",
            "x86" => "x86",
            _ => "x86_64",
        };
        let archive = if os == "windows" {
            ArchiveKind::Zip
        } else {
            ArchiveKind::TarGz
        };
        Self { os, arch, archive }
    }

    fn is_windows(&self) -> bool {
        self.os == "windows"
    }
}

/// `$XDG_CACHE_HOME/cloudsdk/managed`, falling back to `~/.cache`.
pub fn default_managed_root() -> Option<PathBuf> {
    let cache = std::env::var_os("XDG_CACHE_HOME")
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .or_else(|| user_home_dir().map(|home| home.join(".cache")))?;
    Some(cache.join("cloudsdk").join("managed"))
}

/// Downloads, unpacks and installs an SDK under a per-version cache
/// directory, reusing a completed install on later runs.
pub struct ManagedSdkDownloader {
    managed_root: Option<PathBuf>,
    version: Option<String>,
    base_url: String,
    sha256: Option<String>,
    platform: Platform,
    runner: Arc<dyn CommandRunner>,
    caller: CommandCaller,
    agent: Agent,
    interrupt: Option<Interrupt>,
}

impl ManagedSdkDownloader {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            managed_root: None,
            version: None,
            base_url: DEFAULT_DOWNLOAD_URL.to_string(),
            sha256: None,
            platform: Platform::current(),
            runner,
            caller: CommandCaller::new(),
            agent: ureq::AgentBuilder::new()
                .timeout_connect(Duration::from_secs(30))
                .build(),
            interrupt: None,
        }
    }

    pub fn from_settings(settings: &SdkSettings, runner: Arc<dyn CommandRunner>) -> Self {
        let mut downloader = Self::new(runner);
        downloader.managed_root = settings.managed_root.clone();
        downloader.version = settings.version.clone();
        downloader.sha256 = settings.sha256.clone();
        if let Some(url) = &settings.download_url {
            downloader.base_url = url.trim_end_matches('/').to_string();
        }
        downloader
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Abort between chunks and steps once `interrupt` is raised. A partial
    /// download is kept for the next attempt to resume.
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.caller = self.caller.with_interrupt(interrupt.clone());
        self.interrupt = Some(interrupt);
        self
    }

    fn check_interrupt(&self, step: &str) -> Result<()> {
        match &self.interrupt {
            Some(interrupt) if interrupt.is_raised() => Err(Error::Interrupted {
                program: step.to_string(),
            }),
            _ => Ok(()),
        }
    }

    pub fn archive_url(&self) -> String {
        let ext = self.platform.archive.extension();
        match &self.version {
            Some(version) => format!(
                "{}/downloads/google-cloud-sdk-{version}-{}-{}.{ext}",
                self.base_url, self.platform.os, self.platform.arch
            ),
            None => format!("{}/google-cloud-sdk.{ext}", self.base_url),
        }
    }

    /// Directory owned by this version (`<managed root>/<version|LATEST>`).
    pub fn install_root(&self) -> Result<PathBuf> {
        let root = match &self.managed_root {
            Some(root) => root.clone(),
            None => default_managed_root().ok_or(Error::MissingArgument {
                name: "sdk.managed_root",
            })?,
        };
        Ok(root.join(self.version.as_deref().unwrap_or(LATEST_LABEL)))
    }

    fn python_copier(&self, gcloud: &Path) -> Option<Arc<dyn BundledPythonCopier>> {
        if self.platform.is_windows() {
            let mut copier = GcloudBundledPythonCopier::new(gcloud);
            if let Some(interrupt) = &self.interrupt {
                copier = copier.with_interrupt(interrupt.clone());
            }
            Some(Arc::new(copier))
        } else {
            None
        }
    }

    fn install_fresh(
        &self,
        install_root: &Path,
        sdk_home: &Path,
        progress: &mut dyn ProgressListener,
        console: &dyn ConsoleListener,
    ) -> Result<InstallManifest> {
        let url = self.archive_url();
        let archive = install_root.join(format!(
            "{SDK_DIR_NAME}.{}",
            self.platform.archive.extension()
        ));

        let partial = self.fetch(&url, install_root, progress)?;
        fs::rename(&partial, &archive).map_err(|source| Error::io(&archive, source))?;

        let digest = compute_sha256(&archive)?;
        if let Some(expected) = &self.sha256 {
            if !digest.eq_ignore_ascii_case(expected) {
                let _ = fs::remove_file(&archive);
                return Err(Error::Download {
                    url,
                    message: format!("checksum mismatch: expected {expected}, found {digest}"),
                });
            }
        }

        self.check_interrupt("Cloud SDK extraction")?;
        let staging = install_root.join(".extract");
        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(|source| Error::io(&staging, source))?;
        }
        fs::create_dir_all(&staging).map_err(|source| Error::io(&staging, source))?;
        extract_archive(
            &archive,
            self.platform.archive,
            &staging,
            self.interrupt.as_ref(),
        )?;

        let unpacked = staging.join(SDK_DIR_NAME);
        if !unpacked.is_dir() {
            return Err(Error::Archive {
                path: archive,
                message: format!("archive does not contain a `{SDK_DIR_NAME}` directory"),
            });
        }
        if sdk_home.exists() {
            fs::remove_dir_all(sdk_home).map_err(|source| Error::io(sdk_home, source))?;
        }
        fs::rename(&unpacked, sdk_home).map_err(|source| Error::io(sdk_home, source))?;
        let _ = fs::remove_dir_all(&staging);
        let _ = fs::remove_file(&archive);

        self.check_interrupt("Cloud SDK install script")?;
        progress.start("Installing Cloud SDK", None);
        let installed = self.run_install_script(sdk_home, console);
        progress.done();
        installed?;

        Ok(InstallManifest {
            version: self.version.clone(),
            url: Some(url),
            sha256: Some(digest),
            installed_at: Some(timestamp_seconds()),
        })
    }

    fn fetch(
        &self,
        url: &str,
        install_root: &Path,
        progress: &mut dyn ProgressListener,
    ) -> Result<PathBuf> {
        let partial = install_root.join(format!(
            "{SDK_DIR_NAME}.{}.partial",
            self.platform.archive.extension()
        ));
        let mut start = fs::metadata(&partial).map(|meta| meta.len()).unwrap_or(0);

        let mut request = self.agent.get(url);
        if start > 0 {
            request = request.set("Range", &format!("bytes={start}-"));
        }
        debug!("downloading {url} (resume offset {start})");

        let download_error = |err: ureq::Error| Error::Download {
            url: url.to_string(),
            message: err.to_string(),
        };
        let response = match request.call() {
            Ok(response) => response,
            Err(ureq::Error::Status(416, response)) if start > 0 => {
                if content_range_total(&response) == Some(start) {
                    debug!("{} already holds all of {url}", partial.display());
                    return Ok(partial);
                }
                debug!("discarding unusable partial download {}", partial.display());
                fs::remove_file(&partial).map_err(|source| Error::io(&partial, source))?;
                start = 0;
                self.agent.get(url).call().map_err(download_error)?
            }
            Err(err) => return Err(download_error(err)),
        };
        if start > 0 && response.status() == 200 {
            // Server ignored the Range header.
            start = 0;
        }
        let remaining: Option<u64> = response
            .header("Content-Length")
            .and_then(|value| value.parse().ok());

        progress.start(
            &format!("Downloading {url}"),
            remaining.map(|len| len + start),
        );
        if start > 0 {
            progress.update(start);
        }
        let streamed = stream_to_file(
            response,
            url,
            &partial,
            start > 0,
            progress,
            self.interrupt.as_ref(),
        );
        progress.done();
        streamed?;

        Ok(partial)
    }

    fn run_install_script(&self, sdk_home: &Path, console: &dyn ConsoleListener) -> Result<()> {
        let script = if self.platform.is_windows() {
            "install.bat"
        } else {
            "install.sh"
        };
        let script = sdk_home.join(script);
        let mut env = ambient_environment();
        env.insert("CLOUDSDK_CORE_DISABLE_PROMPTS".to_string(), "1".to_string());

        let invocation = CommandInvocation::new([
            script.to_string_lossy().into_owned(),
            "--path-update=false".to_string(),
            "--command-completion=false".to_string(),
            "--quiet".to_string(),
            "--usage-reporting=false".to_string(),
        ])
        .with_working_dir(Some(sdk_home.to_path_buf()))
        .with_env(Some(env));
        self.runner.run(&invocation, console)
    }

    fn ensure_components(
        &self,
        sdk_home: &Path,
        progress: &mut dyn ProgressListener,
        console: &dyn ConsoleListener,
    ) -> Result<()> {
        let gcloud = gcloud_path(sdk_home);
        for component in REQUIRED_COMPONENTS {
            let state = query_component(&self.caller, &gcloud, component, None)?;
            if state.is_installed() {
                debug!("component {component} already installed");
                continue;
            }
            let installer = SdkComponentInstaller::new(
                gcloud.clone(),
                Arc::clone(&self.runner),
                self.python_copier(&gcloud),
            );
            installer.install_component(component, progress, console)?;
        }
        Ok(())
    }

    fn update_if_stale(
        &self,
        sdk_home: &Path,
        progress: &mut dyn ProgressListener,
        console: &dyn ConsoleListener,
    ) -> Result<()> {
        let gcloud = gcloud_path(sdk_home);
        let program = gcloud.to_string_lossy().into_owned();
        let listing = self.caller.call(&CommandInvocation::new([
            program.as_str(),
            "components",
            "list",
            "--format=json",
        ]))?;
        let stale = parse_listing(&program, &listing)?
            .iter()
            .any(|entry| entry.state() == ComponentState::UpdateAvailable);
        if !stale {
            debug!("managed Cloud SDK is up to date");
            return Ok(());
        }

        progress.start("Updating Cloud SDK", None);
        let updated = self.run_update(&gcloud, &program, console);
        progress.done();
        updated
    }

    fn run_update(&self, gcloud: &Path, program: &str, console: &dyn ConsoleListener) -> Result<()> {
        let env: Option<HashMap<String, String>> = match self.python_copier(gcloud) {
            Some(copier) => Some(copier.copy_python()?),
            None => None,
        };
        let invocation =
            CommandInvocation::new([program, "components", "update", "--quiet"]).with_env(env);
        self.runner.run(&invocation, console)
    }
}

impl SdkDownloader for ManagedSdkDownloader {
    fn download(
        &self,
        progress: &mut dyn ProgressListener,
        console: &dyn ConsoleListener,
    ) -> Result<PathBuf> {
        let install_root = self.install_root()?;
        fs::create_dir_all(&install_root).map_err(|source| Error::io(&install_root, source))?;
        let sdk_home = install_root.join(SDK_DIR_NAME);
        let manifest_path = install_root.join(MANIFEST_FILE);

        let manifest = load_manifest(&manifest_path);
        if manifest.is_complete() && gcloud_path(&sdk_home).is_file() {
            info!("Reusing managed Cloud SDK at {}", sdk_home.display());
        } else {
            info!("Installing managed Cloud SDK into {}", install_root.display());
            let manifest = self.install_fresh(&install_root, &sdk_home, progress, console)?;
            save_manifest(&manifest_path, &manifest)?;
        }

        self.check_interrupt("Cloud SDK component check")?;
        self.ensure_components(&sdk_home, progress, console)?;
        if self.version.is_none() {
            self.update_if_stale(&sdk_home, progress, console)?;
        }
        Ok(sdk_home)
    }
}

impl std::fmt::Debug for ManagedSdkDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedSdkDownloader")
            .field("managed_root", &self.managed_root)
            .field("version", &self.version)
            .field("base_url", &self.base_url)
            .field("platform", &self.platform)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct InstallManifest {
    version: Option<String>,
    url: Option<String>,
    sha256: Option<String>,
    installed_at: Option<u64>,
}

impl InstallManifest {
    fn is_complete(&self) -> bool {
        self.installed_at.is_some()
    }
}

fn load_manifest(path: &Path) -> InstallManifest {
    if let Ok(contents) = fs::read_to_string(path) {
        serde_json::from_str(&contents).unwrap_or_default()
    } else {
        InstallManifest::default()
    }
}

fn save_manifest(path: &Path, manifest: &InstallManifest) -> Result<()> {
    let serialized = serde_json::to_string_pretty(manifest).map_err(|err| {
        Error::io(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidData, err),
        )
    })?;
    fs::write(path, serialized).map_err(|source| Error::io(path, source))
}

fn timestamp_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs()
}

fn compute_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|source| Error::io(path, source))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let bytes = file
            .read(&mut buffer)
            .map_err(|source| Error::io(path, source))?;
        if bytes == 0 {
            break;
        }
        hasher.update(&buffer[..bytes]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn stream_to_file(
    response: ureq::Response,
    url: &str,
    partial: &Path,
    append: bool,
    progress: &mut dyn ProgressListener,
    interrupt: Option<&Interrupt>,
) -> Result<()> {
    let opened = if append {
        OpenOptions::new().append(true).open(partial)
    } else {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(partial)
    };
    let mut file = opened.map_err(|source| Error::io(partial, source))?;

    let mut reader = response.into_reader();
    let mut buffer = [0u8; 8192];
    loop {
        if interrupt.is_some_and(Interrupt::is_raised) {
            return Err(Error::Interrupted {
                program: url.to_string(),
            });
        }
        let bytes = reader.read(&mut buffer).map_err(|err| Error::Download {
            url: url.to_string(),
            message: err.to_string(),
        })?;
        if bytes == 0 {
            return Ok(());
        }
        file.write_all(&buffer[..bytes])
            .map_err(|source| Error::io(partial, source))?;
        progress.update(bytes as u64);
    }
}

/// `bytes */<total>` from a 416 answer.
fn content_range_total(response: &ureq::Response) -> Option<u64> {
    response
        .header("Content-Range")?
        .strip_prefix("bytes */")?
        .trim()
        .parse()
        .ok()
}

fn extract_archive(
    archive: &Path,
    kind: ArchiveKind,
    destination: &Path,
    interrupt: Option<&Interrupt>,
) -> Result<()> {
    let file = File::open(archive).map_err(|source| Error::io(archive, source))?;
    let failed = |message: String| Error::Archive {
        path: archive.to_path_buf(),
        message,
    };
    match kind {
        ArchiveKind::TarGz => {
            let mut tarball = tar::Archive::new(GzDecoder::new(file));
            let entries = tarball.entries().map_err(|err| failed(err.to_string()))?;
            for entry in entries {
                if interrupt.is_some_and(Interrupt::is_raised) {
                    return Err(Error::Interrupted {
                        program: format!("extraction of {}", archive.display()),
                    });
                }
                let mut entry = entry.map_err(|err| failed(err.to_string()))?;
                entry
                    .unpack_in(destination)
                    .map_err(|err| failed(err.to_string()))?;
            }
            Ok(())
        }
        ArchiveKind::Zip => zip::ZipArchive::new(file)
            .and_then(|mut zip| zip.extract(destination))
            .map_err(|err| failed(err.to_string())),
    }
}
