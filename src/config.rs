use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

pub const CONFIG_FILE_NAME: &str = "appengine.toml";

/// Default wait, in seconds, for an asynchronously started dev server.
pub const DEFAULT_START_SUCCESS_TIMEOUT_SECS: u64 = 30;

/// Where to source the configuration from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Search for `appengine.toml` by walking up from a directory.
    Discover,
    /// Use an explicit path to the configuration file.
    Explicit(PathBuf),
}

/// Fully loaded configuration file.
#[derive(Debug, Clone, Default)]
pub struct PluginConfig {
    pub file_path: PathBuf,
    pub project: ProjectInfo,
    pub sdk: SdkSettings,
    pub stage: StageConfig,
    pub deploy: DeployConfig,
    pub run: RunConfig,
    pub repo_info: GenRepoInfoConfig,
    /// Non-fatal findings such as unknown keys or deprecated settings.
    pub warnings: Vec<String>,
}

/// Identity of the application, reported to the SDK as metrics environment.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProjectInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

/// How the SDK installation is located.
#[derive(Debug, Clone, Default)]
pub struct SdkSettings {
    /// SDK root. When unset a managed SDK is downloaded.
    pub home: Option<PathBuf>,
    /// Deprecated spelling of `home`; see [`SdkSettings::handle_path_deprecation`].
    pub deprecated_path: Option<PathBuf>,
    /// Version the installation must report. Also selects the release to
    /// download when no home is set.
    pub version: Option<String>,
    /// Override for the download base URL (defaults to the public channel).
    pub download_url: Option<String>,
    /// Expected sha256 of the downloaded archive.
    pub sha256: Option<String>,
    /// Override for the directory holding managed SDK downloads.
    pub managed_root: Option<PathBuf>,
}

impl SdkSettings {
    /// Routes the deprecated `path` setting to `home`.
    ///
    /// Returns the warning to surface the first time a deprecated value is
    /// found; later calls return `None`. An explicit `home` wins over `path`.
    pub fn handle_path_deprecation(&mut self) -> Option<String> {
        let path = self.deprecated_path.take()?;
        let message = if self.home.is_some() {
            format!(
                "`sdk.path` is deprecated and ignored in favor of `sdk.home`; remove `path = \"{}\"`.",
                path.display()
            )
        } else {
            let message = format!(
                "`sdk.path` is deprecated; use `sdk.home = \"{}\"` instead.",
                path.display()
            );
            self.home = Some(path);
            message
        };
        Some(message)
    }
}

/// Parameters for App Engine standard staging. Every optional field maps to
/// at most one flag and defaults to the SDK's own default when unset.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Exploded WAR directory to stage. Required.
    pub source_directory: Option<PathBuf>,
    /// Output directory. Required.
    pub staging_directory: Option<PathBuf>,
    pub enable_quickstart: Option<bool>,
    pub disable_update_check: Option<bool>,
    pub enable_jar_splitting: Option<bool>,
    pub jar_splitting_excludes: Option<String>,
    pub compile_encoding: Option<String>,
    pub delete_jsps: Option<bool>,
    pub enable_jar_classes: Option<bool>,
    pub disable_jar_jsps: Option<bool>,
    pub runtime: Option<String>,
}

/// Parameters for `gcloud app deploy`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Directory holding `cron.yaml`, `dispatch.yaml` and friends.
    pub app_engine_directory: Option<PathBuf>,
    pub bucket: Option<String>,
    /// Descriptors to deploy; at least one is required for `deploy`.
    pub deployables: Vec<PathBuf>,
    pub image_url: Option<String>,
    pub project: Option<String>,
    /// `None` leaves the SDK default (promote).
    pub promote: Option<bool>,
    pub server: Option<String>,
    pub stop_previous_version: Option<bool>,
    pub version: Option<String>,
}

/// Parameters for the local development server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Application directories or descriptors. At least one is required.
    pub services: Vec<PathBuf>,
    /// `"1"` (default) or `"2-alpha"`.
    pub devserver_version: String,
    /// Seconds to wait for readiness when starting asynchronously.
    pub start_success_timeout: u64,
    pub host: Option<String>,
    pub port: Option<u16>,
    /// 2-alpha only.
    pub admin_host: Option<String>,
    /// 2-alpha only.
    pub admin_port: Option<u16>,
    pub auth_domain: Option<String>,
    pub storage_path: Option<PathBuf>,
    pub datastore_path: Option<PathBuf>,
    pub log_level: Option<String>,
    pub max_module_instances: Option<u32>,
    pub use_mtime_file_watcher: Option<bool>,
    pub threadsafe_override: Option<String>,
    pub python_startup_script: Option<String>,
    pub python_startup_args: Option<String>,
    pub jvm_flags: Vec<String>,
    pub custom_entrypoint: Option<String>,
    pub runtime: Option<String>,
    pub allow_skipped_files: Option<bool>,
    pub api_port: Option<u16>,
    pub automatic_restart: Option<bool>,
    pub dev_appserver_log_level: Option<String>,
    pub skip_sdk_update_check: Option<bool>,
    pub default_gcs_bucket_name: Option<String>,
    pub clear_datastore: Option<bool>,
    /// Extra variables for the dev server process, layered over the ambient environment.
    pub environment: BTreeMap<String, String>,
    /// Passed through verbatim after all other flags.
    pub additional_arguments: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            services: Vec::new(),
            devserver_version: "1".to_string(),
            start_success_timeout: DEFAULT_START_SUCCESS_TIMEOUT_SECS,
            host: None,
            port: None,
            admin_host: None,
            admin_port: None,
            auth_domain: None,
            storage_path: None,
            datastore_path: None,
            log_level: None,
            max_module_instances: None,
            use_mtime_file_watcher: None,
            threadsafe_override: None,
            python_startup_script: None,
            python_startup_args: None,
            jvm_flags: Vec::new(),
            custom_entrypoint: None,
            runtime: None,
            allow_skipped_files: None,
            api_port: None,
            automatic_restart: None,
            dev_appserver_log_level: None,
            skip_sdk_update_check: None,
            default_gcs_bucket_name: None,
            clear_datastore: None,
            environment: BTreeMap::new(),
            additional_arguments: Vec::new(),
        }
    }
}

/// Parameters for source-context generation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GenRepoInfoConfig {
    pub output_directory: Option<PathBuf>,
    pub source_directory: Option<PathBuf>,
}

pub fn load_plugin_config(path: &Path) -> Result<PluginConfig> {
    let contents = fs::read_to_string(path).map_err(|source| Error::ReadConfig {
        path: path.to_path_buf(),
        source,
    })?;

    let value: toml::Value = toml::from_str(&contents).map_err(|source| Error::ParseConfig {
        path: path.to_path_buf(),
        source,
    })?;

    let mut warnings = detect_unknown_fields(&value);

    let raw = RawConfig::deserialize(value).map_err(|source| Error::ParseConfig {
        path: path.to_path_buf(),
        source,
    })?;

    raw.into_validated(path, &mut warnings)
}

/// Locate the configuration file for `source`, walking upward from
/// `search_root` (or the current directory) when discovering.
pub fn resolve_config_path(source: &ConfigSource, search_root: Option<&Path>) -> Result<PathBuf> {
    match source {
        ConfigSource::Explicit(path) => {
            if path.is_file() {
                Ok(path.clone())
            } else {
                Err(Error::ExplicitConfigMissing { path: path.clone() })
            }
        }
        ConfigSource::Discover => {
            let cwd = match search_root {
                Some(root) => root.to_path_buf(),
                None => std::env::current_dir()
                    .map_err(|source| Error::WorkingDirectoryUnavailable { source })?,
            };
            discover_config(&cwd).ok_or(Error::ConfigDiscoveryFailed { search_root: cwd })
        }
    }
}

fn discover_config(start: &Path) -> Option<PathBuf> {
    let mut cursor = Some(start.to_path_buf());
    while let Some(dir) = cursor {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        cursor = dir.parent().map(Path::to_path_buf);
    }
    None
}

pub(crate) fn user_home_dir() -> Option<PathBuf> {
    if let Some(home) = std::env::var_os("HOME") {
        if !home.is_empty() {
            return Some(PathBuf::from(home));
        }
    }

    #[cfg(windows)]
    {
        if let Some(profile) = std::env::var_os("USERPROFILE") {
            if !profile.is_empty() {
                return Some(PathBuf::from(profile));
            }
        }
    }

    None
}

fn invalid_config(path: &Path, message: impl Into<String>) -> Error {
    Error::InvalidConfig {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

const STAGE_KEYS: &[&str] = &[
    "source_directory",
    "staging_directory",
    "enable_quickstart",
    "disable_update_check",
    "enable_jar_splitting",
    "jar_splitting_excludes",
    "compile_encoding",
    "delete_jsps",
    "enable_jar_classes",
    "disable_jar_jsps",
    "runtime",
];

const DEPLOY_KEYS: &[&str] = &[
    "app_engine_directory",
    "bucket",
    "deployables",
    "image_url",
    "project",
    "promote",
    "server",
    "stop_previous_version",
    "version",
];

const RUN_KEYS: &[&str] = &[
    "services",
    "devserver_version",
    "start_success_timeout",
    "host",
    "port",
    "admin_host",
    "admin_port",
    "auth_domain",
    "storage_path",
    "datastore_path",
    "log_level",
    "max_module_instances",
    "use_mtime_file_watcher",
    "threadsafe_override",
    "python_startup_script",
    "python_startup_args",
    "jvm_flags",
    "custom_entrypoint",
    "runtime",
    "allow_skipped_files",
    "api_port",
    "automatic_restart",
    "dev_appserver_log_level",
    "skip_sdk_update_check",
    "default_gcs_bucket_name",
    "clear_datastore",
    "environment",
    "additional_arguments",
];

fn detect_unknown_fields(value: &toml::Value) -> Vec<String> {
    let mut warnings = Vec::new();
    let allowed_root = ["project", "sdk", "stage", "deploy", "run", "repo_info"];
    let sections: [(&str, &[&str]); 6] = [
        ("project", &["name", "version"]),
        (
            "sdk",
            &[
                "home",
                "path",
                "version",
                "download_url",
                "sha256",
                "managed_root",
            ],
        ),
        ("stage", STAGE_KEYS),
        ("deploy", DEPLOY_KEYS),
        ("run", RUN_KEYS),
        ("repo_info", &["output_directory", "source_directory"]),
    ];

    if let toml::Value::Table(table) = value {
        warn_table(table, &allowed_root, "root", &mut warnings);

        for (name, keys) in sections {
            match table.get(name) {
                Some(toml::Value::Table(section)) => {
                    warn_table(section, keys, &format!("[{name}]"), &mut warnings)
                }
                Some(_) => warnings.push(format!("Expected [{name}] to be a table.")),
                None => {}
            }
        }
    }

    warnings
}

fn warn_table(
    table: &toml::map::Map<String, toml::Value>,
    allowed: &[&str],
    context: &str,
    warnings: &mut Vec<String>,
) {
    for key in table.keys() {
        if !allowed.contains(&key.as_str()) {
            warnings.push(format!(
                "Unknown field `{key}` at {context}; this value will be ignored."
            ));
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    project: ProjectInfo,
    sdk: RawSdk,
    stage: StageConfig,
    deploy: DeployConfig,
    run: RunConfig,
    repo_info: GenRepoInfoConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSdk {
    home: Option<PathBuf>,
    path: Option<PathBuf>,
    version: Option<String>,
    download_url: Option<String>,
    sha256: Option<String>,
    managed_root: Option<PathBuf>,
}

impl RawConfig {
    fn into_validated(self, path: &Path, warnings: &mut Vec<String>) -> Result<PluginConfig> {
        let base = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let RawConfig {
            project,
            sdk,
            mut stage,
            mut deploy,
            mut run,
            mut repo_info,
        } = self;

        let mut sdk = SdkSettings {
            home: sdk.home.map(|home| resolve_path(&base, home)),
            deprecated_path: sdk.path.map(|legacy| resolve_path(&base, legacy)),
            version: sdk.version,
            download_url: sdk.download_url,
            sha256: sdk.sha256,
            managed_root: sdk.managed_root.map(|root| resolve_path(&base, root)),
        };
        if let Some(warning) = sdk.handle_path_deprecation() {
            warnings.push(warning);
        }

        if let Some(version) = &sdk.version {
            if version.trim().is_empty() {
                return Err(invalid_config(path, "`sdk.version` cannot be empty."));
            }
        }
        if let Some(sum) = &sdk.sha256 {
            if sum.len() != 64 || !sum.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(invalid_config(
                    path,
                    format!("`sdk.sha256` must be 64 hex characters, found `{sum}`."),
                ));
            }
        }

        if run.start_success_timeout == 0 {
            return Err(invalid_config(
                path,
                "`run.start_success_timeout` must be at least 1 second.",
            ));
        }

        resolve_opt(&base, &mut stage.source_directory);
        resolve_opt(&base, &mut stage.staging_directory);

        resolve_opt(&base, &mut deploy.app_engine_directory);
        resolve_all(&base, &mut deploy.deployables);

        resolve_all(&base, &mut run.services);
        resolve_opt(&base, &mut run.storage_path);
        resolve_opt(&base, &mut run.datastore_path);

        resolve_opt(&base, &mut repo_info.output_directory);
        resolve_opt(&base, &mut repo_info.source_directory);

        Ok(PluginConfig {
            file_path: path.to_path_buf(),
            project,
            sdk,
            stage,
            deploy,
            run,
            repo_info,
            warnings: warnings.clone(),
        })
    }
}

fn resolve_path(base: &Path, input: PathBuf) -> PathBuf {
    if input.is_absolute() {
        input
    } else {
        base.join(input)
    }
}

fn resolve_opt(base: &Path, value: &mut Option<PathBuf>) {
    if let Some(path) = value.take() {
        *value = Some(resolve_path(base, path));
    }
}

fn resolve_all(base: &Path, values: &mut Vec<PathBuf>) {
    for value in values.iter_mut() {
        *value = resolve_path(base, std::mem::take(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use temp_env::with_var;

    fn write_config(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join(CONFIG_FILE_NAME);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn load_resolves_relative_paths_against_config_dir() {
        let dir = tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
[project]
name = "guestbook"
version = "1.0"

[sdk]
home = "sdk"
version = "190.0.0"

[deploy]
deployables = ["target/app.yaml"]
promote = false

[run]
services = ["target/exploded"]
port = 9090
"#,
        );

        let config = load_plugin_config(&path).unwrap();
        assert_eq!(config.sdk.home, Some(dir.path().join("sdk")));
        assert_eq!(config.sdk.version.as_deref(), Some("190.0.0"));
        assert_eq!(config.deploy.deployables, vec![dir.path().join("target/app.yaml")]);
        assert_eq!(config.deploy.promote, Some(false));
        assert_eq!(config.run.services, vec![dir.path().join("target/exploded")]);
        assert_eq!(config.run.port, Some(9090));
        assert_eq!(config.run.devserver_version, "1");
        assert_eq!(
            config.run.start_success_timeout,
            DEFAULT_START_SUCCESS_TIMEOUT_SECS
        );
        assert_eq!(config.project.name.as_deref(), Some("guestbook"));
        assert!(config.warnings.is_empty());
    }

    #[test]
    fn deprecated_sdk_path_is_routed_to_home_with_warning() {
        let dir = tempdir().unwrap();
        let path = write_config(dir.path(), "[sdk]\npath = \"/opt/google-cloud-sdk\"\n");

        let mut config = load_plugin_config(&path).unwrap();
        assert_eq!(
            config.sdk.home,
            Some(PathBuf::from("/opt/google-cloud-sdk"))
        );
        assert_eq!(config.warnings.len(), 1);
        assert!(config.warnings[0].contains("deprecated"));
        assert!(config.sdk.handle_path_deprecation().is_none());
    }

    #[test]
    fn explicit_home_wins_over_deprecated_path() {
        let mut settings = SdkSettings {
            home: Some(PathBuf::from("/canonical")),
            deprecated_path: Some(PathBuf::from("/legacy")),
            ..SdkSettings::default()
        };
        let warning = settings.handle_path_deprecation().expect("warning");
        assert!(warning.contains("ignored"));
        assert_eq!(settings.home, Some(PathBuf::from("/canonical")));
    }

    #[test]
    fn unknown_fields_produce_warnings() {
        let dir = tempdir().unwrap();
        let path = write_config(
            dir.path(),
            "colour = \"blue\"\n[deploy]\nbucket = \"b\"\nflavour = 1\n",
        );
        let config = load_plugin_config(&path).unwrap();
        assert_eq!(config.warnings.len(), 2);
        assert!(config.warnings.iter().any(|w| w.contains("`colour` at root")));
        assert!(config.warnings.iter().any(|w| w.contains("`flavour` at [deploy]")));
    }

    #[test]
    fn invalid_checksum_is_rejected() {
        let dir = tempdir().unwrap();
        let path = write_config(dir.path(), "[sdk]\nsha256 = \"abc\"\n");
        let err = load_plugin_config(&path).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[test]
    fn parse_errors_carry_the_path() {
        let dir = tempdir().unwrap();
        let path = write_config(dir.path(), "[run\n");
        let err = load_plugin_config(&path).unwrap_err();
        match err {
            Error::ParseConfig { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn discovery_walks_up_to_parent_directories() {
        let dir = tempdir().unwrap();
        let path = write_config(dir.path(), "");
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        let found = resolve_config_path(&ConfigSource::Discover, Some(&nested)).unwrap();
        assert_eq!(found, path);
    }

    #[test]
    fn explicit_missing_config_is_reported() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = resolve_config_path(&ConfigSource::Explicit(missing.clone()), None).unwrap_err();
        assert!(matches!(err, Error::ExplicitConfigMissing { path } if path == missing));
    }

    #[test]
    fn user_home_dir_respects_env() {
        let home = tempdir().unwrap();
        with_var("HOME", Some(home.path().to_str().unwrap()), || {
            let detected = user_home_dir().expect("home should be detected");
            assert_eq!(detected, home.path());
        });
    }
}
