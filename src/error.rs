use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of a failure, used by callers to tell bad settings,
/// infrastructure trouble and tool-reported failures apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Invalid or contradictory settings detected before any process was spawned.
    Configuration,
    /// The process could not be spawned, streamed, or waited on.
    Execution,
    /// The process ran to completion but its exit code was rejected.
    NonZeroExit,
}

impl FaultKind {
    pub fn describe(self) -> &'static str {
        match self {
            FaultKind::Configuration => "configuration fault",
            FaultKind::Execution => "execution fault",
            FaultKind::NonZeroExit => "non-zero exit",
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read configuration file at {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Configuration at {path} could not be parsed: {source}")]
    ParseConfig {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Configuration at {path} is invalid: {message}")]
    InvalidConfig { path: PathBuf, message: String },
    #[error("The configuration path {path} does not exist or is not readable.")]
    ExplicitConfigMissing { path: PathBuf },
    #[error(
        "No appengine.toml found while searching upward from {search_root}. \
         Provide a path with --config."
    )]
    ConfigDiscoveryFailed { search_root: PathBuf },
    #[error("Failed to determine the current working directory: {source}")]
    WorkingDirectoryUnavailable {
        #[source]
        source: std::io::Error,
    },
    #[error("Missing required setting `{name}`.")]
    MissingArgument { name: &'static str },
    #[error("Unsupported dev server version: `{value}`. Supported values are \"1\" and \"2-alpha\".")]
    UnsupportedDevServerVersion { value: String },
    #[error("No Cloud SDK found at {path} (expected {path}/bin/gcloud).")]
    SdkNotFound { path: PathBuf },
    #[error("Failed to read Cloud SDK version file {path}: {source}")]
    SdkVersionUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("`{value}` is not a valid Cloud SDK version: {source}")]
    InvalidSdkVersion {
        value: String,
        #[source]
        source: semver::Error,
    },
    #[error(
        "Specified Cloud SDK version ({expected}) does not match installed version ({installed})."
    )]
    SdkVersionMismatch { expected: String, installed: String },
    #[error("Cloud SDK component `{component}` is not installed (missing {path}).")]
    MissingComponent { component: String, path: PathBuf },
    #[error("Required file {path} does not exist.")]
    MissingFile { path: PathBuf },

    #[error("Failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error while streaming output of `{program}`: {source}")]
    StreamIo {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{program}` was interrupted before it finished.")]
    Interrupted { program: String },
    #[error("`{program}` was terminated by a signal.")]
    Terminated { program: String },
    #[error("Timed out after {timeout_secs}s waiting for `{program}` to report readiness.")]
    StartTimeout { program: String, timeout_secs: u64 },
    #[error("`{program}` exited before reporting readiness.")]
    ExitedBeforeReady { program: String },
    #[error("Failed to download {url}: {message}")]
    Download { url: String, message: String },
    #[error("Failed to unpack {path}: {message}")]
    Archive { path: PathBuf, message: String },
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unexpected output from `{program}`: {message}")]
    UnexpectedOutput { program: String, message: String },
    #[error("Failed to send stop request to {url}: {message}")]
    StopRequest { url: String, message: String },

    #[error("`{program}` exited with code {code}.")]
    NonZeroExit { program: String, code: i32 },
}

impl Error {
    pub fn kind(&self) -> FaultKind {
        match self {
            Error::ReadConfig { .. }
            | Error::ParseConfig { .. }
            | Error::InvalidConfig { .. }
            | Error::ExplicitConfigMissing { .. }
            | Error::ConfigDiscoveryFailed { .. }
            | Error::WorkingDirectoryUnavailable { .. }
            | Error::MissingArgument { .. }
            | Error::UnsupportedDevServerVersion { .. }
            | Error::SdkNotFound { .. }
            | Error::SdkVersionUnreadable { .. }
            | Error::InvalidSdkVersion { .. }
            | Error::SdkVersionMismatch { .. }
            | Error::MissingComponent { .. }
            | Error::MissingFile { .. } => FaultKind::Configuration,
            Error::Spawn { .. }
            | Error::StreamIo { .. }
            | Error::Interrupted { .. }
            | Error::Terminated { .. }
            | Error::StartTimeout { .. }
            | Error::ExitedBeforeReady { .. }
            | Error::Download { .. }
            | Error::Archive { .. }
            | Error::Io { .. }
            | Error::UnexpectedOutput { .. }
            | Error::StopRequest { .. } => FaultKind::Execution,
            Error::NonZeroExit { .. } => FaultKind::NonZeroExit,
        }
    }

    /// Raw exit code for non-zero exit failures.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Error::NonZeroExit { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
