use std::process::ExitCode;

use crate::Error;

pub fn exit_code(err: &Error) -> ExitCode {
    match err {
        Error::ReadConfig { .. } => ExitCode::from(74),
        Error::ParseConfig { .. } => ExitCode::from(65),
        Error::InvalidConfig { .. } => ExitCode::from(65),
        Error::ExplicitConfigMissing { .. } => ExitCode::from(66),
        Error::ConfigDiscoveryFailed { .. } => ExitCode::from(66),
        Error::WorkingDirectoryUnavailable { .. } => ExitCode::from(70),
        Error::MissingArgument { .. } => ExitCode::from(64),
        Error::UnsupportedDevServerVersion { .. } => ExitCode::from(65),
        Error::SdkNotFound { .. } => ExitCode::from(66),
        Error::SdkVersionUnreadable { .. } => ExitCode::from(74),
        Error::InvalidSdkVersion { .. } => ExitCode::from(65),
        Error::SdkVersionMismatch { .. } => ExitCode::from(65),
        Error::MissingComponent { .. } => ExitCode::from(66),
        Error::MissingFile { .. } => ExitCode::from(66),
        Error::Spawn { .. } => ExitCode::from(70),
        Error::StreamIo { .. } => ExitCode::from(74),
        Error::Interrupted { .. } => ExitCode::from(70),
        Error::Terminated { .. } => ExitCode::from(70),
        Error::StartTimeout { .. } => ExitCode::from(70),
        Error::ExitedBeforeReady { .. } => ExitCode::from(70),
        Error::Download { .. } => ExitCode::from(70),
        Error::Archive { .. } => ExitCode::from(70),
        Error::Io { .. } => ExitCode::from(74),
        Error::UnexpectedOutput { .. } => ExitCode::from(70),
        Error::StopRequest { .. } => ExitCode::from(70),
        Error::NonZeroExit { .. } => ExitCode::from(70),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn exit_code_matches_expected_values() {
        assert_eq!(
            exit_code(&Error::ReadConfig {
                path: "appengine.toml".into(),
                source: io::Error::new(io::ErrorKind::Other, "err")
            }),
            ExitCode::from(74)
        );
        assert_eq!(
            exit_code(&Error::ParseConfig {
                path: "appengine.toml".into(),
                source: toml::from_str::<toml::Value>("invalid").unwrap_err()
            }),
            ExitCode::from(65)
        );
        assert_eq!(
            exit_code(&Error::ConfigDiscoveryFailed {
                search_root: "root".into()
            }),
            ExitCode::from(66)
        );
        assert_eq!(
            exit_code(&Error::MissingArgument {
                name: "run.services"
            }),
            ExitCode::from(64)
        );
        assert_eq!(
            exit_code(&Error::UnsupportedDevServerVersion {
                value: "3".into()
            }),
            ExitCode::from(65)
        );
        assert_eq!(
            exit_code(&Error::SdkVersionMismatch {
                expected: "190.0.0".into(),
                installed: "191.0.0".into()
            }),
            ExitCode::from(65)
        );
        assert_eq!(
            exit_code(&Error::Spawn {
                program: "gcloud".into(),
                source: io::Error::new(io::ErrorKind::NotFound, "missing")
            }),
            ExitCode::from(70)
        );
        assert_eq!(
            exit_code(&Error::NonZeroExit {
                program: "gcloud".into(),
                code: 2
            }),
            ExitCode::from(70)
        );
        assert_eq!(
            exit_code(&Error::Io {
                path: "manifest.json".into(),
                source: io::Error::new(io::ErrorKind::Other, "err")
            }),
            ExitCode::from(74)
        );
    }
}
