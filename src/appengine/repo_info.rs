use crate::config::GenRepoInfoConfig;
use crate::error::Result;

use super::CloudSdk;
use super::args::Args;

/// Writes `source-context.json` for the debugger via
/// `gcloud beta debug source gen-repo-info-file`.
#[derive(Debug, Clone)]
pub struct GenRepoInfoFile {
    sdk: CloudSdk,
}

impl GenRepoInfoFile {
    pub(crate) fn new(sdk: CloudSdk) -> Self {
        Self { sdk }
    }

    pub fn generate(&self, config: &GenRepoInfoConfig) -> Result<()> {
        let mut args = Args::new();
        args.extend(["beta", "debug", "source", "gen-repo-info-file"]);
        args.path("output-directory", config.output_directory.as_deref());
        args.path("source-directory", config.source_directory.as_deref());
        self.sdk
            .run(&self.sdk.gcloud_invocation(args.into_vec()))
    }
}
