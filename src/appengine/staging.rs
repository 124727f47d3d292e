use crate::config::StageConfig;
use crate::core::process::CommandInvocation;
use crate::error::{Error, Result};
use crate::managed::InstalledSdkChecker;

use super::CloudSdk;
use super::args::Args;

const APP_CFG_MAIN: &str = "com.google.appengine.tools.admin.AppCfg";

/// Stages an exploded WAR for App Engine standard with AppCfg.
#[derive(Debug, Clone)]
pub struct StandardStaging {
    sdk: CloudSdk,
}

impl StandardStaging {
    pub(crate) fn new(sdk: CloudSdk) -> Self {
        Self { sdk }
    }

    pub fn stage(&self, config: &StageConfig) -> Result<()> {
        let invocation = self.invocation(config)?;
        self.sdk.run(&invocation)
    }

    fn invocation(&self, config: &StageConfig) -> Result<CommandInvocation> {
        let source = config
            .source_directory
            .as_deref()
            .ok_or(Error::MissingArgument {
                name: "stage.source_directory",
            })?;
        let staging = config
            .staging_directory
            .as_deref()
            .ok_or(Error::MissingArgument {
                name: "stage.staging_directory",
            })?;
        let installation = self.sdk.installation();
        InstalledSdkChecker::new().check_app_engine_java(installation)?;

        let mut args = Args::new();
        args.positional(self.sdk.java());
        args.positional("-classpath");
        args.positional_path(&installation.tools_jar());
        args.positional(APP_CFG_MAIN);
        args.flag("enable_quickstart", config.enable_quickstart);
        args.flag("disable_update_check", config.disable_update_check);
        args.flag("enable_jar_splitting", config.enable_jar_splitting);
        args.value("jar_splitting_excludes", config.jar_splitting_excludes.as_deref());
        args.value("compile_encoding", config.compile_encoding.as_deref());
        args.flag("delete_jsps", config.delete_jsps);
        args.flag("enable_jar_classes", config.enable_jar_classes);
        args.flag("disable_jar_jsps", config.disable_jar_jsps);
        args.value("runtime", config.runtime.as_deref());
        args.positional("stage");
        args.positional_path(source);
        args.positional_path(staging);

        Ok(CommandInvocation::new(args.into_vec()))
    }
}
