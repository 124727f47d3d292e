use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cloudsdk::appengine::{AppEngineFactory, Collaborators};
use cloudsdk::core::{CommandInvocation, CommandRunner, ConsoleListener, ProgressListener};
use cloudsdk::{
    BundledPythonCopier, PluginConfig, Result, SdkChecker, SdkComponent, SdkComponentInstaller,
    SdkDownloader,
};

/// Records every call in one shared log so ordering across fakes is visible.
#[derive(Default)]
struct Journal(Mutex<Vec<String>>);

impl Journal {
    fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

struct FakeRunner {
    journal: Arc<Journal>,
    invocations: Mutex<Vec<CommandInvocation>>,
}

impl FakeRunner {
    fn new(journal: Arc<Journal>) -> Self {
        Self {
            journal,
            invocations: Mutex::new(Vec::new()),
        }
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, invocation: &CommandInvocation, _console: &dyn ConsoleListener) -> Result<()> {
        self.journal.push(format!("run:{}", invocation.args().join(" ")));
        self.invocations.lock().unwrap().push(invocation.clone());
        Ok(())
    }

    fn run_until_ready(
        &self,
        invocation: &CommandInvocation,
        _console: Arc<dyn ConsoleListener>,
        _ready: &str,
        _timeout: Duration,
    ) -> Result<u32> {
        self.journal.push(format!("start:{}", invocation.args().join(" ")));
        Ok(1)
    }
}

#[derive(Default)]
struct CountingProgress {
    starts: Vec<(String, Option<u64>)>,
    dones: usize,
}

impl ProgressListener for CountingProgress {
    fn start(&mut self, message: &str, total: Option<u64>) {
        self.starts.push((message.to_string(), total));
    }

    fn update(&mut self, _units: u64) {}

    fn done(&mut self) {
        self.dones += 1;
    }
}

struct PythonHome;

impl BundledPythonCopier for PythonHome {
    fn copy_python(&self) -> Result<HashMap<String, String>> {
        Ok(HashMap::from([(
            "PYTHONHOME".to_string(),
            "/tmp/env".to_string(),
        )]))
    }
}

#[test]
fn every_component_installs_with_the_same_command_shape() {
    for component in SdkComponent::ALL {
        let runner = Arc::new(FakeRunner::new(Arc::default()));
        let installer = SdkComponentInstaller::new("/opt/sdk/bin/gcloud", runner.clone(), None);
        let mut progress = CountingProgress::default();

        installer
            .install_component(component, &mut progress, &())
            .unwrap();

        let invocations = runner.invocations.lock().unwrap();
        assert_eq!(invocations.len(), 1, "{component}");
        assert_eq!(
            invocations[0].args(),
            [
                "/opt/sdk/bin/gcloud",
                "components",
                "install",
                component.name(),
                "--quiet"
            ]
        );
        assert!(invocations[0].env().is_none());
        assert_eq!(progress.starts, [(format!("Installing {component}"), None)]);
        assert_eq!(progress.dones, 1);
    }
}

#[test]
fn python_copier_overlay_is_passed_verbatim() {
    let runner = Arc::new(FakeRunner::new(Arc::default()));
    let installer =
        SdkComponentInstaller::new("/opt/sdk/bin/gcloud", runner.clone(), Some(Arc::new(PythonHome)));

    installer
        .install_component(SdkComponent::AppEngineJava, &mut CountingProgress::default(), &())
        .unwrap();

    let invocations = runner.invocations.lock().unwrap();
    assert_eq!(
        invocations[0].args(),
        ["/opt/sdk/bin/gcloud", "components", "install", "app-engine-java", "--quiet"]
    );
    assert_eq!(
        invocations[0].env(),
        Some(&HashMap::from([(
            "PYTHONHOME".to_string(),
            "/tmp/env".to_string()
        )]))
    );
}

struct JournalDownloader {
    journal: Arc<Journal>,
    calls: Arc<AtomicUsize>,
}

impl SdkDownloader for JournalDownloader {
    fn download(
        &self,
        _progress: &mut dyn ProgressListener,
        _console: &dyn ConsoleListener,
    ) -> Result<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.journal.push("download");
        Ok(PathBuf::from("/downloaded/google-cloud-sdk"))
    }
}

struct UnusedChecker;

impl SdkChecker for UnusedChecker {
    fn check(&self, _home: &Path, _version: &str) -> Result<()> {
        panic!("nothing is pinned")
    }
}

#[cfg(not(windows))]
#[test]
fn unset_home_downloads_once_before_any_command() {
    let journal = Arc::new(Journal::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let runner = Arc::new(FakeRunner::new(Arc::clone(&journal)));
    let factory = AppEngineFactory::with_collaborators(
        &PluginConfig::default(),
        Collaborators {
            runner: runner.clone(),
            console: Arc::new(()),
            downloader: Box::new(JournalDownloader {
                journal: Arc::clone(&journal),
                calls: Arc::clone(&calls),
            }),
            checker: Box::new(UnusedChecker),
            interrupt: None,
        },
        &mut (),
    )
    .unwrap();

    let installer = factory.component_installer();
    installer
        .install_component(SdkComponent::AppEngineJava, &mut (), &())
        .unwrap();
    installer
        .install_component(SdkComponent::Beta, &mut (), &())
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let entries = journal.entries();
    assert_eq!(entries[0], "download");
    assert_eq!(entries.len(), 3);
    for entry in &entries[1..] {
        assert!(
            entry.starts_with("run:/downloaded/google-cloud-sdk/bin/"),
            "{entry}"
        );
    }
}
