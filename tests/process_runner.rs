#![cfg(unix)]

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use cloudsdk::Error;
use cloudsdk::core::{
    AllowedExitCodes, CommandCaller, CommandInvocation, CommandRunner, ConsoleListener, Interrupt,
    ProcessCommandRunner,
};
use tempfile::TempDir;

#[derive(Default)]
struct CollectingConsole {
    lines: Mutex<Vec<String>>,
}

impl CollectingConsole {
    fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl ConsoleListener for CollectingConsole {
    fn on_output_line(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}

fn stub_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

fn invocation(script: &Path, args: &[&str]) -> CommandInvocation {
    let mut argv = vec![script.to_string_lossy().into_owned()];
    argv.extend(args.iter().map(|arg| arg.to_string()));
    CommandInvocation::new(argv)
}

#[test]
fn streams_lines_in_order() {
    let dir = TempDir::new().unwrap();
    let script = stub_script(dir.path(), "lines.sh", "echo a\necho b\necho c");
    let console = CollectingConsole::default();

    ProcessCommandRunner::new()
        .run(&invocation(&script, &[]), &console)
        .unwrap();

    assert_eq!(console.lines(), ["a", "b", "c"]);
}

#[test]
fn stderr_lines_reach_the_console() {
    let dir = TempDir::new().unwrap();
    let script = stub_script(dir.path(), "stderr.sh", "echo oops >&2");
    let console = CollectingConsole::default();

    ProcessCommandRunner::new()
        .run(&invocation(&script, &[]), &console)
        .unwrap();

    assert_eq!(console.lines(), ["oops"]);
}

#[test]
fn non_zero_exit_reports_code() {
    let dir = TempDir::new().unwrap();
    let script = stub_script(dir.path(), "fail.sh", "echo failing\nexit 1");
    let console = CollectingConsole::default();

    let err = ProcessCommandRunner::new()
        .run(&invocation(&script, &[]), &console)
        .unwrap_err();

    assert!(matches!(err, Error::NonZeroExit { code: 1, .. }), "{err:?}");
    assert_eq!(console.lines(), ["failing"]);
}

#[test]
fn allowed_exit_codes_are_tolerated() {
    let dir = TempDir::new().unwrap();
    let script = stub_script(dir.path(), "three.sh", "exit 3");

    ProcessCommandRunner::new()
        .with_exit_listener(AllowedExitCodes::new([3]))
        .run(&invocation(&script, &[]), &())
        .unwrap();
}

#[test]
fn missing_executable_fails_to_spawn() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("does-not-exist");

    let err = ProcessCommandRunner::new()
        .run(&invocation(&missing, &[]), &())
        .unwrap_err();

    assert!(matches!(err, Error::Spawn { .. }), "{err:?}");
}

#[test]
fn environment_overlay_replaces_ambient_environment() {
    let dir = TempDir::new().unwrap();
    let script = stub_script(
        dir.path(),
        "env.sh",
        "echo \"overlay=$OVERLAY_VALUE\"\necho \"home=${HOME:-unset}\"",
    );
    let console = CollectingConsole::default();
    let env = HashMap::from([("OVERLAY_VALUE".to_string(), "42".to_string())]);

    ProcessCommandRunner::new()
        .run(&invocation(&script, &[]).with_env(Some(env)), &console)
        .unwrap();

    assert_eq!(console.lines(), ["overlay=42", "home=unset"]);
}

#[test]
fn working_directory_is_applied() {
    let dir = TempDir::new().unwrap();
    let work = dir.path().join("work");
    fs::create_dir(&work).unwrap();
    let script = stub_script(dir.path(), "pwd.sh", "pwd -P");
    let console = CollectingConsole::default();

    ProcessCommandRunner::new()
        .run(
            &invocation(&script, &[]).with_working_dir(Some(work.clone())),
            &console,
        )
        .unwrap();

    let expected = fs::canonicalize(&work).unwrap();
    assert_eq!(console.lines(), [expected.to_string_lossy().into_owned()]);
}

#[test]
fn arguments_are_passed_verbatim() {
    let dir = TempDir::new().unwrap();
    let script = stub_script(dir.path(), "args.sh", "for arg in \"$@\"; do echo \"$arg\"; done");
    let console = CollectingConsole::default();

    ProcessCommandRunner::new()
        .run(&invocation(&script, &["--flag=a b", "plain"]), &console)
        .unwrap();

    assert_eq!(console.lines(), ["--flag=a b", "plain"]);
}

#[test]
fn raised_interrupt_kills_the_child() {
    let dir = TempDir::new().unwrap();
    let script = stub_script(dir.path(), "sleep.sh", "echo started\nexec sleep 30");
    let interrupt = Interrupt::new();
    let runner = ProcessCommandRunner::new().with_interrupt(interrupt.clone());

    let raiser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        interrupt.raise();
    });
    let started = Instant::now();
    let err = runner.run(&invocation(&script, &[]), &()).unwrap_err();
    raiser.join().unwrap();

    assert!(matches!(err, Error::Interrupted { .. }), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(20));
}

#[test]
fn raised_interrupt_also_kills_grandchildren_holding_the_pipes() {
    let dir = TempDir::new().unwrap();
    // `sleep` runs as a child of the shell and inherits its stdout.
    let script = stub_script(dir.path(), "wrapper.sh", "echo started\nsleep 8\necho after");
    let interrupt = Interrupt::new();
    let runner = ProcessCommandRunner::new().with_interrupt(interrupt.clone());
    let console = CollectingConsole::default();

    let raiser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        interrupt.raise();
    });
    let started = Instant::now();
    let err = runner.run(&invocation(&script, &[]), &console).unwrap_err();
    raiser.join().unwrap();

    assert!(matches!(err, Error::Interrupted { .. }), "{err:?}");
    assert!(
        started.elapsed() < Duration::from_secs(4),
        "run returned after {:?}",
        started.elapsed()
    );
    assert!(!console.lines().iter().any(|line| line == "after"));
}

#[test]
fn raised_interrupt_stops_a_captured_call() {
    let dir = TempDir::new().unwrap();
    let script = stub_script(dir.path(), "slow-answer.sh", "sleep 8\necho answer");
    let interrupt = Interrupt::new();
    let caller = CommandCaller::new().with_interrupt(interrupt.clone());

    let raiser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        interrupt.raise();
    });
    let started = Instant::now();
    let err = caller.call(&invocation(&script, &[])).unwrap_err();
    raiser.join().unwrap();

    assert!(matches!(err, Error::Interrupted { .. }), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[test]
fn run_until_ready_returns_pid_once_marker_appears() {
    let dir = TempDir::new().unwrap();
    let script = stub_script(
        dir.path(),
        "server.sh",
        "echo booting\necho 'Dev App Server is now running'\nexec sleep 30",
    );
    let console = Arc::new(CollectingConsole::default());

    let pid = ProcessCommandRunner::new()
        .run_until_ready(
            &invocation(&script, &[]),
            console.clone(),
            "Dev App Server is now running",
            Duration::from_secs(10),
        )
        .unwrap();

    assert!(pid > 0);
    assert_eq!(console.lines()[0], "booting");
    let _ = std::process::Command::new("kill")
        .arg(pid.to_string())
        .status();
}

#[test]
fn run_until_ready_times_out_without_marker() {
    let dir = TempDir::new().unwrap();
    let script = stub_script(dir.path(), "silent.sh", "exec sleep 30");

    let err = ProcessCommandRunner::new()
        .run_until_ready(
            &invocation(&script, &[]),
            Arc::new(()),
            "never printed",
            Duration::from_millis(300),
        )
        .unwrap_err();

    assert!(matches!(err, Error::StartTimeout { .. }), "{err:?}");
}

#[test]
fn run_until_ready_reports_early_exit() {
    let dir = TempDir::new().unwrap();
    let script = stub_script(dir.path(), "quits.sh", "echo bye");

    let err = ProcessCommandRunner::new()
        .run_until_ready(
            &invocation(&script, &[]),
            Arc::new(()),
            "never printed",
            Duration::from_secs(10),
        )
        .unwrap_err();

    assert!(matches!(err, Error::ExitedBeforeReady { .. }), "{err:?}");
}

#[test]
fn caller_captures_trimmed_stdout() {
    let dir = TempDir::new().unwrap();
    let script = stub_script(dir.path(), "version.sh", "echo '  190.0.0  '\necho noise >&2");

    let output = CommandCaller::new()
        .call(&invocation(&script, &[]))
        .unwrap();

    assert_eq!(output, "190.0.0");
}
