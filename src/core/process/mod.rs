//! External process execution with streamed output.
//!
//! Every invocation spawns one process and two reader threads (stdout and
//! stderr). Lines are delivered to a [`ConsoleListener`] as they arrive; calls
//! into the listener are serialized so the two readers never interleave
//! partial writes. Ordering holds within one stream only.

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ScopedJoinHandle};
use std::time::{Duration, Instant};

use log::debug;

use crate::core::listener::ConsoleListener;
use crate::error::{Error, Result};

mod caller;
mod exit;

pub use caller::CommandCaller;
pub use exit::{AllowedExitCodes, ExitListener, NonZeroExitListener};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A single external call: argument vector (program first), optional working
/// directory and optional environment overlay.
///
/// An overlay replaces the child's environment entirely. Callers that want the
/// ambient environment plus extra variables merge explicitly, typically
/// starting from [`ambient_environment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: Option<HashMap<String, String>>,
}

impl CommandInvocation {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            working_dir: None,
            env: None,
        }
    }

    pub fn with_working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    pub fn with_env(mut self, env: Option<HashMap<String, String>>) -> Self {
        self.env = env;
        self
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn program(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or_default()
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    pub fn env(&self) -> Option<&HashMap<String, String>> {
        self.env.as_ref()
    }
}

/// Snapshot of the current process environment, skipping entries that are
/// not valid Unicode.
pub fn ambient_environment() -> HashMap<String, String> {
    std::env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}

/// Shared cancellation flag. Raising it kills any process a runner holding
/// the same flag is currently waiting on.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs external commands on behalf of the SDK operations.
pub trait CommandRunner: Send + Sync {
    /// Run to completion, streaming output to `console`.
    fn run(&self, invocation: &CommandInvocation, console: &dyn ConsoleListener) -> Result<()>;

    /// Start a long-running process and return its pid once a line containing
    /// `ready` is printed. The process keeps running detached afterwards and is
    /// never reaped by this runner, so it lingers as a zombie after it exits
    /// until the calling process ends. Reader threads keep `console` alive for
    /// as long as the process holds its output pipes.
    fn run_until_ready(
        &self,
        invocation: &CommandInvocation,
        console: Arc<dyn ConsoleListener>,
        ready: &str,
        timeout: Duration,
    ) -> Result<u32>;
}

/// [`CommandRunner`] backed by real OS processes.
#[derive(Clone)]
pub struct ProcessCommandRunner {
    exit_listener: Arc<dyn ExitListener>,
    interrupt: Option<Interrupt>,
}

impl ProcessCommandRunner {
    pub fn new() -> Self {
        Self {
            exit_listener: Arc::new(NonZeroExitListener),
            interrupt: None,
        }
    }

    pub fn with_exit_listener(mut self, listener: impl ExitListener + 'static) -> Self {
        self.exit_listener = Arc::new(listener);
        self
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    fn interrupted(&self) -> bool {
        self.interrupt.as_ref().is_some_and(Interrupt::is_raised)
    }
}

impl Default for ProcessCommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProcessCommandRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessCommandRunner")
            .field("interrupt", &self.interrupt)
            .finish_non_exhaustive()
    }
}

pub(crate) enum WaitOutcome {
    Exited(ExitStatus),
    Interrupted,
}

/// Waits for `child`, polling `interrupt` when one is given. A raised flag
/// kills the child's whole process group (see [`spawn`]) so grandchildren
/// holding the output pipes go with it and the readers reach end-of-stream.
pub(crate) fn wait_interruptible(
    child: &mut Child,
    interrupt: Option<&Interrupt>,
) -> io::Result<WaitOutcome> {
    let Some(interrupt) = interrupt else {
        return child.wait().map(WaitOutcome::Exited);
    };
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(WaitOutcome::Exited(status));
        }
        if interrupt.is_raised() {
            terminate(child, true);
            return Ok(WaitOutcome::Interrupted);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, invocation: &CommandInvocation, console: &dyn ConsoleListener) -> Result<()> {
        let mut child = spawn(invocation, self.interrupt.is_some())?;
        let program = invocation.program().to_string();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let gate = Mutex::new(());
        let gate = &gate;

        let (waited, pumped) = thread::scope(|scope| {
            let readers = [
                stdout.map(|stream| {
                    scope.spawn(move || {
                        pump_lines(stream, |line| deliver(gate, console, line))
                    })
                }),
                stderr.map(|stream| {
                    scope.spawn(move || {
                        pump_lines(stream, |line| deliver(gate, console, line))
                    })
                }),
            ];
            let waited = wait_interruptible(&mut child, self.interrupt.as_ref());
            let pumped = readers
                .into_iter()
                .flatten()
                .map(join_reader)
                .collect::<io::Result<()>>();
            (waited, pumped)
        });

        let outcome = waited.map_err(|source| Error::StreamIo {
            program: program.clone(),
            source,
        })?;
        let status = match outcome {
            WaitOutcome::Exited(status) => status,
            WaitOutcome::Interrupted => return Err(Error::Interrupted { program }),
        };
        pumped.map_err(|source| Error::StreamIo {
            program: program.clone(),
            source,
        })?;

        classify(&program, status, self.exit_listener.as_ref())
    }

    fn run_until_ready(
        &self,
        invocation: &CommandInvocation,
        console: Arc<dyn ConsoleListener>,
        ready: &str,
        timeout: Duration,
    ) -> Result<u32> {
        let mut child = spawn(invocation, true)?;
        let program = invocation.program().to_string();
        let pid = child.id();

        let gate = Arc::new(Mutex::new(()));
        let (ready_tx, ready_rx) = mpsc::channel::<()>();
        let streams: [Option<Box<dyn Read + Send>>; 2] = [
            child
                .stdout
                .take()
                .map(|stream| Box::new(stream) as Box<dyn Read + Send>),
            child
                .stderr
                .take()
                .map(|stream| Box::new(stream) as Box<dyn Read + Send>),
        ];
        for stream in streams.into_iter().flatten() {
            let console = Arc::clone(&console);
            let gate = Arc::clone(&gate);
            let ready_tx = ready_tx.clone();
            let marker = ready.to_string();
            thread::spawn(move || {
                let pumped = pump_lines(stream, |line| {
                    deliver(&gate, console.as_ref(), line);
                    if line.contains(&marker) {
                        let _ = ready_tx.send(());
                    }
                });
                if let Err(err) = pumped {
                    debug!("output reader for detached process stopped: {err}");
                }
            });
        }
        drop(ready_tx);

        let deadline = Instant::now() + timeout;
        loop {
            if self.interrupted() {
                terminate(&mut child, true);
                return Err(Error::Interrupted { program });
            }
            let now = Instant::now();
            if now >= deadline {
                terminate(&mut child, true);
                return Err(Error::StartTimeout {
                    program,
                    timeout_secs: timeout.as_secs(),
                });
            }
            match ready_rx.recv_timeout(POLL_INTERVAL.min(deadline - now)) {
                Ok(()) => {
                    debug!("`{program}` reported readiness (pid {pid})");
                    return Ok(pid);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    let status = child.wait().map_err(|source| Error::StreamIo {
                        program: program.clone(),
                        source,
                    })?;
                    classify(&program, status, self.exit_listener.as_ref())?;
                    return Err(Error::ExitedBeforeReady { program });
                }
            }
        }
    }
}

/// Spawns `invocation` with piped output. With `own_group` the child leads a
/// new process group that [`terminate`] can kill as a unit; it then no longer
/// receives terminal signals aimed at the caller.
pub(crate) fn spawn(invocation: &CommandInvocation, own_group: bool) -> Result<Child> {
    let (program, rest) = invocation
        .args()
        .split_first()
        .ok_or(Error::MissingArgument { name: "program" })?;

    let mut command = Command::new(program);
    command.args(rest);
    if let Some(dir) = invocation.working_dir() {
        command.current_dir(dir);
    }
    if let Some(env) = invocation.env() {
        command.env_clear();
        command.envs(env);
    }
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    if own_group {
        isolate_process_group(&mut command);
    }

    debug!(
        "spawning {:?} (cwd: {:?}, env overlay: {})",
        invocation.args(),
        invocation.working_dir(),
        invocation.env().map_or(0, HashMap::len)
    );

    command.spawn().map_err(|source| Error::Spawn {
        program: program.clone(),
        source,
    })
}

pub(crate) fn classify(
    program: &str,
    status: ExitStatus,
    policy: &dyn ExitListener,
) -> Result<()> {
    match status.code() {
        Some(code) if policy.is_success(code) => Ok(()),
        Some(code) => Err(Error::NonZeroExit {
            program: program.to_string(),
            code,
        }),
        None => Err(Error::Terminated {
            program: program.to_string(),
        }),
    }
}

#[cfg(unix)]
fn isolate_process_group(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn isolate_process_group(_command: &mut Command) {}

/// Kills `child` and reaps it. With `tree` everything it started goes too.
pub(crate) fn terminate(child: &mut Child, tree: bool) {
    if tree {
        kill_tree(child);
    }
    match child.kill() {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::InvalidInput => {}
        Err(err) => debug!("failed to kill child process: {err}"),
    }
    let _ = child.wait();
}

#[cfg(unix)]
fn kill_tree(child: &Child) {
    let Ok(group) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // The child is not reaped yet, so its pid still names the group.
    let rc = unsafe { libc::killpg(group, libc::SIGKILL) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            debug!("failed to kill process group {group}: {err}");
        }
    }
}

#[cfg(windows)]
fn kill_tree(child: &Child) {
    let killed = Command::new("taskkill")
        .args(["/T", "/F", "/PID", &child.id().to_string()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(err) = killed {
        debug!("failed to run taskkill for pid {}: {err}", child.id());
    }
}

#[cfg(not(any(unix, windows)))]
fn kill_tree(_child: &Child) {}

fn deliver(gate: &Mutex<()>, console: &dyn ConsoleListener, line: &str) {
    let _guard = gate.lock().unwrap_or_else(PoisonError::into_inner);
    console.on_output_line(line);
}

fn pump_lines<R: Read>(stream: R, mut on_line: impl FnMut(&str)) -> io::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        if reader.read_until(b'\n', &mut buffer)? == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buffer);
        on_line(line.trim_end_matches(['\n', '\r']));
    }
}

fn join_reader(handle: ScopedJoinHandle<'_, io::Result<()>>) -> io::Result<()> {
    handle
        .join()
        .unwrap_or_else(|_| Err(io::Error::other("output reader panicked")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_program_is_first_argument() {
        let invocation = CommandInvocation::new(["gcloud", "version"]);
        assert_eq!(invocation.program(), "gcloud");
        assert_eq!(invocation.args(), ["gcloud", "version"]);
        assert!(invocation.env().is_none());
        assert!(invocation.working_dir().is_none());
    }

    #[test]
    fn empty_invocation_is_a_configuration_fault() {
        let err = spawn(&CommandInvocation::new(Vec::<String>::new()), false).unwrap_err();
        assert!(matches!(err, Error::MissingArgument { name: "program" }));
    }

    #[test]
    fn pump_lines_strips_terminators_and_keeps_order() {
        let input: &[u8] = b"a\r\nb\n\nc";
        let mut seen = Vec::new();
        pump_lines(input, |line| seen.push(line.to_string())).unwrap();
        assert_eq!(seen, ["a", "b", "", "c"]);
    }

    #[test]
    fn pump_lines_replaces_invalid_utf8() {
        let input: &[u8] = b"ok\xff\n";
        let mut seen = Vec::new();
        pump_lines(input, |line| seen.push(line.to_string())).unwrap();
        assert_eq!(seen, ["ok\u{fffd}"]);
    }

    #[test]
    fn interrupt_is_shared_between_clones() {
        let interrupt = Interrupt::new();
        let clone = interrupt.clone();
        assert!(!clone.is_raised());
        interrupt.raise();
        assert!(clone.is_raised());
    }

    #[test]
    fn ambient_environment_sees_process_variables() {
        temp_env::with_var("CLOUDSDK_TEST_AMBIENT", Some("present"), || {
            let env = ambient_environment();
            assert_eq!(
                env.get("CLOUDSDK_TEST_AMBIENT").map(String::as_str),
                Some("present")
            );
        });
    }
}
