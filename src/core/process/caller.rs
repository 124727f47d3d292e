use std::io::{self, Read};
use std::thread::{self, ScopedJoinHandle};

use log::debug;

use crate::error::{Error, Result};

use super::{
    CommandInvocation, Interrupt, NonZeroExitListener, WaitOutcome, classify, spawn,
    wait_interruptible,
};

/// Runs a command to completion and hands back what it printed on stdout.
///
/// Used where the SDK answers a question (an interpreter path, a component
/// listing) rather than doing work the user should watch.
#[derive(Debug, Clone, Default)]
pub struct CommandCaller {
    interrupt: Option<Interrupt>,
}

impl CommandCaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill the command (and anything it started) when `interrupt` is raised.
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub fn call(&self, invocation: &CommandInvocation) -> Result<String> {
        let program = invocation.program().to_string();
        let mut child = spawn(invocation, self.interrupt.is_some())?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (waited, stdout, stderr) = thread::scope(|scope| {
            let stdout = stdout.map(|stream| scope.spawn(move || read_all(stream)));
            let stderr = stderr.map(|stream| scope.spawn(move || read_all(stream)));
            let waited = wait_interruptible(&mut child, self.interrupt.as_ref());
            (waited, join_output(stdout), join_output(stderr))
        });

        let stream_error = |source| Error::StreamIo {
            program: program.clone(),
            source,
        };
        let status = match waited.map_err(stream_error)? {
            WaitOutcome::Exited(status) => status,
            WaitOutcome::Interrupted => {
                return Err(Error::Interrupted {
                    program: program.clone(),
                });
            }
        };
        let stdout = stdout.map_err(stream_error)?;
        let stderr = stderr.map_err(stream_error)?;

        let stderr = String::from_utf8_lossy(&stderr);
        if !stderr.trim().is_empty() {
            debug!("`{program}` stderr: {}", stderr.trim_end());
        }

        classify(&program, status, &NonZeroExitListener)?;

        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }
}

fn read_all(mut stream: impl Read) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    stream.read_to_end(&mut buffer)?;
    Ok(buffer)
}

fn join_output(handle: Option<ScopedJoinHandle<'_, io::Result<Vec<u8>>>>) -> io::Result<Vec<u8>> {
    match handle {
        Some(handle) => handle
            .join()
            .unwrap_or_else(|_| Err(io::Error::other("output reader panicked"))),
        None => Ok(Vec::new()),
    }
}
