//! Process execution and the listener contracts shared by every SDK operation.

pub mod listener;
pub mod process;

pub use listener::{
    ConsoleListener, DEFAULT_CONSOLE_PREFIX, LogConsoleListener, LogProgressListener,
    ProgressListener,
};
pub use process::{
    AllowedExitCodes, CommandCaller, CommandInvocation, CommandRunner, ExitListener, Interrupt,
    NonZeroExitListener, ProcessCommandRunner, ambient_environment,
};
