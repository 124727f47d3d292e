//! Drive the Google Cloud SDK from Rust.
//!
//! Locates or installs the SDK, installs optional components and runs App
//! Engine staging, deployment, dev server and repo-info commands with their
//! output streamed line by line.

/// Process execution and the listener contracts.
pub mod core;

/// App Engine operations and their factory.
pub mod appengine;

/// CLI argument parsing and handlers (only when the `cli` feature is enabled).
#[cfg(feature = "cli")]
pub mod cli;

#[cfg(feature = "cli")]
pub mod app;

mod config;
mod error;
mod managed;

pub use config::*;
pub use error::*;
pub use managed::*;
