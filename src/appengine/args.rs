//! Command-line flag rendering. Every optional value contributes zero or one
//! argument; repeated values contribute one argument each.

use std::fmt::Display;
use std::path::Path;

#[derive(Debug, Default)]
pub(crate) struct Args(Vec<String>);

impl Args {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn positional(&mut self, value: impl Into<String>) {
        self.0.push(value.into());
    }

    pub(crate) fn positional_path(&mut self, value: &Path) {
        self.0.push(value.to_string_lossy().into_owned());
    }

    /// `--name=value`
    pub(crate) fn value(&mut self, name: &str, value: Option<impl Display>) {
        if let Some(value) = value {
            self.0.push(format!("--{name}={value}"));
        }
    }

    pub(crate) fn path(&mut self, name: &str, value: Option<&Path>) {
        self.value(name, value.map(Path::display));
    }

    /// Bare `--name` when enabled; nothing otherwise.
    pub(crate) fn flag(&mut self, name: &str, value: Option<bool>) {
        if value == Some(true) {
            self.0.push(format!("--{name}"));
        }
    }

    /// `--name` or `--no-name`.
    pub(crate) fn toggle(&mut self, name: &str, value: Option<bool>) {
        match value {
            Some(true) => self.0.push(format!("--{name}")),
            Some(false) => self.0.push(format!("--no-{name}")),
            None => {}
        }
    }

    /// `--name=value` once per element.
    pub(crate) fn repeated<T: Display>(&mut self, name: &str, values: impl IntoIterator<Item = T>) {
        for value in values {
            self.0.push(format!("--{name}={value}"));
        }
    }

    pub(crate) fn extend(&mut self, values: impl IntoIterator<Item = impl Into<String>>) {
        self.0.extend(values.into_iter().map(Into::into));
    }

    pub(crate) fn into_vec(self) -> Vec<String> {
        self.0
    }
}
