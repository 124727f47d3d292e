use log::{debug, info};

/// Prefix applied to every line the SDK prints when forwarded to the log.
pub const DEFAULT_CONSOLE_PREFIX: &str = "GCLOUD: ";

/// Sink for coarse-grained progress of a long-running operation.
///
/// A `total` of `None` means the length of the work is not known in advance.
pub trait ProgressListener {
    fn start(&mut self, message: &str, total: Option<u64>);

    fn update(&mut self, units: u64);

    fn done(&mut self);
}

impl ProgressListener for () {
    fn start(&mut self, _message: &str, _total: Option<u64>) {}

    fn update(&mut self, _units: u64) {}

    fn done(&mut self) {}
}

/// Sink for process output, one line at a time.
///
/// Both output streams of a process feed the same listener from separate
/// threads, hence the `Sync` bound.
pub trait ConsoleListener: Send + Sync {
    fn on_output_line(&self, line: &str);
}

impl ConsoleListener for () {
    fn on_output_line(&self, _line: &str) {}
}

/// Forwards console lines to the `log` facade with an identifying prefix.
#[derive(Debug, Clone)]
pub struct LogConsoleListener {
    prefix: String,
}

impl LogConsoleListener {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl Default for LogConsoleListener {
    fn default() -> Self {
        Self::new(DEFAULT_CONSOLE_PREFIX)
    }
}

impl ConsoleListener for LogConsoleListener {
    fn on_output_line(&self, line: &str) {
        info!("{}{}", self.prefix, line);
    }
}

/// Progress sink that narrates through the `log` facade.
#[derive(Debug, Default)]
pub struct LogProgressListener {
    message: Option<String>,
    total: Option<u64>,
    seen: u64,
}

impl ProgressListener for LogProgressListener {
    fn start(&mut self, message: &str, total: Option<u64>) {
        match total {
            Some(total) => info!("{message} ({total} units)"),
            None => info!("{message}"),
        }
        self.message = Some(message.to_string());
        self.total = total;
        self.seen = 0;
    }

    fn update(&mut self, units: u64) {
        self.seen = self.seen.saturating_add(units);
        match self.total {
            Some(total) => debug!("progress {}/{}", self.seen, total),
            None => debug!("progress {}", self.seen),
        }
    }

    fn done(&mut self) {
        if let Some(message) = self.message.take() {
            info!("{message}: done");
        }
    }
}
