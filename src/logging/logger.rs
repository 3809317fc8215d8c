//! The command line [`Log`] implementation.
use std::path::PathBuf;
use std::sync::Mutex;

use super::subscriber::STAGE_TARGET;
use super::types::{Log, StepEntry, StepStatus};
use super::utils::log_file_path;

/// Trait methods that forward a message to the inherent method of the same
/// name.
macro_rules! forward_log_methods {
    ($($method:ident),+ $(,)?) => {
        $(
            fn $method(&self, msg: &str) {
                self.$method(msg);
            }
        )+
    };
}

/// The [`Log`] used by the command line tool.
///
/// Messages go through [`tracing`]; the subscriber installed by
/// [`init_subscriber`](super::init_subscriber) decides where they land.
/// Steps are kept in memory for [`print_summary`](Self::print_summary).
#[derive(Debug)]
pub struct Logger {
    steps: Mutex<Vec<StepEntry>>,
    log_file: Option<PathBuf>,
}

impl Logger {
    /// Logger for `command`, remembering where its log file lives.
    ///
    /// Does not touch the file; the subscriber creates it.
    #[must_use]
    pub fn new(command: &str) -> Self {
        Self {
            steps: Mutex::new(Vec::new()),
            log_file: log_file_path(command),
        }
    }

    /// Create a logger with no log file, for embedding the engine in another
    /// program.
    #[must_use]
    pub const fn detached() -> Self {
        Self {
            steps: Mutex::new(Vec::new()),
            log_file: None,
        }
    }

    /// Where this command's log file is, if there is one.
    #[must_use]
    pub const fn log_path(&self) -> Option<&PathBuf> {
        self.log_file.as_ref()
    }

    /// Snapshot of the steps recorded so far.
    #[must_use]
    pub fn step_entries(&self) -> Vec<StepEntry> {
        self.steps.lock().map_or_else(|_| vec![], |g| g.clone())
    }

    /// Report a failure.
    pub fn error(&self, msg: &str) {
        tracing::error!("{msg}");
    }

    /// Report something the user should look at.
    pub fn warn(&self, msg: &str) {
        tracing::warn!("{msg}");
    }

    /// Start a new phase of the command.
    pub fn stage(&self, msg: &str) {
        tracing::info!(target: STAGE_TARGET, "{msg}");
    }

    /// Progress output.
    pub fn info(&self, msg: &str) {
        tracing::info!("{msg}");
    }

    /// Detail for `-v` and the log file.
    pub fn debug(&self, msg: &str) {
        tracing::debug!("{msg}");
    }

    /// Remember the outcome of `name` for [`print_summary`](Self::print_summary).
    pub fn record_step(&self, name: &str, status: StepStatus, message: Option<&str>) {
        if let Ok(mut guard) = self.steps.lock() {
            guard.push(StepEntry {
                name: name.to_string(),
                status,
                message: message.map(String::from),
            });
        }
    }

    /// Log one line per recorded step, then the totals and the log file.
    ///
    /// Does nothing when no step was recorded.
    pub fn print_summary(&self) {
        let steps = self.step_entries();
        if steps.is_empty() {
            return;
        }

        self.stage("Summary");
        let mut counts = [0usize; 3];
        for step in &steps {
            let (slot, mark, color) = match step.status {
                StepStatus::Ok => (0, "ok  ", "32"),
                StepStatus::Skipped => (1, "skip", "33"),
                StepStatus::Failed => (2, "FAIL", "31"),
            };
            if let Some(n) = counts.get_mut(slot) {
                *n += 1;
            }
            let detail = step
                .message
                .as_deref()
                .map_or_else(String::new, |m| format!(": {m}"));
            self.info(&format!("\x1b[{color}m{mark}\x1b[0m {}{detail}", step.name));
        }

        let [ok, skipped, failed] = counts;
        self.info(&format!("{ok} ok, {skipped} skipped, {failed} failed"));
        if let Some(path) = &self.log_file {
            self.debug(&format!("log written to {}", path.display()));
        }
    }
}

impl Log for Logger {
    forward_log_methods!(stage, info, debug, warn, error);

    fn record_step(&self, name: &str, status: StepStatus, message: Option<&str>) {
        self.record_step(name, status, message);
    }
}
