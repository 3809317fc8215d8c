//! The [`Log`] trait and the step records behind the run summary.

/// One line of the run summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepEntry {
    /// What was attempted, e.g. `"push"` or `"add /etc/hosts"`.
    pub name: String,
    /// How it ended.
    pub status: StepStatus,
    /// Why it was skipped or how it failed.
    pub message: Option<String>,
}

/// Outcome of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// Done.
    Ok,
    /// Nothing to do: nothing to commit, no upstream yet.
    Skipped,
    /// Attempted and failed; the run may still recover, e.g. a retried push.
    Failed,
}

/// Sink for everything the engine and commands report.
///
/// The engine holds an `Arc<dyn Log>` so it runs the same under the CLI's
/// [`Logger`](super::Logger) and under an in-memory log in tests.
pub trait Log: Send + Sync {
    /// Start a new phase.
    fn stage(&self, msg: &str);
    /// Progress output.
    fn info(&self, msg: &str);
    /// Detail hidden from the console unless verbose.
    fn debug(&self, msg: &str);
    /// Something the user should look at.
    fn warn(&self, msg: &str);
    /// A failure.
    fn error(&self, msg: &str);
    /// Remember the outcome of a step for the summary.
    fn record_step(&self, name: &str, status: StepStatus, message: Option<&str>);
}
