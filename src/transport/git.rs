//! [`Transport`] implementation that shells out to the `git` binary.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{PullOutcome, Transport, TransportError};
use crate::exec::{ExecError, ExecResult, Executor};

const GIT: &str = "git";

/// Never let git block on a credential prompt; there is no terminal to
/// answer it and the timeout would hide the real cause.
const ENV: &[(&str, &str)] = &[("GIT_TERMINAL_PROMPT", "0")];

/// Stderr fragments that identify an authentication failure.
const AUTH_PATTERNS: &[&str] = &[
    "authentication failed",
    "permission denied",
    "could not read username",
    "could not read password",
    "terminal prompts disabled",
    "the requested url returned error: 403",
    "the requested url returned error: 401",
];

/// Stderr fragments that identify diverged history or a merge conflict.
const CONFLICT_PATTERNS: &[&str] = &[
    "non-fast-forward",
    "[rejected]",
    "fetch first",
    "updates were rejected",
    "conflict",
    "could not apply",
];

/// Stderr fragments that identify an unreachable remote.
const NETWORK_PATTERNS: &[&str] = &[
    "could not resolve host",
    "connection refused",
    "connection timed out",
    "network is unreachable",
    "operation timed out",
    "unable to access",
    "could not read from remote repository",
];

/// Git-backed transport.
#[derive(Debug, Clone)]
pub struct GitTransport {
    executor: Arc<dyn Executor>,
}

impl GitTransport {
    /// Create a transport that runs git through `executor`.
    #[must_use]
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }

    /// Fail early with a clear message when git is not installed.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Spawn`] if `git` is not on `PATH`.
    pub fn ensure_available(&self) -> Result<(), TransportError> {
        if self.executor.which(GIT) {
            Ok(())
        } else {
            Err(TransportError::Spawn {
                op: "git",
                message: "git executable not found on PATH".to_string(),
            })
        }
    }

    /// Run git and return its result, successful or not.
    fn run(&self, op: &'static str, dir: &Path, args: &[&str]) -> Result<ExecResult, TransportError> {
        tracing::debug!("git {} (in {})", args.join(" "), dir.display());
        self.executor
            .run_in_with_env(dir, GIT, args, ENV)
            .map_err(|e| from_exec(op, e))
    }

    /// Run git and classify a non-zero exit as an error.
    fn run_checked(
        &self,
        op: &'static str,
        dir: &Path,
        args: &[&str],
    ) -> Result<ExecResult, TransportError> {
        let result = self.run(op, dir, args)?;
        if result.success {
            Ok(result)
        } else {
            Err(classify(op, &result))
        }
    }

    fn head(&self, workdir: &Path) -> Option<String> {
        self.run("pull", workdir, &["rev-parse", "HEAD"])
            .ok()
            .filter(|r| r.success)
            .map(|r| r.stdout.trim().to_string())
    }
}

impl Transport for GitTransport {
    fn clone_repo(&self, remote: &str, path: &Path) -> Result<(), TransportError> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let target = path.to_string_lossy();
        self.run_checked("clone", parent, &["clone", remote, &target])?;
        Ok(())
    }

    fn stage_all(&self, workdir: &Path) -> Result<(), TransportError> {
        self.run_checked("stage", workdir, &["add", "-A"])?;
        Ok(())
    }

    fn stage_path(&self, workdir: &Path, path: &Path) -> Result<(), TransportError> {
        let relative = path.strip_prefix(workdir).unwrap_or(path);
        let relative = relative.to_string_lossy();
        self.run_checked("stage", workdir, &["add", "-A", "--", &relative])?;
        Ok(())
    }

    fn commit(&self, workdir: &Path, message: &str) -> Result<bool, TransportError> {
        // Exit 0: index matches HEAD. Exit 1: something is staged.
        let staged = self.run("commit", workdir, &["diff", "--cached", "--quiet"])?;
        match staged.code {
            Some(0) => {
                tracing::debug!("nothing staged in {}", workdir.display());
                Ok(false)
            }
            Some(1) => {
                self.run_checked("commit", workdir, &["commit", "-m", message])?;
                Ok(true)
            }
            _ => Err(classify("commit", &staged)),
        }
    }

    fn pull(&self, workdir: &Path) -> Result<PullOutcome, TransportError> {
        let upstream = self.run(
            "pull",
            workdir,
            &["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{u}"],
        )?;
        if !upstream.success {
            tracing::debug!("no upstream configured in {}", workdir.display());
            return Ok(PullOutcome::NoUpstream);
        }

        let before = self.head(workdir);
        let result = self.run("pull", workdir, &["pull", "--rebase", "--autostash"])?;
        if !result.success {
            let err = classify("pull", &result);
            if err.is_conflict() {
                // Leave the working directory as it was before the pull.
                let abort = self.run("pull", workdir, &["rebase", "--abort"])?;
                if !abort.success {
                    tracing::warn!("git rebase --abort failed: {}", abort.stderr.trim());
                }
            }
            return Err(err);
        }

        if before.is_some() && before == self.head(workdir) {
            Ok(PullOutcome::UpToDate)
        } else {
            Ok(PullOutcome::Updated)
        }
    }

    fn reset_to_remote(&self, workdir: &Path) -> Result<Vec<PathBuf>, TransportError> {
        self.run_checked("reset", workdir, &["fetch"])?;
        let base = self.run_checked("reset", workdir, &["merge-base", "HEAD", "@{u}"])?;
        let base = base.stdout.trim();
        let diff = self.run_checked(
            "reset",
            workdir,
            &["diff", "--name-only", "--no-renames", "-z", base],
        )?;
        let changed = diff
            .stdout
            .split('\0')
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .collect();
        self.run_checked("reset", workdir, &["reset", "--hard", "@{u}"])?;
        Ok(changed)
    }

    fn push(&self, workdir: &Path) -> Result<(), TransportError> {
        // A fresh clone of an empty remote has no HEAD until the first commit.
        let head = self.run("push", workdir, &["rev-parse", "--verify", "-q", "HEAD"])?;
        if !head.success {
            tracing::debug!("no commits to push in {}", workdir.display());
            return Ok(());
        }
        self.run_checked("push", workdir, &["push", "-u", "origin", "HEAD"])?;
        Ok(())
    }
}

fn from_exec(op: &'static str, err: ExecError) -> TransportError {
    match err {
        ExecError::Timeout { after, .. } => TransportError::Timeout { op, after },
        ExecError::Spawn { source, .. } => TransportError::Spawn {
            op,
            message: format!("cannot run git: {source}"),
        },
        ExecError::Io { source, .. } => TransportError::Failed {
            op,
            code: -1,
            stderr: source.to_string(),
        },
    }
}

/// Map a failed git invocation to a [`TransportError`] from its stderr.
fn classify(op: &'static str, result: &ExecResult) -> TransportError {
    // Conflict output from pull --rebase lands on stdout.
    let output = format!("{}\n{}", result.stderr, result.stdout).to_lowercase();
    let message = result.stderr.trim().to_string();
    let matches = |patterns: &[&str]| patterns.iter().any(|p| output.contains(p));

    if matches(AUTH_PATTERNS) {
        TransportError::Auth { op, message }
    } else if matches(CONFLICT_PATTERNS) {
        TransportError::Conflict { op, message }
    } else if matches(NETWORK_PATTERNS) {
        TransportError::Network { op, message }
    } else {
        TransportError::Failed {
            op,
            code: result.code.unwrap_or(-1),
            stderr: message,
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::exec::test_helpers::MockExecutor;

    fn transport(executor: MockExecutor) -> (GitTransport, Arc<MockExecutor>) {
        let executor = Arc::new(executor);
        (GitTransport::new(Arc::clone(&executor) as Arc<dyn Executor>), executor)
    }

    fn args(call: &[String]) -> Vec<&str> {
        call.iter().map(String::as_str).collect()
    }

    #[test]
    fn ensure_available_reports_missing_git() {
        let (git, _) = transport(MockExecutor::new().with_which(false));
        let err = git.ensure_available().unwrap_err();
        assert!(matches!(err, TransportError::Spawn { .. }));
        let (git, _) = transport(MockExecutor::new().with_which(true));
        git.ensure_available().unwrap();
    }

    #[test]
    fn clone_runs_in_parent_directory() {
        let (git, exec) = transport(MockExecutor::new().ok(""));
        git.clone_repo("git@example.com:me/conf.git", Path::new("/tmp/sync"))
            .unwrap();
        let calls = exec.calls();
        assert_eq!(
            args(&calls[0]),
            vec!["git", "clone", "git@example.com:me/conf.git", "/tmp/sync"]
        );
    }

    #[test]
    fn stage_path_is_relative_to_workdir() {
        let (git, exec) = transport(MockExecutor::new().ok(""));
        git.stage_path(Path::new("/sync"), Path::new("/sync/files/etc/app.conf"))
            .unwrap();
        assert_eq!(
            args(&exec.calls()[0]),
            vec!["git", "add", "-A", "--", "files/etc/app.conf"]
        );
    }

    #[test]
    fn commit_with_empty_index_is_noop() {
        let (git, exec) = transport(MockExecutor::new().ok(""));
        assert!(!git.commit(Path::new("/sync"), "laptop-x").unwrap());
        let calls = exec.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(args(&calls[0]), vec!["git", "diff", "--cached", "--quiet"]);
    }

    #[test]
    fn commit_with_staged_changes_commits() {
        let (git, exec) = transport(MockExecutor::new().fail(1, "").ok(""));
        assert!(git.commit(Path::new("/sync"), "laptop-x").unwrap());
        assert_eq!(
            args(&exec.calls()[1]),
            vec!["git", "commit", "-m", "laptop-x"]
        );
    }

    #[test]
    fn commit_reports_broken_index() {
        let (git, exec) = transport(MockExecutor::new().fail(128, "fatal: not a git repository"));
        let err = git.commit(Path::new("/sync"), "laptop-x").unwrap_err();
        assert!(matches!(err, TransportError::Failed { code: 128, .. }), "got: {err}");
        assert_eq!(exec.calls().len(), 1);
    }

    #[test]
    fn pull_without_upstream() {
        let (git, exec) = transport(MockExecutor::new().fail(128, "fatal: no upstream"));
        assert_eq!(
            git.pull(Path::new("/sync")).unwrap(),
            PullOutcome::NoUpstream
        );
        assert_eq!(exec.calls().len(), 1);
    }

    #[test]
    fn pull_reports_update_when_head_moves() {
        let (git, _) = transport(
            MockExecutor::new()
                .ok("origin/main\n")
                .ok("aaaa\n")
                .ok("")
                .ok("bbbb\n"),
        );
        assert_eq!(git.pull(Path::new("/sync")).unwrap(), PullOutcome::Updated);
    }

    #[test]
    fn pull_reports_up_to_date_when_head_is_unchanged() {
        let (git, _) = transport(
            MockExecutor::new()
                .ok("origin/main\n")
                .ok("aaaa\n")
                .ok("Already up to date.\n")
                .ok("aaaa\n"),
        );
        assert_eq!(git.pull(Path::new("/sync")).unwrap(), PullOutcome::UpToDate);
    }

    #[test]
    fn pull_conflict_aborts_rebase() {
        let (git, exec) = transport(
            MockExecutor::new()
                .ok("origin/main\n")
                .ok("aaaa\n")
                .fail(1, "CONFLICT (content): Merge conflict in registry.toml")
                .ok(""),
        );
        let err = git.pull(Path::new("/sync")).unwrap_err();
        assert!(err.is_conflict(), "got: {err}");
        let calls = exec.calls();
        assert_eq!(args(&calls[3]), vec!["git", "rebase", "--abort"]);
    }

    #[test]
    fn reset_reports_paths_changed_since_merge_base() {
        let (git, exec) = transport(
            MockExecutor::new()
                .ok("")
                .ok("cafe\n")
                .ok("registry.toml\0files/home/me/b.conf\0")
                .ok(""),
        );
        let changed = git.reset_to_remote(Path::new("/sync")).unwrap();
        assert_eq!(
            changed,
            vec![
                PathBuf::from("registry.toml"),
                PathBuf::from("files/home/me/b.conf")
            ]
        );
        let calls = exec.calls();
        assert_eq!(args(&calls[0]), vec!["git", "fetch"]);
        assert_eq!(
            args(&calls[2]),
            vec!["git", "diff", "--name-only", "--no-renames", "-z", "cafe"]
        );
        assert_eq!(args(&calls[3]), vec!["git", "reset", "--hard", "@{u}"]);
    }

    #[test]
    fn reset_keeps_working_directory_when_fetch_fails() {
        let (git, exec) = transport(
            MockExecutor::new().fail(128, "fatal: unable to access: Could not resolve host"),
        );
        let err = git.reset_to_remote(Path::new("/sync")).unwrap_err();
        assert!(matches!(err, TransportError::Network { op: "reset", .. }), "got: {err}");
        assert_eq!(exec.calls().len(), 1);
    }

    #[test]
    fn push_without_commits_is_noop() {
        let (git, exec) = transport(MockExecutor::new().fail(1, ""));
        git.push(Path::new("/sync")).unwrap();
        assert_eq!(exec.calls().len(), 1);
    }

    #[test]
    fn push_sets_upstream() {
        let (git, exec) = transport(MockExecutor::new().ok("aaaa\n").ok(""));
        git.push(Path::new("/sync")).unwrap();
        assert_eq!(
            args(&exec.calls()[1]),
            vec!["git", "push", "-u", "origin", "HEAD"]
        );
    }

    #[test]
    fn push_rejection_is_conflict() {
        let (git, _) = transport(MockExecutor::new().ok("aaaa\n").fail(
            1,
            " ! [rejected]        HEAD -> main (fetch first)\nerror: failed to push some refs",
        ));
        let err = git.push(Path::new("/sync")).unwrap_err();
        assert!(err.is_conflict(), "got: {err}");
    }

    #[test]
    fn classify_auth_before_network() {
        let result = ExecResult {
            stdout: String::new(),
            stderr: "git@github.com: Permission denied (publickey).\nfatal: Could not read from remote repository.".to_string(),
            success: false,
            code: Some(128),
        };
        assert!(matches!(classify("push", &result), TransportError::Auth { .. }));
    }

    #[test]
    fn classify_network() {
        let result = ExecResult {
            stdout: String::new(),
            stderr: "fatal: unable to access 'https://example.invalid/': Could not resolve host".to_string(),
            success: false,
            code: Some(128),
        };
        assert!(matches!(classify("pull", &result), TransportError::Network { .. }));
    }

    #[test]
    fn classify_unknown_keeps_exit_code() {
        let result = ExecResult {
            stdout: String::new(),
            stderr: "fatal: bad object HEAD".to_string(),
            success: false,
            code: Some(128),
        };
        let err = classify("commit", &result);
        assert!(matches!(err, TransportError::Failed { code: 128, .. }), "got: {err}");
    }

    #[test]
    fn timeout_maps_to_transport_timeout() {
        let err = from_exec(
            "push",
            ExecError::Timeout {
                program: "git".to_string(),
                after: std::time::Duration::from_secs(3),
            },
        );
        assert!(err.is_retryable());
        assert!(matches!(err, TransportError::Timeout { op: "push", .. }));
    }
}
