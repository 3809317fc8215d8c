//! Log file placement, rotation, timestamps and ANSI stripping.
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the log directory.
pub(super) const LOG_DIR_ENV: &str = "CONFIGSYNC_LOG_DIR";

/// Suffix of the log kept from the previous run of the same command.
const PREVIOUS_SUFFIX: &str = "1";

/// Directory holding per-command log files, created if needed.
///
/// `$CONFIGSYNC_LOG_DIR`, else `$XDG_CACHE_HOME/configsync`, else
/// `~/.cache/configsync`.
pub(super) fn log_dir() -> Option<PathBuf> {
    let dir = std::env::var_os(LOG_DIR_ENV).map_or_else(
        || {
            std::env::var_os("XDG_CACHE_HOME")
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var_os("HOME")
                        .or_else(|| std::env::var_os("USERPROFILE"))
                        .map(|home| PathBuf::from(home).join(".cache"))
                })
                .unwrap_or_else(|| PathBuf::from("."))
                .join("configsync")
        },
        PathBuf::from,
    );
    fs::create_dir_all(&dir).ok()?;
    Some(dir)
}

/// Log file for `command`, e.g. `~/.cache/configsync/sync.log`.
pub(super) fn log_file_path(command: &str) -> Option<PathBuf> {
    Some(log_dir()?.join(format!("{command}.log")))
}

/// Keep the previous run's log as `<command>.log.1`, replacing any older one.
pub(super) fn rotate(path: &Path) {
    if path.exists() {
        let mut previous = path.as_os_str().to_owned();
        previous.push(".");
        previous.push(PREVIOUS_SUFFIX);
        fs::rename(path, PathBuf::from(previous)).ok();
    }
}

/// Local time with offset, for the run header.
pub(super) fn header_timestamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%d %H:%M:%S %:z")
        .to_string()
}

/// Local time with milliseconds, for individual lines.
pub(super) fn line_timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S%.3f").to_string()
}

/// Remove terminal escape sequences so log files stay plain text.
///
/// CSI sequences (`ESC [ ... final`) are dropped up to their final byte in
/// `@`..=`~`; any other escape drops the escape and the one character after
/// it.
pub(super) fn strip_ansi(s: &str) -> String {
    enum State {
        Text,
        Escape,
        Csi,
    }

    let mut state = State::Text;
    s.chars()
        .filter(|&c| match state {
            State::Text if c == '\x1b' => {
                state = State::Escape;
                false
            }
            State::Text => true,
            State::Escape => {
                state = if c == '[' { State::Csi } else { State::Text };
                false
            }
            State::Csi => {
                if ('@'..='~').contains(&c) {
                    state = State::Text;
                }
                false
            }
        })
        .collect()
}
