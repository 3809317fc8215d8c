//! Small filesystem operations shared by the link manager and state files.
use std::io::Write as _;
use std::path::{Path, PathBuf};

/// Create every missing directory above `path`.
///
/// # Errors
///
/// Propagates the error from [`std::fs::create_dir_all`].
pub fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Delete whatever non-directory entry sits at `path`, dangling symlinks
/// included. Absent paths are fine.
///
/// # Errors
///
/// Propagates the error from [`std::fs::remove_file`].
pub fn remove_existing(path: &Path) -> std::io::Result<()> {
    match path.symlink_metadata() {
        Ok(_) => std::fs::remove_file(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Hidden name next to `path` (`dir/.name.tag`), so a rename onto `path`
/// stays on one filesystem.
#[must_use]
pub fn sibling_temp(path: &Path, tag: &str) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(|| "configsync".into(), |n| n.to_string_lossy());
    path.with_file_name(format!(".{name}.{tag}"))
}

/// Replace `path` with `content` in one rename.
///
/// Readers see the old or the new file, never a partial one.
///
/// # Errors
///
/// Returns the first I/O error from creating the directory, writing and
/// syncing the temporary, or renaming it into place.
pub fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    ensure_parent_dir(path)?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
