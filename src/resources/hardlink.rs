//! Hardlink resource: joins a local file and its synced copy on one inode.
//!
//! [`LinkManager::link`] replaces the target atomically (link to a sibling
//! temp name, then rename) so there is never a moment without a file at the
//! target.  [`LinkManager::unlink`] breaks the link while keeping the
//! content: the target is copied to a preserved scratch file, removed, and
//! rewritten as an independent file.  The rewrite goes through a sibling
//! temp name as well, so the target is either absent or complete.  If it
//! fails the scratch copy stays on disk and the next `unlink`/`recover` of
//! the same target restores it.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest as _, Sha256};

use super::error::LinkError;
use super::helpers::fs::{ensure_parent_dir, remove_existing, sibling_temp};

/// Largest file that may be tracked (1 MiB).
pub const MAX_TRACKED_SIZE: u64 = 1_048_576;

/// Extension of preserved copies in the scratch directory.
const PRESERVED_EXT: &str = "unlink";

/// Creates and breaks hardlinks between tracked files and their synced
/// copies.
#[derive(Debug, Clone)]
pub struct LinkManager {
    scratch_dir: PathBuf,
    max_size: u64,
}

impl LinkManager {
    /// Create a manager that preserves interrupted unlinks under
    /// `scratch_dir`.
    #[must_use]
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            max_size: MAX_TRACKED_SIZE,
        }
    }

    /// Override the size limit.
    #[must_use]
    pub const fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    /// The size limit in bytes.
    #[must_use]
    pub const fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Make `target` a hardlink to `source`, replacing whatever is at
    /// `target`.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::SourceMissing`], [`LinkError::NotAFile`] or
    /// [`LinkError::TooLarge`] when `source` is unusable,
    /// [`LinkError::CrossDevice`] when `source` and `target` are on
    /// different filesystems, and [`LinkError::Io`] for other failures.
    pub fn link(&self, source: &Path, target: &Path) -> Result<(), LinkError> {
        let meta = self.check_source(source)?;

        if is_linked(source, target) {
            return Ok(());
        }

        ensure_parent_dir(target).map_err(|e| LinkError::io("create parent of", target, e))?;
        check_same_device(&meta, source, target)?;

        let tmp = sibling_temp(target, "link-tmp");
        remove_existing(&tmp).map_err(|e| LinkError::io("remove stale", &tmp, e))?;

        fs::hard_link(source, &tmp).map_err(|e| {
            if e.kind() == io::ErrorKind::CrossesDevices {
                LinkError::CrossDevice {
                    source_path: source.to_path_buf(),
                    target: target.to_path_buf(),
                }
            } else {
                LinkError::io("hardlink", target, e)
            }
        })?;

        if let Err(e) = fs::rename(&tmp, target) {
            fs::remove_file(&tmp).ok();
            return Err(LinkError::io("replace", target, e));
        }
        Ok(())
    }

    /// Break the hardlink at `target`, leaving an independent file with the
    /// same content.
    ///
    /// Completes an earlier interrupted unlink of `target` first.  A missing
    /// `target` with nothing preserved is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Interrupted`] if `target` was removed but its
    /// content could not be written back; the content is then kept in the
    /// scratch directory.  Returns [`LinkError::Io`] for earlier failures,
    /// which leave `target` untouched.
    pub fn unlink(&self, target: &Path) -> Result<(), LinkError> {
        if self.recover(target)? || !target.exists() {
            return Ok(());
        }

        let preserved = self.preserve(target)?;
        if let Err(e) = fs::remove_file(target) {
            // Target untouched; a leftover copy would later shadow newer edits.
            fs::remove_file(&preserved).ok();
            return Err(LinkError::io("remove", target, e));
        }
        restore(&preserved, target)
    }

    /// Finish an interrupted unlink of `target` if a preserved copy exists.
    ///
    /// The preserved copy is released without restoring when `target`
    /// already holds the same bytes, or is still hardlinked (the unlink
    /// never got as far as removing it).  A missing or different target is
    /// replaced by it.  Returns `true` if content was restored.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Interrupted`] if the preserved copy still cannot
    /// be written back.
    pub fn recover(&self, target: &Path) -> Result<bool, LinkError> {
        let preserved = self.preserved_path(target);
        if !preserved.exists() {
            return Ok(false);
        }
        if still_linked(target) || same_content(&preserved, target) {
            fs::remove_file(&preserved).map_err(|e| LinkError::io("remove", &preserved, e))?;
            return Ok(false);
        }
        if target.exists() {
            tracing::warn!(
                "{} does not match the copy preserved when it was unlinked; restoring that copy",
                target.display()
            );
        }
        restore(&preserved, target)?;
        Ok(true)
    }

    /// Scratch location holding the content of an in-progress unlink of
    /// `target`.
    #[must_use]
    pub fn preserved_path(&self, target: &Path) -> PathBuf {
        let digest = Sha256::digest(target.to_string_lossy().as_bytes());
        let name: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        self.scratch_dir.join(format!("{name}.{PRESERVED_EXT}"))
    }

    fn check_source(&self, source: &Path) -> Result<fs::Metadata, LinkError> {
        let meta = fs::metadata(source).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                LinkError::SourceMissing(source.to_path_buf())
            } else {
                LinkError::io("read metadata of", source, e)
            }
        })?;
        if !meta.is_file() {
            return Err(LinkError::NotAFile(source.to_path_buf()));
        }
        if meta.len() > self.max_size {
            return Err(LinkError::TooLarge {
                path: source.to_path_buf(),
                size: meta.len(),
                limit: self.max_size,
            });
        }
        Ok(meta)
    }

    /// Copy `target` into the scratch directory.
    ///
    /// The copy is written to a scoped temp file first and only becomes the
    /// preserved copy once complete, so a half-written scratch file is never
    /// mistaken for recoverable content.
    fn preserve(&self, target: &Path) -> Result<PathBuf, LinkError> {
        fs::create_dir_all(&self.scratch_dir)
            .map_err(|e| LinkError::io("create", &self.scratch_dir, e))?;
        let preserved = self.preserved_path(target);

        let mut staged = tempfile::NamedTempFile::new_in(&self.scratch_dir)
            .map_err(|e| LinkError::io("create temp in", &self.scratch_dir, e))?;
        let mut content =
            fs::File::open(target).map_err(|e| LinkError::io("open", target, e))?;
        io::copy(&mut content, staged.as_file_mut())
            .map_err(|e| LinkError::io("copy", target, e))?;
        staged
            .persist(&preserved)
            .map_err(|e| LinkError::io("persist", &preserved, e.error))?;
        Ok(preserved)
    }
}

/// Write the preserved copy back to `target` and release it.
fn restore(preserved: &Path, target: &Path) -> Result<(), LinkError> {
    let interrupted = |source| LinkError::Interrupted {
        target: target.to_path_buf(),
        preserved: preserved.to_path_buf(),
        source,
    };
    ensure_parent_dir(target).map_err(interrupted)?;
    let tmp = sibling_temp(target, "restore-tmp");
    if let Err(e) = fs::copy(preserved, &tmp).and_then(|_| fs::rename(&tmp, target)) {
        fs::remove_file(&tmp).ok();
        return Err(interrupted(e));
    }
    fs::remove_file(preserved).map_err(|e| LinkError::io("remove", preserved, e))?;
    Ok(())
}

#[cfg(unix)]
fn still_linked(path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt as _;
    fs::metadata(path).is_ok_and(|m| m.nlink() > 1)
}

#[cfg(not(unix))]
fn still_linked(_path: &Path) -> bool {
    false
}

fn same_content(a: &Path, b: &Path) -> bool {
    matches!((fs::read(a), fs::read(b)), (Ok(x), Ok(y)) if x == y)
}

/// Returns `true` if `a` and `b` both exist and are the same inode.
#[must_use]
pub fn is_linked(a: &Path, b: &Path) -> bool {
    match (fs::metadata(a), fs::metadata(b)) {
        (Ok(ma), Ok(mb)) => same_inode(&ma, &mb),
        _ => false,
    }
}

#[cfg(unix)]
fn same_inode(a: &fs::Metadata, b: &fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt as _;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn same_inode(_a: &fs::Metadata, _b: &fs::Metadata) -> bool {
    false
}

/// Reject a link whose target directory is on another device than `source`.
///
/// The kernel reports the same with `EXDEV`; checking first gives a precise
/// error before any temp file is created.
#[cfg(unix)]
fn check_same_device(meta: &fs::Metadata, source: &Path, target: &Path) -> Result<(), LinkError> {
    use std::os::unix::fs::MetadataExt as _;
    let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    let parent_meta =
        fs::metadata(parent).map_err(|e| LinkError::io("read metadata of", parent, e))?;
    if parent_meta.dev() != meta.dev() {
        return Err(LinkError::CrossDevice {
            source_path: source.to_path_buf(),
            target: target.to_path_buf(),
        });
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_same_device(_meta: &fs::Metadata, _source: &Path, _target: &Path) -> Result<(), LinkError> {
    Ok(())
}
