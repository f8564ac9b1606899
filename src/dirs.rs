//! dirs — примитивы над каталогами: exists / delete (толерантно к отсутствию) / rename.
//!
//! rename предполагается атомарным в пределах одного тома; после него делается fsync
//! родительского каталога (best‑effort, на не-unix платформах no-op).

use anyhow::{anyhow, Context, Result};
#[cfg(unix)]
use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

#[cfg(unix)]
pub(crate) fn fsync_dir(path: &Path) -> std::io::Result<()> {
    let dir = File::open(path)?;
    dir.sync_all()
}
#[cfg(not(unix))]
pub(crate) fn fsync_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// fsync каталога-родителя (после create/rename/remove записи в нём).
pub(crate) fn fsync_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fsync_dir(parent),
        _ => Ok(()),
    }
}

pub fn dir_exists(path: &Path) -> bool {
    path.is_dir()
}

/// Recursively delete a directory. A missing directory is not an error.
pub fn delete_dir(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => {
            let _ = fsync_parent(path);
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Move a directory to a new sibling path. The destination must not exist.
pub fn move_dir(from: &Path, to: &Path) -> Result<()> {
    if to.exists() {
        return Err(anyhow!(
            "cannot move {} -> {}: destination already exists",
            from.display(),
            to.display()
        ));
    }
    std::fs::rename(from, to)
        .with_context(|| format!("rename {} -> {}", from.display(), to.display()))?;
    let _ = fsync_parent(to);
    Ok(())
}
