//! Symlink validation and relative-path math.
//!
//! A relative link's payload is computed from an explicit `relative_to`
//! anchor rather than from the link's own parent directory. Callers that
//! mount one generated tree at many depths pass the same anchor every time.

use crate::error::{Error, Result};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// True if anything, including a dangling symlink, occupies `path`.
pub fn occupied(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

pub fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false)
}

/// Check every precondition for creating `link -> target` before touching
/// the filesystem.
pub fn validate_creation(
    link: &Path,
    target: &Path,
    relative_to: Option<&Path>,
    dir_link: bool,
) -> Result<()> {
    if occupied(link) {
        return Err(Error::TargetExists(link.to_path_buf()));
    }

    let meta = fs::symlink_metadata(target).map_err(|_| Error::InvalidSymlinkTarget {
        path: target.to_path_buf(),
        reason: "target does not exist".to_string(),
    })?;

    if meta.file_type().is_symlink() {
        return Err(Error::InvalidSymlinkTarget {
            path: target.to_path_buf(),
            reason: "target is itself a symlink".to_string(),
        });
    }

    if dir_link && !meta.is_dir() {
        return Err(Error::InvalidSymlinkTarget {
            path: target.to_path_buf(),
            reason: "directory link target is not a directory".to_string(),
        });
    }

    if !dir_link && meta.is_dir() {
        return Err(Error::InvalidSymlinkTarget {
            path: target.to_path_buf(),
            reason: "file link target is a directory".to_string(),
        });
    }

    if let Some(base) = relative_to {
        if !base.is_dir() {
            return Err(Error::RelativeToMissing(base.to_path_buf()));
        }
    }

    Ok(())
}

/// The path stored inside the link: absolute when `relative_to` is `None`,
/// otherwise the path from `relative_to` to `target`.
pub fn link_payload(target: &Path, relative_to: Option<&Path>) -> Result<PathBuf> {
    let Some(base) = relative_to else {
        return Ok(absolute(target)?);
    };

    let target = fs::canonicalize(target).map_err(|_| Error::InvalidSymlinkTarget {
        path: target.to_path_buf(),
        reason: "target does not exist".to_string(),
    })?;
    let base = fs::canonicalize(base).map_err(|_| Error::RelativeToMissing(base.to_path_buf()))?;

    let payload = pathdiff::diff_paths(&target, &base).ok_or_else(|| {
        Error::InvalidOperation(format!(
            "cannot express {} relative to {}",
            target.display(),
            base.display()
        ))
    })?;

    if payload.as_os_str().is_empty() {
        Ok(PathBuf::from("."))
    } else {
        Ok(payload)
    }
}

/// Validate, then create `link` pointing at `target`.
pub fn create(link: &Path, target: &Path, relative_to: Option<&Path>, dir_link: bool) -> Result<()> {
    validate_creation(link, target, relative_to, dir_link)?;
    let payload = link_payload(target, relative_to)?;

    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)?;
    }

    tracing::debug!("Creating symlink {:?} -> {:?}", link, payload);
    platform_symlink(&payload, link, dir_link)
}

/// Recreate a link that existed before, with the payload rule of [`create`]
/// applied lexically.
///
/// Only the link path has to be free. The target may be missing, so links
/// that were dangling when deleted come back unchanged.
pub fn restore(link: &Path, target: &Path, relative_to: Option<&Path>, dir_link: bool) -> Result<()> {
    if occupied(link) {
        return Err(Error::TargetExists(link.to_path_buf()));
    }

    let target = absolute(target)?;
    let payload = match relative_to {
        None => target,
        Some(base) => {
            let base = absolute(base)?;
            match pathdiff::diff_paths(&target, &base) {
                Some(p) if p.as_os_str().is_empty() => PathBuf::from("."),
                Some(p) => p,
                None => target,
            }
        }
    };

    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)?;
    }

    tracing::debug!("Restoring symlink {:?} -> {:?}", link, payload);
    platform_symlink(&payload, link, dir_link)
}

/// Remove the link itself. The link's target is never touched.
pub fn remove(link: &Path, dir_link: bool) -> io::Result<()> {
    if !is_symlink(link) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "path is not a symlink",
        ));
    }

    #[cfg(windows)]
    {
        if dir_link {
            return fs::remove_dir(link);
        }
    }

    let _ = dir_link;
    fs::remove_file(link)
}

/// Where `link` points, as an absolute, lexically normalized path.
pub fn resolve(link: &Path) -> io::Result<PathBuf> {
    let payload = fs::read_link(link)?;
    if payload.is_absolute() {
        return Ok(normalize(&payload));
    }

    let parent = link.parent().unwrap_or_else(|| Path::new("."));
    Ok(normalize(&absolute(parent)?.join(payload)))
}

/// Recover `(target, relative_to)` from an existing link so the same link can
/// be recreated later. A relative payload is anchored at the link's parent.
pub fn capture(link: &Path) -> io::Result<(PathBuf, Option<PathBuf>)> {
    let payload = fs::read_link(link)?;
    if payload.is_absolute() {
        return Ok((normalize(&payload), None));
    }

    let parent = link.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    Ok((normalize(&parent.join(payload)), Some(parent)))
}

fn absolute(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(normalize(path))
    } else {
        Ok(normalize(&std::env::current_dir()?.join(path)))
    }
}

/// Resolve `.` and `..` components without consulting the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(unix)]
fn platform_symlink(payload: &Path, link: &Path, _dir_link: bool) -> Result<()> {
    std::os::unix::fs::symlink(payload, link)?;
    Ok(())
}

#[cfg(windows)]
fn platform_symlink(payload: &Path, link: &Path, dir_link: bool) -> Result<()> {
    if dir_link {
        std::os::windows::fs::symlink_dir(payload, link)?;
    } else {
        std::os::windows::fs::symlink_file(payload, link)?;
    }
    Ok(())
}
