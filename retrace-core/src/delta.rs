//! Forward and reverse application of deltas.
//!
//! Each [`DeltaKind`] maps to one `Handler`, a pair of plain functions. The
//! handlers always perform the physical operation; skipping deltas that were
//! already applied is the caller's decision.

use crate::error::{Error, Result};
use crate::models::{Delta, DeltaKind};
use crate::symlink;
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "redo",
            Direction::Reverse => "undo",
        }
    }
}

type ApplyFn = fn(&Delta) -> Result<()>;

struct Handler {
    forward: ApplyFn,
    reverse: ApplyFn,
}

const FILE_CREATE: Handler = Handler {
    forward: write_new_file,
    reverse: remove_file,
};

const FILE_MODIFY: Handler = Handler {
    forward: overwrite_with_new,
    reverse: overwrite_with_old,
};

const FILE_DELETE: Handler = Handler {
    forward: remove_file,
    reverse: restore_file,
};

const DIR_CREATE: Handler = Handler {
    forward: create_dir,
    reverse: remove_empty_dir,
};

const DIR_DELETE: Handler = Handler {
    forward: remove_dir_tree,
    reverse: create_dir,
};

const SYMLINK_CREATE: Handler = Handler {
    forward: create_symlink,
    reverse: remove_symlink,
};

const SYMLINK_DELETE: Handler = Handler {
    forward: remove_symlink,
    reverse: restore_symlink,
};

fn handler(kind: DeltaKind) -> &'static Handler {
    match kind {
        DeltaKind::FileCreate => &FILE_CREATE,
        DeltaKind::FileModify => &FILE_MODIFY,
        DeltaKind::FileDelete => &FILE_DELETE,
        DeltaKind::DirCreate => &DIR_CREATE,
        DeltaKind::DirDelete => &DIR_DELETE,
        DeltaKind::SymlinkFileCreate | DeltaKind::SymlinkDirCreate => &SYMLINK_CREATE,
        DeltaKind::SymlinkFileDelete | DeltaKind::SymlinkDirDelete => &SYMLINK_DELETE,
    }
}

/// Check that the fields required by the delta's kind are present.
pub fn validate(delta: &Delta) -> Result<()> {
    match delta.kind {
        DeltaKind::FileCreate => {
            new_content(delta)?;
        }
        DeltaKind::FileModify => {
            old_content(delta)?;
            new_content(delta)?;
        }
        DeltaKind::FileDelete => {
            old_content(delta)?;
        }
        DeltaKind::DirCreate | DeltaKind::DirDelete => {}
        DeltaKind::SymlinkFileCreate
        | DeltaKind::SymlinkFileDelete
        | DeltaKind::SymlinkDirCreate
        | DeltaKind::SymlinkDirDelete => {
            if delta.symlink_target.is_none() {
                return Err(Error::MissingSymlinkTarget(delta.kind));
            }
        }
    }

    Ok(())
}

pub fn apply_forward(delta: &Delta) -> Result<()> {
    apply(delta, Direction::Forward)
}

pub fn apply_reverse(delta: &Delta) -> Result<()> {
    apply(delta, Direction::Reverse)
}

pub fn apply(delta: &Delta, direction: Direction) -> Result<()> {
    validate(delta)?;
    debug!(
        "Applying {} {:?} to {:?}",
        delta.kind, direction, delta.target_path
    );

    let handler = handler(delta.kind);
    match direction {
        Direction::Forward => (handler.forward)(delta),
        Direction::Reverse => (handler.reverse)(delta),
    }
}

fn io_error(delta: &Delta) -> impl FnOnce(io::Error) -> Error + '_ {
    move |source| Error::DeltaIo {
        kind: delta.kind,
        path: delta.target_path.clone(),
        source,
    }
}

fn not_found(delta: &Delta, what: &str) -> Error {
    io_error(delta)(io::Error::new(io::ErrorKind::NotFound, what.to_string()))
}

fn old_content(delta: &Delta) -> Result<&[u8]> {
    delta.old_content.as_deref().ok_or(Error::MissingField {
        kind: delta.kind,
        field: "old_content",
    })
}

fn new_content(delta: &Delta) -> Result<&[u8]> {
    delta.new_content.as_deref().ok_or(Error::MissingField {
        kind: delta.kind,
        field: "new_content",
    })
}

fn write_fresh(delta: &Delta, bytes: &[u8]) -> Result<()> {
    let path = &delta.target_path;

    if symlink::occupied(path) {
        return match fs::read(path) {
            Ok(existing) if existing == bytes && !symlink::is_symlink(path) => Ok(()),
            _ => Err(Error::PathConflict(path.clone())),
        };
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error(delta))?;
    }
    fs::write(path, bytes).map_err(io_error(delta))
}

fn write_new_file(delta: &Delta) -> Result<()> {
    write_fresh(delta, new_content(delta)?)
}

fn restore_file(delta: &Delta) -> Result<()> {
    write_fresh(delta, old_content(delta)?)
}

fn overwrite(delta: &Delta, bytes: &[u8]) -> Result<()> {
    if !delta.target_path.is_file() {
        return Err(not_found(delta, "file to modify does not exist"));
    }
    fs::write(&delta.target_path, bytes).map_err(io_error(delta))
}

fn overwrite_with_new(delta: &Delta) -> Result<()> {
    overwrite(delta, new_content(delta)?)
}

fn overwrite_with_old(delta: &Delta) -> Result<()> {
    overwrite(delta, old_content(delta)?)
}

fn remove_file(delta: &Delta) -> Result<()> {
    match fs::remove_file(&delta.target_path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("{:?} already absent", delta.target_path);
            Ok(())
        }
        other => other.map_err(io_error(delta)),
    }
}

fn create_dir(delta: &Delta) -> Result<()> {
    let path = &delta.target_path;
    if path.is_dir() && !symlink::is_symlink(path) {
        return Ok(());
    }
    if symlink::occupied(path) {
        return Err(Error::TargetExists(path.clone()));
    }
    fs::create_dir_all(path).map_err(io_error(delta))
}

/// Directories created by an operation are only removed once empty, so
/// files added outside of tracking are never lost to an undo.
fn remove_empty_dir(delta: &Delta) -> Result<()> {
    match fs::remove_dir(&delta.target_path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other.map_err(io_error(delta)),
    }
}

fn remove_dir_tree(delta: &Delta) -> Result<()> {
    match fs::remove_dir_all(&delta.target_path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other.map_err(io_error(delta)),
    }
}

fn is_dir_link(kind: DeltaKind) -> bool {
    matches!(
        kind,
        DeltaKind::SymlinkDirCreate | DeltaKind::SymlinkDirDelete
    )
}

fn create_symlink(delta: &Delta) -> Result<()> {
    let target = delta
        .symlink_target
        .as_deref()
        .ok_or(Error::MissingSymlinkTarget(delta.kind))?;

    symlink::create(
        &delta.target_path,
        target,
        delta.relative_to.as_deref(),
        is_dir_link(delta.kind),
    )
}

/// Bring back a deleted link. Its target may have disappeared in the
/// meantime; only the link path has to be free.
fn restore_symlink(delta: &Delta) -> Result<()> {
    let target = delta
        .symlink_target
        .as_deref()
        .ok_or(Error::MissingSymlinkTarget(delta.kind))?;

    symlink::restore(
        &delta.target_path,
        target,
        delta.relative_to.as_deref(),
        is_dir_link(delta.kind),
    )
}

fn remove_symlink(delta: &Delta) -> Result<()> {
    let path: &Path = &delta.target_path;
    if !symlink::occupied(path) {
        debug!("{:?} already absent", path);
        return Ok(());
    }
    symlink::remove(path, is_dir_link(delta.kind)).map_err(io_error(delta))
}
