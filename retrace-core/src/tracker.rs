//! Per-command delta accumulation.
//!
//! A [`Tracker`] performs each filesystem mutation through the delta handlers
//! and keeps the resulting deltas. [`Tracker::finalize`] bundles them into one
//! [`Operation`] and records it in the [`HistoryStore`].

use crate::context::Context;
use crate::delta;
use crate::error::{Error, Result};
use crate::history::HistoryStore;
use crate::models::{Delta, DeltaKind, Operation};
use crate::symlink;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

pub struct Tracker<'a> {
    ctx: &'a Context,
    description: String,
    deltas: Vec<Delta>,
}

/// What occupied a path when a directory was snapshotted.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    File(Vec<u8>),
    Dir,
    Symlink {
        target: PathBuf,
        relative_to: Option<PathBuf>,
        dir_link: bool,
    },
}

type Snapshot = BTreeMap<PathBuf, Entry>;

impl<'a> Tracker<'a> {
    pub fn new(ctx: &'a Context, description: impl Into<String>) -> Self {
        Self {
            ctx,
            description: description.into(),
            deltas: Vec::new(),
        }
    }

    pub fn deltas(&self) -> &[Delta] {
        &self.deltas
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    /// Queue a delta that has not been applied yet. It is applied forward when
    /// the tracker is finalized.
    pub fn push(&mut self, mut delta: Delta) {
        delta.target_path = self.ctx.resolve(&delta.target_path);
        delta.processed = false;
        self.deltas.push(delta);
    }

    fn apply_and_record(&mut self, delta: Delta) -> Result<()> {
        delta::apply_forward(&delta)?;
        self.deltas.push(delta.processed());
        Ok(())
    }

    /// Create `path` and any missing ancestors, one delta per directory,
    /// outermost first.
    fn ensure_dirs(&mut self, path: &Path) -> Result<()> {
        let mut missing = Vec::new();
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() || ancestor.is_dir() {
                break;
            }
            if symlink::occupied(ancestor) {
                return Err(Error::TargetExists(ancestor.to_path_buf()));
            }
            missing.push(ancestor.to_path_buf());
        }

        for dir in missing.into_iter().rev() {
            self.apply_and_record(Delta::new(DeltaKind::DirCreate, dir))?;
        }
        Ok(())
    }

    fn ensure_parent(&mut self, path: &Path) -> Result<()> {
        match path.parent() {
            Some(parent) => self.ensure_dirs(parent),
            None => Ok(()),
        }
    }

    pub fn track_file_create(&mut self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) -> Result<()> {
        let path = self.ctx.resolve(path.as_ref());
        let content = content.into();

        if symlink::occupied(&path) {
            let unchanged = !symlink::is_symlink(&path)
                && fs::read(&path).map(|existing| existing == content).unwrap_or(false);
            if unchanged {
                debug!("{:?} already has the requested content", path);
                return Ok(());
            }
            return Err(Error::PathConflict(path));
        }

        self.ensure_parent(&path)?;
        self.apply_and_record(Delta::new(DeltaKind::FileCreate, path).with_new_content(content))
    }

    /// Record a content change to an existing file. Identical content records
    /// nothing.
    pub fn track_file_modify(&mut self, path: impl AsRef<Path>, new_content: impl Into<Vec<u8>>) -> Result<()> {
        let path = self.ctx.resolve(path.as_ref());
        let new_content = new_content.into();

        let old_content = fs::read(&path).map_err(|source| Error::DeltaIo {
            kind: DeltaKind::FileModify,
            path: path.clone(),
            source,
        })?;

        if old_content == new_content {
            debug!("{:?} unchanged, no delta recorded", path);
            return Ok(());
        }

        self.apply_and_record(
            Delta::new(DeltaKind::FileModify, path)
                .with_old_content(old_content)
                .with_new_content(new_content),
        )
    }

    /// Dispatch to modification when a regular file already exists at `path`,
    /// creation otherwise.
    pub fn track_file_create_or_modify(
        &mut self,
        path: impl AsRef<Path>,
        new_content: impl Into<Vec<u8>>,
    ) -> Result<()> {
        let path = self.ctx.resolve(path.as_ref());
        let is_file = fs::symlink_metadata(&path)
            .map(|meta| meta.is_file())
            .unwrap_or(false);

        if is_file {
            self.track_file_modify(path, new_content)
        } else {
            self.track_file_create(path, new_content)
        }
    }

    pub fn track_file_delete(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = self.ctx.resolve(path.as_ref());
        if symlink::is_symlink(&path) {
            return Err(Error::InvalidOperation(format!(
                "{} is a symlink, track it as a symlink deletion",
                path.display()
            )));
        }

        let content = fs::read(&path).map_err(|source| Error::DeltaIo {
            kind: DeltaKind::FileDelete,
            path: path.clone(),
            source,
        })?;

        self.apply_and_record(Delta::new(DeltaKind::FileDelete, path).with_old_content(content))
    }

    pub fn track_dir_create(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = self.ctx.resolve(path.as_ref());
        if symlink::is_symlink(&path) {
            return Err(Error::TargetExists(path));
        }
        self.ensure_dirs(&path)
    }

    /// Delete a directory and everything below it, recording one delta per
    /// entry so the whole subtree comes back on undo.
    ///
    /// Links inside the subtree are removed first, so undo recreates them only
    /// after the files and directories they point at are back.
    pub fn track_dir_delete(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = self.ctx.resolve(path.as_ref());
        let meta = fs::symlink_metadata(&path).map_err(|source| Error::DeltaIo {
            kind: DeltaKind::DirDelete,
            path: path.clone(),
            source,
        })?;
        if !meta.is_dir() {
            return Err(Error::InvalidOperation(format!(
                "{} is not a directory",
                path.display()
            )));
        }

        let mut links = Vec::new();
        let mut others = Vec::new();
        for entry in WalkDir::new(&path)
            .follow_links(false)
            .contents_first(true)
            .sort_by_file_name()
        {
            let entry = entry.map_err(io::Error::from)?;
            let entry_path = entry.path().to_path_buf();
            let delta = removal_delta(&entry_path, &capture_entry(&entry_path)?);
            if delta.kind.is_symlink() {
                links.push(delta);
            } else {
                others.push(delta);
            }
        }

        for delta in links.into_iter().chain(others) {
            self.apply_and_record(delta)?;
        }
        Ok(())
    }

    fn track_symlink_create(
        &mut self,
        kind: DeltaKind,
        path: &Path,
        target: &Path,
        relative_to: Option<&Path>,
    ) -> Result<()> {
        let path = self.ctx.resolve(path);
        let target = self.ctx.resolve(target);
        let relative_to = relative_to.map(|base| self.ctx.resolve(base));

        symlink::validate_creation(
            &path,
            &target,
            relative_to.as_deref(),
            kind == DeltaKind::SymlinkDirCreate,
        )?;

        self.ensure_parent(&path)?;
        self.apply_and_record(Delta::new(kind, path).with_symlink(target, relative_to))
    }

    fn track_symlink_delete(&mut self, kind: DeltaKind, path: &Path, target: &Path) -> Result<()> {
        let path = self.ctx.resolve(path);
        if !symlink::is_symlink(&path) {
            return Err(Error::InvalidOperation(format!(
                "{} is not a symlink",
                path.display()
            )));
        }

        let (captured, relative_to) = symlink::capture(&path)?;
        let target = self.ctx.resolve(target);
        if !same_target(&captured, &target) {
            return Err(Error::InvalidSymlinkTarget {
                path: target,
                reason: format!("{} points to {}", path.display(), captured.display()),
            });
        }

        self.apply_and_record(Delta::new(kind, path).with_symlink(captured, relative_to))
    }

    pub fn track_file_symlink_create(
        &mut self,
        path: impl AsRef<Path>,
        target: impl AsRef<Path>,
        relative_to: Option<&Path>,
    ) -> Result<()> {
        self.track_symlink_create(
            DeltaKind::SymlinkFileCreate,
            path.as_ref(),
            target.as_ref(),
            relative_to,
        )
    }

    pub fn track_file_symlink_delete(&mut self, path: impl AsRef<Path>, target: impl AsRef<Path>) -> Result<()> {
        self.track_symlink_delete(DeltaKind::SymlinkFileDelete, path.as_ref(), target.as_ref())
    }

    pub fn track_dir_symlink_create(
        &mut self,
        path: impl AsRef<Path>,
        target: impl AsRef<Path>,
        relative_to: Option<&Path>,
    ) -> Result<()> {
        self.track_symlink_create(
            DeltaKind::SymlinkDirCreate,
            path.as_ref(),
            target.as_ref(),
            relative_to,
        )
    }

    pub fn track_dir_symlink_delete(&mut self, path: impl AsRef<Path>, target: impl AsRef<Path>) -> Result<()> {
        self.track_symlink_delete(DeltaKind::SymlinkDirDelete, path.as_ref(), target.as_ref())
    }

    /// Run an external generator that writes below `root` and record what it
    /// changed.
    ///
    /// The subtree is snapshotted before and after the generator runs; the
    /// differences become processed deltas. Changes are recorded even when the
    /// generator fails, and the generator's own result is returned.
    ///
    /// Concurrent writers to `root` while the generator runs are attributed to
    /// this operation as well.
    pub fn track_batch<T, E, F>(&mut self, root: impl AsRef<Path>, generator: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: From<Error>,
    {
        let root = self.ctx.resolve(root.as_ref());
        let before = self.snapshot(&root)?;
        debug!("Snapshotted {} entries under {:?}", before.len(), root);

        let result = generator();

        let after = match self.snapshot(&root) {
            Ok(after) => after,
            Err(e) if result.is_err() => {
                error!("Could not scan {:?} after failed generator: {}", root, e);
                return result;
            }
            Err(e) => return Err(e.into()),
        };

        let deltas = diff_snapshots(&before, &after);
        info!(
            "Generator under {:?} produced {} change(s)",
            root,
            deltas.len()
        );
        self.deltas.extend(deltas);

        result
    }

    fn snapshot(&self, root: &Path) -> Result<Snapshot> {
        let mut snapshot = Snapshot::new();
        if !symlink::occupied(root) {
            return Ok(snapshot);
        }

        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !self.ctx.ignores(entry.file_name()));

        for entry in walker {
            let entry = entry.map_err(io::Error::from)?;
            let path = entry.path().to_path_buf();
            let captured = capture_entry(&path)?;
            snapshot.insert(path, captured);
        }

        Ok(snapshot)
    }

    /// Apply any queued deltas, then record everything as one operation.
    ///
    /// Returns the recorded operation's id, or `None` when nothing was
    /// tracked. With `append == false` the operation replaces the most recent
    /// applied entry instead of adding a new one. If a queued delta fails,
    /// the deltas applied so far are still recorded and the error returned.
    pub fn finalize(mut self, store: &mut HistoryStore, append: bool) -> Result<Option<Uuid>> {
        let mut deltas = std::mem::take(&mut self.deltas);
        let mut failure = None;

        for delta in deltas.iter_mut().filter(|d| !d.processed) {
            match delta::apply_forward(delta) {
                Ok(()) => delta.processed = true,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        deltas.retain(|d| d.processed);

        let recorded = match Operation::new(self.description.clone(), deltas) {
            Some(operation) => {
                let id = operation.id;
                store.record(operation, append)?;
                Some(id)
            }
            None => {
                debug!("'{}' tracked no changes, nothing recorded", self.description);
                None
            }
        };

        match failure {
            Some(e) => Err(e),
            None => Ok(recorded),
        }
    }
}

impl Drop for Tracker<'_> {
    fn drop(&mut self) {
        if !self.deltas.is_empty() {
            warn!(
                "Tracker for '{}' dropped with {} unrecorded delta(s)",
                self.description,
                self.deltas.len()
            );
        }
    }
}

/// Open a tracker, run `f`, and finalize on every exit path.
///
/// A failing command still has its partial changes recorded so they can be
/// undone. If finalizing fails as well, the command's error is returned and
/// the finalize error is logged.
pub fn tracked<T, E, F>(
    ctx: &Context,
    store: &mut HistoryStore,
    description: impl Into<String>,
    f: F,
) -> std::result::Result<T, E>
where
    F: FnOnce(&mut Tracker<'_>) -> std::result::Result<T, E>,
    E: From<Error>,
{
    let mut tracker = Tracker::new(ctx, description);
    let result = f(&mut tracker);
    let finalized = tracker.finalize(store, true);

    match (result, finalized) {
        (Ok(value), Ok(_)) => Ok(value),
        (Ok(_), Err(e)) => Err(e.into()),
        (Err(e), Ok(_)) => Err(e),
        (Err(e), Err(finalize_error)) => {
            error!("Failed to record partial operation: {}", finalize_error);
            Err(e)
        }
    }
}

/// Lexically equal, or both resolve to the same existing path.
fn same_target(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn capture_entry(path: &Path) -> Result<Entry> {
    let meta = fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() {
        let (target, relative_to) = symlink::capture(path)?;
        let dir_link = fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false);
        Ok(Entry::Symlink {
            target,
            relative_to,
            dir_link,
        })
    } else if meta.is_dir() {
        Ok(Entry::Dir)
    } else {
        Ok(Entry::File(fs::read(path)?))
    }
}

fn removal_delta(path: &Path, entry: &Entry) -> Delta {
    match entry {
        Entry::File(content) => {
            Delta::new(DeltaKind::FileDelete, path).with_old_content(content.clone())
        }
        Entry::Dir => Delta::new(DeltaKind::DirDelete, path),
        Entry::Symlink {
            target,
            relative_to,
            dir_link,
        } => {
            let kind = if *dir_link {
                DeltaKind::SymlinkDirDelete
            } else {
                DeltaKind::SymlinkFileDelete
            };
            Delta::new(kind, path).with_symlink(target, relative_to.clone())
        }
    }
}

fn creation_delta(path: &Path, entry: &Entry) -> Delta {
    match entry {
        Entry::File(content) => {
            Delta::new(DeltaKind::FileCreate, path).with_new_content(content.clone())
        }
        Entry::Dir => Delta::new(DeltaKind::DirCreate, path),
        Entry::Symlink {
            target,
            relative_to,
            dir_link,
        } => {
            let kind = if *dir_link {
                DeltaKind::SymlinkDirCreate
            } else {
                DeltaKind::SymlinkFileCreate
            };
            Delta::new(kind, path).with_symlink(target, relative_to.clone())
        }
    }
}

/// Deltas turning `before` into `after`, all marked processed.
///
/// Order: link removals, other removals (deepest paths first), creations and
/// modifications (parents before children), link creations. Replaying the list
/// forward or backward therefore never creates a link before its target.
fn diff_snapshots(before: &Snapshot, after: &Snapshot) -> Vec<Delta> {
    let mut link_removals = Vec::new();
    let mut removals = Vec::new();
    let mut replaced = HashSet::new();

    for (path, old) in before.iter().rev() {
        let same_type = matches!(
            (old, after.get(path)),
            (Entry::File(_), Some(Entry::File(_))) | (Entry::Dir, Some(Entry::Dir))
        );
        let same_link = matches!(after.get(path), Some(new) if new == old);

        if !same_type && !same_link {
            let delta = removal_delta(path, old).processed();
            if delta.kind.is_symlink() {
                link_removals.push(delta);
            } else {
                removals.push(delta);
            }
            replaced.insert(path.clone());
        }
    }

    let mut creations = Vec::new();
    let mut link_creations = Vec::new();

    for (path, new) in after {
        let delta = match (before.get(path), new) {
            (Some(_), _) if replaced.contains(path) => creation_delta(path, new),
            (None, _) => creation_delta(path, new),
            (Some(Entry::File(old)), Entry::File(content)) if old != content => {
                Delta::new(DeltaKind::FileModify, path)
                    .with_old_content(old.clone())
                    .with_new_content(content.clone())
            }
            _ => continue,
        };

        if delta.kind.is_symlink() {
            link_creations.push(delta.processed());
        } else {
            creations.push(delta.processed());
        }
    }

    link_removals
        .into_iter()
        .chain(removals)
        .chain(creations)
        .chain(link_creations)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Context, HistoryStore) {
        let temp_dir = TempDir::new().unwrap();
        let ctx = Context::new(temp_dir.path());
        let store = HistoryStore::in_memory().unwrap();
        (temp_dir, ctx, store)
    }

    #[test]
    fn test_unchanged_modification_records_nothing() {
        let (temp_dir, ctx, _store) = setup();
        fs::write(temp_dir.path().join("a.txt"), "same").unwrap();

        let mut tracker = Tracker::new(&ctx, "noop");
        tracker.track_file_modify("a.txt", "same").unwrap();
        tracker.track_file_create_or_modify("a.txt", "same").unwrap();

        assert!(tracker.is_empty());
    }

    #[test]
    fn test_create_or_modify_dispatch() {
        let (temp_dir, ctx, _store) = setup();
        let mut tracker = Tracker::new(&ctx, "write");

        tracker.track_file_create_or_modify("a.txt", "v1").unwrap();
        tracker.track_file_create_or_modify("a.txt", "v2").unwrap();

        let kinds: Vec<_> = tracker.deltas().iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![DeltaKind::FileCreate, DeltaKind::FileModify]);
        assert_eq!(fs::read_to_string(temp_dir.path().join("a.txt")).unwrap(), "v2");
        assert!(tracker.deltas().iter().all(|d| d.processed));
    }

    #[test]
    fn test_missing_parents_are_tracked() {
        let (temp_dir, ctx, mut store) = setup();
        let mut tracker = Tracker::new(&ctx, "nested");
        tracker.track_file_create("a/b/c.txt", "x").unwrap();

        let kinds: Vec<_> = tracker.deltas().iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![DeltaKind::DirCreate, DeltaKind::DirCreate, DeltaKind::FileCreate]
        );

        tracker.finalize(&mut store, true).unwrap();
        store.undo(1).unwrap();
        assert!(!temp_dir.path().join("a").exists());
    }

    #[test]
    fn test_create_conflict_is_rejected() {
        let (temp_dir, ctx, _store) = setup();
        fs::write(temp_dir.path().join("a.txt"), "theirs").unwrap();

        let mut tracker = Tracker::new(&ctx, "conflict");
        let err = tracker.track_file_create("a.txt", "ours").unwrap_err();

        assert!(matches!(err, Error::PathConflict(_)));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_dir_delete_round_trip() {
        let (temp_dir, ctx, mut store) = setup();
        let module = temp_dir.path().join("module");
        fs::create_dir_all(module.join("include")).unwrap();
        fs::write(module.join("include").join("a.h"), "#pragma once").unwrap();
        fs::write(module.join("CMakeLists.txt"), "project(m)").unwrap();

        let mut tracker = Tracker::new(&ctx, "remove module");
        tracker.track_dir_delete("module").unwrap();
        assert_eq!(tracker.deltas().last().unwrap().kind, DeltaKind::DirDelete);
        tracker.finalize(&mut store, true).unwrap();
        assert!(!module.exists());

        store.undo(1).unwrap();
        assert_eq!(
            fs::read_to_string(module.join("include").join("a.h")).unwrap(),
            "#pragma once"
        );
        assert_eq!(
            fs::read_to_string(module.join("CMakeLists.txt")).unwrap(),
            "project(m)"
        );
    }

    #[test]
    fn test_batch_tracks_generator_changes() {
        let (temp_dir, ctx, mut store) = setup();
        let out = temp_dir.path().join("out");
        fs::create_dir(&out).unwrap();
        fs::write(out.join("keep.txt"), "old").unwrap();
        fs::write(out.join("stale.txt"), "stale").unwrap();
        fs::write(out.join("same.txt"), "same").unwrap();

        let mut tracker = Tracker::new(&ctx, "generate");
        let value: Result<u32> = tracker.track_batch("out", || {
            fs::write(out.join("keep.txt"), "new")?;
            fs::remove_file(out.join("stale.txt"))?;
            fs::create_dir(out.join("src"))?;
            fs::write(out.join("src").join("gen.cpp"), "int x;")?;
            fs::create_dir(out.join("__pycache__"))?;
            fs::write(out.join("__pycache__").join("c.pyc"), "cache")?;
            Ok(7)
        });
        assert_eq!(value.unwrap(), 7);

        let kinds: Vec<_> = tracker.deltas().iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![
                DeltaKind::FileDelete,
                DeltaKind::FileModify,
                DeltaKind::DirCreate,
                DeltaKind::FileCreate,
            ]
        );
        assert!(tracker.deltas().iter().all(|d| d.processed));

        tracker.finalize(&mut store, true).unwrap();
        fs::remove_dir_all(out.join("__pycache__")).unwrap();
        store.undo(1).unwrap();

        assert_eq!(fs::read_to_string(out.join("keep.txt")).unwrap(), "old");
        assert_eq!(fs::read_to_string(out.join("stale.txt")).unwrap(), "stale");
        assert!(!out.join("src").exists());
    }

    #[test]
    fn test_batch_records_changes_of_failed_generator() {
        let (temp_dir, ctx, _store) = setup();
        let mut tracker = Tracker::new(&ctx, "generate");

        let result: Result<()> = tracker.track_batch(".", || {
            fs::write(temp_dir.path().join("half.txt"), "partial")?;
            Err(Error::InvalidOperation("generator crashed".to_string()))
        });

        assert!(result.is_err());
        assert_eq!(tracker.deltas().len(), 1);
        assert_eq!(tracker.deltas()[0].kind, DeltaKind::FileCreate);
    }

    #[test]
    fn test_pending_deltas_apply_on_finalize() {
        let (temp_dir, ctx, mut store) = setup();
        let mut tracker = Tracker::new(&ctx, "deferred");
        tracker.push(Delta::new(DeltaKind::FileCreate, "later.txt").with_new_content(b"x".to_vec()));
        assert!(!temp_dir.path().join("later.txt").exists());

        let id = tracker.finalize(&mut store, true).unwrap();
        assert!(id.is_some());
        assert!(temp_dir.path().join("later.txt").exists());
        assert!(store.operations()[0].deltas[0].processed);
    }

    #[test]
    fn test_empty_tracker_records_nothing() {
        let (_temp_dir, ctx, mut store) = setup();
        let tracker = Tracker::new(&ctx, "nothing");

        assert_eq!(tracker.finalize(&mut store, true).unwrap(), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_tracked_records_partial_work_on_error() {
        let (temp_dir, ctx, mut store) = setup();

        let result: Result<()> = tracked(&ctx, &mut store, "half done", |tracker| {
            tracker.track_file_create("first.txt", "1")?;
            tracker.track_file_delete("missing.txt")?;
            Ok(())
        });

        assert!(result.is_err());
        assert_eq!(store.len(), 1);
        assert_eq!(store.operations()[0].deltas.len(), 1);

        store.undo(1).unwrap();
        assert!(!temp_dir.path().join("first.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_validation_happens_before_mutation() {
        let (temp_dir, ctx, _store) = setup();
        fs::write(temp_dir.path().join("real.txt"), "x").unwrap();
        std::os::unix::fs::symlink(temp_dir.path().join("real.txt"), temp_dir.path().join("alias"))
            .unwrap();

        let mut tracker = Tracker::new(&ctx, "chain");
        let err = tracker
            .track_file_symlink_create("deep/link", "alias", None)
            .unwrap_err();

        assert!(matches!(err, Error::InvalidSymlinkTarget { .. }));
        assert!(!temp_dir.path().join("deep").exists());
        assert!(tracker.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_dir_delete_with_links_round_trip() {
        use std::os::unix::fs::symlink as unix_symlink;

        let (temp_dir, ctx, mut store) = setup();
        let module = temp_dir.path().join("m");
        fs::create_dir(&module).unwrap();
        fs::write(module.join("a.txt"), "payload").unwrap();
        unix_symlink("a.txt", module.join("z_link")).unwrap();
        unix_symlink("missing.txt", module.join("dangling")).unwrap();

        let mut tracker = Tracker::new(&ctx, "remove m");
        tracker.track_dir_delete("m").unwrap();
        let kinds: Vec<_> = tracker.deltas().iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![
                DeltaKind::SymlinkFileDelete,
                DeltaKind::SymlinkFileDelete,
                DeltaKind::FileDelete,
                DeltaKind::DirDelete,
            ]
        );
        tracker.finalize(&mut store, true).unwrap();
        assert!(!module.exists());

        store.undo(1).unwrap();
        assert_eq!(fs::read_link(module.join("z_link")).unwrap(), PathBuf::from("a.txt"));
        assert_eq!(fs::read_to_string(module.join("z_link")).unwrap(), "payload");
        assert_eq!(
            fs::read_link(module.join("dangling")).unwrap(),
            PathBuf::from("missing.txt")
        );

        store.redo(1).unwrap();
        assert!(!module.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_batch_links_survive_undo_and_redo() {
        use std::os::unix::fs::symlink as unix_symlink;

        let (temp_dir, ctx, mut store) = setup();
        let out = temp_dir.path().join("out");
        fs::create_dir(&out).unwrap();

        let mut tracker = Tracker::new(&ctx, "generate");
        let result: Result<()> = tracker.track_batch("out", || {
            fs::write(out.join("z.txt"), "z")?;
            unix_symlink("z.txt", out.join("a_link"))?;
            Ok(())
        });
        result.unwrap();
        let kinds: Vec<_> = tracker.deltas().iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![DeltaKind::FileCreate, DeltaKind::SymlinkFileCreate]);
        tracker.finalize(&mut store, true).unwrap();

        store.undo(1).unwrap();
        assert!(!symlink::occupied(&out.join("a_link")));
        assert!(!out.join("z.txt").exists());

        store.redo(1).unwrap();
        assert_eq!(fs::read_link(out.join("a_link")).unwrap(), PathBuf::from("z.txt"));
        assert_eq!(fs::read_to_string(out.join("a_link")).unwrap(), "z");

        let mut tracker = Tracker::new(&ctx, "clean");
        let result: Result<()> = tracker.track_batch("out", || {
            fs::remove_file(out.join("a_link"))?;
            fs::remove_file(out.join("z.txt"))?;
            Ok(())
        });
        result.unwrap();
        let kinds: Vec<_> = tracker.deltas().iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![DeltaKind::SymlinkFileDelete, DeltaKind::FileDelete]);
        tracker.finalize(&mut store, true).unwrap();

        store.undo(1).unwrap();
        assert_eq!(fs::read_link(out.join("a_link")).unwrap(), PathBuf::from("z.txt"));
        assert_eq!(fs::read_to_string(out.join("z.txt")).unwrap(), "z");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_delete_rejects_wrong_target() {
        let (temp_dir, ctx, _store) = setup();
        fs::write(temp_dir.path().join("real.txt"), "r").unwrap();
        fs::write(temp_dir.path().join("other.txt"), "o").unwrap();
        std::os::unix::fs::symlink("real.txt", temp_dir.path().join("link")).unwrap();

        let mut tracker = Tracker::new(&ctx, "unlink");
        let err = tracker
            .track_file_symlink_delete("link", "other.txt")
            .unwrap_err();

        assert!(matches!(err, Error::InvalidSymlinkTarget { .. }));
        assert!(symlink::is_symlink(&temp_dir.path().join("link")));
        assert!(tracker.is_empty());

        tracker
            .track_file_symlink_delete("link", "real.txt")
            .unwrap();
        assert_eq!(
            tracker.deltas()[0].symlink_target.as_deref(),
            Some(temp_dir.path().join("real.txt").as_path())
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_delete_can_be_undone() {
        let (temp_dir, ctx, mut store) = setup();
        let link = temp_dir.path().join("dangling");
        std::os::unix::fs::symlink("gone.txt", &link).unwrap();

        let mut tracker = Tracker::new(&ctx, "unlink");
        tracker.track_file_symlink_delete("dangling", "gone.txt").unwrap();
        tracker.finalize(&mut store, true).unwrap();
        assert!(!symlink::occupied(&link));

        store.undo(1).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("gone.txt"));
    }

    #[test]
    fn test_finalize_without_append_amends_last_operation() {
        let (temp_dir, ctx, mut store) = setup();

        let mut tracker = Tracker::new(&ctx, "first");
        tracker.track_file_create("a.txt", "a").unwrap();
        tracker.finalize(&mut store, true).unwrap();

        let mut tracker = Tracker::new(&ctx, "second");
        tracker.track_file_create("b.txt", "b").unwrap();
        tracker.finalize(&mut store, false).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.position(), 1);
        assert_eq!(store.operations()[0].description, "second");

        store.undo(1).unwrap();
        assert!(!temp_dir.path().join("b.txt").exists());
        assert!(temp_dir.path().join("a.txt").exists());
    }

    #[test]
    fn test_diff_snapshots_handles_type_change() {
        let mut before = Snapshot::new();
        before.insert(PathBuf::from("/p/x"), Entry::File(b"f".to_vec()));
        let mut after = Snapshot::new();
        after.insert(PathBuf::from("/p/x"), Entry::Dir);

        let kinds: Vec<_> = diff_snapshots(&before, &after)
            .iter()
            .map(|d| d.kind)
            .collect();
        assert_eq!(kinds, vec![DeltaKind::FileDelete, DeltaKind::DirCreate]);
    }

    #[test]
    fn test_diff_snapshots_orders_links_around_targets() {
        let link = Entry::Symlink {
            target: PathBuf::from("/p/z.txt"),
            relative_to: Some(PathBuf::from("/p")),
            dir_link: false,
        };
        let mut before = Snapshot::new();
        before.insert(PathBuf::from("/p/a_link"), link.clone());
        before.insert(PathBuf::from("/p/z.txt"), Entry::File(b"z".to_vec()));

        let kinds: Vec<_> = diff_snapshots(&before, &Snapshot::new())
            .iter()
            .map(|d| d.kind)
            .collect();
        assert_eq!(kinds, vec![DeltaKind::SymlinkFileDelete, DeltaKind::FileDelete]);

        let kinds: Vec<_> = diff_snapshots(&Snapshot::new(), &before)
            .iter()
            .map(|d| d.kind)
            .collect();
        assert_eq!(kinds, vec![DeltaKind::FileCreate, DeltaKind::SymlinkFileCreate]);
    }
}
