use crate::error::Result;
use crate::symlink::normalize;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

pub const STATE_DIR: &str = ".retrace";
pub const HISTORY_FILE: &str = "history.db";

/// Everything a command needs to know about the project it operates on.
///
/// Passed explicitly to the history store and the tracker; nothing in this
/// crate keeps process-wide state.
#[derive(Debug, Clone)]
pub struct Context {
    pub project_root: PathBuf,
    pub history_path: PathBuf,
    pub ignore_patterns: Vec<String>,
}

impl Context {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        let history_path = project_root.join(STATE_DIR).join(HISTORY_FILE);

        Self {
            project_root,
            history_path,
            ignore_patterns: vec![
                STATE_DIR.to_string(),
                ".git".to_string(),
                "__pycache__".to_string(),
                ".cache".to_string(),
                "target".to_string(),
                "node_modules".to_string(),
            ],
        }
    }

    pub fn with_history_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.history_path = path.into();
        self
    }

    pub fn state_dir(&self) -> PathBuf {
        self.project_root.join(STATE_DIR)
    }

    /// True if a file or directory called `name` is excluded from tracking.
    pub fn ignores(&self, name: &OsStr) -> bool {
        let name = name.to_string_lossy();
        self.ignore_patterns.iter().any(|pattern| *pattern == name)
    }

    /// True if any component of `path` below the project root matches an
    /// ignore pattern.
    pub fn is_ignored(&self, path: &Path) -> bool {
        let relative = path.strip_prefix(&self.project_root).unwrap_or(path);
        relative
            .components()
            .any(|component| self.ignores(component.as_os_str()))
    }

    /// Interpret `path` relative to the project root unless it is absolute.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            normalize(path)
        } else {
            normalize(&self.project_root.join(path))
        }
    }

    /// Remove all persisted state for this project. Test harnesses use this
    /// to start from a clean slate.
    pub fn reset(&self) -> Result<()> {
        if self.history_path.exists() {
            std::fs::remove_file(&self.history_path)?;
        }
        let state_dir = self.state_dir();
        if state_dir.is_dir() {
            std::fs::remove_dir_all(state_dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_paths() {
        let ctx = Context::new("/work/project");
        assert_eq!(
            ctx.history_path,
            PathBuf::from("/work/project/.retrace/history.db")
        );
        assert_eq!(ctx.state_dir(), PathBuf::from("/work/project/.retrace"));
    }

    #[test]
    fn test_is_ignored() {
        let ctx = Context::new("/work/project");

        assert!(ctx.is_ignored(Path::new("/work/project/.retrace/history.db")));
        assert!(ctx.is_ignored(Path::new("/work/project/gen/__pycache__/x.pyc")));
        assert!(!ctx.is_ignored(Path::new("/work/project/src/main.cpp")));
        // Only whole components match.
        assert!(!ctx.is_ignored(Path::new("/work/project/targets.txt")));
    }

    #[test]
    fn test_resolve_relative_paths() {
        let ctx = Context::new("/work/project");
        assert_eq!(
            ctx.resolve(Path::new("src/a.cpp")),
            PathBuf::from("/work/project/src/a.cpp")
        );
        assert_eq!(ctx.resolve(Path::new("/tmp/x")), PathBuf::from("/tmp/x"));
        assert_eq!(ctx.resolve(Path::new(".")), PathBuf::from("/work/project"));
    }

    #[test]
    fn test_reset_removes_state() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = Context::new(temp_dir.path());
        std::fs::create_dir_all(ctx.state_dir()).unwrap();
        std::fs::write(&ctx.history_path, "x").unwrap();

        ctx.reset().unwrap();
        assert!(!ctx.state_dir().exists());
        ctx.reset().unwrap();
    }
}
