use chrono::Local;
use colored::{ColoredString, Colorize};
use retrace_core::{DeltaKind, HistoryEntry, HistorySummary};
use std::path::Path;

/// The last `limit` entries, newest first.
pub fn newest_first(summary: &HistorySummary, limit: usize) -> impl Iterator<Item = &HistoryEntry> {
    summary.operations.iter().rev().take(limit)
}

/// One `--list` row: current marker, applied box, position, description, date.
pub fn history_line(entry: &HistoryEntry) -> String {
    let marker = if entry.current { "→" } else { " " };
    let checkbox = if entry.applied { "[x]" } else { "[ ]" };

    format!(
        "{} {} {:>3}  {}  {}",
        marker,
        checkbox,
        entry.index + 1,
        entry.description,
        entry
            .timestamp
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
    )
}

pub fn summary_line(summary: &HistorySummary) -> String {
    format!(
        "Position {} of {} (undo {}, redo {})",
        summary.current_position,
        summary.total_operations,
        if summary.can_undo { "available" } else { "unavailable" },
        if summary.can_redo { "available" } else { "unavailable" },
    )
}

pub fn kind_marker(kind: DeltaKind) -> ColoredString {
    match kind {
        DeltaKind::FileCreate => "NEW".green(),
        DeltaKind::FileModify => "MOD".yellow(),
        DeltaKind::FileDelete => "DEL".red(),
        DeltaKind::DirCreate => "MKDIR".green(),
        DeltaKind::DirDelete => "RMDIR".red(),
        DeltaKind::SymlinkFileCreate | DeltaKind::SymlinkDirCreate => "LINK".blue(),
        DeltaKind::SymlinkFileDelete | DeltaKind::SymlinkDirDelete => "UNLINK".blue(),
    }
}

/// `path` relative to the project root when it lies inside it.
pub fn relative<'a>(root: &Path, path: &'a Path) -> std::borrow::Cow<'a, str> {
    path.strip_prefix(root).unwrap_or(path).to_string_lossy()
}
