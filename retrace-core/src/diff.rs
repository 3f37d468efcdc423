use crate::models::{Delta, DeltaKind};
use similar::{ChangeTag, TextDiff};

#[derive(Debug, Clone)]
pub struct FileDiff {
    pub path: String,
    pub kind: DeltaKind,
    pub old_content: Option<String>,
    pub new_content: Option<String>,
    pub diff_lines: Vec<DiffLine>,
    pub binary: bool,
}

#[derive(Debug, Clone)]
pub struct DiffLine {
    pub line_type: DiffLineType,
    pub content: String,
    pub old_line_number: Option<usize>,
    pub new_line_number: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffLineType {
    Context,
    Addition,
    Deletion,
}

impl FileDiff {
    /// Line diff of a file delta's content. Creations diff against empty
    /// content, deletions against nothing. Returns `None` for directory and
    /// symlink deltas.
    pub fn from_delta(delta: &Delta) -> Option<Self> {
        if !delta.kind.is_file() {
            return None;
        }

        let decode = |bytes: &Option<Vec<u8>>| {
            bytes
                .as_ref()
                .map(|b| String::from_utf8(b.clone()).map_err(|_| ()))
                .transpose()
        };

        let path = delta.target_path.to_string_lossy().to_string();
        let (old_content, new_content) = match (decode(&delta.old_content), decode(&delta.new_content)) {
            (Ok(old), Ok(new)) => (old, new),
            _ => {
                return Some(FileDiff {
                    path,
                    kind: delta.kind,
                    old_content: None,
                    new_content: None,
                    diff_lines: Vec::new(),
                    binary: true,
                })
            }
        };

        let diff_lines = Self::compute_diff(
            old_content.as_deref().unwrap_or(""),
            new_content.as_deref().unwrap_or(""),
        );

        Some(FileDiff {
            path,
            kind: delta.kind,
            old_content,
            new_content,
            diff_lines,
            binary: false,
        })
    }

    fn compute_diff(old_text: &str, new_text: &str) -> Vec<DiffLine> {
        let diff = TextDiff::from_lines(old_text, new_text);
        let mut lines = Vec::new();
        let mut old_line_num = 1;
        let mut new_line_num = 1;

        for change in diff.iter_all_changes() {
            let (line_type, old_num, new_num) = match change.tag() {
                ChangeTag::Delete => {
                    let num = old_line_num;
                    old_line_num += 1;
                    (DiffLineType::Deletion, Some(num), None)
                }
                ChangeTag::Insert => {
                    let num = new_line_num;
                    new_line_num += 1;
                    (DiffLineType::Addition, None, Some(num))
                }
                ChangeTag::Equal => {
                    let old_num = old_line_num;
                    let new_num = new_line_num;
                    old_line_num += 1;
                    new_line_num += 1;
                    (DiffLineType::Context, Some(old_num), Some(new_num))
                }
            };

            lines.push(DiffLine {
                line_type,
                content: change.to_string(),
                old_line_number: old_num,
                new_line_number: new_num,
            });
        }

        lines
    }

    pub fn additions(&self) -> usize {
        self.count(DiffLineType::Addition)
    }

    pub fn deletions(&self) -> usize {
        self.count(DiffLineType::Deletion)
    }

    fn count(&self, line_type: DiffLineType) -> usize {
        self.diff_lines
            .iter()
            .filter(|l| l.line_type == line_type)
            .count()
    }
}
