//! Unified diff parser.
//!
//! Turns `git show --patch` / `diff -u` output into [`FileChange`] records.
//! Hunk bodies are consumed by the line counts in their `@@` header, so a
//! removed line that itself starts with `--` is never mistaken for a file
//! header.

use anyhow::{bail, Context, Result};

use crate::models::{Change, ChangeKind, ChangeType, FileChange, FileStats, Hunk};

/// Parse a unified diff. Malformed input is logged and yields no files.
pub fn parse_diff(text: &str) -> Vec<FileChange> {
    match try_parse(text) {
        Ok(files) => files,
        Err(e) => {
            tracing::warn!("Failed to parse diff: {e:#}");
            Vec::new()
        }
    }
}

/// Per-file state while its headers and hunks are being read.
#[derive(Default)]
struct FilePatch {
    old: Option<String>,
    new: Option<String>,
    saw_old_header: bool,
    hunks: Vec<Hunk>,
}

impl FilePatch {
    /// From `diff --git a/<old> b/<new>`.
    fn from_git_header(rest: &str) -> Self {
        let (old, new) = match rest.split_once(" b/") {
            Some((old, new)) => (old.strip_prefix("a/").unwrap_or(old), new),
            None => (rest, rest),
        };
        Self {
            old: Some(old.to_string()),
            new: Some(new.to_string()),
            ..Self::default()
        }
    }

    fn finish(self) -> FileChange {
        let mut stats = FileStats::default();
        for change in self.hunks.iter().flat_map(|h| &h.changes) {
            match change.kind {
                ChangeKind::Add => stats.additions += 1,
                ChangeKind::Delete => stats.deletions += 1,
                ChangeKind::Context => {}
            }
        }
        stats.changes = stats.additions + stats.deletions;

        let change_type = match (&self.old, &self.new) {
            (None, _) => ChangeType::Add,
            (_, None) => ChangeType::Delete,
            (Some(old), Some(new)) if old != new => ChangeType::Rename,
            _ => ChangeType::Modify,
        };

        FileChange {
            filename: self
                .new
                .clone()
                .or_else(|| self.old.clone())
                .unwrap_or_default(),
            old_path: self.old,
            new_path: self.new,
            change_type,
            hunks: self.hunks,
            stats,
        }
    }
}

fn try_parse(text: &str) -> Result<Vec<FileChange>> {
    let lines: Vec<&str> = text.lines().collect();
    let mut files = Vec::new();
    let mut current: Option<FilePatch> = None;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];

        if let Some(rest) = line.strip_prefix("diff --git ") {
            files.extend(current.take().map(FilePatch::finish));
            current = Some(FilePatch::from_git_header(rest));
        } else if line.starts_with("new file mode") {
            if let Some(patch) = current.as_mut() {
                patch.old = None;
            }
        } else if line.starts_with("deleted file mode") {
            if let Some(patch) = current.as_mut() {
                patch.new = None;
            }
        } else if let Some(rest) = line.strip_prefix("rename from ") {
            if let Some(patch) = current.as_mut() {
                patch.old = Some(rest.to_string());
            }
        } else if let Some(rest) = line.strip_prefix("rename to ") {
            if let Some(patch) = current.as_mut() {
                patch.new = Some(rest.to_string());
            }
        } else if let Some(rest) = line.strip_prefix("--- ") {
            // Plain `diff -u` output has no `diff --git` line between files.
            let starts_new_file = current
                .as_ref()
                .map_or(true, |p| p.saw_old_header || !p.hunks.is_empty());
            if starts_new_file {
                files.extend(current.take().map(FilePatch::finish));
            }
            let patch = current.get_or_insert_with(FilePatch::default);
            patch.old = parse_path(rest);
            patch.saw_old_header = true;
        } else if let Some(rest) = line.strip_prefix("+++ ") {
            current.get_or_insert_with(FilePatch::default).new = parse_path(rest);
        } else if line.starts_with("@@") {
            let (hunk, next) =
                parse_hunk(&lines, i).with_context(|| format!("in hunk at line {}", i + 1))?;
            current.get_or_insert_with(FilePatch::default).hunks.push(hunk);
            i = next;
            continue;
        }
        // `index`, `similarity index`, `Binary files ...` and commit headers
        // carry nothing we keep.
        i += 1;
    }

    files.extend(current.take().map(FilePatch::finish));
    Ok(files)
}

/// File name from a `---` / `+++` header: drops the timestamp, quotes and
/// the `a/` / `b/` prefix. `/dev/null` means the side does not exist.
fn parse_path(raw: &str) -> Option<String> {
    let path = raw.split('\t').next().unwrap_or(raw).trim();
    let path = path
        .strip_prefix('"')
        .and_then(|p| p.strip_suffix('"'))
        .unwrap_or(path);
    if path == "/dev/null" || path.is_empty() {
        return None;
    }
    let path = path
        .strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path);
    Some(path.to_string())
}

/// Parse `@@ -a,b +c,d @@`. An omitted count means 1.
fn parse_hunk_header(line: &str) -> Result<(usize, usize, usize, usize)> {
    let ranges = line
        .strip_prefix("@@ ")
        .and_then(|rest| rest.split_once(" @@"))
        .map(|(ranges, _)| ranges)
        .with_context(|| format!("malformed hunk header {line:?}"))?;

    let mut parts = ranges.split_whitespace();
    let old = parts
        .next()
        .and_then(|p| p.strip_prefix('-'))
        .with_context(|| format!("missing old range in {line:?}"))?;
    let new = parts
        .next()
        .and_then(|p| p.strip_prefix('+'))
        .with_context(|| format!("missing new range in {line:?}"))?;

    let (old_start, old_lines) = parse_range(old)?;
    let (new_start, new_lines) = parse_range(new)?;
    Ok((old_start, old_lines, new_start, new_lines))
}

fn parse_range(range: &str) -> Result<(usize, usize)> {
    let (start, count) = match range.split_once(',') {
        Some((start, count)) => (start, Some(count)),
        None => (range, None),
    };
    let start = start
        .parse()
        .with_context(|| format!("bad range start {start:?}"))?;
    let count = match count {
        Some(c) => c.parse().with_context(|| format!("bad range count {c:?}"))?,
        None => 1,
    };
    Ok((start, count))
}

/// Parse the hunk starting at `lines[start]`. Returns the hunk and the index
/// of the first line after it.
fn parse_hunk(lines: &[&str], start: usize) -> Result<(Hunk, usize)> {
    let (old_start, old_lines, new_start, new_lines) = parse_hunk_header(lines[start])?;

    let mut old_no = old_start;
    let mut new_no = new_start;
    let mut old_left = old_lines;
    let mut new_left = new_lines;
    let mut raw = Vec::new();
    let mut changes = Vec::new();
    let mut i = start + 1;

    while i < lines.len() {
        let line = lines[i];

        // `\ No newline at end of file` belongs to the previous line.
        if line.starts_with('\\') {
            raw.push(line);
            i += 1;
            continue;
        }
        if old_left == 0 && new_left == 0 {
            break;
        }

        let mut chars = line.chars();
        // Some tools strip the space off blank context lines.
        let marker = chars.next().unwrap_or(' ');
        let content = chars.as_str().to_string();

        let change = match marker {
            '+' if new_left > 0 => {
                new_left -= 1;
                new_no += 1;
                Change {
                    kind: ChangeKind::Add,
                    old_line: None,
                    new_line: Some(new_no - 1),
                    content,
                }
            }
            '-' if old_left > 0 => {
                old_left -= 1;
                old_no += 1;
                Change {
                    kind: ChangeKind::Delete,
                    old_line: Some(old_no - 1),
                    new_line: None,
                    content,
                }
            }
            ' ' if old_left > 0 && new_left > 0 => {
                old_left -= 1;
                new_left -= 1;
                old_no += 1;
                new_no += 1;
                Change {
                    kind: ChangeKind::Context,
                    old_line: Some(old_no - 1),
                    new_line: Some(new_no - 1),
                    content,
                }
            }
            _ => bail!(
                "line {} does not fit the hunk ({old_left} old / {new_left} new lines left): {line:?}",
                i + 1
            ),
        };

        changes.push(change);
        raw.push(line);
        i += 1;
    }

    let hunk = Hunk {
        old_start,
        old_lines,
        new_start,
        new_lines,
        content: raw.join("\n"),
        changes,
    };
    Ok((hunk, i))
}
