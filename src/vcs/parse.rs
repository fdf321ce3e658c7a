//! Parsers for jj's line-oriented output.
//!
//! Everything here is a pure function from text to values. I/O stays in the
//! runner; errors in a batch reject the batch instead of yielding a partial
//! result.

use indexmap::IndexMap;

use crate::error::{Error, ErrorKind, Result};

use super::types::{Bookmark, Change, ChangesetRow, DiffEntry, DiffStatus, NumstatEntry};

/// Parse `jj diff --summary` output.
///
/// Plain lines are `M path`, `A path`, `D path`; renames are
/// `R {old => new}` and yield `path = new`, `old_path = old`.
pub fn parse_diff_summary(text: &str) -> Result<Vec<DiffEntry>> {
    let mut entries = Vec::new();
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let (letter, rest) = line
            .split_once(' ')
            .ok_or_else(|| Error::parse(format!("malformed diff summary line: {line:?}")))?;
        let status = DiffStatus::from_letter(letter)
            .ok_or_else(|| Error::parse(format!("unknown diff status {letter:?} in {line:?}")))?;

        if status == DiffStatus::Renamed {
            let (old_path, new_path) = parse_rename_braces(rest)
                .ok_or_else(|| Error::parse(format!("malformed rename line: {line:?}")))?;
            entries.push(DiffEntry {
                status,
                path: new_path,
                old_path: Some(old_path),
            });
        } else {
            entries.push(DiffEntry {
                status,
                path: rest.to_string(),
                old_path: None,
            });
        }
    }
    Ok(entries)
}

/// `{src/a.ts => src/b.ts}` → `("src/a.ts", "src/b.ts")`.
///
/// jj factors common prefixes/suffixes out of the braces
/// (`src/{a.ts => b.ts}`), so the braces may sit mid-path.
fn parse_rename_braces(rest: &str) -> Option<(String, String)> {
    let open = rest.find('{')?;
    let close = rest.rfind('}')?;
    if close < open {
        return None;
    }
    let prefix = &rest[..open];
    let suffix = &rest[close + 1..];
    let inner = &rest[open + 1..close];
    let (old_mid, new_mid) = inner.split_once(" => ")?;
    Some((
        format!("{prefix}{old_mid}{suffix}"),
        format!("{prefix}{new_mid}{suffix}"),
    ))
}

/// All paths touched by a diff summary, new path before old path for renames.
pub fn parse_diff_paths(text: &str) -> Result<Vec<String>> {
    let mut paths = Vec::new();
    for entry in parse_diff_summary(text)? {
        paths.push(entry.path);
        if let Some(old) = entry.old_path {
            paths.push(old);
        }
    }
    Ok(paths)
}

/// Parse `--numstat` output: `added\tremoved\tpath` per line. Binary files
/// report `-` for both counts and map to zeros.
pub fn parse_numstat(text: &str) -> Result<IndexMap<String, NumstatEntry>> {
    let mut map = IndexMap::new();
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.splitn(3, '\t');
        let (Some(added), Some(removed), Some(path)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::parse(format!("malformed numstat line: {line:?}")));
        };
        let parse_count = |s: &str| -> Result<usize> {
            if s == "-" {
                return Ok(0);
            }
            s.parse()
                .map_err(|_| Error::parse(format!("bad numstat count {s:?} in {line:?}")))
        };
        map.insert(
            path.to_string(),
            NumstatEntry {
                added: parse_count(added)?,
                removed: parse_count(removed)?,
            },
        );
    }
    Ok(map)
}

/// Parse the JSON-per-line changeset template.
///
/// Every row must satisfy the schema; one bad row rejects the whole batch.
pub fn parse_changesets(text: &str) -> Result<Vec<Change>> {
    let mut changes = Vec::new();
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row: ChangesetRow = serde_json::from_str(line).map_err(|e| {
            Error::parse(format!("changeset row {} is malformed: {e}", index + 1))
        })?;
        if row.change_id.is_empty() || row.commit_id.is_empty() {
            return Err(Error::parse(format!(
                "changeset row {} has an empty id",
                index + 1
            )));
        }
        changes.push(row.into());
    }
    Ok(changes)
}

/// Parse the bookmark-list template: `name\tremote\ttarget\tahead\tbehind`
/// per row, with an empty remote column for local bookmarks.
pub fn parse_bookmarks(text: &str) -> Result<Vec<Bookmark>> {
    let mut bookmarks = Vec::new();
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        let [name, remote, target, ahead, behind] = fields.as_slice() else {
            return Err(Error::parse(format!("malformed bookmark row: {line:?}")));
        };
        let parse_count = |s: &str| -> Result<usize> {
            if s.is_empty() {
                return Ok(0);
            }
            s.parse()
                .map_err(|_| Error::parse(format!("bad tracking count {s:?} in {line:?}")))
        };
        bookmarks.push(Bookmark {
            name: name.to_string(),
            remote: if remote.is_empty() {
                None
            } else {
                Some(remote.to_string())
            },
            target: target.to_string(),
            ahead: parse_count(ahead)?,
            behind: parse_count(behind)?,
        });
    }
    Ok(bookmarks)
}

/// Split a possibly remote-qualified bookmark name (`name@remote`).
pub fn split_tracking_name(name: &str) -> (&str, Option<&str>) {
    match name.split_once('@') {
        Some((local, remote)) if !remote.is_empty() => (local, Some(remote)),
        _ => (name, None),
    }
}

/// Classify jj stderr by substring. Precedence:
/// not-in-repo > invalid-revision > workspace-not-found > none.
pub fn detect_error(stderr: &str) -> Option<ErrorKind> {
    if stderr.contains("no jj repo in") {
        Some(ErrorKind::NotInRepo)
    } else if stderr.contains("doesn't exist") && stderr.contains("Revision") {
        Some(ErrorKind::InvalidRevision)
    } else if stderr.contains("No such workspace") {
        Some(ErrorKind::WorkspaceNotFound)
    } else {
        None
    }
}

/// Whether a failure looks like ref-lock contention and is worth retrying.
pub fn is_lock_error(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("locked") || lower.contains("lock") || lower.contains("packed-refs")
}
