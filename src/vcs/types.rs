//! Changeset model: the entities produced by parsing jj output.

use serde::Deserialize;

/// An immutable handle to a jj revision.
///
/// Produced by [`parse_changesets`](super::parse::parse_changesets) from the
/// JSON-per-line log template; consumed read-only everywhere else. The
/// change id is stable across rewrites, the commit id is the content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub change_id: String,
    pub commit_id: String,
    pub change_id_short: String,
    pub commit_id_short: String,
    /// First line of the description.
    pub description: String,
    pub author_name: String,
    pub author_email: String,
    /// Committer timestamp, unix seconds.
    pub timestamp: i64,
    /// Parent change ids, in commit order.
    pub parents: Vec<String>,
    pub is_working_copy: bool,
    pub is_immutable: bool,
    pub is_empty: bool,
    pub has_conflicts: bool,
}

impl Change {
    /// Whether the description still carries the private workspace prefix.
    pub fn is_wip(&self) -> bool {
        self.description.starts_with(crate::workspace::WIP_PREFIX)
    }
}

/// One row of the JSON-per-line log template. The wire schema; rejected
/// wholesale on any violation rather than patched up row by row.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChangesetRow {
    pub change_id: String,
    pub commit_id: String,
    pub change_id_short: String,
    pub commit_id_short: String,
    pub description: String,
    pub author_name: String,
    pub author_email: String,
    pub timestamp: i64,
    pub parents: Vec<String>,
    pub is_working_copy: bool,
    pub is_immutable: bool,
    pub is_empty: bool,
    pub has_conflicts: bool,
}

impl From<ChangesetRow> for Change {
    fn from(row: ChangesetRow) -> Self {
        Change {
            change_id: row.change_id,
            commit_id: row.commit_id,
            change_id_short: row.change_id_short,
            commit_id_short: row.commit_id_short,
            description: row.description,
            author_name: row.author_name,
            author_email: row.author_email,
            timestamp: row.timestamp,
            parents: row.parents,
            is_working_copy: row.is_working_copy,
            is_immutable: row.is_immutable,
            is_empty: row.is_empty,
            has_conflicts: row.has_conflicts,
        }
    }
}

/// A named reference to a change, local or remote-tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bookmark {
    pub name: String,
    /// `Some("origin")` for a remote-tracking row (`name@origin`).
    pub remote: Option<String>,
    /// Target change id; empty when the bookmark is absent on this side.
    pub target: String,
    pub ahead: usize,
    pub behind: usize,
}

impl Bookmark {
    pub fn is_local(&self) -> bool {
        self.remote.is_none()
    }

    /// Rendered form: `name` or `name@remote`.
    pub fn qualified_name(&self) -> String {
        match &self.remote {
            Some(remote) => format!("{}@{}", self.name, remote),
            None => self.name.clone(),
        }
    }
}

/// One entry of a `jj diff --summary`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    pub status: DiffStatus,
    /// The (new) path.
    pub path: String,
    /// The old path, for renames.
    pub old_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffStatus {
    Modified,
    Added,
    Deleted,
    Renamed,
}

impl DiffStatus {
    pub fn from_letter(letter: &str) -> Option<Self> {
        match letter {
            "M" => Some(Self::Modified),
            "A" => Some(Self::Added),
            "D" => Some(Self::Deleted),
            "R" => Some(Self::Renamed),
            _ => None,
        }
    }
}

/// Line counts for one path of a numstat. Binary entries parse as zeros.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NumstatEntry {
    pub added: usize,
    pub removed: usize,
}
