//! The preview merge commit.
//!
//! The preview is a working-copy change in the central repo whose parents
//! are the `unassigned` workspace tip (sitting at trunk) plus each focused
//! workspace tip. Its description is machine-readable: the first line is
//! `preview`, followed by one `Preview-Workspace:` trailer per member. There
//! is at most one preview per repo; every focus-membership change abandons
//! the old one and builds a fresh one.

use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::state::{Registry, RepoEntry, RepoMode, StateDir, UNASSIGNED_WORKSPACE};
use crate::vcs::{Change, Vcs};

const PREVIEW_TITLE: &str = "preview";
const TRAILER: &str = "Preview-Workspace: ";

/// Description for a preview over the given members:
/// `"preview\n\nPreview-Workspace: a\nPreview-Workspace: b"`.
pub fn build_description(members: &[String]) -> String {
    if members.is_empty() {
        return format!("{PREVIEW_TITLE}\n");
    }
    let trailers = members
        .iter()
        .map(|m| format!("{TRAILER}{m}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{PREVIEW_TITLE}\n\n{trailers}")
}

/// Member names from a full preview description.
pub fn parse_members(description: &str) -> Vec<String> {
    description
        .lines()
        .filter_map(|line| line.strip_prefix(TRAILER))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Whether this change is a preview commit (first line is exactly
/// `preview`; the log template carries only the first line).
pub fn is_preview(change: &Change) -> bool {
    change.description == PREVIEW_TITLE
}

/// Recover focus membership from the preview commit's trailers.
///
/// `focus.json` is the source of truth, but it lives outside the repo and
/// can be lost (wiped state dir, fresh machine) while the preview commit
/// survives. The trailers carry enough to rebuild it.
pub fn recover_members(vcs: &Vcs, repo: &Path) -> Result<Option<Vec<String>>> {
    let Some(change) = find_preview(vcs, repo)? else {
        return Ok(None);
    };
    let description = vcs.full_description(&change.change_id, repo)?;
    let members = parse_members(&description);
    Ok((!members.is_empty()).then_some(members))
}

/// The current preview change, if any.
pub fn find_preview(vcs: &Vcs, repo: &Path) -> Result<Option<Change>> {
    let candidates = vcs.log(r#"mutable() & description("preview")"#, repo)?;
    Ok(candidates.into_iter().find(is_preview))
}

/// Rebuild the preview for a new focus membership.
///
/// Empty membership tears the preview down: a fresh change on trunk replaces
/// it, the old preview is abandoned, and the repo is unregistered. Otherwise
/// the `unassigned` workspace is ensured at trunk, every member is
/// snapshotted, and a new merge change over `[tip(unassigned), tips...]`
/// replaces the old preview; the repo is (re)registered with the member set.
pub fn rebuild(
    vcs: &Vcs,
    state: &StateDir,
    repo: &Path,
    members: &[String],
) -> Result<Option<Change>> {
    let old_preview = find_preview(vcs, repo)?;

    if members.is_empty() {
        let trunk = vcs.trunk_of(repo)?;
        vcs.new_change(&[trunk], "", repo)?;
        if let Some(old) = &old_preview {
            vcs.abandon(&old.change_id, repo)?;
        }
        let mut registry = Registry::load(state)?;
        if registry.remove(repo) {
            registry.store(state)?;
        }
        return Ok(None);
    }

    ensure_unassigned(vcs, state, repo)?;
    for member in members {
        let dir = state.workspace_dir(repo, member);
        vcs.snapshot(&dir)?;
    }

    let mut parents = Vec::with_capacity(members.len() + 1);
    parents.push(tip_of(vcs, repo, UNASSIGNED_WORKSPACE)?);
    for member in members {
        parents.push(tip_of(vcs, repo, member)?);
    }

    let description = build_description(members);
    let preview = vcs.new_change(&parents, &description, repo)?;

    if let Some(old) = &old_preview {
        vcs.abandon(&old.change_id, repo)?;
    }

    let mut registry = Registry::load(state)?;
    registry.upsert(RepoEntry {
        path: repo.to_path_buf(),
        mode: RepoMode::Vcs,
        focused_workspaces: Some(members.to_vec()),
    });
    registry.store(state)?;

    Ok(Some(preview))
}

/// Create the `unassigned` workspace at trunk if it is missing. It anchors
/// the preview's first parent and catches files no agent owns.
fn ensure_unassigned(vcs: &Vcs, state: &StateDir, repo: &Path) -> Result<()> {
    let dir = state.workspace_dir(repo, UNASSIGNED_WORKSPACE);
    if dir.exists() {
        return Ok(());
    }
    let trunk = vcs.trunk_of(repo)?;
    if let Some(parent) = dir.parent() {
        fs::create_dir_all(parent)?;
    }
    vcs.workspace_add(UNASSIGNED_WORKSPACE, &dir, &trunk, repo)?;
    Ok(())
}

fn tip_of(vcs: &Vcs, repo: &Path, name: &str) -> Result<String> {
    Ok(vcs.show(&format!("{name}@"), repo)?.change_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_with_members_has_one_trailer_each() {
        let description =
            build_description(&["alpha".to_string(), "beta".to_string()]);
        assert_eq!(
            description,
            "preview\n\nPreview-Workspace: alpha\nPreview-Workspace: beta"
        );
        assert!(description.starts_with("preview\n\n"));
        assert_eq!(
            description.matches("Preview-Workspace:").count(),
            2
        );
    }

    #[test]
    fn description_without_members_is_bare_title() {
        assert_eq!(build_description(&[]), "preview\n");
    }

    #[test]
    fn members_round_trip() {
        let members = vec!["alpha".to_string(), "beta".to_string()];
        assert_eq!(parse_members(&build_description(&members)), members);
    }

    #[test]
    fn parse_members_ignores_unrelated_lines() {
        let description = "preview\n\nSome note\nPreview-Workspace: gamma\nSigned-off-by: x\n";
        assert_eq!(parse_members(description), vec!["gamma"]);
    }

    #[test]
    fn is_preview_matches_title_only() {
        let mut change = sample_change();
        change.description = "preview".to_string();
        assert!(is_preview(&change));
        change.description = "preview window fix".to_string();
        assert!(!is_preview(&change));
    }

    fn sample_change() -> Change {
        Change {
            change_id: "abc".into(),
            commit_id: "def".into(),
            change_id_short: "abc".into(),
            commit_id_short: "def".into(),
            description: String::new(),
            author_name: "a".into(),
            author_email: "a@x".into(),
            timestamp: 0,
            parents: vec![],
            is_working_copy: false,
            is_immutable: false,
            is_empty: false,
            has_conflicts: false,
        }
    }
}
