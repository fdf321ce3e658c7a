//! Moving the working copy around the stack, and handing the repo back to
//! plain git.

use std::path::Path;

use crate::error::{Error, ErrorKind, Result};
use crate::exec::Cmd;
use crate::state::{Registry, RepoEntry, RepoMode, StateDir, UNASSIGNED_WORKSPACE};
use crate::sync::copy_if_different;
use crate::vcs::{Change, DiffStatus, Vcs};

/// How far up the ancestry `exit` searches for a bookmark.
const EXIT_BOOKMARK_SEARCH_DEPTH: usize = 10;

/// Edit an arbitrary change.
pub fn checkout(vcs: &Vcs, cwd: &Path, target: &str) -> Result<Change> {
    vcs.run_with_lock_retry(&["edit", target], cwd)
        .map_err(|e| match e.kind {
            ErrorKind::InvalidRevision => Error::new(
                ErrorKind::NavigationFailed,
                format!("cannot check out {target:?}: no such revision"),
            ),
            _ => e,
        })?;
    vcs.working_copy(cwd)
}

/// Move one step toward the tip. At the tip of a described change, a new
/// empty change is created on top instead.
pub fn up(vcs: &Vcs, cwd: &Path) -> Result<Change> {
    let children = vcs.log("@+", cwd)?;
    match children.len() {
        0 => {
            let current = vcs.working_copy(cwd)?;
            if current.description.trim().is_empty() {
                return Err(Error::navigation_failed(
                    "already at the tip; describe this change before stacking on it",
                ));
            }
            vcs.new_change(&[current.change_id], "", cwd)
        }
        1 => checkout(vcs, cwd, &children[0].change_id),
        _ => Err(Error::navigation_failed(
            "multiple children; use checkout with an explicit revision",
        )),
    }
}

/// Move one step toward trunk. When the parent is immutable (trunk itself),
/// a new empty child on trunk is created instead of editing it.
pub fn down(vcs: &Vcs, cwd: &Path) -> Result<Change> {
    let parents = vcs.log("@-", cwd)?;
    match parents.len() {
        0 => Err(Error::navigation_failed("no parent to move to")),
        1 => {
            let parent = &parents[0];
            if parent.is_immutable {
                vcs.new_change(&[parent.change_id.clone()], "", cwd)
            } else {
                checkout(vcs, cwd, &parent.change_id)
            }
        }
        _ => Err(Error::navigation_failed(
            "multiple parents; use checkout with an explicit revision",
        )),
    }
}

/// Jump to the head of the current stack.
pub fn top(vcs: &Vcs, cwd: &Path) -> Result<Change> {
    let heads = vcs.log("heads(@::)", cwd)?;
    match heads.as_slice() {
        [] => Err(Error::navigation_failed("no descendant head found")),
        [head] => {
            if head.is_working_copy {
                Ok(head.clone())
            } else {
                checkout(vcs, cwd, &head.change_id)
            }
        }
        _ => Err(Error::navigation_failed(
            "multiple descendant heads; use checkout with an explicit revision",
        )),
    }
}

/// Leave braid mode: point git's HEAD at the nearest ancestor bookmark
/// (trunk as fallback), surface any unassigned-workspace files in the repo
/// working tree, and flip the registry entry to plain so the daemon stops
/// syncing.
pub fn exit_to_git(vcs: &Vcs, state: &StateDir, repo: &Path) -> Result<String> {
    let branch = nearest_ancestor_bookmark(vcs, repo)?;

    // Make sure the bookmark exists as a git ref before HEAD points at it.
    vcs.git_export(repo)?;

    let cmd = Cmd::new("git")
        .args(["symbolic-ref", "HEAD", &format!("refs/heads/{branch}")])
        .current_dir(repo);
    let output = vcs.exec().run(&cmd)?;
    if !output.success() {
        return Err(
            Error::command_failed(format!("failed to point HEAD at {branch}"))
                .with_command(cmd.display(), output.stderr),
        );
    }

    copy_unassigned_into_repo(vcs, state, repo)?;

    let mut registry = Registry::load(state)?;
    let focused = registry
        .find(repo)
        .and_then(|entry| entry.focused_workspaces.clone());
    registry.upsert(RepoEntry {
        path: repo.to_path_buf(),
        mode: RepoMode::Plain,
        focused_workspaces: focused,
    });
    registry.store(state)?;

    Ok(branch)
}

/// The first local bookmark on an ancestor of `@`, nearest first, within
/// the search depth; trunk otherwise.
fn nearest_ancestor_bookmark(vcs: &Vcs, repo: &Path) -> Result<String> {
    let ancestors = vcs.log(
        &format!("ancestors(@, {EXIT_BOOKMARK_SEARCH_DEPTH})"),
        repo,
    )?;
    let bookmarks = vcs.bookmarks(repo)?;
    // `log` returns oldest first; walk from the tip down.
    for change in ancestors.iter().rev() {
        if let Some(bookmark) = bookmarks
            .iter()
            .find(|b| b.is_local() && b.target == change.change_id)
        {
            return Ok(bookmark.name.clone());
        }
    }
    vcs.trunk_of(repo)
}

/// Mirror the unassigned workspace's changes into the repo working tree so
/// they stay visible once the daemon stops routing.
fn copy_unassigned_into_repo(vcs: &Vcs, state: &StateDir, repo: &Path) -> Result<()> {
    let dir = state.workspace_dir(repo, UNASSIGNED_WORKSPACE);
    if !dir.exists() {
        return Ok(());
    }
    let entries = vcs.diff_summary(Some(&format!("{UNASSIGNED_WORKSPACE}@")), repo)?;
    for entry in entries {
        match entry.status {
            DiffStatus::Added | DiffStatus::Modified | DiffStatus::Renamed => {
                copy_if_different(&dir.join(&entry.path), &repo.join(&entry.path))?;
            }
            DiffStatus::Deleted => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{Exec, FakeExec};
    use std::sync::Arc;

    fn jj(args: &[&str]) -> Vec<String> {
        let mut v = vec![
            "jj".to_string(),
            "--no-pager".into(),
            "--color".into(),
            "never".into(),
        ];
        v.extend(args.iter().map(|s| s.to_string()));
        v
    }

    fn row(id: &str, description: &str, immutable: bool, wc: bool) -> String {
        format!(
            concat!(
                r#"{{"changeId":"{id}","commitId":"c{id}","changeIdShort":"{id}","commitIdShort":"c{id}","#,
                r#""description":"{description}","authorName":"a","authorEmail":"a@x","timestamp":0,"#,
                r#""parents":[],"isWorkingCopy":{wc},"isImmutable":{immutable},"isEmpty":true,"hasConflicts":false}}"#
            ),
            id = id,
            description = description,
            immutable = immutable,
            wc = wc,
        )
    }

    fn expect_log(fake: &FakeExec, revset: &str, rows: &str) {
        fake.expect_ok(
            jj(&[
                "log",
                "-r",
                revset,
                "--reversed",
                "--no-graph",
                "-T",
                crate::vcs::CHANGESET_TEMPLATE,
            ]),
            rows,
        );
    }

    #[test]
    fn up_at_described_tip_creates_empty_change() {
        let fake = Arc::new(FakeExec::new());
        expect_log(&fake, "@+", "");
        expect_log(&fake, "@", &format!("{}\n", row("wc00", "add parser", false, true)));
        // `jj new wc00 -m` then the re-read of @.
        expect_log(&fake, "@", &format!("{}\n", row("new0", "", false, true)));
        let vcs = Vcs::new(fake.clone() as Arc<dyn Exec>);

        let change = up(&vcs, Path::new("/repo")).unwrap();
        assert_eq!(change.change_id, "new0");
        assert!(fake.called_with_prefix(&["jj", "--no-pager", "--color", "never", "new", "wc00"]));
    }

    #[test]
    fn up_at_undescribed_tip_refuses() {
        let fake = Arc::new(FakeExec::new());
        expect_log(&fake, "@+", "");
        expect_log(&fake, "@", &format!("{}\n", row("wc00", "", false, true)));
        let vcs = Vcs::new(fake as Arc<dyn Exec>);

        let err = up(&vcs, Path::new("/repo")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NavigationFailed);
    }

    #[test]
    fn down_from_trunk_child_creates_sibling_not_trunk_edit() {
        let fake = Arc::new(FakeExec::new());
        expect_log(&fake, "@-", &format!("{}\n", row("trnk", "release", true, false)));
        expect_log(&fake, "@", &format!("{}\n", row("new0", "", false, true)));
        let vcs = Vcs::new(fake.clone() as Arc<dyn Exec>);

        let change = down(&vcs, Path::new("/repo")).unwrap();
        assert_eq!(change.change_id, "new0");
        // A new child on trunk, never `edit trunk`.
        assert!(fake.called_with_prefix(&["jj", "--no-pager", "--color", "never", "new", "trnk"]));
        assert!(!fake.called_with_prefix(&["jj", "--no-pager", "--color", "never", "edit"]));
    }

    #[test]
    fn down_edits_mutable_parent() {
        let fake = Arc::new(FakeExec::new());
        expect_log(&fake, "@-", &format!("{}\n", row("prnt", "base work", false, false)));
        expect_log(&fake, "@", &format!("{}\n", row("prnt", "base work", false, true)));
        let vcs = Vcs::new(fake.clone() as Arc<dyn Exec>);

        let change = down(&vcs, Path::new("/repo")).unwrap();
        assert_eq!(change.change_id, "prnt");
        assert!(fake.called_with_prefix(&["jj", "--no-pager", "--color", "never", "edit", "prnt"]));
    }

    #[test]
    fn checkout_maps_invalid_revision_to_navigation_failure() {
        let fake = Arc::new(FakeExec::new());
        fake.expect(
            jj(&["edit", "nosuch"]),
            Ok(crate::exec::CommandOutput {
                stdout: String::new(),
                stderr: "Error: Revision \"nosuch\" doesn't exist".to_string(),
                exit_code: 1,
            }),
        );
        let vcs = Vcs::new(fake as Arc<dyn Exec>);
        let err = checkout(&vcs, Path::new("/repo"), "nosuch").unwrap_err();
        assert_eq!(err.kind, ErrorKind::NavigationFailed);
    }
}
