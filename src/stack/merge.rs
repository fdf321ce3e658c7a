//! Merging a submitted stack bottom-up.
//!
//! Dependent PRs cannot merge against each other, so each PR is retargeted
//! to trunk immediately before its turn, waited into mergeability, merged,
//! and cleaned up locally; the next PR in line is then rebased host-side on
//! the new trunk.

use std::path::Path;
use std::time::Duration;

use crate::error::{Error, ErrorKind, Result};
use crate::host::{Host, MERGE_POLL_INTERVAL, MergeMethod, PrInfo, PrState, is_protected};
use crate::vcs::Vcs;

/// One stack entry ready to merge: the PR plus its local identity.
#[derive(Debug, Clone)]
pub struct MergeItem {
    pub pr: PrInfo,
    pub change_id: String,
    pub bookmark: String,
}

#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub merged: Vec<u64>,
}

/// Gather the current stack's merge items, trunk→tip.
///
/// Every change must carry a local bookmark with an open PR; a merged PR
/// fails `already-merged`, anything else missing fails `not-found`.
pub fn stack_merge_items(vcs: &Vcs, host: &dyn Host, cwd: &Path) -> Result<Vec<MergeItem>> {
    let trunk = vcs.trunk_of(cwd)?;
    let mut changes = vcs.stack(cwd)?;
    if let Some(last) = changes.last()
        && last.is_working_copy
        && last.is_empty
        && last.description.trim().is_empty()
    {
        changes.pop();
    }
    if changes.is_empty() {
        return Err(Error::new(
            ErrorKind::EmptyChange,
            "nothing to merge: the stack above trunk is empty",
        ));
    }

    let bookmarks = vcs.bookmarks(cwd)?;
    let mut items = Vec::with_capacity(changes.len());
    let mut heads = Vec::with_capacity(changes.len());
    for change in &changes {
        let bookmark = bookmarks
            .iter()
            .find(|b| b.is_local() && b.target == change.change_id && b.name != trunk)
            .ok_or_else(|| {
                Error::not_found(format!(
                    "change {} has no bookmark; run submit first",
                    change.change_id_short
                ))
            })?;
        heads.push(bookmark.name.clone());
        items.push((change.change_id.clone(), bookmark.name.clone()));
    }

    let prs = host.batch_prs_by_branch(cwd, &heads)?;
    items
        .into_iter()
        .map(|(change_id, bookmark)| {
            let pr = prs.get(&bookmark).ok_or_else(|| {
                Error::not_found(format!("no PR for bookmark {bookmark:?}; run submit first"))
            })?;
            match pr.state {
                PrState::Merged => Err(Error::new(
                    ErrorKind::AlreadyMerged,
                    format!("PR #{} ({bookmark}) is already merged", pr.number),
                )),
                PrState::Closed => Err(Error::not_found(format!(
                    "PR #{} ({bookmark}) is closed; run submit to open a new one",
                    pr.number
                ))),
                PrState::Open => Ok(MergeItem {
                    pr: pr.clone(),
                    change_id,
                    bookmark,
                }),
            }
        })
        .collect()
}

/// Merge the stack trunk→tip.
pub fn merge_stack(
    vcs: &Vcs,
    host: &dyn Host,
    cwd: &Path,
    items: &[MergeItem],
    method: MergeMethod,
    timeout: Duration,
) -> Result<MergeOutcome> {
    for item in items {
        if is_protected(&item.pr.head_ref) {
            return Err(Error::invalid_input(format!(
                "refusing to merge from protected head {:?}",
                item.pr.head_ref
            )));
        }
    }

    let trunk = vcs.trunk_of(cwd)?;
    let total = items.len();
    let mut outcome = MergeOutcome::default();
    for (i, item) in items.iter().enumerate() {
        let number = item.pr.number;
        let merged_so_far = outcome.merged.len();
        let step = move |e: Error| {
            e.context(format!(
                "merging PR #{number} ({merged_so_far} of {total} merged)"
            ))
        };

        // Point the PR at trunk; it was based on its predecessor until now.
        if item.pr.base_ref != trunk {
            host.update_pr_base(cwd, number, &trunk).map_err(step)?;
        }
        host.wait_for_mergeable(cwd, number, timeout, MERGE_POLL_INTERVAL)
            .map_err(step)?;
        host.merge_pr(cwd, number, method, true, &item.pr.head_ref)
            .map_err(step)?;

        vcs.bookmark_delete(&item.bookmark, cwd).map_err(step)?;
        vcs.abandon(&item.change_id, cwd).map_err(step)?;
        outcome.merged.push(number);

        if let Some(next) = items.get(i + 1) {
            host.update_pr_branch(cwd, next.pr.number).map_err(step)?;
            vcs.git_fetch(cwd).map_err(step)?;
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{Exec, FakeExec};
    use crate::host::FakeHost;
    use std::sync::Arc;

    fn pr(number: u64, head: &str, base: &str) -> PrInfo {
        PrInfo {
            number,
            title: format!("PR {number}"),
            state: PrState::Open,
            base_ref: base.to_string(),
            head_ref: head.to_string(),
            url: String::new(),
            review_decision: None,
            version: 1,
        }
    }

    fn vcs_with_trunk() -> Vcs {
        let fake = Arc::new(FakeExec::new());
        fake.expect_ok(
            vec![
                "jj".to_string(),
                "--no-pager".into(),
                "--color".into(),
                "never".into(),
                "log".into(),
                "-r".into(),
                "trunk()".into(),
                "--no-graph".into(),
                "-T".into(),
                r#"self.bookmarks().map(|b| b.name()).join("\n")"#.into(),
            ],
            "main\n",
        );
        Vcs::new(fake as Arc<dyn Exec>)
    }

    fn items() -> Vec<MergeItem> {
        vec![
            MergeItem {
                pr: pr(10, "feat-a", "main"),
                change_id: "aaaa".into(),
                bookmark: "feat-a".into(),
            },
            MergeItem {
                pr: pr(11, "feat-b", "feat-a"),
                change_id: "bbbb".into(),
                bookmark: "feat-b".into(),
            },
            MergeItem {
                pr: pr(12, "feat-c", "feat-b"),
                change_id: "cccc".into(),
                bookmark: "feat-c".into(),
            },
        ]
    }

    #[test]
    fn bases_shuffle_to_trunk_in_order() {
        let vcs = vcs_with_trunk();
        let host = FakeHost::new();
        for item in items() {
            host.seed_pr(item.pr.clone());
        }
        let outcome = merge_stack(
            &vcs,
            &host,
            Path::new("/repo"),
            &items(),
            MergeMethod::Squash,
            Duration::from_secs(60),
        )
        .unwrap();
        assert_eq!(outcome.merged, vec![10, 11, 12]);

        let calls = host.calls();
        // The first PR is already based on trunk: no retarget.
        assert!(!calls.contains(&"update_pr_base:10->main".to_string()));
        // B is retargeted to trunk before we wait on it, after A merged.
        let merge_a = calls.iter().position(|c| c == "merge_pr:10:squash").unwrap();
        let retarget_b = calls
            .iter()
            .position(|c| c == "update_pr_base:11->main")
            .unwrap();
        let wait_b = calls.iter().position(|c| c == "wait_for_mergeable:11").unwrap();
        assert!(merge_a < retarget_b);
        assert!(retarget_b < wait_b);
        // Host-side rebase of the follower after each merge.
        assert!(calls.contains(&"update_pr_branch:11".to_string()));
        assert!(calls.contains(&"update_pr_branch:12".to_string()));
        assert!(!calls.contains(&"update_pr_branch:10".to_string()));
    }

    #[test]
    fn protected_heads_refuse_to_merge() {
        let vcs = vcs_with_trunk();
        let host = FakeHost::new();
        let items = vec![MergeItem {
            pr: pr(10, "main", "main"),
            change_id: "aaaa".into(),
            bookmark: "main".into(),
        }];
        let err = merge_stack(
            &vcs,
            &host,
            Path::new("/repo"),
            &items,
            MergeMethod::Squash,
            Duration::from_secs(60),
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
        assert!(host.calls().is_empty());
    }

    #[test]
    fn blocked_wait_stops_the_run() {
        let vcs = vcs_with_trunk();
        let host = FakeHost::new();
        for item in items() {
            host.seed_pr(item.pr.clone());
        }
        host.fail_on("wait_for_mergeable:11");
        let err = merge_stack(
            &vcs,
            &host,
            Path::new("/repo"),
            &items(),
            MergeMethod::Squash,
            Duration::from_secs(60),
        )
        .unwrap_err();
        assert!(err.message.contains("merging PR #11"));
        assert!(err.message.contains("1 of 3 merged"));
        // C never advanced.
        assert!(!host.calls().contains(&"wait_for_mergeable:12".to_string()));
    }
}
