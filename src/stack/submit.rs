//! Submitting a stack as dependent PRs.
//!
//! Two phases. Planning is read-only: fetch the stack, validate it, resolve
//! head names against the host, and decide an action per change — a failure
//! here aborts with no side effects, and `--dry-run` stops here. Apply
//! mutates in trunk→tip order (bookmarks, pushes, then PRs); every mutation
//! pushes its reverse onto an undo stack, and a failure executes that stack
//! LIFO before returning the original error.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::error::{Error, ErrorKind, Result};
use crate::host::{Host, PrInfo, PrState};
use crate::vcs::{Change, Vcs};

use super::{PlanAction, PlanEntry, SubmitOptions, SubmitOutcome, SubmittedChange, naming};

/// Highest `-k` suffix tried during name-collision resolution.
const MAX_NAME_SUFFIX: u32 = 25;

/// Build the submit plan without mutating anything.
pub fn plan_submit(
    vcs: &Vcs,
    host: &dyn Host,
    cwd: &Path,
    _options: SubmitOptions,
) -> Result<Vec<PlanEntry>> {
    let trunk = vcs.trunk_of(cwd)?;
    let changes = submittable_stack(vcs, cwd)?;

    let bookmarks = vcs.bookmarks(cwd)?;
    let local_by_target: HashMap<&str, &str> = bookmarks
        .iter()
        .filter(|b| b.is_local() && b.name != trunk)
        .map(|b| (b.target.as_str(), b.name.as_str()))
        .collect();
    let local_names: HashSet<&str> = bookmarks
        .iter()
        .filter(|b| b.is_local())
        .map(|b| b.name.as_str())
        .collect();
    let remote_rows: HashMap<&str, usize> = bookmarks
        .iter()
        .filter(|b| b.remote.is_some())
        .map(|b| (b.name.as_str(), b.ahead))
        .collect();

    // Candidate head name per change: its existing bookmark, else a fresh
    // date-prefixed label from the description.
    let candidates: Vec<String> = changes
        .iter()
        .map(|change| {
            local_by_target
                .get(change.change_id.as_str())
                .map(|name| (*name).to_string())
                .unwrap_or_else(|| naming::date_prefixed_label(&change.description))
        })
        .collect();

    let known = fetch_known_prs(host, cwd, &candidates)?;

    let mut entries = Vec::with_capacity(changes.len());
    let mut assigned: HashSet<String> = HashSet::new();
    let mut previous_bookmark = trunk.clone();
    for (change, candidate) in changes.iter().zip(&candidates) {
        let (bookmark, had_conflict) = resolve_name(candidate, &known, &assigned)?;
        assigned.insert(bookmark.clone());

        let open_pr = known
            .get(&bookmark)
            .filter(|pr| pr.state == PrState::Open)
            .cloned();
        let bookmark_is_new = !local_names.contains(bookmark.as_str());
        let needs_push = bookmark_is_new
            || had_conflict
            || match remote_rows.get(bookmark.as_str()) {
                Some(ahead) => *ahead > 0,
                // Never pushed at all.
                None => true,
            };
        let action = match &open_pr {
            Some(pr) if pr.base_ref != previous_bookmark => PlanAction::Update,
            Some(_) if needs_push => PlanAction::Sync,
            Some(_) => PlanAction::Skip,
            None => PlanAction::Create,
        };

        entries.push(PlanEntry {
            change_id: change.change_id.clone(),
            change_id_short: change.change_id_short.clone(),
            title: change.description.clone(),
            bookmark: bookmark.clone(),
            bookmark_is_new,
            had_conflict,
            needs_push,
            pr: open_pr,
            base: previous_bookmark.clone(),
            action,
        });
        previous_bookmark = bookmark;
    }
    Ok(entries)
}

/// Submit the stack. Dry runs stop after planning with identical validation.
pub fn submit_stack(
    vcs: &Vcs,
    host: &dyn Host,
    cwd: &Path,
    options: SubmitOptions,
) -> Result<SubmitOutcome> {
    let plan = plan_submit(vcs, host, cwd, options)?;
    if options.dry_run {
        return Ok(outcome(&plan, &[]));
    }

    let mut undo: Vec<UndoOp> = Vec::new();

    // Bookmarks and pushes, trunk→tip.
    for entry in &plan {
        if let Err(e) = ensure_and_push(vcs, cwd, entry, &mut undo) {
            return Err(rollback(vcs, host, cwd, undo, e));
        }
    }

    // PRs, same order.
    let mut final_prs: Vec<PrInfo> = Vec::with_capacity(plan.len());
    for entry in &plan {
        match apply_pr(host, cwd, entry, options, &mut undo) {
            Ok(Some(pr)) => final_prs.push(pr),
            Ok(None) => {}
            Err(e) => return Err(rollback(vcs, host, cwd, undo, e)),
        }
    }

    // Stack comments. Past the transactional window: a failure here
    // propagates but never unwinds the submitted stack.
    for pr in &final_prs {
        let body = stack_comment_body(&final_prs, pr.number);
        host.upsert_stack_comment(cwd, pr.number, &body)
            .map_err(|e| e.context(format!("writing stack comment on PR #{}", pr.number)))?;
    }

    Ok(outcome(&plan, &final_prs))
}

/// The stack of changes to submit, trunk→tip. An empty, undescribed working
/// copy on top (jj's auto-snapshot) is not part of the stack.
fn submittable_stack(vcs: &Vcs, cwd: &Path) -> Result<Vec<Change>> {
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
            "nothing to submit: the stack above trunk is empty",
        ));
    }
    for change in &changes {
        if !change.is_working_copy && change.description.trim().is_empty() {
            return Err(Error::missing_message(format!(
                "change {} has no description",
                change.change_id_short
            )));
        }
        if change.has_conflicts {
            return Err(Error::conflict(format!(
                "change {} has unresolved conflicts",
                change.change_id_short
            )));
        }
    }
    // A submittable stack is a single path: each change's parents must
    // include the previous one.
    for pair in changes.windows(2) {
        if !pair[1].parents.contains(&pair[0].change_id) {
            return Err(Error::invalid_state(format!(
                "stack is not linear: {} does not follow {}",
                pair[1].change_id_short, pair[0].change_id_short
            )));
        }
    }
    Ok(changes)
}

/// Everything the resolver needs to know from the host, fetched in at most
/// two batched round trips: the candidates themselves, then — only when a
/// candidate collides — the whole `-2…-25` suffix space of the colliders.
fn fetch_known_prs(
    host: &dyn Host,
    cwd: &Path,
    candidates: &[String],
) -> Result<HashMap<String, PrInfo>> {
    let mut unique: Vec<String> = Vec::new();
    for candidate in candidates {
        if !unique.contains(candidate) {
            unique.push(candidate.clone());
        }
    }
    let mut known = host.batch_prs_by_branch(cwd, &unique)?;

    let mut suffix_space: Vec<String> = Vec::new();
    for (i, candidate) in candidates.iter().enumerate() {
        let collides_with_host = known
            .get(candidate)
            .is_some_and(|pr| pr.state != PrState::Open);
        let duplicate_in_batch = candidates[..i].contains(candidate);
        if collides_with_host || duplicate_in_batch {
            for k in 2..=MAX_NAME_SUFFIX {
                let name = format!("{candidate}-{k}");
                if !suffix_space.contains(&name) {
                    suffix_space.push(name);
                }
            }
        }
    }
    if !suffix_space.is_empty() {
        known.extend(host.batch_prs_by_branch(cwd, &suffix_space)?);
    }
    Ok(known)
}

/// Resolve one candidate head name against the host.
///
/// No PR, or an open one: keep the name (an open PR means update-in-place).
/// A closed or merged PR holds the name forever on the host side, so the
/// candidate takes the first free `-k` suffix, `2 ≤ k ≤ 25`, skipping names
/// assigned earlier in this batch and names with any existing PR.
pub(crate) fn resolve_name(
    candidate: &str,
    known: &HashMap<String, PrInfo>,
    assigned: &HashSet<String>,
) -> Result<(String, bool)> {
    let taken_by_host = known
        .get(candidate)
        .is_some_and(|pr| pr.state != PrState::Open);
    if !taken_by_host && !assigned.contains(candidate) {
        return Ok((candidate.to_string(), false));
    }
    for k in 2..=MAX_NAME_SUFFIX {
        let name = format!("{candidate}-{k}");
        if assigned.contains(&name) || known.contains_key(&name) {
            continue;
        }
        return Ok((name, true));
    }
    Err(Error::conflict(format!(
        "no free bookmark name for {candidate:?} after {MAX_NAME_SUFFIX} suffixes"
    )))
}

enum UndoOp {
    DeleteBookmark(String),
    ClosePr(u64),
}

fn ensure_and_push(
    vcs: &Vcs,
    cwd: &Path,
    entry: &PlanEntry,
    undo: &mut Vec<UndoOp>,
) -> Result<()> {
    if entry.bookmark_is_new {
        vcs.bookmark_create(&entry.bookmark, &entry.change_id, cwd)?;
        undo.push(UndoOp::DeleteBookmark(entry.bookmark.clone()));
    } else {
        vcs.bookmark_set(&entry.bookmark, &entry.change_id, cwd)?;
    }
    if entry.needs_push {
        vcs.git_push_bookmark(&entry.bookmark, cwd)?;
    }
    Ok(())
}

fn apply_pr(
    host: &dyn Host,
    cwd: &Path,
    entry: &PlanEntry,
    options: SubmitOptions,
    undo: &mut Vec<UndoOp>,
) -> Result<Option<PrInfo>> {
    match entry.action {
        PlanAction::Create => {
            let pr = host.create_pr(
                cwd,
                &entry.bookmark,
                &entry.base,
                &entry.title,
                None,
                options.draft,
            )?;
            undo.push(UndoOp::ClosePr(pr.number));
            Ok(Some(pr))
        }
        PlanAction::Update => {
            let Some(pr) = entry.pr.clone() else {
                return Err(Error::invalid_state(format!(
                    "update planned for {} without a PR",
                    entry.bookmark
                )));
            };
            host.update_pr_base(cwd, pr.number, &entry.base)?;
            Ok(Some(PrInfo {
                base_ref: entry.base.clone(),
                ..pr
            }))
        }
        PlanAction::Sync | PlanAction::Skip => Ok(entry.pr.clone()),
    }
}

/// Unwind the apply phase, newest mutation first. Rollback failures are
/// collected; the original failure stays the cause.
fn rollback(
    vcs: &Vcs,
    host: &dyn Host,
    cwd: &Path,
    undo: Vec<UndoOp>,
    cause: Error,
) -> Error {
    let mut failures: Vec<String> = Vec::new();
    for op in undo.into_iter().rev() {
        let result = match &op {
            UndoOp::ClosePr(number) => host
                .close_pr(cwd, *number)
                .map_err(|e| format!("close PR #{number}: {}", e.message)),
            UndoOp::DeleteBookmark(name) => vcs
                .bookmark_delete(name, cwd)
                .map_err(|e| format!("delete bookmark {name}: {}", e.message)),
        };
        if let Err(failure) = result {
            failures.push(failure);
        }
    }
    if failures.is_empty() {
        cause.context("submit rolled back")
    } else {
        cause.context(format!(
            "submit rolled back with failures ({})",
            failures.join("; ")
        ))
    }
}

/// Stack-comment body: the whole stack top to bottom, marking the row the
/// comment sits on. The idempotence marker is added by the host adapter.
pub(crate) fn stack_comment_body(prs: &[PrInfo], commented_on: u64) -> String {
    let mut body = String::from("**Stack**\n");
    for pr in prs.iter().rev() {
        let status = super::comment_status(pr, commented_on);
        body.push_str(&format!("- #{} {} ({status})\n", pr.number, pr.title));
    }
    body
}

fn outcome(plan: &[PlanEntry], final_prs: &[PrInfo]) -> SubmitOutcome {
    let url_for = |entry: &PlanEntry| {
        final_prs
            .iter()
            .find(|pr| pr.head_ref == entry.bookmark)
            .map(|pr| pr.url.clone())
            .or_else(|| entry.pr.as_ref().map(|pr| pr.url.clone()))
    };
    let mut result = SubmitOutcome::default();
    for entry in plan {
        match entry.action {
            PlanAction::Create => result.created += 1,
            PlanAction::Update => result.updated += 1,
            PlanAction::Sync => result.synced += 1,
            PlanAction::Skip => {}
        }
        result.changes.push(SubmittedChange {
            change_id_short: entry.change_id_short.clone(),
            bookmark: entry.bookmark.clone(),
            base: entry.base.clone(),
            url: url_for(entry),
            action: entry.action,
        });
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ReviewDecision;

    fn pr(number: u64, head: &str, state: PrState) -> PrInfo {
        PrInfo {
            number,
            title: format!("PR {number}"),
            state,
            base_ref: "main".to_string(),
            head_ref: head.to_string(),
            url: format!("https://github.com/acme/widgets/pull/{number}"),
            review_decision: None,
            version: 1,
        }
    }

    #[test]
    fn free_name_is_kept() {
        let known = HashMap::new();
        let assigned = HashSet::new();
        assert_eq!(
            resolve_name("feature-x", &known, &assigned).unwrap(),
            ("feature-x".to_string(), false)
        );
    }

    #[test]
    fn open_pr_keeps_the_name() {
        let mut known = HashMap::new();
        known.insert("feature-x".to_string(), pr(1, "feature-x", PrState::Open));
        assert_eq!(
            resolve_name("feature-x", &known, &HashSet::new()).unwrap(),
            ("feature-x".to_string(), false)
        );
    }

    #[test]
    fn merged_and_closed_prs_force_next_free_suffix() {
        // Host has feature-x (MERGED) and feature-x-2 (CLOSED): the first
        // free name is feature-x-3.
        let mut known = HashMap::new();
        known.insert("feature-x".to_string(), pr(1, "feature-x", PrState::Merged));
        known.insert(
            "feature-x-2".to_string(),
            pr(2, "feature-x-2", PrState::Closed),
        );
        assert_eq!(
            resolve_name("feature-x", &known, &HashSet::new()).unwrap(),
            ("feature-x-3".to_string(), true)
        );
    }

    #[test]
    fn batch_assignments_are_skipped() {
        let known = HashMap::new();
        let mut assigned = HashSet::new();
        assigned.insert("feature-x".to_string());
        assigned.insert("feature-x-2".to_string());
        assert_eq!(
            resolve_name("feature-x", &known, &assigned).unwrap(),
            ("feature-x-3".to_string(), true)
        );
    }

    #[test]
    fn exhausted_suffixes_fail_conflict() {
        let mut known = HashMap::new();
        known.insert("x".to_string(), pr(1, "x", PrState::Merged));
        for k in 2..=25 {
            known.insert(format!("x-{k}"), pr(k as u64, &format!("x-{k}"), PrState::Closed));
        }
        let err = resolve_name("x", &known, &HashSet::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
    }

    #[test]
    fn comment_body_lists_top_to_bottom() {
        let prs = vec![
            pr(10, "a", PrState::Open),
            pr(11, "b", PrState::Open),
            pr(12, "c", PrState::Open),
        ];
        let body = stack_comment_body(&prs, 11);
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines[0], "**Stack**");
        // Tip first.
        assert!(lines[1].starts_with("- #12"));
        assert!(lines[2].starts_with("- #11"));
        assert!(lines[2].ends_with("(this)"));
        assert!(lines[3].starts_with("- #10"));
        assert!(lines[3].ends_with("(waiting)"));
    }

    #[test]
    fn comment_status_reflects_review_state() {
        let mut approved = pr(5, "a", PrState::Open);
        approved.review_decision = Some(ReviewDecision::Approved);
        assert_eq!(super::super::comment_status(&approved, 9), "approved");
        assert_eq!(
            super::super::comment_status(&pr(6, "b", PrState::Merged), 9),
            "merged"
        );
        assert_eq!(
            super::super::comment_status(&pr(7, "c", PrState::Closed), 9),
            "closed"
        );
        assert_eq!(super::super::comment_status(&pr(9, "d", PrState::Open), 9), "this");
    }
}
