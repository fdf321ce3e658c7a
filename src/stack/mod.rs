//! Stacked-change orchestration: submitting a stack of dependent PRs and
//! merging it back down, transactionally.

pub mod merge;
pub mod naming;
pub mod submit;

pub use merge::{MergeItem, MergeOutcome, merge_stack, stack_merge_items};
pub use submit::{plan_submit, submit_stack};

use std::path::Path;

use crate::error::{Error, ErrorKind, Result};
use crate::host::{PrInfo, PrState};
use crate::vcs::{Change, Vcs};

/// Start a new described change on top of the working copy, with a
/// date-prefixed bookmark ready for submission.
pub fn create_change(vcs: &Vcs, cwd: &Path, message: &str) -> Result<(Change, String)> {
    if message.trim().is_empty() {
        return Err(Error::new(
            ErrorKind::MissingMessage,
            "create needs a non-empty message",
        ));
    }
    let current = vcs.working_copy(cwd)?;
    let change = vcs.new_change(&[current.change_id], message, cwd)?;
    let bookmark = naming::date_prefixed_label(message);
    vcs.bookmark_create(&bookmark, &change.change_id, cwd)?;
    Ok((change, bookmark))
}

/// What submit intends to do for one change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum PlanAction {
    /// No PR yet; create one.
    Create,
    /// Open PR whose base must move.
    Update,
    /// Open PR already based correctly; only the bookmark is pushed.
    Sync,
    /// Nothing to do.
    Skip,
}

/// One change of the stack, trunk side first.
#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub change_id: String,
    pub change_id_short: String,
    /// First line of the change description; doubles as the PR title.
    pub title: String,
    /// Resolved head bookmark for this change.
    pub bookmark: String,
    /// True when the bookmark does not exist locally yet.
    pub bookmark_is_new: bool,
    /// True when a collision with a closed/merged PR forced a `-k` suffix.
    pub had_conflict: bool,
    /// The bookmark must be pushed (new, renamed, or ahead of the remote).
    pub needs_push: bool,
    /// Existing open PR for this head, if any.
    pub pr: Option<PrInfo>,
    /// Prospective base: trunk for the first entry, else the previous
    /// entry's bookmark.
    pub base: String,
    pub action: PlanAction,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitOptions {
    pub draft: bool,
    pub dry_run: bool,
}

/// Per-change outcome of a completed submit.
#[derive(Debug, Clone)]
pub struct SubmittedChange {
    pub change_id_short: String,
    pub bookmark: String,
    pub base: String,
    pub url: Option<String>,
    pub action: PlanAction,
}

#[derive(Debug, Clone, Default)]
pub struct SubmitOutcome {
    pub created: usize,
    pub updated: usize,
    pub synced: usize,
    pub changes: Vec<SubmittedChange>,
}

/// Display status of a stack-comment row.
pub(crate) fn comment_status(pr: &PrInfo, commented_on: u64) -> &'static str {
    if pr.number == commented_on {
        return "this";
    }
    match pr.state {
        PrState::Merged => "merged",
        PrState::Closed => "closed",
        PrState::Open => match pr.review_decision {
            Some(crate::host::ReviewDecision::Approved) => "approved",
            _ => "waiting",
        },
    }
}
