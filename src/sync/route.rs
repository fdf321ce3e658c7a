//! The two sync passes.
//!
//! Routing carries preview edits into the owning agent workspace; syncing
//! carries agent edits back into the preview tree. Every copy is gated on
//! content inequality, which is what breaks the feedback loop: the write we
//! just made comes back around as a watcher event, the bytes compare equal,
//! and the echo dies there.
//!
//! A single file failing never aborts a pass — it is logged, counted, and
//! skipped.

use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::ownership::OwnershipMap;
use crate::state::{DaemonLog, FocusState, StateDir};
use crate::vcs::{DiffEntry, DiffStatus, Vcs};

/// What one pass did, for logging and idempotence checks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassStats {
    pub copied: usize,
    pub deleted: usize,
    /// Destination already had identical bytes.
    pub skipped: usize,
    /// No-owner and conflict entries that were not routed.
    pub warnings: usize,
    /// Entries whose copy or delete failed.
    pub failed: usize,
}

impl PassStats {
    /// A pass that moved nothing.
    pub fn is_noop(&self) -> bool {
        self.copied == 0 && self.deleted == 0
    }
}

/// Copy `src` over `dst` unless the destination already holds identical
/// bytes. Returns whether bytes were written.
pub fn copy_if_different(src: &Path, dst: &Path) -> Result<bool> {
    let bytes = fs::read(src)?;
    if let Ok(existing) = fs::read(dst)
        && existing == bytes
    {
        return Ok(false);
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(dst, bytes)?;
    Ok(true)
}

/// Delete `path` if present. Returns whether anything was removed.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Where a preview edit goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    To(String),
    NoOwner,
    Conflict(Vec<String>),
}

/// Decide the destination workspace for one diff entry. With a single
/// focused workspace everything routes there unconditionally; otherwise the
/// ownership map decides, falling back to the rename source for entries
/// whose new path is unowned.
pub fn route_target(
    entry: &DiffEntry,
    focus: &FocusState,
    ownership: &OwnershipMap,
) -> RouteDecision {
    if let [only] = focus.workspaces.as_slice() {
        return RouteDecision::To(only.clone());
    }
    let mut owners = ownership.owners(&entry.path);
    if owners.is_empty()
        && let Some(old) = &entry.old_path
    {
        owners = ownership.owners(old);
    }
    match owners {
        [] => RouteDecision::NoOwner,
        [one] => RouteDecision::To(one.clone()),
        many => RouteDecision::Conflict(many.to_vec()),
    }
}

/// Preview → agents: route each preview edit into the workspace that owns
/// the file. Unowned and conflicted files are logged and left alone.
pub fn route_preview_edits(
    vcs: &Vcs,
    state: &StateDir,
    repo: &Path,
    log: &DaemonLog,
) -> Result<PassStats> {
    let focus = FocusState::load(state, repo)?;
    let mut stats = PassStats::default();
    if focus.is_empty() {
        return Ok(stats);
    }

    let entries = vcs.diff_summary(None, repo)?;
    if entries.is_empty() {
        return Ok(stats);
    }
    let ownership = if focus.workspaces.len() > 1 {
        OwnershipMap::build(vcs, &focus.workspaces, repo)?
    } else {
        OwnershipMap::default()
    };

    for entry in &entries {
        let workspace = match route_target(entry, &focus, &ownership) {
            RouteDecision::To(workspace) => workspace,
            RouteDecision::NoOwner => {
                log.append(&format!("route: no owner for {}, skipping", entry.path));
                log::warn!("no owner for {}, not routing", entry.path);
                stats.warnings += 1;
                continue;
            }
            RouteDecision::Conflict(owners) => {
                log.append(&format!(
                    "route: conflict on {} (owners: {}), skipping",
                    entry.path,
                    owners.join(", ")
                ));
                log::warn!("conflict on {}, not routing", entry.path);
                stats.warnings += 1;
                continue;
            }
        };
        let workspace_dir = state.workspace_dir(repo, &workspace);
        if let Err(e) = apply_entry(entry, repo, &workspace_dir, &mut stats) {
            log.append(&format!("route: {} failed: {}", entry.path, e.message));
            log::warn!("routing {} failed: {e}", entry.path);
            stats.failed += 1;
        }
    }
    Ok(stats)
}

/// Agents → preview: snapshot each focused workspace, then mirror its tip
/// diff into the preview working tree.
pub fn sync_agents_to_preview(
    vcs: &Vcs,
    state: &StateDir,
    repo: &Path,
    log: &DaemonLog,
) -> Result<PassStats> {
    let focus = FocusState::load(state, repo)?;
    let mut stats = PassStats::default();
    if focus.is_empty() {
        return Ok(stats);
    }

    for workspace in &focus.workspaces {
        let workspace_dir = state.workspace_dir(repo, workspace);
        if !workspace_dir.exists() {
            log.append(&format!("sync: workspace dir missing for {workspace}"));
            stats.warnings += 1;
            continue;
        }
        vcs.snapshot(&workspace_dir)?;
        let entries = vcs.diff_summary(Some(&format!("{workspace}@")), repo)?;
        for entry in &entries {
            if let Err(e) = apply_entry(entry, &workspace_dir, repo, &mut stats) {
                log.append(&format!(
                    "sync: {} from {workspace} failed: {}",
                    entry.path, e.message
                ));
                log::warn!("syncing {} failed: {e}", entry.path);
                stats.failed += 1;
            }
        }
    }
    Ok(stats)
}

/// Mirror one diff entry from `src_root` into `dst_root`.
fn apply_entry(
    entry: &DiffEntry,
    src_root: &Path,
    dst_root: &Path,
    stats: &mut PassStats,
) -> Result<()> {
    match entry.status {
        DiffStatus::Added | DiffStatus::Modified => {
            if copy_if_different(&src_root.join(&entry.path), &dst_root.join(&entry.path))? {
                stats.copied += 1;
            } else {
                stats.skipped += 1;
            }
        }
        DiffStatus::Deleted => {
            if remove_if_exists(&dst_root.join(&entry.path))? {
                stats.deleted += 1;
            } else {
                stats.skipped += 1;
            }
        }
        DiffStatus::Renamed => {
            if let Some(old) = &entry.old_path
                && remove_if_exists(&dst_root.join(old))?
            {
                stats.deleted += 1;
            }
            if copy_if_different(&src_root.join(&entry.path), &dst_root.join(&entry.path))? {
                stats.copied += 1;
            } else {
                stats.skipped += 1;
            }
        }
    }
    Ok(())
}
