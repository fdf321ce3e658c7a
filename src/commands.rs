//! Command handlers: wire the CLI onto the library and print one-line
//! summaries. All real work lives in the modules these call into.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use crate::cli::{DaemonAction, PreviewAction, WorkspaceAction};
use crate::error::Error;
use crate::exec::{Exec, SystemExec};
use crate::host::{HostClient, MergeMethod};
use crate::ownership;
use crate::preview;
use crate::stack::{self, SubmitOptions};
use crate::state::{FocusState, PidFile, StateDir, UNASSIGNED_WORKSPACE};
use crate::sync::Daemon;
use crate::vcs::Vcs;
use crate::workspace::WorkspaceManager;
use crate::{navigate, sync};

pub struct App {
    vcs: Vcs,
    state: StateDir,
    exec: Arc<dyn Exec>,
}

impl App {
    pub fn new() -> Result<Self> {
        let exec: Arc<dyn Exec> = Arc::new(SystemExec);
        Ok(Self {
            vcs: Vcs::new(exec.clone()),
            state: StateDir::discover()?,
            exec,
        })
    }

    /// Root of the jj workspace containing the current directory.
    fn repo_root(&self) -> Result<PathBuf> {
        let output = self.vcs.run(&["root"], Path::new("."))?;
        let root = PathBuf::from(output.stdout.trim());
        Ok(dunce::canonicalize(&root).unwrap_or(root))
    }

    fn manager(&self, repo: &Path) -> WorkspaceManager {
        WorkspaceManager::new(self.vcs.clone(), self.state.clone(), repo)
    }

    fn host(&self) -> Result<HostClient> {
        Ok(HostClient::new(self.exec.clone())?)
    }

    // ========================================================================
    // Stack commands
    // ========================================================================

    pub fn create(&self, message: &str) -> Result<()> {
        let repo = self.repo_root()?;
        let (change, bookmark) = stack::create_change(&self.vcs, &repo, message)?;
        println!("created {} on bookmark {bookmark}", change.change_id_short);
        Ok(())
    }

    pub fn submit(&self, draft: bool, dry_run: bool) -> Result<()> {
        let repo = self.repo_root()?;
        let host = self.host()?;
        let options = SubmitOptions { draft, dry_run };
        let outcome = stack::submit_stack(&self.vcs, &host, &repo, options)?;
        for change in &outcome.changes {
            let url = change.url.as_deref().unwrap_or("-");
            println!(
                "  {} {} (base {}) {} {url}",
                change.action, change.bookmark, change.base, change.change_id_short
            );
        }
        let verb = if dry_run { "would submit" } else { "submitted" };
        println!(
            "{verb}: {} created, {} updated, {} synced",
            outcome.created, outcome.updated, outcome.synced
        );
        Ok(())
    }

    pub fn merge(&self, method: MergeMethod, long_wait: bool) -> Result<()> {
        let repo = self.repo_root()?;
        let host = self.host()?;
        let items = stack::stack_merge_items(&self.vcs, &host, &repo)?;
        let timeout = if long_wait {
            crate::host::MERGE_POLL_TIMEOUT_LONG
        } else {
            crate::host::MERGE_POLL_TIMEOUT
        };
        let outcome = stack::merge_stack(&self.vcs, &host, &repo, &items, method, timeout)?;
        let numbers: Vec<String> = outcome.merged.iter().map(|n| format!("#{n}")).collect();
        println!(
            "merged {} pull request{} ({})",
            outcome.merged.len(),
            if outcome.merged.len() == 1 { "" } else { "s" },
            numbers.join(" ")
        );
        Ok(())
    }

    // ========================================================================
    // Preview focus
    // ========================================================================

    pub fn preview(&self, action: PreviewAction) -> Result<()> {
        let repo = self.repo_root()?;
        let mut focus = FocusState::load(&self.state, &repo)?;

        // A wiped state dir loses focus.json but not the preview commit;
        // its trailers restore the membership that add/remove act on.
        if focus.is_empty()
            && let Some(members) = preview::recover_members(&self.vcs, &repo)?
        {
            focus.workspaces = members;
        }

        match action {
            PreviewAction::Add { workspaces } => {
                for name in workspaces {
                    self.require_workspace(&repo, &name)?;
                    if !focus.contains(&name) {
                        focus.workspaces.push(name);
                    }
                }
            }
            PreviewAction::Remove { workspaces } => {
                focus.workspaces.retain(|w| !workspaces.contains(w));
            }
            PreviewAction::Only { workspaces } => {
                for name in &workspaces {
                    self.require_workspace(&repo, name)?;
                }
                focus.workspaces = workspaces;
            }
            PreviewAction::Edit { workspace } => {
                self.require_workspace(&repo, &workspace)?;
                focus.workspaces = vec![workspace];
            }
            PreviewAction::All => {
                focus.workspaces = self
                    .manager(&repo)
                    .list()?
                    .into_iter()
                    .map(|info| info.name)
                    .filter(|name| name != UNASSIGNED_WORKSPACE)
                    .collect();
            }
            PreviewAction::None => focus.workspaces.clear(),
        }

        // Overlapping file sets cannot be routed; refuse up front rather
        // than warning on every edit later.
        if focus.workspaces.len() > 1 {
            let conflicts =
                ownership::conflicting_files(&self.vcs, &focus.workspaces, &repo)?;
            if !conflicts.is_empty() {
                let files: Vec<String> = conflicts
                    .iter()
                    .map(|(file, owners)| format!("{file} ({})", owners.join(", ")))
                    .collect();
                return Err(Error::conflict(format!(
                    "workspaces overlap on: {}",
                    files.join("; ")
                ))
                .into());
            }
        }

        focus.store(&self.state, &repo)?;
        let rebuilt = preview::rebuild(&self.vcs, &self.state, &repo, &focus.workspaces)?;
        match rebuilt {
            Some(change) => println!(
                "preview {} over {} workspace{}",
                change.change_id_short,
                focus.workspaces.len(),
                if focus.workspaces.len() == 1 { "" } else { "s" }
            ),
            None => println!("preview cleared"),
        }
        Ok(())
    }

    fn require_workspace(&self, repo: &Path, name: &str) -> Result<()> {
        if !self.state.workspace_dir(repo, name).exists() {
            return Err(Error::workspace_not_found(format!(
                "no workspace {name:?}; create it with `braid workspace add {name}`"
            ))
            .into());
        }
        Ok(())
    }

    // ========================================================================
    // Workspaces
    // ========================================================================

    pub fn workspace(&self, action: WorkspaceAction) -> Result<()> {
        let repo = self.repo_root()?;
        let manager = self.manager(&repo);
        match action {
            WorkspaceAction::Add { name } => {
                let info = manager.add(&name)?;
                println!("added workspace {} at {}", info.name, info.path.display());
            }
            WorkspaceAction::Remove { name } => {
                // Removing a focused workspace must also shrink the preview.
                let mut focus = FocusState::load(&self.state, &repo)?;
                if focus.contains(&name) {
                    focus.workspaces.retain(|w| w != &name);
                    focus.store(&self.state, &repo)?;
                    preview::rebuild(&self.vcs, &self.state, &repo, &focus.workspaces)?;
                }
                manager.remove(&name)?;
                println!("removed workspace {name}");
            }
            WorkspaceAction::List => {
                for info in manager.list()? {
                    println!("{}\t{}", info.name, &info.tip[..info.tip.len().min(8)]);
                }
            }
            WorkspaceAction::Status { name } => {
                let tip = manager.tip_of(&name)?;
                let stats = self
                    .vcs
                    .diff_numstat(Some(&format!("{name}@")), &repo)?;
                let (added, removed) = stats
                    .values()
                    .fold((0, 0), |(a, r), entry| (a + entry.added, r + entry.removed));
                let dir = self.state.workspace_dir(&repo, &name);
                let ignore = sync::IgnoreSet::new(&dir, &repo);
                let on_disk = sync::bounded_file_count(&dir, &ignore, 10_000);
                println!(
                    "workspace {name} at {}: {} file{} touched (+{added} -{removed}), {on_disk} on disk",
                    &tip[..tip.len().min(8)],
                    stats.len(),
                    if stats.len() == 1 { "" } else { "s" },
                );
            }
            WorkspaceAction::Submit { name } => {
                let description = manager.strip_wip_prefix(&name)?;
                let host = self.host()?;
                let workspace_dir = self.state.workspace_dir(&repo, &name);
                let outcome = stack::submit_stack(
                    &self.vcs,
                    &host,
                    &workspace_dir,
                    SubmitOptions::default(),
                )?;
                println!(
                    "submitted workspace {name} ({description}): {} created, {} updated, {} synced",
                    outcome.created, outcome.updated, outcome.synced
                );
            }
        }
        Ok(())
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    pub fn checkout(&self, target: &str) -> Result<()> {
        let repo = self.repo_root()?;
        let change = navigate::checkout(&self.vcs, &repo, target)?;
        print_position(&change);
        Ok(())
    }

    pub fn up(&self) -> Result<()> {
        let repo = self.repo_root()?;
        print_position(&navigate::up(&self.vcs, &repo)?);
        Ok(())
    }

    pub fn down(&self) -> Result<()> {
        let repo = self.repo_root()?;
        print_position(&navigate::down(&self.vcs, &repo)?);
        Ok(())
    }

    pub fn top(&self) -> Result<()> {
        let repo = self.repo_root()?;
        print_position(&navigate::top(&self.vcs, &repo)?);
        Ok(())
    }

    pub fn exit(&self) -> Result<()> {
        let repo = self.repo_root()?;
        let branch = navigate::exit_to_git(&self.vcs, &self.state, &repo)?;
        println!("git mode: HEAD at {branch}, sync disabled");
        Ok(())
    }

    // ========================================================================
    // Daemon
    // ========================================================================

    pub fn daemon(&self, action: DaemonAction) -> Result<()> {
        match action {
            DaemonAction::Run => {
                crate::exec::check_dependency(self.exec.as_ref(), "jj")?;
                Daemon::new(self.vcs.clone(), self.state.clone()).run()?;
                println!("daemon stopped");
            }
            DaemonAction::Stop => match sync::stop(&self.state)? {
                Some(pid) => println!("stopped daemon (pid {pid})"),
                None => println!("no daemon running"),
            },
            DaemonAction::Status => match PidFile::live_pid(&self.state) {
                Some(pid) => println!("daemon running (pid {pid})"),
                None => println!("no daemon running"),
            },
        }
        Ok(())
    }
}

fn print_position(change: &crate::vcs::Change) {
    let description = if change.description.is_empty() {
        "(no description)"
    } else {
        &change.description
    };
    println!("now at {} {description}", change.change_id_short);
}

