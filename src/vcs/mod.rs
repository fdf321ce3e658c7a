//! Driving jj.
//!
//! [`Vcs`] is the one way the crate talks to jj: argv invocation through the
//! [`Exec`] seam, stderr classification, bounded retry on ref-lock
//! contention, and a per-cwd cache of the resolved trunk bookmark. The log
//! templates defined here are the authoritative serialization of changesets
//! and bookmarks; `parse` turns their output back into values.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::error::{Error, ErrorKind, Result};
use crate::exec::{Cmd, CommandOutput, Exec};

pub mod parse;
pub mod types;

pub use types::{Bookmark, Change, DiffEntry, DiffStatus, NumstatEntry};

/// Sleep between ref-lock retries.
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(20);
/// Bounded attempts when the ref store is contended.
const LOCK_RETRY_ATTEMPTS: u32 = 10;

/// JSON-per-line changeset template. One object per revision; schema is
/// validated by [`parse::parse_changesets`].
pub const CHANGESET_TEMPLATE: &str = r#"'{"changeId":' ++ json(change_id) ++ ',"commitId":' ++ json(commit_id) ++ ',"changeIdShort":' ++ json(change_id.short(8)) ++ ',"commitIdShort":' ++ json(commit_id.short(8)) ++ ',"description":' ++ json(description.first_line()) ++ ',"authorName":' ++ json(author.name()) ++ ',"authorEmail":' ++ json(author.email()) ++ ',"timestamp":' ++ author.timestamp().utc().format("%s") ++ ',"parents":' ++ json(parents.map(|p| p.change_id())) ++ ',"isWorkingCopy":' ++ json(current_working_copy) ++ ',"isImmutable":' ++ json(immutable) ++ ',"isEmpty":' ++ json(empty) ++ ',"hasConflicts":' ++ json(conflict) ++ '}' ++ "\n""#;

/// Tab-separated bookmark rows: `name remote target ahead behind`.
pub const BOOKMARK_TEMPLATE: &str = r#"name ++ "\t" ++ if(remote, remote, "") ++ "\t" ++ if(normal_target, normal_target.change_id(), "") ++ "\t" ++ if(tracking_present, tracking_ahead_count.lower(), "") ++ "\t" ++ if(tracking_present, tracking_behind_count.lower(), "") ++ "\n""#;

/// Template listing bookmark names on trunk, one per line.
pub const TRUNK_BOOKMARKS_TEMPLATE: &str = r#"self.bookmarks().map(|b| b.name()).join("\n")"#;

#[derive(Clone)]
pub struct Vcs {
    exec: Arc<dyn Exec>,
    /// Resolved trunk bookmark per repository root.
    trunk_cache: Arc<DashMap<PathBuf, String>>,
}

impl Vcs {
    pub fn new(exec: Arc<dyn Exec>) -> Self {
        Self {
            exec,
            trunk_cache: Arc::new(DashMap::new()),
        }
    }

    pub fn exec(&self) -> &Arc<dyn Exec> {
        &self.exec
    }

    /// Run `jj` with the given arguments. Non-zero exits are classified by
    /// stderr content; the failing command line and stderr ride along on the
    /// error.
    pub fn run(&self, args: &[&str], cwd: &Path) -> Result<CommandOutput> {
        let cmd = Cmd::new("jj")
            .args(["--no-pager", "--color", "never"])
            .args(args.iter().copied())
            .current_dir(cwd);
        let output = self.exec.run(&cmd)?;
        if output.success() {
            return Ok(output);
        }
        let kind = parse::detect_error(&output.stderr).unwrap_or(ErrorKind::CommandFailed);
        Err(Error::new(
            kind,
            format!("jj exited with code {}", output.exit_code),
        )
        .with_command(cmd.display(), output.stderr))
    }

    /// Like [`run`](Self::run), retrying on ref-lock contention: stderr
    /// matching the lock markers sleeps 20 ms and retries, at most 10
    /// attempts. Any other failure (including a timeout kill, which carries
    /// no stderr) returns immediately.
    pub fn run_with_lock_retry(&self, args: &[&str], cwd: &Path) -> Result<CommandOutput> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.run(args, cwd) {
                Ok(output) => return Ok(output),
                Err(err) => {
                    let contended = err
                        .stderr
                        .as_deref()
                        .is_some_and(parse::is_lock_error);
                    if !contended || attempt >= LOCK_RETRY_ATTEMPTS {
                        return Err(err);
                    }
                    log::debug!(
                        "ref store contended (attempt {attempt}/{LOCK_RETRY_ATTEMPTS}), retrying"
                    );
                    std::thread::sleep(LOCK_RETRY_DELAY);
                }
            }
        }
    }

    /// The trunk bookmark for the repo at `cwd`, cached per cwd.
    ///
    /// Resolves `trunk()` and picks `main`, then `master`, then the first
    /// bookmark present. A trunk with no bookmark at all is an unconfigured
    /// repo and fails `invalid-state`.
    pub fn trunk_of(&self, cwd: &Path) -> Result<String> {
        let key = cwd.to_path_buf();
        if let Some(cached) = self.trunk_cache.get(&key) {
            return Ok(cached.clone());
        }
        let output = self.run(
            &["log", "-r", "trunk()", "--no-graph", "-T", TRUNK_BOOKMARKS_TEMPLATE],
            cwd,
        )?;
        let bookmarks: Vec<&str> = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        let trunk = if bookmarks.contains(&"main") {
            "main".to_string()
        } else if bookmarks.contains(&"master") {
            "master".to_string()
        } else {
            bookmarks
                .first()
                .map(|s| (*s).to_string())
                .ok_or_else(|| {
                    Error::invalid_state(format!(
                        "no trunk bookmark configured in {}",
                        cwd.display()
                    ))
                })?
        };
        self.trunk_cache.insert(key, trunk.clone());
        Ok(trunk)
    }

    // ========================================================================
    // Changeset queries
    // ========================================================================

    /// Changesets matching `revset`, oldest first.
    pub fn log(&self, revset: &str, cwd: &Path) -> Result<Vec<Change>> {
        let output = self.run(
            &[
                "log",
                "-r",
                revset,
                "--reversed",
                "--no-graph",
                "-T",
                CHANGESET_TEMPLATE,
            ],
            cwd,
        )?;
        parse::parse_changesets(&output.stdout)
    }

    /// The single changeset `revset` resolves to. Zero matches fail
    /// `invalid-revision`; more than one fails `ambiguous-revision`.
    pub fn show(&self, revset: &str, cwd: &Path) -> Result<Change> {
        let mut changes = self.log(revset, cwd)?;
        match changes.len() {
            0 => Err(Error::new(
                ErrorKind::InvalidRevision,
                format!("revset {revset:?} matches no changes"),
            )),
            1 => Ok(changes.remove(0)),
            n => Err(Error::new(
                ErrorKind::AmbiguousRevision,
                format!("revset {revset:?} matches {n} changes"),
            )),
        }
    }

    /// The working-copy change of the workspace at `cwd`.
    pub fn working_copy(&self, cwd: &Path) -> Result<Change> {
        self.show("@", cwd)
    }

    /// Full multi-line description of one revision. The changeset template
    /// carries only first lines; trailer readers need the whole thing.
    pub fn full_description(&self, revset: &str, cwd: &Path) -> Result<String> {
        let output = self.run(&["log", "-r", revset, "--no-graph", "-T", "description"], cwd)?;
        Ok(output.stdout)
    }

    /// The stack from trunk (exclusive) to the working copy, oldest first.
    pub fn stack(&self, cwd: &Path) -> Result<Vec<Change>> {
        let trunk = self.trunk_of(cwd)?;
        self.log(&format!("{trunk}..@"), cwd)
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// `jj new` with explicit parents and a message; returns the new change.
    pub fn new_change(&self, parents: &[String], message: &str, cwd: &Path) -> Result<Change> {
        let mut args = vec!["new"];
        for parent in parents {
            args.push(parent.as_str());
        }
        args.extend(["-m", message]);
        self.run_with_lock_retry(&args, cwd)?;
        self.working_copy(cwd)
    }

    pub fn describe(&self, revset: &str, message: &str, cwd: &Path) -> Result<()> {
        self.run_with_lock_retry(&["describe", "-r", revset, "-m", message], cwd)?;
        Ok(())
    }

    pub fn abandon(&self, revset: &str, cwd: &Path) -> Result<()> {
        self.run_with_lock_retry(&["abandon", "-r", revset], cwd)?;
        Ok(())
    }

    /// Force a working-copy snapshot of the workspace at `cwd`.
    pub fn snapshot(&self, cwd: &Path) -> Result<()> {
        self.run(&["status", "--quiet"], cwd)?;
        Ok(())
    }

    // ========================================================================
    // Diffs
    // ========================================================================

    /// `jj diff --summary` for the working copy (no `-r`) or a revision.
    pub fn diff_summary(&self, revset: Option<&str>, cwd: &Path) -> Result<Vec<DiffEntry>> {
        let mut args = vec!["diff"];
        if let Some(revset) = revset {
            args.extend(["-r", revset]);
        }
        args.push("--summary");
        let output = self.run(&args, cwd)?;
        parse::parse_diff_summary(&output.stdout)
    }

    pub fn diff_numstat(
        &self,
        revset: Option<&str>,
        cwd: &Path,
    ) -> Result<indexmap::IndexMap<String, NumstatEntry>> {
        let mut args = vec!["diff"];
        if let Some(revset) = revset {
            args.extend(["-r", revset]);
        }
        args.push("--numstat");
        let output = self.run(&args, cwd)?;
        parse::parse_numstat(&output.stdout)
    }

    // ========================================================================
    // Bookmarks
    // ========================================================================

    /// All bookmarks, local and remote-tracking rows both.
    pub fn bookmarks(&self, cwd: &Path) -> Result<Vec<Bookmark>> {
        let output = self.run(
            &["bookmark", "list", "--all-remotes", "-T", BOOKMARK_TEMPLATE],
            cwd,
        )?;
        parse::parse_bookmarks(&output.stdout)
    }

    /// Local bookmarks pointing at the given change.
    pub fn bookmarks_on(&self, change_id: &str, cwd: &Path) -> Result<Vec<Bookmark>> {
        Ok(self
            .bookmarks(cwd)?
            .into_iter()
            .filter(|b| b.is_local() && b.target == change_id)
            .collect())
    }

    pub fn bookmark_create(&self, name: &str, revset: &str, cwd: &Path) -> Result<()> {
        self.run_with_lock_retry(&["bookmark", "create", name, "-r", revset], cwd)?;
        Ok(())
    }

    pub fn bookmark_set(&self, name: &str, revset: &str, cwd: &Path) -> Result<()> {
        self.run_with_lock_retry(&["bookmark", "set", name, "-r", revset], cwd)?;
        Ok(())
    }

    pub fn bookmark_delete(&self, name: &str, cwd: &Path) -> Result<()> {
        self.run_with_lock_retry(&["bookmark", "delete", name], cwd)?;
        Ok(())
    }

    pub fn bookmark_untrack(&self, qualified: &str, cwd: &Path) -> Result<()> {
        self.run_with_lock_retry(&["bookmark", "untrack", qualified], cwd)?;
        Ok(())
    }

    // ========================================================================
    // Workspaces
    // ========================================================================

    pub fn workspace_add(&self, name: &str, path: &Path, revset: &str, cwd: &Path) -> Result<()> {
        let path_str = path.to_str().ok_or_else(|| {
            Error::invalid_input(format!("workspace path is not UTF-8: {}", path.display()))
        })?;
        self.run_with_lock_retry(
            &[
                "workspace", "add", "--name", name, "--revision", revset, path_str,
            ],
            cwd,
        )?;
        Ok(())
    }

    pub fn workspace_forget(&self, name: &str, cwd: &Path) -> Result<()> {
        self.run_with_lock_retry(&["workspace", "forget", name], cwd)?;
        Ok(())
    }

    /// Root directory of the named workspace.
    pub fn workspace_root(&self, name: &str, cwd: &Path) -> Result<PathBuf> {
        let output = self.run(&["workspace", "root", "--name", name], cwd)?;
        let root = output.stdout.trim();
        if root.is_empty() {
            return Err(Error::workspace_not_found(format!(
                "workspace {name:?} has no root"
            )));
        }
        Ok(PathBuf::from(root))
    }

    /// Workspace names and their tip change ids: `name\tchange_id` rows.
    pub fn workspace_list(&self, cwd: &Path) -> Result<Vec<(String, String)>> {
        let output = self.run(
            &[
                "workspace",
                "list",
                "-T",
                r#"name ++ "\t" ++ target.change_id() ++ "\n""#,
            ],
            cwd,
        )?;
        let mut items = Vec::new();
        for line in output.stdout.lines().filter(|l| !l.is_empty()) {
            let (name, change_id) = line.split_once('\t').ok_or_else(|| {
                Error::parse(format!("malformed workspace list row: {line:?}"))
            })?;
            items.push((name.to_string(), change_id.to_string()));
        }
        Ok(items)
    }

    // ========================================================================
    // Git interop
    // ========================================================================

    pub fn git_push_bookmark(&self, name: &str, cwd: &Path) -> Result<()> {
        self.run_with_lock_retry(&["git", "push", "--allow-new", "--bookmark", name], cwd)?;
        Ok(())
    }

    pub fn git_fetch(&self, cwd: &Path) -> Result<()> {
        self.run_with_lock_retry(&["git", "fetch"], cwd)?;
        Ok(())
    }

    /// Materialize bookmarks as git refs in the colocated repo.
    pub fn git_export(&self, cwd: &Path) -> Result<()> {
        self.run_with_lock_retry(&["git", "export"], cwd)?;
        Ok(())
    }
}
