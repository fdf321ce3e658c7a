//! Per-agent workspace lifecycle.
//!
//! Every agent gets a jj workspace rooted under
//! `<state-dir>/workspaces/<repo-slug>/<name>`. The workspace tip carries a
//! `wip: ` description so half-done agent work can never be exported by the
//! git backend; the prefix is stripped on submit.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, ErrorKind, Result};
use crate::state::{StateDir, UNASSIGNED_WORKSPACE};
use crate::vcs::{Bookmark, Vcs};

/// Prefix on the tip description of an unsubmitted workspace.
pub const WIP_PREFIX: &str = "wip: ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceInfo {
    pub name: String,
    pub path: PathBuf,
    /// Change id of the workspace tip (`<name>@`).
    pub tip: String,
}

pub struct WorkspaceManager {
    vcs: Vcs,
    state: StateDir,
    repo: PathBuf,
}

impl WorkspaceManager {
    pub fn new(vcs: Vcs, state: StateDir, repo: impl Into<PathBuf>) -> Self {
        Self {
            vcs,
            state,
            repo: repo.into(),
        }
    }

    pub fn repo(&self) -> &Path {
        &self.repo
    }

    pub fn dir_of(&self, name: &str) -> PathBuf {
        self.state.workspace_dir(&self.repo, name)
    }

    /// Create the named workspace rooted at trunk.
    pub fn add(&self, name: &str) -> Result<WorkspaceInfo> {
        validate_name(name)?;
        let dir = self.dir_of(name);
        if dir.exists() {
            return Err(Error::workspace_exists(format!(
                "workspace directory already exists: {}",
                dir.display()
            )));
        }
        let trunk = self.vcs.trunk_of(&self.repo)?;
        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent)?;
        }
        self.vcs.workspace_add(name, &dir, &trunk, &self.repo)?;
        self.vcs
            .describe(&format!("{name}@"), &format!("{WIP_PREFIX}{name}"), &self.repo)?;
        write_editor_ignore(&dir)?;
        let tip = self.tip_of(name)?;
        self.vcs.bookmark_create(name, &format!("{name}@"), &self.repo)?;
        Ok(WorkspaceInfo {
            name: name.to_string(),
            path: dir,
            tip,
        })
    }

    /// Tear the named workspace down. The order is load-bearing: bookmarks
    /// come off before the workspace is forgotten, and the tip is abandoned
    /// before the directory goes away. Every step runs even when an earlier
    /// one failed; the first error is returned.
    pub fn remove(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let mut first_error: Option<Error> = None;
        let mut note = |result: Result<()>| {
            if let Err(e) = result
                && first_error.is_none()
            {
                first_error = Some(e);
            }
        };

        let tip = self.tip_of(name);
        let on_tip: Vec<Bookmark> = match &tip {
            Ok(tip) => self.vcs.bookmarks_on(tip, &self.repo).unwrap_or_default(),
            Err(_) => Vec::new(),
        };

        let all = self.vcs.bookmarks(&self.repo).unwrap_or_default();
        for bookmark in &on_tip {
            for remote in all
                .iter()
                .filter(|b| b.name == bookmark.name && b.remote.is_some())
            {
                note(self.vcs.bookmark_untrack(&remote.qualified_name(), &self.repo));
            }
        }
        for bookmark in &on_tip {
            note(self.vcs.bookmark_delete(&bookmark.name, &self.repo));
        }

        note(self.vcs.workspace_forget(name, &self.repo));
        match tip {
            Ok(tip) => note(self.vcs.abandon(&tip, &self.repo)),
            Err(e) => note(Err(e)),
        }

        let dir = self.dir_of(name);
        if dir.exists() {
            note(fs::remove_dir_all(&dir).map_err(Into::into));
        }

        match first_error {
            Some(e) => Err(e.context(format!("removing workspace {name:?}"))),
            None => Ok(()),
        }
    }

    /// Workspaces that live under the managed subtree. The repo's own
    /// `default` workspace — and anything a user added elsewhere by hand —
    /// is filtered out.
    pub fn list(&self) -> Result<Vec<WorkspaceInfo>> {
        let managed_root = self.state.repo_dir(&self.repo);
        let mut infos = Vec::new();
        for (name, tip) in self.vcs.workspace_list(&self.repo)? {
            let Ok(path) = self.vcs.workspace_root(&name, &self.repo) else {
                continue;
            };
            if !path.starts_with(&managed_root) {
                continue;
            }
            infos.push(WorkspaceInfo { name, path, tip });
        }
        Ok(infos)
    }

    /// Change id at `<name>@`.
    pub fn tip_of(&self, name: &str) -> Result<String> {
        let change = self
            .vcs
            .show(&format!("{name}@"), &self.repo)
            .map_err(|e| match e.kind {
                ErrorKind::InvalidRevision => Error::workspace_not_found(format!(
                    "workspace {name:?} has no working copy"
                )),
                _ => e,
            })?;
        if change.change_id.is_empty() {
            return Err(Error::workspace_not_found(format!(
                "workspace {name:?} has no working copy"
            )));
        }
        Ok(change.change_id)
    }

    /// Force a snapshot of the workspace at `path` so jj records dirty files.
    pub fn snapshot(&self, path: &Path) -> Result<()> {
        self.vcs.snapshot(path)
    }

    /// Strip the `wip: ` prefix from the tip description ahead of submit.
    ///
    /// Fails `missing-message` when nothing but the prefix is there — an
    /// undescribed workspace has no business on the host.
    pub fn strip_wip_prefix(&self, name: &str) -> Result<String> {
        let revset = format!("{name}@");
        let change = self.vcs.show(&revset, &self.repo)?;
        let description = change
            .description
            .strip_prefix(WIP_PREFIX)
            .unwrap_or(&change.description)
            .trim()
            .to_string();
        if description.is_empty() {
            return Err(Error::missing_message(format!(
                "workspace {name:?} has no description beyond the WIP prefix"
            )));
        }
        if change.is_wip() {
            self.vcs.describe(&revset, &description, &self.repo)?;
        }
        Ok(description)
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == UNASSIGNED_WORKSPACE
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::invalid_input(format!(
            "invalid workspace name {name:?} (ascii alphanumerics, '-' and '_' only; {UNASSIGNED_WORKSPACE:?} is reserved)"
        )));
    }
    Ok(())
}

/// Drop an ignore file into the workspace's jj metadata so editor tooling
/// never indexes VCS internals. Contents inside `.jj/` are invisible to jj
/// itself, so this never shows up in any diff.
fn write_editor_ignore(workspace_dir: &Path) -> Result<()> {
    let jj_dir = workspace_dir.join(".jj");
    if !jj_dir.exists() {
        return Ok(());
    }
    let ignore = jj_dir.join(".gitignore");
    if !ignore.exists() {
        fs::write(&ignore, "*\n")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_validated() {
        assert!(validate_name("agent-1").is_ok());
        assert!(validate_name("agent_2").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("unassigned").is_err());
        assert!(validate_name("has space").is_err());
        assert!(validate_name("dot.dot").is_err());
        assert!(validate_name("../escape").is_err());
    }

    #[test]
    fn editor_ignore_written_once() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ws = tmp.path().join("alpha");
        fs::create_dir_all(ws.join(".jj")).unwrap();

        write_editor_ignore(&ws).unwrap();
        assert_eq!(fs::read_to_string(ws.join(".jj/.gitignore")).unwrap(), "*\n");

        // An existing file is left alone.
        fs::write(ws.join(".jj/.gitignore"), "custom\n").unwrap();
        write_editor_ignore(&ws).unwrap();
        assert_eq!(
            fs::read_to_string(ws.join(".jj/.gitignore")).unwrap(),
            "custom\n"
        );
    }

    #[test]
    fn editor_ignore_skips_missing_metadata_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_editor_ignore(tmp.path()).unwrap();
        assert!(!tmp.path().join(".jj").exists());
    }
}
