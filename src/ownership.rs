//! File ownership across focused workspaces.
//!
//! Ownership is derived, never stored: a workspace owns a file iff the file
//! appears in the workspace tip's diff against its parent. Two owners for
//! one path is a routing conflict — preview edits to that path have no
//! single destination.

use std::path::Path;

use indexmap::IndexMap;

use crate::error::Result;
use crate::vcs::Vcs;

/// `file → owners`, insertion-ordered by first touch.
#[derive(Debug, Default, Clone)]
pub struct OwnershipMap {
    owners: IndexMap<String, Vec<String>>,
}

impl OwnershipMap {
    /// Build the map for a set of workspaces, from each tip's diff summary.
    /// Deterministic: a pure function of the workspace diffs.
    pub fn build(vcs: &Vcs, workspaces: &[String], cwd: &Path) -> Result<Self> {
        let mut map = Self::default();
        for workspace in workspaces {
            let entries = vcs.diff_summary(Some(&format!("{workspace}@")), cwd)?;
            for entry in entries {
                map.claim(&entry.path, workspace);
                if let Some(old) = &entry.old_path {
                    map.claim(old, workspace);
                }
            }
        }
        Ok(map)
    }

    fn claim(&mut self, file: &str, workspace: &str) {
        let owners = self.owners.entry(file.to_string()).or_default();
        if !owners.iter().any(|w| w == workspace) {
            owners.push(workspace.to_string());
        }
    }

    pub fn owners(&self, file: &str) -> &[String] {
        self.owners.get(file).map(Vec::as_slice).unwrap_or(&[])
    }

    /// More than one workspace touched this file.
    pub fn conflict(&self, file: &str) -> bool {
        self.owners(file).len() > 1
    }

    /// Every conflicted file with its owner list.
    pub fn conflicting_files(&self) -> Vec<(&str, &[String])> {
        self.owners
            .iter()
            .filter(|(_, owners)| owners.len() > 1)
            .map(|(file, owners)| (file.as_str(), owners.as_slice()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

/// Conflicted files across a workspace set, for focus-add validation.
pub fn conflicting_files(
    vcs: &Vcs,
    workspaces: &[String],
    cwd: &Path,
) -> Result<Vec<(String, Vec<String>)>> {
    let map = OwnershipMap::build(vcs, workspaces, cwd)?;
    Ok(map
        .conflicting_files()
        .into_iter()
        .map(|(file, owners)| (file.to_string(), owners.to_vec()))
        .collect())
}
