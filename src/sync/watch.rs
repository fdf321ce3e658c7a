//! Filesystem watching with per-repo ignore filtering.
//!
//! Watcher events are only ever treated as "something changed" — the passes
//! re-derive actual state from disk and jj. All that matters here is firing
//! for the right paths and staying quiet for VCS internals and build churn.

use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::{Error, Result};

/// Names filtered everywhere, on top of the repo's own ignore file.
pub const IGNORED_NAMES: &[&str] = &[".jj", ".git", "node_modules", ".DS_Store", "focus.json"];

/// The ignore set for one watched root: constant names plus the repo's
/// `.gitignore` patterns.
pub struct IgnoreSet {
    root: PathBuf,
    gitignore: Gitignore,
}

impl IgnoreSet {
    /// Build for a watch root, reading ignore patterns from `ignore_source`
    /// (the repo working tree; for the workspaces watcher this is still the
    /// repo, whose patterns apply inside each workspace).
    pub fn new(root: impl Into<PathBuf>, ignore_source: &Path) -> Self {
        let root = root.into();
        let mut builder = GitignoreBuilder::new(&root);
        let ignore_file = ignore_source.join(".gitignore");
        if ignore_file.exists() {
            // An unparseable ignore file just means fewer filters.
            let _ = builder.add(&ignore_file);
        }
        let gitignore = builder.build().unwrap_or_else(|_| Gitignore::empty());
        Self { root, gitignore }
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        for component in path.components() {
            if let std::path::Component::Normal(name) = component
                && let Some(name) = name.to_str()
                && IGNORED_NAMES.contains(&name)
            {
                return true;
            }
        }
        if let Ok(relative) = path.strip_prefix(&self.root) {
            let is_dir = path.is_dir();
            return self
                .gitignore
                .matched_path_or_any_parents(relative, is_dir)
                .is_ignore();
        }
        false
    }
}

/// Count files under `root` that pass the ignore set, breadth-first, giving
/// up at `cap` visited entries. Good enough for status displays; never walks
/// a pathological tree to completion.
pub fn bounded_file_count(root: &Path, ignore: &IgnoreSet, cap: usize) -> usize {
    let mut files = 0;
    let mut visited = 0;
    let mut queue = std::collections::VecDeque::from([root.to_path_buf()]);
    while let Some(dir) = queue.pop_front() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            visited += 1;
            if visited > cap {
                return files;
            }
            let path = entry.path();
            if ignore.is_ignored(&path) {
                continue;
            }
            match entry.file_type() {
                Ok(file_type) if file_type.is_dir() => queue.push_back(path),
                Ok(file_type) if file_type.is_file() => files += 1,
                _ => {}
            }
        }
    }
    files
}

/// A live recursive watcher on one directory. Kept alive for RAII; dropping
/// it unsubscribes.
pub struct DirWatcher {
    _watcher: RecommendedWatcher,
}

impl DirWatcher {
    /// Watch `dir`, invoking `on_event` for every create/modify/remove whose
    /// path passes `filter`. The callback runs on the watcher's thread and
    /// should only enqueue.
    pub fn spawn(
        dir: &Path,
        filter: impl Fn(&Path) -> bool + Send + 'static,
        on_event: impl Fn() + Send + 'static,
    ) -> Result<Self> {
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            let Ok(event) = result else { return };
            if !matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) {
                return;
            }
            if event.paths.iter().any(|path| filter(path)) {
                on_event();
            }
        })
        .map_err(|e| Error::command_failed(format!("failed to create watcher: {e}")))?;
        watcher
            .watch(dir, RecursiveMode::Recursive)
            .map_err(|e| Error::command_failed(format!("failed to watch {}: {e}", dir.display())))?;
        Ok(Self { _watcher: watcher })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn constant_names_are_ignored_anywhere() {
        let tmp = TempDir::new().unwrap();
        let set = IgnoreSet::new(tmp.path(), tmp.path());
        for path in [
            tmp.path().join(".jj/working_copy"),
            tmp.path().join(".git/HEAD"),
            tmp.path().join("deep/node_modules/lib/index.js"),
            tmp.path().join(".DS_Store"),
            tmp.path().join("focus.json"),
        ] {
            assert!(set.is_ignored(&path), "{path:?} should be ignored");
        }
        assert!(!set.is_ignored(&tmp.path().join("src/main.rs")));
    }

    #[test]
    fn repo_gitignore_patterns_apply() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(".gitignore"), "target/\n*.log\n").unwrap();
        let set = IgnoreSet::new(tmp.path(), tmp.path());
        assert!(set.is_ignored(&tmp.path().join("target/debug/braid")));
        assert!(set.is_ignored(&tmp.path().join("daemon.log")));
        assert!(!set.is_ignored(&tmp.path().join("src/lib.rs")));
    }

    #[test]
    fn bounded_count_respects_ignores_and_cap() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("src")).unwrap();
        fs::create_dir_all(tmp.path().join(".jj/store")).unwrap();
        fs::write(tmp.path().join("src/a.rs"), "a").unwrap();
        fs::write(tmp.path().join("src/b.rs"), "b").unwrap();
        fs::write(tmp.path().join(".jj/store/blob"), "x").unwrap();

        let set = IgnoreSet::new(tmp.path(), tmp.path());
        assert_eq!(bounded_file_count(tmp.path(), &set, 1000), 2);
        // Cap bounds the walk rather than the result being exact.
        assert!(bounded_file_count(tmp.path(), &set, 1) <= 1);
    }

    #[test]
    fn watcher_fires_for_matching_paths_only() {
        let tmp = TempDir::new().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_in_cb = fired.clone();
        let _watcher = DirWatcher::spawn(
            tmp.path(),
            |path| path.extension().is_some_and(|e| e == "txt"),
            move || {
                fired_in_cb.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();
        std::thread::sleep(Duration::from_millis(100));

        fs::write(tmp.path().join("note.txt"), "hello").unwrap();
        let mut seen = 0;
        for _ in 0..50 {
            std::thread::sleep(Duration::from_millis(50));
            seen = fired.load(Ordering::SeqCst);
            if seen > 0 {
                break;
            }
        }
        assert!(seen > 0, "expected at least one event for note.txt");

        let before = fired.load(Ordering::SeqCst);
        fs::write(tmp.path().join("ignored.bin"), "nope").unwrap();
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(fired.load(Ordering::SeqCst), before);
    }
}
