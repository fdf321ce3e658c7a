//! On-disk state under the braid state directory.
//!
//! Layout:
//!
//! ```text
//! ~/.braid/
//!   daemon.pid                      # ASCII decimal pid
//!   daemon.log                      # timestamped append-only log
//!   repos.json                      # registry of watched repos
//!   workspaces/<repo-slug>/
//!     focus.json                    # {"workspaces": [...]}
//!     <workspace-name>/             # per-agent working directory
//! ```
//!
//! All JSON files are written atomically (temp file + rename) so the daemon
//! never observes a half-written registry.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The special workspace holding preview-only scaffolding; never a valid
/// agent workspace name.
pub const UNASSIGNED_WORKSPACE: &str = "unassigned";

/// Handle to the state directory. Passed explicitly — there is no process
/// global, so tests point it at a tempdir.
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$BRAID_STATE_DIR` override, else `$HOME/.braid`.
    pub fn discover() -> Result<Self> {
        if let Ok(dir) = std::env::var("BRAID_STATE_DIR")
            && !dir.is_empty()
        {
            return Ok(Self::new(dir));
        }
        let home = dirs::home_dir()
            .ok_or_else(|| Error::invalid_state("cannot determine home directory"))?;
        Ok(Self::new(home.join(".braid")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pid_path(&self) -> PathBuf {
        self.root.join("daemon.pid")
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join("daemon.log")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.root.join("repos.json")
    }

    /// `workspaces/<repo-slug>/` for the given repo.
    pub fn repo_dir(&self, repo: &Path) -> PathBuf {
        self.root.join("workspaces").join(repo_slug(repo))
    }

    pub fn workspace_dir(&self, repo: &Path, name: &str) -> PathBuf {
        self.repo_dir(repo).join(name)
    }

    pub fn focus_path(&self, repo: &Path) -> PathBuf {
        self.repo_dir(repo).join("focus.json")
    }

    pub fn ensure_exists(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }
}

/// The registry key for a repo: the basename of its path.
pub fn repo_slug(repo: &Path) -> String {
    repo.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "repo".to_string())
}

/// Write JSON atomically: serialize to a temp file in the same directory,
/// then rename over the destination.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::invalid_input(format!("no parent directory for {}", path.display())))?;
    fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    serde_json::to_writer_pretty(&mut tmp, value)
        .map_err(|e| Error::parse(format!("serializing {}: {e}", path.display())))?;
    tmp.write_all(b"\n")?;
    tmp.persist(path)
        .map_err(|e| Error::command_failed(format!("replacing {}: {}", path.display(), e.error)))?;
    Ok(())
}

// ============================================================================
// Focus state
// ============================================================================

/// Which workspaces are included in the preview, in insertion order.
/// Source of truth for the sync engine's routing; mutated only by explicit
/// user commands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusState {
    pub workspaces: Vec<String>,
}

impl FocusState {
    pub fn load(state: &StateDir, repo: &Path) -> Result<Self> {
        let path = state.focus_path(repo);
        match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| Error::parse(format!("reading {}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn store(&self, state: &StateDir, repo: &Path) -> Result<()> {
        atomic_write_json(&state.focus_path(repo), self)
    }

    pub fn is_empty(&self) -> bool {
        self.workspaces.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workspaces.iter().any(|w| w == name)
    }
}

// ============================================================================
// Repos registry
// ============================================================================

/// How the daemon treats a registered repo.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoMode {
    /// Content-tracked by jj; the sync engine routes edits.
    #[default]
    Vcs,
    /// Plain directory; watched for registry purposes but not synced.
    Plain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoEntry {
    pub path: PathBuf,
    #[serde(default)]
    pub mode: RepoMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focused_workspaces: Option<Vec<String>>,
}

/// Accepts current and legacy schemas. Older registries spelled the focus
/// list `workspaces` and the mode `gitMode: true`; both migrate on read.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRepoEntry {
    path: PathBuf,
    #[serde(default)]
    mode: Option<RepoMode>,
    #[serde(default)]
    git_mode: Option<bool>,
    #[serde(default)]
    focused_workspaces: Option<Vec<String>>,
    #[serde(default)]
    workspaces: Option<Vec<String>>,
}

impl From<RawRepoEntry> for RepoEntry {
    fn from(raw: RawRepoEntry) -> Self {
        let mode = raw.mode.unwrap_or(if raw.git_mode == Some(true) {
            RepoMode::Plain
        } else {
            RepoMode::Vcs
        });
        RepoEntry {
            path: raw.path,
            mode,
            focused_workspaces: raw.focused_workspaces.or(raw.workspaces),
        }
    }
}

/// The process-wide list of repos the daemon watches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    pub repos: Vec<RepoEntry>,
}

impl Registry {
    pub fn load(state: &StateDir) -> Result<Self> {
        let path = state.registry_path();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        let raw: Vec<RawRepoEntry> = serde_json::from_str(&text)
            .map_err(|e| Error::parse(format!("reading {}: {e}", path.display())))?;
        Ok(Self {
            repos: raw.into_iter().map(Into::into).collect(),
        })
    }

    pub fn store(&self, state: &StateDir) -> Result<()> {
        atomic_write_json(&state.registry_path(), &self.repos)
    }

    pub fn find(&self, repo: &Path) -> Option<&RepoEntry> {
        self.repos.iter().find(|e| e.path == repo)
    }

    /// Insert or replace the entry for `repo`.
    pub fn upsert(&mut self, entry: RepoEntry) {
        match self.repos.iter_mut().find(|e| e.path == entry.path) {
            Some(existing) => *existing = entry,
            None => self.repos.push(entry),
        }
    }

    /// Remove the entry for `repo`; true when one was present.
    pub fn remove(&mut self, repo: &Path) -> bool {
        let before = self.repos.len();
        self.repos.retain(|e| e.path != repo);
        self.repos.len() != before
    }
}

// ============================================================================
// Pid file
// ============================================================================

/// Singleton guard for the daemon: one live pid per state dir.
///
/// A second daemon refuses to start while the recorded pid is live
/// (signal-0 probe); a stale file is removed and replaced.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn acquire(state: &StateDir) -> Result<Self> {
        state.ensure_exists()?;
        let path = state.pid_path();
        if let Some(pid) = read_pid(&path) {
            if pid_is_live(pid) {
                return Err(Error::invalid_state(format!(
                    "sync daemon already running (pid {pid})"
                )));
            }
            log::warn!("removing stale pid file for dead pid {pid}");
            let _ = fs::remove_file(&path);
        }
        let mut file = File::create(&path)?;
        write!(file, "{}", std::process::id())?;
        Ok(Self { path })
    }

    /// Pid of a live daemon, if one is recorded.
    pub fn live_pid(state: &StateDir) -> Option<u32> {
        read_pid(&state.pid_path()).filter(|&pid| pid_is_live(pid))
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(unix)]
fn pid_is_live(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    kill(Pid::from_raw(pid), None).is_ok()
}

#[cfg(not(unix))]
fn pid_is_live(_pid: u32) -> bool {
    // Without a cheap liveness probe, treat any recorded pid as stale.
    false
}

// ============================================================================
// Daemon log
// ============================================================================

/// Append-only daemon log: `YYYY-MM-DDTHH:MM:SS.sssZ: <message>` per line.
/// Opens lazily; writes are best-effort (a full disk never takes the daemon
/// down).
pub struct DaemonLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl DaemonLog {
    pub fn new(state: &StateDir) -> Self {
        Self {
            path: state.log_path(),
            file: Mutex::new(None),
        }
    }

    pub fn append(&self, message: &str) {
        let Ok(mut guard) = self.file.lock() else {
            return;
        };
        if guard.is_none() {
            if let Some(parent) = self.path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            *guard = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .ok();
        }
        let Some(file) = guard.as_mut() else { return };
        let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
        let _ = writeln!(file, "{ts}: {message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn state() -> (TempDir, StateDir) {
        let tmp = TempDir::new().unwrap();
        let state = StateDir::new(tmp.path());
        (tmp, state)
    }

    #[test]
    fn repo_slug_is_basename() {
        assert_eq!(repo_slug(Path::new("/home/dev/projects/acme")), "acme");
        assert_eq!(repo_slug(Path::new("acme")), "acme");
    }

    #[test]
    fn focus_round_trips() {
        let (_tmp, state) = state();
        let repo = Path::new("/projects/acme");
        assert!(FocusState::load(&state, repo).unwrap().is_empty());

        let focus = FocusState {
            workspaces: vec!["alpha".into(), "beta".into()],
        };
        focus.store(&state, repo).unwrap();
        assert_eq!(FocusState::load(&state, repo).unwrap(), focus);
    }

    #[test]
    fn registry_round_trips() {
        let (_tmp, state) = state();
        let mut registry = Registry::default();
        registry.upsert(RepoEntry {
            path: PathBuf::from("/projects/acme"),
            mode: RepoMode::Vcs,
            focused_workspaces: Some(vec!["alpha".into()]),
        });
        registry.store(&state).unwrap();
        assert_eq!(Registry::load(&state).unwrap(), registry);
    }

    #[test]
    fn registry_migrates_legacy_workspaces_key() {
        let (_tmp, state) = state();
        fs::create_dir_all(state.root()).unwrap();
        fs::write(
            state.registry_path(),
            r#"[{"path": "/projects/acme", "workspaces": ["alpha", "beta"]}]"#,
        )
        .unwrap();
        let registry = Registry::load(&state).unwrap();
        assert_eq!(
            registry.repos[0].focused_workspaces,
            Some(vec!["alpha".to_string(), "beta".to_string()])
        );
        assert_eq!(registry.repos[0].mode, RepoMode::Vcs);
    }

    #[test]
    fn registry_migrates_legacy_git_mode() {
        let (_tmp, state) = state();
        fs::create_dir_all(state.root()).unwrap();
        fs::write(
            state.registry_path(),
            r#"[{"path": "/projects/acme", "gitMode": true}]"#,
        )
        .unwrap();
        let registry = Registry::load(&state).unwrap();
        assert_eq!(registry.repos[0].mode, RepoMode::Plain);
    }

    #[test]
    fn registry_mode_enum_wins_over_legacy_flag() {
        let (_tmp, state) = state();
        fs::create_dir_all(state.root()).unwrap();
        fs::write(
            state.registry_path(),
            r#"[{"path": "/p", "mode": "vcs", "gitMode": true}]"#,
        )
        .unwrap();
        let registry = Registry::load(&state).unwrap();
        assert_eq!(registry.repos[0].mode, RepoMode::Vcs);
    }

    #[test]
    fn registry_upsert_replaces_in_place() {
        let mut registry = Registry::default();
        registry.upsert(RepoEntry {
            path: PathBuf::from("/p"),
            mode: RepoMode::Vcs,
            focused_workspaces: None,
        });
        registry.upsert(RepoEntry {
            path: PathBuf::from("/p"),
            mode: RepoMode::Plain,
            focused_workspaces: Some(vec!["a".into()]),
        });
        assert_eq!(registry.repos.len(), 1);
        assert_eq!(registry.repos[0].mode, RepoMode::Plain);
        assert!(registry.remove(Path::new("/p")));
        assert!(!registry.remove(Path::new("/p")));
    }

    #[test]
    fn atomic_write_leaves_no_temp_files() {
        let (_tmp, state) = state();
        let path = state.root().join("out.json");
        atomic_write_json(&path, &vec!["a", "b"]).unwrap();
        let entries: Vec<_> = fs::read_dir(state.root())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("out.json")]);
    }

    #[test]
    fn pid_file_blocks_second_acquire() {
        let (_tmp, state) = state();
        let _guard = PidFile::acquire(&state).unwrap();
        let err = PidFile::acquire(&state).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidState);
        assert!(err.message.contains("already running"));
    }

    #[test]
    fn pid_file_removed_on_drop_and_stale_replaced() {
        let (_tmp, state) = state();
        {
            let _guard = PidFile::acquire(&state).unwrap();
            assert!(state.pid_path().exists());
        }
        assert!(!state.pid_path().exists());

        // A dead pid is stale and gets replaced.
        fs::write(state.pid_path(), "999999999").unwrap();
        let _guard = PidFile::acquire(&state).unwrap();
        let recorded: u32 = fs::read_to_string(state.pid_path())
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert_eq!(recorded, std::process::id());
    }

    #[test]
    fn daemon_log_appends_timestamped_lines() {
        let (_tmp, state) = state();
        let log = DaemonLog::new(&state);
        log.append("route: 2 files to alpha");
        log.append("sync: no-op");
        let text = fs::read_to_string(state.log_path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(": route: 2 files to alpha"));
        // Timestamp shape: 2026-08-01T12:34:56.789Z
        let ts = lines[0].split(": ").next().unwrap();
        assert_eq!(ts.len(), 24);
        assert!(ts.ends_with('Z'));
        assert_eq!(&ts[4..5], "-");
    }
}
