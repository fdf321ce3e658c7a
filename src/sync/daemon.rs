//! The sync daemon.
//!
//! One process per host (pid-file singleton). Watcher callbacks, debounce
//! deadlines, pass completions, and signals all arrive as messages on one
//! channel; the loop owns every lane and debounce timer, so there is no
//! shared mutable state beyond the channel itself. Passes run on worker
//! threads, one at a time per repo; repos advance independently.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::error::Result;
use crate::exec::SUBPROCESS_TIMEOUT;
use crate::state::{DaemonLog, PidFile, Registry, RepoMode, StateDir};
use crate::vcs::Vcs;

use super::lane::{Direction, Lane};
use super::route::{route_preview_edits, sync_agents_to_preview};
use super::watch::{DirWatcher, IgnoreSet};

/// Events coalesce for this long before a pass is scheduled.
pub const DEBOUNCE: Duration = Duration::from_millis(500);

enum DaemonEvent {
    Fs { repo: PathBuf, direction: Direction },
    RegistryChanged,
    Done {
        repo: PathBuf,
        direction: Direction,
        success: bool,
    },
    Shutdown,
}

struct RepoRuntime {
    lane: Lane,
    /// Pending debounce deadline per direction.
    deadline: [Option<Instant>; 2],
    _watchers: Vec<DirWatcher>,
}

pub struct Daemon {
    vcs: Vcs,
    state: StateDir,
    log: Arc<DaemonLog>,
    tx: Sender<DaemonEvent>,
    rx: Receiver<DaemonEvent>,
    repos: HashMap<PathBuf, RepoRuntime>,
    _registry_watcher: Option<DirWatcher>,
}

impl Daemon {
    pub fn new(vcs: Vcs, state: StateDir) -> Self {
        let (tx, rx) = unbounded();
        let log = Arc::new(DaemonLog::new(&state));
        Self {
            vcs,
            state,
            log,
            tx,
            rx,
            repos: HashMap::new(),
            _registry_watcher: None,
        }
    }

    /// Run until SIGINT/SIGTERM. Refuses to start while another daemon is
    /// live.
    pub fn run(mut self) -> Result<()> {
        let _pid = PidFile::acquire(&self.state)?;
        self.log.append("daemon started");

        #[cfg(unix)]
        self.install_signal_handler()?;
        self.watch_registry()?;
        self.reload_registry();

        let rx = self.rx.clone();
        loop {
            let timeout = self
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(Instant::now()))
                .unwrap_or(Duration::from_secs(3600));

            crossbeam_channel::select! {
                recv(rx) -> event => match event {
                    Ok(DaemonEvent::Fs { repo, direction }) => {
                        if let Some(runtime) = self.repos.get_mut(&repo) {
                            // A fresh event resets the coalescing window.
                            runtime.deadline[direction_index(direction)] =
                                Some(Instant::now() + DEBOUNCE);
                        }
                    }
                    Ok(DaemonEvent::RegistryChanged) => self.reload_registry(),
                    Ok(DaemonEvent::Done { repo, direction, success }) => {
                        self.handle_done(&repo, direction, success);
                    }
                    Ok(DaemonEvent::Shutdown) => break,
                    Err(_) => break,
                },
                default(timeout) => {}
            }
            self.fire_elapsed_deadlines();
        }

        self.shutdown();
        Ok(())
    }

    #[cfg(unix)]
    fn install_signal_handler(&self) -> Result<()> {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(|e| {
            crate::error::Error::command_failed(format!("failed to install signal handler: {e}"))
        })?;
        let tx = self.tx.clone();
        thread::spawn(move || {
            if signals.forever().next().is_some() {
                let _ = tx.send(DaemonEvent::Shutdown);
            }
        });
        Ok(())
    }

    fn watch_registry(&mut self) -> Result<()> {
        self.state.ensure_exists()?;
        let tx = self.tx.clone();
        let watcher = DirWatcher::spawn(
            self.state.root(),
            |path| path.file_name().is_some_and(|name| name == "repos.json"),
            move || {
                let _ = tx.send(DaemonEvent::RegistryChanged);
            },
        )?;
        self._registry_watcher = Some(watcher);
        Ok(())
    }

    /// Bring the watched-repo set in line with `repos.json`. New entries get
    /// watchers; removed entries drop theirs.
    fn reload_registry(&mut self) {
        let registry = match Registry::load(&self.state) {
            Ok(registry) => registry,
            Err(e) => {
                self.log.append(&format!("registry reload failed: {}", e.message));
                return;
            }
        };
        let wanted: Vec<PathBuf> = registry
            .repos
            .iter()
            .filter(|entry| entry.mode == RepoMode::Vcs)
            .map(|entry| entry.path.clone())
            .collect();

        let log = self.log.clone();
        self.repos.retain(|path, _| {
            let keep = wanted.contains(path);
            if !keep {
                log.append(&format!("unwatching {}", path.display()));
            }
            keep
        });

        for repo in wanted {
            if self.repos.contains_key(&repo) {
                continue;
            }
            match self.watch_repo(&repo) {
                Ok(runtime) => {
                    self.log.append(&format!("watching {}", repo.display()));
                    self.repos.insert(repo, runtime);
                }
                Err(e) => {
                    self.log
                        .append(&format!("cannot watch {}: {}", repo.display(), e.message));
                }
            }
        }
    }

    fn watch_repo(&self, repo: &Path) -> Result<RepoRuntime> {
        let mut watchers = Vec::new();

        // Preview watcher: the repo working tree.
        let ignore = IgnoreSet::new(repo, repo);
        let tx = self.tx.clone();
        let repo_key = repo.to_path_buf();
        watchers.push(DirWatcher::spawn(
            repo,
            move |path| !ignore.is_ignored(path),
            move || {
                let _ = tx.send(DaemonEvent::Fs {
                    repo: repo_key.clone(),
                    direction: Direction::Route,
                });
            },
        )?);

        // Workspaces watcher: the per-agent directories for this repo.
        let workspaces_dir = self.state.repo_dir(repo);
        std::fs::create_dir_all(&workspaces_dir)?;
        let ignore = IgnoreSet::new(&workspaces_dir, repo);
        let tx = self.tx.clone();
        let repo_key = repo.to_path_buf();
        watchers.push(DirWatcher::spawn(
            &workspaces_dir,
            move |path| !ignore.is_ignored(path),
            move || {
                let _ = tx.send(DaemonEvent::Fs {
                    repo: repo_key.clone(),
                    direction: Direction::Sync,
                });
            },
        )?);

        Ok(RepoRuntime {
            lane: Lane::default(),
            deadline: [None, None],
            _watchers: watchers,
        })
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.repos
            .values()
            .flat_map(|runtime| runtime.deadline.iter().flatten())
            .min()
            .copied()
    }

    fn fire_elapsed_deadlines(&mut self) {
        let now = Instant::now();
        let mut to_spawn: Vec<(PathBuf, Direction)> = Vec::new();
        for (repo, runtime) in &mut self.repos {
            for direction in [Direction::Route, Direction::Sync] {
                let slot = &mut runtime.deadline[direction_index(direction)];
                if slot.is_some_and(|deadline| deadline <= now) {
                    *slot = None;
                    if runtime.lane.request(direction) {
                        to_spawn.push((repo.clone(), direction));
                    }
                }
            }
        }
        for (repo, direction) in to_spawn {
            self.spawn_pass(repo, direction);
        }
    }

    fn handle_done(&mut self, repo: &Path, direction: Direction, success: bool) {
        let Some(runtime) = self.repos.get_mut(repo) else {
            return;
        };
        if !success {
            // The pass failed; keep its dirty bit so the next event retries.
            runtime.lane.mark_dirty(direction);
        }
        if let Some(next) = runtime.lane.complete(success) {
            self.spawn_pass(repo.to_path_buf(), next);
        }
    }

    fn spawn_pass(&self, repo: PathBuf, direction: Direction) {
        let vcs = self.vcs.clone();
        let state = self.state.clone();
        let log = self.log.clone();
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = match direction {
                Direction::Route => route_preview_edits(&vcs, &state, &repo, &log),
                Direction::Sync => sync_agents_to_preview(&vcs, &state, &repo, &log),
            };
            let success = match result {
                Ok(stats) => {
                    if !stats.is_noop() || stats.warnings > 0 || stats.failed > 0 {
                        log.append(&format!(
                            "{}: {} copied, {} deleted, {} skipped, {} warnings, {} failed ({})",
                            direction_name(direction),
                            stats.copied,
                            stats.deleted,
                            stats.skipped,
                            stats.warnings,
                            stats.failed,
                            repo.display(),
                        ));
                    }
                    stats.failed == 0
                }
                Err(e) => {
                    log.append(&format!(
                        "{} failed for {}: {}",
                        direction_name(direction),
                        repo.display(),
                        e.message
                    ));
                    false
                }
            };
            let _ = tx.send(DaemonEvent::Done {
                repo,
                direction,
                success,
            });
        });
    }

    /// Stop accepting events, let running passes finish (bounded by the
    /// subprocess timeout), then exit. Half-written files are fine — the
    /// content gate picks them up on the next start.
    fn shutdown(&mut self) {
        self.log.append("daemon shutting down");
        self._registry_watcher = None;
        for runtime in self.repos.values_mut() {
            runtime.deadline = [None, None];
            runtime._watchers.clear();
        }

        let grace = SUBPROCESS_TIMEOUT + Duration::from_secs(2);
        let deadline = Instant::now() + grace;
        while self.repos.values().any(|runtime| runtime.lane.is_busy()) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.log.append("shutdown: abandoning in-flight passes");
                break;
            }
            match self.rx.recv_timeout(remaining) {
                Ok(DaemonEvent::Done {
                    repo,
                    direction: _,
                    success: _,
                }) => {
                    if let Some(runtime) = self.repos.get_mut(&repo) {
                        let _ = runtime.lane.complete(false);
                    }
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
        self.log.append("daemon stopped");
    }
}

fn direction_index(direction: Direction) -> usize {
    match direction {
        Direction::Route => 0,
        Direction::Sync => 1,
    }
}

fn direction_name(direction: Direction) -> &'static str {
    match direction {
        Direction::Route => "route",
        Direction::Sync => "sync",
    }
}

/// Signal a running daemon to stop. Returns the pid it signalled, if any.
#[cfg(unix)]
pub fn stop(state: &StateDir) -> Result<Option<u32>> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = PidFile::live_pid(state) else {
        return Ok(None);
    };
    let raw = i32::try_from(pid)
        .map_err(|_| crate::error::Error::invalid_state(format!("pid {pid} out of range")))?;
    kill(Pid::from_raw(raw), Signal::SIGTERM)
        .map_err(|e| crate::error::Error::command_failed(format!("failed to signal {pid}: {e}")))?;
    Ok(Some(pid))
}

#[cfg(not(unix))]
pub fn stop(_state: &StateDir) -> Result<Option<u32>> {
    Err(crate::error::Error::invalid_state(
        "daemon stop is only supported on unix",
    ))
}
