//! The sync engine: watchers, debounce, per-repo lanes, and the two
//! byte-copy passes between the preview tree and agent workspaces.

pub mod daemon;
pub mod lane;
pub mod route;
pub mod watch;

pub use daemon::{DEBOUNCE, Daemon, stop};
pub use lane::{Direction, Lane};
pub use route::{PassStats, copy_if_different, route_preview_edits, sync_agents_to_preview};
pub use watch::{DirWatcher, IGNORED_NAMES, IgnoreSet, bounded_file_count};
