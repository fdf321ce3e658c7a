//! Command-line surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::host::MergeMethod;

#[derive(Debug, Parser)]
#[command(
    name = "braid",
    version,
    about = "Parallel AI-agent workspaces over jj",
    long_about = "Braid projects each agent's in-progress work into a private workspace, \
                  keeps a single preview working tree in sync with all of them, and \
                  submits the resulting stack as dependent pull requests."
)]
pub struct Cli {
    /// Run as if braid was started in this directory.
    #[arg(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,

    /// Enable debug logging (also honors RUST_LOG).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start a new described change on top of the working copy.
    Create {
        /// Change description; doubles as the PR title on submit.
        message: String,
    },

    /// Submit the current stack as dependent pull requests.
    Submit {
        /// Create PRs as drafts.
        #[arg(long)]
        draft: bool,
        /// Plan and validate without mutating anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Merge the submitted stack bottom-up.
    Merge {
        #[arg(long, value_enum, default_value_t)]
        method: MergeMethod,
        /// Wait up to five minutes (instead of one) for each PR to become
        /// mergeable.
        #[arg(long)]
        long_wait: bool,
    },

    /// Manage which workspaces the preview includes.
    Preview {
        #[command(subcommand)]
        action: PreviewAction,
    },

    /// Manage per-agent workspaces.
    #[command(alias = "ws")]
    Workspace {
        #[command(subcommand)]
        action: WorkspaceAction,
    },

    /// Edit an arbitrary change.
    Checkout { target: String },

    /// Move one change toward the tip (creates an empty change at a
    /// described tip).
    Up,

    /// Move one change toward trunk (creates a new child rather than
    /// editing trunk itself).
    Down,

    /// Jump to the head of the current stack.
    Top,

    /// Hand the repo back to plain git: HEAD to the nearest bookmark, stop
    /// syncing.
    Exit,

    /// Control the sync daemon.
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum PreviewAction {
    /// Add workspaces to the preview.
    Add {
        #[arg(required = true)]
        workspaces: Vec<String>,
    },
    /// Remove workspaces from the preview.
    Remove {
        #[arg(required = true)]
        workspaces: Vec<String>,
    },
    /// Focus exactly these workspaces.
    Only {
        #[arg(required = true)]
        workspaces: Vec<String>,
    },
    /// Focus every managed workspace.
    All,
    /// Empty the preview and tear the merge commit down.
    None,
    /// Focus a single workspace for direct editing.
    Edit { workspace: String },
}

#[derive(Debug, Subcommand)]
pub enum WorkspaceAction {
    /// Create a workspace rooted at trunk.
    Add { name: String },
    /// Tear a workspace down (bookmarks, VCS workspace, tip, directory).
    Remove { name: String },
    /// List managed workspaces.
    List,
    /// Show a workspace's tip and touched files.
    Status { name: String },
    /// Strip the WIP prefix and submit the workspace's stack.
    Submit { name: String },
}

#[derive(Debug, Subcommand)]
pub enum DaemonAction {
    /// Run the sync daemon in the foreground.
    Run,
    /// Signal a running daemon to stop.
    Stop,
    /// Report whether a daemon is running.
    Status,
}
