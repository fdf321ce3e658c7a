//! Parallel AI-agent workspaces over jj.
//!
//! Braid gives every coding agent a private jj workspace, keeps one
//! "preview" working tree bidirectionally in sync with all of them, and
//! submits the resulting stack of changes as dependent pull requests.
//!
//! The library is consumed by the `braid` binary; its API is not stable.

pub mod cli;
pub mod commands;
pub mod error;
pub mod exec;
pub mod host;
pub mod navigate;
pub mod ownership;
pub mod preview;
pub mod stack;
pub mod state;
pub mod sync;
pub mod vcs;
pub mod workspace;

pub use error::{Error, ErrorKind, Result};
