//! Error types shared across the crate.
//!
//! Every fallible operation returns [`Result`]. An [`Error`] carries a
//! machine-readable [`ErrorKind`], a human message, and — when the failure
//! came out of a subprocess — the command line and captured stderr so the
//! CLI can show what actually went wrong.

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a failure. Stable across the crate; the CLI prints the
/// kebab-case form (`workspace-not-found`, `merge-blocked`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    NotInRepo,
    NotInitialized,
    CommandFailed,
    Conflict,
    InvalidRevision,
    InvalidState,
    WorkspaceNotFound,
    WorkspaceExists,
    ParseError,
    DependencyMissing,
    NavigationFailed,
    MergeBlocked,
    AlreadyMerged,
    EmptyChange,
    MissingMessage,
    AmbiguousRevision,
    NotFound,
    InvalidInput,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    /// The subprocess command line, when the error came from one.
    pub command: Option<String>,
    /// Captured stderr, when the error came from a subprocess.
    pub stderr: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            command: None,
            stderr: None,
        }
    }

    /// Attach the failing command and its stderr.
    pub fn with_command(mut self, command: impl Into<String>, stderr: impl Into<String>) -> Self {
        self.command = Some(command.into());
        let stderr = stderr.into();
        if !stderr.trim().is_empty() {
            self.stderr = Some(stderr);
        }
        self
    }

    /// Prefix the message with caller context. The kind and subprocess
    /// details are preserved — context enriches, it never replaces.
    pub fn context(mut self, ctx: impl fmt::Display) -> Self {
        self.message = format!("{ctx}: {}", self.message);
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(command) = &self.command {
            write!(f, "\n  command: {command}")?;
        }
        if let Some(stderr) = &self.stderr {
            for line in stderr.trim_end().lines() {
                write!(f, "\n  stderr: {line}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        let kind = match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            _ => ErrorKind::CommandFailed,
        };
        Error::new(kind, e.to_string())
    }
}

/// Shorthand constructors for the common kinds.
macro_rules! ctor {
    ($name:ident, $kind:ident) => {
        pub fn $name(message: impl Into<String>) -> Error {
            Error::new(ErrorKind::$kind, message)
        }
    };
}

impl Error {
    ctor!(command_failed, CommandFailed);
    ctor!(parse, ParseError);
    ctor!(invalid_state, InvalidState);
    ctor!(invalid_input, InvalidInput);
    ctor!(conflict, Conflict);
    ctor!(not_found, NotFound);
    ctor!(workspace_not_found, WorkspaceNotFound);
    ctor!(workspace_exists, WorkspaceExists);
    ctor!(merge_blocked, MergeBlocked);
    ctor!(missing_message, MissingMessage);
    ctor!(navigation_failed, NavigationFailed);
}
