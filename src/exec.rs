//! Subprocess execution.
//!
//! All external commands go through this module so there is exactly one
//! choke point for logging, timeouts, and test substitution. Commands are
//! always argv vectors — nothing is ever interpreted by a shell.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use wait_timeout::ChildExt;

use crate::error::{Error, Result};

/// Hard cap on any subprocess. A killed process surfaces `command-failed`
/// and is never retried.
pub const SUBPROCESS_TIMEOUT: Duration = Duration::from_secs(10);

/// Captured result of a finished subprocess.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// An argv command plus its execution environment.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
    stdin: Option<String>,
    timeout: Duration,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            stdin: None,
            timeout: SUBPROCESS_TIMEOUT,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The argv vector, program first. Used by [`FakeExec`] matching.
    pub fn argv(&self) -> Vec<String> {
        let mut v = Vec::with_capacity(1 + self.args.len());
        v.push(self.program.clone());
        v.extend(self.args.iter().cloned());
        v
    }

    /// Render for logs and error messages: `jj log -r @ --no-graph`.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Streamed progress from long-running commands (e.g. `jj git fetch` during
/// repo setup). One variant enum, delivered over a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Cloning(String),
    Complete,
    Error(String),
}

/// The executor seam. One real implementation and a deterministic fake for
/// tests; everything above this layer is exercised against both.
pub trait Exec: Send + Sync {
    fn run(&self, cmd: &Cmd) -> Result<CommandOutput>;

    /// Run while forwarding stderr lines as progress events. The final event
    /// is always `Complete` or `Error`.
    fn run_streaming(&self, cmd: &Cmd, events: &Sender<ProgressEvent>) -> Result<CommandOutput>;
}

/// Real executor backed by `std::process`.
#[derive(Debug, Default)]
pub struct SystemExec;

impl SystemExec {
    fn spawn(&self, cmd: &Cmd) -> Result<std::process::Child> {
        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .stdin(if cmd.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &cmd.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &cmd.env {
            command.env(key, value);
        }
        command.spawn().map_err(|e| {
            let kind = if e.kind() == std::io::ErrorKind::NotFound {
                crate::error::ErrorKind::DependencyMissing
            } else {
                crate::error::ErrorKind::CommandFailed
            };
            Error::new(kind, format!("failed to spawn {}: {e}", cmd.program))
                .with_command(cmd.display(), "")
        })
    }

    fn wait_with_timeout(&self, cmd: &Cmd, mut child: std::process::Child) -> Result<CommandOutput> {
        if let Some(input) = &cmd.stdin
            && let Some(mut stdin) = child.stdin.take()
        {
            // Feed stdin from a thread so a full pipe can't deadlock us.
            let input = input.clone();
            thread::spawn(move || {
                let _ = stdin.write_all(input.as_bytes());
            });
        }

        let stdout = child.stdout.take().map(drain_reader);
        let stderr = child.stderr.take().map(drain_reader);

        let status = match child.wait_timeout(cmd.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::command_failed(format!(
                    "command timed out after {}s",
                    cmd.timeout.as_secs()
                ))
                .with_command(cmd.display(), ""));
            }
            Err(e) => {
                let _ = child.kill();
                return Err(Error::command_failed(format!("wait failed: {e}"))
                    .with_command(cmd.display(), ""));
            }
        };

        let stdout = stdout.map(join_reader).unwrap_or_default();
        let stderr = stderr.map(join_reader).unwrap_or_default();

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code: status.code().unwrap_or(-1),
        })
    }
}

fn drain_reader<R: Read + Send + 'static>(reader: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = String::new();
        let mut reader = BufReader::new(reader);
        let _ = reader.read_to_string(&mut buf);
        buf
    })
}

fn join_reader(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

impl Exec for SystemExec {
    fn run(&self, cmd: &Cmd) -> Result<CommandOutput> {
        log::debug!("$ {}", cmd.display());
        let t0 = Instant::now();
        let child = self.spawn(cmd)?;
        let result = self.wait_with_timeout(cmd, child);
        let duration_ms = t0.elapsed().as_secs_f64() * 1000.0;
        match &result {
            Ok(output) => log::debug!(
                "[braid-trace] cmd=\"{}\" dur={:.1}ms exit={}",
                cmd.display(),
                duration_ms,
                output.exit_code
            ),
            Err(e) => log::debug!(
                "[braid-trace] cmd=\"{}\" dur={:.1}ms err=\"{}\"",
                cmd.display(),
                duration_ms,
                e.message
            ),
        }
        result
    }

    fn run_streaming(&self, cmd: &Cmd, events: &Sender<ProgressEvent>) -> Result<CommandOutput> {
        log::debug!("$ {} (streaming)", cmd.display());
        let mut child = self.spawn(cmd)?;

        // Progress tools write to stderr; forward each line as it arrives.
        let stderr_lines = child.stderr.take().map(|stderr| {
            let events = events.clone();
            thread::spawn(move || {
                let mut collected = String::new();
                for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
                    let _ = events.send(ProgressEvent::Cloning(line.clone()));
                    collected.push_str(&line);
                    collected.push('\n');
                }
                collected
            })
        });
        let stdout = child.stdout.take().map(drain_reader);

        let status = match child.wait_timeout(cmd.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                let err = Error::command_failed(format!(
                    "command timed out after {}s",
                    cmd.timeout.as_secs()
                ))
                .with_command(cmd.display(), "");
                let _ = events.send(ProgressEvent::Error(err.message.clone()));
                return Err(err);
            }
            Err(e) => {
                let _ = child.kill();
                let err = Error::command_failed(format!("wait failed: {e}"))
                    .with_command(cmd.display(), "");
                let _ = events.send(ProgressEvent::Error(err.message.clone()));
                return Err(err);
            }
        };

        let stderr = stderr_lines.map(join_reader).unwrap_or_default();
        let stdout = stdout.map(join_reader).unwrap_or_default();
        let output = CommandOutput {
            stdout,
            stderr,
            exit_code: status.code().unwrap_or(-1),
        };
        let _ = events.send(if output.success() {
            ProgressEvent::Complete
        } else {
            ProgressEvent::Error(format!("exit code {}", output.exit_code))
        });
        Ok(output)
    }
}

/// Deterministic executor for tests: canned responses keyed by argv.
///
/// Responses are matched in FIFO order per argv key, so a test can script a
/// sequence of calls to the same command. Unmatched commands fall back to a
/// default (empty success) unless `strict` is set.
#[derive(Default)]
pub struct FakeExec {
    responses: Mutex<HashMap<Vec<String>, Vec<Result<CommandOutput>>>>,
    calls: Mutex<Vec<Vec<String>>>,
    strict: bool,
}

impl FakeExec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unknown argv vectors become errors instead of empty successes.
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    pub fn expect<I, S>(&self, argv: I, response: Result<CommandOutput>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let key: Vec<String> = argv.into_iter().map(Into::into).collect();
        self.responses
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .push(response);
    }

    /// Convenience: canned success with the given stdout.
    pub fn expect_ok<I, S>(&self, argv: I, stdout: impl Into<String>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expect(
            argv,
            Ok(CommandOutput {
                stdout: stdout.into(),
                stderr: String::new(),
                exit_code: 0,
            }),
        );
    }

    /// Convenience: canned failure with the given exit code and stderr.
    pub fn expect_fail<I, S>(&self, argv: I, exit_code: i32, stderr: impl Into<String>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expect(
            argv,
            Ok(CommandOutput {
                stdout: String::new(),
                stderr: stderr.into(),
                exit_code,
            }),
        );
    }

    /// Every argv vector this fake has been asked to run, in order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// Whether any recorded call starts with the given prefix.
    pub fn called_with_prefix(&self, prefix: &[&str]) -> bool {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .any(|call| call.len() >= prefix.len() && call.iter().zip(prefix).all(|(a, b)| a == b))
    }
}

impl Exec for FakeExec {
    fn run(&self, cmd: &Cmd) -> Result<CommandOutput> {
        let argv = cmd.argv();
        self.calls.lock().unwrap().push(argv.clone());
        let mut responses = self.responses.lock().unwrap();
        if let Some(queue) = responses.get_mut(&argv)
            && !queue.is_empty()
        {
            return queue.remove(0);
        }
        if self.strict {
            return Err(Error::command_failed(format!(
                "unexpected command in test: {}",
                cmd.display()
            )));
        }
        Ok(CommandOutput::default())
    }

    fn run_streaming(&self, cmd: &Cmd, events: &Sender<ProgressEvent>) -> Result<CommandOutput> {
        let output = self.run(cmd)?;
        let _ = events.send(if output.success() {
            ProgressEvent::Complete
        } else {
            ProgressEvent::Error(format!("exit code {}", output.exit_code))
        });
        Ok(output)
    }
}

/// Probe that a binary exists and runs. Used for startup diagnostics.
pub fn check_dependency(exec: &dyn Exec, program: &str) -> Result<()> {
    let cmd = Cmd::new(program).arg("--version");
    let output = exec.run(&cmd).map_err(|e| {
        Error::new(
            crate::error::ErrorKind::DependencyMissing,
            format!("{program} is not installed or not on PATH"),
        )
        .with_command(cmd.display(), e.stderr.unwrap_or_default())
    })?;
    if !output.success() {
        return Err(Error::new(
            crate::error::ErrorKind::DependencyMissing,
            format!("{program} --version exited with code {}", output.exit_code),
        )
        .with_command(cmd.display(), output.stderr));
    }
    Ok(())
}
