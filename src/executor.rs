//! Process execution boundary for firewall commands.
//!
//! Every dialect hands the executor an [`Invocation`]; how it reaches the
//! OS is decided by an explicit [`ExecPolicy`] instead of ad hoc string
//! formatting at the call sites.

use crate::error::{NetblockError, Result};
use std::fmt;
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Characters that change meaning under `cmd.exe` or `sh`.
const SHELL_METACHARACTERS: &[char] = &[
    '"', '&', '|', '<', '>', '^', '%', '!', ';', '$', '`', '\n', '\r',
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecPolicy {
    /// Render a single command line and hand it to the platform shell.
    Shell,
    /// Spawn the program directly with an argument vector.
    ArgumentVector,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
    pub policy: ExecPolicy,
}

impl Invocation {
    pub fn new<I, S>(policy: ExecPolicy, program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
            policy,
        }
    }

    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Single-line form used for shell execution and startup scripts.
    pub fn command_line(&self) -> Result<String> {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(quote_arg(&self.program)?);
        for arg in &self.args {
            parts.push(quote_arg(arg)?);
        }
        Ok(parts.join(" "))
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Quotes `key=value with spaces` as `key="value with spaces"` and bare
/// multi-word arguments as `"multi word"`.
fn quote_arg(arg: &str) -> Result<String> {
    if arg.is_empty() || arg.contains(SHELL_METACHARACTERS) {
        return Err(NetblockError::UnsafeArgument(arg.to_string()));
    }

    if !arg.contains(char::is_whitespace) {
        return Ok(arg.to_string());
    }

    match arg.split_once('=') {
        Some((key, value)) if !key.contains(char::is_whitespace) => {
            Ok(format!("{}=\"{}\"", key, value))
        }
        _ => Ok(format!("\"{}\"", arg)),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Best available human-readable reason for a failure.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match self.exit_code {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait CommandExecutor: Send + Sync {
    fn run(&self, invocation: &Invocation, timeout: Option<Duration>) -> Result<CommandOutput>;
}

/// Executes invocations on the local host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

impl SystemExecutor {
    fn build_command(invocation: &Invocation) -> Result<Command> {
        let command = match invocation.policy {
            ExecPolicy::ArgumentVector => {
                let mut command = Command::new(&invocation.program);
                command.args(&invocation.args);
                command
            }
            ExecPolicy::Shell => shell_command(&invocation.command_line()?),
        };
        Ok(command)
    }

    fn execute(invocation: &Invocation, timeout: Option<Duration>) -> Result<CommandOutput> {
        let mut command = Self::build_command(invocation)?;
        command
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| {
            NetblockError::CommandFailed(format!("failed to spawn `{}`: {}", invocation, e))
        })?;

        let stdout_reader = spawn_reader(child.stdout.take());
        let stderr_reader = spawn_reader(child.stderr.take());

        // A child may exit without reading its input; its own status and
        // output still decide the result.
        if let (Some(input), Some(mut stdin)) = (&invocation.stdin, child.stdin.take()) {
            if let Err(e) = stdin.write_all(input.as_bytes()) {
                warn!("Could not write stdin to `{}`: {}", invocation, e);
            }
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if let (Some(deadline), Some(timeout)) = (deadline, timeout) {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(NetblockError::CommandTimeout {
                        command: invocation.to_string(),
                        timeout,
                    });
                }
            }
            thread::sleep(POLL_INTERVAL);
        };

        Ok(CommandOutput {
            exit_code: status.code(),
            stdout: stdout_reader.join().unwrap_or_default(),
            stderr: stderr_reader.join().unwrap_or_default(),
        })
    }
}

#[cfg(target_os = "windows")]
fn shell_command(line: &str) -> Command {
    use std::os::windows::process::CommandExt;

    // cmd.exe does its own parsing, so the line must not be re-escaped.
    let mut command = Command::new("cmd");
    command.arg("/C").raw_arg(line);
    command
}

#[cfg(not(target_os = "windows"))]
fn shell_command(line: &str) -> Command {
    let mut command = Command::new("sh");
    command.args(["-c", line]);
    command
}

fn spawn_reader<R: Read + Send + 'static>(source: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut source) = source {
            let _ = source.read_to_end(&mut buffer);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    })
}

impl CommandExecutor for SystemExecutor {
    fn run(&self, invocation: &Invocation, timeout: Option<Duration>) -> Result<CommandOutput> {
        info!("Executing: {}", invocation);

        // Callers decide whether a failure is an error; this only records it.
        match Self::execute(invocation, timeout) {
            Ok(output) => {
                match output.exit_code {
                    Some(code) => info!("`{}` exited with code {}", invocation, code),
                    None => warn!("`{}` was terminated by a signal", invocation),
                }
                Ok(output)
            }
            Err(e) => {
                warn!("`{}` could not complete: {}", invocation, e);
                Err(e)
            }
        }
    }
}
