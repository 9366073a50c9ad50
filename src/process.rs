//! External command execution with a bounded wait

use std::{
    io::Read,
    path::Path,
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use tracing::debug;

use crate::error::AppError;

/// Interval between exit-status polls
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Trimmed stdout
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// stdout and stderr joined, for tools that report on either stream
    pub fn combined(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Runs external programs
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[&str], cwd: Option<&Path>) -> Result<CommandOutput, AppError>;

    /// Runs with an explicit deadline; defaults to [`CommandRunner::run`]
    fn run_with_timeout(
        &self,
        program: &str,
        args: &[&str],
        cwd: Option<&Path>,
        _timeout: Duration,
    ) -> Result<CommandOutput, AppError> {
        self.run(program, args, cwd)
    }
}

/// Runs real processes, killing them once the deadline passes
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str], cwd: Option<&Path>) -> Result<CommandOutput, AppError> {
        self.run_with_timeout(program, args, cwd, self.timeout)
    }

    fn run_with_timeout(
        &self,
        program: &str,
        args: &[&str],
        cwd: Option<&Path>,
        timeout: Duration,
    ) -> Result<CommandOutput, AppError> {
        let binary = which::which(program)
            .map_err(|e| AppError::tool_unavailable(program, e.to_string()))?;

        let mut command = Command::new(binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        debug!(program, ?args, "running command");
        let mut child = command
            .spawn()
            .map_err(|e| AppError::tool_unavailable(program, e.to_string()))?;

        // Drain pipes on helper threads so a chatty child cannot block on a full pipe.
        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        let deadline = Instant::now() + timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(AppError::CommandTimeout {
                    command: format!("{} {}", program, args.join(" ")),
                    secs: timeout.as_secs(),
                });
            }
            thread::sleep(POLL_INTERVAL);
        };

        let stdout = stdout_reader.map(join_reader).unwrap_or_default();
        let stderr = stderr_reader.map(join_reader).unwrap_or_default();

        Ok(CommandOutput {
            code: status.code(),
            stdout,
            stderr,
        })
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut source: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = source.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_reader(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}
