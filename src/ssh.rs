//! SSH key-agent control
//!
//! [`SshAgent`] is the raw capability over an agent; [`IdentityAgent`] layers
//! the switch semantics on top of it: clear everything, load exactly one key,
//! and probe connectivity with identities-only semantics.

use std::{
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use tracing::{debug, info, warn};

use crate::{
    error::AppError,
    process::{CommandOutput, CommandRunner},
};

/// `ssh-add` exit status when the agent holds no keys
const SSH_ADD_NO_IDENTITIES: i32 = 1;

/// Server banners that mean the key authenticated even on a non-zero exit
const PROBE_SUCCESS_MARKERS: [&str; 4] = [
    "successfully authenticated",
    "welcome to gitlab",
    "authenticated via ssh key",
    "logged in as",
];

/// Control over an SSH key agent
pub trait SshAgent {
    /// Identifiers of the keys currently loaded
    fn list_loaded(&self) -> Result<Vec<String>, AppError>;
    fn clear(&self) -> Result<(), AppError>;
    fn load(&self, key: &Path) -> Result<(), AppError>;
    /// Attempts an authentication round-trip against `host` with `key`
    fn probe_connection(&self, key: &Path, host: &str, identities_only: bool) -> Result<(), AppError>;
    /// Identifier `list_loaded` reports for `key` once it is loaded
    fn key_id(&self, key: &Path) -> Result<String, AppError>;
}

/// [`SshAgent`] backed by `ssh-add`, `ssh-keygen` and `ssh`
pub struct SshAgentCli<'a> {
    runner: &'a dyn CommandRunner,
    probe_timeout: Duration,
}

impl<'a> SshAgentCli<'a> {
    pub fn new(runner: &'a dyn CommandRunner, probe_timeout: Duration) -> Self {
        Self {
            runner,
            probe_timeout,
        }
    }

    fn agent_error(output: &CommandOutput) -> AppError {
        AppError::tool_unavailable("ssh-agent", output.stderr.trim())
    }
}

impl SshAgent for SshAgentCli<'_> {
    fn list_loaded(&self) -> Result<Vec<String>, AppError> {
        let output = self.runner.run("ssh-add", &["-l"], None)?;
        if output.code == Some(SSH_ADD_NO_IDENTITIES) {
            return Ok(Vec::new());
        }
        if !output.success() {
            return Err(Self::agent_error(&output));
        }
        Ok(parse_fingerprints(&output.stdout))
    }

    fn clear(&self) -> Result<(), AppError> {
        let output = self.runner.run("ssh-add", &["-D"], None)?;
        if !output.success() {
            return Err(Self::agent_error(&output));
        }
        Ok(())
    }

    fn load(&self, key: &Path) -> Result<(), AppError> {
        let key_arg = key.to_string_lossy();
        let output = self.runner.run("ssh-add", &[key_arg.as_ref()], None)?;
        if !output.success() {
            return Err(AppError::tool_unavailable(
                "ssh-add",
                format!("could not load {}: {}", key.display(), output.stderr.trim()),
            ));
        }
        Ok(())
    }

    fn probe_connection(&self, key: &Path, host: &str, identities_only: bool) -> Result<(), AppError> {
        let key_arg = key.to_string_lossy();
        let target = format!("git@{}", host);
        let mut args = vec![
            "-T",
            "-o",
            "BatchMode=yes",
            "-o",
            "ConnectTimeout=10",
            "-o",
            "StrictHostKeyChecking=accept-new",
        ];
        if identities_only {
            args.extend(["-o", "IdentitiesOnly=yes"]);
        }
        args.extend(["-i", key_arg.as_ref(), target.as_str()]);

        let output = self
            .runner
            .run_with_timeout("ssh", &args, None, self.probe_timeout)?;
        if probe_succeeded(&output) {
            return Ok(());
        }
        let reason = output
            .stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("no response from server")
            .trim()
            .to_string();
        Err(AppError::validation(reason))
    }

    fn key_id(&self, key: &Path) -> Result<String, AppError> {
        let key_arg = key.to_string_lossy();
        let output = self.runner.run("ssh-keygen", &["-lf", key_arg.as_ref()], None)?;
        if !output.success() {
            return Err(AppError::validation(format!(
                "cannot fingerprint {}: {}",
                key.display(),
                output.stderr.trim()
            )));
        }
        parse_fingerprints(&output.stdout)
            .into_iter()
            .next()
            .ok_or_else(|| AppError::validation(format!("no fingerprint for {}", key.display())))
    }
}

/// Second column of `ssh-add -l` / `ssh-keygen -l` lines
fn parse_fingerprints(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(str::to_string)
        .collect()
}

fn probe_succeeded(output: &CommandOutput) -> bool {
    if output.success() {
        return true;
    }
    let text = output.combined().to_ascii_lowercase();
    PROBE_SUCCESS_MARKERS.iter().any(|m| text.contains(m))
}

/// Result of [`IdentityAgent::switch_with_cleanup`]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AgentSwitchReport {
    pub cleared: bool,
    pub loaded: Option<PathBuf>,
    /// Agent holds exactly the target key
    pub isolated: bool,
    pub warnings: Vec<String>,
}

/// Switch-level operations over an [`SshAgent`]
pub struct IdentityAgent<'a> {
    agent: &'a dyn SshAgent,
    backoff: Vec<Duration>,
}

impl<'a> IdentityAgent<'a> {
    pub fn new(agent: &'a dyn SshAgent, backoff: Vec<Duration>) -> Self {
        Self { agent, backoff }
    }

    pub fn list_loaded(&self) -> Result<Vec<String>, AppError> {
        self.agent.list_loaded()
    }

    pub fn clear(&self) -> Result<(), AppError> {
        self.agent.clear()
    }

    pub fn load(&self, key: &Path) -> Result<(), AppError> {
        self.agent.load(key)
    }

    /// Probes with identities-only semantics, sleeping before each attempt
    ///
    /// Returns the attempt number that succeeded, or the last failure.
    pub fn probe_with_backoff(&self, key: &Path, host: &str) -> Result<usize, AppError> {
        let mut last_err = AppError::validation("no probe attempts configured");
        for (index, delay) in self.backoff.iter().enumerate() {
            if !delay.is_zero() {
                thread::sleep(*delay);
            }
            match self.agent.probe_connection(key, host, true) {
                Ok(()) => {
                    debug!(attempt = index + 1, host, "ssh probe succeeded");
                    return Ok(index + 1);
                }
                Err(err) => {
                    debug!(attempt = index + 1, host, error = %err, "ssh probe failed");
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    /// Clears all loaded keys, then loads exactly `key`
    ///
    /// Agent errors never abort; they come back as warnings.
    pub fn switch_with_cleanup(&self, key: Option<&Path>) -> AgentSwitchReport {
        let mut report = AgentSwitchReport::default();

        match self.agent.clear() {
            Ok(()) => report.cleared = true,
            Err(err) => {
                warn!(error = %err, "could not clear ssh agent");
                report
                    .warnings
                    .push(format!("could not clear SSH agent keys: {}", err));
                if matches!(err, AppError::ToolUnavailable { .. }) && key.is_none() {
                    return report;
                }
            }
        }

        let Some(key) = key else {
            report.isolated = report.cleared;
            return report;
        };

        match self.agent.load(key) {
            Ok(()) => {
                info!(key = %key.display(), "loaded ssh key");
                report.loaded = Some(key.to_path_buf());
            }
            Err(err) => {
                warn!(error = %err, key = %key.display(), "could not load ssh key");
                report.warnings.push(format!(
                    "could not load SSH key {} into the agent: {}; run `ssh-add {}` manually",
                    key.display(),
                    err,
                    key.display()
                ));
                return report;
            }
        }

        match (self.agent.key_id(key), self.agent.list_loaded()) {
            (Ok(expected), Ok(loaded)) => {
                report.isolated = loaded.len() == 1 && loaded[0] == expected;
                if !report.isolated {
                    report.warnings.push(format!(
                        "SSH agent holds {} key(s) after switching; expected only {}",
                        loaded.len(),
                        key.display()
                    ));
                }
            }
            (Err(err), _) | (_, Err(err)) => {
                report
                    .warnings
                    .push(format!("could not verify SSH agent contents: {}", err));
            }
        }

        report
    }
}
