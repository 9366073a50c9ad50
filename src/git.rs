use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use crate::{account::Account, error::AppError, process::CommandRunner};

/// `git config --unset` exit status when the key is absent
const GIT_CONFIG_KEY_ABSENT: i32 = 5;
/// `git config --get` exit status when the key is absent
const GIT_CONFIG_GET_ABSENT: i32 = 1;

pub const USER_NAME: &str = "user.name";
pub const USER_EMAIL: &str = "user.email";
pub const SSH_COMMAND: &str = "core.sshCommand";
pub const SIGNING_KEY: &str = "user.signingkey";
pub const GPG_SIGN: &str = "commit.gpgsign";

/// Access to version-control configuration
pub trait VersionControlConfig {
    /// Effective value of `key`, `None` when unset
    fn get(&self, key: &str) -> Result<Option<String>, AppError>;
    fn set_global(&self, key: &str, value: &str) -> Result<(), AppError>;
    fn set_local(&self, key: &str, value: &str) -> Result<(), AppError>;
    /// Removes a global key; absent keys are not an error
    fn unset_global(&self, key: &str) -> Result<(), AppError>;
    /// Removes a repository-local key; absent keys are not an error
    fn unset_local(&self, key: &str) -> Result<(), AppError>;
    fn is_inside_work_tree(&self) -> bool;
}

/// [`VersionControlConfig`] backed by the `git` binary
pub struct GitCli<'a> {
    runner: &'a dyn CommandRunner,
    work_dir: Option<PathBuf>,
}

impl<'a> GitCli<'a> {
    /// Runs git in the process's current directory
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self {
            runner,
            work_dir: None,
        }
    }

    /// Runs git inside `dir`, which decides what "local" config means
    ///
    /// # Arguments
    /// * `runner` - Command runner used for every git invocation
    /// * `dir` - Working directory for git
    pub fn in_dir(runner: &'a dyn CommandRunner, dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            work_dir: Some(dir.into()),
        }
    }

    fn git(&self, args: &[&str]) -> Result<crate::process::CommandOutput, AppError> {
        self.runner.run("git", args, self.work_dir.as_deref())
    }

    fn expect_success(&self, args: &[&str]) -> Result<(), AppError> {
        let output = self.git(args)?;
        if !output.success() {
            return Err(AppError::GitCommand(format!(
                "git {}: {}",
                args.join(" "),
                output.stderr.trim()
            )));
        }
        Ok(())
    }

    fn unset_scoped(&self, scope: &str, key: &str) -> Result<(), AppError> {
        let output = self.git(&["config", scope, "--unset", key])?;
        if output.success() || output.code == Some(GIT_CONFIG_KEY_ABSENT) {
            return Ok(());
        }
        Err(AppError::GitCommand(output.stderr.trim().to_string()))
    }
}

impl VersionControlConfig for GitCli<'_> {
    fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let output = self.git(&["config", "--get", key])?;
        if output.code == Some(GIT_CONFIG_GET_ABSENT) {
            return Ok(None);
        }
        if !output.success() {
            return Err(AppError::GitCommand(output.stderr.trim().to_string()));
        }
        let value = output.stdout_trimmed();
        Ok((!value.is_empty()).then(|| value.to_string()))
    }

    fn set_global(&self, key: &str, value: &str) -> Result<(), AppError> {
        self.expect_success(&["config", "--global", key, value])
    }

    fn set_local(&self, key: &str, value: &str) -> Result<(), AppError> {
        self.expect_success(&["config", "--local", key, value])
    }

    fn unset_global(&self, key: &str) -> Result<(), AppError> {
        self.unset_scoped("--global", key)
    }

    fn unset_local(&self, key: &str) -> Result<(), AppError> {
        self.unset_scoped("--local", key)
    }

    fn is_inside_work_tree(&self) -> bool {
        self.git(&["rev-parse", "--is-inside-work-tree"])
            .map(|out| out.success() && out.stdout_trimmed() == "true")
            .unwrap_or(false)
    }
}

/// `core.sshCommand` value that only offers `key` to the server
///
/// # Arguments
/// * `key` - Private key path, single-quoted for the shell
pub fn isolated_ssh_command(key: &Path) -> String {
    let quoted = key.to_string_lossy().replace('\'', r"'\''");
    format!("ssh -i '{}' -o IdentitiesOnly=yes", quoted)
}

/// Keys written by one [`VersionControlConfigWriter::apply`] call
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WriteReport {
    pub global: Vec<String>,
    pub local: Vec<String>,
    pub unset: Vec<String>,
}

/// Applies an account's identity to version-control configuration
pub struct VersionControlConfigWriter<'a> {
    vcs: &'a dyn VersionControlConfig,
}

impl<'a> VersionControlConfigWriter<'a> {
    pub fn new(vcs: &'a dyn VersionControlConfig) -> Self {
        Self { vcs }
    }

    /// Writes name, email, SSH override and signing settings
    ///
    /// Any failure is returned; a half-applied identity is not a usable state.
    ///
    /// # Arguments
    /// * `account` - Identity to apply; no SSH key unsets any override
    #[instrument(level = "info", skip(self, account), fields(alias = %account.alias))]
    pub fn apply(&self, account: &Account) -> Result<WriteReport, AppError> {
        let mut report = WriteReport::default();

        if !account.display_name.trim().is_empty() {
            self.vcs.set_global(USER_NAME, &account.display_name)?;
            report.global.push(USER_NAME.to_string());
        }
        if !account.email.trim().is_empty() {
            self.vcs.set_global(USER_EMAIL, &account.email)?;
            report.global.push(USER_EMAIL.to_string());
        }

        match &account.ssh_key_path {
            Some(key) => {
                let command = isolated_ssh_command(key);
                self.vcs.set_global(SSH_COMMAND, &command)?;
                report.global.push(SSH_COMMAND.to_string());
                if self.vcs.is_inside_work_tree() {
                    self.vcs.set_local(SSH_COMMAND, &command)?;
                    report.local.push(SSH_COMMAND.to_string());
                }
            }
            None => {
                self.vcs.unset_global(SSH_COMMAND)?;
                report.unset.push(SSH_COMMAND.to_string());
                // A repository override would otherwise keep the previous key.
                if self.vcs.is_inside_work_tree() {
                    self.vcs.unset_local(SSH_COMMAND)?;
                    report.local.push(SSH_COMMAND.to_string());
                }
            }
        }

        match account.gpg_key_id.as_deref().filter(|_| account.gpg_enabled) {
            Some(key_id) => {
                self.vcs.set_global(SIGNING_KEY, key_id)?;
                self.vcs.set_global(GPG_SIGN, "true")?;
                report.global.push(SIGNING_KEY.to_string());
                report.global.push(GPG_SIGN.to_string());
            }
            None => {
                self.vcs.set_global(GPG_SIGN, "false")?;
                report.global.push(GPG_SIGN.to_string());
            }
        }

        info!(global = report.global.len(), local = report.local.len(), "applied git identity");
        debug!(?report);
        Ok(report)
    }
}
