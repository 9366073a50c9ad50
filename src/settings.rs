//! Runtime configuration
//!
//! Defaults are derived from the home directory; every value can be
//! overridden through a `GITPERSONA_*` environment variable.

use std::{env, path::PathBuf, time::Duration};

use crate::{decision::Thresholds, error::AppError};

/// Directory under home holding the config file
const APP_DIR: &str = ".gitpersona";
/// Config file name
const CONFIG_FILE: &str = "config.json";
/// Default bounded wait for external commands
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 10;
/// Default bounded wait for a single SSH probe attempt
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 20;
/// Delays before each SSH probe attempt
const DEFAULT_PROBE_BACKOFF_MS: [u64; 3] = [0, 250, 750];

pub const ENV_CONFIG: &str = "GITPERSONA_CONFIG";
pub const ENV_SSH_DIR: &str = "GITPERSONA_SSH_DIR";
pub const ENV_IMPORT_THRESHOLD: &str = "GITPERSONA_IMPORT_THRESHOLD";
pub const ENV_PENDING_THRESHOLD: &str = "GITPERSONA_PENDING_THRESHOLD";
pub const ENV_COMMAND_TIMEOUT: &str = "GITPERSONA_COMMAND_TIMEOUT_SECS";
pub const ENV_TOKEN_ENV_FILES: &str = "GITPERSONA_TOKEN_ENV_FILES";
/// Log filter directive, read by the binary
pub const ENV_LOG: &str = "GITPERSONA_LOG";

#[derive(Debug, Clone)]
pub struct Settings {
    pub home_dir: PathBuf,
    pub config_path: PathBuf,
    pub ssh_dir: PathBuf,
    pub thresholds: Thresholds,
    pub command_timeout: Duration,
    pub probe_timeout: Duration,
    pub probe_backoff: Vec<Duration>,
    /// Env files whose `*_TOKEN=` lines are refreshed after a switch
    pub token_env_files: Vec<PathBuf>,
}

impl Settings {
    /// Defaults rooted at `home_dir`, ignoring the environment
    pub fn with_home(home_dir: impl Into<PathBuf>) -> Self {
        let home_dir = home_dir.into();
        Self {
            config_path: home_dir.join(APP_DIR).join(CONFIG_FILE),
            ssh_dir: home_dir.join(".ssh"),
            token_env_files: vec![home_dir.join(APP_DIR).join("env")],
            home_dir,
            thresholds: Thresholds::default(),
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            probe_backoff: DEFAULT_PROBE_BACKOFF_MS
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
        }
    }

    /// Loads settings from the user's home directory and the environment
    pub fn from_env() -> Result<Self, AppError> {
        let home_dir: PathBuf = dirs::home_dir().ok_or_else(|| {
            AppError::validation("failed to find the home directory; set HOME or GITPERSONA_CONFIG")
        })?;
        let mut settings = Self::with_home(home_dir);
        settings.apply_overrides(|key| env::var(key).ok());
        Ok(settings)
    }

    /// Applies overrides from a key lookup; unparsable numbers are ignored
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_CONFIG).filter(|v| !v.trim().is_empty()) {
            self.config_path = PathBuf::from(path);
        }
        if let Some(path) = lookup(ENV_SSH_DIR).filter(|v| !v.trim().is_empty()) {
            self.ssh_dir = PathBuf::from(path);
        }
        if let Some(value) = lookup(ENV_IMPORT_THRESHOLD).and_then(|v| v.trim().parse().ok()) {
            self.thresholds.import = value;
        }
        if let Some(value) = lookup(ENV_PENDING_THRESHOLD).and_then(|v| v.trim().parse().ok()) {
            self.thresholds.pending = value;
        }
        if let Some(secs) = lookup(ENV_COMMAND_TIMEOUT).and_then(|v| v.trim().parse().ok()) {
            self.command_timeout = Duration::from_secs(secs);
        }
        if let Some(files) = lookup(ENV_TOKEN_ENV_FILES) {
            self.token_env_files = env::split_paths(&files)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_rooted_at_home() {
        let settings = Settings::with_home("/home/a");
        assert_eq!(settings.config_path, PathBuf::from("/home/a/.gitpersona/config.json"));
        assert_eq!(settings.ssh_dir, PathBuf::from("/home/a/.ssh"));
        assert_eq!(settings.probe_backoff.len(), 3);
        assert_eq!(settings.thresholds, Thresholds::default());
    }

    #[test]
    fn test_overrides() {
        let mut settings = Settings::with_home("/home/a");
        settings.apply_overrides(|key| match key {
            ENV_CONFIG => Some("/tmp/c.json".to_string()),
            ENV_IMPORT_THRESHOLD => Some("8".to_string()),
            ENV_PENDING_THRESHOLD => Some("not-a-number".to_string()),
            _ => None,
        });
        assert_eq!(settings.config_path, PathBuf::from("/tmp/c.json"));
        assert_eq!(settings.thresholds.import, 8);
        assert_eq!(settings.thresholds.pending, Thresholds::default().pending);
    }
}
