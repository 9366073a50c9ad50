//! Account discovery
//!
//! Scans the machine for identities that already exist: global and
//! per-directory git config, conventionally named SSH keys, logged-in
//! platform CLIs and signing keys. Each source yields scored [`Candidate`]s
//! which are merged into one list. A failing source is logged and skipped;
//! [`AccountDiscoveryEngine::scan`] never returns an error.

mod merge;
mod sources;

use std::{collections::BTreeSet, path::PathBuf};

use tracing::{debug, info, warn};

use crate::{account::Platform, error::AppError, platform::PlatformClient, process::CommandRunner};

pub use merge::{assign_platform, merge_all, merge_pair, should_merge};
pub use sources::{parse_git_config, parse_signing_keys, SigningKey};

pub const SOURCE_GIT_GLOBAL: &str = "git-global";
pub const SOURCE_GIT_CONFIG: &str = "git-config";
pub const SOURCE_SSH_KEY: &str = "ssh-key";
pub const SOURCE_GPG: &str = "gpg";

pub const CONFIDENCE_GIT_GLOBAL: u8 = 5;
pub const CONFIDENCE_GIT_CONFIG: u8 = 6;
pub const CONFIDENCE_GIT_CONFIG_PARTIAL: u8 = 4;
pub const CONFIDENCE_SSH_KEY_VALID_USER: u8 = 7;
pub const CONFIDENCE_SSH_KEY: u8 = 6;
pub const CONFIDENCE_PLATFORM_CLI: u8 = 8;
pub const MAX_CONFIDENCE: u8 = 10;

/// Identity found by discovery; never persisted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidate {
    pub alias: String,
    pub display_name: String,
    pub email: String,
    pub username: String,
    pub ssh_key_path: Option<PathBuf>,
    /// Sources that contributed to this candidate
    pub sources: BTreeSet<String>,
    pub confidence: u8,
    /// Platforms named explicitly by a source
    pub platform_hints: BTreeSet<Platform>,
    pub gpg_key_id: Option<String>,
}

impl Candidate {
    pub fn new(alias: impl Into<String>, source: &str, confidence: u8) -> Self {
        Self {
            alias: alias.into(),
            sources: BTreeSet::from([source.to_string()]),
            confidence: confidence.min(MAX_CONFIDENCE),
            ..Default::default()
        }
    }

    pub fn has_name(&self) -> bool {
        !self.display_name.trim().is_empty()
    }

    pub fn has_email(&self) -> bool {
        !self.email.trim().is_empty()
    }

    pub fn has_username(&self) -> bool {
        !self.username.trim().is_empty()
    }

    pub fn has_ssh_key(&self) -> bool {
        self.ssh_key_path
            .as_ref()
            .is_some_and(|p| !p.as_os_str().is_empty())
    }

    /// Source tags joined for display and persistence
    pub fn source_tag(&self) -> String {
        self.sources.iter().cloned().collect::<Vec<_>>().join("+")
    }

    /// Platform after applying the assignment rules
    pub fn platform(&self) -> Platform {
        assign_platform(self)
    }
}

/// Where discovery looks on disk
#[derive(Debug, Clone)]
pub struct DiscoveryPaths {
    pub home_dir: PathBuf,
    pub ssh_dir: PathBuf,
}

impl DiscoveryPaths {
    pub fn new(home_dir: impl Into<PathBuf>, ssh_dir: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: home_dir.into(),
            ssh_dir: ssh_dir.into(),
        }
    }
}

/// Scans system sources for identities
pub struct AccountDiscoveryEngine<'a> {
    paths: DiscoveryPaths,
    runner: &'a dyn CommandRunner,
    platforms: Vec<&'a dyn PlatformClient>,
}

impl<'a> AccountDiscoveryEngine<'a> {
    pub fn new(
        paths: DiscoveryPaths,
        runner: &'a dyn CommandRunner,
        platforms: Vec<&'a dyn PlatformClient>,
    ) -> Self {
        Self {
            paths,
            runner,
            platforms,
        }
    }

    /// Runs every source in priority order and returns merged candidates,
    /// highest confidence first, then by alias
    pub fn scan(&self) -> Vec<Candidate> {
        let mut found: Vec<Candidate> = Vec::new();
        let mut collect = |name: &str, result: Result<Vec<Candidate>, AppError>| match result {
            Ok(candidates) => {
                debug!(source = name, count = candidates.len(), "discovery source scanned");
                found.extend(candidates);
            }
            Err(err) => warn!(source = name, error = %err, "skipping unreadable discovery source"),
        };

        collect(SOURCE_GIT_GLOBAL, sources::scan_global_git(self.runner));
        collect(SOURCE_GIT_CONFIG, sources::scan_git_config_files(&self.paths.home_dir));
        collect(SOURCE_SSH_KEY, sources::scan_ssh_keys(&self.paths.ssh_dir));
        collect("platform-cli", Ok(sources::scan_platform_sessions(&self.platforms)));

        let mut merged = merge_all(found);

        match sources::scan_signing_keys(self.runner) {
            Ok(keys) => sources::attach_signing_keys(&mut merged, &keys),
            Err(err) => debug!(source = SOURCE_GPG, error = %err, "skipping signing keys"),
        }

        merged.sort_by(|a, b| b.confidence.cmp(&a.confidence).then_with(|| a.alias.cmp(&b.alias)));
        info!(count = merged.len(), "discovery finished");
        merged
    }
}

/// Lowercased alias made of `[a-z0-9._-]`, empty when nothing survives
pub fn sanitize_alias(raw: &str) -> String {
    let mut alias = String::with_capacity(raw.len());
    for c in raw.trim().chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            alias.push(c);
        } else if !alias.ends_with('-') {
            alias.push('-');
        }
    }
    alias.trim_matches(|c| c == '-' || c == '.').to_string()
}

/// Alias derived from the local part of an email address
pub fn alias_from_email(email: &str) -> String {
    sanitize_alias(email.split('@').next().unwrap_or_default())
}
