//! Identity switching and candidate import
//!
//! A switch walks `Idle → Validating → Applying → Verifying → Done`; any of
//! the middle states may end in `Failed`. Applying touches three independent
//! subsystems (git config, the SSH agent, the platform CLI) after the new
//! current account has been persisted, and Verifying re-reads the persisted
//! pointer rather than trusting in-memory state.

use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
};

use tracing::{debug, info, instrument, warn};

use crate::{
    account::{partial, Account, PendingAccount, Platform},
    decision::{decide_with, Decision, Thresholds},
    discovery::Candidate,
    error::AppError,
    git::{VersionControlConfig, VersionControlConfigWriter},
    platform::{propagate_token, PlatformClient},
    ssh::IdentityAgent,
    storage::ConfigStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    Idle,
    Validating,
    Applying,
    Verifying,
    Done,
    Failed,
}

impl SwitchState {
    /// Legal edges of the state machine
    ///
    /// `Idle → Applying` is taken only when validation is skipped. `Failed`
    /// is never entered from `Idle`: an unknown alias fails in `Validating`.
    pub fn can_transition_to(self, next: SwitchState) -> bool {
        use SwitchState::*;
        matches!(
            (self, next),
            (Idle, Validating)
                | (Idle, Applying)
                | (Validating, Applying)
                | (Validating, Failed)
                | (Applying, Verifying)
                | (Applying, Failed)
                | (Verifying, Done)
                | (Verifying, Failed)
        )
    }
}

impl fmt::Display for SwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwitchOptions {
    /// Downgrade validation and missing-credential failures to warnings
    pub force: bool,
    pub skip_validation: bool,
    /// Stop after validation without mutating anything
    pub validate_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningCode {
    MissingSshKey,
    SshKeyNotFound,
    SshValidationFailed,
    NoSshHost,
    AgentUnavailable,
    AgentNotIsolated,
    CredentialPropagation,
}

/// Non-fatal condition met during a switch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchWarning {
    pub code: WarningCode,
    pub message: String,
}

impl SwitchWarning {
    fn new(code: WarningCode, message: impl Into<String>) -> Self {
        let message = message.into();
        warn!(?code, %message, "switch warning");
        Self { code, message }
    }
}

/// Identity in effect after a switch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySummary {
    pub alias: String,
    pub display_name: String,
    pub email: String,
    pub platform: Platform,
    pub username: String,
    pub ssh_key_path: Option<PathBuf>,
}

impl From<&Account> for IdentitySummary {
    fn from(account: &Account) -> Self {
        Self {
            alias: account.alias.clone(),
            display_name: account.display_name.clone(),
            email: account.email.clone(),
            platform: account.platform,
            username: account.username.clone(),
            ssh_key_path: account.ssh_key_path.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchReport {
    pub target: String,
    pub state: SwitchState,
    /// Every state visited, starting with `Idle`
    pub trail: Vec<SwitchState>,
    pub warnings: Vec<SwitchWarning>,
    /// Successful probe attempt, when a probe ran
    pub probe_attempts: Option<usize>,
    pub summary: Option<IdentitySummary>,
}

/// Outcome of feeding candidates through the decision policy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: Vec<String>,
    pub pending: Vec<String>,
    /// Alias and reasons for each candidate left out
    pub skipped: Vec<(String, Vec<String>)>,
    pub dry_run: bool,
}

/// Drives switches and imports against one [`ConfigStore`]
pub struct SwitchCoordinator<'a> {
    store: &'a mut ConfigStore,
    vcs: &'a dyn VersionControlConfig,
    agent: IdentityAgent<'a>,
    platforms: Vec<&'a dyn PlatformClient>,
    token_env_files: Vec<PathBuf>,
    thresholds: Thresholds,
    state: SwitchState,
    trail: Vec<SwitchState>,
}

impl<'a> SwitchCoordinator<'a> {
    pub fn new(
        store: &'a mut ConfigStore,
        vcs: &'a dyn VersionControlConfig,
        agent: IdentityAgent<'a>,
        platforms: Vec<&'a dyn PlatformClient>,
    ) -> Self {
        Self {
            store,
            vcs,
            agent,
            platforms,
            token_env_files: Vec::new(),
            thresholds: Thresholds::default(),
            state: SwitchState::Idle,
            trail: vec![SwitchState::Idle],
        }
    }

    pub fn with_token_env_files(mut self, files: Vec<PathBuf>) -> Self {
        self.token_env_files = files;
        self
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// State reached by the last switch
    pub fn state(&self) -> SwitchState {
        self.state
    }

    /// States visited by the last switch
    pub fn trail(&self) -> &[SwitchState] {
        &self.trail
    }

    pub fn store(&self) -> &ConfigStore {
        &*self.store
    }

    fn transition(&mut self, next: SwitchState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal switch transition {} -> {}",
            self.state,
            next
        );
        debug!(from = %self.state, to = %next, "switch transition");
        self.state = next;
        self.trail.push(next);
    }

    fn fail(&mut self, err: AppError) -> AppError {
        self.transition(SwitchState::Failed);
        err
    }

    fn report(&self, target: &str, warnings: Vec<SwitchWarning>, probe_attempts: Option<usize>) -> SwitchReport {
        SwitchReport {
            target: target.to_string(),
            state: self.state,
            trail: self.trail.clone(),
            warnings,
            probe_attempts,
            summary: None,
        }
    }

    /// Runs only the validation step; nothing is mutated
    pub fn validate_only(&mut self, alias: &str) -> Result<SwitchReport, AppError> {
        self.switch(
            alias,
            SwitchOptions {
                validate_only: true,
                ..Default::default()
            },
        )
    }

    #[instrument(level = "info", skip(self), fields(target = alias))]
    pub fn switch(&mut self, alias: &str, opts: SwitchOptions) -> Result<SwitchReport, AppError> {
        self.state = SwitchState::Idle;
        self.trail = vec![SwitchState::Idle];

        let account = match self.store.get_account(alias).cloned() {
            Ok(account) => account,
            Err(err) => {
                self.transition(SwitchState::Validating);
                return Err(self.fail(err));
            }
        };

        let mut warnings = Vec::new();
        let mut probe_attempts = None;
        let key_usable = account.ssh_key_path.as_deref().is_some_and(Path::is_file);

        if opts.validate_only || !opts.skip_validation {
            self.transition(SwitchState::Validating);
            match self.validate(&account, opts.force, &mut warnings) {
                Ok(attempts) => probe_attempts = attempts,
                Err(err) => return Err(self.fail(err)),
            }
            if opts.validate_only {
                info!("validation finished");
                return Ok(self.report(alias, warnings, probe_attempts));
            }
        } else if let Some(key) = account.ssh_key_path.as_deref().filter(|_| !key_usable) {
            // Skipping the probe never skips the existence check on the key.
            if !opts.force {
                self.transition(SwitchState::Validating);
                let err = missing_key_error(&account);
                return Err(self.fail(err));
            }
            warnings.push(missing_key_warning(key));
        }

        self.transition(SwitchState::Applying);
        if let Err(err) = self.persist_current(alias) {
            return Err(self.fail(err));
        }

        let target_key = if key_usable {
            account.ssh_key_path.clone()
        } else {
            None
        };
        let agent_report = self.agent.switch_with_cleanup(target_key.as_deref());
        for (index, message) in agent_report.warnings.into_iter().enumerate() {
            let code = if index == 0 && !agent_report.cleared {
                WarningCode::AgentUnavailable
            } else {
                WarningCode::AgentNotIsolated
            };
            warnings.push(SwitchWarning::new(code, message));
        }

        let effective = Account {
            ssh_key_path: target_key,
            ..account.clone()
        };
        if let Err(err) = VersionControlConfigWriter::new(self.vcs).apply(&effective) {
            return Err(self.fail(err));
        }

        self.propagate_credentials(&account, &mut warnings);

        self.transition(SwitchState::Verifying);
        let persisted = match self.store.reload_current() {
            Ok(current) => current,
            Err(err) => return Err(self.fail(err)),
        };
        if persisted.as_deref() != Some(alias) {
            let err = AppError::SwitchVerificationFailed {
                expected: alias.to_string(),
                actual: persisted.unwrap_or_else(|| "<none>".to_string()),
            };
            return Err(self.fail(err));
        }

        self.transition(SwitchState::Done);
        info!(
            isolated = agent_report.isolated,
            warnings = warnings.len(),
            "switch complete"
        );

        let mut report = self.report(alias, warnings, probe_attempts);
        report.summary = Some(IdentitySummary::from(&account));
        Ok(report)
    }

    /// Returns the successful probe attempt, if a probe ran
    fn validate(
        &self,
        account: &Account,
        force: bool,
        warnings: &mut Vec<SwitchWarning>,
    ) -> Result<Option<usize>, AppError> {
        let Some(key) = account.ssh_key_path.as_deref() else {
            warnings.push(SwitchWarning::new(
                WarningCode::MissingSshKey,
                format!(
                    "account '{}' has no SSH key; add one with `gitpersona add {} ... --ssh-key <path> --overwrite`",
                    account.alias, account.alias
                ),
            ));
            return Ok(None);
        };

        if !key.is_file() {
            let err = missing_key_error(account);
            if !force {
                return Err(err);
            }
            warnings.push(missing_key_warning(key));
            return Ok(None);
        }

        let Some(host) = account.ssh_host() else {
            warnings.push(SwitchWarning::new(
                WarningCode::NoSshHost,
                format!(
                    "account '{}' on {} has no domain; cannot probe SSH connectivity",
                    account.alias, account.platform
                ),
            ));
            return Ok(None);
        };

        match self.agent.probe_with_backoff(key, &host) {
            Ok(attempt) => Ok(Some(attempt)),
            Err(probe_err) => {
                let err = AppError::SshValidationFailed {
                    alias: account.alias.clone(),
                    host,
                    key: key.to_path_buf(),
                    reason: probe_err.to_string(),
                };
                if !force {
                    return Err(err);
                }
                warnings.push(SwitchWarning::new(WarningCode::SshValidationFailed, err.to_string()));
                Ok(None)
            }
        }
    }

    fn persist_current(&mut self, alias: &str) -> Result<(), AppError> {
        self.store.set_current_account(alias)?;
        self.store.touch_last_used(alias)?;
        self.store.save()
    }

    fn propagate_credentials(&self, account: &Account, warnings: &mut Vec<SwitchWarning>) {
        if account.username.is_empty() {
            return;
        }
        let Some(client) = self
            .platforms
            .iter()
            .find(|c| c.platform() == account.platform)
        else {
            debug!(platform = %account.platform, "no platform client registered");
            return;
        };

        if let Err(err) = client.switch_user(&account.username) {
            warnings.push(SwitchWarning::new(WarningCode::CredentialPropagation, err.to_string()));
        }

        if self.token_env_files.iter().all(|f| !f.is_file()) {
            return;
        }
        let token = match client.fetch_token(&account.username) {
            Ok(token) => token,
            Err(err) => {
                warnings.push(SwitchWarning::new(WarningCode::CredentialPropagation, err.to_string()));
                return;
            }
        };
        for (path, result) in propagate_token(&self.token_env_files, account.platform, &token) {
            if let Err(err) = result {
                warnings.push(SwitchWarning::new(
                    WarningCode::CredentialPropagation,
                    format!("could not update token in {}: {}", path.display(), err),
                ));
            }
        }
    }

    /// Applies the decision policy to each candidate and saves once
    ///
    /// Collisions with existing aliases are reported as skipped, never raised.
    #[instrument(level = "info", skip(self, candidates), fields(count = candidates.len()))]
    pub fn import_candidates(
        &mut self,
        candidates: &[Candidate],
        dry_run: bool,
        auto_import: bool,
    ) -> Result<ImportReport, AppError> {
        let mut report = ImportReport {
            dry_run,
            ..Default::default()
        };

        for candidate in candidates {
            let alias = candidate.alias.clone();
            if alias.is_empty() {
                report
                    .skipped
                    .push((candidate.source_tag(), vec!["no usable alias".to_string()]));
                continue;
            }
            if let Some(existing) = self.already_configured(candidate) {
                report
                    .skipped
                    .push((alias, vec![format!("already configured as '{}'", existing)]));
                continue;
            }

            match decide_with(candidate, dry_run, auto_import, self.thresholds) {
                Decision::Import => match self.store.add_account(account_from_candidate(candidate), false) {
                    Ok(()) => report.imported.push(alias),
                    Err(err) => report.skipped.push((alias, vec![err.to_string()])),
                },
                Decision::Pending(missing) => {
                    if dry_run {
                        report.pending.push(alias);
                        continue;
                    }
                    let pending = PendingAccount {
                        alias: alias.clone(),
                        username: candidate.username.clone(),
                        discovery_source: candidate.source_tag(),
                        confidence: candidate.confidence,
                        missing_fields: missing,
                        partial_data: partial_data(candidate),
                    };
                    match self.store.add_pending_account(pending) {
                        Ok(()) => report.pending.push(alias),
                        Err(err) => report.skipped.push((alias, vec![err.to_string()])),
                    }
                }
                Decision::Skip(reasons) => {
                    report
                        .skipped
                        .push((alias, reasons.iter().map(ToString::to_string).collect()));
                }
            }
        }

        if !dry_run && (!report.imported.is_empty() || !report.pending.is_empty()) {
            self.store.save()?;
        }
        info!(
            imported = report.imported.len(),
            pending = report.pending.len(),
            skipped = report.skipped.len(),
            "import finished"
        );
        Ok(report)
    }

    /// Alias of an account or pending entry that already covers this candidate
    fn already_configured(&self, candidate: &Candidate) -> Option<String> {
        let same = |username: &str, email: &str| {
            (candidate.has_username() && username.eq_ignore_ascii_case(&candidate.username))
                || (candidate.has_email() && email.eq_ignore_ascii_case(&candidate.email))
        };
        self.store
            .list_accounts()
            .into_iter()
            .find(|a| same(&a.username, &a.email))
            .map(|a| a.alias.clone())
            .or_else(|| {
                self.store
                    .list_pending_accounts()
                    .into_iter()
                    .find(|p| {
                        same(
                            &p.username,
                            p.partial_data.get(partial::EMAIL).map(String::as_str).unwrap_or_default(),
                        )
                    })
                    .map(|p| p.alias.clone())
            })
    }
}

fn missing_key_error(account: &Account) -> AppError {
    AppError::SshKeyNotFound {
        alias: account.alias.clone(),
        path: account.ssh_key_path.clone().unwrap_or_default(),
    }
}

fn account_from_candidate(candidate: &Candidate) -> Account {
    let mut account = Account::new(&candidate.alias, candidate.display_name.trim(), candidate.email.trim());
    account.platform = candidate.platform();
    account.username = candidate.username.trim().to_string();
    account.ssh_key_path = candidate.ssh_key_path.clone();
    account.gpg_key_id = candidate.gpg_key_id.clone();
    account
}

fn partial_data(candidate: &Candidate) -> BTreeMap<String, String> {
    let mut data = BTreeMap::new();
    if candidate.has_name() {
        data.insert(partial::NAME.to_string(), candidate.display_name.trim().to_string());
    }
    if candidate.has_email() {
        data.insert(partial::EMAIL.to_string(), candidate.email.trim().to_string());
    }
    if let Some(key) = candidate.ssh_key_path.as_ref().filter(|_| candidate.has_ssh_key()) {
        data.insert(partial::SSH_KEY_PATH.to_string(), key.to_string_lossy().into_owned());
    }
    if let Some(key_id) = &candidate.gpg_key_id {
        data.insert(partial::GPG_KEY_ID.to_string(), key_id.clone());
    }
    data.insert(partial::PLATFORM.to_string(), candidate.platform().to_string());
    data
}

fn missing_key_warning(key: &Path) -> SwitchWarning {
    SwitchWarning::new(
        WarningCode::SshKeyNotFound,
        format!("SSH key {} does not exist; continuing because of --force", key.display()),
    )
}
