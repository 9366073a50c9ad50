//! Command implementations shared by the CLI and the interactive menu

use std::{
    env,
    path::{Path, PathBuf},
};

use colored::Colorize;
use tracing::debug;

use crate::{
    account::{Account, Platform},
    decision::{decide_with, Decision, Thresholds},
    discovery::{AccountDiscoveryEngine, Candidate, DiscoveryPaths},
    error::AppError,
    git::{self, GitCli, VersionControlConfig},
    platform::{GhCli, GlabCli, PlatformClient},
    process::SystemRunner,
    project,
    settings::Settings,
    ssh::{IdentityAgent, SshAgentCli},
    storage::ConfigStore,
    switch::{ImportReport, SwitchCoordinator, SwitchOptions, SwitchReport},
    validation::{
        is_valid_platform_username, validate_input_alias, validate_input_email, validate_input_name,
    },
};

/// Everything a command needs: settings, a process runner and the loaded store
pub struct Context {
    pub settings: Settings,
    pub runner: SystemRunner,
    pub store: ConfigStore,
}

impl Context {
    /// Loads settings from the environment and opens the config store
    pub fn load() -> Result<Self, AppError> {
        Self::with_settings(Settings::from_env()?)
    }

    pub fn with_settings(settings: Settings) -> Result<Self, AppError> {
        let runner = SystemRunner::new(settings.command_timeout);
        let store = ConfigStore::open(&settings.config_path)?;
        Ok(Self {
            settings,
            runner,
            store,
        })
    }
}

/// Fields for a new account, as collected by the CLI or the menu
#[derive(Debug, Clone, Default)]
pub struct NewAccount {
    pub alias: String,
    pub name: String,
    pub email: String,
    pub platform: Platform,
    pub username: Option<String>,
    pub ssh_key: Option<PathBuf>,
    pub domain: Option<String>,
    pub gpg_key: Option<String>,
    pub overwrite: bool,
}

/// Platform CLIs relevant to `account`; the public hosts are always present
fn platform_clients<'a>(
    runner: &'a SystemRunner,
    account: Option<&Account>,
) -> Vec<Box<dyn PlatformClient + 'a>> {
    let mut clients: Vec<Box<dyn PlatformClient + 'a>> =
        vec![Box::new(GhCli::new(runner)), Box::new(GlabCli::new(runner))];
    if let Some(account) = account.filter(|a| a.platform == Platform::GithubEnterprise) {
        if let Some(host) = account.domain.as_deref() {
            clients.insert(0, Box::new(GhCli::enterprise(runner, host)));
        }
    }
    clients
}

/// Checks that at least one account exists
pub fn check_if_accounts_exist(store: &ConfigStore) -> Result<(), AppError> {
    if store.list_accounts().is_empty() {
        return Err(AppError::validation(
            "no accounts configured; add one with `gitpersona add` or run `gitpersona discover`",
        ));
    }
    Ok(())
}

/// Alias bound to the working directory through a project file or the store
pub fn project_alias(store: &ConfigStore, dir: &Path) -> Option<String> {
    if let Some((root, alias)) = project::resolve_project_alias(dir) {
        debug!(root = %root.display(), alias, "using project file");
        return Some(alias);
    }
    dir.ancestors()
        .find_map(|d| store.project_config_for(d))
        .map(|p| p.account.clone())
}

/// Switches to `alias`, or to the account bound to the current project
pub fn switch_user(ctx: &mut Context, alias: Option<&str>, opts: SwitchOptions) -> Result<(), AppError> {
    check_if_accounts_exist(&ctx.store)?;
    let alias = match alias {
        Some(alias) => alias.to_string(),
        None => {
            let cwd = env::current_dir()?;
            project_alias(&ctx.store, &cwd).ok_or_else(|| {
                AppError::validation(format!(
                    "no alias given and no project binding found above {}; pass an alias or run `gitpersona project bind <alias>`",
                    cwd.display()
                ))
            })?
        }
    };

    let account = ctx.store.get_account(&alias)?.clone();
    let clients = platform_clients(&ctx.runner, Some(&account));
    let git = GitCli::new(&ctx.runner);
    let agent = SshAgentCli::new(&ctx.runner, ctx.settings.probe_timeout);

    let mut coordinator = SwitchCoordinator::new(
        &mut ctx.store,
        &git,
        IdentityAgent::new(&agent, ctx.settings.probe_backoff.clone()),
        clients.iter().map(|c| c.as_ref()).collect(),
    )
    .with_token_env_files(ctx.settings.token_env_files.clone())
    .with_thresholds(ctx.settings.thresholds);

    let report = coordinator.switch(&alias, opts)?;
    print_switch_report(&report, opts.validate_only);
    Ok(())
}

fn print_switch_report(report: &SwitchReport, validate_only: bool) {
    for warning in &report.warnings {
        println!("{} {}", "warning:".yellow(), warning.message);
    }
    if let Some(attempt) = report.probe_attempts {
        println!("{} {} (attempt {})", "ssh validated:".green(), report.target, attempt);
    }
    if validate_only {
        println!("{} {}", "validation passed for:".green(), report.target);
        return;
    }
    println!("{} {}", "switched to account:".green(), report.target);
    if let Some(summary) = &report.summary {
        println!("  {} {} <{}>", "identity:".blue(), summary.display_name, summary.email);
        if !summary.username.is_empty() {
            println!("  {} {} ({})", "platform:".blue(), summary.username, summary.platform);
        }
        if let Some(key) = &summary.ssh_key_path {
            println!("  {} {}", "ssh key:".blue(), key.display());
        }
    }
}

/// Validates input and adds a new account
pub fn add_user(ctx: &mut Context, new: NewAccount) -> Result<(), AppError> {
    validate_input_name(&new.name)?;
    validate_input_email(&new.email)?;
    if !new.overwrite {
        let taken: Vec<&str> = ctx
            .store
            .list_accounts()
            .into_iter()
            .map(|a| a.alias.as_str())
            .chain(ctx.store.list_pending_accounts().into_iter().map(|p| p.alias.as_str()))
            .collect();
        validate_input_alias(&new.alias, taken)?;
    } else {
        validate_input_alias(&new.alias, std::iter::empty())?;
    }

    let username = new.username.unwrap_or_default();
    if !username.is_empty() && !is_valid_platform_username(new.platform, &username) {
        return Err(AppError::validation(format!(
            "'{}' is not a valid {} username",
            username, new.platform
        )));
    }
    if let Some(key) = new.ssh_key.as_deref().filter(|k| !k.is_file()) {
        println!("{} SSH key {} does not exist yet", "warning:".yellow(), key.display());
    }

    let mut account = Account::new(new.alias.trim(), new.name.trim(), new.email.trim());
    account.platform = new.platform;
    account.username = username;
    account.ssh_key_path = new.ssh_key;
    account.domain = new.domain;
    account.gpg_enabled = new.gpg_key.is_some();
    account.gpg_key_id = new.gpg_key;

    let alias = account.alias.clone();
    ctx.store.add_account(account, new.overwrite)?;
    ctx.store.save()?;
    println!("{} {}", "account added:".green(), alias);
    Ok(())
}

/// Removes an account; clears the current pointer when it was active
pub fn delete_user(ctx: &mut Context, alias: &str) -> Result<(), AppError> {
    check_if_accounts_exist(&ctx.store)?;
    let removed = ctx.store.remove_account(alias)?;
    ctx.store.save()?;
    println!("{} {}", "account deleted:".green(), removed.alias);
    Ok(())
}

/// Shows the active account next to what git actually reports
pub fn show_current_user(ctx: &Context) -> Result<(), AppError> {
    match ctx.store.current_account() {
        Some(account) => println!("{} {}", "current account:".blue(), account),
        None => println!("{}", "no current account".yellow()),
    }

    let git = GitCli::new(&ctx.runner);
    let name = git.get(git::USER_NAME)?.unwrap_or_default();
    let email = git.get(git::USER_EMAIL)?.unwrap_or_default();
    println!("{} {} <{}>", "git identity:".blue(), name, email);
    if let Some(command) = git.get(git::SSH_COMMAND)? {
        println!("{} {}", "ssh command:".blue(), command);
    }

    if let Some(alias) = project_alias(&ctx.store, &env::current_dir()?) {
        println!("{} {}", "project account:".blue(), alias);
    }
    Ok(())
}

/// Lists configured accounts, marking the current one
pub fn list_all_users(ctx: &Context) -> Result<(), AppError> {
    check_if_accounts_exist(&ctx.store)?;
    let current = ctx.store.current_alias();
    for account in ctx.store.list_accounts() {
        let marker = if current == Some(account.alias.as_str()) { "*" } else { " " };
        println!("{} {}", marker.green(), account);
    }
    let pending = ctx.store.list_pending_accounts().len();
    if pending > 0 {
        println!("{} {} (see `gitpersona pending list`)", "pending accounts:".yellow(), pending);
    }
    Ok(())
}

/// Scans the machine for identities and feeds them through the import policy
pub fn discover(ctx: &mut Context, dry_run: bool, auto_import: bool) -> Result<(), AppError> {
    let clients = platform_clients(&ctx.runner, None);
    let client_refs: Vec<&dyn PlatformClient> = clients.iter().map(|c| c.as_ref()).collect();
    let engine = AccountDiscoveryEngine::new(
        DiscoveryPaths::new(&ctx.settings.home_dir, &ctx.settings.ssh_dir),
        &ctx.runner,
        client_refs.clone(),
    );
    let candidates = engine.scan();
    if candidates.is_empty() {
        println!("{}", "no identities found".yellow());
        return Ok(());
    }
    for candidate in &candidates {
        print_candidate(candidate);
    }

    let git = GitCli::new(&ctx.runner);
    let agent = SshAgentCli::new(&ctx.runner, ctx.settings.probe_timeout);
    let mut coordinator = SwitchCoordinator::new(
        &mut ctx.store,
        &git,
        IdentityAgent::new(&agent, ctx.settings.probe_backoff.clone()),
        client_refs,
    )
    .with_thresholds(ctx.settings.thresholds);
    let report = coordinator.import_candidates(&candidates, dry_run, auto_import)?;
    let labels = import_labels(&report, &candidates, auto_import, ctx.settings.thresholds);
    print_import_report(&report, &labels);
    Ok(())
}

/// Reported aliases paired with whether they are (or would be) imported
///
/// A dry run keeps everything pending, so the preview asks the policy what a
/// real run would do for each candidate instead.
fn import_labels(
    report: &ImportReport,
    candidates: &[Candidate],
    auto_import: bool,
    thresholds: Thresholds,
) -> Vec<(bool, String)> {
    let mut labels: Vec<(bool, String)> = report.imported.iter().map(|alias| (true, alias.clone())).collect();
    for alias in &report.pending {
        let imports = report.dry_run
            && candidates
                .iter()
                .find(|c| &c.alias == alias)
                .is_some_and(|c| decide_with(c, false, auto_import, thresholds) == Decision::Import);
        labels.push((imports, alias.clone()));
    }
    labels
}

fn print_candidate(candidate: &Candidate) {
    let mut line = format!("{} [{}] confidence {}", candidate.alias, candidate.source_tag(), candidate.confidence);
    if candidate.has_name() || candidate.has_email() {
        line.push_str(&format!(" {} <{}>", candidate.display_name, candidate.email));
    }
    if candidate.has_username() {
        line.push_str(&format!(" {}@{}", candidate.username, candidate.platform()));
    }
    println!("{} {}", "found:".blue(), line);
}

fn print_import_report(report: &ImportReport, labels: &[(bool, String)]) {
    let (imported, pending) = if report.dry_run {
        ("would import:", "would keep pending:")
    } else {
        ("imported:", "pending:")
    };
    for (imports, alias) in labels {
        if *imports {
            println!("{} {}", imported.green(), alias);
        } else {
            println!("{} {}", pending.yellow(), alias);
        }
    }
    for (alias, reasons) in &report.skipped {
        println!("{} {} ({})", "skipped:".red(), alias, reasons.join(", "));
    }
}

pub fn list_pending(ctx: &Context) -> Result<(), AppError> {
    let pending = ctx.store.list_pending_accounts();
    if pending.is_empty() {
        println!("{}", "no pending accounts".yellow());
        return Ok(());
    }
    for entry in pending {
        let missing: Vec<String> = entry.missing_fields.iter().map(ToString::to_string).collect();
        println!(
            "{} [{}] confidence {} missing: {}",
            entry.alias,
            entry.discovery_source,
            entry.confidence,
            missing.join(", ")
        );
    }
    Ok(())
}

/// Completes a pending account with a name and email
pub fn complete_pending(ctx: &mut Context, alias: &str, name: &str, email: &str) -> Result<(), AppError> {
    validate_input_name(name)?;
    validate_input_email(email)?;
    let account = ctx.store.complete_pending_account(alias, name.trim(), email.trim())?;
    ctx.store.save()?;
    println!("{} {}", "account added:".green(), account);
    Ok(())
}

pub fn discard_pending(ctx: &mut Context, alias: &str) -> Result<(), AppError> {
    let removed = ctx.store.discard_pending_account(alias)?;
    ctx.store.save()?;
    println!("{} {}", "pending account discarded:".green(), removed.alias);
    Ok(())
}

fn project_dir(dir: Option<PathBuf>) -> Result<PathBuf, AppError> {
    match dir {
        Some(dir) => Ok(dir),
        None => Ok(env::current_dir()?),
    }
}

/// Binds a project directory to an account in both the store and a project file
pub fn project_bind(ctx: &mut Context, alias: &str, dir: Option<PathBuf>) -> Result<(), AppError> {
    let dir = project_dir(dir)?;
    ctx.store.set_project_config(&dir, alias)?;
    ctx.store.save()?;
    let file = project::write_project_file(&dir, alias)?;
    println!("{} {} -> {}", "project bound:".green(), dir.display(), alias);
    debug!(file = %file.display(), "wrote project file");
    Ok(())
}

pub fn project_unbind(ctx: &mut Context, dir: Option<PathBuf>) -> Result<(), AppError> {
    let dir = project_dir(dir)?;
    let had_config = ctx.store.remove_project_config(&dir).is_some();
    if had_config {
        ctx.store.save()?;
    }
    let had_file = project::remove_project_file(&dir)?;
    if had_config || had_file {
        println!("{} {}", "project unbound:".green(), dir.display());
    } else {
        println!("{} {}", "no binding for".yellow(), dir.display());
    }
    Ok(())
}

pub fn project_show(ctx: &Context, dir: Option<PathBuf>) -> Result<(), AppError> {
    let dir = project_dir(dir)?;
    match project_alias(&ctx.store, &dir) {
        Some(alias) => println!("{} {}", "project account:".blue(), alias),
        None => println!("{} {}", "no binding for".yellow(), dir.display()),
    }
    Ok(())
}
