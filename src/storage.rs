use std::{
    cell::RefCell,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Utc;
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

use crate::{
    account::{Account, Config, PendingAccount, ProjectConfig},
    error::AppError,
};

/// Handle over the persisted configuration
///
/// State is loaded once, mutated in memory and written back with [`ConfigStore::save`].
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    config: Config,
    loaded: bool,
    /// Read-through cache of the resolved current account
    current_cache: RefCell<Option<Account>>,
}

impl ConfigStore {
    /// Creates an empty, unloaded store for `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: Config::default(),
            loaded: false,
            current_cache: RefCell::new(None),
        }
    }

    /// Creates a store and loads it
    ///
    /// # Arguments
    /// * `path` - Config file location; a missing or empty file loads as an empty config
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let mut store = Self::new(path);
        store.load()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Loads state from disk; a missing or blank file yields empty state
    #[instrument(level = "debug", skip(self), fields(path = %self.path.display()))]
    pub fn load(&mut self) -> Result<(), AppError> {
        self.config = read_config(&self.path)?;
        self.loaded = true;
        self.invalidate();
        debug!(
            accounts = self.config.accounts.len(),
            pending = self.config.pending_accounts.len(),
            "loaded config"
        );
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Writes state to a temp file beside the target, then renames it into place
    #[instrument(level = "debug", skip(self), fields(path = %self.path.display()))]
    pub fn save(&self) -> Result<(), AppError> {
        let persist_err = |source: std::io::Error| AppError::Persistence {
            path: self.path.clone(),
            source,
        };

        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(persist_err)?;

        let json = serde_json::to_string_pretty(&self.config)?;
        let mut tmp = NamedTempFile::new_in(&parent).map_err(persist_err)?;
        tmp.write_all(json.as_bytes()).map_err(persist_err)?;
        tmp.as_file().sync_all().map_err(persist_err)?;
        tmp.persist(&self.path).map_err(|e| persist_err(e.error))?;
        debug!("saved config");
        Ok(())
    }

    /// Reads the persisted current alias, bypassing in-memory state
    pub fn reload_current(&self) -> Result<Option<String>, AppError> {
        Ok(read_config(&self.path)?.current_account)
    }

    fn invalidate(&self) {
        self.current_cache.borrow_mut().take();
    }

    /// Adds an account; an existing alias is replaced only when `overwrite` is set
    ///
    /// # Arguments
    /// * `account` - Account to store, checked with [`Account::validate`]
    /// * `overwrite` - Replace an account that already uses the alias
    pub fn add_account(&mut self, account: Account, overwrite: bool) -> Result<(), AppError> {
        account.validate()?;
        if self.config.pending_accounts.contains_key(&account.alias) {
            return Err(AppError::DuplicateAlias(account.alias));
        }
        if self.config.accounts.contains_key(&account.alias) && !overwrite {
            return Err(AppError::DuplicateAlias(account.alias));
        }
        info!(alias = %account.alias, overwrite, "adding account");
        self.config.accounts.insert(account.alias.clone(), account);
        self.invalidate();
        Ok(())
    }

    /// Removes an account, clearing the current pointer if it referenced it
    ///
    /// Project bindings to the alias are dropped along with it.
    ///
    /// # Arguments
    /// * `alias` - Alias of the account to remove
    pub fn remove_account(&mut self, alias: &str) -> Result<Account, AppError> {
        let removed = self
            .config
            .accounts
            .remove(alias)
            .ok_or_else(|| AppError::AccountNotFound(alias.to_string()))?;
        if self.config.current_account.as_deref() == Some(alias) {
            self.config.current_account = None;
        }
        let before = self.config.project_configs.len();
        self.config
            .project_configs
            .retain(|_, project| project.account != alias);
        let unbound = before - self.config.project_configs.len();
        info!(alias, unbound, "removed account");
        self.invalidate();
        Ok(removed)
    }

    pub fn get_account(&self, alias: &str) -> Result<&Account, AppError> {
        self.config
            .accounts
            .get(alias)
            .ok_or_else(|| AppError::AccountNotFound(alias.to_string()))
    }

    /// Accounts ordered by alias
    pub fn list_accounts(&self) -> Vec<&Account> {
        self.config.accounts.values().collect()
    }

    pub fn set_current_account(&mut self, alias: &str) -> Result<(), AppError> {
        if !self.config.accounts.contains_key(alias) {
            return Err(AppError::AccountNotFound(alias.to_string()));
        }
        self.config.current_account = Some(alias.to_string());
        self.invalidate();
        Ok(())
    }

    pub fn current_alias(&self) -> Option<&str> {
        self.config.current_account.as_deref()
    }

    /// Current account, served from the cache after the first lookup
    pub fn current_account(&self) -> Option<Account> {
        if let Some(cached) = self.current_cache.borrow().as_ref() {
            return Some(cached.clone());
        }
        let account = self
            .current_alias()
            .and_then(|alias| self.config.accounts.get(alias))
            .cloned();
        self.current_cache.borrow_mut().clone_from(&account);
        account
    }

    /// Stamps the account's last-used time
    pub fn touch_last_used(&mut self, alias: &str) -> Result<(), AppError> {
        let account = self
            .config
            .accounts
            .get_mut(alias)
            .ok_or_else(|| AppError::AccountNotFound(alias.to_string()))?;
        account.last_used = Some(Utc::now());
        self.invalidate();
        Ok(())
    }

    pub fn add_pending_account(&mut self, pending: PendingAccount) -> Result<(), AppError> {
        if pending.alias.trim().is_empty() {
            return Err(AppError::validation("pending account alias cannot be empty"));
        }
        if self.config.accounts.contains_key(&pending.alias)
            || self.config.pending_accounts.contains_key(&pending.alias)
        {
            return Err(AppError::DuplicateAlias(pending.alias));
        }
        info!(alias = %pending.alias, source = %pending.discovery_source, "adding pending account");
        self.config
            .pending_accounts
            .insert(pending.alias.clone(), pending);
        self.invalidate();
        Ok(())
    }

    pub fn get_pending_account(&self, alias: &str) -> Result<&PendingAccount, AppError> {
        self.config
            .pending_accounts
            .get(alias)
            .ok_or_else(|| AppError::PendingNotFound(alias.to_string()))
    }

    pub fn list_pending_accounts(&self) -> Vec<&PendingAccount> {
        self.config.pending_accounts.values().collect()
    }

    /// Turns a pending entry into an account using the supplied name and email
    ///
    /// # Arguments
    /// * `alias` - Alias of the pending entry
    /// * `display_name` - Git user.name for the new account
    /// * `email` - Git user.email for the new account
    pub fn complete_pending_account(
        &mut self,
        alias: &str,
        display_name: &str,
        email: &str,
    ) -> Result<Account, AppError> {
        let pending = self.get_pending_account(alias)?;
        let account = pending.complete(display_name, email);
        account.validate()?;
        if self.config.accounts.contains_key(alias) {
            return Err(AppError::DuplicateAlias(alias.to_string()));
        }

        self.config.pending_accounts.remove(alias);
        self.config
            .accounts
            .insert(account.alias.clone(), account.clone());
        info!(alias, "completed pending account");
        self.invalidate();
        Ok(account)
    }

    pub fn discard_pending_account(&mut self, alias: &str) -> Result<PendingAccount, AppError> {
        let removed = self
            .config
            .pending_accounts
            .remove(alias)
            .ok_or_else(|| AppError::PendingNotFound(alias.to_string()))?;
        self.invalidate();
        Ok(removed)
    }

    /// Binds a project directory to an account
    ///
    /// # Arguments
    /// * `dir` - Project root directory
    /// * `alias` - Alias of an existing account
    pub fn set_project_config(&mut self, dir: &Path, alias: &str) -> Result<(), AppError> {
        self.get_account(alias)?;
        self.config.project_configs.insert(
            dir.to_string_lossy().into_owned(),
            ProjectConfig {
                account: alias.to_string(),
                created_at: Utc::now(),
            },
        );
        self.invalidate();
        Ok(())
    }

    pub fn remove_project_config(&mut self, dir: &Path) -> Option<ProjectConfig> {
        let removed = self
            .config
            .project_configs
            .remove(dir.to_string_lossy().as_ref());
        self.invalidate();
        removed
    }

    pub fn project_config_for(&self, dir: &Path) -> Option<&ProjectConfig> {
        self.config
            .project_configs
            .get(dir.to_string_lossy().as_ref())
    }
}

fn read_config(path: &Path) -> Result<Config, AppError> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let file_contents = fs::read_to_string(path)?;
    if file_contents.trim().is_empty() {
        return Ok(Config::default());
    }

    Ok(serde_json::from_str(&file_contents)?)
}
