use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    path::PathBuf,
    str::FromStr,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Hosting platform an account belongs to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    #[default]
    Github,
    Gitlab,
    Bitbucket,
    GithubEnterprise,
    GitlabSelfHosted,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Github,
        Platform::Gitlab,
        Platform::Bitbucket,
        Platform::GithubEnterprise,
        Platform::GitlabSelfHosted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Github => "github",
            Platform::Gitlab => "gitlab",
            Platform::Bitbucket => "bitbucket",
            Platform::GithubEnterprise => "github-enterprise",
            Platform::GitlabSelfHosted => "gitlab-self-hosted",
        }
    }

    /// Public SSH endpoint; self-hosted platforms need the account's domain
    pub fn default_host(&self) -> Option<&'static str> {
        match self {
            Platform::Github => Some("github.com"),
            Platform::Gitlab => Some("gitlab.com"),
            Platform::Bitbucket => Some("bitbucket.org"),
            Platform::GithubEnterprise | Platform::GitlabSelfHosted => None,
        }
    }

    /// Platform whose name appears literally in `text` (a domain or tag)
    pub fn named_in(text: &str) -> Option<Platform> {
        let lower = text.to_ascii_lowercase();
        if lower.contains("github") {
            Some(Platform::Github)
        } else if lower.contains("gitlab") {
            Some(Platform::Gitlab)
        } else if lower.contains("bitbucket") {
            Some(Platform::Bitbucket)
        } else {
            None
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| {
                AppError::validation(format!(
                    "unknown platform '{}', expected one of: github, gitlab, bitbucket, github-enterprise, gitlab-self-hosted",
                    s
                ))
            })
    }
}

/// A configured identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "AccountRecord")]
pub struct Account {
    /// Unique alias
    pub alias: String,
    /// Git user.name
    pub display_name: String,
    /// Git user.email
    pub email: String,
    pub platform: Platform,
    /// Username on the hosting platform
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh_key_path: Option<PathBuf>,
    /// Host for self-hosted platforms, e.g. `git.corp.example`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpg_key_id: Option<String>,
    pub gpg_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

impl Account {
    pub fn new(alias: impl Into<String>, display_name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            display_name: display_name.into(),
            email: email.into(),
            platform: Platform::default(),
            username: String::new(),
            ssh_key_path: None,
            domain: None,
            api_endpoint: None,
            gpg_key_id: None,
            gpg_enabled: false,
            last_used: None,
        }
    }

    /// Checks the alias and signing-key invariants
    pub fn validate(&self) -> Result<(), AppError> {
        if self.alias.trim().is_empty() {
            return Err(AppError::validation("account alias cannot be empty"));
        }
        if self.gpg_enabled && self.gpg_key_id.as_deref().is_none_or(|id| id.trim().is_empty()) {
            return Err(AppError::validation(format!(
                "account '{}' enables signing without a GPG key id; pass --gpg-key <id>",
                self.alias
            )));
        }
        Ok(())
    }

    /// SSH endpoint host used for connectivity probes
    pub fn ssh_host(&self) -> Option<String> {
        self.domain
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .or_else(|| self.platform.default_host().map(str::to_string))
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} <{}> [{}", self.alias, self.display_name, self.email, self.platform)?;
        if !self.username.is_empty() {
            write!(f, " {}", self.username)?;
        }
        write!(f, "]")?;
        if let Some(key) = &self.ssh_key_path {
            write!(f, " key={}", key.display())?;
        }
        Ok(())
    }
}

/// On-disk account shape; accepts the legacy `githubUsername` field
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountRecord {
    alias: String,
    #[serde(default, alias = "name")]
    display_name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    platform: Option<Platform>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    github_username: Option<String>,
    #[serde(default)]
    ssh_key_path: Option<PathBuf>,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    api_endpoint: Option<String>,
    #[serde(default)]
    gpg_key_id: Option<String>,
    #[serde(default)]
    gpg_enabled: bool,
    #[serde(default)]
    last_used: Option<DateTime<Utc>>,
}

impl From<AccountRecord> for Account {
    fn from(record: AccountRecord) -> Self {
        let (platform, username) = match record.username.filter(|u| !u.is_empty()) {
            Some(username) => (record.platform.unwrap_or_default(), username),
            None => match record.github_username.filter(|u| !u.is_empty()) {
                Some(legacy) => (record.platform.unwrap_or(Platform::Github), legacy),
                None => (record.platform.unwrap_or_default(), String::new()),
            },
        };

        Account {
            alias: record.alias,
            display_name: record.display_name,
            email: record.email,
            platform,
            username,
            ssh_key_path: record.ssh_key_path,
            domain: record.domain,
            api_endpoint: record.api_endpoint,
            gpg_key_id: record.gpg_key_id,
            gpg_enabled: record.gpg_enabled,
            last_used: record.last_used,
        }
    }
}

/// Required field a pending account still lacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingField {
    Name,
    Email,
}

impl fmt::Display for MissingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingField::Name => f.write_str("name"),
            MissingField::Email => f.write_str("email"),
        }
    }
}

/// Keys used in [`PendingAccount::partial_data`]
pub mod partial {
    pub const NAME: &str = "name";
    pub const EMAIL: &str = "email";
    pub const SSH_KEY_PATH: &str = "sshKeyPath";
    pub const PLATFORM: &str = "platform";
    pub const GPG_KEY_ID: &str = "gpgKeyId";
}

/// Discovered identity awaiting manual completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAccount {
    pub alias: String,
    #[serde(default)]
    pub username: String,
    pub discovery_source: String,
    pub confidence: u8,
    #[serde(default)]
    pub missing_fields: BTreeSet<MissingField>,
    #[serde(default)]
    pub partial_data: BTreeMap<String, String>,
}

impl PendingAccount {
    /// Builds the account once name and email are supplied
    pub fn complete(&self, display_name: &str, email: &str) -> Account {
        let mut account = Account::new(&self.alias, display_name, email);
        account.username = self.username.clone();
        account.ssh_key_path = self.partial_data.get(partial::SSH_KEY_PATH).map(PathBuf::from);
        account.platform = self
            .partial_data
            .get(partial::PLATFORM)
            .and_then(|p| p.parse().ok())
            .unwrap_or_default();
        account.gpg_key_id = self.partial_data.get(partial::GPG_KEY_ID).cloned();
        account
    }
}

/// Directory bound to an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    pub account: String,
    pub created_at: DateTime<Utc>,
}

/// Root persisted state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ConfigDocument", into = "ConfigDocument")]
pub struct Config {
    pub current_account: Option<String>,
    pub accounts: BTreeMap<String, Account>,
    pub pending_accounts: BTreeMap<String, PendingAccount>,
    /// Keyed by project directory path
    pub project_configs: BTreeMap<String, ProjectConfig>,
}

/// Config file layout
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigDocument {
    #[serde(default)]
    accounts: Vec<Account>,
    #[serde(default)]
    pending_accounts: Vec<PendingAccount>,
    #[serde(default)]
    current_account: String,
    #[serde(default)]
    project_configs: BTreeMap<String, ProjectConfig>,
}

impl From<ConfigDocument> for Config {
    fn from(doc: ConfigDocument) -> Self {
        let current = doc.current_account.trim();
        Config {
            current_account: (!current.is_empty()).then(|| current.to_string()),
            accounts: doc
                .accounts
                .into_iter()
                .map(|a| (a.alias.clone(), a))
                .collect(),
            pending_accounts: doc
                .pending_accounts
                .into_iter()
                .map(|p| (p.alias.clone(), p))
                .collect(),
            project_configs: doc.project_configs,
        }
    }
}

impl From<Config> for ConfigDocument {
    fn from(config: Config) -> Self {
        ConfigDocument {
            accounts: config.accounts.into_values().collect(),
            pending_accounts: config.pending_accounts.into_values().collect(),
            current_account: config.current_account.unwrap_or_default(),
            project_configs: config.project_configs,
        }
    }
}
