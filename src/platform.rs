//! Hosting-platform CLI sessions and credential propagation

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

use crate::{account::Platform, error::AppError, process::CommandRunner};

static LOGGED_IN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Logged in to (\S+) (?:account|as) ([A-Za-z0-9_.-]+)").expect("valid regex")
});
static TOKEN_SCOPES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Token scopes:\s*(.*)").expect("valid regex"));
static ACTIVE_ACCOUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Active account:\s*(true|false)").expect("valid regex"));

/// Logged-in platform CLI account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformSession {
    pub host: String,
    pub username: String,
    pub scopes: Vec<String>,
    pub active: bool,
}

impl PlatformSession {
    /// Whether the token may read the user's private email addresses
    pub fn can_read_email(&self) -> bool {
        self.scopes.iter().any(|s| s == "user" || s == "user:email")
    }
}

/// Profile data reported by the platform
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformUser {
    pub username: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Access to a hosting platform through its CLI
pub trait PlatformClient {
    fn platform(&self) -> Platform;
    /// The session the CLI currently acts as, if any
    fn active_session(&self) -> Result<Option<PlatformSession>, AppError>;
    /// Profile for `username`, including private email when the token allows
    fn fetch_user_info(&self, username: &str) -> Result<PlatformUser, AppError>;
    fn fetch_token(&self, username: &str) -> Result<String, AppError>;
    /// Makes `username` the CLI's active account
    fn switch_user(&self, username: &str) -> Result<(), AppError>;
}

/// Parses `gh auth status` / `glab auth status` output
pub fn parse_auth_status(text: &str) -> Vec<PlatformSession> {
    let mut sessions: Vec<PlatformSession> = Vec::new();
    for line in text.lines() {
        if let Some(caps) = LOGGED_IN.captures(line) {
            sessions.push(PlatformSession {
                host: caps[1].to_string(),
                username: caps[2].to_string(),
                scopes: Vec::new(),
                active: false,
            });
        } else if let Some(current) = sessions.last_mut() {
            if let Some(caps) = TOKEN_SCOPES.captures(line) {
                current.scopes = caps[1]
                    .split(',')
                    .map(|s| s.trim().trim_matches(|c| c == '\'' || c == '"').to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            } else if let Some(caps) = ACTIVE_ACCOUNT.captures(line) {
                current.active = &caps[1] == "true";
            }
        }
    }
    // Older CLIs list a single account and print no active marker.
    if sessions.len() == 1 {
        sessions[0].active = true;
    }
    sessions
}

#[derive(Deserialize)]
struct GhUser {
    login: String,
    name: Option<String>,
    email: Option<String>,
}

#[derive(Deserialize)]
struct GhEmail {
    email: String,
    primary: bool,
    verified: bool,
}

#[derive(Deserialize)]
struct GlabUser {
    username: String,
    name: Option<String>,
    email: Option<String>,
    public_email: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// GitHub through the `gh` CLI
pub struct GhCli<'a> {
    runner: &'a dyn CommandRunner,
    host: String,
    platform: Platform,
}

impl<'a> GhCli<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self {
            runner,
            host: "github.com".to_string(),
            platform: Platform::Github,
        }
    }

    /// GitHub Enterprise Server at `host`
    pub fn enterprise(runner: &'a dyn CommandRunner, host: impl Into<String>) -> Self {
        Self {
            runner,
            host: host.into(),
            platform: Platform::GithubEnterprise,
        }
    }

    fn api<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, AppError> {
        let output = self
            .runner
            .run("gh", &["api", "--hostname", self.host.as_str(), path], None)?;
        if !output.success() {
            return Err(AppError::tool_unavailable("gh", output.stderr.trim()));
        }
        Ok(serde_json::from_str(&output.stdout)?)
    }
}

impl PlatformClient for GhCli<'_> {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn active_session(&self) -> Result<Option<PlatformSession>, AppError> {
        let output = self
            .runner
            .run("gh", &["auth", "status", "--hostname", self.host.as_str()], None)?;
        let sessions = parse_auth_status(&output.combined());
        Ok(sessions.into_iter().find(|s| s.active))
    }

    #[instrument(level = "debug", skip(self))]
    fn fetch_user_info(&self, username: &str) -> Result<PlatformUser, AppError> {
        let session = self.active_session()?;
        let is_self = session
            .as_ref()
            .is_some_and(|s| s.username.eq_ignore_ascii_case(username));

        let user: GhUser = if is_self {
            self.api("user")?
        } else {
            self.api(&format!("users/{}", username))?
        };

        let mut email = non_empty(user.email);
        if email.is_none() && is_self && session.as_ref().is_some_and(PlatformSession::can_read_email) {
            let emails: Vec<GhEmail> = self.api("user/emails").unwrap_or_default();
            email = emails
                .into_iter()
                .find(|e| e.primary && e.verified)
                .map(|e| e.email);
        }

        Ok(PlatformUser {
            username: user.login,
            name: non_empty(user.name),
            email,
        })
    }

    fn fetch_token(&self, username: &str) -> Result<String, AppError> {
        let output = self.runner.run(
            "gh",
            &["auth", "token", "--hostname", self.host.as_str(), "--user", username],
            None,
        )?;
        let token = output.stdout_trimmed();
        if !output.success() || token.is_empty() {
            return Err(AppError::MissingCredential {
                alias: username.to_string(),
                what: format!("a gh token for {}", self.host),
                remediation: format!("run `gh auth login --hostname {}`", self.host),
            });
        }
        Ok(token.to_string())
    }

    fn switch_user(&self, username: &str) -> Result<(), AppError> {
        let output = self.runner.run(
            "gh",
            &["auth", "switch", "--hostname", self.host.as_str(), "--user", username],
            None,
        )?;
        if !output.success() {
            return Err(AppError::MissingCredential {
                alias: username.to_string(),
                what: format!("a gh login on {}", self.host),
                remediation: format!("run `gh auth login --hostname {}`", self.host),
            });
        }
        Ok(())
    }
}

/// GitLab through the `glab` CLI
pub struct GlabCli<'a> {
    runner: &'a dyn CommandRunner,
    host: String,
}

impl<'a> GlabCli<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self {
            runner,
            host: "gitlab.com".to_string(),
        }
    }
}

impl PlatformClient for GlabCli<'_> {
    fn platform(&self) -> Platform {
        Platform::Gitlab
    }

    fn active_session(&self) -> Result<Option<PlatformSession>, AppError> {
        let output = self
            .runner
            .run("glab", &["auth", "status", "--hostname", self.host.as_str()], None)?;
        Ok(parse_auth_status(&output.combined())
            .into_iter()
            .find(|s| s.active))
    }

    fn fetch_user_info(&self, username: &str) -> Result<PlatformUser, AppError> {
        let output = self.runner.run("glab", &["api", "user"], None)?;
        if !output.success() {
            return Err(AppError::tool_unavailable("glab", output.stderr.trim()));
        }
        let user: GlabUser = serde_json::from_str(&output.stdout)?;
        if !user.username.eq_ignore_ascii_case(username) {
            return Err(AppError::validation(format!(
                "glab is logged in as '{}', not '{}'",
                user.username, username
            )));
        }
        Ok(PlatformUser {
            username: user.username,
            name: non_empty(user.name),
            email: non_empty(user.email).or(non_empty(user.public_email)),
        })
    }

    fn fetch_token(&self, username: &str) -> Result<String, AppError> {
        let output = self
            .runner
            .run("glab", &["config", "get", "token", "--host", self.host.as_str()], None)?;
        let token = output.stdout_trimmed();
        if !output.success() || token.is_empty() {
            return Err(AppError::MissingCredential {
                alias: username.to_string(),
                what: format!("a glab token for {}", self.host),
                remediation: format!("run `glab auth login --hostname {}`", self.host),
            });
        }
        Ok(token.to_string())
    }

    fn switch_user(&self, username: &str) -> Result<(), AppError> {
        match self.active_session()? {
            Some(session) if session.username.eq_ignore_ascii_case(username) => Ok(()),
            _ => Err(AppError::MissingCredential {
                alias: username.to_string(),
                what: format!("a glab login on {}", self.host),
                remediation: format!("run `glab auth login --hostname {}` as {}", self.host, username),
            }),
        }
    }
}

/// Environment variables carrying a platform token
pub fn token_variables(platform: Platform) -> &'static [&'static str] {
    match platform {
        Platform::Github | Platform::GithubEnterprise => &["GH_TOKEN", "GITHUB_TOKEN"],
        Platform::Gitlab | Platform::GitlabSelfHosted => &["GITLAB_TOKEN", "GLAB_TOKEN"],
        Platform::Bitbucket => &["BITBUCKET_TOKEN"],
    }
}

/// Rewrites existing token assignments in `contents`; returns the new text and the count
pub fn replace_token_assignments(contents: &str, variables: &[&str], token: &str) -> (String, usize) {
    let mut replaced = 0;
    let mut lines: Vec<String> = Vec::new();
    for line in contents.lines() {
        let trimmed = line.trim_start();
        let indent = &line[..line.len() - trimmed.len()];
        let (export, rest) = match trimmed.strip_prefix("export ") {
            Some(rest) => ("export ", rest.trim_start()),
            None => ("", trimmed),
        };
        let assignment = rest
            .split_once('=')
            .filter(|(name, _)| variables.contains(&name.trim()));
        match assignment {
            Some((name, value)) => {
                let quote = if value.starts_with('"') { "\"" } else { "" };
                lines.push(format!("{}{}{}={}{}{}", indent, export, name.trim(), quote, token, quote));
                replaced += 1;
            }
            None => lines.push(line.to_string()),
        }
    }
    let mut updated = lines.join("\n");
    if contents.ends_with('\n') {
        updated.push('\n');
    }
    (updated, replaced)
}

/// Refreshes the token in every existing file; per-file errors are returned, not raised
pub fn propagate_token(
    files: &[PathBuf],
    platform: Platform,
    token: &str,
) -> Vec<(PathBuf, Result<usize, AppError>)> {
    files
        .iter()
        .filter(|path| path.is_file())
        .map(|path| (path.clone(), rewrite_env_file(path, platform, token)))
        .collect()
}

fn rewrite_env_file(path: &Path, platform: Platform, token: &str) -> Result<usize, AppError> {
    let contents = fs::read_to_string(path)?;
    let (updated, replaced) = replace_token_assignments(&contents, token_variables(platform), token);
    if replaced == 0 {
        return Ok(0);
    }
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(updated.as_bytes())?;
    tmp.persist(path).map_err(|e| AppError::Io(e.error))?;
    debug!(path = %path.display(), replaced, "refreshed token assignments");
    Ok(replaced)
}
