use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::{
    alias_from_email, sanitize_alias, Candidate, CONFIDENCE_GIT_CONFIG, CONFIDENCE_GIT_CONFIG_PARTIAL,
    CONFIDENCE_GIT_GLOBAL, CONFIDENCE_PLATFORM_CLI, CONFIDENCE_SSH_KEY, CONFIDENCE_SSH_KEY_VALID_USER,
    SOURCE_GIT_CONFIG, SOURCE_GIT_GLOBAL, SOURCE_GPG, SOURCE_SSH_KEY,
};
use crate::{
    account::Platform,
    error::AppError,
    platform::PlatformClient,
    process::CommandRunner,
    validation::{is_plausible_username, is_valid_platform_username},
};

/// `id_<algo>_[<platform>_]<user>`
static ID_KEY_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^id_(?:rsa|ed25519|ecdsa|dsa)[_-](?:(github|gitlab|bitbucket)[_-])?([A-Za-z0-9][A-Za-z0-9_.-]*)$")
        .expect("valid regex")
});
/// `<platform>_<user>` or `<platform>-<user>`
static PLATFORM_KEY_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(github|gitlab|bitbucket)[_-]([A-Za-z0-9][A-Za-z0-9_.-]*)$").expect("valid regex")
});
/// `-i <path>` inside a `core.sshCommand` value
static SSH_COMMAND_IDENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"-i\s+(?:'([^']+)'|"([^"]+)"|(\S+))"#).expect("valid regex"));

/// Files in the SSH directory that are never keys
const NON_KEY_FILES: [&str; 6] = [
    "config",
    "known_hosts",
    "known_hosts.old",
    "authorized_keys",
    "authorized_keys2",
    "environment",
];

/// gpg public-key algorithm ids: RSA (1-3), DSA (17), EdDSA (22)
const SIGNING_ALGORITHMS: [&str; 5] = ["1", "2", "3", "17", "22"];

pub(super) fn scan_global_git(runner: &dyn CommandRunner) -> Result<Vec<Candidate>, AppError> {
    let read = |key: &str| -> Result<String, AppError> {
        let output = runner.run("git", &["config", "--global", "--get", key], None)?;
        Ok(if output.success() {
            output.stdout_trimmed().to_string()
        } else {
            String::new()
        })
    };
    let name = read("user.name")?;
    let email = read("user.email")?;
    if name.is_empty() && email.is_empty() {
        return Ok(Vec::new());
    }

    let alias = match alias_from_email(&email) {
        a if a.is_empty() => sanitize_alias(&name),
        a => a,
    };
    let mut candidate = Candidate::new(alias, SOURCE_GIT_GLOBAL, CONFIDENCE_GIT_GLOBAL);
    candidate.display_name = name;
    candidate.email = email;
    Ok(vec![candidate])
}

/// Flattens git config text into `section.key` → value (last one wins)
///
/// Subsections are dropped (`[includeIf "gitdir:~/w/"]` becomes `includeif`),
/// which is enough for the keys discovery reads.
pub fn parse_git_config(text: &str) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();
    let mut section = String::new();
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(header) = line.strip_prefix('[').and_then(|l| l.split(']').next()) {
            section = header
                .split(|c: char| c.is_whitespace() || c == '"')
                .next()
                .unwrap_or_default()
                .to_ascii_lowercase();
            continue;
        }
        let (key, value) = match line.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => (line, "true"),
        };
        let value = value
            .split(" #")
            .next()
            .unwrap_or_default()
            .trim()
            .trim_matches('"');
        values.insert(format!("{}.{}", section, key.to_ascii_lowercase()), value.to_string());
    }
    values
}

/// `path` values of every `includeIf` section
fn include_paths(text: &str) -> Vec<String> {
    let mut paths = Vec::new();
    let mut in_include = false;
    for raw in text.lines() {
        let line = raw.trim();
        if line.starts_with('[') {
            in_include = line.to_ascii_lowercase().starts_with("[includeif");
            continue;
        }
        if in_include {
            if let Some((key, value)) = line.split_once('=') {
                if key.trim().eq_ignore_ascii_case("path") {
                    paths.push(value.trim().trim_matches('"').to_string());
                }
            }
        }
    }
    paths
}

fn expand_home(path: &str, home: &Path) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home.join(rest),
        None if Path::new(path).is_absolute() => PathBuf::from(path),
        None => home.join(path),
    }
}

fn alias_from_config_file(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name
        .strip_prefix(".gitconfig-")
        .or_else(|| name.strip_prefix(".gitconfig_"))
        .or_else(|| name.strip_prefix(".gitconfig."))
        .unwrap_or(&name);
    let stem = stem
        .trim_start_matches('.')
        .trim_end_matches(".gitconfig")
        .trim_end_matches(".inc")
        .trim_end_matches(".config");
    sanitize_alias(stem)
}

fn config_files(home: &Path) -> Result<BTreeSet<PathBuf>, AppError> {
    let mut files = BTreeSet::new();

    for entry in fs::read_dir(home)? {
        let Ok(entry) = entry else { continue };
        let name = entry.file_name().to_string_lossy().into_owned();
        if (name.starts_with(".gitconfig-") || name.starts_with(".gitconfig_")) && !name.ends_with(".lock") {
            files.insert(entry.path());
        }
    }

    if let Ok(entries) = fs::read_dir(home.join(".gitconfig.d")) {
        files.extend(entries.flatten().map(|e| e.path()).filter(|p| p.is_file()));
    }

    if let Ok(global) = fs::read_to_string(home.join(".gitconfig")) {
        files.extend(include_paths(&global).iter().map(|p| expand_home(p, home)));
    }

    Ok(files)
}

pub(super) fn scan_git_config_files(home: &Path) -> Result<Vec<Candidate>, AppError> {
    let mut candidates = Vec::new();
    for path in config_files(home)? {
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "skipping unreadable git config");
                continue;
            }
        };
        let values = parse_git_config(&text);
        let name = values.get("user.name").cloned().unwrap_or_default();
        let email = values.get("user.email").cloned().unwrap_or_default();
        if name.is_empty() && email.is_empty() {
            continue;
        }

        let confidence = if !name.is_empty() && !email.is_empty() {
            CONFIDENCE_GIT_CONFIG
        } else {
            CONFIDENCE_GIT_CONFIG_PARTIAL
        };
        let alias = match alias_from_config_file(&path) {
            a if a.is_empty() => alias_from_email(&email),
            a => a,
        };

        let mut candidate = Candidate::new(alias, SOURCE_GIT_CONFIG, confidence);
        candidate.display_name = name;
        candidate.email = email;
        candidate.ssh_key_path = values
            .get("core.sshcommand")
            .and_then(|cmd| identity_from_ssh_command(cmd, home));
        candidates.push(candidate);
    }
    Ok(candidates)
}

fn identity_from_ssh_command(command: &str, home: &Path) -> Option<PathBuf> {
    let caps = SSH_COMMAND_IDENTITY.captures(command)?;
    let raw = caps.get(1).or(caps.get(2)).or(caps.get(3))?.as_str();
    Some(expand_home(raw, home))
}

fn platform_from_token(token: &str) -> Option<Platform> {
    match token {
        "github" => Some(Platform::Github),
        "gitlab" => Some(Platform::Gitlab),
        "bitbucket" => Some(Platform::Bitbucket),
        _ => None,
    }
}

/// `(platform hint, user token)` for recognised key file names
///
/// `id_ed25519_github` names a platform and no user, so the token is `None`.
fn parse_key_name(name: &str) -> Option<(Option<Platform>, Option<String>)> {
    let caps = ID_KEY_NAME
        .captures(name)
        .or_else(|| PLATFORM_KEY_NAME.captures(name))?;
    let token = caps.get(2)?.as_str();
    match caps.get(1) {
        Some(m) => Some((platform_from_token(m.as_str()), Some(token.to_string()))),
        None => match platform_from_token(token) {
            Some(platform) => Some((Some(platform), None)),
            None => Some((None, Some(token.to_string()))),
        },
    }
}

fn is_private_key(path: &Path) -> bool {
    fs::read_to_string(path)
        .map(|text| {
            let head = text.lines().next().unwrap_or_default();
            head.starts_with("-----BEGIN") && head.contains("PRIVATE KEY")
        })
        .unwrap_or(false)
}

pub(super) fn scan_ssh_keys(ssh_dir: &Path) -> Result<Vec<Candidate>, AppError> {
    let mut candidates = Vec::new();
    for entry in fs::read_dir(ssh_dir)? {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".pub") || NON_KEY_FILES.contains(&name.as_str()) || !path.is_file() {
            continue;
        }
        let Some((hint, token)) = parse_key_name(&name) else {
            continue;
        };
        if !is_private_key(&path) {
            debug!(path = %path.display(), "skipping non-key file");
            continue;
        }

        let Some(token) = token else {
            // Platform-only key name: the platform is known, the user is not.
            let Some(platform) = hint else { continue };
            let mut candidate =
                Candidate::new(sanitize_alias(&platform.to_string()), SOURCE_SSH_KEY, CONFIDENCE_SSH_KEY);
            candidate.ssh_key_path = Some(path);
            candidate.platform_hints.insert(platform);
            candidates.push(candidate);
            continue;
        };

        let valid_user = match hint {
            Some(platform) => is_valid_platform_username(platform, &token),
            None => is_plausible_username(&token),
        };
        let confidence = if valid_user {
            CONFIDENCE_SSH_KEY_VALID_USER
        } else {
            CONFIDENCE_SSH_KEY
        };

        let mut candidate = Candidate::new(sanitize_alias(&token), SOURCE_SSH_KEY, confidence);
        if valid_user {
            candidate.username = token;
        }
        candidate.ssh_key_path = Some(path);
        candidate.platform_hints.extend(hint);
        candidates.push(candidate);
    }
    Ok(candidates)
}

fn platform_source_tag(platform: Platform) -> String {
    match platform {
        Platform::Github | Platform::GithubEnterprise => "gh-cli".to_string(),
        Platform::Gitlab | Platform::GitlabSelfHosted => "glab-cli".to_string(),
        Platform::Bitbucket => "bitbucket-cli".to_string(),
    }
}

pub(super) fn scan_platform_sessions(clients: &[&dyn PlatformClient]) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for client in clients {
        let platform = client.platform();
        let session = match client.active_session() {
            Ok(Some(session)) => session,
            Ok(None) => continue,
            Err(err) => {
                debug!(%platform, error = %err, "platform cli unavailable");
                continue;
            }
        };

        let tag = platform_source_tag(platform);
        let mut candidate = Candidate::new(sanitize_alias(&session.username), &tag, CONFIDENCE_PLATFORM_CLI);
        candidate.username = session.username.clone();
        candidate.platform_hints.insert(platform);

        match client.fetch_user_info(&session.username) {
            Ok(user) => {
                candidate.display_name = user.name.unwrap_or_default();
                candidate.email = user.email.unwrap_or_default();
            }
            Err(err) => debug!(%platform, error = %err, "could not fetch platform profile"),
        }
        candidates.push(candidate);
    }
    candidates
}

/// Secret key usable for signing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningKey {
    pub key_id: String,
    pub emails: Vec<String>,
}

/// Parses `gpg --list-secret-keys --with-colons`
pub fn parse_signing_keys(listing: &str) -> Vec<SigningKey> {
    let mut keys: Vec<SigningKey> = Vec::new();
    let mut current_signs = false;
    for line in listing.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        match fields.first().copied() {
            Some("sec") => {
                let algorithm = fields.get(3).copied().unwrap_or_default();
                let capabilities = fields.get(11).copied().unwrap_or_default();
                current_signs = SIGNING_ALGORITHMS.contains(&algorithm)
                    && capabilities.chars().any(|c| c == 's' || c == 'S');
                if current_signs {
                    keys.push(SigningKey {
                        key_id: fields.get(4).copied().unwrap_or_default().to_string(),
                        emails: Vec::new(),
                    });
                }
            }
            Some("uid") if current_signs => {
                let user_id = fields.get(9).copied().unwrap_or_default();
                let email = user_id
                    .rsplit_once('<')
                    .and_then(|(_, rest)| rest.split_once('>'))
                    .map(|(email, _)| email.trim().to_ascii_lowercase());
                if let (Some(email), Some(key)) = (email, keys.last_mut()) {
                    key.emails.push(email);
                }
            }
            _ => {}
        }
    }
    keys.retain(|k| !k.key_id.is_empty());
    keys
}

pub(super) fn scan_signing_keys(runner: &dyn CommandRunner) -> Result<Vec<SigningKey>, AppError> {
    let output = runner.run("gpg", &["--list-secret-keys", "--with-colons"], None)?;
    if !output.success() {
        return Err(AppError::tool_unavailable("gpg", output.stderr.trim()));
    }
    Ok(parse_signing_keys(&output.stdout))
}

/// Attaches signing keys to candidates with a matching email; never adds candidates
pub(super) fn attach_signing_keys(candidates: &mut [Candidate], keys: &[SigningKey]) {
    for candidate in candidates.iter_mut().filter(|c| c.has_email()) {
        let email = candidate.email.trim().to_ascii_lowercase();
        if let Some(key) = keys.iter().find(|k| k.emails.contains(&email)) {
            if candidate.gpg_key_id.is_none() {
                candidate.gpg_key_id = Some(key.key_id.clone());
            }
            candidate.sources.insert(SOURCE_GPG.to_string());
        }
    }
}
