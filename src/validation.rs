use colored::Colorize;
use inquire::Text;
use once_cell::sync::Lazy;
use regex::Regex;
use validator::ValidateEmail;

use crate::{account::Platform, error::AppError};

/// Maximum length for Git user.name
const MAX_NAME_LENGTH: usize = 100;
/// Maximum length for Git email address
const MAX_EMAIL_LENGTH: usize = 100;
/// Maximum length for account alias
const MAX_ALIAS_LENGTH: usize = 30;
/// Menu entry reserved for navigation
pub const BACK_OPTION: &str = "back";

/// Longest GitHub login
const MAX_GITHUB_USERNAME_LENGTH: usize = 39;

/// GitHub: alphanumeric or single hyphens, no hyphen at either end
static GITHUB_USERNAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9](?:-?[A-Za-z0-9])*$").expect("valid regex"));
/// GitLab: starts alphanumeric or underscore, then alphanumerics, `_`, `.`, `-`
static GITLAB_USERNAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,254}$").expect("valid regex"));
static BITBUCKET_USERNAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,30}$").expect("valid regex"));

/// Prompts user for input until valid input is provided
pub fn prompt_until_valid<F>(prompt_message: &str, input_validation: F) -> Result<String, AppError>
where
    F: Fn(&str) -> Result<(), AppError>,
{
    loop {
        let input: String = Text::new(prompt_message).prompt()?;
        match input_validation(&input) {
            Ok(_) => break Ok(input),
            Err(AppError::Validation(msg)) => println!("{}", msg.red()),
            Err(e) => return Err(e),
        }
    }
}

/// Validates a Git user.name
pub fn validate_input_name(name: &str) -> Result<(), AppError> {
    if name.trim().is_empty() {
        Err(AppError::validation("Name cannot be empty"))
    } else if name.len() > MAX_NAME_LENGTH {
        Err(AppError::validation(format!("name too long, max {} characters", MAX_NAME_LENGTH)))
    } else {
        Ok(())
    }
}

/// Validates email input
pub fn validate_input_email(email: &str) -> Result<(), AppError> {
    if email.is_empty() {
        Err(AppError::validation("Email cannot be empty"))
    } else if email.len() > MAX_EMAIL_LENGTH {
        Err(AppError::validation(format!("email too long, max {} characters", MAX_EMAIL_LENGTH)))
    } else if !email.validate_email() {
        Err(AppError::validation(format!("Invalid email format: '{}'", email)))
    } else {
        Ok(())
    }
}

/// Validates an alias input against the aliases already taken
pub fn validate_input_alias<'a, I>(alias: &str, taken: I) -> Result<(), AppError>
where
    I: IntoIterator<Item = &'a str>,
{
    if alias.is_empty() {
        Err(AppError::validation("Alias cannot be empty"))
    } else if alias.len() > MAX_ALIAS_LENGTH {
        Err(AppError::validation(format!("Alias too long (max {} characters)", MAX_ALIAS_LENGTH)))
    } else if alias == BACK_OPTION {
        Err(AppError::validation("Alias cannot be 'back'"))
    } else if alias.chars().any(char::is_whitespace) {
        Err(AppError::validation("Alias cannot contain whitespace"))
    } else if taken.into_iter().any(|existing| existing == alias) {
        Err(AppError::DuplicateAlias(alias.to_string()))
    } else {
        Ok(())
    }
}

/// Whether `username` is syntactically valid on `platform`
pub fn is_valid_platform_username(platform: Platform, username: &str) -> bool {
    match platform {
        Platform::Github | Platform::GithubEnterprise => {
            username.len() <= MAX_GITHUB_USERNAME_LENGTH && GITHUB_USERNAME.is_match(username)
        }
        Platform::Gitlab | Platform::GitlabSelfHosted => {
            GITLAB_USERNAME.is_match(username)
                && !username.ends_with(".git")
                && !username.ends_with(".atom")
                && !username.ends_with('.')
        }
        Platform::Bitbucket => BITBUCKET_USERNAME.is_match(username),
    }
}

/// Whether `username` is valid on at least one platform
pub fn is_plausible_username(username: &str) -> bool {
    Platform::ALL
        .into_iter()
        .any(|p| is_valid_platform_username(p, username))
}
