use std::path::PathBuf;

use thiserror::Error;

/// Application error types
///
/// Every variant that can end a command names the alias or path involved and
/// tells the user what to do next.
#[derive(Error, Debug)]
pub enum AppError {
    /// Error during file I/O operations
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// Error during JSON serialization or deserialization
    #[error("json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    /// Error when user input fails.
    #[error("inquire error: {0}")]
    Inquire(#[from] inquire::InquireError),
    /// Error during UTF-8 conversion.
    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::string::FromUtf8Error),
    /// Error during input validation.
    #[error("validation error: {0}")]
    Validation(String),
    /// Account alias is not configured
    #[error("account '{0}' not found; run `gitpersona list` to see configured aliases")]
    AccountNotFound(String),
    /// No pending account under this alias
    #[error("pending account '{0}' not found; run `gitpersona pending list` to see pending aliases")]
    PendingNotFound(String),
    /// Alias already taken by an account or a pending account
    #[error("alias '{0}' already exists; pick another alias or remove the existing entry first")]
    DuplicateAlias(String),
    /// Account has a key path configured but the file is missing
    #[error(
        "SSH key for account '{alias}' not found at {}; restore the key or update the account with `gitpersona add {alias} ... --ssh-key <path> --overwrite` (or pass --force)",
        path.display()
    )]
    SshKeyNotFound { alias: String, path: PathBuf },
    /// Connectivity probe against the platform SSH endpoint failed
    #[error(
        "SSH validation for account '{alias}' against {host} failed using {}: {reason}; check that the public key is registered with the platform (or pass --force)",
        key.display()
    )]
    SshValidationFailed {
        alias: String,
        host: String,
        key: PathBuf,
        reason: String,
    },
    /// A credential required for the operation is absent
    #[error("account '{alias}' is missing {what}; {remediation}")]
    MissingCredential {
        alias: String,
        what: String,
        remediation: String,
    },
    /// Required external program missing or not runnable
    #[error("required tool '{tool}' is unavailable: {reason}; install it and make sure it is on PATH")]
    ToolUnavailable { tool: String, reason: String },
    /// Error when executing Git commands
    #[error("git command failed: {0}")]
    GitCommand(String),
    /// External command ran past its deadline
    #[error("command '{command}' timed out after {secs}s")]
    CommandTimeout { command: String, secs: u64 },
    /// Config file could not be written or read back
    #[error(
        "failed to persist configuration at {}: {source}; check permissions on the directory and free disk space",
        path.display()
    )]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Persisted current account differs from the switch target
    #[error(
        "switch to '{expected}' could not be verified: persisted current account is '{actual}'; another process may have written the config, rerun `gitpersona switch {expected}`"
    )]
    SwitchVerificationFailed { expected: String, actual: String },
}

/// Coarse error taxonomy used to decide whether a condition is fatal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    DuplicateAlias,
    ValidationFailed,
    MissingCredential,
    ExternalToolUnavailable,
    PersistenceFailed,
    SwitchVerificationFailed,
    Other,
}

impl AppError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a tool-unavailable error
    pub fn tool_unavailable(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ToolUnavailable {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    /// Taxonomy bucket of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AccountNotFound(_) | Self::PendingNotFound(_) => ErrorKind::NotFound,
            Self::DuplicateAlias(_) => ErrorKind::DuplicateAlias,
            Self::SshValidationFailed { .. } | Self::Validation(_) => ErrorKind::ValidationFailed,
            Self::SshKeyNotFound { .. } | Self::MissingCredential { .. } => {
                ErrorKind::MissingCredential
            }
            Self::ToolUnavailable { .. } | Self::CommandTimeout { .. } => {
                ErrorKind::ExternalToolUnavailable
            }
            Self::Persistence { .. } => ErrorKind::PersistenceFailed,
            Self::SwitchVerificationFailed { .. } => ErrorKind::SwitchVerificationFailed,
            _ => ErrorKind::Other,
        }
    }

    /// Whether `--force` may downgrade this error to a warning
    pub fn is_overridable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ValidationFailed | ErrorKind::MissingCredential
        )
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
