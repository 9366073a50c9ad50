use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::account::Platform;

/// CLI arguments parser using `clap`
#[derive(Parser, Debug)]
#[command(name = "gitpersona", version, about)]
pub struct Cli {
    /// Subcommand chosen to execute; none opens the interactive menu
    #[command(subcommand)]
    pub command: Option<Commands>,
}

// Subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Switches git, SSH and platform identity to an account
    Switch {
        /// Alias to switch to; defaults to the current project's binding
        alias: Option<String>,
        /// Continue past SSH validation failures and missing keys
        #[arg(long)]
        force: bool,
        /// Skip the SSH connectivity probe
        #[arg(long, conflicts_with = "validate_only")]
        skip_validation: bool,
        /// Only run validation, change nothing
        #[arg(long)]
        validate_only: bool,
    },
    /// Adds an account
    Add {
        /// Unique alias for the account
        alias: String,
        /// Git user.name
        name: String,
        /// Git user.email
        email: String,
        #[arg(long, default_value_t = Platform::Github, value_parser = parse_platform)]
        platform: Platform,
        /// Username on the hosting platform
        #[arg(long)]
        username: Option<String>,
        /// Private key used for this account
        #[arg(long)]
        ssh_key: Option<PathBuf>,
        /// Host for enterprise and self-hosted platforms
        #[arg(long)]
        domain: Option<String>,
        /// Signing key id; enables commit signing
        #[arg(long)]
        gpg_key: Option<String>,
        /// Replace an existing account with the same alias
        #[arg(long)]
        overwrite: bool,
    },
    /// Removes an account
    #[command(alias = "delete")]
    Remove {
        alias: String,
    },
    /// Displays the current account and git identity
    Current,
    /// Lists configured accounts
    List,
    /// Scans the machine for existing identities
    Discover {
        /// Report what would happen without saving
        #[arg(long)]
        dry_run: bool,
        /// Import complete candidates regardless of confidence
        #[arg(long)]
        auto_import: bool,
    },
    /// Manages discovered accounts awaiting completion
    #[command(subcommand)]
    Pending(PendingCommands),
    /// Binds directories to accounts
    #[command(subcommand)]
    Project(ProjectCommands),
}

#[derive(Subcommand, Debug)]
pub enum PendingCommands {
    List,
    /// Supplies the missing name and email
    Complete {
        alias: String,
        name: String,
        email: String,
    },
    Discard {
        alias: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ProjectCommands {
    Bind {
        alias: String,
        /// Project directory, defaults to the current one
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    Unbind {
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    Show {
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

fn parse_platform(value: &str) -> Result<Platform, String> {
    value.parse().map_err(|e: crate::error::AppError| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_switch_flags() {
        let cli = Cli::parse_from(["gitpersona", "switch", "work", "--force"]);
        match cli.command {
            Some(Commands::Switch { alias, force, skip_validation, validate_only }) => {
                assert_eq!(alias.as_deref(), Some("work"));
                assert!(force);
                assert!(!skip_validation && !validate_only);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_add_platform() {
        let cli = Cli::parse_from([
            "gitpersona", "add", "corp", "Dev", "dev@corp.example", "--platform", "github-enterprise",
            "--domain", "git.corp.example",
        ]);
        match cli.command {
            Some(Commands::Add { platform, domain, .. }) => {
                assert_eq!(platform, Platform::GithubEnterprise);
                assert_eq!(domain.as_deref(), Some("git.corp.example"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
