//! Discover and switch between Git, SSH and hosting-platform identities.

pub mod account;
pub mod cli;
pub mod commands;
pub mod decision;
pub mod discovery;
pub mod error;
pub mod git;
pub mod menu;
pub mod platform;
pub mod process;
pub mod project;
pub mod settings;
pub mod ssh;
pub mod storage;
pub mod switch;
pub mod validation;

pub use account::{Account, Config, MissingField, PendingAccount, Platform};
pub use decision::{decide, decide_with, Decision, SkipReason, Thresholds};
pub use discovery::{AccountDiscoveryEngine, Candidate, DiscoveryPaths};
pub use error::{AppError, ErrorKind, Result};
pub use git::{VersionControlConfig, VersionControlConfigWriter};
pub use platform::PlatformClient;
pub use settings::Settings;
pub use ssh::{IdentityAgent, SshAgent};
pub use storage::ConfigStore;
pub use switch::{SwitchCoordinator, SwitchOptions, SwitchReport, SwitchState};
