use colored::Colorize;
use inquire::{Confirm, Select, Text};

use crate::{
    account::Platform,
    commands::{
        self, add_user, check_if_accounts_exist, delete_user, discover, list_all_users,
        show_current_user, switch_user, Context, NewAccount,
    },
    error::AppError,
    storage::ConfigStore,
    switch::SwitchOptions,
    validation::{prompt_until_valid, validate_input_alias, validate_input_email, validate_input_name, BACK_OPTION},
};

/// Runs interactive menu interface
pub fn run_menu(ctx: &mut Context) -> Result<(), AppError> {
    loop {
        let actions: Vec<&'static str> = vec![
            "switch account",
            "add account",
            "delete account",
            "show current account",
            "show all accounts",
            "discover accounts",
            "complete pending account",
            "quit",
        ];

        let action_selected: &'static str =
            Select::new(&format!("{}", "select action".blue()), actions).prompt()?;

        let result = match action_selected {
            "switch account" => menu_switch_user(ctx),
            "add account" => menu_add_user(ctx),
            "delete account" => menu_delete_user(ctx),
            "show current account" => show_current_user(ctx),
            "show all accounts" => list_all_users(ctx),
            "discover accounts" => menu_discover(ctx),
            "complete pending account" => menu_complete_pending(ctx),
            "quit" => {
                println!("{}", "quitting".yellow());
                break Ok(());
            }
            _ => unreachable!("unexpected input"),
        };

        // Input cancellation ends the menu; anything else is reported and the loop continues.
        match result {
            Err(err @ AppError::Inquire(_)) => break Err(err),
            Err(err) => println!("{}", err.to_string().red()),
            Ok(()) => {}
        }
    }
}

/// Menu for switching accounts
fn menu_switch_user(ctx: &mut Context) -> Result<(), AppError> {
    check_if_accounts_exist(&ctx.store)?;

    let aliases: Vec<String> = build_alias_list(&ctx.store);
    let alias_to_switch: String =
        Select::new(&format!("{}", "select account to switch:".blue()), aliases).prompt()?;

    if alias_to_switch != BACK_OPTION {
        switch_user(ctx, Some(&alias_to_switch), SwitchOptions::default())?;
    }

    Ok(())
}

/// Menu for adding a new account
fn menu_add_user(ctx: &mut Context) -> Result<(), AppError> {
    let taken: Vec<String> = ctx
        .store
        .list_accounts()
        .into_iter()
        .map(|a| a.alias.clone())
        .chain(ctx.store.list_pending_accounts().into_iter().map(|p| p.alias.clone()))
        .collect();

    let alias: String = prompt_until_valid(&format!("{}", "enter alias:".blue()), |input| {
        validate_input_alias(input, taken.iter().map(String::as_str))
    })?;
    let name: String =
        prompt_until_valid(&format!("{}", "enter git user.name:".blue()), validate_input_name)?;
    let email: String =
        prompt_until_valid(&format!("{}", "enter git email:".blue()), validate_input_email)?;
    let platform: Platform =
        Select::new(&format!("{}", "select platform:".blue()), Platform::ALL.to_vec()).prompt()?;

    let username = optional_text("enter platform username (optional):")?;
    let ssh_key = optional_text("enter SSH private key path (optional):")?;
    let domain = match platform {
        Platform::GithubEnterprise | Platform::GitlabSelfHosted => {
            optional_text("enter platform host, e.g. git.corp.example:")?
        }
        _ => None,
    };
    let gpg_key = if Confirm::new("sign commits with a GPG key?").with_default(false).prompt()? {
        optional_text("enter GPG key id:")?
    } else {
        None
    };

    add_user(
        ctx,
        NewAccount {
            alias,
            name,
            email,
            platform,
            username,
            ssh_key: ssh_key.map(Into::into),
            domain,
            gpg_key,
            overwrite: false,
        },
    )
}

/// Menu for deleting an account
fn menu_delete_user(ctx: &mut Context) -> Result<(), AppError> {
    check_if_accounts_exist(&ctx.store)?;

    let aliases: Vec<String> = build_alias_list(&ctx.store);
    let alias_to_delete: String =
        Select::new(&format!("{}", "select account to delete:".blue()), aliases).prompt()?;

    if alias_to_delete != BACK_OPTION {
        delete_user(ctx, &alias_to_delete)?;
    }

    Ok(())
}

fn menu_discover(ctx: &mut Context) -> Result<(), AppError> {
    let dry_run = Confirm::new("preview only (dry run)?").with_default(true).prompt()?;
    discover(ctx, dry_run, false)
}

fn menu_complete_pending(ctx: &mut Context) -> Result<(), AppError> {
    let mut aliases: Vec<String> = ctx
        .store
        .list_pending_accounts()
        .into_iter()
        .map(|p| p.alias.clone())
        .collect();
    if aliases.is_empty() {
        println!("{}", "no pending accounts".yellow());
        return Ok(());
    }
    aliases.push(BACK_OPTION.to_string());

    let alias: String =
        Select::new(&format!("{}", "select pending account:".blue()), aliases).prompt()?;
    if alias == BACK_OPTION {
        return Ok(());
    }
    let name = prompt_until_valid(&format!("{}", "enter git user.name:".blue()), validate_input_name)?;
    let email = prompt_until_valid(&format!("{}", "enter git email:".blue()), validate_input_email)?;
    commands::complete_pending(ctx, &alias, &name, &email)
}

/// Trimmed text input, `None` when left blank
fn optional_text(message: &str) -> Result<Option<String>, AppError> {
    let input = Text::new(&format!("{}", message.blue())).prompt()?;
    let trimmed = input.trim();
    Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
}

/// Builds list of account aliases for menu to display
pub fn build_alias_list(store: &ConfigStore) -> Vec<String> {
    let mut aliases: Vec<String> = store
        .list_accounts()
        .into_iter()
        .map(|account| account.alias.clone())
        .collect();
    aliases.push(BACK_OPTION.to_string());
    aliases
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Account;

    #[test]
    fn test_alias_list_ends_with_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ConfigStore::new(dir.path().join("config.json"));
        store.add_account(Account::new("work", "W", "w@corp.example"), false).unwrap();
        assert_eq!(build_alias_list(&store), vec!["work".to_string(), BACK_OPTION.to_string()]);
    }
}
