use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use gitpersona::{
    cli::{Cli, Commands, PendingCommands, ProjectCommands},
    commands::{self, Context, NewAccount},
    error::AppError,
    menu::run_menu,
    settings::ENV_LOG,
    switch::SwitchOptions,
};

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {}", "error:".red(), err.to_string().red());
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), AppError> {
    let mut ctx = Context::load()?;

    match cli.command {
        Some(Commands::Switch {
            alias,
            force,
            skip_validation,
            validate_only,
        }) => commands::switch_user(
            &mut ctx,
            alias.as_deref(),
            SwitchOptions {
                force,
                skip_validation,
                validate_only,
            },
        ),
        Some(Commands::Add {
            alias,
            name,
            email,
            platform,
            username,
            ssh_key,
            domain,
            gpg_key,
            overwrite,
        }) => commands::add_user(
            &mut ctx,
            NewAccount {
                alias,
                name,
                email,
                platform,
                username,
                ssh_key,
                domain,
                gpg_key,
                overwrite,
            },
        ),
        Some(Commands::Remove { alias }) => commands::delete_user(&mut ctx, &alias),
        Some(Commands::Current) => commands::show_current_user(&ctx),
        Some(Commands::List) => commands::list_all_users(&ctx),
        Some(Commands::Discover {
            dry_run,
            auto_import,
        }) => commands::discover(&mut ctx, dry_run, auto_import),
        Some(Commands::Pending(PendingCommands::List)) => commands::list_pending(&ctx),
        Some(Commands::Pending(PendingCommands::Complete { alias, name, email })) => {
            commands::complete_pending(&mut ctx, &alias, &name, &email)
        }
        Some(Commands::Pending(PendingCommands::Discard { alias })) => {
            commands::discard_pending(&mut ctx, &alias)
        }
        Some(Commands::Project(ProjectCommands::Bind { alias, dir })) => {
            commands::project_bind(&mut ctx, &alias, dir)
        }
        Some(Commands::Project(ProjectCommands::Unbind { dir })) => {
            commands::project_unbind(&mut ctx, dir)
        }
        Some(Commands::Project(ProjectCommands::Show { dir })) => commands::project_show(&ctx, dir),
        None => run_menu(&mut ctx),
    }
}
