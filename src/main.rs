use std::process::ExitCode;

use clap::Parser;

use braid::cli::{Cli, Commands};
use braid::commands::App;

fn main() -> ExitCode {
    // Invalid arguments exit 2 via clap before we get here.
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.verbose { "debug" } else { "off" }),
    )
    .format_timestamp(None)
    .init();

    if let Some(dir) = &cli.directory
        && let Err(e) = std::env::set_current_dir(dir)
    {
        eprintln!("cannot change to {}: {e}", dir.display());
        return ExitCode::FAILURE;
    }

    let app = match App::new() {
        Ok(app) => app,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Create { message } => app.create(&message),
        Commands::Submit { draft, dry_run } => app.submit(draft, dry_run),
        Commands::Merge { method, long_wait } => app.merge(method, long_wait),
        Commands::Preview { action } => app.preview(action),
        Commands::Workspace { action } => app.workspace(action),
        Commands::Checkout { target } => app.checkout(&target),
        Commands::Up => app.up(),
        Commands::Down => app.down(),
        Commands::Top => app.top(),
        Commands::Exit => app.exit(),
        Commands::Daemon { action } => app.daemon(action),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
