mod agents;
mod cli;
mod config;
mod error;
mod logging;
mod utils;
mod workflow;

use agents::ProjectScannerAgent;
use clap::Parser;
use cli::{Cli, Commands};
use colored::Colorize;
use config::Settings;
use error::Result;
use std::process;
use workflow::RunContext;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("{} {}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let project = ProjectScannerAgent::new(&cli.path).locate()?;
    let settings = Settings::load(cli.config.as_deref(), &project.project_path)?;

    let verbose = cli.verbose;
    let explicit_log_dir = cli.log_dir.clone();
    let command = cli.into_command();

    // Read-only commands only write a run log when asked to
    let log_dir = match explicit_log_dir {
        Some(dir) => Some(dir),
        None if command.is_read_only() => None,
        None => Some(project.default_log_dir()),
    };
    let log_path = logging::init(log_dir.as_deref(), verbose)?;
    tracing::info!(project = %project.project_path.display(), "devup started");
    if let Some(path) = &log_path {
        tracing::info!(log = %path.display(), "run log opened");
    }

    let ctx = RunContext {
        project,
        settings,
        log_path,
    };

    match command {
        Commands::All { python } => workflow::execute_all(&ctx, &python),
        Commands::Global => workflow::execute_global(&ctx),
        Commands::Python { python } => workflow::execute_python(&ctx, &python),
        Commands::Runtime => workflow::execute_runtime(&ctx),
        Commands::Project => workflow::execute_project(&ctx),
        Commands::Resolve { python } => workflow::execute_resolve(&ctx, &python),
        Commands::Outdated { python } => workflow::execute_outdated(&ctx, &python),
    }
}
