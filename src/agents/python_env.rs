use crate::agents::conflict_resolver::{ConflictResolver, ResolutionOutcome, ResolutionReport};
use crate::agents::package_manager::{OutdatedPackage, PackageManager, PipManager};
use crate::config::Settings;
use crate::error::{DevupError, Result};
use crate::logging;
use crate::utils::progress;
use crate::workflow::Stage;
use colored::Colorize;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Upgrades pip and every installed Python package, then resolves conflicts
pub struct PythonEnvStage {
    settings: Settings,
    log_path: Option<PathBuf>,
}

impl PythonEnvStage {
    pub fn new(settings: Settings, log_path: Option<PathBuf>) -> Self {
        Self { settings, log_path }
    }

    fn execute(&self) -> Result<()> {
        let pip = open_pip(&self.settings.python)?;

        println!("\n{}", "2. Upgrading pip...".yellow());
        pip.upgrade_self()?;
        match pip.version() {
            Ok(version) => {
                let number = version.split_whitespace().nth(1).unwrap_or(version.as_str());
                println!("{}", format!("✓ pip upgraded to {number}").green());
                info!("pip upgraded to {number}");
            }
            Err(e) => warn!("Unable to retrieve new pip version: {e}"),
        }

        println!("\n{}", "3. Checking outdated packages...".yellow());
        let outdated = pip.list_outdated()?;
        print_outdated(&outdated);

        if !outdated.is_empty() {
            let names: Vec<String> = outdated.iter().map(|p| p.name.clone()).collect();
            let failed = upgrade_in_batches(&names, self.settings.upgrade_batch_size, |batch| {
                pip.upgrade_many(batch)
            });
            if failed.is_empty() {
                println!("{}", "✓ Outdated packages upgraded".green());
            } else {
                println!(
                    "{}",
                    format!("⚠ {} upgrade batch(es) failed; see log", failed.len()).yellow()
                );
            }
        }

        println!("\n{}", "4. Resolving dependency conflicts...".yellow());
        let report = ConflictResolver::new(&pip, self.settings.max_passes)?.resolve()?;
        log_resolution(&report);

        println!("\n{}", "5. Performing final pip check...".yellow());
        verify_consistent(&pip)?;
        println!(
            "{}",
            "✓ Environment is clean. No dependency conflicts remain.".green()
        );

        println!("\n{}", "6. Installed package summary:".yellow());
        let listing = pip.list_installed_columns()?;
        println!("{}", listing);
        if let Some(log_path) = &self.log_path {
            logging::append_section(log_path, "Installed Python packages", &listing)?;
            info!("Final package list appended to {}", log_path.display());
        }

        println!("\n{}", "✨ Python environment upgrade complete".green().bold());
        Ok(())
    }
}

impl Stage for PythonEnvStage {
    fn name(&self) -> &str {
        "python"
    }

    fn run(&mut self) -> Result<()> {
        self.execute()
    }
}

/// Only resolve conflicts and confirm the environment is consistent
pub fn resolve_only(settings: &Settings) -> Result<()> {
    let pip = open_pip(&settings.python)?;

    println!("\n{}", "2. Resolving dependency conflicts...".yellow());
    let report = ConflictResolver::new(&pip, settings.max_passes)?.resolve()?;
    log_resolution(&report);

    println!("\n{}", "3. Performing final pip check...".yellow());
    verify_consistent(&pip)?;

    println!(
        "\n{}",
        format!(
            "✨ Environment consistent ({} upgrade attempt(s), {} failed)",
            report.upgrade_attempts(),
            report.upgrade_failures()
        )
        .green()
        .bold()
    );
    Ok(())
}

/// Report outdated packages without changing anything
pub fn report_outdated(settings: &Settings) -> Result<()> {
    let pip = open_pip(&settings.python)?;
    println!("\n{}", "2. Checking outdated packages...".yellow());
    print_outdated(&pip.list_outdated()?);
    Ok(())
}

/// Resolve the interpreter and make sure pip works with it
fn open_pip(python: &str) -> Result<PipManager> {
    println!("\n{}", "1. Verifying pip availability...".yellow());
    let interpreter = resolve_interpreter(python)?;
    info!("Using Python interpreter: {interpreter}");

    let pip = PipManager::new(interpreter);
    let version = pip.version()?;
    println!("   Using {}", version.dimmed());
    info!("Using pip: {version}");
    Ok(pip)
}

/// Find the interpreter on PATH (or verify an explicit path)
pub fn resolve_interpreter(python: &str) -> Result<String> {
    which::which(python)
        .map(|path| path.display().to_string())
        .map_err(|_| {
            DevupError::PrerequisiteMissing(format!(
                "Python interpreter '{python}' not found (set --python or DEVUP_PYTHON)"
            ))
        })
}

/// Final consistency re-check after resolution
pub fn verify_consistent(manager: &dyn PackageManager) -> Result<()> {
    let diagnostics = manager.check()?;
    if diagnostics.is_empty() {
        info!("Environment is clean. No dependency conflicts remain.");
        return Ok(());
    }
    Err(DevupError::ConsistencyCheck(diagnostics.join("\n")))
}

/// Upgrade `packages` in chunks of `batch_size`; a failed batch is only a warning.
///
/// Returns the failed batches.
pub fn upgrade_in_batches<F>(
    packages: &[String],
    batch_size: usize,
    mut upgrade: F,
) -> Vec<Vec<String>>
where
    F: FnMut(&[String]) -> Result<()>,
{
    let batches: Vec<&[String]> = packages.chunks(batch_size.max(1)).collect();
    let pb = progress::bar(batches.len());
    let mut failed = Vec::new();

    for batch in batches {
        pb.set_message(format!("Upgrading {}", batch.join(", ")));
        info!("Upgrading: {}", batch.join(", "));
        if let Err(e) = upgrade(batch) {
            warn!("Failed to upgrade batch: {e}");
            failed.push(batch.to_vec());
        }
        pb.inc(1);
    }
    pb.finish_and_clear();
    failed
}

/// Record what each resolution pass saw and which upgrades failed
fn log_resolution(report: &ResolutionReport) {
    for pass in &report.passes {
        info!(
            pass = pass.pass,
            diagnostics = pass.diagnostics.len(),
            attempted = pass.attempted.len(),
            failed = pass.failed.len(),
            "resolution pass summary"
        );
        for line in &pass.diagnostics {
            debug!(pass = pass.pass, "{line}");
        }
        for failure in &pass.failed {
            debug!(
                pass = pass.pass,
                "{} could not be upgraded: {}", failure.requirement, failure.reason
            );
        }
    }
    if let ResolutionOutcome::Converged { pass } = report.outcome {
        info!("Dependency conflicts resolved on pass {pass}");
    }
}

fn print_outdated(outdated: &[OutdatedPackage]) {
    if outdated.is_empty() {
        println!("{}", "✓ All Python packages are already up to date".green());
        info!("All Python packages are already up to date.");
        return;
    }

    println!("   Outdated packages detected ({}):", outdated.len());
    let width = outdated.iter().map(|p| p.name.len()).max().unwrap_or(0);
    for package in outdated {
        println!(
            "   • {}  {} → {}",
            format!("{:<width$}", package.name).bright_cyan(),
            package.current.red(),
            package.latest.green(),
        );
        info!(
            "outdated: {} {} -> {}",
            package.name, package.current, package.latest
        );
    }
}
