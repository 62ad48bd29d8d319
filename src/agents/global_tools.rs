use crate::agents::command_runner::CommandRunner;
use crate::agents::package_manager::OutdatedPackage;
use crate::config::{Settings, SudoMode};
use crate::error::{DevupError, Result};
use crate::utils::progress;
use crate::workflow::Stage;
use colored::Colorize;
use tracing::info;

/// Map an npm package to the CLI binary it installs; `None` for libraries
pub fn cli_name(package: &str) -> Option<&str> {
    match package {
        "typescript" => Some("tsc"),
        "npm-check-updates" => Some("ncu"),
        "lru-cache" | "glob" => None,
        other => Some(other),
    }
}

/// Installs and verifies the curated global npm tools
pub struct GlobalToolsStage {
    settings: Settings,
}

impl GlobalToolsStage {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    fn execute(&self) -> Result<()> {
        println!("\n{}", "1. Checking prerequisites...".yellow());
        CommandRunner::require_program("node")?;
        CommandRunner::require_program("npm")?;
        println!("{}", "✓ Node.js and npm are installed".green());

        let prefix = self.sudo_prefix()?;
        let npm = NpmGlobal::new(prefix);

        println!("\n{}", "2. Upgrading npm to latest...".yellow());
        npm.install_latest("npm")?;
        let npm_version = read_version("npm", &["-v"])?;
        println!("{}", format!("✓ npm upgraded to {npm_version}").green());
        info!("npm upgraded to {npm_version}");

        println!("\n{}", "3. Installing/upgrading curated global CLI tools...".yellow());
        npm.install_all(&self.settings.global_tools)?;

        println!("\n{}", "4. Installing npm helper packages...".yellow());
        npm.install_all(&self.settings.npm_helpers)?;

        println!("\n{}", "5. Checking for outdated global packages...".yellow());
        let outdated = npm.outdated()?;
        if outdated.is_empty() {
            println!("{}", "✓ No other outdated global packages".green());
        } else {
            println!("   Outdated packages found:");
            for package in &outdated {
                println!(
                    "   • {}  current: {}, latest: {}",
                    format!("{:<20}", package.name).bright_cyan(),
                    package.current.red(),
                    package.latest.green()
                );
                info!(
                    "outdated global: {} {} -> {}",
                    package.name, package.current, package.latest
                );
            }
            npm.update_all()?;
            println!("{}", "✓ Other global packages upgraded".green());
        }

        println!("\n{}", "6. Verifying installed versions...".yellow());
        println!("   node: {}", read_version("node", &["-v"])?);
        println!("   npm : {}", read_version("npm", &["-v"])?);
        for tool in self
            .settings
            .global_tools
            .iter()
            .chain(&self.settings.npm_helpers)
        {
            let version = tool_version(tool);
            println!("   {:<20} {}", tool, version);
            info!("{tool:<20} {version}");
        }

        println!("\n{}", "7. Global npm packages (depth=0):".yellow());
        let listing = CommandRunner::new().capture("npm", &["list", "-g", "--depth=0"])?;
        println!("{}", listing.stdout);
        info!("global packages:\n{}", listing.stdout);

        println!("\n{}", "✨ Global npm environment setup complete".green().bold());
        Ok(())
    }

    /// Decide whether `npm install -g` needs sudo
    fn sudo_prefix(&self) -> Result<Vec<String>> {
        let needs_sudo = match self.settings.use_sudo {
            SudoMode::Always => true,
            SudoMode::Never => false,
            SudoMode::Auto => {
                let dry_run = CommandRunner::new()
                    .capture("npm", &["install", "-g", "npm@latest", "--dry-run"])?;
                !dry_run.success()
            }
        };

        if needs_sudo {
            CommandRunner::require_program("sudo")?;
            println!(
                "{}",
                "NOTE: global npm installs will run with sudo (prefix not writable)".yellow()
            );
            info!("global npm installs will use sudo");
            Ok(vec!["sudo".to_string()])
        } else {
            info!("npm global prefix is writable; no sudo needed");
            Ok(Vec::new())
        }
    }
}

impl Stage for GlobalToolsStage {
    fn name(&self) -> &str {
        "global"
    }

    fn run(&mut self) -> Result<()> {
        self.execute()
    }
}

/// `npm -g` operations, optionally run under sudo
pub struct NpmGlobal {
    privileged: CommandRunner,
}

impl NpmGlobal {
    pub fn new(prefix: Vec<String>) -> Self {
        Self {
            privileged: CommandRunner::new().with_prefix(prefix),
        }
    }

    pub fn install_latest(&self, package: &str) -> Result<()> {
        let target = format!("{package}@latest");
        let output = self.privileged.capture("npm", &["install", "-g", &target])?;
        if !output.success() {
            return Err(DevupError::ToolUpgrade(format!(
                "Failed to install/upgrade {package}: {}",
                output.failure_detail()
            )));
        }
        info!("{package} installed/upgraded");
        Ok(())
    }

    /// Install every package at its latest version, stopping at the first failure
    pub fn install_all(&self, packages: &[String]) -> Result<()> {
        let pb = progress::bar(packages.len());
        for package in packages {
            pb.set_message(format!("{package}@latest"));
            if let Err(e) = self.install_latest(package) {
                pb.abandon();
                return Err(e);
            }
            pb.println(format!("   {} {}", "✓".green(), package));
            pb.inc(1);
        }
        pb.finish_and_clear();
        Ok(())
    }

    pub fn outdated(&self) -> Result<Vec<OutdatedPackage>> {
        // npm outdated exits 1 when anything is outdated, so the status is ignored
        let output = CommandRunner::new().capture(
            "npm",
            &["-g", "outdated", "--parseable", "--depth=0"],
        )?;
        Ok(parse_npm_outdated(&output.stdout))
    }

    pub fn update_all(&self) -> Result<()> {
        let output = self.privileged.capture("npm", &["-g", "update"])?;
        if !output.success() {
            return Err(DevupError::ToolUpgrade(format!(
                "Failed to update other global packages: {}",
                output.failure_detail()
            )));
        }
        Ok(())
    }
}

/// Run `program args` and return the first line of its output
fn read_version(program: &str, args: &[&str]) -> Result<String> {
    let output = CommandRunner::new().capture(program, args)?;
    match output.first_line() {
        Some(line) if output.success() => Ok(line.to_string()),
        _ => Err(DevupError::CommandExecution(format!(
            "Failed to retrieve {program} version: {}",
            output.failure_detail()
        ))),
    }
}

/// Version reported by a tool's CLI, or "not found / N/A"
fn tool_version(package: &str) -> String {
    let Some(binary) = cli_name(package).filter(|bin| CommandRunner::has_program(bin)) else {
        return "not found / N/A".to_string();
    };
    CommandRunner::new()
        .capture(binary, &["--version"])
        .ok()
        .and_then(|output| output.first_line().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parse `npm -g outdated --parseable --depth=0`.
///
/// Each line is `path:name@wanted:name@current:name@latest[:location]`.
pub fn parse_npm_outdated(output: &str) -> Vec<OutdatedPackage> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(parse_outdated_line)
        .collect()
}

fn parse_outdated_line(line: &str) -> Option<OutdatedPackage> {
    // Skip a Windows drive prefix such as `C:\` so it is not taken as a field
    let line = match line.as_bytes() {
        [drive, b':', b'\\', ..] if drive.is_ascii_alphabetic() => &line[2..],
        _ => line,
    };

    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() < 4 {
        return None;
    }

    let (name, _wanted) = split_spec(fields[1])?;
    let current = split_spec(fields[2]).map_or(fields[2], |(_, version)| version);
    let latest = split_spec(fields[3]).map_or(fields[3], |(_, version)| version);

    Some(OutdatedPackage {
        name: name.to_string(),
        current: current.to_string(),
        latest: latest.to_string(),
    })
}

/// Split `name@version`, keeping the leading `@` of scoped packages
fn split_spec(spec: &str) -> Option<(&str, &str)> {
    let at = spec.rfind('@').filter(|&index| index > 0)?;
    Some((&spec[..at], &spec[at + 1..]))
}
