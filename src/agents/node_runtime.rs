use crate::agents::command_runner::{CommandOutput, CommandRunner};
use crate::config::Settings;
use crate::error::{DevupError, Result};
use crate::utils::shell;
use crate::workflow::Stage;
use colored::Colorize;
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;
use tracing::{info, warn};

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1B\[[0-9;]*[A-Za-z]").expect("ANSI pattern is valid"));

static NODE_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"v\d+\.\d+\.\d+").expect("version pattern is valid"));

/// Updates NVM itself and switches the default Node to the latest LTS
pub struct NodeRuntimeStage {
    settings: Settings,
}

impl NodeRuntimeStage {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    fn execute(&self) -> Result<()> {
        println!("\n{}", "1. Checking prerequisites...".yellow());
        CommandRunner::require_program("git")?;
        CommandRunner::require_program("bash")?;
        let nvm = Nvm::new(nvm_dir()?);
        println!("{}", "✓ git and bash are installed".green());

        println!("\n{}", "2. Updating NVM...".yellow());
        let tag = self.ensure_nvm(&nvm)?;
        println!("{}", format!("✓ NVM ready ({tag})").green());

        println!("\n{}", "3. Installing latest Node LTS...".yellow());
        let lts = self.ensure_lts(&nvm)?;
        println!("{}", format!("✓ Node {lts} active").green());

        println!("\n{}", "4. Upgrading npm and global packages...".yellow());
        nvm.require_success(
            "npm install -g npm@latest",
            "Failed to upgrade npm",
        )?;
        let outdated = nvm.exec("npm -g outdated --parseable --depth=0")?;
        if outdated.stdout.trim().is_empty() {
            println!("{}", "✓ Global packages already up-to-date".green());
        } else {
            nvm.require_success("npm -g update", "Failed to update global packages")?;
            println!("{}", "✓ Global packages updated".green());
        }

        println!("\n{}", "5. Version snapshot:".yellow());
        for command in ["nvm --version", "node -v", "npm -v"] {
            let output = nvm.exec(command)?;
            let version = output.first_line().unwrap_or("unknown");
            println!("   {:<14} {}", command, version);
            info!("{command}: {version}");
        }

        println!("\n{}", "✨ Node runtime update complete".green().bold());
        Ok(())
    }

    fn ensure_nvm(&self, nvm: &Nvm) -> Result<String> {
        let repo = self.settings.nvm_repo.as_str();
        let runner = CommandRunner::new();
        let tags = runner.capture(
            "git",
            &[
                "-c",
                "versionsort.suffix=-",
                "ls-remote",
                "--refs",
                "--sort=version:refname",
                "--tags",
                repo,
                "*.*.*",
            ],
        )?;
        let tag = match latest_tag(&tags.stdout) {
            Some(tag) if tags.success() => tag,
            _ => {
                return Err(DevupError::ToolUpgrade(format!(
                    "Cannot fetch NVM tags from {repo}: {}",
                    tags.failure_detail()
                )));
            }
        };

        let dir = nvm.dir.display().to_string();
        if nvm.dir.is_dir() {
            let in_repo = CommandRunner::new().in_dir(&nvm.dir);
            check_git(
                in_repo.capture("git", &["fetch", "--depth", "1", "origin", &tag])?,
                "git fetch",
            )?;
            check_git(in_repo.capture("git", &["checkout", &tag])?, "git checkout")?;
        } else {
            check_git(
                runner.capture(
                    "git",
                    &["clone", "--depth", "1", "--branch", &tag, repo, &dir],
                )?,
                "git clone",
            )?;
        }

        info!("NVM ready ({tag}) in {dir}");
        Ok(tag)
    }

    fn ensure_lts(&self, nvm: &Nvm) -> Result<String> {
        let listing = nvm.exec("nvm ls-remote --lts")?;
        if !listing.success() {
            return Err(DevupError::ToolUpgrade(format!(
                "nvm ls-remote failed: {}",
                listing.failure_detail()
            )));
        }
        let latest = latest_lts(&listing.stdout).ok_or_else(|| {
            DevupError::ToolUpgrade("nvm ls-remote --lts listed no versions".to_string())
        })?;

        let current = nvm.exec("nvm current")?;
        if current.first_line() != Some(latest.as_str()) {
            nvm.require_success("nvm install --lts", "nvm install --lts failed")?;
        }
        nvm.require_success("nvm alias default 'lts/*'", "nvm alias default failed")?;

        info!("Node {latest} active");
        Ok(latest)
    }
}

impl Stage for NodeRuntimeStage {
    fn name(&self) -> &str {
        "runtime"
    }

    fn run(&mut self) -> Result<()> {
        self.execute()
    }
}

/// Runs commands inside a bash shell with `nvm.sh` sourced
struct Nvm {
    dir: PathBuf,
}

impl Nvm {
    fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Execute `command` with nvm loaded and the default Node selected
    fn exec(&self, command: &str) -> Result<CommandOutput> {
        let script = nvm_script(&self.dir.display().to_string(), command);
        CommandRunner::new().capture("bash", &["-c", &script])
    }

    fn require_success(&self, command: &str, context: &str) -> Result<()> {
        let output = self.exec(command)?;
        if !output.success() {
            return Err(DevupError::ToolUpgrade(format!(
                "{context}: {}",
                output.failure_detail()
            )));
        }
        Ok(())
    }
}

fn check_git(output: CommandOutput, command: &str) -> Result<()> {
    if output.success() {
        return Ok(());
    }
    Err(DevupError::ToolUpgrade(format!(
        "{command} failed: {}",
        output.failure_detail()
    )))
}

/// `$NVM_DIR`, falling back to `~/.nvm`
pub fn nvm_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os("NVM_DIR").filter(|dir| !dir.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(".nvm"))
        .ok_or_else(|| {
            DevupError::PrerequisiteMissing("Cannot determine home directory for NVM".into())
        })
}

/// Shell script that loads nvm from `dir` and runs `command`
pub fn nvm_script(dir: &str, command: &str) -> String {
    format!(
        "export NVM_DIR={}; . \"$NVM_DIR/nvm.sh\" || exit 127; nvm use default >/dev/null 2>&1; {command}",
        shell::quote(dir)
    )
}

/// Last tag listed by `git ls-remote --refs --sort=version:refname --tags`
pub fn latest_tag(ls_remote: &str) -> Option<String> {
    ls_remote
        .lines()
        .map(str::trim)
        .rev()
        .find(|line| !line.is_empty())
        .and_then(|line| line.rsplit('/').next())
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
}

/// Newest `vX.Y.Z` in `nvm ls-remote --lts` output, ignoring colour codes
pub fn latest_lts(listing: &str) -> Option<String> {
    let plain = ANSI_ESCAPE.replace_all(listing, "");
    let latest = NODE_VERSION
        .find_iter(&plain)
        .last()
        .map(|m| m.as_str().to_string());
    if latest.is_none() {
        warn!("no Node versions found in nvm ls-remote output");
    }
    latest
}
