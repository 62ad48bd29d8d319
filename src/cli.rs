use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "devup",
    about = "Keep workstation package tooling current: global npm tools, Python packages, Node runtime and project dependencies",
    version,
    author
)]
pub struct Cli {
    /// Path to the project directory (defaults to current directory)
    #[arg(short, long, default_value = ".", global = true)]
    pub path: String,

    /// Enable verbose output for debugging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (defaults to <path>/devup.toml when present)
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Directory for the run log (defaults to <project root>/cache/devup/logs)
    #[arg(long, value_name = "DIR", global = true)]
    pub log_dir: Option<PathBuf>,

    /// Python options used when no subcommand is given
    #[command(flatten)]
    pub python: PythonArgs,

    /// Defaults to `all` when omitted
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// The command to run; a bare `devup` runs every stage
    pub fn into_command(self) -> Commands {
        self.command.unwrap_or(Commands::All { python: self.python })
    }
}

/// Options shared by commands that drive the Python environment
#[derive(clap::Args, Debug, Clone, Default)]
pub struct PythonArgs {
    /// Python interpreter to drive
    #[arg(long, env = "DEVUP_PYTHON", value_name = "EXE")]
    pub python: Option<String>,

    /// Maximum number of conflict resolution passes
    #[arg(long, env = "DEVUP_MAX_PASSES", value_name = "N")]
    pub max_passes: Option<u32>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run every stage in order: global tools, Python, Node runtime, project dependencies
    All {
        #[command(flatten)]
        python: PythonArgs,
    },

    /// Install or upgrade the curated global npm tools
    Global,

    /// Upgrade pip and every Python package, then resolve dependency conflicts
    Python {
        #[command(flatten)]
        python: PythonArgs,
    },

    /// Update NVM and switch to the latest Node LTS release
    Runtime,

    /// Reconcile package.json dependencies with their peer requirements
    Project,

    /// Only resolve Python dependency conflicts reported by `pip check`
    Resolve {
        #[command(flatten)]
        python: PythonArgs,
    },

    /// List outdated Python packages without changing anything
    Outdated {
        #[command(flatten)]
        python: PythonArgs,
    },
}

impl Commands {
    /// Commands that only report and should not leave files behind
    pub fn is_read_only(&self) -> bool {
        matches!(self, Commands::Outdated { .. })
    }
}
