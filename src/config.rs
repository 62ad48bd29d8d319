use crate::agents::conflict_resolver::DEFAULT_MAX_PASSES;
use crate::cli::PythonArgs;
use crate::error::{DevupError, Result};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::Path;

pub const CONFIG_FILE: &str = "devup.toml";

/// Whether global npm installs need `sudo`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SudoMode {
    /// Probe with a dry-run install
    #[default]
    Auto,
    Always,
    Never,
}

impl<'de> Deserialize<'de> for SudoMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Word(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Flag(true) => Ok(SudoMode::Always),
            Raw::Flag(false) => Ok(SudoMode::Never),
            Raw::Word(word) if word.eq_ignore_ascii_case("auto") => Ok(SudoMode::Auto),
            Raw::Word(word) => Err(D::Error::custom(format!(
                "use_sudo must be \"auto\", true or false, got \"{word}\""
            ))),
        }
    }
}

/// Settings loaded from `devup.toml`, then overridden from env and CLI
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub python: String,
    pub max_passes: u32,
    pub upgrade_batch_size: usize,
    pub global_tools: Vec<String>,
    pub npm_helpers: Vec<String>,
    pub use_sudo: SudoMode,
    pub nvm_repo: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            max_passes: DEFAULT_MAX_PASSES,
            upgrade_batch_size: 10,
            global_tools: ["typescript", "eslint", "hardhat", "npm-check-updates"]
                .map(String::from)
                .to_vec(),
            npm_helpers: ["glob", "lru-cache"].map(String::from).to_vec(),
            use_sudo: SudoMode::Auto,
            nvm_repo: "https://github.com/nvm-sh/nvm.git".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from an explicit file, or `<project>/devup.toml` when present
    pub fn load(explicit: Option<&Path>, project_path: &Path) -> Result<Self> {
        let settings = match explicit {
            Some(path) => Self::from_file(path)?,
            None => {
                let candidate = project_path.join(CONFIG_FILE);
                if candidate.is_file() {
                    Self::from_file(&candidate)?
                } else {
                    Self::default()
                }
            }
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            DevupError::Config(format!("Failed to read '{}': {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `--python` / `--max-passes` (or their env counterparts)
    pub fn with_python_args(mut self, args: &PythonArgs) -> Result<Self> {
        if let Some(python) = &args.python {
            self.python = python.clone();
        }
        if let Some(max_passes) = args.max_passes {
            self.max_passes = max_passes;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_passes == 0 {
            return Err(DevupError::Config("max_passes must be at least 1".into()));
        }
        if self.upgrade_batch_size == 0 {
            return Err(DevupError::Config(
                "upgrade_batch_size must be at least 1".into(),
            ));
        }
        if self.python.trim().is_empty() {
            return Err(DevupError::Config("python must not be empty".into()));
        }
        Ok(())
    }
}
