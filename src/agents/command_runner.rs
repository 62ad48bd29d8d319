use crate::error::{DevupError, Result};
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// Captured result of one external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Human readable exit status, `signal` when the process was killed
    pub fn exit_label(&self) -> String {
        match self.code {
            Some(code) => format!("exit code {code}"),
            None => "signal".to_string(),
        }
    }

    /// Best available explanation of a failure: stderr, then stdout, then the exit status
    pub fn failure_detail(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        self.exit_label()
    }

    /// First non-empty stdout line, trimmed
    pub fn first_line(&self) -> Option<&str> {
        self.stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
    }
}

/// CommandRunner executes external programs synchronously, one at a time
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    working_dir: Option<PathBuf>,
    prefix: Vec<String>,
}

impl CommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every command from `dir`
    pub fn in_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Prepend `prefix` (e.g. `sudo`) to every command
    pub fn with_prefix(mut self, prefix: Vec<String>) -> Self {
        self.prefix = prefix;
        self
    }

    /// Ensure `program` can be found on PATH
    pub fn require_program(program: &str) -> Result<PathBuf> {
        which::which(program).map_err(|_| {
            DevupError::PrerequisiteMissing(format!(
                "'{program}' is required but not installed or not on PATH"
            ))
        })
    }

    pub fn has_program(program: &str) -> bool {
        which::which(program).is_ok()
    }

    /// Execute a command and capture both output streams
    pub fn capture(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let mut command = self.build(program, args);
        debug!(command = %self.describe(program, args), "capturing command");

        let output = command
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Self::spawn_error(program, e))?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    /// Execute a command with live stdout streaming; stderr is inherited
    pub fn stream(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        println!("Executing: {}", self.describe(program, args));

        let mut child = self
            .build(program, args)
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| Self::spawn_error(program, e))?;

        let mut collected = String::new();
        if let Some(stdout) = child.stdout.take() {
            let reader = BufReader::new(stdout);
            for line in reader.lines().map_while(std::io::Result::ok) {
                println!("{}", line);
                collected.push_str(&line);
                collected.push('\n');
            }
        }

        let status = child.wait().map_err(|e| {
            DevupError::CommandExecution(format!("Failed to wait for '{program}': {e}"))
        })?;

        Ok(CommandOutput {
            code: status.code(),
            stdout: collected.trim().to_string(),
            stderr: String::new(),
        })
    }

    fn build(&self, program: &str, args: &[&str]) -> Command {
        let mut command = match self.prefix.split_first() {
            Some((head, rest)) => {
                let mut command = Command::new(head);
                command.args(rest).arg(program);
                command
            }
            None => Command::new(program),
        };
        command.args(args);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
    }

    fn describe(&self, program: &str, args: &[&str]) -> String {
        self.prefix
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(program))
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn spawn_error(program: &str, err: std::io::Error) -> DevupError {
        if err.kind() == ErrorKind::NotFound {
            DevupError::PrerequisiteMissing(format!("Command not found: {program}"))
        } else {
            DevupError::CommandExecution(format!("Failed to spawn '{program}': {err}"))
        }
    }
}
