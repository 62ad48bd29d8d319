use crate::agents::command_runner::{CommandOutput, CommandRunner};
use crate::error::{DevupError, Result};
use serde::Deserialize;

/// An installed package with a newer release available
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutdatedPackage {
    pub name: String,
    #[serde(rename = "version")]
    pub current: String,
    #[serde(rename = "latest_version")]
    pub latest: String,
}

/// The package-manager primitives the conflict resolver needs.
///
/// Implemented by [`PipManager`] for real environments and by scripted fakes
/// in tests.
pub trait PackageManager {
    /// Run the consistency check; an empty result means every requirement is satisfied
    fn check(&self) -> Result<Vec<String>>;

    /// Upgrade exactly one requirement spec (e.g. `pkgB>=2.0`)
    fn upgrade(&self, spec: &str) -> Result<()>;

    fn list_outdated(&self) -> Result<Vec<OutdatedPackage>>;
}

/// PipManager drives `python -m pip` for a given interpreter
pub struct PipManager {
    python: String,
    runner: CommandRunner,
}

impl PipManager {
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
            runner: CommandRunner::new(),
        }
    }

    /// `pip --version` output, failing when pip is unavailable
    pub fn version(&self) -> Result<String> {
        let output = self.pip(&["--version"])?;
        if !output.success() {
            return Err(DevupError::PrerequisiteMissing(format!(
                "pip module not available for {}: {}",
                self.python,
                output.failure_detail()
            )));
        }
        Ok(output.stdout)
    }

    /// Upgrade pip itself
    pub fn upgrade_self(&self) -> Result<()> {
        let output = self.pip(&["install", "--quiet", "--upgrade", "pip"])?;
        if !output.success() {
            return Err(DevupError::ToolUpgrade(format!(
                "pip upgrade failed: {}",
                output.failure_detail()
            )));
        }
        Ok(())
    }

    /// Upgrade a batch of packages in one pip invocation
    pub fn upgrade_many(&self, packages: &[String]) -> Result<()> {
        let mut args = vec!["install", "--quiet", "--upgrade"];
        args.extend(packages.iter().map(String::as_str));
        let output = self.pip(&args)?;
        if !output.success() {
            return Err(DevupError::ToolUpgrade(format!(
                "[{}]: {}",
                packages.join(", "),
                output.failure_detail()
            )));
        }
        Ok(())
    }

    /// `pip list --format=columns`, used for the closing summary
    pub fn list_installed_columns(&self) -> Result<String> {
        let output = self.pip(&["list", "--format=columns"])?;
        if !output.success() {
            return Err(DevupError::CommandExecution(format!(
                "pip list failed: {}",
                output.failure_detail()
            )));
        }
        Ok(output.stdout)
    }

    fn pip(&self, args: &[&str]) -> Result<CommandOutput> {
        let mut full = vec!["-m", "pip"];
        full.extend_from_slice(args);
        self.runner.capture(&self.python, &full)
    }
}

impl PackageManager for PipManager {
    fn check(&self) -> Result<Vec<String>> {
        let output = self.pip(&["check"])?;
        Ok(diagnostic_lines(&output))
    }

    fn upgrade(&self, spec: &str) -> Result<()> {
        let output = self.pip(&["install", "--quiet", "--upgrade", spec])?;
        if !output.success() {
            return Err(DevupError::ToolUpgrade(format!(
                "{spec}: {}",
                output.failure_detail()
            )));
        }
        Ok(())
    }

    fn list_outdated(&self) -> Result<Vec<OutdatedPackage>> {
        let output = self.pip(&["list", "--outdated", "--format=json"])?;
        if !output.success() {
            return Err(DevupError::CommandExecution(format!(
                "Failed to list outdated packages: {}",
                output.failure_detail()
            )));
        }
        parse_outdated_json(&output.stdout)
    }
}

/// Turn a `pip check` result into diagnostic lines.
///
/// A failing check never yields an empty list, so a crash of the checker is
/// not mistaken for a consistent environment.
pub fn diagnostic_lines(output: &CommandOutput) -> Vec<String> {
    if output.success() {
        return Vec::new();
    }

    let collect = |text: &str| -> Vec<String> {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    };

    let mut lines = collect(&output.stdout);
    if lines.is_empty() {
        lines = collect(&output.stderr);
    }
    if lines.is_empty() {
        lines.push(format!("pip check failed with {}", output.exit_label()));
    }
    lines
}

/// Parse `pip list --outdated --format=json`
pub fn parse_outdated_json(json: &str) -> Result<Vec<OutdatedPackage>> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(json)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(code: i32, stdout: &str, stderr: &str) -> CommandOutput {
        CommandOutput {
            code: Some(code),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn clean_check_has_no_diagnostics() {
        let lines = diagnostic_lines(&output(0, "No broken requirements found.", ""));
        assert!(lines.is_empty());
    }

    #[test]
    fn failing_check_returns_non_empty_lines() {
        let lines = diagnostic_lines(&output(
            1,
            "a 1.0 has requirement b>=2, but you have b 1.0.\n\n  c 1.0 has requirement d<3, but you have d 3.1.\n",
            "",
        ));
        assert_eq!(
            lines,
            vec![
                "a 1.0 has requirement b>=2, but you have b 1.0.",
                "c 1.0 has requirement d<3, but you have d 3.1.",
            ]
        );
    }

    #[test]
    fn failing_check_without_output_is_never_empty() {
        let lines = diagnostic_lines(&output(2, "", ""));
        assert_eq!(lines, vec!["pip check failed with exit code 2"]);

        let lines = diagnostic_lines(&output(1, "", "No module named pip"));
        assert_eq!(lines, vec!["No module named pip"]);
    }

    #[test]
    fn parses_outdated_json() {
        let json = r#"[
            {"name": "requests", "version": "2.28.0", "latest_version": "2.32.3", "latest_filetype": "wheel"},
            {"name": "urllib3", "version": "1.26.18", "latest_version": "2.2.2", "latest_filetype": "wheel"}
        ]"#;
        let packages = parse_outdated_json(json).unwrap();
        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].name, "requests");
        assert_eq!(packages[0].current, "2.28.0");
        assert_eq!(packages[1].latest, "2.2.2");
    }

    #[test]
    fn empty_outdated_output_is_empty_list() {
        assert!(parse_outdated_json("").unwrap().is_empty());
        assert!(parse_outdated_json("[]").unwrap().is_empty());
        assert!(parse_outdated_json("not json").is_err());
    }

    /// Interpreter stand-in that records its arguments and exits with `code`
    #[cfg(unix)]
    fn recording_interpreter(dir: &std::path::Path, code: i32) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("python");
        let args = dir.join("args.txt");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\nprintf '%s\\n' \"$@\" > '{}'\necho 'resolver failed' >&2\nexit {code}\n",
                args.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    #[test]
    fn upgrade_passes_the_spec_through_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let python = recording_interpreter(dir.path(), 0);
        let pip = PipManager::new(python.display().to_string());

        pip.upgrade("requests[socks]<3,>=2.31").unwrap();

        let args = std::fs::read_to_string(dir.path().join("args.txt")).unwrap();
        assert_eq!(
            args.lines().collect::<Vec<_>>(),
            vec!["-m", "pip", "install", "--quiet", "--upgrade", "requests[socks]<3,>=2.31"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn failed_upgrade_reports_the_spec_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let python = recording_interpreter(dir.path(), 1);
        let pip = PipManager::new(python.display().to_string());

        match pip.upgrade("pkgB>=2.0") {
            Err(DevupError::ToolUpgrade(message)) => {
                assert_eq!(message, "pkgB>=2.0: resolver failed");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
