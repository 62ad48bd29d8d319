use crate::error::{DevupError, Result};
use jiff::Zoned;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

pub const LOG_FILE: &str = "devup.log";

/// Install the console and file subscribers; returns the run log path.
///
/// The console shows warnings unless `verbose` (or `RUST_LOG`) asks for
/// more. The file receives everything from INFO up and is truncated per run.
/// Without `log_dir`, or when the log cannot be created, only the console
/// layer is installed.
pub fn init(log_dir: Option<&Path>, verbose: bool) -> Result<Option<PathBuf>> {
    let (run_log, open_error) = match log_dir.map(open_run_log) {
        Some(Ok(run_log)) => (Some(run_log), None),
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    };
    let (log_path, file) = run_log.unzip();

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .with_filter(console_filter);

    let file_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let file_layer = file.map(|file| {
        fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_target(false)
            .with_filter(file_level)
    });

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| DevupError::Config(format!("Failed to initialise logging: {e}")))?;

    if let (Some(dir), Some(e)) = (log_dir, open_error) {
        warn!("Run log disabled, cannot write to {}: {e}", dir.display());
    }
    Ok(log_path)
}

/// Create `log_dir` and start a fresh run log with a timestamped header.
///
/// Returns the log path and an append handle for the file layer.
pub fn open_run_log(log_dir: &Path) -> Result<(PathBuf, File)> {
    fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join(LOG_FILE);
    let mut file = File::create(&log_path)?;
    writeln!(file, "# devup run started {}", timestamp())?;
    let append = OpenOptions::new().append(true).open(&log_path)?;
    Ok((log_path, append))
}

/// Append a titled block of text (e.g. a package listing) to the run log
pub fn append_section(log_path: &Path, title: &str, body: &str) -> Result<()> {
    let mut file = OpenOptions::new().append(true).create(true).open(log_path)?;
    writeln!(file, "\n# {title} ({})\n{}\n", timestamp(), body.trim_end())?;
    Ok(())
}

fn timestamp() -> String {
    Zoned::now().strftime("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn run_log_is_truncated_and_appendable() {
        let dir = tempdir().unwrap();
        let log_dir = dir.path().join("cache").join("logs");

        let (path, _) = open_run_log(&log_dir).unwrap();
        append_section(&path, "Installed packages", "pip 24.0\nrequests 2.32.3\n").unwrap();
        let first = fs::read_to_string(&path).unwrap();
        assert!(first.starts_with("# devup run started "));
        assert!(first.contains("# Installed packages ("));
        assert!(first.contains("requests 2.32.3"));

        let (again, _) = open_run_log(&log_dir).unwrap();
        assert_eq!(again, path);
        let second = fs::read_to_string(&path).unwrap();
        assert!(!second.contains("requests"));
    }

    #[test]
    fn unwritable_log_dir_is_reported_not_created() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("cache");
        fs::write(&blocker, "not a directory").unwrap();

        assert!(open_run_log(&blocker.join("logs")).is_err());
        assert!(blocker.is_file());
    }
}
