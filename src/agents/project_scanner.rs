use crate::error::{DevupError, Result};
use std::path::{Path, PathBuf};

/// ProjectScannerAgent locates the directories a run works against
pub struct ProjectScannerAgent {
    project_path: PathBuf,
}

impl ProjectScannerAgent {
    pub fn new<P: AsRef<Path>>(project_path: P) -> Self {
        Self {
            project_path: project_path.as_ref().to_path_buf(),
        }
    }

    /// Validates the project path and finds the workspace root and Node package root
    pub fn locate(&self) -> Result<ProjectInfo> {
        let project_path = self.project_path.canonicalize().map_err(|e| {
            DevupError::ProjectValidation(format!(
                "Invalid path '{}': {e}",
                self.project_path.display()
            ))
        })?;

        if !project_path.is_dir() {
            return Err(DevupError::ProjectValidation(format!(
                "Path '{}' is not a directory",
                project_path.display()
            )));
        }

        // The workspace root is marked by .gitignore
        let project_root =
            find_ancestor_with(&project_path, ".gitignore").unwrap_or_else(|| project_path.clone());
        let package_root = find_ancestor_with(&project_path, "package.json");

        Ok(ProjectInfo {
            project_path,
            project_root,
            package_root,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ProjectInfo {
    pub project_path: PathBuf,
    pub project_root: PathBuf,
    pub package_root: Option<PathBuf>,
}

impl ProjectInfo {
    pub fn default_log_dir(&self) -> PathBuf {
        self.project_root.join("cache").join("devup").join("logs")
    }
}

/// Walk upward from `start` to the first directory containing the file `marker`
pub fn find_ancestor_with(start: &Path, marker: &str) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(marker).is_file())
        .map(Path::to_path_buf)
}
