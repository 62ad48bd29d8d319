pub mod command_runner;
pub mod conflict_resolver;
pub mod global_tools;
pub mod node_runtime;
pub mod package_manager;
pub mod project_deps;
pub mod project_scanner;
pub mod python_env;
pub mod requirement;

#[cfg(test)]
pub mod testing;

pub use global_tools::GlobalToolsStage;
pub use node_runtime::NodeRuntimeStage;
pub use project_deps::ProjectDepsStage;
pub use project_scanner::{ProjectInfo, ProjectScannerAgent};
pub use python_env::PythonEnvStage;
