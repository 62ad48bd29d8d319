use crate::agents::{
    GlobalToolsStage, NodeRuntimeStage, ProjectDepsStage, ProjectInfo, PythonEnvStage, python_env,
};
use crate::cli::PythonArgs;
use crate::config::Settings;
use crate::error::{DevupError, Result};
use colored::Colorize;
use std::path::PathBuf;
use tracing::{error, info};

/// One top-level phase of a run
pub trait Stage {
    fn name(&self) -> &str;

    /// Run the stage to completion; any error aborts the whole pipeline
    fn run(&mut self) -> Result<()>;
}

/// Runs stages in order and stops at the first failure
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    pub fn run(&mut self) -> Result<()> {
        let total = self.stages.len();
        for (index, stage) in self.stages.iter_mut().enumerate() {
            let name = stage.name().to_string();
            println!(
                "\n{}",
                format!("Step {}/{} - {}", index + 1, total, name).cyan().bold()
            );
            info!(stage = %name, "stage started");

            if let Err(e) = stage.run() {
                error!(stage = %name, "stage failed: {e}");
                return Err(DevupError::StageFailed {
                    stage: name,
                    source: Box::new(e),
                });
            }
            info!(stage = %name, "stage completed");
        }
        Ok(())
    }
}

/// Everything a command needs once the project and settings are resolved
pub struct RunContext {
    pub project: ProjectInfo,
    pub settings: Settings,
    pub log_path: Option<PathBuf>,
}

impl RunContext {
    fn python_settings(&self, args: &PythonArgs) -> Result<Settings> {
        self.settings.clone().with_python_args(args)
    }
}

/// Global tools → Python environment → Node runtime → project dependencies
pub fn standard_stages(ctx: &RunContext, settings: Settings) -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(GlobalToolsStage::new(settings.clone())),
        Box::new(PythonEnvStage::new(settings.clone(), ctx.log_path.clone())),
        Box::new(NodeRuntimeStage::new(settings)),
        Box::new(ProjectDepsStage::new(ctx.project.package_root.clone())),
    ]
}

/// Run every stage in order
pub fn execute_all(ctx: &RunContext, python: &PythonArgs) -> Result<()> {
    println!("{}", "Starting workstation update...".cyan().bold());
    let settings = ctx.python_settings(python)?;
    Pipeline::new(standard_stages(ctx, settings)).run()?;
    println!("\n{}", "✨ All updates completed successfully!".green().bold());
    Ok(())
}

pub fn execute_global(ctx: &RunContext) -> Result<()> {
    run_single(GlobalToolsStage::new(ctx.settings.clone()))
}

pub fn execute_python(ctx: &RunContext, python: &PythonArgs) -> Result<()> {
    let settings = ctx.python_settings(python)?;
    run_single(PythonEnvStage::new(settings, ctx.log_path.clone()))
}

pub fn execute_runtime(ctx: &RunContext) -> Result<()> {
    run_single(NodeRuntimeStage::new(ctx.settings.clone()))
}

pub fn execute_project(ctx: &RunContext) -> Result<()> {
    run_single(ProjectDepsStage::new(ctx.project.package_root.clone()))
}

pub fn execute_resolve(ctx: &RunContext, python: &PythonArgs) -> Result<()> {
    println!("{}", "Resolving Python dependency conflicts...".cyan().bold());
    python_env::resolve_only(&ctx.python_settings(python)?)
}

pub fn execute_outdated(ctx: &RunContext, python: &PythonArgs) -> Result<()> {
    println!("{}", "Checking for outdated Python packages...".cyan().bold());
    python_env::report_outdated(&ctx.python_settings(python)?)
}

fn run_single<S: Stage + 'static>(stage: S) -> Result<()> {
    Pipeline::new(vec![Box::new(stage)]).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct RecordingStage {
        name: &'static str,
        fails: bool,
        log: Rc<RefCell<Vec<&'static str>>>,
    }

    impl Stage for RecordingStage {
        fn name(&self) -> &str {
            self.name
        }

        fn run(&mut self) -> Result<()> {
            self.log.borrow_mut().push(self.name);
            if self.fails {
                return Err(DevupError::ToolUpgrade(format!("{} broke", self.name)));
            }
            Ok(())
        }
    }

    fn pipeline(failing: Option<&'static str>) -> (Pipeline, Rc<RefCell<Vec<&'static str>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let stages = ["global", "python", "runtime", "project"]
            .into_iter()
            .map(|name| {
                Box::new(RecordingStage {
                    name,
                    fails: failing == Some(name),
                    log: Rc::clone(&log),
                }) as Box<dyn Stage>
            })
            .collect();
        (Pipeline::new(stages), log)
    }

    #[test]
    fn runs_all_stages_in_order() {
        let (mut pipeline, log) = pipeline(None);
        pipeline.run().unwrap();
        assert_eq!(*log.borrow(), vec!["global", "python", "runtime", "project"]);
    }

    #[test]
    fn stops_at_the_first_failing_stage() {
        let (mut pipeline, log) = pipeline(Some("python"));

        let err = pipeline.run().unwrap_err();

        assert_eq!(*log.borrow(), vec!["global", "python"]);
        match err {
            DevupError::StageFailed { stage, source } => {
                assert_eq!(stage, "python");
                assert!(matches!(*source, DevupError::ToolUpgrade(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn failure_message_names_the_stage() {
        let (mut pipeline, _) = pipeline(Some("global"));
        let message = pipeline.run().unwrap_err().to_string();
        assert_eq!(
            message,
            "Stage 'global' failed: Tool upgrade failed: global broke"
        );
    }

    #[test]
    fn empty_pipeline_succeeds() {
        assert!(Pipeline::new(Vec::new()).run().is_ok());
    }
}
