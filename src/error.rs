use thiserror::Error;

#[derive(Error, Debug)]
pub enum DevupError {
    #[error("Missing prerequisite: {0}")]
    PrerequisiteMissing(String),

    #[error("Tool upgrade failed: {0}")]
    ToolUpgrade(String),

    #[error("Command execution failed: {0}")]
    CommandExecution(String),

    #[error(
        "Unable to resolve dependency conflicts after {passes} passes; remaining: {}",
        remaining.join("; ")
    )]
    ResolutionExhausted { passes: u32, remaining: Vec<String> },

    #[error("Unexpected consistency check output (no 'has requirement' lines):\n{0}")]
    UnrecognizedCheckOutput(String),

    #[error("Dependency conflicts remain:\n{0}")]
    ConsistencyCheck(String),

    #[error("Stage '{stage}' failed: {source}")]
    StageFailed {
        stage: String,
        #[source]
        source: Box<DevupError>,
    },

    #[error("Project validation failed: {0}")]
    ProjectValidation(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DevupError>;
