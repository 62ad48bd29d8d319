pub mod progress;
pub mod shell;
