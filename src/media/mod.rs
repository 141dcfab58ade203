// External tool execution
//
// This module wraps every external process the pipeline starts:
// - Commands: command representation and the ffmpeg/ffprobe command builders
// - Runner: encoder invocation with success/failure reporting

pub mod commands;
pub mod runner;

use async_trait::async_trait;
use std::sync::Arc;

pub use commands::*;
pub use runner::*;

use crate::error::Result;

/// Captured result of an external process that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn from_output(output: std::process::Output) -> Self {
        Self {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Runs external commands.
///
/// An `Err` means the process could not be run to completion (spawn failure
/// or timeout); a non-zero exit is an `Ok` with `success == false`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    async fn execute(&self, command: &MediaCommand) -> Result<ToolOutput>;
}

/// Factory for creating executor instances
pub struct ExecutorFactory;

impl ExecutorFactory {
    /// Create the default executor (tokio child processes)
    pub fn create_default() -> Arc<dyn ProcessExecutor> {
        Arc::new(SystemExecutor)
    }
}
