use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tracing::debug;

use crate::compiler::CompiledCommand;
use crate::error::{Result, PertitleError};
use super::{ProcessExecutor, ToolOutput};

/// External command representation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub description: String,
    pub timeout: Option<Duration>,
}

impl MediaCommand {
    /// Create a new command
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
            timeout: None,
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Add input file
    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Add output file
    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Force overwrite output
    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    /// Select output muxer
    pub fn format<S: Into<String>>(self, format: S) -> Self {
        self.arg("-f").arg(format)
    }

    pub fn filter_complex<S: Into<String>>(self, filter: S) -> Self {
        self.arg("-filter_complex").arg(filter)
    }

    /// Decode and discard, keeping only side effects such as filter logs
    pub fn null_output(self) -> Self {
        self.format("null").arg("-")
    }

    /// Kill the process if it runs longer than `limit`
    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// Value following `flag`, if present
    pub fn arg_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|arg| arg == flag)
            .and_then(|index| self.args.get(index + 1))
            .map(String::as_str)
    }
}

impl fmt::Display for MediaCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.binary_path)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Executor backed by tokio child processes
pub struct SystemExecutor;

#[async_trait]
impl ProcessExecutor for SystemExecutor {
    async fn execute(&self, command: &MediaCommand) -> Result<ToolOutput> {
        debug!("Executing {}: {}", command.description, command);

        let mut cmd = tokio::process::Command::new(&command.binary_path);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let running = cmd.output();
        let output = match command.timeout {
            Some(limit) => tokio::time::timeout(limit, running).await.map_err(|_| {
                PertitleError::Timeout {
                    program: command.binary_path.clone(),
                    seconds: limit.as_secs(),
                }
            })?,
            None => running.await,
        }
        .map_err(|e| {
            PertitleError::Execution(format!("Failed to execute {}: {}", command.binary_path, e))
        })?;

        Ok(ToolOutput::from_output(output))
    }
}

/// Builder for the ffmpeg/ffprobe invocations the pipeline needs
#[derive(Debug, Clone)]
pub struct MediaCommandBuilder {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl MediaCommandBuilder {
    /// Create a new command builder
    pub fn new<S1: Into<String>, S2: Into<String>>(ffmpeg_path: S1, ffprobe_path: S2) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }

    /// `ffmpeg -y -i <input> <compiled args> [-f <format>] <output>`
    pub fn encode<P: AsRef<Path>>(
        &self,
        input_path: P,
        compiled: &CompiledCommand,
        output_path: P,
    ) -> MediaCommand {
        let cmd = MediaCommand::new(&self.ffmpeg_path, format!("Encode {}", compiled))
            .overwrite()
            .input(input_path)
            .args(compiled.arguments.iter().cloned());

        let cmd = match &compiled.packaging.format {
            Some(format) => cmd.format(format.clone()),
            None => cmd,
        };

        cmd.output(output_path)
    }

    /// Structured JSON description of streams and container
    pub fn probe<P: AsRef<Path>>(&self, path: P) -> MediaCommand {
        MediaCommand::new(&self.ffprobe_path, "Probe")
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .output(path)
    }

    /// VMAF comparison of `encoded` against `source`
    pub fn vmaf<P: AsRef<Path>, S: Into<String>>(
        &self,
        source_path: P,
        encoded_path: P,
        filter: S,
    ) -> MediaCommand {
        MediaCommand::new(&self.ffmpeg_path, "VMAF")
            .input(source_path)
            .input(encoded_path)
            .filter_complex(filter)
            .null_output()
    }

    /// Build version check command
    pub fn version_check(&self) -> MediaCommand {
        MediaCommand::new(&self.ffmpeg_path, "Version check")
            .arg("-version")
    }
}
