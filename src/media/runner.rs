use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::compiler::CompiledCommand;
use crate::error::{Result, PertitleError};
use super::{MediaCommand, MediaCommandBuilder, ProcessExecutor};

/// Result of one encoder invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub success: bool,
    /// Captured stderr, or the reason the process could not run
    pub diagnostics: String,
}

/// Runs compiled encoder commands. Failures are reported, never retried.
pub struct InvocationRunner {
    executor: Arc<dyn ProcessExecutor>,
    builder: MediaCommandBuilder,
    timeout: Duration,
}

impl InvocationRunner {
    pub fn new(
        executor: Arc<dyn ProcessExecutor>,
        builder: MediaCommandBuilder,
        timeout: Duration,
    ) -> Self {
        Self {
            executor,
            builder,
            timeout,
        }
    }

    /// Full encoder invocation for `compiled`, writing to `output_path`
    pub fn encode_command(
        &self,
        input_path: &Path,
        compiled: &CompiledCommand,
        output_path: &Path,
    ) -> MediaCommand {
        self.builder
            .encode(input_path, compiled, output_path)
            .timeout(self.timeout)
    }

    pub async fn run(&self, command: &MediaCommand) -> RunReport {
        match self.executor.execute(command).await {
            Ok(output) if output.success => {
                info!("Successfully executed {}", command.description);
                RunReport {
                    success: true,
                    diagnostics: output.stderr,
                }
            }
            Ok(output) => {
                error!(
                    "{} failed with exit code {:?}: {}",
                    command.description,
                    output.exit_code,
                    output.stderr.trim()
                );
                RunReport {
                    success: false,
                    diagnostics: output.stderr,
                }
            }
            Err(e) => {
                error!("Error executing {}: {}", command.description, e);
                RunReport {
                    success: false,
                    diagnostics: e.to_string(),
                }
            }
        }
    }

    /// Check if the encoder binary is available
    pub async fn check_availability(&self) -> Result<String> {
        let command = self.builder.version_check().timeout(Duration::from_secs(30));
        let output = self.executor.execute(&command).await?;

        if output.success {
            let first_line = output.stdout.lines().next().unwrap_or("Unknown version");
            debug!("Encoder available: {}", first_line);
            Ok(first_line.to_string())
        } else {
            Err(PertitleError::Execution(format!(
                "Encoder version check failed: {}",
                output.stderr
            )))
        }
    }
}

/// `{stem}_encoded_{codec}_{profile}[_{bitrate}k].{ext}` inside `output_dir`
pub fn output_path(
    output_dir: &Path,
    source: &Path,
    compiled: &CompiledCommand,
    default_extension: &str,
) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "source".to_string());
    let bitrate = compiled
        .bitrate
        .map(|kbps| format!("_{}k", kbps))
        .unwrap_or_default();
    let extension = compiled
        .packaging
        .extension
        .as_deref()
        .unwrap_or(default_extension);

    output_dir.join(format!(
        "{}_encoded_{}_{}{}.{}",
        stem,
        clean_name(&compiled.codec),
        clean_name(&compiled.profile),
        bitrate,
        extension
    ))
}

fn clean_name(name: &str) -> String {
    name.replace([' ', '-'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{CommandCompiler, ProfileParam};
    use crate::ladder::{BitrateLadder, ResolutionClass};
    use crate::media::{MockProcessExecutor, ToolOutput};

    fn compiled(rates: Vec<u32>, extra: &[(&str, &str)]) -> Vec<CompiledCommand> {
        let mut ladder = BitrateLadder::new();
        ladder.insert("h264 master", ResolutionClass::P1080, rates);
        let mut params = vec![ProfileParam::new("-s", "1920x1080")];
        params.extend(extra.iter().map(|(k, v)| ProfileParam::new(*k, *v)));
        CommandCompiler::new(ladder).compile_profile("h264 master", "high-quality", &params)
    }

    fn runner(mock: MockProcessExecutor) -> InvocationRunner {
        InvocationRunner::new(
            Arc::new(mock),
            MediaCommandBuilder::new("ffmpeg", "ffprobe"),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn test_output_path_naming() {
        let dir = Path::new("data/e_video/sports");
        let source = Path::new("data/s_video/sports/match.mp4");

        let with_ladder = compiled(vec![3000], &[]);
        assert_eq!(
            output_path(dir, source, &with_ladder[0], "yuv"),
            dir.join("match_encoded_h264_master_high_quality_3000k.yuv")
        );

        let no_ladder = compiled(vec![], &[("-extention", "mp4")]);
        assert_eq!(
            output_path(dir, source, &no_ladder[0], "yuv"),
            dir.join("match_encoded_h264_master_high_quality.mp4")
        );
    }

    #[test]
    fn test_ladder_outputs_are_distinct() {
        let dir = Path::new("out");
        let source = Path::new("clip.mov");
        let commands = compiled(vec![1000, 2000, 3000], &[]);
        let mut paths: Vec<PathBuf> = commands
            .iter()
            .map(|c| output_path(dir, source, c, "yuv"))
            .collect();
        paths.dedup();
        assert_eq!(paths.len(), 3);
    }

    #[tokio::test]
    async fn test_run_reports_exit_status() {
        let mut mock = MockProcessExecutor::new();
        mock.expect_execute()
            .times(1)
            .returning(|_| {
                Ok(ToolOutput {
                    success: false,
                    exit_code: Some(1),
                    stdout: String::new(),
                    stderr: "Unknown encoder 'libx999'".to_string(),
                })
            });
        let runner = runner(mock);
        let command = runner.encode_command(
            Path::new("in.mp4"),
            &compiled(vec![3000], &[])[0],
            Path::new("out.yuv"),
        );

        let report = runner.run(&command).await;
        assert!(!report.success);
        assert!(report.diagnostics.contains("libx999"));
    }

    #[tokio::test]
    async fn test_run_timeout_is_failure() {
        let mut mock = MockProcessExecutor::new();
        mock.expect_execute()
            .withf(|cmd| cmd.timeout == Some(Duration::from_secs(60)))
            .times(1)
            .returning(|cmd| {
                Err(PertitleError::Timeout {
                    program: cmd.binary_path.clone(),
                    seconds: 60,
                })
            });
        let runner = runner(mock);
        let command = runner.encode_command(
            Path::new("in.mp4"),
            &compiled(vec![3000], &[])[0],
            Path::new("out.yuv"),
        );

        let report = runner.run(&command).await;
        assert!(!report.success);
        assert_eq!(report.diagnostics, "ffmpeg timed out after 60s");
    }

    #[tokio::test]
    async fn test_run_success() {
        let mut mock = MockProcessExecutor::new();
        mock.expect_execute().times(1).returning(|_| {
            Ok(ToolOutput {
                success: true,
                exit_code: Some(0),
                ..ToolOutput::default()
            })
        });
        let runner = runner(mock);
        let command = runner.encode_command(
            Path::new("in.mp4"),
            &compiled(vec![], &[])[0],
            Path::new("out.yuv"),
        );

        assert!(runner.run(&command).await.success);
    }
}
