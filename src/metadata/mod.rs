// Metadata extraction
//
// - Probe: ffprobe output parsing into MediaProbe
// - Reparse: compiled argument strings back into EncodeMetadata
//
// Every operation here is best-effort: failures come back as
// Outcome::Degraded carrying the all-unknown probe.

pub mod probe;
pub mod reparse;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub use probe::*;
pub use reparse::*;

use crate::config::RetryPolicy;
use crate::error::Outcome;
use crate::media::{MediaCommandBuilder, ProcessExecutor};

pub struct MetadataExtractor {
    executor: Arc<dyn ProcessExecutor>,
    builder: MediaCommandBuilder,
    probe_timeout: Duration,
}

impl MetadataExtractor {
    pub fn new(
        executor: Arc<dyn ProcessExecutor>,
        builder: MediaCommandBuilder,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            executor,
            builder,
            probe_timeout,
        }
    }

    /// Probe a media file once. `label` only tags log lines (e.g. "source").
    pub async fn probe(&self, path: &Path, label: &str) -> Outcome<MediaProbe> {
        match self.try_probe(path).await {
            Ok(probe) => Outcome::Ok(probe),
            Err(reason) => {
                warn!("Probe of {} video {} failed: {}", label, path.display(), reason);
                Outcome::degraded(MediaProbe::unknown(), reason)
            }
        }
    }

    /// Probe a file that may not be visible yet, retrying per `policy`.
    pub async fn probe_with_retry(&self, path: &Path, policy: &RetryPolicy) -> Outcome<MediaProbe> {
        let attempts = policy.max_attempts.max(1);
        let mut last_reason = String::from("no attempt made");

        for attempt in 0..attempts {
            let delay = policy.delay_before(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match self.try_probe(path).await {
                Ok(probe) => {
                    if attempt > 0 {
                        debug!("Probe of {} succeeded on attempt {}", path.display(), attempt + 1);
                    }
                    return Outcome::Ok(probe);
                }
                Err(reason) => {
                    debug!("Attempt {} to probe {} failed: {}", attempt + 1, path.display(), reason);
                    last_reason = reason;
                }
            }
        }

        warn!(
            "Giving up on {} after {} attempt(s): {}",
            path.display(),
            attempts,
            last_reason
        );
        Outcome::degraded(
            MediaProbe::unknown(),
            format!("{} attempt(s) failed, last: {}", attempts, last_reason),
        )
    }

    async fn try_probe(&self, path: &Path) -> Result<MediaProbe, String> {
        let command = self.builder.probe(path).timeout(self.probe_timeout);
        let output = self
            .executor
            .execute(&command)
            .await
            .map_err(|e| e.to_string())?;
        parse_probe_json(&output.stdout).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backoff;
    use crate::error::PertitleError;
    use crate::media::{MockProcessExecutor, ToolOutput};
    use std::sync::atomic::{AtomicU32, Ordering};

    const VIDEO_JSON: &str = r#"{"streams":[{"codec_type":"video","width":1280,"height":720}],
        "format":{"size":"2048","duration":"4.000000"}}"#;

    fn stdout(json: &str) -> ToolOutput {
        ToolOutput {
            success: true,
            exit_code: Some(0),
            stdout: json.to_string(),
            stderr: String::new(),
        }
    }

    fn extractor(mock: MockProcessExecutor) -> MetadataExtractor {
        MetadataExtractor::new(
            Arc::new(mock),
            MediaCommandBuilder::new("ffmpeg", "ffprobe"),
            Duration::from_secs(5),
        )
    }

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Backoff::Fixed)
    }

    #[tokio::test]
    async fn test_probe_success() {
        let mut mock = MockProcessExecutor::new();
        mock.expect_execute()
            .withf(|cmd| cmd.binary_path == "ffprobe" && cmd.args.last().map(String::as_str) == Some("clip.mp4"))
            .times(1)
            .returning(|_| Ok(stdout(VIDEO_JSON)));

        let outcome = extractor(mock).probe(Path::new("clip.mp4"), "source").await;
        assert!(!outcome.is_degraded());
        assert_eq!(outcome.value().resolution(), Some((1280, 720)));
        assert_eq!(outcome.value().size_bytes, Some(2048));
    }

    #[tokio::test]
    async fn test_probe_failure_is_degraded() {
        let mut mock = MockProcessExecutor::new();
        mock.expect_execute()
            .times(1)
            .returning(|_| Err(PertitleError::Execution("ffprobe not found".to_string())));

        let outcome = extractor(mock).probe(Path::new("clip.mp4"), "source").await;
        assert!(outcome.is_degraded());
        assert_eq!(outcome.value(), &MediaProbe::unknown());
        assert!(outcome.reason().unwrap().contains("ffprobe not found"));
    }

    #[tokio::test]
    async fn test_probe_with_retry_gives_up_after_exact_attempts() {
        let mut mock = MockProcessExecutor::new();
        mock.expect_execute()
            .times(3)
            .returning(|_| Ok(stdout("")));

        let outcome = extractor(mock)
            .probe_with_retry(Path::new("missing.yuv"), &quick_policy(3))
            .await;

        assert!(outcome.is_degraded());
        assert_eq!(outcome.into_value(), MediaProbe::unknown());
    }

    #[tokio::test]
    async fn test_probe_with_retry_recovers() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let mut mock = MockProcessExecutor::new();
        mock.expect_execute().times(2).returning(move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(stdout(r#"{"streams":[]}"#))
            } else {
                Ok(stdout(VIDEO_JSON))
            }
        });

        let outcome = extractor(mock)
            .probe_with_retry(Path::new("late.yuv"), &quick_policy(5))
            .await;

        assert!(!outcome.is_degraded());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.value().duration_seconds, Some(4.0));
    }

    #[tokio::test]
    async fn test_probe_with_retry_zero_attempts_still_probes_once() {
        let mut mock = MockProcessExecutor::new();
        mock.expect_execute()
            .times(1)
            .returning(|_| Ok(stdout(VIDEO_JSON)));

        let outcome = extractor(mock)
            .probe_with_retry(Path::new("clip.yuv"), &quick_policy(0))
            .await;
        assert!(!outcome.is_degraded());
    }
}
