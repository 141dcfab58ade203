use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::QualityConfig;
use crate::error::Outcome;
use crate::media::{MediaCommandBuilder, ProcessExecutor};
use crate::metadata::MetadataExtractor;

/// Marker libvmaf prints in front of the pooled score
pub const SCORE_MARKER: &str = "VMAF score:";

/// Perceptual quality (VMAF) of an encoded file against its source.
///
/// Scoring is best-effort: every failure yields a degraded absent score and
/// never stops the pipeline.
pub struct QualityScorer {
    executor: Arc<dyn ProcessExecutor>,
    builder: MediaCommandBuilder,
    extractor: Arc<MetadataExtractor>,
    config: QualityConfig,
    timeout: Duration,
}

impl QualityScorer {
    pub fn new(
        executor: Arc<dyn ProcessExecutor>,
        builder: MediaCommandBuilder,
        extractor: Arc<MetadataExtractor>,
        config: QualityConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            executor,
            builder,
            extractor,
            config,
            timeout,
        }
    }

    pub async fn score(&self, source_path: &Path, encoded_path: &Path) -> Outcome<Option<f64>> {
        let source = self.extractor.probe(source_path, "source").await;
        let encoded = self.extractor.probe(encoded_path, "encoded").await;

        let (Some(source_res), Some(encoded_res)) =
            (source.value().resolution(), encoded.value().resolution())
        else {
            return absent("resolution unavailable for source or encoded video");
        };

        let filter = build_filter(source_res, encoded_res, &self.config);
        debug!("VMAF filter for {}: {}", encoded_path.display(), filter);

        let command = self
            .builder
            .vmaf(source_path, encoded_path, filter)
            .timeout(self.timeout);

        let output = match self.executor.execute(&command).await {
            Ok(output) => output,
            Err(e) => return absent(format!("VMAF run failed: {}", e)),
        };

        match parse_vmaf_score(&output.stderr) {
            Some(score) => Outcome::Ok(Some(score)),
            None => absent(format!(
                "no '{}' line in output (exit code {:?})",
                SCORE_MARKER, output.exit_code
            )),
        }
    }
}

fn absent<S: Into<String>>(reason: S) -> Outcome<Option<f64>> {
    let reason = reason.into();
    warn!("Error calculating VMAF: {}", reason);
    Outcome::degraded(None, reason)
}

/// libvmaf filter graph with the encoded stream (input 1) as distorted and
/// the source (input 0) as reference. A mismatched encode is scaled to the
/// source resolution first.
pub fn build_filter(source: (u32, u32), encoded: (u32, u32), config: &QualityConfig) -> String {
    let vmaf = format!(
        "libvmaf=model=version={}:n_threads={}",
        config.model, config.threads
    );

    if source == encoded {
        format!("[1][0]{}", vmaf)
    } else {
        format!(
            "[1]scale={}:{}:flags=bicubic[scaled];[scaled][0]{}",
            source.0, source.1, vmaf
        )
    }
}

/// First `VMAF score: <float>` found in ffmpeg's diagnostic output
pub fn parse_vmaf_score(stderr: &str) -> Option<f64> {
    stderr
        .lines()
        .find_map(|line| {
            let (_, tail) = line.split_once(SCORE_MARKER)?;
            tail.split_whitespace().next()?.parse::<f64>().ok()
        })
}
