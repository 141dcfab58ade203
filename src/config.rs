use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::error::{Result, PertitleError};

/// Raw ladder table as written in the config file: family -> class -> value.
///
/// Values are kept as untyped TOML so a single malformed bucket can be
/// rejected by [`crate::ladder::BitrateLadder`] without failing the whole file.
pub type RawLadder = BTreeMap<String, BTreeMap<String, toml::Value>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tools: ToolsConfig,
    pub retry: RetryPolicy,
    pub quality: QualityConfig,
    pub paths: PathsConfig,
    pub pipeline: PipelineConfig,
    pub ladder: RawLadder,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Path to the ffmpeg binary (encoding and VMAF)
    pub ffmpeg_path: String,
    /// Path to the ffprobe binary
    pub ffprobe_path: String,
    /// Upper bound for a single encode or VMAF run
    pub encode_timeout_secs: u64,
    /// Upper bound for a single ffprobe call
    pub probe_timeout_secs: u64,
}

/// Bounded retry used when probing freshly written output files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub delay_ms: u64,
    pub backoff: Backoff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backoff {
    /// Same delay between every attempt
    Fixed,
    /// Delay doubles after every failed attempt
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Compute VMAF for every encoded output
    pub enabled: bool,
    /// libvmaf model version
    pub model: String,
    /// libvmaf worker threads
    pub threads: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Source videos, one sub-directory per genre
    pub source_dir: PathBuf,
    /// Encoded outputs, mirrored per genre
    pub encoded_dir: PathBuf,
    /// Dataset CSV file
    pub dataset: PathBuf,
    /// Profile catalog file
    pub catalog: PathBuf,
    /// Rolling log directory
    pub log_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of (video, codec, profile) jobs processed concurrently
    pub jobs: usize,
    /// Output extension when a profile carries no `extension` parameter
    pub default_extension: String,
    /// Source file extensions picked up during discovery
    pub source_extensions: Vec<String>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            delay_ms: delay.as_millis() as u64,
            backoff,
        }
    }

    /// Delay to wait before the given zero-based attempt.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let base = Duration::from_millis(self.delay_ms);
        match self.backoff {
            Backoff::Fixed => base,
            Backoff::Exponential => base.saturating_mul(1u32 << (attempt - 1).min(16)),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            encode_timeout_secs: 4 * 60 * 60,
            probe_timeout_secs: 60,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1000,
            backoff: Backoff::Fixed,
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "vmaf_v0.6.1".to_string(),
            threads: 8,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from("data");
        Self {
            source_dir: data_dir.join("s_video"),
            encoded_dir: data_dir.join("e_video"),
            dataset: data_dir.join("dataset.csv"),
            catalog: PathBuf::from("catalog.toml"),
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            jobs: 1,
            default_extension: "yuv".to_string(),
            source_extensions: ["mp4", "mkv", "avi", "mov"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tools: ToolsConfig::default(),
            retry: RetryPolicy::default(),
            quality: QualityConfig::default(),
            paths: PathsConfig::default(),
            pipeline: PipelineConfig::default(),
            ladder: default_ladder(),
        }
    }
}

fn default_ladder() -> RawLadder {
    fn bucket(entries: &[(&str, &[i64])]) -> BTreeMap<String, toml::Value> {
        entries
            .iter()
            .map(|(class, rates)| {
                let rates = rates.iter().map(|r| toml::Value::Integer(*r)).collect();
                (class.to_string(), toml::Value::Array(rates))
            })
            .collect()
    }

    let mut ladder = RawLadder::new();
    ladder.insert(
        "h264 master".to_string(),
        bucket(&[
            ("2160p", &[12000, 16000, 20000]),
            ("1440p", &[8000, 10000, 12000]),
            ("1080p", &[3000, 4500, 6000]),
            ("720p", &[1500, 2500, 3500]),
            ("480p", &[800, 1200, 1600]),
            ("360p", &[400, 700, 1000]),
            ("240p", &[200, 350, 500]),
        ]),
    );
    ladder.insert(
        "h265 master".to_string(),
        bucket(&[
            ("2160p", &[8000, 11000, 14000]),
            ("1440p", &[5000, 7000, 9000]),
            ("1080p", &[2000, 3000, 4000]),
            ("720p", &[1000, 1700, 2400]),
            ("480p", &[500, 800, 1100]),
            ("360p", &[250, 450, 650]),
        ]),
    );
    ladder
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PertitleError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| PertitleError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| PertitleError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| PertitleError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    pub fn encode_timeout(&self) -> Duration {
        Duration::from_secs(self.tools.encode_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.tools.probe_timeout_secs)
    }
}
