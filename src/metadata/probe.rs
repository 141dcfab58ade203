// Media probing using ffprobe JSON output

use serde::{Deserialize, Serialize};
use std::fmt;

/// Rendered in place of any value that could not be determined.
pub const UNKNOWN: &str = "-";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaProbe {
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Container size in bytes
    pub size_bytes: Option<u64>,
    pub duration_seconds: Option<f64>,
    pub scan_type: Option<String>,
    /// Container format name, e.g. `mov,mp4,m4a,3gp,3g2,mj2`
    pub container: Option<String>,
}

impl MediaProbe {
    /// Probe with every field unknown
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn resolution(&self) -> Option<(u32, u32)> {
        Some((self.width?, self.height?))
    }
}

/// Subset of `ffprobe -print_format json -show_format -show_streams`
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    field_order: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    size: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeParseError {
    Empty,
    Malformed(String),
    NoVideoStream,
}

impl fmt::Display for ProbeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeParseError::Empty => write!(f, "no output from probe"),
            ProbeParseError::Malformed(e) => write!(f, "unreadable probe output: {}", e),
            ProbeParseError::NoVideoStream => write!(f, "no video stream found"),
        }
    }
}

/// Parse ffprobe JSON, taking the first video stream.
pub fn parse_probe_json(json: &str) -> Result<MediaProbe, ProbeParseError> {
    if json.trim().is_empty() {
        return Err(ProbeParseError::Empty);
    }

    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| ProbeParseError::Malformed(e.to_string()))?;

    let video = output
        .streams
        .into_iter()
        .find(|stream| stream.codec_type.as_deref() == Some("video"))
        .ok_or(ProbeParseError::NoVideoStream)?;

    let format = output.format.unwrap_or_default();

    Ok(MediaProbe {
        width: video.width,
        height: video.height,
        size_bytes: format.size.as_deref().and_then(|s| s.trim().parse().ok()),
        duration_seconds: format.duration.as_deref().and_then(|s| s.trim().parse().ok()),
        scan_type: Some(video.field_order.unwrap_or_else(|| "progressive".to_string())),
        container: format.format_name,
    })
}

/// Display helper for optional probe fields
pub fn or_unknown<T: ToString>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| UNKNOWN.to_string())
}
