use serde::{Deserialize, Serialize};

/// Encode settings recovered from a compiled argument string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeMetadata {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub aspect_ratio: Option<String>,
    pub pixel_format: Option<String>,
    pub framerate: Option<String>,
    pub bitrate: Option<String>,
    pub max_bitrate: Option<String>,
    pub buffer_size: Option<String>,
    pub codec_profile: Option<String>,
    pub codec_level: Option<String>,
    pub b_frame_interval: Option<String>,
    pub gop_size: Option<u32>,
    pub codec: Option<String>,
    pub pixel_aspect_ratio: String,
    pub scan_type: String,
    pub bit_depth: u8,
}

impl Default for EncodeMetadata {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            aspect_ratio: None,
            pixel_format: None,
            framerate: None,
            bitrate: None,
            max_bitrate: None,
            buffer_size: None,
            codec_profile: None,
            codec_level: None,
            b_frame_interval: None,
            gop_size: None,
            codec: None,
            pixel_aspect_ratio: "1:1".to_string(),
            scan_type: "progressive".to_string(),
            bit_depth: 8,
        }
    }
}

/// Flags whose value is a colon-separated `key=value` codec parameter block.
const CODEC_PARAM_FLAGS: [&str; 4] = ["-x264opts", "-x264-params", "-x265-params", "-svtav1-params"];
const CODEC_FLAGS: [&str; 3] = ["-c:v", "-vcodec", "-codec:v"];

/// Recover encode settings from an encoder argument string.
///
/// Unknown tokens and malformed values are skipped. When a flag appears more
/// than once the last occurrence wins.
pub fn reparse(arguments: &str) -> EncodeMetadata {
    let tokens: Vec<&str> = arguments.split_whitespace().collect();
    let mut meta = EncodeMetadata::default();

    for (index, flag) in tokens.iter().enumerate() {
        let Some(value) = tokens.get(index + 1).copied() else {
            continue;
        };
        let text = || Some(value.to_string());

        match *flag {
            "-s" => {
                if let Some((width, height)) = parse_size(value) {
                    meta.width = Some(width);
                    meta.height = Some(height);
                }
            }
            "-aspect" => meta.aspect_ratio = text(),
            "-pix_fmt" => {
                meta.pixel_format = text();
                meta.bit_depth = bit_depth_of(value);
            }
            "-r" => meta.framerate = text(),
            "-b:v" => meta.bitrate = text(),
            "-maxrate" => meta.max_bitrate = text(),
            "-bufsize" => meta.buffer_size = text(),
            "-profile:v" => meta.codec_profile = text(),
            "-level" | "-level:v" => meta.codec_level = text(),
            "-bf" => meta.b_frame_interval = text(),
            "-g" => {
                if let Ok(gop) = value.parse() {
                    meta.gop_size = Some(gop);
                }
            }
            flag if CODEC_PARAM_FLAGS.contains(&flag) => {
                if let Some(gop) = keyint_of(value) {
                    meta.gop_size = Some(gop);
                }
            }
            flag if CODEC_FLAGS.contains(&flag) => meta.codec = Some(codec_family(value)),
            _ => {}
        }
    }

    meta
}

fn parse_size(value: &str) -> Option<(u32, u32)> {
    let (width, height) = value.split_once('x')?;
    Some((width.parse().ok()?, height.parse().ok()?))
}

fn keyint_of(block: &str) -> Option<u32> {
    block
        .split(':')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(key, _)| *key == "keyint")
        .filter_map(|(_, value)| value.parse().ok())
        .last()
}

/// Component depth from the trailing `p10le` / `p010` / `gray12` style
/// suffix of a pixel format name. Everything else is 8-bit.
fn bit_depth_of(pixel_format: &str) -> u8 {
    let name = pixel_format.trim().to_ascii_lowercase();
    let name = name
        .strip_suffix("le")
        .or_else(|| name.strip_suffix("be"))
        .unwrap_or(&name);

    let stem = name.trim_end_matches(|c: char| c.is_ascii_digit());
    let digits = &name[stem.len()..];
    let planar = stem.ends_with('p') || stem == "gray";

    match digits.parse::<u8>() {
        Ok(depth @ 9..=16) if planar => depth,
        _ => 8,
    }
}

/// Map an encoder name to the codec it produces.
pub fn codec_family(encoder: &str) -> String {
    let family = match encoder {
        "libx264" | "libopenh264" | "h264" => "h264",
        "libx265" | "hevc" => "h265",
        "libvpx-vp9" | "vp9" => "vp9",
        "libaom-av1" | "libsvtav1" | "librav1e" | "av1" => "av1",
        _ if encoder.starts_with("h264_") => "h264",
        _ if encoder.starts_with("hevc_") => "h265",
        _ if encoder.starts_with("vp9_") => "vp9",
        _ if encoder.starts_with("av1_") => "av1",
        other => other,
    };
    family.to_string()
}
