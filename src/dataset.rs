use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Result, PertitleError};
use crate::metadata::{or_unknown, EncodeMetadata, MediaProbe, UNKNOWN};

/// Column names, in file order.
pub const COLUMNS: [&str; 26] = [
    "s_name",
    "s_width",
    "s_height",
    "s_size",
    "s_duration",
    "s_scan_type",
    "s_content_type",
    "e_width",
    "e_height",
    "e_aspect_ratio",
    "e_pixel_aspect_ratio",
    "e_codec",
    "e_codec_profile",
    "e_codec_level",
    "e_framerate",
    "e_gop_size",
    "e_b_frame_int",
    "e_scan_type",
    "e_bit_depth",
    "e_pixel_fmt",
    "e_bitrate",
    "e_max_bitrate",
    "e_buffer_size",
    "e_size",
    "e_duration",
    "t_vmaf",
];

/// One dataset line: source probe, reparsed encode settings, output probe
/// and quality score, all rendered as text with `-` for unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetRow {
    pub s_name: String,
    pub s_width: String,
    pub s_height: String,
    pub s_size: String,
    pub s_duration: String,
    pub s_scan_type: String,
    pub s_content_type: String,
    pub e_width: String,
    pub e_height: String,
    pub e_aspect_ratio: String,
    pub e_pixel_aspect_ratio: String,
    pub e_codec: String,
    pub e_codec_profile: String,
    pub e_codec_level: String,
    pub e_framerate: String,
    pub e_gop_size: String,
    pub e_b_frame_int: String,
    pub e_scan_type: String,
    pub e_bit_depth: String,
    pub e_pixel_fmt: String,
    pub e_bitrate: String,
    pub e_max_bitrate: String,
    pub e_buffer_size: String,
    pub e_size: String,
    pub e_duration: String,
    pub t_vmaf: String,
}

/// Where a source video came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub name: String,
    pub content_type: String,
}

impl DatasetRow {
    pub fn assemble(
        source_info: &SourceInfo,
        source: &MediaProbe,
        encode: &EncodeMetadata,
        output: &MediaProbe,
        vmaf: Option<f64>,
    ) -> Self {
        // Width/height come from the command; the output probe fills in
        // profiles that never set -s.
        let width = encode.width.or(output.width);
        let height = encode.height.or(output.height);

        Self {
            s_name: source_info.name.clone(),
            s_width: or_unknown(&source.width),
            s_height: or_unknown(&source.height),
            s_size: or_unknown(&source.size_bytes),
            s_duration: or_unknown(&source.duration_seconds),
            s_scan_type: or_unknown(&source.scan_type),
            s_content_type: source_info.content_type.clone(),
            e_width: or_unknown(&width),
            e_height: or_unknown(&height),
            e_aspect_ratio: or_unknown(&encode.aspect_ratio),
            e_pixel_aspect_ratio: encode.pixel_aspect_ratio.clone(),
            e_codec: or_unknown(&encode.codec),
            e_codec_profile: or_unknown(&encode.codec_profile),
            e_codec_level: or_unknown(&encode.codec_level),
            e_framerate: or_unknown(&encode.framerate),
            e_gop_size: or_unknown(&encode.gop_size),
            e_b_frame_int: or_unknown(&encode.b_frame_interval),
            e_scan_type: encode.scan_type.clone(),
            e_bit_depth: encode.bit_depth.to_string(),
            e_pixel_fmt: or_unknown(&encode.pixel_format),
            e_bitrate: or_unknown(&encode.bitrate),
            e_max_bitrate: or_unknown(&encode.max_bitrate),
            e_buffer_size: or_unknown(&encode.buffer_size),
            e_size: or_unknown(&output.size_bytes),
            e_duration: or_unknown(&output.duration_seconds),
            t_vmaf: or_unknown(&vmaf),
        }
    }

    pub fn values(&self) -> [&str; 26] {
        [
            self.s_name.as_str(),
            self.s_width.as_str(),
            self.s_height.as_str(),
            self.s_size.as_str(),
            self.s_duration.as_str(),
            self.s_scan_type.as_str(),
            self.s_content_type.as_str(),
            self.e_width.as_str(),
            self.e_height.as_str(),
            self.e_aspect_ratio.as_str(),
            self.e_pixel_aspect_ratio.as_str(),
            self.e_codec.as_str(),
            self.e_codec_profile.as_str(),
            self.e_codec_level.as_str(),
            self.e_framerate.as_str(),
            self.e_gop_size.as_str(),
            self.e_b_frame_int.as_str(),
            self.e_scan_type.as_str(),
            self.e_bit_depth.as_str(),
            self.e_pixel_fmt.as_str(),
            self.e_bitrate.as_str(),
            self.e_max_bitrate.as_str(),
            self.e_buffer_size.as_str(),
            self.e_size.as_str(),
            self.e_duration.as_str(),
            self.t_vmaf.as_str(),
        ]
    }

    pub fn has_score(&self) -> bool {
        self.t_vmaf != UNKNOWN
    }

    pub fn to_csv_line(&self) -> String {
        csv_line(self.values())
    }
}

pub fn csv_header() -> String {
    csv_line(COLUMNS)
}

fn csv_line(fields: [&str; 26]) -> String {
    let mut line = fields.map(csv_escape).join(",");
    line.push('\n');
    line
}

fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Durable destination for dataset rows. Implementations serialize
/// concurrent appends themselves.
#[async_trait]
pub trait DatasetSink: Send + Sync {
    async fn append(&self, row: DatasetRow) -> Result<()>;
}

/// Appends rows to a CSV file, writing the header when the file is new.
pub struct CsvDatasetSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl CsvDatasetSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DatasetSink for CsvDatasetSink {
    async fn append(&self, row: DatasetRow) -> Result<()> {
        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let needs_header = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        };

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                PertitleError::Dataset(format!("Failed to open {}: {}", self.path.display(), e))
            })?;

        let mut content = String::new();
        if needs_header {
            content.push_str(&csv_header());
        }
        content.push_str(&row.to_csv_line());

        file.write_all(content.as_bytes()).await?;
        file.flush().await?;

        debug!("Saved dataset row for {} to {}", row.s_name, self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sample_row(vmaf: Option<f64>) -> DatasetRow {
        let source = MediaProbe {
            width: Some(1920),
            height: Some(1080),
            size_bytes: Some(1000),
            duration_seconds: Some(10.0),
            scan_type: Some("progressive".to_string()),
            container: Some("mov,mp4,m4a,3gp,3g2,mj2".to_string()),
        };
        let encode = crate::metadata::reparse("-c:v libx264 -s 1280x720 -b:v 3000k");
        let output = MediaProbe {
            size_bytes: Some(500),
            ..MediaProbe::unknown()
        };
        DatasetRow::assemble(
            &SourceInfo {
                name: "clip.mp4".to_string(),
                content_type: "sports".to_string(),
            },
            &source,
            &encode,
            &output,
            vmaf,
        )
    }

    #[test]
    fn test_assemble() {
        let row = sample_row(Some(92.345));
        assert_eq!(row.s_width, "1920");
        assert_eq!(row.s_duration, "10");
        assert_eq!(row.s_content_type, "sports");
        assert_eq!(row.e_width, "1280");
        assert_eq!(row.e_codec, "h264");
        assert_eq!(row.e_gop_size, "-");
        assert_eq!(row.e_bit_depth, "8");
        assert_eq!(row.e_size, "500");
        assert_eq!(row.e_duration, "-");
        assert_eq!(row.t_vmaf, "92.345");
        assert!(row.has_score());
        assert!(!sample_row(None).has_score());
    }

    #[test]
    fn test_width_falls_back_to_output_probe() {
        let encode = crate::metadata::reparse("-c:v libx264");
        let output = MediaProbe {
            width: Some(640),
            height: Some(360),
            ..MediaProbe::unknown()
        };
        let row = DatasetRow::assemble(
            &SourceInfo {
                name: "a.mp4".to_string(),
                content_type: "news".to_string(),
            },
            &MediaProbe::unknown(),
            &encode,
            &output,
            None,
        );
        assert_eq!((row.e_width.as_str(), row.e_height.as_str()), ("640", "360"));
        assert_eq!(row.s_width, "-");
    }

    #[test]
    fn test_csv_escaping() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("mov,mp4"), "\"mov,mp4\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert!(csv_header().starts_with("s_name,s_width,"));
        assert!(csv_header().ends_with("e_duration,t_vmaf\n"));
    }

    #[tokio::test]
    async fn test_csv_sink_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("dataset.csv");
        let sink = CsvDatasetSink::new(&path);

        sink.append(sample_row(Some(90.0))).await.unwrap();
        sink.append(sample_row(None)).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], csv_header().trim_end());
        assert!(lines[1].starts_with("clip.mp4,1920,1080,1000,10,progressive,sports,1280,720,"));
        assert!(lines[1].ends_with(",90"));
        assert!(lines[2].ends_with(",-"));
    }

    #[tokio::test]
    async fn test_csv_sink_concurrent_appends() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(CsvDatasetSink::new(dir.path().join("dataset.csv")));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let sink = sink.clone();
            handles.push(tokio::spawn(async move { sink.append(sample_row(Some(80.5))).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let content = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(content.lines().count(), 9);
        assert_eq!(content.matches("s_name").count(), 1);
    }
}
