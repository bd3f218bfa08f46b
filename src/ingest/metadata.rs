//! Audio metadata extraction.
//!
//! Shells out to ffprobe for container/stream metadata. Extraction is a
//! pure function of the file content at call time: no retries here (retry
//! policy lives in the watcher) and no store access.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;

use crate::domain::AudioMetadata;

/// Errors that can occur while probing a file.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("audio file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to run ffprobe on {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ffprobe failed for {path}: {stderr}")]
    ProbeFailed { path: PathBuf, stderr: String },

    #[error("unparseable probe output for {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Probe result: stream/container metadata plus duration.
#[derive(Debug, Clone)]
pub struct ProbeData {
    pub metadata: AudioMetadata,
    pub duration: f64,
}

/// ffprobe JSON output (numeric fields arrive as strings).
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeFormat {
    #[serde(default)]
    format_name: String,
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    codec_name: String,
    channels: Option<u32>,
    sample_rate: Option<String>,
}

/// ffprobe-backed metadata extractor.
#[derive(Debug, Clone)]
pub struct MetadataExtractor {
    ffprobe_path: PathBuf,
}

impl MetadataExtractor {
    pub fn new(ffprobe_path: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
        }
    }

    /// Probe `path` and return its metadata.
    pub async fn extract(&self, path: &Path) -> Result<ProbeData, ExtractionError> {
        if !path.is_file() {
            return Err(ExtractionError::FileNotFound(path.to_path_buf()));
        }

        let output = Command::new(&self.ffprobe_path)
            .arg("-v")
            .arg("quiet")
            .arg("-print_format")
            .arg("json")
            .arg("-show_format")
            .arg("-show_streams")
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| ExtractionError::Spawn {
                path: path.to_path_buf(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ExtractionError::ProbeFailed {
                path: path.to_path_buf(),
                stderr,
            });
        }

        let probe: FfprobeOutput =
            serde_json::from_slice(&output.stdout).map_err(|source| ExtractionError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self::from_probe(probe))
    }

    fn from_probe(probe: FfprobeOutput) -> ProbeData {
        let stream = probe.streams.first();

        let metadata = AudioMetadata {
            format: probe.format.format_name.clone(),
            codec: stream.map(|s| s.codec_name.clone()).unwrap_or_default(),
            bitrate: probe.format.bit_rate.as_deref().and_then(|s| s.parse().ok()),
            channels: stream.and_then(|s| s.channels),
            sample_rate: stream
                .and_then(|s| s.sample_rate.as_deref())
                .and_then(|s| s.parse().ok()),
        };

        let duration = probe
            .format
            .duration
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0);

        ProbeData { metadata, duration }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe_output() {
        let json = r#"{
            "streams": [
                {"codec_name": "pcm_s16le", "channels": 2, "sample_rate": "44100"}
            ],
            "format": {
                "format_name": "wav",
                "duration": "12.480000",
                "bit_rate": "1411200"
            }
        }"#;

        let probe: FfprobeOutput = serde_json::from_str(json).unwrap();
        let data = MetadataExtractor::from_probe(probe);

        assert_eq!(data.metadata.format, "wav");
        assert_eq!(data.metadata.codec, "pcm_s16le");
        assert_eq!(data.metadata.channels, Some(2));
        assert_eq!(data.metadata.sample_rate, Some(44_100));
        assert_eq!(data.metadata.bitrate, Some(1_411_200));
        assert!((data.duration - 12.48).abs() < 1e-9);
    }

    #[test]
    fn test_parse_probe_output_missing_fields() {
        let json = r#"{"format": {"format_name": "wav"}}"#;

        let probe: FfprobeOutput = serde_json::from_str(json).unwrap();
        let data = MetadataExtractor::from_probe(probe);

        assert_eq!(data.metadata.codec, "");
        assert_eq!(data.metadata.channels, None);
        assert_eq!(data.duration, 0.0);
    }

    #[tokio::test]
    async fn test_missing_file_fails_fast() {
        let extractor = MetadataExtractor::new("ffprobe");
        let err = extractor
            .extract(Path::new("/no/such/file.wav"))
            .await
            .unwrap_err();

        assert!(matches!(err, ExtractionError::FileNotFound(_)));
    }
}
