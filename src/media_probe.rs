//! `MediaProbe` collaborator: determines a source file's duration and framerate so the
//! [`crate::planner`] can turn a request into chunked jobs. The probe itself is implemented by
//! shelling out to `ffprobe`, the natural counterpart to the `ffmpeg` argument contract
//! `arg_builder` produces.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Duration/framerate metadata the planner needs. `duration_seconds` is truncated to whole
/// seconds per §4.2 ("the duration is the integer number of seconds").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbedMetadata {
    pub duration_seconds: i64,
    pub framerate: f64,
}

/// Abstraction over "inspect a media file for duration/framerate", so the planner and request
/// service never depend on `ffprobe` being on `PATH` directly (tests substitute a stub).
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn probe(&self, path: &str) -> Result<ProbedMetadata>;
}

/// Probes a file by invoking `ffprobe -print_format json -show_format -show_streams`.
#[cfg(feature = "ffprobe")]
pub struct FfprobeMediaProbe {
    binary: String,
}

#[cfg(feature = "ffprobe")]
impl FfprobeMediaProbe {
    pub fn new() -> Self {
        Self {
            binary: "ffprobe".to_string(),
        }
    }

    /// Use a non-default `ffprobe` binary (custom install path, or a test stub script).
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[cfg(feature = "ffprobe")]
impl Default for FfprobeMediaProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    r_frame_rate: Option<String>,
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    #[serde(default)]
    duration: Option<String>,
}

/// Parses `<num>/<den>` framerate strings (e.g. `"30000/1001"`) as ffprobe emits them.
fn parse_frame_rate(raw: &str) -> Option<f64> {
    let (num, den) = raw.split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if den == 0.0 { None } else { Some(num / den) }
}

fn parse_probe_json(raw: &str) -> Result<ProbedMetadata> {
    let parsed: FfprobeOutput = serde_json::from_str(raw)
        .map_err(|err| Error::ProbeFailed(format!("unparsable ffprobe output: {err}")))?;

    let video_stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));

    let framerate = video_stream
        .and_then(|s| s.r_frame_rate.as_deref())
        .and_then(parse_frame_rate)
        .ok_or_else(|| Error::ProbeFailed("no usable framerate in ffprobe output".to_string()))?;

    let duration_raw = video_stream
        .and_then(|s| s.duration.as_deref())
        .or_else(|| parsed.format.as_ref().and_then(|f| f.duration.as_deref()))
        .ok_or_else(|| Error::ProbeFailed("no duration in ffprobe output".to_string()))?;

    let duration_seconds = duration_raw
        .parse::<f64>()
        .map_err(|err| Error::ProbeFailed(format!("unparsable duration '{duration_raw}': {err}")))?
        .trunc() as i64;

    Ok(ProbedMetadata {
        duration_seconds,
        framerate,
    })
}

#[cfg(feature = "ffprobe")]
#[async_trait]
impl MediaProbe for FfprobeMediaProbe {
    async fn probe(&self, path: &str) -> Result<ProbedMetadata> {
        let output = tokio::process::Command::new(&self.binary)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
                path,
            ])
            .output()
            .await
            .map_err(|err| Error::ProbeFailed(format!("failed to run ffprobe: {err}")))?;

        if !output.status.success() {
            return Err(Error::ProbeFailed(format!(
                "ffprobe exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let raw = String::from_utf8_lossy(&output.stdout);
        parse_probe_json(&raw)
    }
}
