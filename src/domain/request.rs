use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A desired output profile for a request. Ordered; the index is stable and referenced by
/// [`crate::domain::Part`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetRendition {
    pub width: u32,
    pub height: u32,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
}

/// A logical user submission. Created once, never mutated.
#[derive(Debug, Clone)]
pub struct Request {
    pub correlation_id: Uuid,
    pub video_source: Option<String>,
    pub audio_source: Option<String>,
    pub destination: String,
    pub needed: DateTime<Utc>,
    pub enable_dash: bool,
    pub has_alternate_audio: bool,
    pub targets: Vec<TargetRendition>,
}

impl Request {
    /// The source audio should be read from for a given target (§4.2, audio pass): the
    /// alternate-audio source if declared, else the video source.
    pub fn audio_source_path(&self) -> Option<&str> {
        if self.has_alternate_audio {
            self.audio_source.as_deref()
        } else {
            self.video_source.as_deref().or(self.audio_source.as_deref())
        }
    }
}

/// A mux submission: mux one video track with one audio track into a container, with an
/// optional in-point offset.
#[derive(Debug, Clone)]
pub struct MuxRequest {
    pub video_source: String,
    pub audio_source: String,
    pub output_folder: String,
    pub destination_filename: String,
    pub needed: DateTime<Utc>,
    pub inpoint: Option<std::time::Duration>,
}
