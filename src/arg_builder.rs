//! Pure, deterministic mapping from a structured parameter record to the argument list
//! `ffmpeg` is invoked with (§4.1). This is the interface contract between the server and the
//! external tool launcher running on each worker, so emission order is fixed and observable —
//! do not reorder anything here without updating the wire contract in lock-step.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSettings {
    pub codec: String,
    pub bitrate_bps: u64,
    #[serde(default = "default_preset")]
    pub preset: String,
    pub size: Option<FrameSize>,
}

fn default_preset() -> String {
    "medium".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSettings {
    pub codec: String,
    pub bitrate_bps: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeinterlaceMode {
    SendFrame,
    SendField,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeinterlaceParity {
    Auto,
    TopFirst,
    BottomFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeinterlaceSettings {
    pub mode: Option<DeinterlaceMode>,
    pub parity: Option<DeinterlaceParity>,
    pub all_frames: bool,
}

/// The structured parameter record `build_args` turns into an argument list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncodeParams {
    pub input: String,
    pub video: Option<VideoSettings>,
    pub audio: Option<AudioSettings>,
    pub deinterlace: Option<DeinterlaceSettings>,
}

impl DeinterlaceMode {
    fn code(self) -> i32 {
        match self {
            DeinterlaceMode::SendFrame => 0,
            DeinterlaceMode::SendField => 1,
        }
    }
}

impl DeinterlaceParity {
    fn code(self) -> i32 {
        match self {
            DeinterlaceParity::Auto => -1,
            DeinterlaceParity::TopFirst => 0,
            DeinterlaceParity::BottomFirst => 1,
        }
    }
}

fn bps_to_kbps(bitrate_bps: u64) -> u64 {
    bitrate_bps / 1000
}

/// Build the tokenized argument list for one `ffmpeg` invocation from `params`.
///
/// Total and deterministic: there is no failure mode, a record with neither video nor audio
/// settings and no deinterlace simply produces `["-i", "\"<input>\""]`.
pub fn build_args(params: &EncodeParams) -> Vec<String> {
    let mut args = Vec::new();

    args.push("-i".to_string());
    args.push(format!("\"{}\"", params.input));

    let deinterlace_ready = params
        .deinterlace
        .as_ref()
        .and_then(|d| Some((d.mode?, d.parity?, d.all_frames)));

    if let Some((mode, parity, all_frames)) = deinterlace_ready {
        let all = if all_frames { 1 } else { 0 };
        args.push("-filter_complex".to_string());
        args.push(format!(
            "\"yadif={}:{}:{}\"",
            mode.code(),
            parity.code(),
            all
        ));
    } else if let Some(size) = params.video.as_ref().and_then(|v| v.size) {
        args.push("-filter_complex".to_string());
        args.push(format!("\"scale={}:{}\"", size.width, size.height));
    }

    if let Some(video) = &params.video {
        args.push("-codec:v".to_string());
        args.push(video.codec.to_lowercase());
        args.push("-preset".to_string());
        args.push(video.preset.clone());
        args.push("-b:v".to_string());
        args.push(format!("{}k", bps_to_kbps(video.bitrate_bps)));
    }

    if let Some(audio) = &params.audio {
        args.push("-codec:a".to_string());
        args.push(audio.codec.to_lowercase());
        args.push("-b:a".to_string());
        args.push(format!("{}k", bps_to_kbps(audio.bitrate_bps)));
    }

    args
}

/// Render `build_args(params)` as a single space-joined string, the form persisted on a
/// [`crate::domain::Job`] and served across the HTTP boundary to workers.
pub fn to_arg_string(params: &EncodeParams) -> String {
    build_args(params).join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_only_record_emits_just_i() {
        let params = EncodeParams {
            input: "in.mp4".to_string(),
            ..Default::default()
        };
        assert_eq!(to_arg_string(&params), "-i \"in.mp4\"");
    }

    #[test]
    fn deinterlace_beats_scale_and_matches_s6() {
        let params = EncodeParams {
            input: "file".to_string(),
            video: None,
            audio: Some(AudioSettings {
                codec: "AAC".to_string(),
                bitrate_bps: 128_000,
            }),
            deinterlace: Some(DeinterlaceSettings {
                mode: Some(DeinterlaceMode::SendFrame),
                parity: Some(DeinterlaceParity::Auto),
                all_frames: true,
            }),
        };
        assert_eq!(
            to_arg_string(&params),
            "-i \"file\" -filter_complex \"yadif=0:-1:1\" -codec:a aac -b:a 128k"
        );
    }

    #[test]
    fn scale_used_when_no_deinterlace() {
        let params = EncodeParams {
            input: "in.mp4".to_string(),
            video: Some(VideoSettings {
                codec: "libx264".to_string(),
                bitrate_bps: 2_000_000,
                preset: "medium".to_string(),
                size: Some(FrameSize {
                    width: 1280,
                    height: 720,
                }),
            }),
            audio: None,
            deinterlace: None,
        };
        assert_eq!(
            to_arg_string(&params),
            "-i \"in.mp4\" -filter_complex \"scale=1280:720\" -codec:v libx264 -preset medium -b:v 2000k"
        );
    }

    #[test]
    fn deinterlace_wins_when_both_present() {
        let params = EncodeParams {
            input: "in.mp4".to_string(),
            video: Some(VideoSettings {
                codec: "libx264".to_string(),
                bitrate_bps: 2_000_000,
                preset: "medium".to_string(),
                size: Some(FrameSize {
                    width: 1280,
                    height: 720,
                }),
            }),
            audio: None,
            deinterlace: Some(DeinterlaceSettings {
                mode: Some(DeinterlaceMode::SendField),
                parity: Some(DeinterlaceParity::TopFirst),
                all_frames: false,
            }),
        };
        let s = to_arg_string(&params);
        assert!(s.contains("yadif=1:0:0"));
        assert!(!s.contains("scale="));
    }

    #[test]
    fn incomplete_deinterlace_falls_back_to_scale() {
        let params = EncodeParams {
            input: "in.mp4".to_string(),
            video: Some(VideoSettings {
                codec: "libx264".to_string(),
                bitrate_bps: 1_000_000,
                preset: "medium".to_string(),
                size: Some(FrameSize {
                    width: 640,
                    height: 480,
                }),
            }),
            audio: None,
            deinterlace: Some(DeinterlaceSettings {
                mode: Some(DeinterlaceMode::SendFrame),
                parity: None,
                all_frames: true,
            }),
        };
        assert!(to_arg_string(&params).contains("scale=640:480"));
    }

    #[test]
    fn bitrate_truncates_to_whole_kbps() {
        let params = EncodeParams {
            input: "in.mp4".to_string(),
            video: None,
            audio: Some(AudioSettings {
                codec: "aac".to_string(),
                bitrate_bps: 128_999,
            }),
            deinterlace: None,
        };
        assert_eq!(to_arg_string(&params), "-i \"in.mp4\" -codec:a aac -b:a 128k");
    }

    #[test]
    fn build_args_and_to_arg_string_share_tokens() {
        let params = EncodeParams {
            input: "in.mp4".to_string(),
            ..Default::default()
        };
        assert_eq!(build_args(&params).join(" "), to_arg_string(&params));
    }

    #[test]
    fn is_deterministic() {
        let params = EncodeParams {
            input: "a.mov".to_string(),
            video: Some(VideoSettings {
                codec: "libx264".to_string(),
                bitrate_bps: 3_500_000,
                preset: "slow".to_string(),
                size: None,
            }),
            audio: Some(AudioSettings {
                codec: "aac".to_string(),
                bitrate_bps: 192_000,
            }),
            deinterlace: None,
        };
        assert_eq!(to_arg_string(&params), to_arg_string(&params));
    }
}
