//! Pure request → unit-job decomposition (§4.2). Given a validated request and probed media
//! metadata, produces the ordered job list and part manifest that `JobRepository::add_request`
//! persists atomically. Nothing here touches the filesystem or the repository — planning is a
//! pure function so its output is reproducible and independently testable.

use std::path::Path;

use uuid::Uuid;

use crate::config::Config;
use crate::domain::{JobKind, MuxRequest, NewJob, Part, Request, TargetRendition};
use crate::media_probe::ProbedMetadata;

/// Fixed chunk size for the video pass (§4.2).
const CHUNK_SECONDS: i64 = 60;

/// A job still missing the durable `id` the repository assigns on insert.
#[derive(Debug, Clone)]
pub struct PlannedJob {
    pub kind: JobKind,
    pub arguments: String,
    pub source: String,
    pub chunk_duration_seconds: Option<i64>,
}

impl From<PlannedJob> for NewJob {
    fn from(planned: PlannedJob) -> Self {
        NewJob {
            kind: planned.kind,
            arguments: planned.arguments,
            source: planned.source,
            chunk_duration_seconds: planned.chunk_duration_seconds,
        }
    }
}

/// Output of planning a (non-mux) request: the ordered job list and its part manifest.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub jobs: Vec<PlannedJob>,
    pub parts: Vec<Part>,
}

/// Splits a destination filename into `(folder, stem, extension)`, used both to lay out planned
/// chunk filenames and by [`crate::request_service`] to validate the destination folder exists.
pub(crate) fn split_destination(destination: &str) -> (String, String, String) {
    let path = Path::new(destination);
    let folder = path
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| ".".to_string());
    let prefix = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_else(|| ".mp4".to_string());
    (folder, prefix, extension)
}

fn format_chunk_start(start_seconds: i64) -> String {
    let h = start_seconds / 3600;
    let m = (start_seconds % 3600) / 60;
    let s = start_seconds % 60;
    format!("{h:02}:{m:02}:{s:02}")
}

/// Mux in-point formatting mirrors the source's default duration rendering: the hour component
/// is not zero-padded (so `5s` renders as `0:00:05`, not `00:00:05`), unlike chunk starts which
/// always use an explicit two-digit-hour format (§ open questions does not flag this, but the
/// two call sites are genuinely different formatters in the original).
fn format_inpoint(inpoint: std::time::Duration) -> String {
    let total = inpoint.as_secs() as i64;
    let h = total / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;
    format!("{h}:{m:02}:{s:02}")
}

/// Audio pass: one job per target, emitted before any video job (§4.2 rationale: audio jobs
/// cannot be chunked and so have the longest single-worker runtime per target).
fn plan_audio_pass(
    request: &Request,
    metadata: ProbedMetadata,
    folder: &str,
    prefix: &str,
) -> (Vec<PlannedJob>, Vec<Part>) {
    let audio_source = request
        .audio_source_path()
        .map(|s| s.to_string())
        .unwrap_or_default();

    let mut jobs = Vec::with_capacity(request.targets.len());
    let mut parts = Vec::with_capacity(request.targets.len());

    for (i, target) in request.targets.iter().enumerate() {
        let output = format!("{folder}/{prefix}_{i}_audio.mp4");

        parts.push(Part {
            correlation_id: request.correlation_id,
            target_index: i as u32,
            number: 0,
            filename: output.clone(),
        });

        let arguments = format!(
            "-y -i \"{audio_source}\" -c:a aac -b:a {}k -vn \"{output}\"",
            target.audio_bitrate_kbps
        );

        jobs.push(PlannedJob {
            kind: JobKind::Audio,
            arguments,
            source: audio_source.clone(),
            // The source records the video source's full duration here even though the job
            // reads `audio_source`; preserved as-is (see SPEC_FULL.md open questions).
            chunk_duration_seconds: Some(metadata.duration_seconds),
        });
    }

    (jobs, parts)
}

fn video_rendition_tail(
    target: &TargetRendition,
    chunk_filename: &str,
    framerate: f64,
    config: &Config,
    enable_dash: bool,
) -> String {
    let w = target.width;
    let h = target.height;
    let v = target.video_bitrate_kbps;

    if enable_dash {
        let gop = (framerate * 4.0).round() as i64;
        format!(
            "-s {w}x{h} -c:v libx264 -g {gop} -keyint_min {gop} -profile:v high -b:v {v}k -level 4.1 -pix_fmt yuv420p -an \"{chunk_filename}\""
        )
    } else if config.enable_crf {
        let bufsize = (v / 8) * CHUNK_SECONDS as u32;
        format!(
            "-s {w}x{h} -c:v libx264 -profile:v high -crf 18 -preset medium -maxrate {v}k -bufsize {bufsize}k -level 4.1 -pix_fmt yuv420p -an \"{chunk_filename}\""
        )
    } else {
        format!(
            "-s {w}x{h} -c:v libx264 -profile:v high -b:v {v}k -level 4.1 -pix_fmt yuv420p -an \"{chunk_filename}\""
        )
    }
}

/// Video pass: one job per 60-second chunk, each job emitting every target in a single
/// invocation (§4.2).
fn plan_video_pass(
    request: &Request,
    metadata: ProbedMetadata,
    config: &Config,
    folder: &str,
    prefix: &str,
    extension: &str,
) -> (Vec<PlannedJob>, Vec<Part>) {
    let Some(video_source) = request.video_source.as_deref() else {
        return (Vec::new(), Vec::new());
    };

    let mut jobs = Vec::new();
    let mut parts = Vec::new();

    let mut k: i64 = 0;
    while k * CHUNK_SECONDS < metadata.duration_seconds {
        let start = k * CHUNK_SECONDS;
        let mut arguments = format!(
            "-y -ss {} -t {CHUNK_SECONDS} -i \"{video_source}\"",
            format_chunk_start(start)
        );

        for (j, target) in request.targets.iter().enumerate() {
            let chunk_filename = format!("{folder}/{prefix}_{j}_{start}{extension}");
            let tail = video_rendition_tail(
                target,
                &chunk_filename,
                metadata.framerate,
                config,
                request.enable_dash,
            );
            arguments.push(' ');
            arguments.push_str(&tail);

            parts.push(Part {
                correlation_id: request.correlation_id,
                target_index: j as u32,
                number: k as u32,
                filename: chunk_filename,
            });
        }

        jobs.push(PlannedJob {
            kind: JobKind::Video,
            arguments,
            source: video_source.to_string(),
            chunk_duration_seconds: Some(CHUNK_SECONDS),
        });

        k += 1;
    }

    (jobs, parts)
}

/// Decompose `request` into its unit jobs and part manifest.
pub fn plan(request: &Request, metadata: ProbedMetadata, config: &Config) -> Plan {
    let (folder, prefix, extension) = split_destination(&request.destination);

    let (mut jobs, mut parts) = plan_audio_pass(request, metadata, &folder, &prefix);
    let (video_jobs, video_parts) =
        plan_video_pass(request, metadata, config, &folder, &prefix, &extension);

    jobs.extend(video_jobs);
    parts.extend(video_parts);

    Plan { jobs, parts }
}

/// Plan a mux request: exactly one job, no parts (the mux output is the request's own
/// destination filename, not a planned fragment).
pub fn plan_mux(request: &MuxRequest, video_duration_seconds: i64) -> PlannedJob {
    let out = format!(
        "{}/{}",
        request.output_folder.trim_end_matches('/'),
        request.destination_filename
    );

    let mut arguments = String::new();
    if let Some(inpoint) = request.inpoint {
        arguments.push_str(&format!("-ss {} ", format_inpoint(inpoint)));
    }
    arguments.push_str(&format!(
        "-xerror -i \"{}\" -i \"{}\" -map 0:v:0 -map 1:a:0 -c copy -y \"{out}\"",
        request.video_source, request.audio_source
    ));

    PlannedJob {
        kind: JobKind::Mux,
        arguments,
        source: request.video_source.clone(),
        chunk_duration_seconds: Some(video_duration_seconds),
    }
}

/// Number of video chunks a duration decomposes into: `ceil(duration / CHUNK_SECONDS)`.
pub fn chunk_count(duration_seconds: i64) -> i64 {
    if duration_seconds <= 0 {
        0
    } else {
        duration_seconds.div_ceil(CHUNK_SECONDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn base_request(video_duration_targets: Vec<TargetRendition>) -> Request {
        Request {
            correlation_id: Uuid::nil(),
            video_source: Some("in.mp4".to_string()),
            audio_source: None,
            destination: "/dest/out.mp4".to_string(),
            needed: Utc::now(),
            enable_dash: false,
            has_alternate_audio: false,
            targets: video_duration_targets,
        }
    }

    fn one_target() -> TargetRendition {
        TargetRendition {
            width: 1280,
            height: 720,
            video_bitrate_kbps: 2000,
            audio_bitrate_kbps: 128,
        }
    }

    #[test]
    fn s1_audio_first_ordering() {
        let request = base_request(vec![one_target()]);
        let metadata = ProbedMetadata {
            duration_seconds: 180,
            framerate: 30.0,
        };
        let config = Config::default();

        let plan = plan(&request, metadata, &config);

        assert_eq!(plan.jobs.len(), 4);
        assert_eq!(plan.jobs[0].kind, JobKind::Audio);
        assert_eq!(plan.jobs[1].kind, JobKind::Video);
        assert_eq!(plan.jobs[2].kind, JobKind::Video);
        assert_eq!(plan.jobs[3].kind, JobKind::Video);

        assert!(plan.jobs[1].arguments.contains("-ss 00:00:00"));
        assert!(plan.jobs[2].arguments.contains("-ss 00:01:00"));
        assert!(plan.jobs[3].arguments.contains("-ss 00:02:00"));

        assert_eq!(plan.parts.len(), 4);
        assert!(plan.parts[0].filename.ends_with("out_0_audio.mp4"));
        assert!(plan.parts[1].filename.ends_with("out_0_0.mp4"));
        assert!(plan.parts[2].filename.ends_with("out_0_60.mp4"));
        assert!(plan.parts[3].filename.ends_with("out_0_120.mp4"));
    }

    #[test]
    fn audio_job_chunk_duration_mirrors_video_source_duration() {
        let request = base_request(vec![one_target()]);
        let metadata = ProbedMetadata {
            duration_seconds: 180,
            framerate: 30.0,
        };
        let config = Config::default();

        let plan = plan(&request, metadata, &config);

        let audio_job = plan.jobs.iter().find(|j| j.kind == JobKind::Audio).unwrap();
        assert_eq!(audio_job.chunk_duration_seconds, Some(180));
    }

    #[test]
    fn s2_crf_mode_tail() {
        let request = base_request(vec![one_target()]);
        let metadata = ProbedMetadata {
            duration_seconds: 180,
            framerate: 30.0,
        };
        let config = Config {
            enable_crf: true,
            ..Config::default()
        };

        let plan = plan(&request, metadata, &config);
        let video_job = &plan.jobs[1];
        assert!(video_job.arguments.contains("-crf 18 -preset medium -maxrate 2000k -bufsize 15000k"));
    }

    #[test]
    fn s3_dash_mode_with_framerate_25() {
        let mut request = base_request(vec![one_target()]);
        request.enable_dash = true;
        let metadata = ProbedMetadata {
            duration_seconds: 60,
            framerate: 25.0,
        };
        let config = Config {
            enable_crf: true, // DASH must win over CRF regardless of this flag
            ..Config::default()
        };

        let plan = plan(&request, metadata, &config);
        let video_job = &plan.jobs[1];
        assert!(video_job.arguments.contains("-g 100 -keyint_min 100"));
        assert!(!video_job.arguments.contains("-crf"));
    }

    #[test]
    fn s4_mux_with_inpoint() {
        let request = MuxRequest {
            video_source: "v.mp4".to_string(),
            audio_source: "a.aac".to_string(),
            output_folder: "/out".to_string(),
            destination_filename: "final.mp4".to_string(),
            needed: Utc::now(),
            inpoint: Some(std::time::Duration::from_secs(5)),
        };

        let job = plan_mux(&request, 120);

        assert_eq!(
            job.arguments,
            "-ss 0:00:05 -xerror -i \"v.mp4\" -i \"a.aac\" -map 0:v:0 -map 1:a:0 -c copy -y \"/out/final.mp4\""
        );
    }

    #[test]
    fn mux_without_inpoint_omits_ss() {
        let request = MuxRequest {
            video_source: "v.mp4".to_string(),
            audio_source: "a.aac".to_string(),
            output_folder: "/out".to_string(),
            destination_filename: "final.mp4".to_string(),
            needed: Utc::now(),
            inpoint: None,
        };
        let job = plan_mux(&request, 120);
        assert!(!job.arguments.starts_with("-ss"));
        assert!(job.arguments.starts_with("-xerror"));
    }

    #[test]
    fn last_chunk_t_is_never_shortened() {
        let request = base_request(vec![one_target()]);
        // 190s duration: 4 chunks (0, 60, 120, 180), last one only 10s long on disk but -t
        // must still read 60, per the documented "let the encoder clip at EOS" behaviour.
        let metadata = ProbedMetadata {
            duration_seconds: 190,
            framerate: 30.0,
        };
        let config = Config::default();
        let plan = plan(&request, metadata, &config);

        let video_jobs: Vec<_> = plan.jobs.iter().filter(|j| j.kind == JobKind::Video).collect();
        assert_eq!(video_jobs.len(), 4);
        for job in &video_jobs {
            assert!(job.arguments.contains(&format!("-t {CHUNK_SECONDS}")));
        }
    }

    #[test]
    fn multi_target_chunk_emits_all_targets_in_one_job() {
        let targets = vec![
            one_target(),
            TargetRendition {
                width: 640,
                height: 360,
                video_bitrate_kbps: 800,
                audio_bitrate_kbps: 96,
            },
        ];
        let request = base_request(targets);
        let metadata = ProbedMetadata {
            duration_seconds: 60,
            framerate: 30.0,
        };
        let config = Config::default();
        let plan = plan(&request, metadata, &config);

        // 2 audio jobs + 1 video job (single chunk, both targets in one invocation).
        assert_eq!(plan.jobs.len(), 3);
        let video_job = plan.jobs.iter().find(|j| j.kind == JobKind::Video).unwrap();
        assert!(video_job.arguments.contains("1280x720"));
        assert!(video_job.arguments.contains("640x360"));
        assert_eq!(plan.parts.len(), 2 + 2);
    }

    #[test]
    fn chunk_count_matches_ceiling_division() {
        assert_eq!(chunk_count(180), 3);
        assert_eq!(chunk_count(190), 4);
        assert_eq!(chunk_count(60), 1);
        assert_eq!(chunk_count(0), 0);
    }

    #[test]
    fn job_and_part_counts_match_s8_property_1() {
        let targets = vec![
            one_target(),
            TargetRendition {
                width: 640,
                height: 360,
                video_bitrate_kbps: 800,
                audio_bitrate_kbps: 96,
            },
        ];
        let config = Config::default();

        for duration_seconds in [60, 180, 190, 1] {
            let request = base_request(targets.clone());
            let metadata = ProbedMetadata {
                duration_seconds,
                framerate: 30.0,
            };
            let plan = plan(&request, metadata, &config);

            let expected_jobs = targets.len() as i64 + chunk_count(duration_seconds);
            let expected_parts = targets.len() as i64 * (1 + chunk_count(duration_seconds));
            assert_eq!(plan.jobs.len() as i64, expected_jobs, "duration {duration_seconds}");
            assert_eq!(plan.parts.len() as i64, expected_parts, "duration {duration_seconds}");
        }
    }
}
