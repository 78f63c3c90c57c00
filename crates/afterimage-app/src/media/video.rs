//! Video pre-decode via ffmpeg subprocess (feature-gated behind `video`).
//!
//! - `ffprobe` probes metadata (dimensions, fps, duration) synchronously at load time
//! - `ffmpeg -f rawvideo -pix_fmt rgba` decodes all frames to memory in one pass
//! - Returns `MediaSource::Animated`, so playback is plain forward-only frame stepping
//! - RAM cost: ~3.7MB per frame at 1280x720

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::OnceLock;

use super::decoder::MediaSource;
use super::types::{DecodedFrame, MediaError};

/// Maximum video duration (seconds) we'll pre-decode. Beyond this, reject.
pub const MAX_PREDECODE_SECS: f64 = 60.0;

/// Check if ffmpeg/ffprobe are available on the system. Cached per process.
pub fn ffmpeg_available() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(|| {
        Command::new("ffprobe")
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    })
}

/// Video metadata from ffprobe.
#[derive(Debug, Clone)]
pub struct VideoMeta {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub duration_secs: f64,
}

/// Probe, check limits and pre-decode a video file.
pub fn load_video(path: &Path) -> Result<MediaSource, MediaError> {
    if !ffmpeg_available() {
        return Err(MediaError::NotPlayable(
            "ffmpeg/ffprobe not found on PATH".to_string(),
        ));
    }
    let meta = probe_video(path)?;
    if meta.duration_secs > MAX_PREDECODE_SECS {
        return Err(MediaError::NotPlayable(format!(
            "video is {:.0}s long, limit is {MAX_PREDECODE_SECS:.0}s",
            meta.duration_secs
        )));
    }
    let (frames, delays_ms) = decode_all_frames(path, &meta)?;
    Ok(MediaSource::Animated { frames, delays_ms })
}

/// Probe video metadata using ffprobe.
pub fn probe_video(path: &Path) -> Result<VideoMeta, MediaError> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .map_err(|e| MediaError::Load {
            path: path.to_path_buf(),
            reason: format!("ffprobe failed to execute: {e}"),
        })?;

    if !output.status.success() {
        return Err(MediaError::Load {
            path: path.to_path_buf(),
            reason: "ffprobe returned non-zero exit code".to_string(),
        });
    }

    let json: serde_json::Value = serde_json::from_slice(&output.stdout)
        .map_err(|e| MediaError::Decode(format!("bad ffprobe JSON: {e}")))?;
    parse_probe(&json)
}

fn parse_probe(json: &serde_json::Value) -> Result<VideoMeta, MediaError> {
    let missing = |what: &str| MediaError::Decode(format!("ffprobe: {what}"));

    let video_stream = json["streams"]
        .as_array()
        .ok_or_else(|| missing("no streams"))?
        .iter()
        .find(|s| s["codec_type"].as_str() == Some("video"))
        .ok_or_else(|| missing("no video stream"))?;

    let width = video_stream["width"]
        .as_u64()
        .ok_or_else(|| missing("missing width"))? as u32;
    let height = video_stream["height"]
        .as_u64()
        .ok_or_else(|| missing("missing height"))? as u32;

    let fps = parse_frame_rate(video_stream["r_frame_rate"].as_str().unwrap_or("30/1"));

    let duration_secs = json["format"]["duration"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .or_else(|| {
            video_stream["duration"]
                .as_str()
                .and_then(|s| s.parse::<f64>().ok())
        })
        .unwrap_or(0.0);

    Ok(VideoMeta {
        width,
        height,
        fps,
        duration_secs,
    })
}

fn parse_frame_rate(rate: &str) -> f64 {
    if let Some((num, den)) = rate.split_once('/') {
        let n: f64 = num.parse().unwrap_or(30.0);
        let d: f64 = den.parse().unwrap_or(1.0);
        if d > 0.0 { n / d } else { 30.0 }
    } else {
        rate.parse().unwrap_or(30.0)
    }
}

/// Pre-decode all video frames via a single ffmpeg run.
pub fn decode_all_frames(
    path: &Path,
    meta: &VideoMeta,
) -> Result<(Vec<DecodedFrame>, Vec<u32>), MediaError> {
    let frame_size = (meta.width as usize) * (meta.height as usize) * 4;
    let delay_ms = (1000.0 / meta.fps).round() as u32;

    let est_frames = (meta.duration_secs * meta.fps).ceil() as usize;
    log::info!(
        "Pre-decoding video: ~{} frames, ~{}MB RAM",
        est_frames,
        (est_frames * frame_size) / (1024 * 1024),
    );

    let mut child = Command::new("ffmpeg")
        .args(["-i"])
        .arg(path)
        .args([
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            &format!("{}x{}", meta.width, meta.height),
            "-v",
            "quiet",
            "pipe:1",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| MediaError::Load {
            path: path.to_path_buf(),
            reason: format!("failed to spawn ffmpeg: {e}"),
        })?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| MediaError::Decode("ffmpeg: no stdout pipe".to_string()))?;

    let mut frames = Vec::with_capacity(est_frames);
    let mut delays_ms = Vec::with_capacity(est_frames);
    let mut buf = vec![0u8; frame_size];

    while stdout.read_exact(&mut buf).is_ok() {
        frames.push(DecodedFrame {
            data: buf.clone(),
            width: meta.width,
            height: meta.height,
        });
        delays_ms.push(delay_ms.max(1));
    }

    let _ = child.wait();

    if frames.is_empty() {
        return Err(MediaError::Decode("ffmpeg decoded zero frames".to_string()));
    }

    log::info!(
        "Decoded {} video frames ({}MB)",
        frames.len(),
        (frames.len() * frame_size) / (1024 * 1024),
    );

    Ok((frames, delays_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rate_fraction() {
        assert!((parse_frame_rate("30000/1001") - 29.97).abs() < 0.01);
        assert!((parse_frame_rate("25") - 25.0).abs() < 1e-9);
        assert!((parse_frame_rate("1/0") - 30.0).abs() < 1e-9);
    }

    #[test]
    fn probe_json_parsed() {
        let json = serde_json::json!({
            "streams": [
                {"codec_type": "audio"},
                {"codec_type": "video", "width": 640, "height": 360, "r_frame_rate": "24/1"}
            ],
            "format": {"duration": "12.5"}
        });
        let meta = parse_probe(&json).unwrap();
        assert_eq!((meta.width, meta.height), (640, 360));
        assert!((meta.fps - 24.0).abs() < 1e-9);
        assert!((meta.duration_secs - 12.5).abs() < 1e-9);
    }

    #[test]
    fn probe_without_video_stream_fails() {
        let json = serde_json::json!({"streams": [{"codec_type": "audio"}]});
        assert!(matches!(parse_probe(&json), Err(MediaError::Decode(_))));
    }
}
