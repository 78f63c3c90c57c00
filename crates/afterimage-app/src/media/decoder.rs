use std::path::Path;

use super::types::{DecodedFrame, MediaError};

/// Decoded media source: either a static image or pre-decoded animation
/// frames (GIF, or video when the `video` feature is on).
pub enum MediaSource {
    /// Single static image.
    Static(DecodedFrame),
    /// Pre-decoded frames + frame delays in milliseconds.
    Animated {
        frames: Vec<DecodedFrame>,
        delays_ms: Vec<u32>,
    },
}

impl MediaSource {
    pub fn frame_count(&self) -> usize {
        match self {
            MediaSource::Static(_) => 1,
            MediaSource::Animated { frames, .. } => frames.len(),
        }
    }

    pub fn is_animated(&self) -> bool {
        matches!(self, MediaSource::Animated { .. })
    }

    /// Get frame dimensions.
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            MediaSource::Static(f) => (f.width, f.height),
            MediaSource::Animated { frames, .. } => {
                frames.first().map_or((1, 1), |f| (f.width, f.height))
            }
        }
    }

    /// Playable duration in seconds; `None` for stills.
    pub fn duration_secs(&self) -> Option<f64> {
        match self {
            MediaSource::Static(_) => None,
            MediaSource::Animated { delays_ms, .. } => {
                Some(delays_ms.iter().map(|&d| f64::from(d)).sum::<f64>() / 1000.0)
            }
        }
    }

    pub fn frame(&self, index: usize) -> Option<&DecodedFrame> {
        match self {
            MediaSource::Static(f) => Some(f),
            MediaSource::Animated { frames, .. } => frames.get(index.min(frames.len().saturating_sub(1))),
        }
    }

    /// Frame shown at `secs` into the animation.
    pub fn frame_index_at(&self, secs: f64) -> usize {
        match self {
            MediaSource::Static(_) => 0,
            MediaSource::Animated { delays_ms, .. } => frame_index_at(delays_ms, secs),
        }
    }
}

/// Walk the delay list to find the frame covering `secs`. Past the end
/// clamps to the last frame.
pub fn frame_index_at(delays_ms: &[u32], secs: f64) -> usize {
    let target_ms = secs * 1000.0;
    let mut accum = 0.0;
    for (i, &d) in delays_ms.iter().enumerate() {
        accum += f64::from(d);
        if accum > target_ms {
            return i;
        }
    }
    delays_ms.len().saturating_sub(1)
}

/// Load an image, animated GIF or (with `video`) a video file.
pub fn load_media(path: &Path) -> Result<MediaSource, MediaError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "gif" => load_gif(path),
        #[cfg(feature = "video")]
        "mp4" | "mov" | "webm" | "mkv" | "avi" => super::video::load_video(path),
        _ => load_static_image(path),
    }
}

/// Load with one retry. A second failure is returned to the caller.
pub fn load_media_with_retry(path: &Path) -> Result<MediaSource, MediaError> {
    retry_once(|| load_media(path), |e| {
        log::warn!("Media load failed, retrying once: {e}");
    })
}

pub(crate) fn retry_once<T, E>(
    mut attempt: impl FnMut() -> Result<T, E>,
    on_first_failure: impl FnOnce(&E),
) -> Result<T, E> {
    match attempt() {
        Ok(v) => Ok(v),
        Err(e) => {
            on_first_failure(&e);
            attempt()
        }
    }
}

fn load_error(path: &Path, reason: impl std::fmt::Display) -> MediaError {
    MediaError::Load {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Load a static image (PNG, JPEG, etc.) via the `image` crate.
fn load_static_image(path: &Path) -> Result<MediaSource, MediaError> {
    let img = image::open(path).map_err(|e| load_error(path, e))?;
    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();

    Ok(MediaSource::Static(DecodedFrame {
        data: rgba.into_raw(),
        width: w,
        height: h,
    }))
}

/// Load an animated GIF, pre-decoding all frames.
fn load_gif(path: &Path) -> Result<MediaSource, MediaError> {
    use std::fs::File;

    let file = File::open(path).map_err(|e| load_error(path, e))?;
    let mut decoder = gif::DecodeOptions::new();
    decoder.set_color_output(gif::ColorOutput::RGBA);
    let mut reader = decoder
        .read_info(file)
        .map_err(|e| MediaError::Decode(e.to_string()))?;

    let width = u32::from(reader.width());
    let height = u32::from(reader.height());

    let mut frames = Vec::new();
    let mut delays_ms = Vec::new();

    // GIF frames can be partial updates over the previous canvas
    let mut canvas = vec![0u8; (width * height * 4) as usize];

    while let Some(frame) = reader
        .read_next_frame()
        .map_err(|e| MediaError::Decode(e.to_string()))?
    {
        let delay = u32::from(frame.delay) * 10; // centiseconds
        delays_ms.push(delay.max(20));

        let fx = u32::from(frame.left);
        let fy = u32::from(frame.top);
        let fw = u32::from(frame.width);
        let fh = u32::from(frame.height);

        for y in 0..fh {
            for x in 0..fw {
                let src_idx = ((y * fw + x) * 4) as usize;
                let dst_x = fx + x;
                let dst_y = fy + y;
                if dst_x < width && dst_y < height {
                    let dst_idx = ((dst_y * width + dst_x) * 4) as usize;
                    let src = &frame.buffer[src_idx..src_idx + 4];
                    if src[3] > 0 {
                        canvas[dst_idx..dst_idx + 4].copy_from_slice(src);
                    }
                }
            }
        }

        frames.push(DecodedFrame {
            data: canvas.clone(),
            width,
            height,
        });
    }

    if frames.is_empty() {
        return Err(MediaError::Decode("GIF has no frames".to_string()));
    }

    log::info!("Loaded GIF: {}x{}, {} frames", width, height, frames.len());

    Ok(MediaSource::Animated { frames, delays_ms })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    fn animated(delays_ms: Vec<u32>) -> MediaSource {
        let frames = delays_ms
            .iter()
            .map(|_| DecodedFrame {
                data: vec![0; 4],
                width: 1,
                height: 1,
            })
            .collect();
        MediaSource::Animated { frames, delays_ms }
    }

    #[test]
    fn duration_sums_delays() {
        let src = animated(vec![100, 100, 300]);
        assert!(approx_eq(src.duration_secs().unwrap(), 0.5, 1e-9));
        assert!(src.is_animated());
    }

    #[test]
    fn frame_index_walks_delays() {
        let delays = [100, 100, 300];
        assert_eq!(frame_index_at(&delays, 0.0), 0);
        assert_eq!(frame_index_at(&delays, 0.15), 1);
        assert_eq!(frame_index_at(&delays, 0.2), 2);
        assert_eq!(frame_index_at(&delays, 9.0), 2);
    }

    #[test]
    fn static_has_no_duration() {
        let src = MediaSource::Static(DecodedFrame {
            data: vec![0; 4],
            width: 1,
            height: 1,
        });
        assert!(src.duration_secs().is_none());
        assert_eq!(src.frame_index_at(3.0), 0);
    }

    #[test]
    fn retry_once_recovers_from_transient_failure() {
        let mut calls = 0;
        let mut warned = false;
        let result: Result<u32, &str> = retry_once(
            || {
                calls += 1;
                if calls == 1 { Err("expired link") } else { Ok(7) }
            },
            |_| warned = true,
        );
        assert_eq!(result, Ok(7));
        assert_eq!(calls, 2);
        assert!(warned);
    }

    #[test]
    fn retry_once_gives_up_after_second_failure() {
        let mut calls = 0;
        let result: Result<u32, &str> = retry_once(
            || {
                calls += 1;
                Err("broken")
            },
            |_| {},
        );
        assert_eq!(result, Err("broken"));
        assert_eq!(calls, 2);
    }

    #[test]
    fn load_missing_file_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_media_with_retry(&dir.path().join("nope.png")).err().unwrap();
        assert!(matches!(err, MediaError::Load { .. }));
    }

    #[test]
    fn load_png_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.png");
        image::RgbaImage::from_pixel(3, 2, image::Rgba([255, 0, 0, 255]))
            .save(&path)
            .unwrap();
        let src = load_media(&path).unwrap();
        assert_eq!(src.dimensions(), (3, 2));
        assert_eq!(src.frame(0).unwrap().data.len(), 3 * 2 * 4);
    }
}
