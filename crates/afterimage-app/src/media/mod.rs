pub mod decoder;
pub mod letterbox;
pub mod playback;
pub mod types;
#[cfg(feature = "video")]
pub mod video;
#[cfg(feature = "webcam")]
pub mod webcam;
pub mod webcam_manager;

use std::path::{Path, PathBuf};

use wgpu::{Device, Queue};

use crate::gpu::frame_texture::FrameTexture;
use crate::gpu::render_target::TextureBinding;
use decoder::MediaSource;
use playback::{MediaClock, PlaybackMedium};
use types::MediaError;

/// Camera backend used by the application build.
#[cfg(feature = "webcam")]
pub type SystemCameraBackend = webcam::NokhwaBackend;
#[cfg(not(feature = "webcam"))]
pub type SystemCameraBackend = webcam_manager::NoCameraBackend;

#[cfg(feature = "webcam")]
pub fn system_camera_backend() -> SystemCameraBackend {
    webcam::NokhwaBackend
}

#[cfg(not(feature = "webcam"))]
pub fn system_camera_backend() -> SystemCameraBackend {
    webcam_manager::NoCameraBackend
}

/// A pre-decoded image/GIF/video source. Playback is forward-only through
/// [`MediaClock`]; loop modes are layered on top by the playback controller.
pub struct MediaLayer {
    pub source: MediaSource,
    pub file_path: PathBuf,
    clock: MediaClock,
    current_frame: usize,
    frame: FrameTexture,
    needs_upload: bool,
}

impl MediaLayer {
    /// Load from disk (retrying once) and upload the first frame.
    pub fn load(device: &Device, queue: &Queue, path: &Path) -> Result<Self, MediaError> {
        let source = decoder::load_media_with_retry(path)?;
        Ok(Self::new(device, queue, source, path.to_path_buf()))
    }

    pub fn new(device: &Device, queue: &Queue, source: MediaSource, file_path: PathBuf) -> Self {
        let (media_width, media_height) = source.dimensions();
        let file_name = file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        let clock = autoplay_clock(&source, &file_name);
        let frame = FrameTexture::new(device, media_width, media_height, "media-frame");
        if let Some(first) = source.frame(0) {
            frame.write(queue, &first.data, first.width, first.height);
        }

        let total_frames = source.frame_count();
        log::info!(
            "Media layer created: {file_name} {}x{}, {} frame{}",
            media_width,
            media_height,
            total_frames,
            if total_frames == 1 { "" } else { "s" }
        );

        Self {
            source,
            file_path,
            clock,
            current_frame: 0,
            frame,
            needs_upload: false,
        }
    }

    /// Advance playback by `dt_secs` of wall time.
    pub fn advance(&mut self, dt_secs: f64) {
        self.clock.advance(dt_secs);
        self.sync_frame();
    }

    /// Pick the frame for the clock's position; flags an upload on change.
    fn sync_frame(&mut self) {
        let index = self.source.frame_index_at(self.clock.current_time());
        if index != self.current_frame {
            self.current_frame = index;
            self.needs_upload = true;
        }
    }

    /// Upload the current frame to the GPU texture if it changed.
    pub fn upload_frame(&mut self, queue: &Queue) {
        if !self.needs_upload {
            return;
        }
        self.needs_upload = false;
        if let Some(frame) = self.source.frame(self.current_frame) {
            self.frame.write(queue, &frame.data, frame.width, frame.height);
        }
    }

    pub fn binding(&self) -> TextureBinding {
        self.frame.binding()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.source.dimensions()
    }
}

/// Clock for `source`, already playing when it animates. A source that
/// cannot play stays paused on its first frame.
fn autoplay_clock(source: &MediaSource, file_name: &str) -> MediaClock {
    let mut clock = MediaClock::new(source.duration_secs());
    if source.is_animated()
        && let Err(e) = clock.play()
    {
        log::warn!("{file_name} will not animate: {e}");
    }
    clock
}

impl PlaybackMedium for MediaLayer {
    fn current_time(&self) -> f64 {
        self.clock.current_time()
    }

    fn duration(&self) -> Option<f64> {
        self.clock.duration()
    }

    fn seek(&mut self, secs: f64) {
        self.clock.seek(secs);
        self.sync_frame();
    }

    fn play(&mut self) -> Result<(), MediaError> {
        self.clock.play()?;
        self.sync_frame();
        Ok(())
    }

    fn pause(&mut self) {
        self.clock.pause();
    }

    fn is_playing(&self) -> bool {
        self.clock.is_playing()
    }

    fn has_ended(&self) -> bool {
        self.clock.has_ended()
    }
}

#[cfg(test)]
mod tests {
    use super::types::DecodedFrame;
    use super::*;

    fn pixel() -> DecodedFrame {
        DecodedFrame {
            data: vec![0; 4],
            width: 1,
            height: 1,
        }
    }

    #[test]
    fn animated_source_autoplays() {
        let source = MediaSource::Animated {
            frames: vec![pixel(), pixel()],
            delays_ms: vec![100, 100],
        };
        let clock = autoplay_clock(&source, "clip.gif");
        assert!(clock.is_playing());
    }

    #[test]
    fn still_source_stays_paused() {
        let clock = autoplay_clock(&MediaSource::Static(pixel()), "still.png");
        assert!(!clock.is_playing());
        assert_eq!(clock.duration(), None);
    }

    #[test]
    fn zero_length_animation_stays_paused() {
        let source = MediaSource::Animated {
            frames: vec![pixel(), pixel()],
            delays_ms: vec![0, 0],
        };
        let mut clock = autoplay_clock(&source, "broken.gif");
        assert!(!clock.is_playing());
        clock.advance(1.0);
        assert_eq!(clock.current_time(), 0.0);
    }
}
