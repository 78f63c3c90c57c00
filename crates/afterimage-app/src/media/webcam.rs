use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{Receiver, Sender};
use nokhwa::Camera;
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, CameraInfo, FrameFormat, RequestedFormat,
    RequestedFormatType, Resolution,
};

use super::webcam_manager::{
    CameraBackend, CameraFrame, CameraStream, ConstraintSignature, DeviceAcquisitionError,
};

/// Opens cameras through nokhwa.
pub struct NokhwaBackend;

impl CameraBackend for NokhwaBackend {
    type Stream = WebcamCapture;

    fn open(
        &mut self,
        signature: &ConstraintSignature,
    ) -> Result<WebcamCapture, DeviceAcquisitionError> {
        let index = resolve_device(signature.device_id.as_deref())?;
        WebcamCapture::start(index, (signature.width, signature.height), signature.fps)
    }
}

/// Map a device id (index or human name) to a nokhwa index.
fn resolve_device(device_id: Option<&str>) -> Result<u32, DeviceAcquisitionError> {
    let Some(id) = device_id else {
        return Ok(0);
    };
    if let Ok(index) = id.parse::<u32>() {
        return Ok(index);
    }
    let devices = list_devices().map_err(|e| DeviceAcquisitionError::classify(&e))?;
    devices
        .iter()
        .find(|(_, name)| name == id)
        .map(|(idx, _)| *idx)
        .ok_or_else(|| DeviceAcquisitionError::NotFound(id.to_string()))
}

/// Cross-platform webcam capture running on a dedicated thread.
pub struct WebcamCapture {
    frame_rx: Receiver<CameraFrame>,
    shutdown: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
    pub device_name: String,
    pub resolution: (u32, u32),
}

fn requested_format(resolution: (u32, u32), fps: u32) -> RequestedFormat<'static> {
    RequestedFormat::new::<RgbAFormat>(RequestedFormatType::Closest(CameraFormat::new(
        Resolution::new(resolution.0, resolution.1),
        FrameFormat::MJPEG,
        fps,
    )))
}

impl WebcamCapture {
    /// Start capturing from the given camera index.
    /// Validates the camera can be opened before spawning the capture thread.
    pub fn start(
        device_index: u32,
        resolution: (u32, u32),
        fps: u32,
    ) -> Result<Self, DeviceAcquisitionError> {
        let (frame_tx, frame_rx) = crossbeam_channel::bounded(2);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let devices = list_devices().unwrap_or_default();
        let device_name = devices
            .iter()
            .find(|(idx, _)| *idx == device_index)
            .map(|(_, name)| name.clone())
            .unwrap_or_else(|| format!("Camera {device_index}"));

        // Camera is !Send: open on this thread to validate, close, and let
        // the capture thread reopen it.
        let actual_res = {
            let mut camera = Camera::new(
                CameraIndex::Index(device_index),
                requested_format(resolution, fps),
            )
            .map_err(|e| DeviceAcquisitionError::classify(&e.to_string()))?;

            camera
                .open_stream()
                .map_err(|e| DeviceAcquisitionError::classify(&e.to_string()))?;

            let r = camera.resolution();
            let res = (r.width(), r.height());
            let _ = camera.stop_stream();
            drop(camera);
            res
        };

        log::info!(
            "Webcam validated: {}x{} on device {device_index}",
            actual_res.0,
            actual_res.1
        );

        let handle = std::thread::Builder::new()
            .name("webcam-capture".into())
            .spawn(move || {
                if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    capture_thread(device_index, resolution, fps, &frame_tx, &shutdown_clone);
                })) {
                    let msg = if let Some(s) = e.downcast_ref::<&str>() {
                        (*s).to_string()
                    } else if let Some(s) = e.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        "unknown panic".into()
                    };
                    log::error!("Webcam capture thread panicked: {msg}");
                }
            })
            .map_err(|e| DeviceAcquisitionError::Open(format!("failed to spawn thread: {e}")))?;

        Ok(Self {
            frame_rx,
            shutdown,
            thread: Some(handle),
            device_name,
            resolution: actual_res,
        })
    }
}

impl CameraStream for WebcamCapture {
    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    /// Drain to the latest frame, dropping older ones.
    fn try_recv_frame(&self) -> Option<CameraFrame> {
        let mut latest = None;
        while let Ok(frame) = self.frame_rx.try_recv() {
            latest = Some(frame);
        }
        latest
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::warn!("Webcam '{}' capture thread panicked", self.device_name);
            } else {
                log::debug!("Webcam '{}' capture thread joined", self.device_name);
            }
        }
    }
}

impl Drop for WebcamCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// List available webcam devices. Returns Vec of (index, human_name).
pub fn list_devices() -> Result<Vec<(u32, String)>, String> {
    let cameras =
        nokhwa::query(ApiBackend::Auto).map_err(|e| format!("Failed to query cameras: {e}"))?;
    Ok(cameras
        .into_iter()
        .map(|info: CameraInfo| {
            let idx = match info.index() {
                CameraIndex::Index(i) => *i,
                CameraIndex::String(_) => 0,
            };
            (idx, info.human_name().to_string())
        })
        .collect())
}

fn capture_thread(
    device_index: u32,
    resolution: (u32, u32),
    fps: u32,
    frame_tx: &Sender<CameraFrame>,
    shutdown: &AtomicBool,
) {
    let mut camera = match Camera::new(
        CameraIndex::Index(device_index),
        requested_format(resolution, fps),
    ) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{}", DeviceAcquisitionError::classify(&e.to_string()));
            return;
        }
    };

    if let Err(e) = camera.open_stream() {
        log::error!("{}", DeviceAcquisitionError::classify(&e.to_string()));
        return;
    }

    let mut consecutive_panics: u32 = 0;
    const MAX_CONSECUTIVE_PANICS: u32 = 10;

    while !shutdown.load(Ordering::Relaxed) {
        match camera.frame() {
            Ok(buffer) => {
                let res = buffer.resolution();
                // decode_image can panic on corrupted MJPEG frames (libjpeg fatal error)
                let decoded = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    buffer.decode_image::<RgbAFormat>()
                }));
                match decoded {
                    Ok(Ok(img)) => {
                        consecutive_panics = 0;
                        let frame = CameraFrame {
                            data: img.into_raw(),
                            width: res.width(),
                            height: res.height(),
                        };
                        // Drop the frame if the render tick is behind
                        let _ = frame_tx.try_send(frame);
                    }
                    Ok(Err(e)) => {
                        log::warn!("Failed to decode webcam frame: {e}");
                    }
                    Err(_) => {
                        consecutive_panics += 1;
                        log::warn!(
                            "Skipped corrupted webcam frame ({consecutive_panics}/{MAX_CONSECUTIVE_PANICS})"
                        );
                        if consecutive_panics >= MAX_CONSECUTIVE_PANICS {
                            log::error!("Webcam producing only corrupted frames, stopping capture");
                            break;
                        }
                        std::thread::sleep(std::time::Duration::from_millis(50));
                    }
                }
            }
            Err(e) => {
                if !shutdown.load(Ordering::Relaxed) {
                    log::warn!("Webcam frame error: {e}");
                    std::thread::sleep(std::time::Duration::from_millis(10));
                }
            }
        }
    }

    let _ = camera.stop_stream();
    log::info!("Webcam capture stopped");
}
