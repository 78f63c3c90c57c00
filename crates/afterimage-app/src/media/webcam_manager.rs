//! Reference-counted camera sharing.
//!
//! Every consumer asking for the same constraint signature shares one open
//! stream and one frame texture. Releasing the last reference schedules the
//! teardown after a grace window instead of closing the device right away,
//! so a consumer that remounts quickly gets the same stream back without a
//! device reopen.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

pub const DEFAULT_WIDTH: u32 = 1280;
pub const DEFAULT_HEIGHT: u32 = 720;
pub const DEFAULT_FPS: u32 = 30;
pub const DEFAULT_GRACE: Duration = Duration::from_secs(10);

/// Requested camera settings. Missing fields take the manager's defaults.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebcamConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<u32>,
}

/// Fallbacks for unspecified constraint fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebcamDefaults {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for WebcamDefaults {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fps: DEFAULT_FPS,
        }
    }
}

/// Fully resolved constraints; the sharing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstraintSignature {
    pub device_id: Option<String>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl WebcamConstraints {
    pub fn signature(&self, defaults: &WebcamDefaults) -> ConstraintSignature {
        ConstraintSignature {
            device_id: self.device_id.clone(),
            width: self.width.unwrap_or(defaults.width),
            height: self.height.unwrap_or(defaults.height),
            fps: self.fps.unwrap_or(defaults.fps),
        }
    }
}

impl std::fmt::Display for ConstraintSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}@{}x{}x{}",
            self.device_id.as_deref().unwrap_or("default"),
            self.width,
            self.height,
            self.fps
        )
    }
}

/// Opening a camera failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceAcquisitionError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("camera is in use by another application: {0}")]
    Busy(String),
    #[error("camera not found: {0}")]
    NotFound(String),
    #[error("failed to open camera: {0}")]
    Open(String),
    #[error("camera support is not compiled in (enable the `webcam` feature)")]
    Unavailable,
}

impl DeviceAcquisitionError {
    /// Sort a backend error message into the taxonomy.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("busy") || lower.contains("in use") {
            Self::Busy(message.to_string())
        } else if lower.contains("permission") || lower.contains("denied") {
            Self::PermissionDenied(message.to_string())
        } else if lower.contains("not found")
            || lower.contains("no such device")
            || lower.contains("no device")
        {
            Self::NotFound(message.to_string())
        } else {
            Self::Open(message.to_string())
        }
    }
}

/// A single decoded camera frame (RGBA8).
pub struct CameraFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// An open capture stream.
pub trait CameraStream {
    /// Resolution the device actually delivers.
    fn resolution(&self) -> (u32, u32);
    /// Latest frame since the last call, if any. Never blocks.
    fn try_recv_frame(&self) -> Option<CameraFrame>;
    /// Stop capturing and release the device.
    fn stop(&mut self);
}

/// Opens camera streams. Opening happens on the calling thread.
pub trait CameraBackend {
    type Stream: CameraStream;
    fn open(&mut self, signature: &ConstraintSignature)
    -> Result<Self::Stream, DeviceAcquisitionError>;
}

/// Backend used when camera support is compiled out.
pub struct NoCameraBackend;

/// Uninhabited: [`NoCameraBackend`] never opens anything.
pub enum NoStream {}

impl CameraStream for NoStream {
    fn resolution(&self) -> (u32, u32) {
        match *self {}
    }
    fn try_recv_frame(&self) -> Option<CameraFrame> {
        match *self {}
    }
    fn stop(&mut self) {
        match *self {}
    }
}

impl CameraBackend for NoCameraBackend {
    type Stream = NoStream;
    fn open(&mut self, _: &ConstraintSignature) -> Result<NoStream, DeviceAcquisitionError> {
        Err(DeviceAcquisitionError::Unavailable)
    }
}

pub type EntryId = u64;

/// Handle a consumer keeps while it holds a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebcamLease {
    pub id: EntryId,
    pub signature: ConstraintSignature,
}

struct WebcamEntry<S, T> {
    id: EntryId,
    stream: S,
    ref_count: u32,
    pending_stop: Option<Instant>,
    texture: Option<Arc<T>>,
}

/// Shares camera streams and their frame textures between consumers.
/// Generic over the texture type so tests can run without a GPU.
pub struct WebcamManager<B: CameraBackend, T> {
    backend: B,
    entries: FxHashMap<ConstraintSignature, WebcamEntry<B::Stream, T>>,
    next_id: EntryId,
    grace: Duration,
    defaults: WebcamDefaults,
}

impl<B: CameraBackend, T> WebcamManager<B, T> {
    pub fn new(backend: B, defaults: WebcamDefaults, grace: Duration) -> Self {
        Self {
            backend,
            entries: FxHashMap::default(),
            next_id: 1,
            grace,
            defaults,
        }
    }

    pub fn signature(&self, constraints: &WebcamConstraints) -> ConstraintSignature {
        constraints.signature(&self.defaults)
    }

    /// Take a reference. An existing entry is reused (and any pending
    /// teardown cancelled); otherwise the device is opened.
    pub fn retain(
        &mut self,
        constraints: &WebcamConstraints,
    ) -> Result<WebcamLease, DeviceAcquisitionError> {
        let signature = self.signature(constraints);

        if let Some(entry) = self.entries.get_mut(&signature) {
            entry.ref_count += 1;
            if entry.pending_stop.take().is_some() {
                log::debug!("Webcam {signature}: teardown cancelled by retain");
            }
            log::debug!("Webcam {signature}: retained (refs={})", entry.ref_count);
            return Ok(WebcamLease {
                id: entry.id,
                signature,
            });
        }

        let stream = self.backend.open(&signature)?;
        let id = self.next_id;
        self.next_id += 1;
        let (w, h) = stream.resolution();
        log::info!("Webcam {signature}: opened at {w}x{h} (entry {id})");
        self.entries.insert(
            signature.clone(),
            WebcamEntry {
                id,
                stream,
                ref_count: 1,
                pending_stop: None,
                texture: None,
            },
        );
        Ok(WebcamLease { id, signature })
    }

    #[cfg(test)]
    pub fn release(&mut self, constraints: &WebcamConstraints, now: Instant) -> bool {
        let signature = self.signature(constraints);
        self.release_signature(&signature, now)
    }

    /// Drop a reference. At zero, teardown is scheduled `grace` after `now`.
    /// Returns false when there was no reference to drop.
    pub fn release_signature(&mut self, signature: &ConstraintSignature, now: Instant) -> bool {
        let Some(entry) = self.entries.get_mut(signature) else {
            log::warn!("Webcam {signature}: release without a matching retain");
            return false;
        };
        if entry.ref_count == 0 {
            log::warn!("Webcam {signature}: release with no outstanding references");
            return false;
        }
        entry.ref_count -= 1;
        if entry.ref_count == 0 {
            entry.pending_stop = Some(now + self.grace);
            log::debug!(
                "Webcam {signature}: last reference released, teardown in {:.1}s",
                self.grace.as_secs_f64()
            );
        } else {
            log::debug!("Webcam {signature}: released (refs={})", entry.ref_count);
        }
        true
    }

    /// Tear down entries whose grace window has elapsed. Returns the
    /// signatures that were closed.
    pub fn poll(&mut self, now: Instant) -> Vec<ConstraintSignature> {
        let expired: Vec<ConstraintSignature> = self
            .entries
            .iter()
            .filter(|(_, e)| e.ref_count == 0 && e.pending_stop.is_some_and(|at| now >= at))
            .map(|(sig, _)| sig.clone())
            .collect();

        for signature in &expired {
            if let Some(mut entry) = self.entries.remove(signature) {
                entry.stream.stop();
                log::info!("Webcam {signature}: stream stopped (entry {})", entry.id);
            }
        }
        expired
    }

    /// Shared frame texture for an entry, created on first request at the
    /// stream's resolution. The same `Arc` is returned for the entry's lifetime.
    pub fn texture(
        &mut self,
        signature: &ConstraintSignature,
        create: impl FnOnce(u32, u32) -> T,
    ) -> Option<Arc<T>> {
        let entry = self.entries.get_mut(signature)?;
        if entry.texture.is_none() {
            let (w, h) = entry.stream.resolution();
            entry.texture = Some(Arc::new(create(w, h)));
        }
        entry.texture.clone()
    }

    /// Push the newest frame of every entry into its texture.
    pub fn pump_frames(&mut self, mut upload: impl FnMut(&T, &CameraFrame)) {
        for entry in self.entries.values() {
            let Some(texture) = &entry.texture else {
                continue;
            };
            if let Some(frame) = entry.stream.try_recv_frame() {
                upload(texture, &frame);
            }
        }
    }

    #[cfg(test)]
    pub fn ref_count(&self, signature: &ConstraintSignature) -> Option<u32> {
        self.entries.get(signature).map(|e| e.ref_count)
    }

    #[cfg(test)]
    pub fn has_pending_teardown(&self, signature: &ConstraintSignature) -> bool {
        self.entries
            .get(signature)
            .is_some_and(|e| e.pending_stop.is_some())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stop every stream immediately (application exit).
    pub fn shutdown(&mut self) {
        for (signature, mut entry) in self.entries.drain() {
            entry.stream.stop();
            log::info!("Webcam {signature}: stream stopped on shutdown");
        }
    }
}

impl<B: CameraBackend, T> Drop for WebcamManager<B, T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use crossbeam_channel::{Receiver, Sender};

    struct MockStream {
        resolution: (u32, u32),
        frames: Receiver<CameraFrame>,
        stopped: Arc<AtomicBool>,
    }

    impl CameraStream for MockStream {
        fn resolution(&self) -> (u32, u32) {
            self.resolution
        }
        fn try_recv_frame(&self) -> Option<CameraFrame> {
            let mut latest = None;
            while let Ok(frame) = self.frames.try_recv() {
                latest = Some(frame);
            }
            latest
        }
        fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct MockBackend {
        opens: Arc<AtomicUsize>,
        fail_with: Option<DeviceAcquisitionError>,
        stopped_flags: Vec<Arc<AtomicBool>>,
        frame_senders: Vec<Sender<CameraFrame>>,
    }

    impl CameraBackend for MockBackend {
        type Stream = MockStream;
        fn open(
            &mut self,
            signature: &ConstraintSignature,
        ) -> Result<MockStream, DeviceAcquisitionError> {
            if let Some(err) = &self.fail_with {
                return Err(err.clone());
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            let stopped = Arc::new(AtomicBool::new(false));
            let (tx, rx) = crossbeam_channel::unbounded();
            self.stopped_flags.push(stopped.clone());
            self.frame_senders.push(tx);
            Ok(MockStream {
                resolution: (signature.width, signature.height),
                frames: rx,
                stopped,
            })
        }
    }

    /// Stand-in texture: remembers its size and the frames written to it.
    struct FakeTexture {
        size: (u32, u32),
        writes: std::sync::Mutex<Vec<u32>>,
    }

    fn manager() -> (WebcamManager<MockBackend, FakeTexture>, Arc<AtomicUsize>) {
        let backend = MockBackend::default();
        let opens = backend.opens.clone();
        (
            WebcamManager::new(backend, WebcamDefaults::default(), DEFAULT_GRACE),
            opens,
        )
    }

    fn hd() -> WebcamConstraints {
        WebcamConstraints {
            device_id: None,
            width: Some(1280),
            height: Some(720),
            fps: Some(30),
        }
    }

    fn frame(tag: u8, w: u32, h: u32) -> CameraFrame {
        CameraFrame {
            data: vec![tag; (w * h * 4) as usize],
            width: w,
            height: h,
        }
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let sig = WebcamConstraints::default().signature(&WebcamDefaults::default());
        assert_eq!((sig.width, sig.height, sig.fps), (1280, 720, 30));
        assert_eq!(sig, hd().signature(&WebcamDefaults::default()));
    }

    #[test]
    fn constraints_wire_format() {
        let c: WebcamConstraints =
            serde_json::from_str(r#"{"deviceId":"cam-2","width":640}"#).unwrap();
        assert_eq!(c.device_id.as_deref(), Some("cam-2"));
        assert_eq!(c.width, Some(640));
        assert!(c.fps.is_none());
        assert_eq!(
            serde_json::to_string(&c).unwrap(),
            r#"{"deviceId":"cam-2","width":640}"#
        );
    }

    #[test]
    fn two_retains_one_release_keeps_entry_without_timer() {
        let (mut mgr, opens) = manager();
        let t0 = Instant::now();
        let a = mgr.retain(&hd()).unwrap();
        let b = mgr.retain(&hd()).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(opens.load(Ordering::SeqCst), 1);

        assert!(mgr.release(&hd(), t0));
        assert_eq!(mgr.ref_count(&a.signature), Some(1));
        assert!(!mgr.has_pending_teardown(&a.signature));
    }

    #[test]
    fn webcam_scenario_teardown_after_grace() {
        let (mut mgr, _) = manager();
        let t0 = Instant::now();
        let lease = mgr.retain(&hd()).unwrap();
        mgr.retain(&hd()).unwrap();
        mgr.release(&hd(), t0);
        assert!(!mgr.has_pending_teardown(&lease.signature));

        mgr.release(&hd(), t0);
        assert_eq!(mgr.ref_count(&lease.signature), Some(0));
        assert!(mgr.has_pending_teardown(&lease.signature));

        // Still inside the window
        assert!(mgr.poll(t0 + Duration::from_secs(9)).is_empty());
        assert_eq!(mgr.len(), 1);
        let stopped = mgr.backend.stopped_flags[0].clone();
        assert!(!stopped.load(Ordering::SeqCst));

        let closed = mgr.poll(t0 + Duration::from_secs(10));
        assert_eq!(closed, vec![lease.signature.clone()]);
        assert!(stopped.load(Ordering::SeqCst));
        assert!(mgr.is_empty());
        assert!(mgr.ref_count(&lease.signature).is_none());
    }

    #[test]
    fn retain_inside_grace_returns_same_entry_and_texture() {
        let (mut mgr, opens) = manager();
        let t0 = Instant::now();
        let first = mgr.retain(&hd()).unwrap();
        let tex_a = mgr
            .texture(&first.signature, |w, h| FakeTexture {
                size: (w, h),
                writes: Default::default(),
            })
            .unwrap();
        mgr.release(&hd(), t0);
        assert!(mgr.has_pending_teardown(&first.signature));

        let again = mgr.retain(&hd()).unwrap();
        assert_eq!(again.id, first.id);
        assert!(!mgr.has_pending_teardown(&first.signature));
        assert_eq!(opens.load(Ordering::SeqCst), 1);

        let tex_b = mgr
            .texture(&again.signature, |_, _| panic!("texture must be cached"))
            .unwrap();
        assert!(Arc::ptr_eq(&tex_a, &tex_b));
        assert_eq!(tex_b.size, (1280, 720));

        // Cancelled teardown never fires
        assert!(mgr.poll(t0 + Duration::from_secs(60)).is_empty());
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn retain_release_counts_commute() {
        let (mut mgr, opens) = manager();
        let t0 = Instant::now();
        let sig = mgr.signature(&hd());
        for _ in 0..5 {
            mgr.retain(&hd()).unwrap();
        }
        for i in 0..3 {
            mgr.release(&hd(), t0 + Duration::from_secs(i));
        }
        mgr.retain(&hd()).unwrap();
        assert_eq!(mgr.ref_count(&sig), Some(3));
        for _ in 0..3 {
            mgr.release(&hd(), t0);
        }
        assert_eq!(mgr.ref_count(&sig), Some(0));
        assert_eq!(mgr.len(), 1);
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn release_never_goes_negative() {
        let (mut mgr, _) = manager();
        let t0 = Instant::now();
        assert!(!mgr.release(&hd(), t0));
        let lease = mgr.retain(&hd()).unwrap();
        assert!(mgr.release(&hd(), t0));
        assert!(!mgr.release(&hd(), t0 + Duration::from_secs(5)));
        assert_eq!(mgr.ref_count(&lease.signature), Some(0));
        // The extra release didn't push the deadline back
        assert_eq!(mgr.poll(t0 + DEFAULT_GRACE).len(), 1);
    }

    #[test]
    fn different_signatures_open_separately() {
        let (mut mgr, opens) = manager();
        let small = WebcamConstraints {
            width: Some(640),
            height: Some(480),
            ..WebcamConstraints::default()
        };
        let a = mgr.retain(&hd()).unwrap();
        let b = mgr.retain(&small).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(opens.load(Ordering::SeqCst), 2);
        assert_eq!(mgr.len(), 2);
    }

    #[test]
    fn reopen_after_teardown_is_a_new_entry() {
        let (mut mgr, opens) = manager();
        let t0 = Instant::now();
        let first = mgr.retain(&hd()).unwrap();
        mgr.release(&hd(), t0);
        mgr.poll(t0 + DEFAULT_GRACE);
        let second = mgr.retain(&hd()).unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(opens.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn acquisition_error_propagates_and_leaves_no_entry() {
        let backend = MockBackend {
            fail_with: Some(DeviceAcquisitionError::Busy("OBS".into())),
            ..MockBackend::default()
        };
        let mut mgr: WebcamManager<MockBackend, FakeTexture> =
            WebcamManager::new(backend, WebcamDefaults::default(), DEFAULT_GRACE);
        let err = mgr.retain(&hd()).unwrap_err();
        assert!(matches!(err, DeviceAcquisitionError::Busy(_)));
        assert!(mgr.is_empty());
    }

    #[test]
    fn pump_frames_writes_latest_frame_only() {
        let (mut mgr, _) = manager();
        let small = WebcamConstraints {
            width: Some(2),
            height: Some(2),
            ..WebcamConstraints::default()
        };
        let lease = mgr.retain(&small).unwrap();
        let tex = mgr
            .texture(&lease.signature, |w, h| FakeTexture {
                size: (w, h),
                writes: Default::default(),
            })
            .unwrap();

        let tx = mgr.backend.frame_senders[0].clone();
        tx.send(frame(1, 2, 2)).unwrap();
        tx.send(frame(2, 2, 2)).unwrap();
        mgr.pump_frames(|t, f| t.writes.lock().unwrap().push(u32::from(f.data[0])));
        mgr.pump_frames(|t, f| t.writes.lock().unwrap().push(u32::from(f.data[0])));
        assert_eq!(*tex.writes.lock().unwrap(), vec![2]);
    }

    #[test]
    fn shutdown_stops_everything() {
        let (mut mgr, _) = manager();
        mgr.retain(&hd()).unwrap();
        let stopped = mgr.backend.stopped_flags[0].clone();
        mgr.shutdown();
        assert!(stopped.load(Ordering::SeqCst));
        assert!(mgr.is_empty());
    }

    #[test]
    fn classify_backend_messages() {
        assert!(matches!(
            DeviceAcquisitionError::classify("Device or resource busy"),
            DeviceAcquisitionError::Busy(_)
        ));
        assert!(matches!(
            DeviceAcquisitionError::classify("Permission denied (os error 13)"),
            DeviceAcquisitionError::PermissionDenied(_)
        ));
        assert!(matches!(
            DeviceAcquisitionError::classify("No such device"),
            DeviceAcquisitionError::NotFound(_)
        ));
        assert!(matches!(
            DeviceAcquisitionError::classify("unsupported format"),
            DeviceAcquisitionError::Open(_)
        ));
    }

    #[test]
    fn no_camera_backend_is_unavailable() {
        let mut mgr: WebcamManager<NoCameraBackend, FakeTexture> =
            WebcamManager::new(NoCameraBackend, WebcamDefaults::default(), DEFAULT_GRACE);
        assert_eq!(mgr.retain(&hd()), Err(DeviceAcquisitionError::Unavailable));
    }
}
