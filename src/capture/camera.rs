//! Live camera capture through V4L2
//!
//! A long-running `ffmpeg` process streams MJPEG frames from the device to stdout.
//! A reader thread splits that stream into JPEG frames and keeps the most recent
//! one, so `capture()` is a cheap synchronous sample of the live stream.

use parking_lot::{Condvar, Mutex};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{CaptureConfig, CaptureError, CaptureSource, CapturedFrame, FacingMode};

const SYSFS_VIDEO_DIR: &str = "/sys/class/video4linux";

/// A video capture device discovered on the system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoDevice {
    /// Device node, e.g. /dev/video0
    pub path: PathBuf,
    /// Numeric suffix of the device node
    pub index: u32,
    /// Driver-reported name
    pub name: String,
}

/// List V4L2 capture devices, ordered by device index
pub fn list_devices() -> Vec<VideoDevice> {
    let Ok(entries) = std::fs::read_dir(SYSFS_VIDEO_DIR) else {
        return Vec::new();
    };

    let mut devices: Vec<VideoDevice> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let node = entry.file_name().to_string_lossy().to_string();
            let index = node.strip_prefix("video")?.parse().ok()?;
            let name = std::fs::read_to_string(entry.path().join("name"))
                .map(|n| n.trim().to_string())
                .unwrap_or_else(|_| "Unknown".to_string());
            Some(VideoDevice {
                path: Path::new("/dev").join(&node),
                index,
                name,
            })
        })
        .collect();

    devices.sort_by_key(|d| d.index);
    devices
}

/// Pick the device matching the preferred facing, else the lowest-numbered one
pub fn select_device(devices: &[VideoDevice], facing: FacingMode) -> Option<&VideoDevice> {
    let hints = facing.name_hints();
    devices
        .iter()
        .find(|d| {
            let name = d.name.to_lowercase();
            hints.iter().any(|hint| name.contains(hint))
        })
        .or_else(|| devices.first())
}

/// Largest partial frame kept while waiting for its end marker
pub const MAX_FRAME_BYTES: usize = 32 * 1024 * 1024;

/// Splits a concatenated MJPEG byte stream into complete JPEG images
#[derive(Debug)]
pub struct JpegFrameSplitter {
    buffer: Vec<u8>,
    max_frame: usize,
}

impl Default for JpegFrameSplitter {
    fn default() -> Self {
        Self::with_limit(MAX_FRAME_BYTES)
    }
}

impl JpegFrameSplitter {
    const SOI: [u8; 2] = [0xFF, 0xD8];
    const EOI: [u8; 2] = [0xFF, 0xD9];

    pub fn new() -> Self {
        Self::default()
    }

    /// Splitter that discards a partial frame once it exceeds `max_frame` bytes
    pub fn with_limit(max_frame: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame,
        }
    }

    /// Feed bytes and return every frame completed by them
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        loop {
            let Some(start) = find_marker(&self.buffer, &Self::SOI, 0) else {
                // Nothing useful buffered; keep a trailing 0xFF in case a marker is split
                let keep = usize::from(self.buffer.last() == Some(&0xFF));
                self.buffer.drain(..self.buffer.len() - keep);
                break;
            };
            let Some(end) = find_marker(&self.buffer, &Self::EOI, start + 2) else {
                self.buffer.drain(..start);
                if self.buffer.len() > self.max_frame {
                    warn!(
                        "Discarding {} bytes of unterminated camera frame",
                        self.buffer.len()
                    );
                    self.buffer.clear();
                }
                break;
            };
            frames.push(self.buffer[start..end + 2].to_vec());
            self.buffer.drain(..end + 2);
        }
        frames
    }
}

fn find_marker(haystack: &[u8], marker: &[u8; 2], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(2)
        .position(|w| w == marker)
        .map(|pos| pos + from)
}

#[derive(Default)]
struct SlotState {
    latest: Option<Arc<Vec<u8>>>,
    ended: Option<String>,
}

/// Latest frame shared between the reader thread and `capture()`
#[derive(Default)]
struct FrameSlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

struct Grabber {
    child: Child,
    slot: Arc<FrameSlot>,
    reader: Option<JoinHandle<()>>,
}

/// Live camera source backed by an `ffmpeg` V4L2 grabber
pub struct CameraSource {
    config: CaptureConfig,
    device: Option<PathBuf>,
    grabber: Option<Grabber>,
}

impl CameraSource {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            device: None,
            grabber: None,
        }
    }

    fn resolve_device(&self) -> Result<PathBuf, CaptureError> {
        if let Some(device) = &self.config.device {
            return Ok(device.clone());
        }
        let devices = list_devices();
        select_device(&devices, self.config.facing)
            .map(|d| {
                debug!("Auto-selected camera {} ({})", d.path.display(), d.name);
                d.path.clone()
            })
            .ok_or_else(|| CaptureError::DeviceNotFound("no V4L2 devices present".to_string()))
    }

    fn spawn_grabber(&self, device: &Path) -> Result<Grabber, CaptureError> {
        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(["-hide_banner", "-loglevel", "error", "-f", "v4l2", "-i"])
            .arg(device)
            .args(["-f", "image2pipe", "-vcodec", "mjpeg", "-q:v", "2", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => CaptureError::BackendUnavailable(format!(
                    "{} not found (install ffmpeg)",
                    self.config.ffmpeg_path.display()
                )),
                _ => CaptureError::Io(e),
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::StreamUnavailable("grabber has no stdout".to_string()))?;

        let slot = Arc::new(FrameSlot::default());
        let reader_slot = slot.clone();
        let reader = match std::thread::Builder::new()
            .name("camera-reader".to_string())
            .spawn(move || read_frames(stdout, reader_slot))
        {
            Ok(handle) => handle,
            Err(e) => {
                // Child does not kill itself on drop and would keep the device open
                reap(&mut child);
                return Err(CaptureError::Io(e));
            }
        };

        Ok(Grabber {
            child,
            slot,
            reader: Some(reader),
        })
    }

    fn wait_for_frame(&self, slot: &FrameSlot) -> Result<Arc<Vec<u8>>, CaptureError> {
        let deadline = Instant::now() + Duration::from_millis(self.config.first_frame_timeout_ms);
        let mut state = slot.state.lock();
        loop {
            if let Some(reason) = &state.ended {
                return Err(CaptureError::StreamUnavailable(reason.clone()));
            }
            if let Some(frame) = &state.latest {
                return Ok(frame.clone());
            }
            if slot.ready.wait_until(&mut state, deadline).timed_out() {
                return Err(CaptureError::StreamUnavailable(
                    "timed out waiting for the first frame".to_string(),
                ));
            }
        }
    }
}

/// Kill the grabber and collect its exit status
fn reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!("Camera grabber already gone: {}", e);
    }
    let _ = child.wait();
}

fn read_frames(mut stdout: ChildStdout, slot: Arc<FrameSlot>) {
    let mut splitter = JpegFrameSplitter::new();
    let mut buf = vec![0u8; 64 * 1024];

    let reason = loop {
        match stdout.read(&mut buf) {
            Ok(0) => break "camera stream ended".to_string(),
            Ok(n) => {
                if let Some(frame) = splitter.push(&buf[..n]).pop() {
                    slot.state.lock().latest = Some(Arc::new(frame));
                    slot.ready.notify_all();
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => break format!("camera stream read failed: {}", e),
        }
    };

    debug!("Camera reader exiting: {}", reason);
    slot.state.lock().ended = Some(reason);
    slot.ready.notify_all();
}

impl CaptureSource for CameraSource {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.grabber.is_some() {
            return Ok(());
        }

        let device = self.resolve_device()?;

        // Opening the node first distinguishes a refused device from a missing grabber
        std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&device)
            .map_err(|e| CaptureError::from_open_error(&device, e))?;

        let grabber = self.spawn_grabber(&device)?;
        info!("Camera started on {}", device.display());
        self.device = Some(device);
        self.grabber = Some(grabber);
        Ok(())
    }

    fn capture(&mut self) -> Result<CapturedFrame, CaptureError> {
        let (exited, slot) = match self.grabber.as_mut() {
            Some(grabber) => (grabber.child.try_wait().ok().flatten(), grabber.slot.clone()),
            None => return Err(CaptureError::NotStarted),
        };

        if let Some(status) = exited {
            warn!("Camera grabber exited with {}", status);
            self.stop();
            return Err(CaptureError::StreamUnavailable(format!(
                "grabber exited with {}",
                status
            )));
        }

        match self.wait_for_frame(&slot) {
            Ok(bytes) => CapturedFrame::from_encoded(bytes.as_ref().clone()),
            Err(e) => {
                self.stop();
                Err(e)
            }
        }
    }

    fn stop(&mut self) {
        let Some(mut grabber) = self.grabber.take() else {
            return;
        };

        reap(&mut grabber.child);
        if let Some(reader) = grabber.reader.take() {
            let _ = reader.join();
        }

        if let Some(device) = &self.device {
            info!("Camera stopped on {}", device.display());
        }
    }

    fn is_active(&self) -> bool {
        self.grabber.is_some()
    }

    fn describe(&self) -> String {
        match (&self.device, &self.config.device) {
            (Some(device), _) | (None, Some(device)) => format!("camera {}", device.display()),
            (None, None) => format!("camera (auto, {:?} facing)", self.config.facing),
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(index: u32, name: &str) -> VideoDevice {
        VideoDevice {
            path: PathBuf::from(format!("/dev/video{}", index)),
            index,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_select_prefers_rear_camera() {
        let devices = vec![device(0, "Integrated Webcam"), device(2, "Back Camera")];
        let selected = select_device(&devices, FacingMode::Rear).unwrap();
        assert_eq!(selected.index, 2);

        let selected = select_device(&devices, FacingMode::Front).unwrap();
        assert_eq!(selected.index, 0);
    }

    #[test]
    fn test_select_falls_back_to_first_device() {
        let devices = vec![device(0, "USB Video"), device(1, "USB Video")];
        assert_eq!(select_device(&devices, FacingMode::Rear).unwrap().index, 0);
        assert!(select_device(&[], FacingMode::Rear).is_none());
    }

    #[test]
    fn test_splitter_extracts_frames_across_chunks() {
        let mut splitter = JpegFrameSplitter::new();
        let frame_a = vec![0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9];
        let frame_b = vec![0xFF, 0xD8, 9, 0xFF, 0xD9];

        let mut stream = frame_a.clone();
        stream.extend_from_slice(&frame_b);

        assert!(splitter.push(&stream[..4]).is_empty());
        let frames = splitter.push(&stream[4..]);
        assert_eq!(frames, vec![frame_a, frame_b]);
    }

    #[test]
    fn test_splitter_handles_marker_split_between_chunks() {
        let mut splitter = JpegFrameSplitter::new();
        assert!(splitter.push(&[0x00, 0xFF]).is_empty());
        assert!(splitter.push(&[0xD8, 5, 0xFF]).is_empty());
        assert_eq!(splitter.push(&[0xD9]), vec![vec![0xFF, 0xD8, 5, 0xFF, 0xD9]]);
    }

    #[test]
    fn test_splitter_discards_unterminated_frame() {
        let mut splitter = JpegFrameSplitter::with_limit(16);
        assert!(splitter.push(&[0xFF, 0xD8]).is_empty());
        assert!(splitter.push(&[7u8; 32]).is_empty());
        assert!(splitter.buffer.is_empty());

        // The stream recovers on the next complete frame
        let frame = vec![0xFF, 0xD8, 1, 0xFF, 0xD9];
        assert_eq!(splitter.push(&frame), vec![frame]);
    }

    #[test]
    fn test_reap_terminates_running_child() {
        let Ok(mut child) = Command::new("sleep").arg("30").spawn() else {
            return;
        };
        reap(&mut child);
        assert!(child.try_wait().unwrap().is_some());
    }

    #[test]
    fn test_capture_without_start() {
        let mut camera = CameraSource::new(CaptureConfig::default());
        assert!(matches!(camera.capture(), Err(CaptureError::NotStarted)));
        camera.stop();
        assert!(!camera.is_active());
    }

    #[test]
    fn test_missing_device_is_not_found() {
        let mut camera = CameraSource::new(CaptureConfig {
            device: Some(PathBuf::from("/dev/does-not-exist-video")),
            ..Default::default()
        });
        assert!(matches!(camera.start(), Err(CaptureError::DeviceNotFound(_))));
    }
}
