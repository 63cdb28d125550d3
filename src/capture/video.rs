//! Camera capture thread feeding the renderer.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;

use crate::error::{RetroError, RetroResult};
use crate::rendering::CrtRenderer;

/// Give up after this many consecutive frame errors.
const MAX_CONSECUTIVE_ERRORS: u32 = 30;
/// Delay before retrying after a frame error.
const ERROR_RETRY_DELAY_MS: u64 = 100;

/// A capture device as reported by the backend.
#[derive(Debug, Clone)]
pub struct VideoDevice {
    pub index: u32,
    pub name: String,
    pub description: String,
}

/// Enumerate available capture devices.
pub fn list_devices() -> RetroResult<Vec<VideoDevice>> {
    let cameras = nokhwa::query(ApiBackend::Auto)
        .map_err(|e| RetroError::Capture(format!("device query failed: {}", e)))?;

    Ok(cameras
        .iter()
        .enumerate()
        .map(|(i, info)| VideoDevice {
            index: i as u32,
            name: info.human_name(),
            description: info.description().to_string(),
        })
        .collect())
}

/// Owns the capture thread. Frames go straight into the renderer's
/// mailbox; this type never touches the GPU.
pub struct VideoCapture {
    should_stop: Arc<AtomicBool>,
    has_error: Arc<AtomicBool>,
    error_count: Arc<AtomicU32>,
    thread: Option<JoinHandle<()>>,
}

impl VideoCapture {
    pub fn new() -> Self {
        Self {
            should_stop: Arc::new(AtomicBool::new(false)),
            has_error: Arc::new(AtomicBool::new(false)),
            error_count: Arc::new(AtomicU32::new(0)),
            thread: None,
        }
    }

    /// Spawn the capture thread for the given device index.
    pub fn start(&mut self, device_index: u32, renderer: Arc<CrtRenderer>) -> RetroResult<()> {
        if self.thread.is_some() {
            return Err(RetroError::Capture("capture already running".to_string()));
        }

        self.should_stop.store(false, Ordering::SeqCst);
        self.has_error.store(false, Ordering::SeqCst);
        self.error_count.store(0, Ordering::SeqCst);

        let should_stop = Arc::clone(&self.should_stop);
        let has_error = Arc::clone(&self.has_error);
        let error_count = Arc::clone(&self.error_count);

        let handle = thread::Builder::new()
            .name("video-capture".to_string())
            .spawn(move || {
                run_capture_loop(device_index, renderer, should_stop, has_error, error_count);
            })?;

        self.thread = Some(handle);
        log::info!("[Capture] started for device {}", device_index);
        Ok(())
    }

    /// Signal the capture thread and wait for it to exit.
    pub fn stop(&mut self) {
        self.should_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::error!("[Capture] capture thread panicked");
            }
            log::info!("[Capture] stopped");
        }
    }

    /// True when the thread gave up after sustained errors.
    pub fn has_error(&self) -> bool {
        self.has_error.load(Ordering::SeqCst)
    }
}

impl Default for VideoCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for VideoCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_capture_loop(
    device_index: u32,
    renderer: Arc<CrtRenderer>,
    should_stop: Arc<AtomicBool>,
    has_error: Arc<AtomicBool>,
    error_count: Arc<AtomicU32>,
) {
    let requested =
        RequestedFormat::new::<RgbAFormat>(RequestedFormatType::AbsoluteHighestResolution);
    let mut camera = match Camera::new(CameraIndex::Index(device_index), requested) {
        Ok(camera) => camera,
        Err(e) => {
            log::error!("[Capture] failed to open device {}: {}", device_index, e);
            has_error.store(true, Ordering::SeqCst);
            return;
        }
    };

    if let Err(e) = camera.open_stream() {
        log::error!("[Capture] failed to start stream: {}", e);
        has_error.store(true, Ordering::SeqCst);
        return;
    }

    let format = camera.camera_format();
    log::info!(
        "[Capture] device {} streaming {}x{} @ {} fps",
        device_index,
        format.resolution().width(),
        format.resolution().height(),
        format.frame_rate()
    );

    let mut bgra = Vec::new();
    while !should_stop.load(Ordering::SeqCst) {
        let decoded = camera
            .frame()
            .and_then(|buffer| buffer.decode_image::<RgbAFormat>());

        match decoded {
            Ok(image) => {
                let width = image.width();
                let height = image.height();
                rgba_to_bgra(image.as_raw(), &mut bgra);
                renderer.submit_frame(&bgra, width, height, width * 4);
                error_count.store(0, Ordering::SeqCst);
            }
            Err(e) => {
                let count = error_count.fetch_add(1, Ordering::SeqCst) + 1;
                if count == 1 || count % 10 == 0 {
                    log::warn!("[Capture] frame error ({} consecutive): {}", count, e);
                }
                if count >= MAX_CONSECUTIVE_ERRORS {
                    log::error!("[Capture] too many consecutive errors, giving up");
                    has_error.store(true, Ordering::SeqCst);
                    break;
                }
                thread::sleep(Duration::from_millis(ERROR_RETRY_DELAY_MS));
            }
        }
    }

    if let Err(e) = camera.stop_stream() {
        log::debug!("[Capture] stop_stream: {}", e);
    }
    log::info!("[Capture] capture thread exiting");
}

/// Swap R and B while copying. Capture backends hand RGBA; the renderer
/// wants BGRA.
fn rgba_to_bgra(rgba: &[u8], out: &mut Vec<u8>) {
    out.clear();
    out.reserve(rgba.len());
    for chunk in rgba.chunks_exact(4) {
        out.push(chunk[2]);
        out.push(chunk[1]);
        out.push(chunk[0]);
        out.push(chunk[3]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgba_to_bgra() {
        let rgba = vec![255, 128, 64, 200, 10, 20, 30, 40];
        let mut bgra = Vec::new();
        rgba_to_bgra(&rgba, &mut bgra);
        assert_eq!(bgra, vec![64, 128, 255, 200, 30, 20, 10, 40]);
    }

    #[test]
    fn test_rgba_to_bgra_reuses_buffer() {
        let mut bgra = vec![9; 100];
        rgba_to_bgra(&[1, 2, 3, 4], &mut bgra);
        assert_eq!(bgra, vec![3, 2, 1, 4]);
    }

    #[test]
    fn test_rgba_to_bgra_ignores_trailing_bytes() {
        let mut bgra = Vec::new();
        rgba_to_bgra(&[1, 2, 3, 4, 5, 6], &mut bgra);
        assert_eq!(bgra, vec![3, 2, 1, 4]);
    }
}
