//! Renderer lifecycle and the dedicated render thread.
//!
//! `CrtRenderer` is the crate's public entry point. GPU resources are
//! created by `initialize` on the calling thread, then move wholesale
//! into the `crt-render` thread at `start`; from that point every GPU
//! call happens on that one thread. The owner communicates through the
//! frame mailbox, the parameter record, and atomic request flags, none
//! of which ever wait on GPU work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::error::{RetroError, RetroResult};

use super::mailbox::{FrameMailbox, RawFrame};
use super::params::CrtParams;
use super::pipeline::{encode_fallback, CrtPipeline, ShaderAssets};
use super::surface::{PendingResize, SurfaceState};
use super::uploader::VideoTexture;

/// Pause after a failed iteration so a wedged surface cannot spin the
/// thread; the steady state is paced by vsync instead.
const ERROR_RETRY_DELAY: Duration = Duration::from_millis(10);

/// State shared between the owner/UI threads and the render thread.
struct SharedState {
    mailbox: FrameMailbox,
    params: Mutex<CrtParams>,
    resize: PendingResize,
    reset_requested: AtomicBool,
    has_video: AtomicBool,
    running: AtomicBool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VideoState {
    Fallback,
    Active,
}

/// Everything the render thread owns while running: created by
/// `initialize`, moved into the thread by `start`, handed back at `stop`
/// so the renderer can be restarted without touching the window again.
struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: SurfaceState,
    pipeline: CrtPipeline,
    video: VideoTexture,
    scratch: RawFrame,
    state: VideoState,
}

impl GpuContext {
    /// Service the cross-thread requests, newest input last so a frame
    /// submitted during a resize is uploaded against the new surface.
    fn service_inputs(&mut self, shared: &SharedState) {
        if let Some((width, height)) = shared.resize.take() {
            self.surface.resize(&self.device, width, height);
        }

        if shared.reset_requested.swap(false, Ordering::SeqCst) {
            self.video.reset();
            self.pipeline.reset_video();
        }

        if shared.mailbox.take(&mut self.scratch) {
            let recreated = self.video.upload(&self.device, &self.queue, &self.scratch);
            if recreated {
                self.pipeline.invalidate_video_binding();
            }
        }
    }

    fn render_frame(&mut self, shared: &SharedState) -> Result<(), wgpu::SurfaceError> {
        // Offscreen sizing is recomputed here, after resize and pickup
        // were serviced, so a new window size takes effect on the frame
        // after the reconfigure.
        if let (Some((video_w, video_h)), Some(video_view)) =
            (self.video.size(), self.video.view())
        {
            self.pipeline.ensure_offscreen(
                &self.device,
                video_w,
                video_h,
                self.surface.width(),
                self.surface.height(),
                video_view,
            );
        }

        let frame = self.surface.acquire()?;
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame encoder"),
            });

        let params = *shared.params.lock();
        let drew_video = self.video.view().is_some()
            && self.pipeline.encode(&mut encoder, &self.queue, &params, &view);
        if !drew_video {
            encode_fallback(&mut encoder, &view);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        frame.present();

        self.set_state(if drew_video {
            VideoState::Active
        } else {
            VideoState::Fallback
        });
        Ok(())
    }

    fn set_state(&mut self, next: VideoState) {
        if next != self.state {
            log::info!("[Renderer] pipeline state {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }
}

/// Recovery action after a failed frame. Every variant that keeps the
/// loop alive includes the pause; a failed frame never reaches the
/// vsync wait in `present`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SurfaceRecovery {
    ReconfigureAndPause,
    Pause,
    Stop,
}

fn surface_recovery(err: &wgpu::SurfaceError) -> SurfaceRecovery {
    match err {
        wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => {
            SurfaceRecovery::ReconfigureAndPause
        }
        wgpu::SurfaceError::OutOfMemory => SurfaceRecovery::Stop,
        _ => SurfaceRecovery::Pause,
    }
}

fn run_render_loop(mut ctx: GpuContext, shared: Arc<SharedState>) -> GpuContext {
    log::info!("[Renderer] render thread started");

    while shared.running.load(Ordering::SeqCst) {
        ctx.service_inputs(&shared);

        match ctx.render_frame(&shared) {
            Ok(()) => {}
            Err(err) => match surface_recovery(&err) {
                SurfaceRecovery::ReconfigureAndPause => {
                    log::warn!("[Renderer] surface lost or outdated, reconfiguring");
                    ctx.surface.reconfigure(&ctx.device);
                    thread::sleep(ERROR_RETRY_DELAY);
                }
                SurfaceRecovery::Pause => {
                    log::warn!("[Renderer] frame skipped: {}", err);
                    thread::sleep(ERROR_RETRY_DELAY);
                }
                SurfaceRecovery::Stop => {
                    log::error!("[Renderer] out of GPU memory, stopping render loop");
                    shared.running.store(false, Ordering::SeqCst);
                }
            },
        }
    }

    log::info!("[Renderer] render thread stopped");
    ctx
}

async fn request_gpu(
    instance: &wgpu::Instance,
    surface: &wgpu::Surface<'static>,
) -> RetroResult<(wgpu::Adapter, wgpu::Device, wgpu::Queue)> {
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(surface),
            force_fallback_adapter: false,
        })
        .await
        .map_err(|e| RetroError::Gpu(format!("no suitable GPU adapter: {}", e)))?;

    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some("retroview device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        })
        .await
        .map_err(|e| RetroError::Gpu(format!("device request failed: {}", e)))?;

    Ok((adapter, device, queue))
}

/// Live-video CRT renderer. See the module docs for the threading model.
pub struct CrtRenderer {
    shared: Arc<SharedState>,
    assets: ShaderAssets,
    gpu: Mutex<Option<GpuContext>>,
    thread: Mutex<Option<JoinHandle<GpuContext>>>,
}

impl CrtRenderer {
    pub fn new() -> Self {
        Self::with_shaders(ShaderAssets::builtin())
    }

    /// Build a renderer with injected shader source.
    pub fn with_shaders(assets: ShaderAssets) -> Self {
        Self {
            shared: Arc::new(SharedState {
                mailbox: FrameMailbox::new(),
                params: Mutex::new(CrtParams::default()),
                resize: PendingResize::new(),
                reset_requested: AtomicBool::new(false),
                has_video: AtomicBool::new(false),
                running: AtomicBool::new(false),
            }),
            assets,
            gpu: Mutex::new(None),
            thread: Mutex::new(None),
        }
    }

    /// Create the GPU device and the presentable surface for a window.
    /// Idempotent: a second call on an initialized renderer is a no-op.
    ///
    /// Both raw handles must stay valid until `dispose`; the shell
    /// guarantees this by keeping the window alive while the renderer
    /// exists.
    pub fn initialize(
        &self,
        display: RawDisplayHandle,
        window: RawWindowHandle,
        width: u32,
        height: u32,
    ) -> RetroResult<()> {
        if self.thread.lock().is_some() {
            log::debug!("[Renderer] already running, ignoring initialize");
            return Ok(());
        }
        let mut gpu = self.gpu.lock();
        if gpu.is_some() {
            log::debug!("[Renderer] already initialized, ignoring");
            return Ok(());
        }

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());

        // SAFETY: the caller keeps the window and display behind these
        // handles alive for the lifetime of the renderer (documented
        // above), which outlives the surface created here.
        let surface = unsafe {
            instance.create_surface_unsafe(wgpu::SurfaceTargetUnsafe::RawHandle {
                raw_display_handle: display,
                raw_window_handle: window,
            })
        }
        .map_err(|e| RetroError::Surface(format!("surface creation failed: {}", e)))?;

        let (adapter, device, queue) = pollster::block_on(request_gpu(&instance, &surface))?;
        log::info!("[Renderer] using GPU adapter: {}", adapter.get_info().name);

        let surface = SurfaceState::new(surface, &adapter, &device, width, height);
        let pipeline = CrtPipeline::new(&device, surface.format(), &self.assets);

        *gpu = Some(GpuContext {
            device,
            queue,
            surface,
            pipeline,
            video: VideoTexture::new(),
            scratch: RawFrame::default(),
            state: VideoState::Fallback,
        });
        Ok(())
    }

    /// Spawn the render thread. Requires `initialize` first.
    pub fn start(&self) -> RetroResult<()> {
        let mut thread = self.thread.lock();
        if thread.is_some() {
            return Err(RetroError::AlreadyRunning);
        }

        let ctx = self
            .gpu
            .lock()
            .take()
            .ok_or(RetroError::NotInitialized)?;

        self.shared.running.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("crt-render".to_string())
            .spawn(move || run_render_loop(ctx, shared));

        match handle {
            Ok(handle) => {
                *thread = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                log::error!("[Renderer] failed to spawn render thread: {}", e);
                Err(RetroError::Io(e))
            }
        }
    }

    /// Signal the render thread and block until it exits. The GPU context
    /// comes back to the owner, so `start` can be called again.
    pub fn stop(&self) {
        let handle = self.thread.lock().take();
        let Some(handle) = handle else {
            return;
        };

        log::info!("[Renderer] stopping render thread");
        self.shared.running.store(false, Ordering::SeqCst);
        match handle.join() {
            Ok(ctx) => *self.gpu.lock() = Some(ctx),
            Err(_) => log::error!("[Renderer] render thread panicked"),
        }
    }

    /// Stop rendering and release every GPU resource.
    pub fn dispose(&self) {
        self.stop();
        if self.gpu.lock().take().is_some() {
            log::info!("[Renderer] GPU resources released");
        }
        self.shared.mailbox.clear();
        self.shared.has_video.store(false, Ordering::SeqCst);
    }

    /// Hand a BGRA frame to the renderer. Callable from any thread; never
    /// waits on rendering. Returns false when the submission is malformed
    /// (zero dimensions, stride below width*4, or a short buffer).
    pub fn submit_frame(&self, pixels: &[u8], width: u32, height: u32, stride: u32) -> bool {
        let accepted = self.shared.mailbox.submit(pixels, width, height, stride);
        if accepted {
            self.shared.has_video.store(true, Ordering::SeqCst);
        }
        accepted
    }

    /// Replace the CRT parameter record. Values are stored exactly as
    /// given; the shader applies whatever clamping it needs.
    pub fn set_params(&self, params: CrtParams) {
        *self.shared.params.lock() = params;
    }

    pub fn params(&self) -> CrtParams {
        *self.shared.params.lock()
    }

    /// Request a surface resize; applied by the render thread at the next
    /// iteration boundary, never mid-draw.
    pub fn resize(&self, width: u32, height: u32) {
        self.shared.resize.request(width, height);
    }

    /// Drop the current video feed and return to fallback rendering until
    /// a new frame arrives.
    pub fn reset_video(&self) {
        self.shared.mailbox.clear();
        self.shared.has_video.store(false, Ordering::SeqCst);
        self.shared.reset_requested.store(true, Ordering::SeqCst);
        log::info!("[Renderer] video reset requested");
    }

    pub fn has_video(&self) -> bool {
        self.shared.has_video.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.thread.lock().is_some()
    }
}

impl Default for CrtRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CrtRenderer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u32, height: u32) -> Vec<u8> {
        vec![0x40; (width * height * 4) as usize]
    }

    #[test]
    fn test_new_renderer_is_idle() {
        let renderer = CrtRenderer::new();
        assert!(!renderer.has_video());
        assert!(!renderer.is_running());
        assert_eq!(renderer.params(), CrtParams::default());
    }

    #[test]
    fn test_start_requires_initialize() {
        let renderer = CrtRenderer::new();
        assert!(matches!(
            renderer.start(),
            Err(RetroError::NotInitialized)
        ));
        assert!(!renderer.is_running());
    }

    #[test]
    fn test_stop_without_start_is_a_noop() {
        let renderer = CrtRenderer::new();
        renderer.stop();
        renderer.dispose();
        assert!(!renderer.is_running());
    }

    #[test]
    fn test_submit_flips_has_video() {
        let renderer = CrtRenderer::new();
        assert!(renderer.submit_frame(&frame(2, 2), 2, 2, 8));
        assert!(renderer.has_video());
    }

    #[test]
    fn test_malformed_submit_changes_nothing() {
        let renderer = CrtRenderer::new();
        assert!(!renderer.submit_frame(&[], 2, 2, 8));
        assert!(!renderer.submit_frame(&frame(2, 2), 0, 2, 8));
        assert!(!renderer.submit_frame(&frame(2, 2), 2, 2, 4));
        assert!(!renderer.has_video());
    }

    #[test]
    fn test_reset_video_returns_to_fallback_inputs() {
        let renderer = CrtRenderer::new();
        renderer.submit_frame(&frame(2, 2), 2, 2, 8);
        renderer.reset_video();
        assert!(!renderer.has_video());

        // A fresh frame restarts the feed.
        renderer.submit_frame(&frame(2, 2), 2, 2, 8);
        assert!(renderer.has_video());
    }

    #[test]
    fn test_surface_recovery_paces_retries() {
        assert_eq!(
            surface_recovery(&wgpu::SurfaceError::Lost),
            SurfaceRecovery::ReconfigureAndPause
        );
        assert_eq!(
            surface_recovery(&wgpu::SurfaceError::Outdated),
            SurfaceRecovery::ReconfigureAndPause
        );
        assert_eq!(
            surface_recovery(&wgpu::SurfaceError::Timeout),
            SurfaceRecovery::Pause
        );
        assert_eq!(
            surface_recovery(&wgpu::SurfaceError::OutOfMemory),
            SurfaceRecovery::Stop
        );
    }

    #[test]
    fn test_params_round_trip_is_exact() {
        let renderer = CrtRenderer::new();
        let params = CrtParams {
            brightness: -2.0,
            contrast: 17.5,
            saturation: 0.0,
            gamma: 0.001,
            scanline_strength: 42.0,
            phosphor_strength: -1.0,
            scanline_phase: 128.0,
            mask_type: 2.0,
            beam_width: 9.0,
            h_size: 0.5,
            v_size: 3.0,
        };
        renderer.set_params(params);
        assert_eq!(renderer.params(), params);
    }
}
