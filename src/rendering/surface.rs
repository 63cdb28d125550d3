//! Presentable surface configuration and the cross-thread resize request.

use std::sync::atomic::{AtomicU64, Ordering};

/// Latest-wins resize request packed into one atomic word, so window-event
/// threads never take a lock and the render thread consumes at most one
/// request per iteration. Zero means nothing is pending; zero-sized
/// requests are dropped at the door since a surface cannot be configured
/// at 0x0.
pub(crate) struct PendingResize(AtomicU64);

impl PendingResize {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn request(&self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            log::trace!("[Renderer] ignoring zero-sized resize {}x{}", width, height);
            return;
        }
        self.0.store(pack(width, height), Ordering::SeqCst);
    }

    pub fn take(&self) -> Option<(u32, u32)> {
        match self.0.swap(0, Ordering::SeqCst) {
            0 => None,
            packed => Some(unpack(packed)),
        }
    }
}

fn pack(width: u32, height: u32) -> u64 {
    ((width as u64) << 32) | height as u64
}

fn unpack(value: u64) -> (u32, u32) {
    ((value >> 32) as u32, value as u32)
}

/// True when a requested size actually requires reconfiguring the surface:
/// nonzero and different from what is currently configured. Applying the
/// same dimensions twice must not rebuild the swap chain.
pub(crate) fn needs_reconfigure(
    current_width: u32,
    current_height: u32,
    width: u32,
    height: u32,
) -> bool {
    width != 0 && height != 0 && (width != current_width || height != current_height)
}

/// Prefer a non-sRGB format: frames arrive display-referred, and an sRGB
/// view would re-encode them on write.
pub(crate) fn choose_surface_format(caps: &wgpu::SurfaceCapabilities) -> wgpu::TextureFormat {
    for preferred in [
        wgpu::TextureFormat::Bgra8Unorm,
        wgpu::TextureFormat::Rgba8Unorm,
    ] {
        if caps.formats.contains(&preferred) {
            return preferred;
        }
    }
    caps.formats
        .first()
        .copied()
        .unwrap_or(wgpu::TextureFormat::Bgra8Unorm)
}

/// Owns the window surface and its active configuration. Lives on the
/// render thread once the renderer starts; every method here assumes it.
pub(crate) struct SurfaceState {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
}

impl SurfaceState {
    /// Configure `surface` for presentation, vsync-paced.
    pub fn new(
        surface: wgpu::Surface<'static>,
        adapter: &wgpu::Adapter,
        device: &wgpu::Device,
        width: u32,
        height: u32,
    ) -> Self {
        let caps = surface.get_capabilities(adapter);
        let format = choose_surface_format(&caps);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: width.max(1),
            height: height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: wgpu::CompositeAlphaMode::Auto,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(device, &config);
        log::info!(
            "[Renderer] surface configured: {}x{} {:?}",
            config.width,
            config.height,
            format
        );

        Self { surface, config }
    }

    /// Apply a resize request. Returns false without touching the surface
    /// when the size is zero or unchanged.
    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) -> bool {
        if !needs_reconfigure(self.config.width, self.config.height, width, height) {
            return false;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(device, &self.config);
        log::debug!("[Renderer] surface resized to {}x{}", width, height);
        true
    }

    /// Re-apply the current configuration after a lost/outdated frame.
    pub fn reconfigure(&self, device: &wgpu::Device) {
        self.surface.configure(device, &self.config);
    }

    pub fn acquire(&self) -> Result<wgpu::SurfaceTexture, wgpu::SurfaceError> {
        self.surface.get_current_texture()
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    pub fn width(&self) -> u32 {
        self.config.width
    }

    pub fn height(&self) -> u32 {
        self.config.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_resize_empty() {
        let pending = PendingResize::new();
        assert_eq!(pending.take(), None);
    }

    #[test]
    fn test_pending_resize_latest_wins() {
        let pending = PendingResize::new();
        pending.request(800, 600);
        pending.request(1920, 1080);
        assert_eq!(pending.take(), Some((1920, 1080)));
        assert_eq!(pending.take(), None, "take consumes the request");
    }

    #[test]
    fn test_pending_resize_ignores_zero() {
        let pending = PendingResize::new();
        pending.request(0, 600);
        pending.request(800, 0);
        assert_eq!(pending.take(), None);
    }

    #[test]
    fn test_pack_unpack() {
        assert_eq!(unpack(pack(1920, 1080)), (1920, 1080));
        assert_eq!(unpack(pack(u32::MAX, 1)), (u32::MAX, 1));
        assert_ne!(pack(640, 480), 0);
    }

    #[test]
    fn test_needs_reconfigure_dedup() {
        // First request differs, second repeats it against the new size.
        assert!(needs_reconfigure(800, 600, 1024, 768));
        assert!(!needs_reconfigure(1024, 768, 1024, 768));
    }

    #[test]
    fn test_needs_reconfigure_rejects_zero() {
        assert!(!needs_reconfigure(800, 600, 0, 600));
        assert!(!needs_reconfigure(800, 600, 800, 0));
    }

    #[test]
    fn test_needs_reconfigure_single_axis_change() {
        assert!(needs_reconfigure(800, 600, 800, 601));
        assert!(needs_reconfigure(800, 600, 801, 600));
    }
}
