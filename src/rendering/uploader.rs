//! Uploads captured frames into a GPU-sampleable texture.
//!
//! Render-thread only. The texture is recreated whenever the incoming
//! frame size changes; callers rebuild any bind group that samples it
//! when `upload` reports a recreation.

use super::mailbox::{RawFrame, BYTES_PER_PIXEL};

/// Frames arrive as BGRA bytes; the texture matches, so nothing on the
/// upload path swizzles.
pub(crate) const VIDEO_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Bgra8Unorm;

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

pub(crate) struct VideoTexture {
    current: Option<GpuTexture>,
    staging: Vec<u8>,
}

impl VideoTexture {
    pub fn new() -> Self {
        Self {
            current: None,
            staging: Vec::new(),
        }
    }

    /// Upload one frame, recreating the texture if the size changed.
    /// Returns true when the texture was (re)created.
    pub fn upload(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        frame: &RawFrame,
    ) -> bool {
        let tight = frame.width * BYTES_PER_PIXEL;

        let recreated = match &self.current {
            Some(existing)
                if existing.width == frame.width && existing.height == frame.height =>
            {
                false
            }
            _ => {
                log::debug!(
                    "[Uploader] video texture {}x{}",
                    frame.width,
                    frame.height
                );
                self.current = Some(create_texture(device, frame.width, frame.height));
                true
            }
        };

        if let Some(target) = &self.current {
            let data: &[u8] = if frame.stride == tight {
                &frame.data
            } else {
                pack_rows(
                    &frame.data,
                    frame.stride,
                    frame.width,
                    frame.height,
                    &mut self.staging,
                );
                &self.staging
            };

            queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &target.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                data,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(tight),
                    rows_per_image: Some(frame.height),
                },
                wgpu::Extent3d {
                    width: frame.width,
                    height: frame.height,
                    depth_or_array_layers: 1,
                },
            );
        }

        recreated
    }

    pub fn view(&self) -> Option<&wgpu::TextureView> {
        self.current.as_ref().map(|t| &t.view)
    }

    pub fn size(&self) -> Option<(u32, u32)> {
        self.current.as_ref().map(|t| (t.width, t.height))
    }

    /// Drop the texture, returning the pipeline to its no-video state.
    pub fn reset(&mut self) {
        if self.current.take().is_some() {
            log::debug!("[Uploader] video texture released");
        }
    }
}

fn create_texture(device: &wgpu::Device, width: u32, height: u32) -> GpuTexture {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("video frame"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: VIDEO_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    GpuTexture {
        texture,
        view,
        width,
        height,
    }
}

/// Repack rows from `stride` pitch to tight `width * 4` pitch. Each row
/// copies min(stride, width * 4) bytes, so neither side's padding is ever
/// read past or written past.
pub(crate) fn pack_rows(data: &[u8], stride: u32, width: u32, height: u32, out: &mut Vec<u8>) {
    let tight = (width * BYTES_PER_PIXEL) as usize;
    let stride = stride as usize;
    let row_bytes = tight.min(stride);

    out.clear();
    out.resize(tight * height as usize, 0);
    for y in 0..height as usize {
        let src = y * stride;
        let dst = y * tight;
        out[dst..dst + row_bytes].copy_from_slice(&data[src..src + row_bytes]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_rows_tight_stride_is_identity() {
        let data: Vec<u8> = (0..32u8).collect();
        let mut out = Vec::new();
        pack_rows(&data, 8, 2, 4, &mut out);
        assert_eq!(out, data);
    }

    #[test]
    fn test_pack_rows_drops_padding() {
        // 1x2 frame with 6-byte stride: rows at 0 and 6, 4 bytes each.
        let data: Vec<u8> = vec![1, 2, 3, 4, 0xee, 0xee, 5, 6, 7, 8];
        let mut out = Vec::new();
        pack_rows(&data, 6, 1, 2, &mut out);
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_pack_rows_accepts_tight_final_row() {
        // Last row has no padding: (height - 1) * stride + width * 4 bytes.
        let data: Vec<u8> = (0..16u8).collect();
        let mut out = Vec::new();
        pack_rows(&data, 6, 1, 3, &mut out);
        assert_eq!(out, vec![0, 1, 2, 3, 6, 7, 8, 9, 12, 13, 14, 15]);
    }

    #[test]
    fn test_pack_rows_short_stride_zero_fills() {
        // A 2-byte stride copies min(2, 4) bytes per row.
        let data = vec![9u8, 9, 9, 9];
        let mut out = Vec::new();
        pack_rows(&data, 2, 1, 2, &mut out);
        assert_eq!(out, vec![9, 9, 0, 0, 9, 9, 0, 0]);
    }

    #[test]
    fn test_pack_rows_reuses_buffer() {
        let mut out = Vec::new();
        pack_rows(&[1, 2, 3, 4], 4, 1, 1, &mut out);
        assert_eq!(out.len(), 4);
        pack_rows(&(0..24u8).collect::<Vec<_>>(), 12, 2, 2, &mut out);
        assert_eq!(out.len(), 16);
        assert_eq!(&out[..8], &[0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(&out[8..], &[12, 13, 14, 15, 16, 17, 18, 19]);
    }
}
