//! Two-pass CRT post-processing pipeline.
//!
//! Pass 1 magnifies the video texture into an offscreen target with
//! nearest-neighbor sampling at an integer scale, so every source pixel
//! becomes a crisp NxN block. Pass 2 draws the offscreen target to the
//! window through the CRT shader with linear sampling, driven by the
//! uniform block uploaded fresh every frame.

use std::borrow::Cow;

use super::params::{CrtParams, CrtUniforms};

/// Offscreen target format. Matches the video texture so pass 1 is a pure
/// magnification.
const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Bgra8Unorm;

/// Solid color presented while no video is available.
pub(crate) const FALLBACK_COLOR: wgpu::Color = wgpu::Color {
    r: 0.0,
    g: 0.35,
    b: 0.0,
    a: 1.0,
};

const SCALE_SHADER: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    var positions = array<vec2<f32>, 3>(
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(3.0, -1.0),
        vec2<f32>(-1.0, 3.0),
    );
    var uvs = array<vec2<f32>, 3>(
        vec2<f32>(0.0, 1.0),
        vec2<f32>(2.0, 1.0),
        vec2<f32>(0.0, -1.0),
    );
    var output: VertexOutput;
    output.position = vec4<f32>(positions[index], 0.0, 1.0);
    output.uv = uvs[index];
    return output;
}

@group(0) @binding(0) var video_texture: texture_2d<f32>;
@group(0) @binding(1) var video_sampler: sampler;

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(video_texture, video_sampler, input.uv);
}
"#;

const CRT_SHADER: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    var positions = array<vec2<f32>, 3>(
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(3.0, -1.0),
        vec2<f32>(-1.0, 3.0),
    );
    var uvs = array<vec2<f32>, 3>(
        vec2<f32>(0.0, 1.0),
        vec2<f32>(2.0, 1.0),
        vec2<f32>(0.0, -1.0),
    );
    var output: VertexOutput;
    output.position = vec4<f32>(positions[index], 0.0, 1.0);
    output.uv = uvs[index];
    return output;
}

// Must match CrtUniforms on the CPU side: 64 bytes.
struct CrtUniforms {
    brightness: f32,
    contrast: f32,
    saturation: f32,
    scanline_strength: f32,
    gamma: f32,
    phosphor_strength: f32,
    screen_size: vec2<f32>,
    effective_size: vec2<f32>,
    scanline_phase: f32,
    mask_type: f32,
    beam_width: f32,
    h_size: f32,
    v_size: f32,
    _pad: f32,
}

@group(0) @binding(0) var<uniform> crt: CrtUniforms;
@group(0) @binding(1) var crt_texture: texture_2d<f32>;
@group(0) @binding(2) var crt_sampler: sampler;

const PI: f32 = 3.14159265;

fn triad(index: u32) -> vec3<f32> {
    if (index == 0u) {
        return vec3<f32>(1.0, 0.3, 0.3);
    }
    if (index == 1u) {
        return vec3<f32>(0.3, 1.0, 0.3);
    }
    return vec3<f32>(0.3, 0.3, 1.0);
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    // Tube geometry: h/v size scale about the center, black outside.
    let uv = (input.uv - vec2<f32>(0.5)) / vec2<f32>(crt.h_size, crt.v_size) + vec2<f32>(0.5);
    if (uv.x < 0.0 || uv.x > 1.0 || uv.y < 0.0 || uv.y > 1.0) {
        return vec4<f32>(0.0, 0.0, 0.0, 1.0);
    }

    // Level-0 sampling keeps this legal after the border branch above.
    let spread = vec2<f32>(crt.beam_width / crt.screen_size.x, 0.0);
    let center = textureSampleLevel(crt_texture, crt_sampler, uv, 0.0).rgb;
    let left = textureSampleLevel(crt_texture, crt_sampler, uv - spread, 0.0).rgb;
    let right = textureSampleLevel(crt_texture, crt_sampler, uv + spread, 0.0).rgb;
    var color = (center + left + right) / 3.0;

    // Color controls, then gamma.
    let luma = dot(color, vec3<f32>(0.299, 0.587, 0.114));
    color = mix(vec3<f32>(luma), color, crt.saturation);
    color = (color - vec3<f32>(0.5)) * crt.contrast + vec3<f32>(0.5) + vec3<f32>(crt.brightness);
    color = clamp(color, vec3<f32>(0.0), vec3<f32>(1.0));
    color = pow(color, vec3<f32>(1.0 / max(crt.gamma, 0.01)));

    // Scanlines in offscreen row space, shifted by the phase control.
    let line = input.uv.y * crt.effective_size.y + crt.scanline_phase;
    let scan = 1.0 - crt.scanline_strength * (0.5 + 0.5 * sin(line * PI));
    color = color * scan;

    // Phosphor mask over window pixels: 0 none, 1 grille, 2 shadow mask.
    if (crt.mask_type >= 0.5) {
        let px = u32(floor(input.position.x));
        var slot = px % 3u;
        if (crt.mask_type >= 1.5) {
            let py = u32(floor(input.position.y));
            slot = (px + ((py / 2u) % 2u)) % 3u;
        }
        color = color * mix(vec3<f32>(1.0), triad(slot), crt.phosphor_strength);
    }

    return vec4<f32>(clamp(color, vec3<f32>(0.0), vec3<f32>(1.0)), 1.0);
}
"#;

/// Shader source handed to the pipeline at construction. The embedded
/// WGSL is the default; tests or tooling can inject replacements.
pub struct ShaderAssets {
    pub scale: Cow<'static, str>,
    pub crt: Cow<'static, str>,
}

impl ShaderAssets {
    pub fn builtin() -> Self {
        Self {
            scale: Cow::Borrowed(SCALE_SHADER),
            crt: Cow::Borrowed(CRT_SHADER),
        }
    }
}

impl Default for ShaderAssets {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Largest whole-number magnification of `video` that still fits inside
/// `surface`, never below 1x.
pub(crate) fn integer_scale(
    video_width: u32,
    video_height: u32,
    surface_width: u32,
    surface_height: u32,
) -> u32 {
    if video_width == 0 || video_height == 0 {
        return 1;
    }
    let sx = (surface_width / video_width).max(1);
    let sy = (surface_height / video_height).max(1);
    sx.min(sy)
}

/// Offscreen target dimensions plus the scale that produced them.
pub(crate) fn offscreen_dims(
    video_width: u32,
    video_height: u32,
    surface_width: u32,
    surface_height: u32,
) -> (u32, u32, u32) {
    let scale = integer_scale(video_width, video_height, surface_width, surface_height);
    (video_width * scale, video_height * scale, scale)
}

struct Offscreen {
    // The view keeps the underlying texture alive.
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

pub(crate) struct CrtPipeline {
    scale_pipeline: wgpu::RenderPipeline,
    crt_pipeline: wgpu::RenderPipeline,
    scale_bind_layout: wgpu::BindGroupLayout,
    crt_bind_layout: wgpu::BindGroupLayout,
    nearest_sampler: wgpu::Sampler,
    linear_sampler: wgpu::Sampler,
    uniform_buffer: wgpu::Buffer,
    offscreen: Option<Offscreen>,
    scale_bind: Option<wgpu::BindGroup>,
    crt_bind: Option<wgpu::BindGroup>,
}

impl CrtPipeline {
    pub fn new(
        device: &wgpu::Device,
        surface_format: wgpu::TextureFormat,
        assets: &ShaderAssets,
    ) -> Self {
        let scale_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("scale shader"),
            source: wgpu::ShaderSource::Wgsl(assets.scale.clone()),
        });
        let crt_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("crt shader"),
            source: wgpu::ShaderSource::Wgsl(assets.crt.clone()),
        });

        let scale_bind_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("scale bind layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ],
            });

        let crt_bind_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("crt bind layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 2,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ],
            });

        let scale_pipeline = create_pipeline(
            device,
            "scale pipeline",
            &scale_module,
            &scale_bind_layout,
            OFFSCREEN_FORMAT,
        );
        let crt_pipeline = create_pipeline(
            device,
            "crt pipeline",
            &crt_module,
            &crt_bind_layout,
            surface_format,
        );

        let nearest_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("nearest sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        let linear_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("linear sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("crt uniforms"),
            size: std::mem::size_of::<CrtUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            scale_pipeline,
            crt_pipeline,
            scale_bind_layout,
            crt_bind_layout,
            nearest_sampler,
            linear_sampler,
            uniform_buffer,
            offscreen: None,
            scale_bind: None,
            crt_bind: None,
        }
    }

    /// Drop the binding of the video texture; called after the uploader
    /// recreates it.
    pub fn invalidate_video_binding(&mut self) {
        self.scale_bind = None;
    }

    /// Forget the current video binding when the feed resets. The
    /// offscreen target is kept; it is reused if the next feed has the
    /// same size and replaced by `ensure_offscreen` otherwise.
    pub fn reset_video(&mut self) {
        self.scale_bind = None;
    }

    /// Recompute the offscreen target for the current video and surface
    /// sizes, then rebuild whichever bind groups are missing. Called once
    /// per iteration while video is active, which is what makes resize
    /// rescaling take effect on the following frame.
    pub fn ensure_offscreen(
        &mut self,
        device: &wgpu::Device,
        video_width: u32,
        video_height: u32,
        surface_width: u32,
        surface_height: u32,
        video_view: &wgpu::TextureView,
    ) {
        let (width, height, scale) =
            offscreen_dims(video_width, video_height, surface_width, surface_height);

        let recreate = !matches!(
            &self.offscreen,
            Some(o) if o.width == width && o.height == height
        );
        if recreate {
            log::debug!(
                "[Pipeline] offscreen target {}x{} ({}x scale of {}x{})",
                width,
                height,
                scale,
                video_width,
                video_height
            );
            self.offscreen = Some(create_offscreen(device, width, height));
            self.crt_bind = None;
        }

        if self.scale_bind.is_none() {
            self.scale_bind = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("scale bind"),
                layout: &self.scale_bind_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(video_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.nearest_sampler),
                    },
                ],
            }));
        }

        if self.crt_bind.is_none() {
            if let Some(offscreen) = &self.offscreen {
                self.crt_bind = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("crt bind"),
                    layout: &self.crt_bind_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: self.uniform_buffer.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::TextureView(&offscreen.view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: wgpu::BindingResource::Sampler(&self.linear_sampler),
                        },
                    ],
                }));
            }
        }
    }

    /// Encode both passes for one frame. Returns false, encoding nothing,
    /// when any required resource is missing; the caller renders the
    /// fallback instead.
    pub fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        queue: &wgpu::Queue,
        params: &CrtParams,
        surface_view: &wgpu::TextureView,
    ) -> bool {
        let (Some(offscreen), Some(scale_bind), Some(crt_bind)) =
            (&self.offscreen, &self.scale_bind, &self.crt_bind)
        else {
            return false;
        };

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("scale pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &offscreen.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.scale_pipeline);
            pass.set_bind_group(0, scale_bind, &[]);
            pass.draw(0..3, 0..1);
        }

        // Fresh snapshot every frame, whether or not anything changed.
        let uniforms = CrtUniforms::new(params, offscreen.width, offscreen.height);
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("crt pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: surface_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.crt_pipeline);
            pass.set_bind_group(0, crt_bind, &[]);
            pass.draw(0..3, 0..1);
        }

        true
    }
}

/// Clear the target to the idle color. Used whenever the two-pass path is
/// unavailable.
pub(crate) fn encode_fallback(encoder: &mut wgpu::CommandEncoder, target: &wgpu::TextureView) {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("fallback pass"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: target,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(FALLBACK_COLOR),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    });
}

fn create_pipeline(
    device: &wgpu::Device,
    label: &str,
    module: &wgpu::ShaderModule,
    bind_layout: &wgpu::BindGroupLayout,
    target_format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[bind_layout],
        push_constant_ranges: &[],
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: Some("vs_main"),
            buffers: &[],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: Some("fs_main"),
            compilation_options: Default::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format: target_format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

fn create_offscreen(device: &wgpu::Device, width: u32, height: u32) -> Offscreen {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("crt offscreen"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: OFFSCREEN_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    Offscreen {
        view,
        width,
        height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_scale_picks_largest_fit() {
        // 1920/320 = 6, 1080/240 = 4.5; the shared integer fit is 4.
        assert_eq!(integer_scale(320, 240, 1920, 1080), 4);
        assert_eq!(offscreen_dims(320, 240, 1920, 1080), (1280, 960, 4));
    }

    #[test]
    fn test_integer_scale_exact_fit() {
        assert_eq!(integer_scale(320, 240, 640, 480), 2);
        assert_eq!(integer_scale(320, 240, 320, 240), 1);
    }

    #[test]
    fn test_integer_scale_never_below_one() {
        // Video larger than the window still renders at 1x.
        assert_eq!(integer_scale(1920, 1080, 640, 480), 1);
        assert_eq!(offscreen_dims(1920, 1080, 640, 480), (1920, 1080, 1));
    }

    #[test]
    fn test_integer_scale_limited_by_tighter_axis() {
        // 1920/720 = 2 but 1080/576 = 1; height is the binding side.
        assert_eq!(integer_scale(720, 576, 1920, 1080), 1);
        assert_eq!(integer_scale(640, 240, 1920, 1080), 3);
    }

    #[test]
    fn test_integer_scale_zero_video_guard() {
        assert_eq!(integer_scale(0, 240, 1920, 1080), 1);
        assert_eq!(integer_scale(320, 0, 1920, 1080), 1);
    }

    #[test]
    fn test_builtin_shaders_declare_entry_points() {
        let assets = ShaderAssets::builtin();
        for source in [&assets.scale, &assets.crt] {
            assert!(source.contains("fn vs_main"));
            assert!(source.contains("fn fs_main"));
        }
        assert!(assets.crt.contains("struct CrtUniforms"));
    }

    #[test]
    fn test_fallback_color_is_dark_green() {
        assert_eq!(FALLBACK_COLOR.r, 0.0);
        assert_eq!(FALLBACK_COLOR.g, 0.35);
        assert_eq!(FALLBACK_COLOR.b, 0.0);
        assert_eq!(FALLBACK_COLOR.a, 1.0);
    }
}
