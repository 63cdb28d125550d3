//! CRT emulation parameters and their GPU uniform layout.

/// User-facing CRT controls. All fields are free-range scalars; whatever
/// clamping the effect needs happens in the shader, so values read back
/// exactly as written.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrtParams {
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub gamma: f32,
    pub scanline_strength: f32,
    pub phosphor_strength: f32,
    pub scanline_phase: f32,
    /// 0 none, 1 aperture grille, 2 shadow mask. Carried as f32 because it
    /// rides the same uniform block as everything else.
    pub mask_type: f32,
    pub beam_width: f32,
    pub h_size: f32,
    pub v_size: f32,
}

impl Default for CrtParams {
    fn default() -> Self {
        Self {
            brightness: 0.0,
            contrast: 1.1,
            saturation: 1.1,
            gamma: 1.15,
            scanline_strength: 0.20,
            phosphor_strength: 0.12,
            scanline_phase: 0.0,
            mask_type: 0.0,
            beam_width: 0.18,
            // 1.07 matches the horizontal overscan of a PAL set.
            h_size: 1.07,
            v_size: 1.0,
        }
    }
}

/// GPU mirror of the CRT uniform block. Field order, the vec2 positions,
/// and the trailing pad must match the WGSL struct in the CRT shader; the
/// block is 64 bytes on both sides.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct CrtUniforms {
    brightness: f32,
    contrast: f32,
    saturation: f32,
    scanline_strength: f32,
    gamma: f32,
    phosphor_strength: f32,
    screen_size: [f32; 2],
    effective_size: [f32; 2],
    scanline_phase: f32,
    mask_type: f32,
    beam_width: f32,
    h_size: f32,
    v_size: f32,
    _pad: f32,
}

impl CrtUniforms {
    /// Snapshot of `params` for one frame. Screen and effective dimensions
    /// are the offscreen target's, keeping shader space stable while the
    /// window resizes.
    pub fn new(params: &CrtParams, target_width: u32, target_height: u32) -> Self {
        Self {
            brightness: params.brightness,
            contrast: params.contrast,
            saturation: params.saturation,
            scanline_strength: params.scanline_strength,
            gamma: params.gamma,
            phosphor_strength: params.phosphor_strength,
            screen_size: [target_width as f32, target_height as f32],
            effective_size: [target_width as f32, target_height as f32],
            scanline_phase: params.scanline_phase,
            mask_type: params.mask_type,
            beam_width: params.beam_width,
            h_size: params.h_size,
            v_size: params.v_size,
            _pad: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params() {
        let params = CrtParams::default();
        assert_eq!(params.brightness, 0.0);
        assert_eq!(params.contrast, 1.1);
        assert_eq!(params.saturation, 1.1);
        assert_eq!(params.gamma, 1.15);
        assert_eq!(params.scanline_strength, 0.20);
        assert_eq!(params.phosphor_strength, 0.12);
        assert_eq!(params.scanline_phase, 0.0);
        assert_eq!(params.mask_type, 0.0);
        assert_eq!(params.beam_width, 0.18);
        assert_eq!(params.h_size, 1.07);
        assert_eq!(params.v_size, 1.0);
    }

    #[test]
    fn test_uniform_block_is_64_bytes() {
        assert_eq!(std::mem::size_of::<CrtUniforms>(), 64);
        let uniforms = CrtUniforms::new(&CrtParams::default(), 1280, 960);
        assert_eq!(bytemuck::bytes_of(&uniforms).len(), 64);
    }

    #[test]
    fn test_uniform_mapping() {
        let params = CrtParams {
            brightness: 0.25,
            contrast: 1.5,
            saturation: 0.9,
            gamma: 2.2,
            scanline_strength: 0.6,
            phosphor_strength: 0.3,
            scanline_phase: 3.0,
            mask_type: 2.0,
            beam_width: 0.5,
            h_size: 1.2,
            v_size: 0.95,
        };
        let uniforms = CrtUniforms::new(&params, 1280, 960);

        assert_eq!(uniforms.brightness, 0.25);
        assert_eq!(uniforms.contrast, 1.5);
        assert_eq!(uniforms.saturation, 0.9);
        assert_eq!(uniforms.gamma, 2.2);
        assert_eq!(uniforms.scanline_strength, 0.6);
        assert_eq!(uniforms.phosphor_strength, 0.3);
        assert_eq!(uniforms.scanline_phase, 3.0);
        assert_eq!(uniforms.mask_type, 2.0);
        assert_eq!(uniforms.beam_width, 0.5);
        assert_eq!(uniforms.h_size, 1.2);
        assert_eq!(uniforms.v_size, 0.95);
        assert_eq!(uniforms.screen_size, [1280.0, 960.0]);
        assert_eq!(uniforms.effective_size, [1280.0, 960.0]);
        assert_eq!(uniforms._pad, 0.0);
    }

    #[test]
    fn test_uniform_scalars_pass_through_unclamped() {
        let params = CrtParams {
            brightness: -4.0,
            contrast: 100.0,
            mask_type: 9.5,
            ..Default::default()
        };
        let uniforms = CrtUniforms::new(&params, 64, 64);
        assert_eq!(uniforms.brightness, -4.0);
        assert_eq!(uniforms.contrast, 100.0);
        assert_eq!(uniforms.mask_type, 9.5);
    }
}
