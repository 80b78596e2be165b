//! Gaussian splat primitives

use bytemuck::{Pod, Zeroable};

/// A single Gaussian splat as the renderer consumes it.
///
/// Built once from a PLY file and immutable afterwards; the point table is
/// shared by reference between the CPU and GPU backends.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SplatPoint {
    /// World-space position
    pub pos: [f32; 3],
    /// RGB color, 8-bit
    pub color: [u8; 3],
    /// Opacity in (0, 1]
    pub opacity: f32,
    /// Screen-space radius scalar in [0.25, 8.0]
    pub radius: f32,
}

impl SplatPoint {
    pub fn new(pos: [f32; 3], color: [u8; 3], opacity: f32, radius: f32) -> Self {
        Self {
            pos,
            color,
            opacity,
            radius,
        }
    }

    /// Pack for GPU upload.
    pub fn packed(&self) -> PackedPoint {
        PackedPoint {
            pos_radius: [self.pos[0], self.pos[1], self.pos[2], self.radius],
            color_opacity: [
                self.color[0] as f32,
                self.color[1] as f32,
                self.color[2] as f32,
                self.opacity,
            ],
        }
    }
}

/// GPU mirror of [`SplatPoint`].
///
/// Memory layout: 32 bytes, two vec4 slots so the WGSL struct needs no
/// manual padding.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct PackedPoint {
    /// xyz = position, w = radius scalar
    pub pos_radius: [f32; 4],
    /// xyz = color (0..255), w = opacity
    pub color_opacity: [f32; 4],
}

impl PackedPoint {
    pub const SIZE: usize = std::mem::size_of::<Self>();
}
