//! Pose-to-screen projection
//!
//! Pinhole model with the principal point at the image center and focal
//! lengths equal to the image dimensions. The extrinsic is a translation by
//! the negated pose position followed by a yaw rotation about Y and a pitch
//! rotation about X.

use glam::Vec3;
use tigas_core::PoseSample;

pub const MIN_WIDTH: u32 = 64;
pub const MAX_WIDTH: u32 = 1280;
pub const MIN_HEIGHT: u32 = 64;
pub const MAX_HEIGHT: u32 = 720;

/// Points at or behind this camera-space depth are culled.
pub const NEAR_PLANE: f32 = 0.01;

/// Clamp a sample's requested viewport to the supported range.
pub fn viewport_for(sample: &PoseSample) -> (u32, u32) {
    (
        sample.width.clamp(MIN_WIDTH, MAX_WIDTH),
        sample.height.clamp(MIN_HEIGHT, MAX_HEIGHT),
    )
}

/// A pose sample resolved into the per-frame projection constants shared by
/// the CPU and GPU backends.
#[derive(Clone, Copy, Debug)]
pub struct CameraView {
    pub width: u32,
    pub height: u32,
    pub eye: Vec3,
    pub yaw_sin: f32,
    pub yaw_cos: f32,
    pub pitch_sin: f32,
    pub pitch_cos: f32,
    cx: f32,
    cy: f32,
}

/// Result of projecting a world point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Projected {
    pub px: f32,
    pub py: f32,
    /// Camera-space depth after both rotations
    pub depth: f32,
}

impl CameraView {
    pub fn new(sample: &PoseSample) -> Self {
        let (width, height) = viewport_for(sample);
        let yaw = sample.angle.to_radians();
        let pitch = sample.elevation.to_radians();
        Self {
            width,
            height,
            eye: Vec3::new(sample.x, sample.y, sample.z),
            yaw_sin: yaw.sin(),
            yaw_cos: yaw.cos(),
            pitch_sin: pitch.sin(),
            pitch_cos: pitch.cos(),
            cx: width as f32 * 0.5,
            cy: height as f32 * 0.5,
        }
    }

    /// Project a world-space point; `None` when it falls at or behind the
    /// near plane.
    pub fn project(&self, pos: Vec3) -> Option<Projected> {
        let t = pos - self.eye;

        let xz_x = self.yaw_cos * t.x - self.yaw_sin * t.z;
        let xz_z = self.yaw_sin * t.x + self.yaw_cos * t.z;
        let yz_y = self.pitch_cos * t.y - self.pitch_sin * xz_z;
        let yz_z = self.pitch_sin * t.y + self.pitch_cos * xz_z;

        if yz_z <= NEAR_PLANE {
            return None;
        }

        Some(Projected {
            px: self.cx + (xz_x / yz_z) * self.width as f32 * 0.5,
            py: self.cy - (yz_y / yz_z) * self.height as f32 * 0.5,
            depth: yz_z,
        })
    }
}

/// Depth attenuation applied to a splat's opacity.
#[inline]
pub fn depth_weight(depth: f32) -> f32 {
    (2.0 / (1.0 + depth * depth)).clamp(0.15, 1.0)
}

/// Footprint radius of a splat on screen, in pixels.
#[inline]
pub fn screen_radius(radius: f32, width: u32, depth: f32) -> f32 {
    ((radius * width as f32 / depth.max(0.05)) * 0.05).clamp(1.0, 9.0)
}
