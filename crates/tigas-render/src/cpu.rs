//! CPU reference compositor
//!
//! Splats are composited with classical over-blending in iteration order
//! into an f32 framebuffer, quantized to RGB8 at the end. This is the
//! normative fallback the GPU path must stay visually comparable to.

use crate::camera::{depth_weight, screen_radius, viewport_for, CameraView};
use glam::Vec3;
use rayon::prelude::*;
use std::f32::consts::PI;
use tigas_core::{PoseSample, RgbFrame, SplatPoint};

/// Render a pose sample by projecting and over-blending the point table.
pub fn render_cpu(points: &[SplatPoint], sample: &PoseSample) -> RgbFrame {
    let view = CameraView::new(sample);
    let (width, height) = (view.width, view.height);
    let wi = width as i32;
    let hi = height as i32;

    let mut acc = vec![0.0f32; (width * height * 3) as usize];

    for point in points {
        let Some(proj) = view.project(Vec3::from_array(point.pos)) else {
            continue;
        };

        let px = proj.px as i32;
        let py = proj.py as i32;
        if px < 1 || py < 1 || px >= wi - 1 || py >= hi - 1 {
            continue;
        }

        let weight = depth_weight(proj.depth);
        let footprint = screen_radius(point.radius, width, proj.depth);
        let half = footprint.ceil() as i32;
        let sigma_sq = (footprint * footprint * 0.5).max(0.5);
        let color = [
            point.color[0] as f32,
            point.color[1] as f32,
            point.color[2] as f32,
        ];

        for oy in -half..=half {
            for ox in -half..=half {
                let x = px + ox;
                let y = py + oy;
                if x < 0 || y < 0 || x >= wi || y >= hi {
                    continue;
                }

                let gauss = (-((ox * ox + oy * oy) as f32) / (2.0 * sigma_sq)).exp();
                let alpha = (gauss * point.opacity * weight).clamp(0.0, 1.0);
                if alpha <= 0.0 {
                    continue;
                }

                let idx = ((y as u32 * width + x as u32) * 3) as usize;
                for c in 0..3 {
                    acc[idx + c] = acc[idx + c] * (1.0 - alpha) + color[c] * alpha;
                }
            }
        }
    }

    quantize(acc, width, height)
}

/// Procedural fallback pattern used when no point cloud is loaded. The
/// pattern is a pure function of the pose so end-to-end runs stay
/// deterministic without assets.
pub fn render_pattern(sample: &PoseSample) -> RgbFrame {
    let (width, height) = viewport_for(sample);
    let yaw = sample.angle.to_radians();
    let pitch = sample.elevation.to_radians();
    let phase = 0.6 * sample.x + 0.4 * sample.z + yaw;

    let mut frame = RgbFrame::black(width, height);
    frame
        .data
        .par_chunks_mut((width * 3) as usize)
        .enumerate()
        .for_each(|(y, row)| {
            let ny = y as f32 / height as f32;
            for x in 0..width {
                let nx = x as f32 / width as f32;
                let r = ((nx + phase) * PI).sin() * 0.5 + 0.5;
                let g = ((ny + pitch) * PI).cos() * 0.5 + 0.5;
                let b = ((nx + ny + phase) * PI).sin() * 0.5 + 0.5;

                let idx = (x * 3) as usize;
                row[idx] = (r.clamp(0.0, 1.0) * 255.0) as u8;
                row[idx + 1] = (g.clamp(0.0, 1.0) * 255.0) as u8;
                row[idx + 2] = (b.clamp(0.0, 1.0) * 255.0) as u8;
            }
        });
    frame
}

fn quantize(acc: Vec<f32>, width: u32, height: u32) -> RgbFrame {
    RgbFrame {
        width,
        height,
        data: acc
            .into_iter()
            .map(|v| v.clamp(0.0, 255.0) as u8)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(width: u32, height: u32) -> PoseSample {
        PoseSample {
            frame_id: 0,
            t_ms: 0,
            duration_ms: 0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
            angle: 0.0,
            elevation: 0.0,
            width,
            height,
        }
    }

    #[test]
    fn single_splat_lights_the_center() {
        let points = [SplatPoint::new([0.0, 0.0, 5.0], [255, 0, 0], 1.0, 1.0)];
        let frame = render_cpu(&points, &sample(320, 240));

        let center = frame.pixel_index(160, 120);
        assert!(frame.data[center] > 0, "red channel at the splat center");
        assert_eq!(frame.data[center + 1], 0);
        // Far corner stays untouched.
        let corner = frame.pixel_index(5, 5);
        assert_eq!(&frame.data[corner..corner + 3], &[0, 0, 0]);
    }

    #[test]
    fn splats_behind_the_camera_produce_a_black_frame() {
        let points = [
            SplatPoint::new([0.0, 0.0, -5.0], [255, 255, 255], 1.0, 1.0),
            SplatPoint::new([0.0, 0.0, 0.005], [255, 255, 255], 1.0, 1.0),
        ];
        let frame = render_cpu(&points, &sample(320, 240));

        assert_eq!(frame.width, 320);
        assert_eq!(frame.height, 240);
        assert!(frame.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn edge_proximate_splats_are_culled() {
        // Projects just inside the left edge: (x/z) * w/2 = -159.5 -> px = 0.
        let points = [SplatPoint::new([-4.984, 0.0, 5.0], [255, 255, 255], 1.0, 8.0)];
        let frame = render_cpu(&points, &sample(320, 240));
        assert!(frame.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn over_blending_accumulates_toward_the_splat_color() {
        // Many co-located opaque splats converge on their shared color.
        let points = vec![SplatPoint::new([0.0, 0.0, 1.0], [0, 200, 0], 1.0, 2.0); 16];
        let frame = render_cpu(&points, &sample(320, 240));
        let center = frame.pixel_index(160, 120);
        assert!(frame.data[center + 1] > 150);
    }

    #[test]
    fn pattern_is_pose_dependent_and_nonzero() {
        let a = render_pattern(&sample(128, 96));
        assert_eq!(a.data.len(), 128 * 96 * 3);
        assert!(a.data.iter().any(|&b| b != 0));

        let mut moved = sample(128, 96);
        moved.angle = 45.0;
        moved.x = 1.0;
        let b = render_pattern(&moved);
        assert_ne!(a.data, b.data);

        // Deterministic for identical poses.
        let again = render_pattern(&sample(128, 96));
        assert_eq!(a.data, again.data);
    }

    #[test]
    fn pattern_respects_viewport_clamping() {
        let frame = render_pattern(&sample(4096, 4096));
        assert_eq!((frame.width, frame.height), (1280, 720));
    }
}
