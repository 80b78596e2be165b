//! Gaussian splat viewport renderer
//!
//! Two backends share one contract: given a pose sample, produce an RGB
//! frame at the clamped viewport. The GPU path is attempted when requested
//! and available; any failure permanently drops the session to the CPU
//! compositor. An empty point table renders the procedural test pattern so
//! the pipeline stays exercisable without assets.

pub mod camera;
pub mod cpu;
pub mod gpu;

pub use camera::{viewport_for, CameraView};
pub use gpu::GpuError;

use cpu::{render_cpu, render_pattern};
use gpu::GpuRenderer;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tigas_core::{load_points, PoseSample, RgbFrame, SplatPoint};
use tracing::{info, warn};

pub struct Renderer {
    points: Arc<[SplatPoint]>,
    gpu: Option<GpuRenderer>,
    // Flips false on the first GPU failure; render() stays &self.
    gpu_enabled: AtomicBool,
}

impl Renderer {
    /// Build a renderer from an optional PLY path. A missing or unusable
    /// point cloud degrades to the procedural pattern rather than failing.
    pub async fn new(ply_path: Option<&Path>, prefer_gpu: bool) -> Self {
        let points: Arc<[SplatPoint]> = match ply_path {
            Some(path) => load_points(path),
            None => Arc::from(Vec::new()),
        };
        Self::with_points(points, prefer_gpu).await
    }

    /// Build from an in-memory point table (tests, tools).
    pub async fn with_points(points: Arc<[SplatPoint]>, prefer_gpu: bool) -> Self {
        let gpu = if prefer_gpu && !points.is_empty() {
            match GpuRenderer::new(&points).await {
                Ok(gpu) => {
                    info!("GPU splat renderer ready");
                    Some(gpu)
                }
                Err(err) => {
                    warn!(error = %err, "GPU renderer unavailable, using CPU compositor");
                    None
                }
            }
        } else {
            None
        };

        let gpu_enabled = AtomicBool::new(gpu.is_some());
        Self {
            points,
            gpu,
            gpu_enabled,
        }
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// Whether the next render will take the GPU path.
    pub fn is_using_gpu(&self) -> bool {
        self.gpu_enabled.load(Ordering::Relaxed)
    }

    /// Render one pose sample. Never fails: GPU errors demote the session
    /// to the CPU compositor for all remaining frames.
    pub fn render(&self, sample: &PoseSample) -> RgbFrame {
        if self.points.is_empty() {
            return render_pattern(sample);
        }

        if self.gpu_enabled.load(Ordering::Relaxed) {
            if let Some(gpu) = &self.gpu {
                match gpu.render(sample) {
                    Ok(frame) => return frame,
                    Err(err) => {
                        self.gpu_enabled.store(false, Ordering::Relaxed);
                        warn!(error = %err, "GPU render failed, switching to CPU for the rest of the session");
                    }
                }
            }
        }

        render_cpu(&self.points, sample)
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

    #[tokio::test]
    async fn empty_table_renders_the_pattern() {
        let renderer = Renderer::with_points(Arc::from(Vec::new()), false).await;
        let frame = renderer.render(&sample(320, 240));
        assert_eq!((frame.width, frame.height), (320, 240));
        assert!(frame.data.iter().any(|&b| b != 0));
        assert!(!renderer.is_using_gpu());
    }

    #[tokio::test]
    async fn cpu_only_renderer_reports_cpu_backend() {
        let points: Arc<[SplatPoint]> =
            Arc::from(vec![SplatPoint::new([0.0, 0.0, 5.0], [255, 0, 0], 1.0, 1.0)]);
        let renderer = Renderer::with_points(points, false).await;
        assert!(!renderer.is_using_gpu());

        let frame = renderer.render(&sample(320, 240));
        let center = frame.pixel_index(160, 120);
        assert!(frame.data[center] > 0);
    }

    #[tokio::test]
    async fn viewport_dimensions_follow_the_sample() {
        let renderer = Renderer::with_points(Arc::from(Vec::new()), false).await;
        let frame = renderer.render(&sample(5000, 10));
        assert_eq!((frame.width, frame.height), (1280, 64));
    }
}
