//! GPU fast path
//!
//! Headless wgpu compute pipeline sharing the CPU path's projection rules.
//! The point table is uploaded once at construction; each render dispatches
//! the splat kernel into per-frame accumulation buffers, reads them back
//! through a staging copy, and normalizes by accumulated weight on the host.

use crate::camera::CameraView;
use bytemuck::{Pod, Zeroable};
use thiserror::Error;
use tigas_core::{PoseSample, RgbFrame, SplatPoint};
use wgpu::util::DeviceExt;

const SPLAT_SHADER: &str = include_str!("shaders/splat.wgsl");

const WORKGROUP_SIZE: u32 = 256;

#[derive(Error, Debug)]
pub enum GpuError {
    #[error("no GPU adapter available")]
    AdapterUnavailable,

    #[error("device request failed: {0}")]
    Device(#[from] wgpu::RequestDeviceError),

    #[error("buffer readback failed")]
    Readback,
}

/// Uniform block consumed by the splat kernel. Layout mirrors the WGSL
/// `Params` struct (48 bytes, vec4-aligned).
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct SplatParams {
    width: u32,
    height: u32,
    point_count: u32,
    _pad0: u32,
    eye: [f32; 4],
    yaw_sin: f32,
    yaw_cos: f32,
    pitch_sin: f32,
    pitch_cos: f32,
}

pub struct GpuRenderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_layout: wgpu::BindGroupLayout,
    params_buffer: wgpu::Buffer,
    points_buffer: wgpu::Buffer,
    point_count: u32,
}

impl GpuRenderer {
    /// Acquire a headless device and upload the point table. Any failure
    /// here disables the GPU path for the session.
    pub async fn new(points: &[SplatPoint]) -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(GpuError::AdapterUnavailable)?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("tigas splat renderer"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("splat kernel"),
            source: wgpu::ShaderSource::Wgsl(SPLAT_SHADER.into()),
        });

        let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("splat bindings"),
            entries: &[
                buffer_entry(0, wgpu::BufferBindingType::Uniform),
                buffer_entry(1, wgpu::BufferBindingType::Storage { read_only: true }),
                buffer_entry(2, wgpu::BufferBindingType::Storage { read_only: false }),
                buffer_entry(3, wgpu::BufferBindingType::Storage { read_only: false }),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("splat pipeline layout"),
            bind_group_layouts: &[&bind_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("splat pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: "splat",
            compilation_options: Default::default(),
            cache: None,
        });

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("splat params"),
            size: std::mem::size_of::<SplatParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let packed: Vec<_> = points.iter().map(SplatPoint::packed).collect();
        let points_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("splat points"),
            contents: bytemuck::cast_slice(&packed),
            usage: wgpu::BufferUsages::STORAGE,
        });

        Ok(Self {
            device,
            queue,
            pipeline,
            bind_layout,
            params_buffer,
            points_buffer,
            point_count: points.len() as u32,
        })
    }

    /// Render one pose sample. Errors are terminal for the GPU path; the
    /// caller falls back to the CPU compositor.
    pub fn render(&self, sample: &PoseSample) -> Result<RgbFrame, GpuError> {
        let view = CameraView::new(sample);
        let (width, height) = (view.width, view.height);
        let pixels = (width * height) as u64;

        let params = SplatParams {
            width,
            height,
            point_count: self.point_count,
            _pad0: 0,
            eye: [view.eye.x, view.eye.y, view.eye.z, 0.0],
            yaw_sin: view.yaw_sin,
            yaw_cos: view.yaw_cos,
            pitch_sin: view.pitch_sin,
            pitch_cos: view.pitch_cos,
        };
        self.queue
            .write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));

        // wgpu zero-initializes freshly created buffers, which doubles as
        // clearing the accumulators.
        let accum_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("splat accum"),
            size: pixels * 3 * 4,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let weight_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("splat weight"),
            size: pixels * 4,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let accum_staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("splat accum staging"),
            size: pixels * 3 * 4,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let weight_staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("splat weight staging"),
            size: pixels * 4,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("splat bind group"),
            layout: &self.bind_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.points_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: accum_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: weight_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("splat encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("splat pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(self.point_count.div_ceil(WORKGROUP_SIZE), 1, 1);
        }
        encoder.copy_buffer_to_buffer(&accum_buffer, 0, &accum_staging, 0, pixels * 3 * 4);
        encoder.copy_buffer_to_buffer(&weight_buffer, 0, &weight_staging, 0, pixels * 4);
        self.queue.submit(std::iter::once(encoder.finish()));

        let accum = self.read_back_u32(&accum_staging)?;
        let weight = self.read_back_u32(&weight_staging)?;

        Ok(normalize(accum, weight, width, height))
    }

    fn read_back_u32(&self, buffer: &wgpu::Buffer) -> Result<Vec<u32>, GpuError> {
        let slice = buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| GpuError::Readback)?
            .map_err(|_| GpuError::Readback)?;

        let data = slice.get_mapped_range();
        let out = bytemuck::cast_slice::<u8, u32>(&data).to_vec();
        drop(data);
        buffer.unmap();
        Ok(out)
    }
}

/// Resolve accumulated fixed-point color by accumulated coverage. Pixels no
/// splat touched stay black.
fn normalize(accum: Vec<u32>, weight: Vec<u32>, width: u32, height: u32) -> RgbFrame {
    let mut data = vec![0u8; (width * height * 3) as usize];
    for (i, &w) in weight.iter().enumerate() {
        if w == 0 {
            continue;
        }
        for c in 0..3 {
            let value = accum[i * 3 + c] as f32 / w as f32;
            data[i * 3 + c] = value.clamp(0.0, 255.0) as u8;
        }
    }
    RgbFrame {
        width,
        height,
        data,
    }
}

fn buffer_entry(binding: u32, ty: wgpu::BufferBindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}
