//! Render/encode session orchestrator
//!
//! Drives the trace through the renderer and every configured encoder in a
//! strict serial loop, one frame at a time. In realtime mode each sample
//! waits for its presentation deadline before being processed, which is
//! what paces the live-DASH output at capture cadence.

use crate::encoder::{EncodeConfig, VideoEncoder};
use crate::metadata::MetadataWriter;
use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tigas_core::{load_movement_trace, FrameMetadata};
use tigas_render::{viewport_for, Renderer};
use tokio::time::Instant;
use tracing::info;

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub movement_trace: PathBuf,
    pub output_dir: PathBuf,
    pub ply_path: Option<PathBuf>,
    /// 0 = unbounded
    pub max_frames: usize,
    pub fps: u32,
    pub crf: u32,
    pub codec: String,
    pub prefer_gpu: bool,
    /// Extra CRF targets encoded in parallel (file mode only)
    pub crf_ladder: Vec<u32>,
    pub live_dash: bool,
    pub realtime: bool,
    pub dash_window_size: u32,
    pub show_progress: bool,
}

pub struct SessionReport {
    pub frames: u64,
    pub lossless_path: Option<PathBuf>,
    pub lossy_path: PathBuf,
    pub ladder_paths: Vec<PathBuf>,
    pub metadata_path: PathBuf,
    pub used_gpu: bool,
}

pub async fn run_session(config: &SessionConfig) -> Result<SessionReport> {
    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("unable to create output dir {}", config.output_dir.display()))?;

    let samples = load_movement_trace(&config.movement_trace, config.max_frames)?;
    if samples.is_empty() {
        bail!("movement trace has no samples");
    }

    let renderer = Renderer::new(config.ply_path.as_deref(), config.prefer_gpu).await;
    info!(
        backend = if renderer.is_using_gpu() { "GPU" } else { "CPU" },
        points = renderer.point_count(),
        frames = samples.len(),
        "session starting"
    );

    // All encoders are sized by the first sample's clamped viewport; a
    // trace that changes dimensions mid-stream fails at encode_frame.
    let (width, height) = viewport_for(&samples[0]);

    let lossy_path = if config.live_dash {
        config.output_dir.join("stream.mpd")
    } else {
        config.output_dir.join("test_stream_lossy.mp4")
    };
    let metadata_path = config.output_dir.join("frame_metadata.csv");

    let lossy_config = EncodeConfig {
        codec: config.codec.clone(),
        fps: config.fps,
        crf: config.crf,
        lossless: false,
        live_dash: config.live_dash,
        dash_window_size: config.dash_window_size,
        ..Default::default()
    };
    let mut lossy = VideoEncoder::new(&lossy_path, &lossy_config, width, height).await?;

    // Ground truth runs beside the lossy stream except when publishing
    // live, where a second full-rate encode would fight the cadence.
    let mut lossless_path = None;
    let mut lossless = None;
    if !config.live_dash {
        let path = config.output_dir.join("ground_truth_lossless.mkv");
        let lossless_config = EncodeConfig {
            codec: "ffv1".to_string(),
            fps: config.fps,
            crf: 0,
            lossless: true,
            ..Default::default()
        };
        lossless = Some(VideoEncoder::new(&path, &lossless_config, width, height).await?);
        lossless_path = Some(path);
    }

    let mut ladder = Vec::new();
    let mut ladder_paths = Vec::new();
    if !config.live_dash {
        for (idx, &ladder_crf) in config.crf_ladder.iter().enumerate() {
            if ladder_crf == config.crf {
                continue;
            }
            let path = config
                .output_dir
                .join(format!("test_stream_lossy_p{idx}.mp4"));
            let ladder_config = EncodeConfig {
                crf: ladder_crf,
                ..lossy_config.clone()
            };
            ladder.push(VideoEncoder::new(&path, &ladder_config, width, height).await?);
            ladder_paths.push(path);
        }
    }

    let mut metadata = MetadataWriter::create(&metadata_path)
        .with_context(|| format!("unable to open metadata sidecar {}", metadata_path.display()))?;

    let progress = if config.show_progress && !config.realtime {
        let bar = ProgressBar::new(samples.len() as u64);
        bar.set_style(
            ProgressStyle::with_template("{bar:36} {pos}/{len} frames").unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Some(bar)
    } else {
        None
    };

    let start_clock = Instant::now();
    for sample in &samples {
        if config.realtime {
            let deadline = start_clock + Duration::from_millis(sample.t_ms.max(0) as u64);
            tokio::time::sleep_until(deadline).await;
        }

        let frame = renderer.render(sample);
        let meta = FrameMetadata {
            frame_id: sample.frame_id,
            timestamp_ms: sample.t_ms,
        };

        if let Some(encoder) = lossless.as_mut() {
            encoder.encode_frame(&frame, meta).await?;
        }
        lossy.encode_frame(&frame, meta).await?;
        for encoder in ladder.iter_mut() {
            encoder.encode_frame(&frame, meta).await?;
        }
        metadata.append(&meta)?;

        if let Some(bar) = &progress {
            bar.inc(1);
        }
    }

    if let Some(encoder) = lossless.take() {
        encoder.flush().await?;
    }
    let frames = lossy.flush().await?;
    for encoder in ladder {
        encoder.flush().await?;
    }
    metadata.finish()?;

    if let Some(bar) = progress {
        bar.finish_and_clear();
    }
    info!(frames, "session complete");

    Ok(SessionReport {
        frames,
        lossless_path,
        lossy_path,
        ladder_paths,
        metadata_path,
        used_gpu: renderer.is_using_gpu(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_trace(dir: &std::path::Path, body: &str) -> PathBuf {
        let path = dir.join("trace.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    fn base_config(dir: &std::path::Path, trace: PathBuf) -> SessionConfig {
        SessionConfig {
            movement_trace: trace,
            output_dir: dir.join("out"),
            ply_path: None,
            max_frames: 0,
            fps: 30,
            crf: 28,
            codec: "libx264".to_string(),
            prefer_gpu: false,
            crf_ladder: Vec::new(),
            live_dash: false,
            realtime: false,
            dash_window_size: 5,
            show_progress: false,
        }
    }

    #[tokio::test]
    async fn empty_trace_aborts_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let trace = write_trace(dir.path(), "[]");
        let config = base_config(dir.path(), trace);

        let err = run_session(&config).await.unwrap_err();
        assert!(err.to_string().contains("no samples"));
    }

    #[tokio::test]
    async fn unreadable_trace_aborts_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = base_config(dir.path(), dir.path().join("missing.json"));
        config.max_frames = 1;

        assert!(run_session(&config).await.is_err());
    }

    // End-to-end invariants: one segment per trace sample, sidecar lines
    // matching, SEI identities recoverable from the published chunks.
    #[tokio::test]
    #[ignore = "requires a system ffmpeg"]
    async fn single_frame_file_session_writes_one_frame_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let trace = write_trace(
            dir.path(),
            r#"[{"tMs":0,"x":0,"y":0,"z":0,"angle":0,"elevation":0,"width":320,"height":240}]"#,
        );
        let config = base_config(dir.path(), trace);

        let report = run_session(&config).await.unwrap();

        assert_eq!(report.frames, 1);
        assert!(report.lossy_path.exists());
        assert!(report.lossless_path.as_ref().unwrap().exists());
        let sidecar = std::fs::read_to_string(&report.metadata_path).unwrap();
        assert_eq!(sidecar, "0,0\n");
    }

    #[tokio::test]
    #[ignore = "requires a system ffmpeg"]
    async fn live_dash_session_publishes_manifest_and_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let trace = write_trace(
            dir.path(),
            r#"[{"tMs":0,"width":320,"height":240},
                {"tMs":16,"width":320,"height":240},
                {"tMs":33,"width":320,"height":240}]"#,
        );
        let mut config = base_config(dir.path(), trace);
        config.live_dash = true;

        let report = run_session(&config).await.unwrap();

        assert_eq!(report.frames, 3);
        assert!(config.output_dir.join("stream.mpd").exists());
        assert!(config.output_dir.join("init_0.mp4").exists());
        assert!(config.output_dir.join("chunk_0_1.m4s").exists());
        assert!(report.lossless_path.is_none());

        let sidecar = std::fs::read_to_string(&report.metadata_path).unwrap();
        assert_eq!(sidecar, "0,0\n1,16\n2,33\n");
    }
}
