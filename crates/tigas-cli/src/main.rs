//! TIGAS render/encode binary
//!
//! Drives the movement trace through the renderer and encoder stack; see
//! the session module for the per-frame loop.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tigas_stream::{run_session, SessionConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tigas-renderer-encoder")]
#[command(about = "Render a splat scene along a pose trace and encode it per-frame")]
struct Args {
    /// Movement trace JSON path
    #[arg(long)]
    movement: PathBuf,

    /// Output directory for streams and metadata
    #[arg(long = "output-dir")]
    output_dir: PathBuf,

    /// Point cloud PLY path (procedural pattern when omitted)
    #[arg(long)]
    ply: Option<PathBuf>,

    /// Maximum frames to process (0 = whole trace)
    #[arg(long = "max-frames", default_value_t = 600)]
    max_frames: usize,

    #[arg(long, default_value_t = 60)]
    fps: u32,

    #[arg(long, default_value_t = 26)]
    crf: u32,

    /// ffmpeg encoder name
    #[arg(long, default_value = "h264_nvenc")]
    codec: String,

    /// Skip the GPU render path entirely
    #[arg(long = "disable-cuda")]
    disable_cuda: bool,

    /// Extra CRF targets encoded in parallel, comma separated
    #[arg(long = "crf-ladder")]
    crf_ladder: Option<String>,

    /// Mux into a live-DASH directory (implies --realtime)
    #[arg(long = "live-dash")]
    live_dash: bool,

    /// Pace frames at trace presentation times
    #[arg(long)]
    realtime: bool,

    /// Segments retained in the live manifest
    #[arg(long = "dash-window-size", default_value_t = 5)]
    dash_window_size: u32,
}

fn parse_crf_ladder(input: &str) -> Result<Vec<u32>> {
    let mut values = Vec::new();
    for token in input.split(',') {
        if token.is_empty() {
            continue;
        }
        values.push(
            token
                .trim()
                .parse::<u32>()
                .map_err(|_| anyhow::anyhow!("invalid CRF ladder entry: {token:?}"))?,
        );
    }
    Ok(values)
}

async fn run(args: Args) -> Result<()> {
    let crf_ladder = parse_crf_ladder(args.crf_ladder.as_deref().unwrap_or(""))?;

    let config = SessionConfig {
        movement_trace: args.movement,
        output_dir: args.output_dir,
        ply_path: args.ply,
        max_frames: args.max_frames,
        fps: args.fps,
        crf: args.crf,
        codec: args.codec,
        prefer_gpu: !args.disable_cuda,
        crf_ladder,
        live_dash: args.live_dash,
        realtime: args.realtime || args.live_dash,
        dash_window_size: args.dash_window_size,
        show_progress: true,
    };

    let report = run_session(&config).await?;

    println!(
        "Renderer backend: {}",
        if report.used_gpu { "GPU" } else { "CPU" }
    );
    println!("Encoded {} frames", report.frames);
    if let Some(path) = &report.lossless_path {
        println!("Lossless: {}", path.display());
    }
    if config.live_dash {
        println!("LiveDASH: {}", report.lossy_path.display());
    } else {
        println!("Lossy: {}", report.lossy_path.display());
    }
    for path in &report.ladder_paths {
        println!("LossyLadder: {}", path.display());
    }
    println!("Metadata: {}", report.metadata_path.display());
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    if let Err(err) = run(args).await {
        eprintln!("[tigas_renderer_encoder] {err:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_parsing_skips_empty_tokens() {
        assert_eq!(parse_crf_ladder("").unwrap(), Vec::<u32>::new());
        assert_eq!(parse_crf_ladder("28,32,36").unwrap(), vec![28, 32, 36]);
        assert_eq!(parse_crf_ladder("28,,36").unwrap(), vec![28, 36]);
        assert!(parse_crf_ladder("28,abc").is_err());
    }

    #[test]
    fn movement_and_output_dir_are_required() {
        assert!(Args::try_parse_from(["tigas-renderer-encoder"]).is_err());
        assert!(Args::try_parse_from([
            "tigas-renderer-encoder",
            "--movement",
            "trace.json",
            "--output-dir",
            "out",
        ])
        .is_ok());
    }

    #[test]
    fn defaults_match_the_recording_setup() {
        let args = Args::try_parse_from([
            "tigas-renderer-encoder",
            "--movement",
            "trace.json",
            "--output-dir",
            "out",
        ])
        .unwrap();

        assert_eq!(args.max_frames, 600);
        assert_eq!(args.fps, 60);
        assert_eq!(args.crf, 26);
        assert_eq!(args.codec, "h264_nvenc");
        assert_eq!(args.dash_window_size, 5);
        assert!(!args.live_dash);
        assert!(!args.disable_cuda);
    }
}
