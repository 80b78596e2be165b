//! Per-frame video encoder
//!
//! Two ffmpeg children per lossy stream: an encode stage turning raw RGB24
//! frames into a GOP=1, B-frame-free Annex-B elementary stream, and a
//! `-c copy` mux stage producing either a single MP4 or a live-DASH
//! directory of single-frame CMAF chunks. Between them a pump task splits
//! access units, pairs each with its queued frame identity, and injects the
//! SEI. The lossless FFV1 configuration needs neither NAL surgery nor a
//! copy stage and collapses to a single child muxing straight to MKV.

use crate::error::EncoderError;
use crate::nal::{AccessUnitSplitter, Codec};
use crate::sei::{detect_framing, inject_identity, PacketFraming};
use bytes::Bytes;
use std::path::Path;
use std::process::Stdio;
use tigas_core::{FrameMetadata, RgbFrame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Encoder configuration; one value per output stream.
#[derive(Clone, Debug)]
pub struct EncodeConfig {
    /// ffmpeg encoder name (`libx264`, `h264_nvenc`, `libx265`, ...)
    pub codec: String,
    pub fps: u32,
    /// Quality target (`-crf`, or `-cq` for nvenc); ignored when lossless
    pub crf: u32,
    /// Use FFV1 regardless of `codec`
    pub lossless: bool,
    /// Mux to a live-DASH directory instead of a single file
    pub live_dash: bool,
    /// Rolling manifest window (live-DASH only)
    pub dash_window_size: u32,
    pub dash_init_seg_name: String,
    pub dash_media_seg_name: String,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            codec: "h264_nvenc".to_string(),
            fps: 60,
            crf: 26,
            lossless: false,
            live_dash: false,
            dash_window_size: 5,
            dash_init_seg_name: "init_$RepresentationID$.mp4".to_string(),
            dash_media_seg_name: "chunk_$RepresentationID$_$Number$.m4s".to_string(),
        }
    }
}

enum Backend {
    /// encode child -> pump (AU split + SEI inject) -> mux child
    Pipeline {
        encoder: Child,
        encoder_stdin: ChildStdin,
        meta_tx: mpsc::UnboundedSender<FrameMetadata>,
        pump: JoinHandle<Result<u64, EncoderError>>,
    },
    /// single child muxing to the output file (FFV1)
    Direct { child: Child, stdin: ChildStdin },
}

pub struct VideoEncoder {
    width: u32,
    height: u32,
    frames_sent: u64,
    backend: Backend,
}

impl VideoEncoder {
    /// Open an encoder for fixed `width` x `height` frames writing to
    /// `output_path` (an `.mp4`/`.mkv` file, or the `.mpd` manifest path in
    /// live-DASH mode).
    pub async fn new(
        output_path: &Path,
        config: &EncodeConfig,
        width: u32,
        height: u32,
    ) -> Result<Self, EncoderError> {
        let backend = if config.lossless {
            let mut child = spawn_ffmpeg(&lossless_args(output_path, config, width, height))?;
            let stdin = child
                .stdin
                .take()
                .ok_or(EncoderError::MissingPipe { tool: "ffmpeg" })?;
            Backend::Direct { child, stdin }
        } else {
            let codec = Codec::from_encoder_name(&config.codec);

            let mut encoder = spawn_ffmpeg(&encode_args(config, width, height))?;
            let encoder_stdin = encoder
                .stdin
                .take()
                .ok_or(EncoderError::MissingPipe { tool: "encoder" })?;
            let encoder_stdout = encoder
                .stdout
                .take()
                .ok_or(EncoderError::MissingPipe { tool: "encoder" })?;

            let mut muxer = spawn_ffmpeg(&mux_args(output_path, config, codec))?;
            let mux_stdin = muxer
                .stdin
                .take()
                .ok_or(EncoderError::MissingPipe { tool: "muxer" })?;

            let (meta_tx, meta_rx) = mpsc::unbounded_channel();
            let pump = tokio::spawn(pump_access_units(
                encoder_stdout,
                mux_stdin,
                muxer,
                meta_rx,
                codec,
            ));

            Backend::Pipeline {
                encoder,
                encoder_stdin,
                meta_tx,
                pump,
            }
        };

        debug!(
            path = %output_path.display(),
            codec = %config.codec,
            lossless = config.lossless,
            live_dash = config.live_dash,
            "encoder opened"
        );

        Ok(Self {
            width,
            height,
            frames_sent: 0,
            backend,
        })
    }

    /// Submit one frame. The identity is queued ahead of the pixel data so
    /// the pump can never observe an access unit without its metadata.
    pub async fn encode_frame(
        &mut self,
        frame: &RgbFrame,
        meta: FrameMetadata,
    ) -> Result<(), EncoderError> {
        if frame.width != self.width || frame.height != self.height {
            return Err(EncoderError::DimensionMismatch {
                got_w: frame.width,
                got_h: frame.height,
                want_w: self.width,
                want_h: self.height,
            });
        }
        let want = (self.width * self.height * 3) as usize;
        if frame.data.len() != want {
            return Err(EncoderError::BadFrameLength {
                got: frame.data.len(),
                want,
            });
        }

        match &mut self.backend {
            Backend::Pipeline {
                encoder_stdin,
                meta_tx,
                ..
            } => {
                // A closed channel means the pump died; surface its error
                // on flush, fail the write here.
                meta_tx
                    .send(meta)
                    .map_err(|_| EncoderError::MetadataUnderrun)?;
                encoder_stdin.write_all(&frame.data).await?;
            }
            Backend::Direct { stdin, .. } => {
                stdin.write_all(&frame.data).await?;
            }
        }
        self.frames_sent += 1;
        Ok(())
    }

    /// Terminal: drain the codec, finalize the container, reap children.
    /// Returns the number of encoded frames.
    pub async fn flush(self) -> Result<u64, EncoderError> {
        match self.backend {
            Backend::Pipeline {
                mut encoder,
                encoder_stdin,
                meta_tx,
                pump,
            } => {
                drop(meta_tx);
                drop(encoder_stdin);

                let status = encoder.wait().await?;
                if !status.success() {
                    return Err(EncoderError::EncoderExit(status));
                }

                let encoded = pump.await??;
                if encoded != self.frames_sent {
                    return Err(EncoderError::FrameCountMismatch {
                        sent: self.frames_sent,
                        encoded,
                    });
                }
                Ok(encoded)
            }
            Backend::Direct { mut child, stdin } => {
                drop(stdin);
                let status = child.wait().await?;
                if !status.success() {
                    return Err(EncoderError::EncoderExit(status));
                }
                Ok(self.frames_sent)
            }
        }
    }
}

/// Drain encoder output, pair every access unit with its queued identity,
/// inject the SEI, and feed the muxer. Ends when the encoder closes its
/// stdout; finalizes and reaps the muxer.
async fn pump_access_units(
    mut encoder_stdout: ChildStdout,
    mut mux_stdin: ChildStdin,
    mut muxer: Child,
    mut meta_rx: mpsc::UnboundedReceiver<FrameMetadata>,
    codec: Codec,
) -> Result<u64, EncoderError> {
    let mut splitter = AccessUnitSplitter::new(codec);
    let mut framing: Option<PacketFraming> = None;
    let mut encoded = 0u64;
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = encoder_stdout.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        splitter.push(&buf[..n]);
        for unit in splitter.drain() {
            write_tagged_unit(
                &mut mux_stdin,
                &mut meta_rx,
                &mut framing,
                codec,
                unit,
                &mut encoded,
            )
            .await?;
        }
    }
    if let Some(tail) = splitter.finish() {
        write_tagged_unit(
            &mut mux_stdin,
            &mut meta_rx,
            &mut framing,
            codec,
            tail,
            &mut encoded,
        )
        .await?;
    }

    drop(mux_stdin);
    let status = muxer.wait().await?;
    if !status.success() {
        return Err(EncoderError::MuxerExit(status));
    }
    Ok(encoded)
}

async fn write_tagged_unit(
    mux_stdin: &mut ChildStdin,
    meta_rx: &mut mpsc::UnboundedReceiver<FrameMetadata>,
    framing: &mut Option<PacketFraming>,
    codec: Codec,
    unit: Bytes,
    encoded: &mut u64,
) -> Result<(), EncoderError> {
    // GOP=1 and no B-frames give a one-to-one, in-order mapping from
    // submitted frames to access units, so FIFO pairing is exact.
    let meta = meta_rx.recv().await.ok_or(EncoderError::MetadataUnderrun)?;
    let framing = *framing.get_or_insert_with(|| detect_framing(&unit));
    let tagged = inject_identity(codec, framing, &unit, &meta);
    mux_stdin.write_all(&tagged).await?;
    *encoded += 1;
    Ok(())
}

fn spawn_ffmpeg(args: &[String]) -> Result<Child, EncoderError> {
    let mut cmd = Command::new("ffmpeg");
    cmd.args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    cmd.spawn().map_err(|source| EncoderError::Spawn {
        tool: "ffmpeg",
        source,
    })
}

fn raw_input_args(fps: u32, width: u32, height: u32) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-nostats".into(),
        "-y".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "rgb24".into(),
        "-s".into(),
        format!("{width}x{height}"),
        "-r".into(),
        fps.to_string(),
        "-i".into(),
        "pipe:0".into(),
        "-an".into(),
    ]
}

/// Encode stage: raw RGB24 in, zero-latency all-intra Annex-B out.
fn encode_args(config: &EncodeConfig, width: u32, height: u32) -> Vec<String> {
    let codec = Codec::from_encoder_name(&config.codec);
    let is_nvenc = config.codec.contains("nvenc");

    let mut args = raw_input_args(config.fps, width, height);
    args.extend(["-c:v".into(), config.codec.clone()]);
    args.extend([
        "-g".into(),
        "1".into(),
        "-keyint_min".into(),
        "1".into(),
        "-bf".into(),
        "0".into(),
    ]);
    if is_nvenc {
        args.extend([
            "-preset".into(),
            "p2".into(),
            "-tune".into(),
            "ll".into(),
            "-cq".into(),
            config.crf.to_string(),
            "-pix_fmt".into(),
            "nv12".into(),
        ]);
    } else {
        args.extend([
            "-preset".into(),
            "veryfast".into(),
            "-tune".into(),
            "zerolatency".into(),
            "-crf".into(),
            config.crf.to_string(),
            "-pix_fmt".into(),
            "yuv420p".into(),
        ]);
    }
    let (bsf, format) = match codec {
        Codec::H264 => ("h264_metadata=aud=insert", "h264"),
        Codec::Hevc => ("hevc_metadata=aud=insert", "hevc"),
    };
    args.extend([
        "-bsf:v".into(),
        bsf.into(),
        "-f".into(),
        format.into(),
        "pipe:1".into(),
    ]);
    args
}

/// Mux stage: SEI-tagged elementary stream in, container out, stream copy.
fn mux_args(output_path: &Path, config: &EncodeConfig, codec: Codec) -> Vec<String> {
    let input_format = match codec {
        Codec::H264 => "h264",
        Codec::Hevc => "hevc",
    };
    let mut args = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-nostats".into(),
        "-y".into(),
        "-fflags".into(),
        "+genpts".into(),
        "-r".into(),
        config.fps.to_string(),
        "-f".into(),
        input_format.into(),
        "-i".into(),
        "pipe:0".into(),
        "-c".into(),
        "copy".into(),
    ];
    if config.live_dash {
        args.extend([
            "-f".into(),
            "dash".into(),
            "-seg_duration".into(),
            format!("{:.6}", 1.0 / config.fps as f64),
            "-window_size".into(),
            config.dash_window_size.to_string(),
            "-streaming".into(),
            "1".into(),
            "-ldash".into(),
            "1".into(),
            "-use_template".into(),
            "1".into(),
            "-use_timeline".into(),
            "1".into(),
            "-init_seg_name".into(),
            config.dash_init_seg_name.clone(),
            "-media_seg_name".into(),
            config.dash_media_seg_name.clone(),
        ]);
    } else {
        args.extend([
            "-f".into(),
            "mp4".into(),
            "-movflags".into(),
            "+faststart".into(),
        ]);
    }
    args.push(output_path.display().to_string());
    args
}

/// Lossless stage: FFV1 straight to MKV, no NAL layer to tag.
fn lossless_args(output_path: &Path, config: &EncodeConfig, width: u32, height: u32) -> Vec<String> {
    let mut args = raw_input_args(config.fps, width, height);
    args.extend([
        "-c:v".into(),
        "ffv1".into(),
        "-g".into(),
        "1".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-f".into(),
        "matroska".into(),
    ]);
    args.push(output_path.display().to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(codec: &str) -> EncodeConfig {
        EncodeConfig {
            codec: codec.to_string(),
            fps: 30,
            crf: 23,
            ..Default::default()
        }
    }

    #[test]
    fn software_encode_args_are_all_intra_and_zero_latency() {
        let args = encode_args(&config("libx264"), 320, 240);
        let joined = args.join(" ");

        assert!(joined.contains("-pix_fmt rgb24"));
        assert!(joined.contains("-s 320x240"));
        assert!(joined.contains("-g 1"));
        assert!(joined.contains("-bf 0"));
        assert!(joined.contains("-tune zerolatency"));
        assert!(joined.contains("-crf 23"));
        assert!(joined.contains("-bsf:v h264_metadata=aud=insert"));
        assert!(joined.ends_with("-f h264 pipe:1"));
    }

    #[test]
    fn nvenc_args_use_cq_and_nv12() {
        let args = encode_args(&config("h264_nvenc"), 320, 240);
        let joined = args.join(" ");

        assert!(joined.contains("-cq 23"));
        assert!(joined.contains("-pix_fmt nv12"));
        assert!(!joined.contains("-crf"));
    }

    #[test]
    fn hevc_args_switch_the_nal_family() {
        let args = encode_args(&config("libx265"), 320, 240);
        let joined = args.join(" ");

        assert!(joined.contains("-bsf:v hevc_metadata=aud=insert"));
        assert!(joined.ends_with("-f hevc pipe:1"));
    }

    #[test]
    fn dash_mux_args_carry_the_live_options() {
        let mut cfg = config("libx264");
        cfg.live_dash = true;
        cfg.dash_window_size = 5;
        let args = mux_args(Path::new("/out/stream.mpd"), &cfg, Codec::H264);
        let joined = args.join(" ");

        assert!(joined.contains("-c copy"));
        assert!(joined.contains("-f dash"));
        assert!(joined.contains("-seg_duration 0.033333"));
        assert!(joined.contains("-window_size 5"));
        assert!(joined.contains("-streaming 1"));
        assert!(joined.contains("-ldash 1"));
        assert!(joined.contains("-use_template 1"));
        assert!(joined.contains("-use_timeline 1"));
        assert!(joined.contains("-init_seg_name init_$RepresentationID$.mp4"));
        assert!(joined.contains("-media_seg_name chunk_$RepresentationID$_$Number$.m4s"));
        assert!(joined.ends_with("/out/stream.mpd"));
    }

    #[test]
    fn file_mux_args_produce_a_faststart_mp4() {
        let args = mux_args(Path::new("/out/test_stream_lossy.mp4"), &config("libx264"), Codec::H264);
        let joined = args.join(" ");

        assert!(joined.contains("-f mp4"));
        assert!(joined.contains("-movflags +faststart"));
        assert!(joined.contains("-fflags +genpts"));
    }

    #[test]
    fn lossless_args_select_ffv1_mkv() {
        let mut cfg = config("libx264");
        cfg.lossless = true;
        let args = lossless_args(Path::new("/out/ground_truth_lossless.mkv"), &cfg, 320, 240);
        let joined = args.join(" ");

        assert!(joined.contains("-c:v ffv1"));
        assert!(joined.contains("-f matroska"));
        assert!(!joined.contains("crf"));
    }
}
