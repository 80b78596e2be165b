//! Encoder pipeline errors. Every variant is fatal for the session.

use std::process::ExitStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("unable to spawn {tool}: {source}")]
    Spawn {
        tool: &'static str,
        source: std::io::Error,
    },

    #[error("{tool} did not expose the requested pipe")]
    MissingPipe { tool: &'static str },

    #[error("encoder I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame is {got_w}x{got_h} but the encoder was opened at {want_w}x{want_h}")]
    DimensionMismatch {
        got_w: u32,
        got_h: u32,
        want_w: u32,
        want_h: u32,
    },

    #[error("frame buffer holds {got} bytes, expected {want}")]
    BadFrameLength { got: usize, want: usize },

    #[error("encoder produced more access units than submitted frames")]
    MetadataUnderrun,

    #[error("ffmpeg encoder exited with {0}")]
    EncoderExit(ExitStatus),

    #[error("ffmpeg muxer exited with {0}")]
    MuxerExit(ExitStatus),

    #[error("encode pump task failed: {0}")]
    PumpJoin(#[from] tokio::task::JoinError),

    #[error("encoded {encoded} access units for {sent} submitted frames")]
    FrameCountMismatch { sent: u64, encoded: u64 },
}
