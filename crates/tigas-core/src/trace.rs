//! Movement-trace loading
//!
//! A trace is a JSON array of pose objects recorded by the client (or
//! authored by hand for tests). `frame_id` is assigned by load order and is
//! the identity that flows through SEI payloads and the metadata sidecar.

use crate::error::TraceError;
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// One 6-DoF pose plus viewport, driving exactly one rendered frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoseSample {
    pub frame_id: u32,
    /// Presentation time in milliseconds from trace origin
    pub t_ms: i64,
    pub duration_ms: i64,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// Yaw in degrees
    pub angle: f32,
    /// Pitch in degrees
    pub elevation: f32,
    pub width: u32,
    pub height: u32,
}

/// Wire shape of one trace entry. Missing numeric fields default to zero,
/// missing dimensions to 800x600.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSample {
    #[serde(default)]
    t_ms: i64,
    #[serde(default)]
    duration_ms: i64,
    #[serde(default)]
    x: f32,
    #[serde(default)]
    y: f32,
    #[serde(default)]
    z: f32,
    #[serde(default)]
    angle: f32,
    #[serde(default)]
    elevation: f32,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
}

/// Load a movement trace, bounded by `max_frames` when non-zero.
pub fn load_movement_trace(path: &Path, max_frames: usize) -> Result<Vec<PoseSample>, TraceError> {
    let file = File::open(path).map_err(|source| TraceError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: Vec<RawSample> = serde_json::from_reader(BufReader::new(file))?;

    let take = if max_frames > 0 {
        max_frames.min(raw.len())
    } else {
        raw.len()
    };

    Ok(raw
        .into_iter()
        .take(take)
        .enumerate()
        .map(|(index, sample)| PoseSample {
            frame_id: index as u32,
            t_ms: sample.t_ms,
            duration_ms: sample.duration_ms,
            x: sample.x,
            y: sample.y,
            z: sample.z,
            angle: sample.angle,
            elevation: sample.elevation,
            width: sample.width.unwrap_or(800),
            height: sample.height.unwrap_or(600),
        })
        .collect())
}
