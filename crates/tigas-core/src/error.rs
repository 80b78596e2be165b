//! Error types shared across the pipeline crates

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading a movement trace. All of these abort the
/// session; there is no partial trace.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("unable to open movement trace {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("movement trace must be a JSON array of pose objects: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors raised while reading a point-cloud file. Callers treat every
/// variant the same way (fall back to the procedural pattern), but the
/// variant is logged so a broken asset is diagnosable.
#[derive(Error, Debug)]
pub enum PlyError {
    #[error("unable to open point cloud {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed PLY: {0}")]
    Malformed(#[from] std::io::Error),

    #[error("unsupported PLY encoding (only ascii and binary_little_endian)")]
    UnsupportedEncoding,

    #[error("PLY has no vertex element")]
    MissingVertexElement,

    #[error("list properties are not supported (property list {0})")]
    ListProperty(String),

    #[error("vertex {index} is missing required property {name}")]
    MissingProperty { index: usize, name: &'static str },
}
