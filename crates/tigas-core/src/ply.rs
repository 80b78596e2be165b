//! PLY point-cloud loading
//!
//! Supports `ascii` and `binary_little_endian` files with a single vertex
//! element. Colors come from direct RGB properties when present, otherwise
//! from the 3DGS spherical-harmonic DC band; opacity and per-axis log scales
//! are collapsed into the scalar forms the renderer consumes.
//!
//! Loading is deliberately forgiving at the call site: any malformed or
//! unsupported file yields an empty table, and the renderer substitutes its
//! procedural pattern.

use crate::error::PlyError;
use crate::point::SplatPoint;
use ply_rs::parser::Parser;
use ply_rs::ply::{DefaultElement, Encoding, Property, PropertyType};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Normalization constant of the zeroth spherical-harmonic band.
const SH_C0: f64 = 0.282_094_791_773_878_14;

/// Log-scale assumed for vertices without `scale_*` properties.
const DEFAULT_LOG_SCALE: f64 = -1.5;

/// Load a splat table, degrading to an empty table on any failure.
pub fn load_points(path: &Path) -> Arc<[SplatPoint]> {
    match read_point_cloud(path) {
        Ok(points) => {
            info!(path = %path.display(), count = points.len(), "loaded point cloud");
            Arc::from(points)
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "point cloud unusable, using procedural pattern");
            Arc::from(Vec::new())
        }
    }
}

/// Strict loader behind [`load_points`]; exposed for tests and tools.
pub fn read_point_cloud(path: &Path) -> Result<Vec<SplatPoint>, PlyError> {
    let file = File::open(path).map_err(|source| PlyError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = BufReader::new(file);

    let parser = Parser::<DefaultElement>::new();
    let ply = parser.read_ply(&mut reader)?;

    if ply.header.encoding == Encoding::BinaryBigEndian {
        return Err(PlyError::UnsupportedEncoding);
    }

    let vertex_def = ply
        .header
        .elements
        .get("vertex")
        .ok_or(PlyError::MissingVertexElement)?;
    for (name, property) in &vertex_def.properties {
        if matches!(property.data_type, PropertyType::List(_, _)) {
            return Err(PlyError::ListProperty(name.clone()));
        }
    }

    let vertices = ply
        .payload
        .get("vertex")
        .ok_or(PlyError::MissingVertexElement)?;

    let mut points = Vec::with_capacity(vertices.len());
    for (index, vertex) in vertices.iter().enumerate() {
        points.push(derive_point(vertex, index)?);
    }
    Ok(points)
}

fn derive_point(vertex: &DefaultElement, index: usize) -> Result<SplatPoint, PlyError> {
    let x = required(vertex, index, "x")?;
    let y = required(vertex, index, "y")?;
    let z = required(vertex, index, "z")?;

    let color = match (
        any_scalar(vertex, &["red", "r"]),
        any_scalar(vertex, &["green", "g"]),
        any_scalar(vertex, &["blue", "b"]),
    ) {
        (Some(r), Some(g), Some(b)) => [channel(r), channel(g), channel(b)],
        _ => match (
            any_scalar(vertex, &["f_dc_0"]),
            any_scalar(vertex, &["f_dc_1"]),
            any_scalar(vertex, &["f_dc_2"]),
        ) {
            (Some(d0), Some(d1), Some(d2)) => [dc_channel(d0), dc_channel(d1), dc_channel(d2)],
            _ => [255, 255, 255],
        },
    };

    let logit = any_scalar(vertex, &["opacity"]).unwrap_or(0.0);
    let opacity = sigmoid(logit).clamp(0.02, 1.0) as f32;

    let mean_scale = (any_scalar(vertex, &["scale_0"]).unwrap_or(DEFAULT_LOG_SCALE)
        + any_scalar(vertex, &["scale_1"]).unwrap_or(DEFAULT_LOG_SCALE)
        + any_scalar(vertex, &["scale_2"]).unwrap_or(DEFAULT_LOG_SCALE))
        / 3.0;
    let radius = mean_scale.exp().clamp(0.25, 8.0) as f32;

    Ok(SplatPoint::new(
        [x as f32, y as f32, z as f32],
        color,
        opacity,
        radius,
    ))
}

fn required(vertex: &DefaultElement, index: usize, name: &'static str) -> Result<f64, PlyError> {
    any_scalar(vertex, &[name]).ok_or(PlyError::MissingProperty { index, name })
}

fn any_scalar(vertex: &DefaultElement, names: &[&str]) -> Option<f64> {
    names
        .iter()
        .find_map(|name| vertex.get(*name).and_then(scalar))
}

fn scalar(property: &Property) -> Option<f64> {
    match *property {
        Property::Char(v) => Some(v as f64),
        Property::UChar(v) => Some(v as f64),
        Property::Short(v) => Some(v as f64),
        Property::UShort(v) => Some(v as f64),
        Property::Int(v) => Some(v as f64),
        Property::UInt(v) => Some(v as f64),
        Property::Float(v) => Some(v as f64),
        Property::Double(v) => Some(v),
        _ => None,
    }
}

fn channel(value: f64) -> u8 {
    value.clamp(0.0, 255.0) as u8
}

fn dc_channel(dc: f64) -> u8 {
    ((0.5 + SH_C0 * dc).clamp(0.0, 1.0) * 255.0) as u8
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
