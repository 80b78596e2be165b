pub mod error;
pub mod frame;
pub mod ply;
pub mod point;
pub mod trace;

pub use error::{PlyError, TraceError};
pub use frame::{FrameMetadata, RgbFrame};
pub use ply::load_points;
pub use point::{PackedPoint, SplatPoint};
pub use trace::{load_movement_trace, PoseSample};
