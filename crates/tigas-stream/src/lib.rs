pub mod encoder;
pub mod error;
pub mod metadata;
pub mod nal;
pub mod sei;
pub mod session;

pub use encoder::{EncodeConfig, VideoEncoder};
pub use error::EncoderError;
pub use metadata::MetadataWriter;
pub use nal::{AccessUnitSplitter, Codec};
pub use sei::{parse_identity_sei, PacketFraming, SEI_UUID};
pub use session::{run_session, SessionConfig, SessionReport};
