pub mod abr;
pub mod control;
pub mod http3;

pub use abr::{AbrEstimator, AbrSnapshot, Profile};
pub use control::{decode_pose_datagram, ControlLog, ControlStore, PoseDatagram};
pub use http3::{run_server, ServerConfig};
