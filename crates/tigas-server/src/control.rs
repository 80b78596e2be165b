//! Pose control channel: datagram store, persistent log, wire decode
//!
//! The channel is unreliable and unordered; the store records receipt
//! order and the sender's monotonic clock rides in-band for offline
//! reordering. Parsing is lazy: sessions persist raw payloads and the
//! 28-byte decode runs offline (or in tests).

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Exact wire size of a pose datagram: seven little-endian f32 values.
pub const POSE_DATAGRAM_LEN: usize = 28;

/// Decoded 6-DoF pose message.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoseDatagram {
    /// Sender monotonic clock, milliseconds
    pub ts_ms: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
}

/// Decode a pose datagram; any payload that is not exactly 28 bytes is
/// discarded.
pub fn decode_pose_datagram(payload: &[u8]) -> Option<PoseDatagram> {
    if payload.len() != POSE_DATAGRAM_LEN {
        return None;
    }
    let mut values = [0f32; 7];
    LittleEndian::read_f32_into(payload, &mut values);
    Some(PoseDatagram {
        ts_ms: values[0],
        x: values[1],
        y: values[2],
        z: values[3],
        pitch: values[4],
        yaw: values[5],
        roll: values[6],
    })
}

/// One received control payload, keyed by receipt time.
#[derive(Clone, Debug)]
pub struct ControlMessage {
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

/// In-memory log of every accepted datagram. Writers copy payloads before
/// appending.
#[derive(Default)]
pub struct ControlStore {
    messages: Mutex<Vec<ControlMessage>>,
}

impl ControlStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, payload: &[u8]) {
        self.messages.lock().push(ControlMessage {
            payload: payload.to_vec(),
            received_at: Utc::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<ControlMessage> {
        self.messages.lock().clone()
    }
}

/// Persistent raw log: each accepted payload followed by a LF terminator.
pub struct ControlLog {
    file: tokio::sync::Mutex<File>,
}

impl ControlLog {
    pub async fn create(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(Self {
            file: tokio::sync::Mutex::new(File::create(path).await?),
        })
    }

    pub async fn append(&self, payload: &[u8]) -> std::io::Result<()> {
        let mut file = self.file.lock().await;
        file.write_all(payload).await?;
        file.write_all(b"\n").await?;
        file.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack_le_f32(values: [f32; 7]) -> Vec<u8> {
        let mut out = vec![0u8; POSE_DATAGRAM_LEN];
        LittleEndian::write_f32_into(&values, &mut out);
        out
    }

    #[test]
    fn decode_round_trips_the_wire_order() {
        let payload = pack_le_f32([100.0, 1.0, 2.0, 3.0, 0.1, 0.2, 0.3]);
        let pose = decode_pose_datagram(&payload).unwrap();

        assert_eq!(pose.ts_ms, 100.0);
        assert_eq!((pose.x, pose.y, pose.z), (1.0, 2.0, 3.0));
        assert_eq!((pose.pitch, pose.yaw, pose.roll), (0.1, 0.2, 0.3));
    }

    #[test]
    fn wrong_sizes_are_discarded() {
        assert!(decode_pose_datagram(&[]).is_none());
        assert!(decode_pose_datagram(&[0u8; 27]).is_none());
        assert!(decode_pose_datagram(&[0u8; 29]).is_none());
        assert!(decode_pose_datagram(&[0u8; 56]).is_none());
    }

    #[test]
    fn store_records_receipt_order() {
        let store = ControlStore::new();
        store.append(b"first");
        store.append(b"second");

        let messages = store.snapshot();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].payload, b"first");
        assert_eq!(messages[1].payload, b"second");
        assert!(messages[0].received_at <= messages[1].received_at);
    }

    #[tokio::test]
    async fn log_appends_payload_and_terminator() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control_messages.bin");

        let log = ControlLog::create(&path).await.unwrap();
        let payload = pack_le_f32([100.0, 1.0, 2.0, 3.0, 0.1, 0.2, 0.3]);
        log.append(&payload).await.unwrap();

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written.len(), POSE_DATAGRAM_LEN + 1);
        assert_eq!(&written[..POSE_DATAGRAM_LEN], payload.as_slice());
        assert_eq!(written[POSE_DATAGRAM_LEN], b'\n');
    }
}
