//! NAL-layer tooling for H.264 and HEVC elementary streams
//!
//! The encoder emits Annex-B with access-unit delimiters inserted, so
//! access units can be split on AUD boundaries without parsing slice
//! headers.

use bytes::Bytes;

/// NAL syntax family, derived from the configured encoder name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Codec {
    H264,
    Hevc,
}

impl Codec {
    /// Map an ffmpeg encoder name (`libx264`, `h264_nvenc`, `libx265`,
    /// `hevc_nvenc`, ...) onto its NAL syntax.
    pub fn from_encoder_name(name: &str) -> Self {
        if name.contains("hevc") || name.contains("265") {
            Codec::Hevc
        } else {
            Codec::H264
        }
    }

    /// Bytes of NAL header preceding the RBSP.
    pub fn header_len(self) -> usize {
        match self {
            Codec::H264 => 1,
            Codec::Hevc => 2,
        }
    }

    /// Extract the NAL unit type from the first header byte.
    pub fn nal_type(self, first_byte: u8) -> u8 {
        match self {
            Codec::H264 => first_byte & 0x1F,
            Codec::Hevc => (first_byte >> 1) & 0x3F,
        }
    }

    /// Coded-picture (VCL) NAL types.
    pub fn is_vcl(self, nal_type: u8) -> bool {
        match self {
            Codec::H264 => (1..=5).contains(&nal_type),
            Codec::Hevc => nal_type <= 31,
        }
    }

    /// Access-unit delimiter type.
    pub fn aud_type(self) -> u8 {
        match self {
            Codec::H264 => 9,
            Codec::Hevc => 35,
        }
    }

    /// Prefix SEI type (suffix SEI is never produced here).
    pub fn sei_type(self) -> u8 {
        match self {
            Codec::H264 => 6,
            Codec::Hevc => 39,
        }
    }
}

/// Find the next Annex-B start code at or after `from`, returning its
/// position and length (3 or 4).
pub fn find_start_code(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= buf.len() {
        if buf[i] == 0 && buf[i + 1] == 0 {
            if buf[i + 2] == 1 {
                return Some((i, 3));
            }
            if i + 4 <= buf.len() && buf[i + 2] == 0 && buf[i + 3] == 1 {
                return Some((i, 4));
            }
        }
        i += 1;
    }
    None
}

/// Split an Annex-B stream into NAL units (start codes stripped).
pub fn split_units(data: &[u8]) -> Vec<&[u8]> {
    let mut units = Vec::new();
    let mut cursor = match find_start_code(data, 0) {
        Some((pos, len)) => pos + len,
        None => return units,
    };
    loop {
        match find_start_code(data, cursor) {
            Some((pos, len)) => {
                units.push(&data[cursor..pos]);
                cursor = pos + len;
            }
            None => {
                units.push(&data[cursor..]);
                return units;
            }
        }
    }
}

/// Incremental Annex-B access-unit splitter.
///
/// Accumulates encoder output and emits one `Bytes` per complete access
/// unit, delimited by AUD NALs. The last access unit is only known to be
/// complete at end of stream; collect it with [`AccessUnitSplitter::finish`].
pub struct AccessUnitSplitter {
    codec: Codec,
    buf: Vec<u8>,
}

impl AccessUnitSplitter {
    pub fn new(codec: Codec) -> Self {
        Self {
            codec,
            buf: Vec::new(),
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Emit every access unit whose end is already visible.
    pub fn drain(&mut self) -> Vec<Bytes> {
        let mut boundaries: Vec<usize> = Vec::new();
        let mut scan = 0usize;
        while let Some((pos, sc_len)) = find_start_code(&self.buf, scan) {
            if let Some(&header) = self.buf.get(pos + sc_len) {
                if self.codec.nal_type(header) == self.codec.aud_type() {
                    boundaries.push(pos);
                }
            }
            scan = pos + sc_len;
        }

        if boundaries.len() < 2 {
            return Vec::new();
        }
        // Anything ahead of the first delimiter (stream headers) belongs to
        // the first access unit.
        boundaries[0] = 0;

        let mut units = Vec::with_capacity(boundaries.len() - 1);
        for window in boundaries.windows(2) {
            units.push(Bytes::copy_from_slice(&self.buf[window[0]..window[1]]));
        }
        let last = *boundaries.last().unwrap_or(&0);
        self.buf.drain(..last);
        units
    }

    /// The trailing access unit, if any bytes remain.
    pub fn finish(self) -> Option<Bytes> {
        if self.buf.is_empty() {
            None
        } else {
            Some(Bytes::from(self.buf))
        }
    }
}
