//! Frame-identity SEI messages
//!
//! Every encoded access unit carries a user-data-unregistered SEI
//! (payload type 5) whose payload is a fixed UUID followed by an ASCII
//! `frame_id=<n>;timestamp_ms=<n>` pair. The injector post-processes
//! encoder output packets: it detects the packet framing once, strips any
//! pre-existing identity SEI, and prepends a fresh one ahead of the first
//! VCL NAL so decoders attribute it to the right picture.

use crate::nal::{split_units, Codec};
use bytes::{BufMut, Bytes, BytesMut};
use tigas_core::FrameMetadata;

/// UUID of the identity SEI: ASCII "TIGAS-SEI-000001".
pub const SEI_UUID: [u8; 16] = [
    0x54, 0x49, 0x47, 0x41, 0x53, 0x2D, 0x53, 0x45, 0x49, 0x2D, 0x30, 0x30, 0x30, 0x30, 0x30,
    0x31,
];

/// SEI payload type: user data unregistered.
pub const SEI_PAYLOAD_TYPE: u8 = 5;

/// NAL framing of encoder output packets, detected at the first packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketFraming {
    AnnexB,
    LengthPrefixed,
}

pub fn detect_framing(packet: &[u8]) -> PacketFraming {
    if packet.starts_with(&[0, 0, 1]) || packet.starts_with(&[0, 0, 0, 1]) {
        PacketFraming::AnnexB
    } else {
        PacketFraming::LengthPrefixed
    }
}

/// ASCII identity pair carried after the UUID.
pub fn identity_text(meta: &FrameMetadata) -> String {
    format!(
        "frame_id={};timestamp_ms={}",
        meta.frame_id, meta.timestamp_ms
    )
}

/// SEI message RBSP: payload type, 255-chained size, UUID, payload, and the
/// rbsp trailing byte.
pub fn build_sei_rbsp(meta: &FrameMetadata) -> Vec<u8> {
    let text = identity_text(meta);
    let mut rbsp = Vec::with_capacity(text.len() + 24);

    rbsp.push(SEI_PAYLOAD_TYPE);
    let mut size = SEI_UUID.len() + text.len();
    while size >= 255 {
        rbsp.push(0xFF);
        size -= 255;
    }
    rbsp.push(size as u8);
    rbsp.extend_from_slice(&SEI_UUID);
    rbsp.extend_from_slice(text.as_bytes());
    rbsp.push(0x80);
    rbsp
}

/// Complete SEI NAL (header + emulation-escaped RBSP), without framing.
pub fn build_sei_nal(codec: Codec, meta: &FrameMetadata) -> Bytes {
    let rbsp = build_sei_rbsp(meta);
    let mut nal = BytesMut::with_capacity(rbsp.len() + 4);
    match codec {
        // nal_ref_idc 0, type 6
        Codec::H264 => nal.put_u8(0x06),
        // type 39 (prefix SEI), layer 0, tid 1
        Codec::Hevc => {
            nal.put_u8(0x4E);
            nal.put_u8(0x01);
        }
    }
    escape_emulation(&rbsp, &mut nal);
    nal.freeze()
}

/// Rewrite one access unit / packet so it carries exactly one identity SEI,
/// prepended ahead of every other NAL (and therefore ahead of the VCL NAL
/// it identifies), using the given framing.
pub fn inject_identity(
    codec: Codec,
    framing: PacketFraming,
    packet: &[u8],
    meta: &FrameMetadata,
) -> Bytes {
    match framing {
        PacketFraming::AnnexB => inject_annex_b(codec, packet, meta),
        PacketFraming::LengthPrefixed => inject_length_prefixed(codec, packet, meta),
    }
}

fn inject_annex_b(codec: Codec, packet: &[u8], meta: &FrameMetadata) -> Bytes {
    const START_CODE: [u8; 4] = [0, 0, 0, 1];
    let sei = build_sei_nal(codec, meta);
    let mut out = BytesMut::with_capacity(packet.len() + sei.len() + 4);

    out.put_slice(&START_CODE);
    out.put_slice(&sei);
    for unit in split_units(packet) {
        if unit.is_empty() || is_identity_sei(codec, unit) {
            continue;
        }
        out.put_slice(&START_CODE);
        out.put_slice(unit);
    }
    out.freeze()
}

fn inject_length_prefixed(codec: Codec, packet: &[u8], meta: &FrameMetadata) -> Bytes {
    let sei = build_sei_nal(codec, meta);
    let mut out = BytesMut::with_capacity(packet.len() + sei.len() + 8);

    out.put_u32(sei.len() as u32);
    out.put_slice(&sei);
    let mut cursor = 0usize;
    while cursor + 4 <= packet.len() {
        let len = u32::from_be_bytes([
            packet[cursor],
            packet[cursor + 1],
            packet[cursor + 2],
            packet[cursor + 3],
        ]) as usize;
        let start = cursor + 4;
        let end = (start + len).min(packet.len());
        let unit = &packet[start..end];
        cursor = end;

        if unit.is_empty() || is_identity_sei(codec, unit) {
            continue;
        }
        out.put_u32(unit.len() as u32);
        out.put_slice(unit);
    }
    out.freeze()
}

/// True when the unit is a user-data-unregistered SEI carrying the TIGAS
/// UUID (regardless of whether the payload parses).
pub fn is_identity_sei(codec: Codec, unit: &[u8]) -> bool {
    sei_body(codec, unit).is_some()
}

/// Parse the identity pair back out of a SEI NAL; used by tests and the
/// alignment tooling.
pub fn parse_identity_sei(codec: Codec, unit: &[u8]) -> Option<FrameMetadata> {
    let body = sei_body(codec, unit)?;
    let text = std::str::from_utf8(body).ok()?;

    let mut frame_id = None;
    let mut timestamp_ms = None;
    for field in text.split(';') {
        let (key, value) = field.split_once('=')?;
        match key {
            "frame_id" => frame_id = value.parse::<u32>().ok(),
            "timestamp_ms" => timestamp_ms = value.parse::<i64>().ok(),
            _ => {}
        }
    }
    Some(FrameMetadata {
        frame_id: frame_id?,
        timestamp_ms: timestamp_ms?,
    })
}

/// The bytes after the UUID of a TIGAS identity SEI, or None if this unit
/// is not one.
fn sei_body(codec: Codec, unit: &[u8]) -> Option<&[u8]> {
    let header_len = codec.header_len();
    let &first = unit.first()?;
    if codec.nal_type(first) != codec.sei_type() || unit.len() <= header_len {
        return None;
    }

    // The identity payload is plain ASCII, so the escaped and unescaped
    // forms coincide; scan the raw RBSP directly.
    let rbsp = &unit[header_len..];
    let mut i = 0usize;

    let mut payload_type = 0usize;
    while rbsp.get(i)? == &0xFF {
        payload_type += 255;
        i += 1;
    }
    payload_type += *rbsp.get(i)? as usize;
    i += 1;
    if payload_type != SEI_PAYLOAD_TYPE as usize {
        return None;
    }

    let mut size = 0usize;
    while rbsp.get(i)? == &0xFF {
        size += 255;
        i += 1;
    }
    size += *rbsp.get(i)? as usize;
    i += 1;

    let payload = rbsp.get(i..i + size)?;
    if payload.len() < SEI_UUID.len() || payload[..16] != SEI_UUID {
        return None;
    }
    Some(&payload[16..])
}

/// Insert emulation-prevention bytes while appending `rbsp` to `out`.
fn escape_emulation(rbsp: &[u8], out: &mut BytesMut) {
    let mut zeros = 0u32;
    for &byte in rbsp {
        if zeros >= 2 && byte <= 0x03 {
            out.put_u8(0x03);
            zeros = 0;
        }
        out.put_u8(byte);
        if byte == 0 {
            zeros += 1;
        } else {
            zeros = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const META: FrameMetadata = FrameMetadata {
        frame_id: 42,
        timestamp_ms: 700,
    };

    fn h264_au() -> Vec<u8> {
        [
            &[0x00, 0x00, 0x00, 0x01, 0x09, 0xF0][..], // AUD
            &[0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x1E][..], // SPS
            &[0x00, 0x00, 0x01, 0x68, 0xCE, 0x38, 0x80][..], // PPS
            &[0x00, 0x00, 0x01, 0x65, 0x88, 0x84, 0x21, 0xFF][..], // IDR
        ]
        .concat()
    }

    #[test]
    fn rbsp_layout_is_bit_exact() {
        let rbsp = build_sei_rbsp(&FrameMetadata {
            frame_id: 0,
            timestamp_ms: 0,
        });
        let text = b"frame_id=0;timestamp_ms=0";

        assert_eq!(rbsp[0], 5);
        assert_eq!(rbsp[1], (16 + text.len()) as u8);
        assert_eq!(&rbsp[2..18], b"TIGAS-SEI-000001");
        assert_eq!(&rbsp[18..18 + text.len()], text);
        assert_eq!(*rbsp.last().unwrap(), 0x80);
    }

    #[test]
    fn nal_headers_match_each_codec() {
        let h264 = build_sei_nal(Codec::H264, &META);
        assert_eq!(h264[0], 0x06);

        let hevc = build_sei_nal(Codec::Hevc, &META);
        assert_eq!(&hevc[..2], &[0x4E, 0x01]);
    }

    #[test]
    fn framing_detection() {
        assert_eq!(detect_framing(&[0, 0, 0, 1, 0x65]), PacketFraming::AnnexB);
        assert_eq!(detect_framing(&[0, 0, 1, 0x65]), PacketFraming::AnnexB);
        assert_eq!(
            detect_framing(&[0, 0, 0, 9, 0x65, 0, 0, 0, 0, 0, 0, 0, 0]),
            PacketFraming::LengthPrefixed
        );
    }

    #[test]
    fn annex_b_injection_leads_the_access_unit_with_the_sei() {
        let tagged = inject_identity(Codec::H264, PacketFraming::AnnexB, &h264_au(), &META);
        let units = split_units(&tagged);

        // SEI first, then the incoming unit order; the VCL slice stays last.
        let types: Vec<u8> = units.iter().map(|u| Codec::H264.nal_type(u[0])).collect();
        assert_eq!(types, vec![6, 9, 7, 8, 5]);
        assert_eq!(parse_identity_sei(Codec::H264, units[0]).unwrap(), META);
    }

    #[test]
    fn length_prefixed_injection_emits_well_formed_lengths() {
        // AVCC-style packet: a single length-prefixed IDR slice.
        let idr = [0x65u8, 0x88, 0x84, 0x21];
        let mut packet = Vec::new();
        packet.extend_from_slice(&(idr.len() as u32).to_be_bytes());
        packet.extend_from_slice(&idr);

        let tagged = inject_identity(Codec::H264, PacketFraming::LengthPrefixed, &packet, &META);

        let sei_len = u32::from_be_bytes(tagged[..4].try_into().unwrap()) as usize;
        let sei = &tagged[4..4 + sei_len];
        assert_eq!(Codec::H264.nal_type(sei[0]), 6);
        assert_eq!(parse_identity_sei(Codec::H264, sei).unwrap(), META);

        let vcl_off = 4 + sei_len;
        let vcl_len =
            u32::from_be_bytes(tagged[vcl_off..vcl_off + 4].try_into().unwrap()) as usize;
        assert_eq!(&tagged[vcl_off + 4..vcl_off + 4 + vcl_len], &idr);
        assert_eq!(vcl_off + 4 + vcl_len, tagged.len());
    }

    #[test]
    fn double_injection_is_idempotent() {
        let once = inject_identity(Codec::H264, PacketFraming::AnnexB, &h264_au(), &META);
        let twice = inject_identity(Codec::H264, PacketFraming::AnnexB, &once, &META);
        assert_eq!(once, twice);

        // Re-tagging with a different identity replaces, not accumulates.
        let other = FrameMetadata {
            frame_id: 43,
            timestamp_ms: 717,
        };
        let retagged = inject_identity(Codec::H264, PacketFraming::AnnexB, &once, &other);
        let identities: Vec<_> = split_units(&retagged)
            .into_iter()
            .filter_map(|u| parse_identity_sei(Codec::H264, u))
            .collect();
        assert_eq!(identities, vec![other]);
    }

    #[test]
    fn foreign_sei_messages_are_preserved() {
        // x264 emits its own unregistered SEI (different UUID); it must
        // survive injection.
        let mut foreign_rbsp = vec![5u8, 20];
        foreign_rbsp.extend_from_slice(&[0xAA; 16]);
        foreign_rbsp.extend_from_slice(b"x264");
        foreign_rbsp.push(0x80);
        let mut au = vec![0x00, 0x00, 0x00, 0x01, 0x06];
        au.extend_from_slice(&foreign_rbsp);
        au.extend_from_slice(&[0x00, 0x00, 0x01, 0x65, 0x88, 0x84]);

        let tagged = inject_identity(Codec::H264, PacketFraming::AnnexB, &au, &META);
        let units = split_units(&tagged);
        let types: Vec<u8> = units.iter().map(|u| Codec::H264.nal_type(u[0])).collect();
        assert_eq!(types, vec![6, 6, 5]);
        assert!(parse_identity_sei(Codec::H264, units[0]).is_some());
        assert!(parse_identity_sei(Codec::H264, units[1]).is_none());
    }

    #[test]
    fn hevc_injection_uses_prefix_sei() {
        let au = [
            &[0x00, 0x00, 0x00, 0x01, 0x46, 0x01, 0x50][..], // AUD (type 35)
            &[0x00, 0x00, 0x01, 0x26, 0x01, 0xAF][..],       // IDR_W_RADL (type 19)
        ]
        .concat();
        let tagged = inject_identity(Codec::Hevc, PacketFraming::AnnexB, &au, &META);
        let units = split_units(&tagged);
        let types: Vec<u8> = units.iter().map(|u| Codec::Hevc.nal_type(u[0])).collect();
        assert_eq!(types, vec![39, 35, 19]);
        assert_eq!(parse_identity_sei(Codec::Hevc, units[0]).unwrap(), META);
    }

    #[test]
    fn size_chaining_covers_long_payloads() {
        // Synthetic oversized payload exercises the 255-chain encoding.
        let mut rbsp = Vec::new();
        rbsp.push(SEI_PAYLOAD_TYPE);
        let mut size = 300usize;
        while size >= 255 {
            rbsp.push(0xFF);
            size -= 255;
        }
        rbsp.push(size as u8);
        rbsp.extend_from_slice(&SEI_UUID);
        rbsp.extend(std::iter::repeat(b'a').take(300 - 16));
        rbsp.push(0x80);

        let mut unit = vec![0x06];
        unit.extend_from_slice(&rbsp);
        let body = sei_body(Codec::H264, &unit).unwrap();
        assert_eq!(body.len(), 300 - 16);
        assert!(body.iter().all(|&b| b == b'a'));
    }

    #[test]
    fn emulation_prevention_escapes_zero_runs() {
        let mut out = BytesMut::new();
        escape_emulation(&[0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0xAA], &mut out);
        assert_eq!(
            out.as_ref(),
            &[0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x03, 0x00, 0xAA]
        );
    }
}
