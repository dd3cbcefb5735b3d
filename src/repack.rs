//! Repacketizes an Annex-B H.264 access unit into RTP packets per RFC 6184,
//! using Single NAL Unit, STAP-A aggregation, and FU-A fragmentation as the
//! NALU sizes require, and filling the caller's reserved sequence-number
//! range exactly.
//!
//! Grounded on the teacher's `codecs::avc` bit-level NAL helpers (NAL type
//! extraction, FU indicator/header construction), generalized from a
//! read-only classifier into a packet builder, and on `rtp::RtpPacket` for
//! the wire-level packet construction the teacher never had to do because
//! `rtpar` only reads RTP, never emits it.

use crate::rtp::{build_header_with_extension, RtpPacket, EXT_SIZE, RTP_HEADER_SIZE};
use crate::seq::forward_diff;

pub const MAX_RTP_PAYLOAD: usize = 1360;
const PAYLOAD_TYPE: u8 = 98;
const STAP_A_HEADER: u8 = 0x18;
const FU_A_TYPE: u8 = 28;

/// Every size comparison below bounds the *outbound RTP packet*, not the
/// H.264 payload alone: `build_packet` always prepends a fixed RTP header
/// plus the one-byte extension block on top of whatever payload is chosen
/// here, so that fixed cost has to be subtracted from `MAX_RTP_PAYLOAD`
/// before comparing against a pending payload's size.
const PACKET_OVERHEAD: usize = RTP_HEADER_SIZE + EXT_SIZE;
const MAX_PAYLOAD_SIZE: usize = MAX_RTP_PAYLOAD - PACKET_OVERHEAD;

/// Packs `annex_b_bytes` (a complete access unit, one or more NAL units back
/// to back) into RTP packets occupying the inclusive sequence-number range
/// `[start_seq, end_seq]`.
///
/// If repacketization needs more packets than the range has room for, the
/// whole frame is discarded (empty result, a warning is logged). If it needs
/// fewer, empty padding packets are prepended so the emitted sequence
/// numbers are contiguous and the marker bit still lands on the final
/// content-bearing packet.
pub fn h264_pack(annex_b_bytes: &[u8], start_seq: u16, end_seq: u16, timestamp: u32, ssrc: u32) -> Vec<RtpPacket> {
    let nalus = crate::nal::find_nalus(annex_b_bytes);
    if nalus.is_empty() {
        return Vec::new();
    }

    let mut raw_payloads: Vec<Vec<u8>> = Vec::new();
    let mut pending: Vec<&[u8]> = Vec::new();

    let mut i = 0usize;
    while i < nalus.len() {
        let nalu_bytes = nalus[i].bytes(annex_b_bytes);

        if nalu_bytes.len() > MAX_PAYLOAD_SIZE {
            if !pending.is_empty() {
                raw_payloads.push(build_batch_payload(&pending));
                pending.clear();
            }
            raw_payloads.extend(fragment_fu_a(nalu_bytes));
            i += 1;
            continue;
        }

        let proposed_count = pending.len() + 1;
        let proposed_size = if proposed_count == 1 {
            nalu_bytes.len()
        } else {
            1 + pending.iter().map(|n| 2 + n.len()).sum::<usize>() + 2 + nalu_bytes.len()
        };

        if proposed_size <= MAX_PAYLOAD_SIZE {
            pending.push(nalu_bytes);
            i += 1;
        } else {
            // Current aggregate is as full as it can get without this NALU;
            // flush it and retry the same NALU against a fresh batch.
            raw_payloads.push(build_batch_payload(&pending));
            pending.clear();
        }
    }
    if !pending.is_empty() {
        raw_payloads.push(build_batch_payload(&pending));
    }

    let count = forward_diff(start_seq, end_seq).wrapping_add(1) as usize;
    if raw_payloads.len() > count {
        tracing::warn!(
            produced = raw_payloads.len(),
            available = count,
            "h264 repacketization needs more packets than the reserved sequence range, discarding frame"
        );
        return Vec::new();
    }

    let pad_count = count - raw_payloads.len();
    let mut packets = Vec::with_capacity(count);
    let mut seq = start_seq;
    for _ in 0..pad_count {
        packets.push(build_packet(&[], seq, timestamp, ssrc, false));
        seq = seq.wrapping_add(1);
    }
    let last_idx = raw_payloads.len() - 1;
    for (idx, payload) in raw_payloads.iter().enumerate() {
        packets.push(build_packet(payload, seq, timestamp, ssrc, idx == last_idx));
        seq = seq.wrapping_add(1);
    }
    packets
}

fn build_batch_payload(pending: &[&[u8]]) -> Vec<u8> {
    if pending.len() == 1 {
        pending[0].to_vec()
    } else {
        let mut payload = Vec::with_capacity(1 + pending.iter().map(|n| 2 + n.len()).sum::<usize>());
        payload.push(STAP_A_HEADER);
        for nalu in pending {
            payload.extend_from_slice(&(nalu.len() as u16).to_be_bytes());
            payload.extend_from_slice(nalu);
        }
        payload
    }
}

fn fragment_fu_a(nalu: &[u8]) -> Vec<Vec<u8>> {
    let fu_indicator = (nalu[0] & 0xE0) | FU_A_TYPE;
    let fu_header_base = nalu[0] & 0x1F;
    let body = &nalu[1..];
    let max_fragment = MAX_PAYLOAD_SIZE - 2;

    let mut out = Vec::new();
    let mut offset = 0usize;
    while offset < body.len() {
        let end = (offset + max_fragment).min(body.len());
        let mut fu_header = fu_header_base;
        if offset == 0 {
            fu_header |= 0x80;
        }
        if end == body.len() {
            fu_header |= 0x40;
        }
        let mut pkt = Vec::with_capacity(2 + (end - offset));
        pkt.push(fu_indicator);
        pkt.push(fu_header);
        pkt.extend_from_slice(&body[offset..end]);
        out.push(pkt);
        offset = end;
    }
    out
}

fn build_packet(payload: &[u8], seq: u16, timestamp: u32, ssrc: u32, marker: bool) -> RtpPacket {
    let mut buf = build_header_with_extension(PAYLOAD_TYPE, timestamp, ssrc);
    buf.extend_from_slice(payload);
    let mut packet = RtpPacket::from_owned(buf).expect("freshly built rtp header is always well-formed");
    packet.set_sequence_number(seq);
    packet.set_marker(marker);
    packet
}
