//! A bounded, power-of-two ring buffer that reorders RTP packets carrying a
//! PS-over-RTP video stream and releases them once a complete frame's worth
//! of packets has arrived contiguously.
//!
//! This supersedes the teacher's `FrameReassembler` (a `BTreeMap`-keyed
//! collector matched against a fixed set of known codecs): that design
//! can't express fixed-capacity backpressure or track which sequence
//! numbers are still outstanding, both of which the caller needs in order
//! to know when to ask the far end for a keyframe.

use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::rtp::RtpPacket;
use crate::seq::{ahead_of, forward_diff, MissingSeq};

/// Sequence numbers older than this, relative to the newest packet seen,
/// are no longer tracked as "missing". A loss that old isn't worth a
/// keyframe request, and without this bound a single large forward jump in
/// sequence numbers would otherwise flood the missing set.
const MAX_MISSING_AGE: u16 = 1000;

pub trait Clock {
    fn now_ms(&self) -> i64;
}

/// Wall-clock time via `SystemTime`. The default clock for production use;
/// tests inject a fake one to assert on `last_received_packet_ms` without
/// depending on real elapsed time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
    }
}

/// A packet held in the reorder buffer, with the bookkeeping needed to
/// determine whether it starts or ends a frame and whether the run of
/// packets leading up to it is unbroken.
#[derive(Debug)]
pub struct BufferedPacket {
    pub is_first_in_frame: bool,
    pub is_last_in_frame: bool,
    pub continuous: bool,
    pub marker_bit: bool,
    pub seq_num: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub rtp_packet: RtpPacket,
}

impl BufferedPacket {
    fn new(rtp_packet: RtpPacket) -> Self {
        let payload = rtp_packet.payload();
        let is_first_in_frame =
            payload.len() >= 4 && payload[0] == 0x00 && payload[1] == 0x00 && payload[2] == 0x01 && payload[3] == 0xBA;
        Self {
            is_first_in_frame,
            is_last_in_frame: rtp_packet.has_marker(),
            continuous: false,
            marker_bit: rtp_packet.has_marker(),
            seq_num: rtp_packet.seq_num(),
            timestamp: rtp_packet.timestamp(),
            ssrc: rtp_packet.ssrc(),
            rtp_packet,
        }
    }
}

/// Result of inserting a packet or padding placeholder: zero or more
/// contiguous frames released in sequence-number order, and a flag telling
/// the caller a keyframe request is warranted because the buffer had to be
/// reset.
#[derive(Debug, Default)]
pub struct InsertResult {
    pub packets: Vec<BufferedPacket>,
    pub buffer_cleared: bool,
}

pub struct ReorderBuffer<C: Clock = SystemClock> {
    clock: C,
    max_size: usize,
    first_seq_num: u16,
    first_packet_received: bool,
    is_cleared_to_first_seq_num: bool,
    buffer: Vec<Option<BufferedPacket>>,
    last_received_packet_ms: i64,
    last_received_keyframe_packet_ms: i64,
    last_received_keyframe_rtp_timestamp: u32,
    newest_inserted_seq_num: Option<u16>,
    missing: BTreeSet<MissingSeq>,
}

impl ReorderBuffer<SystemClock> {
    /// `start_size` and `max_size` must both be powers of two.
    pub fn new(start_size: usize, max_size: usize) -> Self {
        Self::with_clock(start_size, max_size, SystemClock)
    }
}

impl<C: Clock> ReorderBuffer<C> {
    pub fn with_clock(start_size: usize, max_size: usize, clock: C) -> Self {
        debug_assert!(start_size.is_power_of_two());
        debug_assert!(max_size.is_power_of_two());
        debug_assert!(start_size <= max_size);
        let mut buffer = Vec::with_capacity(start_size);
        buffer.resize_with(start_size, || None);
        Self {
            clock,
            max_size,
            first_seq_num: 0,
            first_packet_received: false,
            is_cleared_to_first_seq_num: false,
            buffer,
            last_received_packet_ms: 0,
            last_received_keyframe_packet_ms: 0,
            last_received_keyframe_rtp_timestamp: 0,
            newest_inserted_seq_num: None,
            missing: BTreeSet::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn last_received_packet_ms(&self) -> i64 {
        self.last_received_packet_ms
    }

    pub fn last_received_keyframe_packet_ms(&self) -> i64 {
        self.last_received_keyframe_packet_ms
    }

    /// Counts currently-tracked missing sequence numbers, for diagnostics.
    pub fn missing_count(&self) -> usize {
        self.missing.len()
    }

    pub fn insert_packet(&mut self, rtp_packet: RtpPacket) -> InsertResult {
        let mut result = InsertResult::default();
        let seq_num = rtp_packet.seq_num();
        let packet = BufferedPacket::new(rtp_packet);
        let mut index = seq_num as usize % self.buffer.len();

        if !self.first_packet_received {
            self.first_seq_num = seq_num;
            self.first_packet_received = true;
        } else if ahead_of(self.first_seq_num, seq_num) {
            if self.is_cleared_to_first_seq_num {
                // Already cleared past this sequence number; it's old, drop silently.
                return result;
            }
            self.first_seq_num = seq_num;
        }

        if let Some(existing) = &self.buffer[index] {
            if existing.seq_num == seq_num {
                // Duplicate packet.
                return result;
            }

            while self.expand_buffer_size() && self.buffer[seq_num as usize % self.buffer.len()].is_some() {}
            index = seq_num as usize % self.buffer.len();

            if self.buffer[index].is_some() {
                tracing::warn!(seq_num, capacity = self.buffer.len(), "clearing packet buffer and requesting keyframe");
                self.clear_internal();
                result.buffer_cleared = true;
                return result;
            }
        }

        let now_ms = self.clock.now_ms();
        self.last_received_packet_ms = now_ms;
        if packet.is_first_in_frame || self.last_received_keyframe_rtp_timestamp == packet.timestamp {
            self.last_received_keyframe_packet_ms = now_ms;
            self.last_received_keyframe_rtp_timestamp = packet.timestamp;
        }

        self.buffer[index] = Some(packet);
        self.update_missing_packets(seq_num);
        result.packets = self.find_frames(seq_num);
        result
    }

    /// Records that `seq_num` was a padding-only RTP packet: it carries no
    /// frame data, so it can't start or end a frame, but its presence still
    /// clears it from the missing set and may unblock the packet after it.
    pub fn insert_padding(&mut self, seq_num: u16) -> InsertResult {
        let mut result = InsertResult::default();
        self.update_missing_packets(seq_num);
        result.packets = self.find_frames(seq_num.wrapping_add(1));
        result
    }

    /// Drops everything at or before `seq_num`, and stops accepting any
    /// future packet older than it. Matches the original's one-element
    /// retention quirk in its `missing` trim: an `upper_bound` hit exactly
    /// at the front of the set removes nothing.
    pub fn clear_to(&mut self, seq_num: u16) {
        if self.is_cleared_to_first_seq_num && ahead_of(self.first_seq_num, seq_num) {
            return;
        }
        if !self.first_packet_received {
            return;
        }

        let target = seq_num.wrapping_add(1);
        let diff = forward_diff(self.first_seq_num, target) as usize;
        let iterations = diff.min(self.buffer.len());
        for _ in 0..iterations {
            let idx = self.first_seq_num as usize % self.buffer.len();
            if let Some(stored) = &self.buffer[idx] {
                if ahead_of(target, stored.seq_num) {
                    self.buffer[idx] = None;
                }
            }
            self.first_seq_num = self.first_seq_num.wrapping_add(1);
        }
        self.first_seq_num = target;
        self.is_cleared_to_first_seq_num = true;

        // Find the newest tracked entry at or before `seq_num`: an
        // `upper_bound` hit at the very front of the set means there's
        // nothing older to trim, matching the original's off-by-one where
        // that boundary entry itself survives.
        let mut cutoff: Option<MissingSeq> = None;
        for &m in self.missing.iter() {
            if ahead_of(m.0, seq_num) {
                break;
            }
            cutoff = Some(m);
        }
        if let Some(c) = cutoff {
            self.missing = self.missing.split_off(&c);
        }
    }

    pub fn clear(&mut self) {
        self.clear_internal();
    }

    fn clear_internal(&mut self) {
        for entry in self.buffer.iter_mut() {
            *entry = None;
        }
        self.first_packet_received = false;
        self.is_cleared_to_first_seq_num = false;
        self.last_received_packet_ms = 0;
        self.last_received_keyframe_packet_ms = 0;
        self.newest_inserted_seq_num = None;
        self.missing.clear();
    }

    fn expand_buffer_size(&mut self) -> bool {
        if self.buffer.len() == self.max_size {
            tracing::warn!(max_size = self.max_size, "packet buffer already at max size, cannot expand");
            return false;
        }
        let new_size = (self.buffer.len() * 2).min(self.max_size);
        let mut new_buffer = Vec::with_capacity(new_size);
        new_buffer.resize_with(new_size, || None);
        for entry in self.buffer.drain(..) {
            if let Some(packet) = entry {
                let idx = packet.seq_num as usize % new_size;
                new_buffer[idx] = Some(packet);
            }
        }
        self.buffer = new_buffer;
        tracing::debug!(new_size, "packet buffer expanded");
        true
    }

    fn potential_new_frame(&self, seq_num: u16) -> bool {
        let size = self.buffer.len();
        let index = seq_num as usize % size;
        let prev_index = if index > 0 { index - 1 } else { size - 1 };

        let entry = match &self.buffer[index] {
            Some(e) => e,
            None => return false,
        };
        if entry.seq_num != seq_num {
            return false;
        }
        if entry.is_first_in_frame {
            return true;
        }
        let prev_entry = match &self.buffer[prev_index] {
            Some(e) => e,
            None => return false,
        };
        if prev_entry.seq_num != seq_num.wrapping_sub(1) {
            return false;
        }
        if prev_entry.timestamp != entry.timestamp {
            return false;
        }
        prev_entry.continuous
    }

    fn find_frames(&mut self, mut seq_num: u16) -> Vec<BufferedPacket> {
        let mut found = Vec::new();
        let size = self.buffer.len();

        for _ in 0..size {
            if !self.potential_new_frame(seq_num) {
                break;
            }
            let index = seq_num as usize % size;
            if let Some(entry) = &mut self.buffer[index] {
                entry.continuous = true;
            }

            let is_last = self.buffer[index].as_ref().unwrap().is_last_in_frame;
            if is_last {
                let mut start_seq_num = seq_num;
                let mut start_index = index;
                let mut tested = 0usize;
                loop {
                    tested += 1;
                    if self.buffer[start_index].as_ref().unwrap().is_first_in_frame {
                        break;
                    }
                    if tested == size {
                        break;
                    }
                    start_index = if start_index > 0 { start_index - 1 } else { size - 1 };
                    start_seq_num = start_seq_num.wrapping_sub(1);
                }

                let mut i = start_seq_num;
                loop {
                    let idx = i as usize % size;
                    let mut packet = self.buffer[idx].take().expect("continuous frame packet must be present");
                    packet.is_first_in_frame = i == start_seq_num;
                    packet.is_last_in_frame = i == seq_num;
                    found.push(packet);
                    if i == seq_num {
                        break;
                    }
                    i = i.wrapping_add(1);
                }
                let keep: BTreeSet<MissingSeq> = self.missing.iter().copied().filter(|m| ahead_of(m.0, seq_num)).collect();
                self.missing = keep;
            }
            seq_num = seq_num.wrapping_add(1);
        }
        found
    }

    fn update_missing_packets(&mut self, seq_num: u16) {
        let newest = match self.newest_inserted_seq_num {
            Some(n) => n,
            None => {
                self.newest_inserted_seq_num = Some(seq_num);
                seq_num
            }
        };

        if ahead_of(seq_num, newest) {
            // Age out anything more than `MAX_MISSING_AGE` behind the new
            // newest sequence number before recording fresh gaps.
            let old_seq_num = seq_num.wrapping_sub(MAX_MISSING_AGE);
            self.missing = self.missing.split_off(&MissingSeq(old_seq_num));

            // Guard against flooding the missing set if there's a large
            // forward jump: start filling from whichever of `newest` or
            // `old_seq_num` is more recent.
            let mut cursor = if ahead_of(old_seq_num, newest) { old_seq_num } else { newest };
            cursor = cursor.wrapping_add(1);
            while ahead_of(seq_num, cursor) {
                self.missing.insert(MissingSeq(cursor));
                cursor = cursor.wrapping_add(1);
            }
            self.newest_inserted_seq_num = Some(cursor);
        } else {
            self.missing.remove(&MissingSeq(seq_num));
        }
    }
}
