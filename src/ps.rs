//! Streaming parser for an MPEG-2 Program Stream carrying H.264 video and
//! an arbitrary audio elementary stream, multiplexed PES-style within PS
//! pack headers. Walks an ordered run of RTP payloads (one reordered
//! frame's worth) and accumulates each elementary stream's bytes into a
//! pair of growable, capacity-bounded buffers.
//!
//! No teacher module parses PS/PES; `rtpar` only ever sees RTP payloads
//! that are already individual codec frames. This is new surface, grounded
//! directly on the wire layout and state machine of the corpus's PS demux.

use byteorder::{BigEndian, ByteOrder};

use crate::error::PsError;

pub const MAX_VIDEO_FRAME: usize = 1024 * 1024;
pub const MAX_AUDIO_FRAME: usize = 1024 * 1024;

pub const PS_AUDIO_ID_RANGE: std::ops::RangeInclusive<u8> = 0xC0..=0xDF;
pub const PS_VIDEO_ID_RANGE: std::ops::RangeInclusive<u8> = 0xE0..=0xEF;

/// Carry-over state for a PES body that spills across an RTP packet
/// boundary. The `u32` is the number of body bytes still owed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    Idle,
    ReadingVideo(u32),
    ReadingAudio(u32),
}

/// Per-frame scratch the demuxer threads across the packets of one
/// reordered frame, plus stream-type mappings learned from the most recent
/// Program Stream Map that persist across frames.
pub struct DemuxState {
    pub video_buf: Vec<u8>,
    pub audio_buf: Vec<u8>,
    pub read_mode: ReadMode,
    pub video_stream_type: Option<u8>,
    pub video_es_id: Option<u8>,
    pub audio_stream_type: Option<u8>,
    pub audio_es_id: Option<u8>,
}

impl Default for DemuxState {
    fn default() -> Self {
        Self {
            video_buf: Vec::new(),
            audio_buf: Vec::new(),
            read_mode: ReadMode::Idle,
            video_stream_type: None,
            video_es_id: None,
            audio_stream_type: None,
            audio_es_id: None,
        }
    }
}

impl DemuxState {
    /// Resets the per-frame accumulators ahead of demuxing a new frame.
    /// Learned stream-type mappings and `read_mode` continuation state
    /// survive across frames.
    fn begin_frame(&mut self) {
        self.video_buf.clear();
        self.audio_buf.clear();
    }

    /// Runs the demuxer over one frame's worth of RTP payloads, in order,
    /// accumulating elementary-stream bytes into `video_buf`/`audio_buf`.
    ///
    /// Malformed or truncated PS structure halts processing of the current
    /// frame silently, keeping whatever was accumulated so far. Only an
    /// elementary-stream buffer overflow is reported as an error.
    pub fn demux_frame<'a, I: IntoIterator<Item = &'a [u8]>>(&mut self, payloads: I) -> Result<(), PsError> {
        self.begin_frame();
        for payload in payloads {
            self.demux_payload(payload)?;
        }
        Ok(())
    }

    fn demux_payload(&mut self, payload: &[u8]) -> Result<(), PsError> {
        if payload.is_empty() {
            return Ok(());
        }
        let mut ptr = 0usize;

        if let ReadMode::ReadingVideo(remaining) | ReadMode::ReadingAudio(remaining) = self.read_mode {
            let read = (remaining as usize).min(payload.len());
            self.fetch_data(&payload[ptr..ptr + read])?;
            ptr += read;
            if self.read_mode != ReadMode::Idle {
                return Ok(());
            }
        }

        while ptr + 4 <= payload.len() {
            if !(payload[ptr] == 0x00 && payload[ptr + 1] == 0x00 && payload[ptr + 2] == 0x01) {
                tracing::debug!("non-start-code bytes where a ps start code was expected, stopping frame");
                return Ok(());
            }
            let code = payload[ptr + 3];
            let next = match code {
                0xBA => self.skip_pack_header(payload, ptr),
                0xBB => self.skip_system_header(payload, ptr),
                0xBC => self.parse_program_stream_map(payload, ptr),
                0xBD => self.skip_private_stream(payload, ptr),
                0xE0 => match self.start_pes(payload, ptr, true) {
                    Ok(Some(n)) => Ok(n),
                    Ok(None) => return Ok(()),
                    Err(e @ PsError::FrameBufferOverflow { .. }) => return Err(e),
                    Err(e) => Err(e),
                },
                0xC0 => match self.start_pes(payload, ptr, false) {
                    Ok(Some(n)) => Ok(n),
                    Ok(None) => return Ok(()),
                    Err(e @ PsError::FrameBufferOverflow { .. }) => return Err(e),
                    Err(e) => Err(e),
                },
                _ => Err(PsError::UnknownStartCode(code)),
            };
            match next {
                Ok(n) => ptr = n,
                Err(e) => {
                    tracing::debug!(error = %e, "stopping ps frame scan");
                    return Ok(());
                }
            }
            if self.read_mode != ReadMode::Idle {
                return Ok(());
            }
        }
        Ok(())
    }

    fn skip_pack_header(&self, payload: &[u8], ptr: usize) -> Result<usize, PsError> {
        // 4-byte start code + 9 info bytes + 1 byte carrying the 3-bit stuffing length.
        let stuffing_len = (*payload.get(ptr + 13).ok_or(PsError::TruncatedPackHeader)? & 0x07) as usize;
        Ok(ptr + 14 + stuffing_len)
    }

    fn skip_system_header(&self, payload: &[u8], ptr: usize) -> Result<usize, PsError> {
        let header_len = get_u16_be(payload, ptr + 4).ok_or(PsError::TruncatedSystemHeader)? as usize;
        Ok(ptr + 6 + header_len)
    }

    fn parse_program_stream_map(&mut self, payload: &[u8], ptr: usize) -> Result<usize, PsError> {
        let map_len = get_u16_be(payload, ptr + 4).ok_or(PsError::TruncatedProgramStreamMap)? as usize;
        let mut psm = ptr + 6 + 2; // skip 2 reserved/descriptor-flag bytes
        let info_len = get_u16_be(payload, psm).ok_or(PsError::TruncatedProgramStreamMap)? as usize;
        psm += 2 + info_len;
        let mut es_map_len = get_u16_be(payload, psm).ok_or(PsError::TruncatedProgramStreamMap)? as usize;
        psm += 2;

        while es_map_len >= 4 {
            let stream_type = *payload.get(psm).ok_or(PsError::TruncatedProgramStreamMap)?;
            let es_id = *payload.get(psm + 1).ok_or(PsError::TruncatedProgramStreamMap)?;
            let es_info_len = get_u16_be(payload, psm + 2).ok_or(PsError::TruncatedProgramStreamMap)? as usize;
            let entry_len = 4 + es_info_len;
            if entry_len > es_map_len {
                break;
            }
            psm += entry_len;
            es_map_len -= entry_len;

            if PS_AUDIO_ID_RANGE.contains(&es_id) {
                if self.audio_stream_type != Some(stream_type) || self.audio_es_id != Some(es_id) {
                    tracing::debug!(stream_type, es_id, "ps map audio stream updated");
                    self.audio_stream_type = Some(stream_type);
                    self.audio_es_id = Some(es_id);
                }
            } else if PS_VIDEO_ID_RANGE.contains(&es_id) {
                if self.video_stream_type != Some(stream_type) || self.video_es_id != Some(es_id) {
                    tracing::debug!(stream_type, es_id, "ps map video stream updated");
                    self.video_stream_type = Some(stream_type);
                    self.video_es_id = Some(es_id);
                }
            }
        }

        Ok(ptr + 6 + map_len)
    }

    fn skip_private_stream(&self, payload: &[u8], ptr: usize) -> Result<usize, PsError> {
        let pes_packet_len = get_u16_be(payload, ptr + 4).ok_or(PsError::TruncatedPes)? as usize;
        let pes_header_data_len = *payload.get(ptr + 8).ok_or(PsError::TruncatedPes)? as usize;
        let body_len = pes_packet_len.checked_sub(2 + 1 + pes_header_data_len).ok_or(PsError::TruncatedPes)?;
        Ok(ptr + 9 + pes_header_data_len + body_len)
    }

    /// Starts a video (`is_video = true`) or audio PES body, copying as
    /// much of it as is present in this payload and recording how much is
    /// still owed via `read_mode`. Returns the new scan cursor if the PES
    /// body was fully consumed from this payload (so scanning continues),
    /// or `None` if the body spills into the next packet.
    fn start_pes(&mut self, payload: &[u8], ptr: usize, is_video: bool) -> Result<Option<usize>, PsError> {
        let pes_packet_len = get_u16_be(payload, ptr + 4).ok_or(PsError::TruncatedPes)? as usize;
        let pes_header_data_len = *payload.get(ptr + 8).ok_or(PsError::TruncatedPes)? as usize;
        let body_len = pes_packet_len.checked_sub(2 + 1 + pes_header_data_len).ok_or(PsError::TruncatedPes)?;
        let body_start = ptr + 9 + pes_header_data_len;
        if body_start > payload.len() {
            return Err(PsError::TruncatedPes);
        }

        let available = payload.len() - body_start;
        let read = body_len.min(available);
        self.read_mode = if is_video { ReadMode::ReadingVideo(body_len as u32) } else { ReadMode::ReadingAudio(body_len as u32) };
        self.fetch_data(&payload[body_start..body_start + read])?;

        if self.read_mode == ReadMode::Idle {
            Ok(Some(body_start + read))
        } else {
            Ok(None)
        }
    }

    /// Copies `bytes` into the buffer selected by `read_mode`, decrementing
    /// the owed count and transitioning back to `Idle` at zero.
    fn fetch_data(&mut self, bytes: &[u8]) -> Result<(), PsError> {
        if bytes.is_empty() {
            return Ok(());
        }
        match self.read_mode {
            ReadMode::ReadingVideo(remaining) => {
                if self.video_buf.len() + bytes.len() > MAX_VIDEO_FRAME {
                    return Err(PsError::FrameBufferOverflow { stream: "video", cap: MAX_VIDEO_FRAME });
                }
                self.video_buf.extend_from_slice(bytes);
                let remaining = remaining - bytes.len() as u32;
                self.read_mode = if remaining == 0 { ReadMode::Idle } else { ReadMode::ReadingVideo(remaining) };
            }
            ReadMode::ReadingAudio(remaining) => {
                if self.audio_buf.len() + bytes.len() > MAX_AUDIO_FRAME {
                    return Err(PsError::FrameBufferOverflow { stream: "audio", cap: MAX_AUDIO_FRAME });
                }
                self.audio_buf.extend_from_slice(bytes);
                let remaining = remaining - bytes.len() as u32;
                self.read_mode = if remaining == 0 { ReadMode::Idle } else { ReadMode::ReadingAudio(remaining) };
            }
            ReadMode::Idle => {}
        }
        Ok(())
    }
}

fn get_u16_be(buf: &[u8], at: usize) -> Option<u16> {
    buf.get(at..at + 2).map(BigEndian::read_u16)
}

/// Human-readable name for a PS stream-type byte, for logging.
pub fn stream_type_name(stream_type: u8) -> &'static str {
    match stream_type {
        0x01 => "mpeg1-video",
        0x02 => "mpeg2-video",
        0x03 => "mpeg1-audio",
        0x04 => "mpeg2-audio",
        0x05 => "private-section",
        0x06 => "private-data",
        0x0F => "aac",
        0x10 => "mpeg4",
        0x1B => "h264",
        0x24 => "hevc",
        0x42 => "cavs",
        0x80 => "savc",
        0x81 => "ac3",
        0x90 => "g711",
        0x91 => "g711-ulaw",
        0x92 => "g722.1",
        0x93 => "g723.1",
        0x96 => "g726",
        0x99 => "g729.1",
        0x9B => "svac",
        0x9C => "pcm",
        _ => "unknown",
    }
}
