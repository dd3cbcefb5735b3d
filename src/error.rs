//! Internal error types. None of these cross the `Processor` /
//! `ReorderBuffer` public boundary as exceptions. They are used at the
//! point a malformed input is detected and then folded into a silent drop,
//! an empty return, or a `buffer_cleared` signal.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RtpError {
    #[error("rtp buffer too short: need at least {need} bytes, got {got}")]
    BufferTooShort { need: usize, got: usize },
    #[error("invalid rtp version {0}")]
    InvalidVersion(u8),
    #[error("invalid header extension length")]
    InvalidExtensionLength,
    #[error("invalid rtp padding length")]
    InvalidPadding,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PsError {
    #[error("ps pack header truncated")]
    TruncatedPackHeader,
    #[error("ps system header truncated")]
    TruncatedSystemHeader,
    #[error("program stream map truncated")]
    TruncatedProgramStreamMap,
    #[error("pes packet truncated")]
    TruncatedPes,
    #[error("unknown ps start code 0x{0:02X}")]
    UnknownStartCode(u8),
    #[error("{stream} elementary stream buffer overflow (cap {cap} bytes)")]
    FrameBufferOverflow { stream: &'static str, cap: usize },
}
