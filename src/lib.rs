pub mod error;
pub mod nal;
pub mod processor;
pub mod ps;
pub mod reorder;
pub mod repack;
pub mod rtp;
pub mod seq;

pub use error::{PsError, RtpError};
pub use processor::{ProcessResult, Processor};
pub use reorder::{BufferedPacket, Clock, InsertResult, ReorderBuffer, SystemClock};
pub use repack::h264_pack;
pub use rtp::{RtpHeader, RtpPacket};
