//! Relay media path:
//!
//! ```text
//! RTSP packet ─► AccessUnitDecoder ─► annexb::assemble ─► OutboundTrack ─┬─► viewer 1
//!                 (ffmpeg-source)        (+ SPS/PPS)       (one shared)  ├─► viewer 2
//!                                                                         └─► viewer N
//! ```
//!
//! Samples are broadcast live. Nothing is queued for viewers that attach later.

pub mod annexb;
pub mod track;
pub mod types;
