//! RTSP packet source backed by FFmpeg's demuxer, plus the H.264 access-unit
//! decoding that turns demuxed packets into NAL units.

/// Registers FFmpeg components (formats, network protocols). Call once at
/// startup before opening an input.
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))?;
    ffmpeg_next::format::network::init();
    Ok(())
}

pub mod h264;
pub mod input;
pub mod packet;
pub mod stream;
