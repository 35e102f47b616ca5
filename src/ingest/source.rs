use ffmpeg_source::{
    input::{InputOptions, RtspInput},
    packet::SourcePacket,
    stream::SourceStream,
};

/// An established source session. Reads block; dropping it tears the
/// session down.
pub trait PacketSource: Send + 'static {
    /// Tracks offered by the source, primary track first.
    fn streams(&self) -> &[SourceStream];

    /// Next packet of any track. `Ok(None)` is a normal end of stream; an
    /// error means the connection is gone.
    fn read_packet(&mut self) -> anyhow::Result<Option<SourcePacket>>;
}

/// Opens source sessions. Called from a blocking thread.
pub trait SourceConnector: Send + Sync + 'static {
    fn connect(&self, url: &str, options: &InputOptions) -> anyhow::Result<Box<dyn PacketSource>>;
}

impl PacketSource for RtspInput {
    fn streams(&self) -> &[SourceStream] {
        RtspInput::streams(self)
    }

    fn read_packet(&mut self) -> anyhow::Result<Option<SourcePacket>> {
        RtspInput::read_packet(self)
    }
}

/// RTSP through FFmpeg's demuxer.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegConnector;

impl SourceConnector for FfmpegConnector {
    fn connect(&self, url: &str, options: &InputOptions) -> anyhow::Result<Box<dyn PacketSource>> {
        let input = RtspInput::open(url, options)?;
        Ok(Box::new(input))
    }
}
