use std::path::Path;
use std::time::Duration;

use ffmpeg_next::Dictionary;

use crate::{
    packet::SourcePacket,
    stream::{SourceStream, TimeBase},
};

/// Options handed to FFmpeg's RTSP demuxer when the input is opened.
#[derive(Debug, Clone)]
pub struct InputOptions {
    /// Lower transport, "tcp" or "udp".
    pub rtsp_transport: String,
    /// Socket I/O timeout. A silent source fails the next read once it elapses.
    pub read_timeout: Duration,
}

impl Default for InputOptions {
    fn default() -> Self {
        Self {
            rtsp_transport: "tcp".to_string(),
            read_timeout: Duration::from_secs(10),
        }
    }
}

impl InputOptions {
    /// Demuxer options as FFmpeg expects them; the timeout is in microseconds.
    fn demuxer_options(&self) -> [(&'static str, String); 2] {
        [
            ("rtsp_transport", self.rtsp_transport.clone()),
            ("timeout", self.read_timeout.as_micros().to_string()),
        ]
    }

    fn to_dictionary(&self) -> Dictionary<'static> {
        let mut opts = Dictionary::new();
        for (key, value) in self.demuxer_options() {
            opts.set(key, &value);
        }
        opts
    }
}

/// An opened RTSP session. Opening performs DESCRIBE/SETUP/PLAY; FFmpeg keeps
/// the session alive while packets are being read.
pub struct RtspInput {
    inner: ffmpeg_next::format::context::Input,
    streams: Vec<SourceStream>,
}

impl RtspInput {
    pub fn open(url: &str, options: &InputOptions) -> anyhow::Result<Self> {
        let input =
            ffmpeg_next::format::input_with_dictionary(Path::new(url), options.to_dictionary())
                .map_err(|e| anyhow::anyhow!("open input {}: {}", url, e))?;

        let streams: Vec<SourceStream> = input.streams().map(SourceStream::from).collect();
        log::debug!(
            "opened {} over {} with {} stream(s)",
            url,
            options.rtsp_transport,
            streams.len()
        );

        Ok(Self {
            inner: input,
            streams,
        })
    }

    /// Streams in source order; index 0 is the primary track.
    pub fn streams(&self) -> &[SourceStream] {
        &self.streams
    }

    /// Reads the next packet. `Ok(None)` means the source ended the stream.
    pub fn read_packet(&mut self) -> anyhow::Result<Option<SourcePacket>> {
        let mut packet = ffmpeg_next::codec::packet::Packet::empty();
        match packet.read(&mut self.inner) {
            Ok(()) => {
                let time_base = self
                    .streams
                    .get(packet.stream())
                    .map(|s| s.time_base())
                    .unwrap_or_default();
                Ok(Some(SourcePacket::from((&packet, time_base))))
            }
            Err(ffmpeg_next::Error::Eof) => {
                log::debug!("input reached end of stream");
                Ok(None)
            }
            Err(e) => Err(anyhow::anyhow!("read packet: {}", e)),
        }
    }
}

impl TimeBase {
    pub(crate) fn from_rational(r: ffmpeg_next::Rational) -> Self {
        Self::new(r.numerator(), r.denominator())
    }
}
