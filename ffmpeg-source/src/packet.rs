use bytes::Bytes;

use crate::stream::TimeBase;

/// One demuxed packet, copied out of FFmpeg so it can cross threads freely.
#[derive(Debug, Clone)]
pub struct SourcePacket {
    stream_index: usize,
    data: Bytes,
    pts: Option<i64>,
    dts: Option<i64>,
    time_base: TimeBase,
}

impl SourcePacket {
    pub fn new(stream_index: usize, data: Bytes, pts: Option<i64>, time_base: TimeBase) -> Self {
        Self {
            stream_index,
            data,
            pts,
            dts: pts,
            time_base,
        }
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn pts(&self) -> Option<i64> {
        self.pts
    }

    /// Presentation timestamp, falling back to the decode timestamp.
    pub fn timestamp(&self) -> Option<i64> {
        self.pts.or(self.dts)
    }

    pub fn time_base(&self) -> TimeBase {
        self.time_base
    }
}

impl From<(&ffmpeg_next::codec::packet::Packet, TimeBase)> for SourcePacket {
    fn from((packet, time_base): (&ffmpeg_next::codec::packet::Packet, TimeBase)) -> Self {
        Self {
            stream_index: packet.stream(),
            data: packet
                .data()
                .map(Bytes::copy_from_slice)
                .unwrap_or_default(),
            pts: packet.pts(),
            dts: packet.dts(),
            time_base,
        }
    }
}
