use bytes::Bytes;
use ffmpeg_next::{codec::Parameters, format::stream};

/// Rational time base of a stream, e.g. `1/90000` for RTSP video.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub num: i32,
    pub den: i32,
}

impl TimeBase {
    pub const RTP_VIDEO: TimeBase = TimeBase { num: 1, den: 90_000 };

    pub fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Whether the time base can convert ticks to seconds.
    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        Self::RTP_VIDEO
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    H264,
    Other,
}

/// Description of one track offered by the source.
#[derive(Debug, Clone)]
pub struct SourceStream {
    index: usize,
    codec: Codec,
    codec_name: String,
    time_base: TimeBase,
    extradata: Bytes,
}

impl SourceStream {
    pub fn new(index: usize, codec: Codec, time_base: TimeBase, extradata: Bytes) -> Self {
        let codec_name = match codec {
            Codec::H264 => "h264".to_string(),
            Codec::Other => "unknown".to_string(),
        };
        Self {
            index,
            codec,
            codec_name,
            time_base,
            extradata,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn codec_name(&self) -> &str {
        &self.codec_name
    }

    pub fn time_base(&self) -> TimeBase {
        self.time_base
    }

    /// Codec configuration bytes (`avcC` record or Annex-B SPS/PPS).
    pub fn extradata(&self) -> &Bytes {
        &self.extradata
    }
}

/// Reads extradata from codec parameters via the raw AVCodecParameters pointer.
fn copy_extradata(codec_params: &Parameters) -> Bytes {
    unsafe {
        let p = codec_params.as_ptr();
        let extradata_ptr = (*p).extradata;
        let size = (*p).extradata_size;
        if extradata_ptr.is_null() || size <= 0 {
            return Bytes::new();
        }
        Bytes::copy_from_slice(std::slice::from_raw_parts(extradata_ptr, size as usize))
    }
}

impl From<stream::Stream<'_>> for SourceStream {
    fn from(stream: stream::Stream<'_>) -> Self {
        let parameters = stream.parameters();
        let id = parameters.id();
        let codec = if id == ffmpeg_next::codec::Id::H264 {
            Codec::H264
        } else {
            Codec::Other
        };
        let time_base = stream.time_base();
        Self {
            index: stream.index(),
            codec,
            codec_name: format!("{:?}", id).to_lowercase(),
            time_base: TimeBase::from_rational(time_base),
            extradata: copy_extradata(&parameters),
        }
    }
}
