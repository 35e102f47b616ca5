use std::time::Duration;

use bytes::Bytes;
use ffmpeg_source::stream::TimeBase;

/// One Annex-B buffer ready for the outbound track.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BitstreamSample {
    pub data: Bytes,
    /// Wall-clock time the sample occupies.
    pub duration: Duration,
}

impl BitstreamSample {
    pub fn new(data: Bytes, duration: Duration) -> Self {
        Self { data, duration }
    }
}

/// Converts a tick delta at the given time base to wall-clock time.
///
/// With the 1/90000 RTP video clock a delta of 3000 ticks is 1/30 s.
pub fn ticks_to_duration(delta: i64, time_base: TimeBase) -> Duration {
    if delta <= 0 || !time_base.is_valid() {
        return Duration::ZERO;
    }
    let nanos = i128::from(delta) * i128::from(time_base.num) * 1_000_000_000
        / i128::from(time_base.den);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Tracks the previous packet timestamp of one ingest session.
#[derive(Debug, Default)]
pub struct SampleClock {
    previous: Option<i64>,
}

impl SampleClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Duration since the previous timestamp. The first timestamp, a missing timestamp, or one that went backwards gives zero.
    pub fn advance(&mut self, timestamp: Option<i64>, time_base: TimeBase) -> Duration {
        let Some(timestamp) = timestamp else {
            return Duration::ZERO;
        };
        let duration = match self.previous {
            Some(previous) => ticks_to_duration(timestamp.saturating_sub(previous), time_base),
            None => Duration::ZERO,
        };
        self.previous = Some(timestamp);
        duration
    }
}
