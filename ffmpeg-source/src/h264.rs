//! H.264 NAL handling for demuxed packets.
//!
//! FFmpeg hands out packets either in Annex-B form (RTSP, MPEG-TS) or
//! length-prefixed (AVCC, when the stream description carries an `avcC`
//! record). [`AccessUnitDecoder`] splits either form into [`AccessUnit`]s and
//! [`ParameterSets::from_extradata`] pulls SPS/PPS from the description.

use bytes::Bytes;

/// Annex B start code (4-byte)
pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalUnitType {
    NonIdr,
    Idr,
    Sei,
    Sps,
    Pps,
    AccessUnitDelimiter,
    Other(u8),
}

impl NalUnitType {
    /// Type from the first byte of a NAL unit (low five bits).
    pub fn from_header(header: u8) -> Self {
        match header & 0x1F {
            1 => Self::NonIdr,
            5 => Self::Idr,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::AccessUnitDelimiter,
            other => Self::Other(other),
        }
    }
}

/// One coded NAL unit, without any framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
    nal_type: NalUnitType,
    payload: Bytes,
}

impl AccessUnit {
    pub fn new(payload: Bytes) -> Self {
        let nal_type = payload
            .first()
            .map(|h| NalUnitType::from_header(*h))
            .unwrap_or(NalUnitType::Other(0));
        Self { nal_type, payload }
    }

    pub fn nal_type(&self) -> NalUnitType {
        self.nal_type
    }

    pub fn is_keyframe(&self) -> bool {
        self.nal_type == NalUnitType::Idr
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

/// SPS and PPS of the active encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSets {
    sps: Bytes,
    pps: Bytes,
}

impl ParameterSets {
    pub fn new(sps: Bytes, pps: Bytes) -> Self {
        Self { sps, pps }
    }

    pub fn sps(&self) -> &Bytes {
        &self.sps
    }

    pub fn pps(&self) -> &Bytes {
        &self.pps
    }

    /// Extracts the first SPS and PPS from codec extradata, accepting both an
    /// `avcC` configuration record and Annex-B NAL units.
    pub fn from_extradata(extradata: &[u8]) -> Option<Self> {
        match NalFraming::from_extradata(extradata) {
            NalFraming::LengthPrefixed(_) => parse_avcc_record(extradata),
            NalFraming::AnnexB => {
                let mut sps = None;
                let mut pps = None;
                for nal in split_annexb(extradata) {
                    match NalUnitType::from_header(nal.first().copied().unwrap_or(0)) {
                        NalUnitType::Sps if sps.is_none() => sps = Some(nal),
                        NalUnitType::Pps if pps.is_none() => pps = Some(nal),
                        _ => {}
                    }
                }
                Some(Self::new(
                    Bytes::copy_from_slice(sps?),
                    Bytes::copy_from_slice(pps?),
                ))
            }
        }
    }
}

/// Picks up SPS and PPS carried in-band, for sources whose description
/// has none. The first of each wins.
#[derive(Debug, Default)]
pub struct ParameterSetCollector {
    sps: Option<Bytes>,
    pps: Option<Bytes>,
}

impl ParameterSetCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the parameter sets once both have been seen.
    pub fn observe(&mut self, units: &[AccessUnit]) -> Option<ParameterSets> {
        for unit in units {
            match unit.nal_type() {
                NalUnitType::Sps if self.sps.is_none() => self.sps = Some(unit.payload().clone()),
                NalUnitType::Pps if self.pps.is_none() => self.pps = Some(unit.payload().clone()),
                _ => {}
            }
        }
        match (&self.sps, &self.pps) {
            (Some(sps), Some(pps)) => Some(ParameterSets::new(sps.clone(), pps.clone())),
            _ => None,
        }
    }
}

/// How NAL units are delimited inside a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalFraming {
    AnnexB,
    /// Big-endian length prefix of the given width in bytes (1, 2 or 4).
    LengthPrefixed(u8),
}

impl NalFraming {
    /// An `avcC` record starts with configurationVersion = 1; anything else
    /// (including empty extradata) is treated as Annex-B.
    pub fn from_extradata(extradata: &[u8]) -> Self {
        match extradata {
            [0x01, _, _, _, length_size, _, _, ..] => {
                NalFraming::LengthPrefixed((length_size & 0x03) + 1)
            }
            _ => NalFraming::AnnexB,
        }
    }
}

fn parse_avcc_record(record: &[u8]) -> Option<ParameterSets> {
    let mut reader = ByteReader::new(record.get(5..)?);

    let num_sps = reader.u8()? & 0x1F;
    let mut sps = None;
    for _ in 0..num_sps {
        let len = reader.u16()? as usize;
        let nal = reader.take(len)?;
        sps.get_or_insert(nal);
    }

    let num_pps = reader.u8()?;
    let mut pps = None;
    for _ in 0..num_pps {
        let len = reader.u16()? as usize;
        let nal = reader.take(len)?;
        pps.get_or_insert(nal);
    }

    Some(ParameterSets::new(
        Bytes::copy_from_slice(sps?),
        Bytes::copy_from_slice(pps?),
    ))
}

struct ByteReader<'a> {
    data: &'a [u8],
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if n > self.data.len() {
            return None;
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Some(head)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }
}

/// Finds the next 3-byte start code at or after `from`, returning its offset.
fn find_start_code(data: &[u8], from: usize) -> Option<usize> {
    data.get(from..)?
        .windows(3)
        .position(|w| w == [0x00, 0x00, 0x01])
        .map(|p| p + from)
}

/// Splits an Annex-B buffer into NAL unit slices. Bytes before the first
/// start code are skipped, as are the zero bytes of 4-byte start codes.
fn split_annexb(data: &[u8]) -> Vec<&[u8]> {
    let mut nals = Vec::new();
    let mut next = find_start_code(data, 0);
    while let Some(start_code) = next {
        let begin = start_code + 3;
        next = find_start_code(data, begin);
        let mut end = next.unwrap_or(data.len());
        if next.is_some() {
            while end > begin && data[end - 1] == 0x00 {
                end -= 1;
            }
        }
        if end > begin {
            nals.push(&data[begin..end]);
        }
    }
    nals
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Nothing to decode yet; the unit continues in a later packet.
    #[error("more packets needed to complete a unit")]
    MorePacketsNeeded,
    /// Data without any unit boundary, so its start has not been seen.
    #[error("packet does not start a unit and no previous unit was started")]
    NonStartingPacketAndNoPrevious,
    #[error("NAL unit length {declared} exceeds the {remaining} bytes left in the packet")]
    Truncated { declared: usize, remaining: usize },
}

impl DecodeError {
    /// Steady-state conditions at stream start or mid-unit, not failures.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            DecodeError::MorePacketsNeeded | DecodeError::NonStartingPacketAndNoPrevious
        )
    }
}

/// Splits demuxed packets of one stream into NAL units.
#[derive(Debug, Clone)]
pub struct AccessUnitDecoder {
    framing: NalFraming,
}

impl AccessUnitDecoder {
    pub fn new(framing: NalFraming) -> Self {
        Self { framing }
    }

    pub fn decode(&mut self, data: &Bytes) -> Result<Vec<AccessUnit>, DecodeError> {
        if data.is_empty() {
            return Err(DecodeError::MorePacketsNeeded);
        }
        match self.framing {
            NalFraming::AnnexB => self.decode_annexb(data),
            NalFraming::LengthPrefixed(size) => self.decode_length_prefixed(data, size as usize),
        }
    }

    fn decode_annexb(&self, data: &Bytes) -> Result<Vec<AccessUnit>, DecodeError> {
        if find_start_code(data, 0).is_none() {
            return Err(DecodeError::NonStartingPacketAndNoPrevious);
        }
        let units = split_annexb(data)
            .into_iter()
            .map(|nal| AccessUnit::new(data.slice_ref(nal)))
            .collect::<Vec<_>>();
        if units.is_empty() {
            return Err(DecodeError::MorePacketsNeeded);
        }
        Ok(units)
    }

    fn decode_length_prefixed(
        &self,
        data: &Bytes,
        size: usize,
    ) -> Result<Vec<AccessUnit>, DecodeError> {
        let mut units = Vec::new();
        let mut i = 0;
        while i < data.len() {
            let remaining = data.len() - i;
            if remaining < size {
                return Err(DecodeError::Truncated {
                    declared: size,
                    remaining,
                });
            }
            let len = data[i..i + size]
                .iter()
                .fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
            i += size;
            if len > data.len() - i {
                return Err(DecodeError::Truncated {
                    declared: len,
                    remaining: data.len() - i,
                });
            }
            if len > 0 {
                units.push(AccessUnit::new(data.slice(i..i + len)));
            }
            i += len;
        }
        if units.is_empty() {
            return Err(DecodeError::MorePacketsNeeded);
        }
        Ok(units)
    }
}
